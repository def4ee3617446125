mod common;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pyrun::compiler::{self, CompileOptions};
use pyrun::vm::VmConfig;
use pyrun::{RunOptions, run_code, run_source};

fn bench_vm(c: &mut Criterion) {
    for (label, path) in common::WORKLOADS {
        let source = common::load_source(path);
        let program = common::load_program(path);
        let code = common::load_code(path);

        c.bench_function(&format!("vm_compile_only_{label}"), |b| {
            b.iter(|| {
                let compiled =
                    compiler::compile(black_box(&program), CompileOptions::default()).expect("compile");
                black_box(compiled);
            })
        });

        c.bench_function(&format!("vm_execute_prepared_{label}"), |b| {
            b.iter(|| {
                let execution = run_code(black_box(code.clone()), VmConfig::default());
                assert!(execution.succeeded(), "{label} raised");
                black_box(execution);
            })
        });

        c.bench_function(&format!("vm_total_{label}"), |b| {
            b.iter(|| {
                let execution = run_source(black_box(&source), RunOptions::default()).expect("run");
                black_box(execution);
            })
        });
    }
}

criterion_group!(benches, bench_vm);
criterion_main!(benches);
