use std::fs;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use pyrun::compiler::CompileOptions;
use pyrun::vm::VmConfig;
use pyrun::{RunOptions, bytecode, compile_source, run_source};

const USAGE: &str = "usage: pyrun [--dis] [--recursion-limit N] [-O] [file]";

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mut disassemble = false;
    let mut compile = CompileOptions::default();
    let mut vm = VmConfig::default();
    let mut input_path: Option<String> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dis" => disassemble = true,
            "-O" => compile.optimize_asserts = true,
            "--recursion-limit" => {
                let limit = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing value after {arg}"))?;
                vm.max_call_depth = limit
                    .parse()
                    .with_context(|| format!("Invalid recursion limit '{limit}'"))?;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(ExitCode::SUCCESS);
            }
            flag if flag.starts_with('-') && flag.len() > 1 => bail!("Unknown option '{flag}'\n{USAGE}"),
            _ => {
                input_path = Some(arg);
                if args.next().is_some() {
                    bail!("Only one input file is supported");
                }
                break;
            }
        }
    }

    let source = if let Some(path) = input_path {
        fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Reading stdin")?;
        buffer
    };

    if disassemble {
        let code = compile_source(&source, compile)?;
        print!("{}", bytecode::disassemble(&code));
        return Ok(ExitCode::SUCCESS);
    }

    let execution = run_source(&source, RunOptions { compile, vm })?;
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(execution.stdout.as_bytes())
        .context("Writing program output")?;
    stdout.flush().context("Flushing program output")?;
    match execution.result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(report) => {
            eprintln!("{report}");
            Ok(ExitCode::FAILURE)
        }
    }
}
