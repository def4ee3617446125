//! The stack VM: executes code objects produced by the compiler.
//!
//! One `Vm` owns the builtin classes, the builtins namespace, the module
//! globals and the captured standard output. Python frames map onto Rust
//! recursion, so deep Python recursion needs a thread with a large stack
//! (see `run_source`).

mod call;
mod config;
mod dispatch;
mod frame;
mod generator;
mod report;

use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::builtins;
use crate::bytecode::CodeObject;
use crate::runtime::class::Types;
use crate::runtime::error::{RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::function::{FunctionObject, Namespace, new_namespace};
use crate::runtime::generator::{GeneratorStep, ResumeAction};
use crate::runtime::object::{Args, CallContext, ObjectRef, is_a};
use crate::runtime::value::Value;

pub use config::VmConfig;
pub use report::{ChainReason, ExceptionReport, UncaughtException};

use frame::{Frame, Resume};

pub struct Vm {
    config: VmConfig,
    types: Rc<Types>,
    builtins: Namespace,
    globals: Namespace,
    stdout: String,
    /// Python frames currently on the call stack.
    depth: usize,
    steps: u64,
    /// Exception being handled by the innermost `except` or `finally`.
    active_exception: Option<Value>,
    /// Exception last seen leaving a frame; re-entering a frame must not
    /// chain it to itself.
    unwound: Option<Value>,
    /// Materialised constant pools, keyed by code object address.
    constants: FxHashMap<usize, (Arc<CodeObject>, Rc<[Value]>)>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let types = Rc::new(Types::new(builtins::constructors()));
        builtins::install_methods(&types);
        let builtins = builtins::namespace(&types);
        let globals = new_namespace();
        globals
            .borrow_mut()
            .insert("__name__".to_string(), Value::str("__main__"));
        Self {
            config,
            types,
            builtins,
            globals,
            stdout: String::new(),
            depth: 0,
            steps: 0,
            active_exception: None,
            unwound: None,
            constants: FxHashMap::default(),
        }
    }

    /// Executes a module code object in this VM's globals.
    pub fn run_module(&mut self, code: Arc<CodeObject>) -> Result<(), UncaughtException> {
        debug!(code = %code.qualname, instructions = code.instructions.len(), "running module");
        let constants = self.constants_for(&code);
        let fast = vec![None; code.varnames.len()];
        let cells = (0..code.cell_count()).map(|_| Value::new_cell(None)).collect();
        let mut frame = Frame::new(code, constants, self.globals.clone(), fast, cells);
        let result = self.enter_frame(&mut frame, Resume::Enter);
        self.active_exception = None;
        self.unwound = None;
        match result {
            Ok(_) => Ok(()),
            Err(error) => {
                let exception = self.materialize(error);
                let report = report::build(self, &exception);
                debug!(exception = %report.summary(), "uncaught exception");
                Err(UncaughtException { exception, report })
            }
        }
    }

    /// Everything printed so far.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn take_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    /// A module global, if bound.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn constants_for(&mut self, code: &Arc<CodeObject>) -> Rc<[Value]> {
        let key = Arc::as_ptr(code) as usize;
        if let Some((_, constants)) = self.constants.get(&key) {
            return constants.clone();
        }
        let constants: Rc<[Value]> = code.constants.iter().map(Value::from_constant).collect();
        self.constants.insert(key, (code.clone(), constants.clone()));
        constants
    }
}

impl CallContext for Vm {
    fn types(&self) -> Rc<Types> {
        self.types.clone()
    }

    fn call(&mut self, callee: &Value, args: Args) -> RtResult<Value> {
        self.call_value(callee, args)
    }

    fn resume(&mut self, generator: &ObjectRef, action: ResumeAction) -> RtResult<GeneratorStep> {
        self.resume_generator(generator, action)
    }

    fn materialize(&mut self, error: RuntimeError) -> Value {
        match error {
            RuntimeError::Builtin { kind, message } => exception::from_builtin(&self.types, kind, message),
            RuntimeError::Object(value) => value,
        }
    }

    fn write_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
    }

    fn run_class_body(&mut self, body: &Value, namespace: Namespace) -> RtResult<Value> {
        match body.as_object() {
            Some(object) if is_a::<FunctionObject>(object) => {
                self.call_function(object, Args::default(), Some(namespace))
            }
            _ => Err(RuntimeError::type_error("__build_class__: func must be a function")),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::compile_source;

    fn run(source: &str) -> (Vm, Result<(), UncaughtException>) {
        let code = compile_source(source, Default::default()).expect("compiles");
        let mut vm = Vm::new(VmConfig::default());
        let result = vm.run_module(code);
        (vm, result)
    }

    fn output(source: &str) -> String {
        let (vm, result) = run(source);
        if let Err(error) = result {
            panic!("uncaught: {}", error.report);
        }
        vm.stdout().to_string()
    }

    fn failure(source: &str) -> ExceptionReport {
        let (_, result) = run(source);
        result.expect_err("program raises").report
    }

    #[test]
    fn arithmetic_and_printing() {
        assert_eq!(output("print(1 + 2 * 3, 7 // 2, 7 / 2)"), "7 3 3.5\n");
    }

    #[test]
    fn closures_share_cells() {
        let source = indoc! {"
            def counter():
                count = 0
                def bump():
                    nonlocal count
                    count += 1
                    return count
                return bump
            c = counter()
            c()
            print(c(), c())
        "};
        assert_eq!(output(source), "2 3\n");
    }

    #[test]
    fn handled_exception_becomes_context_of_the_next() {
        let source = indoc! {"
            try:
                1 / 0
            except ZeroDivisionError:
                raise ValueError('bad')
        "};
        let report = failure(source);
        assert_eq!(report.summary(), "ValueError: bad");
        let (reason, earlier) = *report.chained.expect("chained");
        assert_eq!(reason, ChainReason::Context);
        assert_eq!(earlier.summary(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn trace_has_one_entry_per_unwound_frame() {
        let source = indoc! {"
            def inner():
                raise KeyError('k')

            def outer():
                inner()

            outer()
        "};
        let report = failure(source);
        let frames: Vec<(&str, u32)> = report
            .trace
            .iter()
            .map(|entry| (entry.name.as_str(), entry.line))
            .collect();
        assert_eq!(frames, [("<module>", 7), ("outer", 5), ("inner", 2)]);
        assert_eq!(report.summary(), "KeyError: 'k'");
    }

    fn frames(report: &ExceptionReport) -> Vec<(&str, u32)> {
        report
            .trace
            .iter()
            .map(|entry| (entry.name.as_str(), entry.line))
            .collect()
    }

    #[test]
    fn exceptions_caught_where_raised_keep_their_frame() {
        let source = indoc! {"
            def ratio(a, b):
                try:
                    return a / b
                except ZeroDivisionError as error:
                    raise ValueError('bad ratio') from error

            ratio(1, 0)
        "};
        let report = failure(source);
        assert_eq!(frames(&report), [("<module>", 7), ("ratio", 5)]);
        let (reason, cause) = report.chained.as_deref().expect("chained");
        assert_eq!(*reason, ChainReason::Cause);
        assert_eq!(frames(cause), [("ratio", 3)]);
        assert!(report.to_string().contains("  line 3, in ratio\nZeroDivisionError"));
    }

    #[test]
    fn bare_raise_does_not_repeat_the_frame() {
        let source = indoc! {"
            def f():
                try:
                    raise KeyError('k')
                except KeyError:
                    raise
            f()
        "};
        assert_eq!(frames(&failure(source)), [("<module>", 6), ("f", 3)]);
    }

    #[test]
    fn recursion_limit_raises_recursion_error() {
        let code = compile_source("def f(n):\n    return f(n + 1)\nf(0)\n", Default::default())
            .expect("compiles");
        let mut vm = Vm::new(VmConfig {
            max_call_depth: 50,
            ..VmConfig::default()
        });
        let report = vm.run_module(code).expect_err("overflows").report;
        assert_eq!(report.type_name, "RecursionError");
    }

    #[test]
    fn step_limit_stops_infinite_loops() {
        let code = compile_source("while True:\n    pass\n", Default::default()).expect("compiles");
        let mut vm = Vm::new(VmConfig {
            max_steps: Some(1_000),
            ..VmConfig::default()
        });
        let report = vm.run_module(code).expect_err("aborted").report;
        assert!(report.message.contains("step limit"));
    }

    #[test]
    fn generators_resume_where_they_yielded() {
        let source = indoc! {"
            def gen():
                received = yield 1
                yield received * 10

            g = gen()
            print(next(g), g.send(4))
        "};
        assert_eq!(output(source), "1 40\n");
    }
}
