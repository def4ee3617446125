//! A compiler core and frame VM for a Python-syntax language.
//!
//! Source text goes through the lexer and parser into an AST, the resolver
//! classifies every name, the compiler lowers each scope to block IR and the
//! emitter turns that into code objects that the VM executes.

pub mod ast;
mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod symtable;
pub mod token;
pub mod vm;

use std::sync::Arc;
use std::thread;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tracing::debug;

use bytecode::CodeObject;
use compiler::{CompileError, CompileOptions};
use lexer::LexError;
use parser::ParseError;
use vm::{ExceptionReport, Vm, VmConfig};

/// Stack of the interpreter thread. Python calls recurse on the Rust stack.
const INTERPRETER_STACK: usize = 256 * 1024 * 1024;

/// Anything that stops source text from becoming a code object.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Tokenizes, parses, resolves and compiles a module.
pub fn compile_source(source: &str, options: CompileOptions) -> Result<Arc<CodeObject>, SourceError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::parse_tokens(tokens)?;
    Ok(compiler::compile(&program, options)?)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub compile: CompileOptions,
    pub vm: VmConfig,
}

/// Outcome of running a module: what it printed, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub stdout: String,
    pub result: Result<(), ExceptionReport>,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs a compiled module in a fresh VM on the calling thread.
pub fn run_code(code: Arc<CodeObject>, config: VmConfig) -> Execution {
    let mut vm = Vm::new(config);
    let result = vm.run_module(code).map_err(|uncaught| uncaught.report);
    Execution {
        stdout: vm.take_stdout(),
        result,
    }
}

/// Compiles and runs `source` on a dedicated thread with a large stack.
///
/// Compile errors are returned as errors; a Python exception escaping the
/// module is part of the `Execution`.
pub fn run_source(source: &str, options: RunOptions) -> anyhow::Result<Execution> {
    let source = source.to_string();
    let worker = thread::Builder::new()
        .name("pyrun-interpreter".to_string())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || -> Result<Execution, SourceError> {
            let code = compile_source(&source, options.compile)?;
            debug!(module = %code.qualname, "compiled");
            Ok(run_code(code, options.vm))
        })
        .context("Spawning the interpreter thread")?;
    let execution = worker
        .join()
        .map_err(|_| anyhow!("The interpreter thread panicked"))??;
    Ok(execution)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn run_source_captures_output_and_failures() {
        let source = indoc! {"
            print('before')
            raise ValueError('boom')
        "};
        let execution = run_source(source, RunOptions::default()).expect("runs");
        assert_eq!(execution.stdout, "before\n");
        let report = execution.result.expect_err("raises");
        assert_eq!(report.summary(), "ValueError: boom");
    }

    #[test]
    fn syntax_errors_are_source_errors() {
        let error = compile_source("x = = 1\n", CompileOptions::default()).expect_err("rejected");
        assert!(matches!(error, SourceError::Parse(_)));
        let error = compile_source("def f(:\n    pass\n", CompileOptions::default()).expect_err("rejected");
        assert!(matches!(error, SourceError::Lex(_)));
    }

    #[test]
    fn resolution_errors_are_compile_errors() {
        let error = compile_source("nonlocal x\n", CompileOptions::default()).expect_err("rejected");
        assert!(matches!(error, SourceError::Compile(_)));
    }

    #[test]
    fn deep_recursion_fits_the_interpreter_stack() {
        let source = indoc! {"
            def depth(n):
                return 0 if n == 0 else 1 + depth(n - 1)
            print(depth(900))
        "};
        let execution = run_source(source, RunOptions::default()).expect("runs");
        assert_eq!(execution.stdout, "900\n");
    }

    #[test]
    fn optimized_asserts_are_skipped() {
        let options = RunOptions {
            compile: CompileOptions {
                optimize_asserts: true,
            },
            ..RunOptions::default()
        };
        let execution = run_source("assert False\nprint('ok')\n", options).expect("runs");
        assert!(execution.succeeded());
        assert_eq!(execution.stdout, "ok\n");
    }
}
