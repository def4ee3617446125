#![allow(dead_code)]
use std::fs;
use std::sync::Arc;

use pyrun::ast::Program;
use pyrun::bytecode::CodeObject;
use pyrun::{compile_source, lexer, parser};

pub const WORKLOADS: [(&str, &str); 2] = [
    ("fib", "tests/programs/bench_fib/program.py"),
    ("objects", "tests/programs/bench_objects/program.py"),
];

pub fn load_source(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

pub fn load_program(path: &str) -> Program {
    let source = load_source(path);
    let tokens = lexer::tokenize(&source).unwrap_or_else(|err| panic!("tokenize {path}: {err}"));
    parser::parse_tokens(tokens).unwrap_or_else(|err| panic!("parse {path}: {err}"))
}

pub fn load_code(path: &str) -> Arc<CodeObject> {
    let source = load_source(path);
    compile_source(&source, Default::default()).unwrap_or_else(|err| panic!("compile {path}: {err}"))
}
