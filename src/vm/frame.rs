use std::rc::Rc;
use std::sync::Arc;

use crate::bytecode::CodeObject;
use crate::runtime::function::Namespace;
use crate::runtime::value::{CellRef, Value};

/// Activation record of one code object.
#[derive(Debug)]
pub(crate) struct Frame {
    pub code: Arc<CodeObject>,
    pub constants: Rc<[Value]>,
    /// Index of the next instruction.
    pub pc: usize,
    pub stack: Vec<Value>,
    /// Local slots in `varnames` order; `None` is unbound.
    pub fast: Vec<Option<Value>>,
    /// Cellvars followed by freevars.
    pub cells: Vec<CellRef>,
    pub globals: Namespace,
    /// Class-body namespace; module code uses `globals` instead.
    pub locals: Option<Namespace>,
    /// Sub-iterator of a suspended `yield from` / `await`.
    pub yield_from: Option<Value>,
    /// The pending error is a re-raise and must not gain a new context.
    pub reraising: bool,
}

impl Frame {
    pub fn new(
        code: Arc<CodeObject>,
        constants: Rc<[Value]>,
        globals: Namespace,
        fast: Vec<Option<Value>>,
        cells: Vec<CellRef>,
    ) -> Self {
        let stack = Vec::with_capacity(code.max_stack as usize);
        Self {
            code,
            constants,
            pc: 0,
            stack,
            fast,
            cells,
            globals,
            locals: None,
            yield_from: None,
            reraising: false,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    /// Pops `count` items, bottom first.
    pub fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let start = self.stack.len() - count;
        self.stack.split_off(start)
    }

    pub fn top(&self) -> &Value {
        self.stack.last().expect("operand stack underflow")
    }

    /// The `depth`-th item from the top, 1 being the top.
    pub fn peek(&self, depth: usize) -> &Value {
        &self.stack[self.stack.len() - depth]
    }

    pub fn name(&self, index: u32) -> &str {
        &self.code.names[index as usize]
    }

    pub fn line(&self) -> u32 {
        self.code.line_for(self.pc.saturating_sub(1))
    }
}

/// How `run_frame` left a frame.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    /// Suspended at a `yield`; the frame can be resumed.
    Yield(Value),
}

/// How a frame is (re)entered.
#[derive(Debug)]
pub(crate) enum Resume {
    /// Run from the current `pc` without pushing anything.
    Enter,
    /// Continue after a `yield` with the value sent in.
    Send(Value),
    /// Raise at the suspension point.
    Throw(crate::runtime::error::RuntimeError),
}
