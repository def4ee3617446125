//! Block-structured intermediate form produced by lowering.
//!
//! A [`CodeUnit`] owns its blocks in an arena and refers to them by
//! [`BlockId`], so jumps may point forwards or backwards without any shared
//! ownership. `layout` is the order the emitter lays blocks out in; a block
//! whose last instruction is not a terminator falls through to the next block
//! in that order.

use crate::bytecode::{CodeFlags, Constant, Instruction, ParamSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandlerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JumpKind {
    Always,
    IfFalse,
    IfTrue,
    IfNone,
    IfNotNone,
    IfFalseOrPop,
    IfTrueOrPop,
    ForIter,
    Send,
}

impl JumpKind {
    pub(crate) fn instruction(self, target: u32) -> Instruction {
        match self {
            JumpKind::Always => Instruction::Jump(target),
            JumpKind::IfFalse => Instruction::PopJumpIfFalse(target),
            JumpKind::IfTrue => Instruction::PopJumpIfTrue(target),
            JumpKind::IfNone => Instruction::PopJumpIfNone(target),
            JumpKind::IfNotNone => Instruction::PopJumpIfNotNone(target),
            JumpKind::IfFalseOrPop => Instruction::JumpIfFalseOrPop(target),
            JumpKind::IfTrueOrPop => Instruction::JumpIfTrueOrPop(target),
            JumpKind::ForIter => Instruction::ForIter(target),
            JumpKind::Send => Instruction::Send(target),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameOp {
    Load,
    Store,
    Delete,
    /// Push the current binding (or an unbound marker) without raising.
    Save,
    /// Pop a saved binding and reinstate it.
    Restore,
}

/// How a name reference is addressed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarKind {
    Fast,
    Deref,
    /// Captured name read from a class body.
    ClassDeref,
    Global,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttrOp {
    Load,
    Store,
    Delete,
}

#[derive(Debug, Clone)]
pub(crate) enum IrOp {
    /// Instruction whose operand is already final.
    Op(Instruction),
    LoadConst(Constant),
    Name(NameOp, VarKind, String),
    Attr(AttrOp, String),
    LoadClosure(String),
    Jump(JumpKind, BlockId),
    /// Marks the point where a handler becomes active; records its stack depth.
    SetupHandler(HandlerId),
}

impl IrOp {
    pub(crate) fn is_terminator(&self) -> bool {
        match self {
            IrOp::Op(instruction) => instruction.is_terminator(),
            IrOp::Jump(kind, _) => *kind == JumpKind::Always,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct IrInstr {
    pub op: IrOp,
    pub line: u32,
    /// Innermost handler protecting this instruction.
    pub handler: Option<HandlerId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Block {
    pub instrs: Vec<IrInstr>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandlerInfo {
    pub target: BlockId,
    /// Items above the handler's base depth at the `SetupHandler` point.
    pub pop: u32,
}

/// Lowered form of one scope, ready for the emitter.
#[derive(Debug, Clone)]
pub(crate) struct CodeUnit {
    pub name: String,
    pub qualname: String,
    pub flags: CodeFlags,
    pub params: ParamSpec,
    pub first_line: u32,
    pub blocks: Vec<Block>,
    pub layout: Vec<BlockId>,
    pub current: BlockId,
    pub handlers: Vec<HandlerInfo>,
    /// Parameter names first, in slot order.
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
}

impl CodeUnit {
    pub(crate) fn new(name: &str, qualname: &str, first_line: u32) -> Self {
        Self {
            name: name.to_string(),
            qualname: qualname.to_string(),
            flags: CodeFlags::default(),
            params: ParamSpec::default(),
            first_line,
            blocks: vec![Block::default()],
            layout: vec![BlockId(0)],
            current: BlockId(0),
            handlers: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
        }
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Appends `block` to the layout and makes it current.
    pub(crate) fn switch_to(&mut self, block: BlockId) {
        self.layout.push(block);
        self.current = block;
    }

    pub(crate) fn push(&mut self, instr: IrInstr) {
        self.blocks[self.current.0 as usize].instrs.push(instr);
    }

    pub(crate) fn new_handler(&mut self, target: BlockId, pop: u32) -> HandlerId {
        let id = HandlerId(self.handlers.len() as u32);
        self.handlers.push(HandlerInfo { target, pop });
        id
    }

    pub(crate) fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }
}
