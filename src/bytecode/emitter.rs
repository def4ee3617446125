//! Serialises a lowered [`CodeUnit`] into a [`CodeObject`].
//!
//! Three passes: a worklist stack-depth analysis over the block graph (which
//! also discovers reachable blocks and the depth each handler restores),
//! linear emission with a deferred patch table for jump targets, and table
//! construction (exception ranges, line numbers, cell-to-argument map).

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{CodeObject, ConstKey, Constant, ExceptionTableEntry, Instruction, Slot};
use crate::compiler::ir::{AttrOp, BlockId, CodeUnit, HandlerId, IrInstr, IrOp, NameOp, VarKind};
use crate::compiler::{CompileError, CompileResult};

pub(crate) fn emit(unit: CodeUnit) -> CompileResult<CodeObject> {
    let depths = analyze_depths(&unit)?;
    let mut emitter = Emitter::new(&unit);
    emitter.emit_blocks(&unit, &depths)?;
    let code = emitter.finish(unit, &depths);
    debug!(
        code = %code.qualname,
        instructions = code.instructions.len(),
        constants = code.constants.len(),
        handlers = code.exception_table.len(),
        max_stack = code.max_stack,
        "emitted code object"
    );
    Ok(code)
}

struct Depths {
    /// Entry depth per block; `None` for unreachable blocks.
    blocks: Vec<Option<u32>>,
    handlers: Vec<Option<u32>>,
    max: u32,
}

fn analyze_depths(unit: &CodeUnit) -> CompileResult<Depths> {
    let mut depths = Depths {
        blocks: vec![None; unit.blocks.len()],
        handlers: vec![None; unit.handlers.len()],
        max: 0,
    };
    let next_in_layout: FxHashMap<BlockId, BlockId> = unit
        .layout
        .windows(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();

    let mut worklist = vec![unit.layout[0]];
    depths.blocks[unit.layout[0].0 as usize] = Some(0);

    while let Some(block) = worklist.pop() {
        let mut depth = depths.blocks[block.0 as usize]
            .ok_or_else(|| CompileError::internal("block queued without a depth"))?
            as i64;
        let mut falls_through = true;

        for instr in &unit.block(block).instrs {
            if let Some(handler) = instr.handler
                && !matches!(instr.op, IrOp::SetupHandler(_))
            {
                let base = depths.handlers[handler.0 as usize].ok_or_else(|| {
                    CompileError::internal(format!(
                        "handler {} used before its setup in {}",
                        handler.0, unit.qualname
                    ))
                })?;
                let target = unit.handlers[handler.0 as usize].target;
                merge(&mut depths, &mut worklist, target, base as i64 + 1, unit)?;
            }

            match &instr.op {
                IrOp::SetupHandler(handler) => {
                    let base = depth - unit.handlers[handler.0 as usize].pop as i64;
                    if base < 0 {
                        return Err(CompileError::internal("handler depth below zero"));
                    }
                    depths.handlers[handler.0 as usize] = Some(base as u32);
                }
                IrOp::Jump(kind, target) => {
                    let effect = kind.instruction(0);
                    merge(
                        &mut depths,
                        &mut worklist,
                        *target,
                        depth + effect.stack_effect(true) as i64,
                        unit,
                    )?;
                    depth += effect.stack_effect(false) as i64;
                }
                op => depth += stack_effect(op) as i64,
            }

            if depth < 0 {
                return Err(CompileError::internal(format!(
                    "stack underflow in {} at line {}",
                    unit.qualname, instr.line
                )));
            }
            depths.max = depths.max.max(depth as u32);

            if instr.op.is_terminator() {
                falls_through = false;
                break;
            }
        }

        if falls_through {
            let next = next_in_layout.get(&block).copied().ok_or_else(|| {
                CompileError::internal(format!("{} falls off its last block", unit.qualname))
            })?;
            merge(&mut depths, &mut worklist, next, depth, unit)?;
        }
    }
    Ok(depths)
}

fn merge(
    depths: &mut Depths,
    worklist: &mut Vec<BlockId>,
    target: BlockId,
    depth: i64,
    unit: &CodeUnit,
) -> CompileResult<()> {
    if depth < 0 {
        return Err(CompileError::internal("negative stack depth at jump"));
    }
    let slot = &mut depths.blocks[target.0 as usize];
    match *slot {
        None => {
            *slot = Some(depth as u32);
            worklist.push(target);
            Ok(())
        }
        Some(existing) if existing as i64 == depth => Ok(()),
        Some(existing) => Err(CompileError::internal(format!(
            "inconsistent stack depth in {}: {} vs {}",
            unit.qualname, existing, depth
        ))),
    }
}

fn stack_effect(op: &IrOp) -> i32 {
    match op {
        IrOp::Op(instruction) => instruction.stack_effect(false),
        IrOp::LoadConst(_) | IrOp::LoadClosure(_) => 1,
        IrOp::Name(op, _, _) => match op {
            NameOp::Load | NameOp::Save => 1,
            NameOp::Store | NameOp::Restore => -1,
            NameOp::Delete => 0,
        },
        IrOp::Attr(op, _) => match op {
            AttrOp::Load => 0,
            AttrOp::Store => -2,
            AttrOp::Delete => -1,
        },
        IrOp::Jump(..) | IrOp::SetupHandler(_) => 0,
    }
}

struct Emitter {
    instructions: Vec<Instruction>,
    /// Handler and line of each emitted instruction.
    handlers: Vec<Option<HandlerId>>,
    lines: Vec<u32>,
    /// Jump instructions whose target block offset is not known yet.
    patches: Vec<(usize, BlockId)>,
    block_offsets: FxHashMap<BlockId, u32>,
    constants: Vec<Constant>,
    constant_index: FxHashMap<ConstKey, u32>,
    names: IndexSet<String>,
    varnames: IndexSet<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
}

impl Emitter {
    fn new(unit: &CodeUnit) -> Self {
        Self {
            instructions: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            patches: Vec::new(),
            block_offsets: FxHashMap::default(),
            constants: Vec::new(),
            constant_index: FxHashMap::default(),
            names: IndexSet::new(),
            varnames: unit.varnames.iter().cloned().collect(),
            cellvars: unit.cellvars.clone(),
            freevars: unit.freevars.clone(),
        }
    }

    fn emit_blocks(&mut self, unit: &CodeUnit, depths: &Depths) -> CompileResult<()> {
        for &block in &unit.layout {
            if depths.blocks[block.0 as usize].is_none() {
                continue;
            }
            self.block_offsets
                .insert(block, self.instructions.len() as u32);
            for instr in &unit.block(block).instrs {
                self.emit_instr(instr)?;
                if instr.op.is_terminator() {
                    break;
                }
            }
        }

        for (index, block) in std::mem::take(&mut self.patches) {
            let target = *self.block_offsets.get(&block).ok_or_else(|| {
                CompileError::internal(format!("jump to unplaced block {}", block.0))
            })?;
            self.instructions[index] = retarget(self.instructions[index], target);
        }
        Ok(())
    }

    fn emit_instr(&mut self, instr: &IrInstr) -> CompileResult<()> {
        let instruction = match &instr.op {
            IrOp::SetupHandler(_) => return Ok(()),
            IrOp::Op(instruction) => *instruction,
            IrOp::LoadConst(constant) => Instruction::LoadConst(self.constant(constant.clone())),
            IrOp::Name(op, kind, name) => self.name_instruction(*op, *kind, name)?,
            IrOp::Attr(op, name) => {
                let index = self.name(name);
                match op {
                    AttrOp::Load => Instruction::LoadAttr(index),
                    AttrOp::Store => Instruction::StoreAttr(index),
                    AttrOp::Delete => Instruction::DeleteAttr(index),
                }
            }
            IrOp::LoadClosure(name) => Instruction::LoadClosure(self.cell(name)?),
            IrOp::Jump(kind, target) => {
                self.patches.push((self.instructions.len(), *target));
                kind.instruction(0)
            }
        };
        self.instructions.push(instruction);
        self.handlers.push(instr.handler);
        self.lines.push(instr.line);
        Ok(())
    }

    fn name_instruction(&mut self, op: NameOp, kind: VarKind, name: &str) -> CompileResult<Instruction> {
        let slot = match kind {
            VarKind::Fast => Slot::Fast(self.varname(name)),
            VarKind::Deref | VarKind::ClassDeref => Slot::Deref(self.cell(name)?),
            VarKind::Global => Slot::Global(self.name(name)),
            VarKind::Name => Slot::Name(self.name(name)),
        };
        Ok(match (op, slot) {
            (NameOp::Save, slot) => Instruction::SaveBinding(slot),
            (NameOp::Restore, slot) => Instruction::RestoreBinding(slot),
            (NameOp::Load, Slot::Fast(i)) => Instruction::LoadFast(i),
            (NameOp::Store, Slot::Fast(i)) => Instruction::StoreFast(i),
            (NameOp::Delete, Slot::Fast(i)) => Instruction::DeleteFast(i),
            (NameOp::Load, Slot::Deref(i)) if kind == VarKind::ClassDeref => {
                Instruction::LoadClassDeref(i)
            }
            (NameOp::Load, Slot::Deref(i)) => Instruction::LoadDeref(i),
            (NameOp::Store, Slot::Deref(i)) => Instruction::StoreDeref(i),
            (NameOp::Delete, Slot::Deref(i)) => Instruction::DeleteDeref(i),
            (NameOp::Load, Slot::Global(i)) => Instruction::LoadGlobal(i),
            (NameOp::Store, Slot::Global(i)) => Instruction::StoreGlobal(i),
            (NameOp::Delete, Slot::Global(i)) => Instruction::DeleteGlobal(i),
            (NameOp::Load, Slot::Name(i)) => Instruction::LoadName(i),
            (NameOp::Store, Slot::Name(i)) => Instruction::StoreName(i),
            (NameOp::Delete, Slot::Name(i)) => Instruction::DeleteName(i),
        })
    }

    fn constant(&mut self, constant: Constant) -> u32 {
        let key = constant.key();
        if let Some(index) = self.constant_index.get(&key) {
            return *index;
        }
        let index = self.constants.len() as u32;
        self.constants.push(constant);
        self.constant_index.insert(key, index);
        index
    }

    fn name(&mut self, name: &str) -> u32 {
        self.names.insert_full(name.to_string()).0 as u32
    }

    fn varname(&mut self, name: &str) -> u32 {
        self.varnames.insert_full(name.to_string()).0 as u32
    }

    fn cell(&self, name: &str) -> CompileResult<u32> {
        if let Some(index) = self.cellvars.iter().position(|cell| cell == name) {
            return Ok(index as u32);
        }
        self.freevars
            .iter()
            .position(|free| free == name)
            .map(|index| (self.cellvars.len() + index) as u32)
            .ok_or_else(|| CompileError::internal(format!("'{name}' is not a cell or free variable")))
    }

    fn finish(self, unit: CodeUnit, depths: &Depths) -> CodeObject {
        let mut exception_table: Vec<ExceptionTableEntry> = Vec::new();
        let mut previous: Option<HandlerId> = None;
        for (offset, handler) in self.handlers.iter().enumerate() {
            let offset = offset as u32;
            match handler {
                Some(handler) if previous == Some(*handler) => {
                    if let Some(entry) = exception_table.last_mut() {
                        entry.end = offset + 1;
                    }
                }
                Some(handler) => {
                    let info = unit.handlers[handler.0 as usize];
                    exception_table.push(ExceptionTableEntry {
                        start: offset,
                        end: offset + 1,
                        target: self.block_offsets.get(&info.target).copied().unwrap_or(0),
                        depth: depths.handlers[handler.0 as usize].unwrap_or(0),
                    });
                }
                None => {}
            }
            previous = *handler;
        }

        let mut line_table: Vec<(u32, u32)> = Vec::new();
        for (offset, line) in self.lines.iter().enumerate() {
            if line_table.last().is_none_or(|(_, last)| last != line) {
                line_table.push((offset as u32, *line));
            }
        }

        let varnames: Vec<String> = self.varnames.into_iter().collect();
        let params = &varnames[..unit.params.slot_count().min(varnames.len())];
        let cell2arg = self
            .cellvars
            .iter()
            .map(|cell| {
                params
                    .iter()
                    .position(|param| param == cell)
                    .map(|index| index as u32)
            })
            .collect();

        CodeObject {
            name: unit.name,
            qualname: unit.qualname,
            flags: unit.flags,
            params: unit.params,
            instructions: self.instructions,
            constants: self.constants,
            names: self.names.into_iter().collect(),
            varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            cell2arg,
            exception_table,
            line_table,
            first_line: unit.first_line,
            max_stack: depths.max,
        }
    }
}

fn retarget(instruction: Instruction, target: u32) -> Instruction {
    match instruction {
        Instruction::Jump(_) => Instruction::Jump(target),
        Instruction::PopJumpIfFalse(_) => Instruction::PopJumpIfFalse(target),
        Instruction::PopJumpIfTrue(_) => Instruction::PopJumpIfTrue(target),
        Instruction::PopJumpIfNone(_) => Instruction::PopJumpIfNone(target),
        Instruction::PopJumpIfNotNone(_) => Instruction::PopJumpIfNotNone(target),
        Instruction::JumpIfFalseOrPop(_) => Instruction::JumpIfFalseOrPop(target),
        Instruction::JumpIfTrueOrPop(_) => Instruction::JumpIfTrueOrPop(target),
        Instruction::ForIter(_) => Instruction::ForIter(target),
        Instruction::Send(_) => Instruction::Send(target),
        other => other,
    }
}
