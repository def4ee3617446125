//! Lowering from the resolved syntax tree to block-structured IR.
//!
//! One [`CodeUnit`](ir::CodeUnit) is built per scope. Structured control flow
//! becomes explicit jumps between blocks; every construct that needs cleanup on
//! exit (loops holding an iterator, `try`, `with`, exception handlers) pushes a
//! frame block so that `return`, `break` and `continue` can replay the cleanup
//! of everything they leave before jumping. Exception handlers are recorded per
//! instruction and turned into range tables by the emitter.

use std::sync::Arc;

use tracing::debug;

use crate::ast::{Program, Statement};
use crate::bytecode::{self, CodeFlags, CodeObject, Constant, Instruction, ParamSpec};
use crate::symtable::{self, ScopeId, ScopeKind, Storage, SymbolTable};
use crate::token::Span;

use ir::{BlockId, CodeUnit, HandlerId, IrInstr, IrOp, JumpKind, NameOp, VarKind};

mod error;
mod expr;
pub(crate) mod ir;
mod pattern;
mod stmt;

pub use error::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Drop `assert` statements.
    pub optimize_asserts: bool,
}

/// Resolves and lowers `program`, returning the module code object.
pub fn compile(program: &Program, options: CompileOptions) -> CompileResult<Arc<CodeObject>> {
    let table = symtable::resolve(program)?;
    let mut compiler = Compiler::new(&table, options);
    compiler.compile_module(program)
}

/// Cleanup context active while lowering a statement body.
#[derive(Debug, Clone)]
enum FBlock<'a> {
    WhileLoop {
        start: BlockId,
        exit: BlockId,
    },
    /// The loop iterator sits on the stack for the duration of the body.
    ForLoop {
        start: BlockId,
        exit: BlockId,
    },
    TryExcept {
        handler: HandlerId,
    },
    FinallyTry {
        handler: HandlerId,
        body: &'a [Statement],
    },
    /// Running the `finally` body on the exceptional path.
    FinallyEnd {
        handler: HandlerId,
    },
    With {
        handler: HandlerId,
    },
    /// Inside an `except` body; `name` is unbound when leaving.
    HandlerCleanup {
        handler: Option<HandlerId>,
        name: Option<&'a str>,
    },
    ExceptionHandler {
        handler: HandlerId,
    },
    ExceptionGroupHandler {
        handler: HandlerId,
    },
    /// A value (a return value in flight) sits on the stack.
    PopValue,
}

impl FBlock<'_> {
    fn handler(&self) -> Option<HandlerId> {
        match self {
            FBlock::TryExcept { handler }
            | FBlock::FinallyTry { handler, .. }
            | FBlock::FinallyEnd { handler }
            | FBlock::With { handler }
            | FBlock::ExceptionHandler { handler }
            | FBlock::ExceptionGroupHandler { handler } => Some(*handler),
            FBlock::HandlerCleanup { handler, .. } => *handler,
            FBlock::WhileLoop { .. } | FBlock::ForLoop { .. } | FBlock::PopValue => None,
        }
    }

    fn is_loop(&self) -> bool {
        matches!(self, FBlock::WhileLoop { .. } | FBlock::ForLoop { .. })
    }
}

struct UnitState<'a> {
    ir: CodeUnit,
    scope: ScopeId,
    fblocks: Vec<FBlock<'a>>,
    line: u32,
}

pub(crate) struct Compiler<'a> {
    table: &'a SymbolTable,
    options: CompileOptions,
    units: Vec<UnitState<'a>>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(table: &'a SymbolTable, options: CompileOptions) -> Self {
        Self {
            table,
            options,
            units: Vec::new(),
        }
    }

    fn compile_module(&mut self, program: &'a Program) -> CompileResult<Arc<CodeObject>> {
        let root = self.table.root();
        let first_line = program.body.first().map_or(1, |statement| statement.span.line);
        self.units.push(UnitState {
            ir: CodeUnit::new("<module>", "<module>", first_line as u32),
            scope: root,
            fblocks: Vec::new(),
            line: first_line as u32,
        });
        self.compile_body(&program.body)?;
        self.load_const(Constant::None);
        self.op(Instruction::ReturnValue);
        self.exit_scope()
    }

    // ---- unit management -------------------------------------------------

    fn unit(&self) -> &UnitState<'a> {
        self.units.last().expect("a code unit is always open")
    }

    fn unit_mut(&mut self) -> &mut UnitState<'a> {
        self.units.last_mut().expect("a code unit is always open")
    }

    fn scope_kind(&self) -> ScopeKind {
        self.table.scope(self.unit().scope).kind
    }

    /// Opens a code unit for the scope introduced by the node at `span`.
    fn enter_scope(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let scope_id = self.table.scope_for(span).ok_or_else(|| {
            CompileError::internal(format!("no scope recorded for '{name}' at line {}", span.line))
        })?;
        let scope = self.table.scope(scope_id);
        if scope.is_generator && scope.is_coroutine {
            return Err(CompileError::lowering(
                "asynchronous generators are not supported",
                span,
            ));
        }
        let qualname = self.qualname(name, scope.kind);
        let mut ir = CodeUnit::new(name, &qualname, span.line as u32);
        ir.flags = CodeFlags {
            is_generator: scope.is_generator,
            is_coroutine: scope.is_coroutine,
            is_class_body: scope.kind == ScopeKind::Class,
        };
        ir.varnames = scope.params.clone();
        ir.cellvars = scope.cellvars();
        ir.freevars = scope.freevars();
        debug!(scope = %qualname, kind = ?scope.kind, "lowering scope");
        self.units.push(UnitState {
            ir,
            scope: scope_id,
            fblocks: Vec::new(),
            line: span.line as u32,
        });
        Ok(())
    }

    fn exit_scope(&mut self) -> CompileResult<Arc<CodeObject>> {
        let unit = self
            .units
            .pop()
            .ok_or_else(|| CompileError::internal("no code unit to close"))?;
        Ok(Arc::new(bytecode::emit(unit.ir)?))
    }

    fn set_params(&mut self, params: ParamSpec) {
        self.unit_mut().ir.params = params;
    }

    /// Dotted path used in reprs: `outer.<locals>.inner`, `Class.method`.
    fn qualname(&self, name: &str, kind: ScopeKind) -> String {
        let Some(parent) = self.units.last() else {
            return name.to_string();
        };
        let parent_scope = self.table.scope(parent.scope);
        let declared_global = parent_scope
            .symbol(name)
            .is_some_and(|symbol| symbol.explicit_global);
        match parent_scope.kind {
            ScopeKind::Module => name.to_string(),
            _ if declared_global && kind != ScopeKind::Comprehension => name.to_string(),
            ScopeKind::Class => format!("{}.{name}", parent.ir.qualname),
            _ => format!("{}.<locals>.{name}", parent.ir.qualname),
        }
    }

    // ---- emission helpers ------------------------------------------------

    fn emit(&mut self, op: IrOp) {
        let unit = self.unit_mut();
        let handler = unit.fblocks.iter().rev().find_map(FBlock::handler);
        let line = unit.line;
        unit.ir.push(IrInstr { op, line, handler });
    }

    fn op(&mut self, instruction: Instruction) {
        self.emit(IrOp::Op(instruction));
    }

    fn load_const(&mut self, constant: Constant) {
        self.emit(IrOp::LoadConst(constant));
    }

    fn jump(&mut self, kind: JumpKind, target: BlockId) {
        self.emit(IrOp::Jump(kind, target));
    }

    fn new_block(&mut self) -> BlockId {
        self.unit_mut().ir.new_block()
    }

    fn switch_to(&mut self, block: BlockId) {
        self.unit_mut().ir.switch_to(block);
    }

    fn set_line(&mut self, line: usize) -> u32 {
        std::mem::replace(&mut self.unit_mut().line, line as u32)
    }

    fn restore_line(&mut self, line: u32) {
        self.unit_mut().line = line;
    }

    /// Creates a handler whose stack base is `pop` items below the current depth.
    fn new_handler(&mut self, target: BlockId, pop: u32) -> HandlerId {
        self.unit_mut().ir.new_handler(target, pop)
    }

    fn push_fblock(&mut self, fblock: FBlock<'a>) {
        if let Some(handler) = fblock.handler() {
            self.emit(IrOp::SetupHandler(handler));
        }
        self.unit_mut().fblocks.push(fblock);
    }

    fn pop_fblock(&mut self) -> CompileResult<FBlock<'a>> {
        self.unit_mut()
            .fblocks
            .pop()
            .ok_or_else(|| CompileError::internal("frame block stack underflow"))
    }

    // ---- names -----------------------------------------------------------

    fn var_kind(&self, name: &str, op: NameOp) -> VarKind {
        let scope_id = self.unit().scope;
        let scope = self.table.scope(scope_id);
        let storage = self.table.storage(scope_id, name);
        match scope.kind {
            ScopeKind::Module => VarKind::Name,
            ScopeKind::Class => match storage {
                Storage::Local => VarKind::Name,
                Storage::Cell => VarKind::Deref,
                Storage::Free if op == NameOp::Load => VarKind::ClassDeref,
                Storage::Free => VarKind::Deref,
                Storage::Global
                    if scope
                        .symbol(name)
                        .is_some_and(|symbol| symbol.explicit_global) =>
                {
                    VarKind::Global
                }
                Storage::Global | Storage::Builtin => VarKind::Name,
            },
            _ => match storage {
                Storage::Local => VarKind::Fast,
                Storage::Cell | Storage::Free => VarKind::Deref,
                Storage::Global | Storage::Builtin => VarKind::Global,
            },
        }
    }

    fn name_op(&mut self, name: &str, op: NameOp) {
        let kind = self.var_kind(name, op);
        self.emit(IrOp::Name(op, kind, name.to_string()));
    }

    fn load_name(&mut self, name: &str) {
        self.name_op(name, NameOp::Load);
    }

    fn store_name(&mut self, name: &str) {
        self.name_op(name, NameOp::Store);
    }

    // ---- unwinding -------------------------------------------------------

    /// Emits the exit code of one frame block. `preserve_tos` keeps a value
    /// (a return value) on top of the stack across the cleanup.
    fn unwind_fblock(&mut self, fblock: &FBlock<'a>, preserve_tos: bool) -> CompileResult<()> {
        match fblock {
            FBlock::WhileLoop { .. } | FBlock::ExceptionHandler { .. } => {}
            FBlock::ExceptionGroupHandler { .. } => {
                return Err(CompileError::lowering(
                    "'break', 'continue' and 'return' cannot appear in an except* block",
                    self.current_span(),
                ));
            }
            FBlock::ForLoop { .. } | FBlock::PopValue => {
                if preserve_tos {
                    self.op(Instruction::Swap(2));
                }
                self.op(Instruction::PopTop);
            }
            FBlock::TryExcept { .. } => {}
            FBlock::FinallyTry { body, .. } => {
                if preserve_tos {
                    self.push_fblock(FBlock::PopValue);
                }
                self.compile_body(body)?;
                if preserve_tos {
                    self.pop_fblock()?;
                }
            }
            FBlock::FinallyEnd { .. } => {
                if preserve_tos {
                    self.op(Instruction::Swap(2));
                }
                self.op(Instruction::PopTop);
                if preserve_tos {
                    self.op(Instruction::Swap(2));
                }
                self.op(Instruction::PopExcept);
            }
            FBlock::With { .. } => {
                if preserve_tos {
                    self.op(Instruction::Swap(2));
                }
                self.call_exit_with_nones();
                self.op(Instruction::PopTop);
            }
            FBlock::HandlerCleanup { name, .. } => {
                if preserve_tos {
                    self.op(Instruction::Swap(2));
                }
                self.op(Instruction::PopExcept);
                if let Some(name) = name {
                    self.load_const(Constant::None);
                    self.store_name(name);
                    self.name_op(name, NameOp::Delete);
                }
            }
        }
        Ok(())
    }

    /// Unwinds frame blocks from the innermost outwards, stopping at (and
    /// returning) the innermost loop when `stop_at_loop` is set. Blocks are
    /// popped while their cleanup is emitted so that the cleanup runs under the
    /// outer handlers, then restored.
    fn unwind_fblock_stack(
        &mut self,
        preserve_tos: bool,
        stop_at_loop: bool,
    ) -> CompileResult<Option<FBlock<'a>>> {
        let Some(top) = self.unit().fblocks.last().cloned() else {
            return Ok(None);
        };
        if stop_at_loop && top.is_loop() {
            return Ok(Some(top));
        }
        let top = self.pop_fblock()?;
        let result = self
            .unwind_fblock(&top, preserve_tos)
            .and_then(|()| self.unwind_fblock_stack(preserve_tos, stop_at_loop));
        self.unit_mut().fblocks.push(top);
        result
    }

    fn call_exit_with_nones(&mut self) {
        for _ in 0..3 {
            self.load_const(Constant::None);
        }
        self.op(Instruction::Call(3));
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.unit().line as usize,
            ..Span::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Constant, Instruction};
    use crate::parser::parse;
    use indoc::indoc;

    fn compile_source(source: &str) -> Arc<CodeObject> {
        let program = parse(source).expect("parse");
        compile(&program, CompileOptions::default()).expect("compile")
    }

    fn compile_error(source: &str) -> CompileError {
        let program = parse(source).expect("parse");
        compile(&program, CompileOptions::default()).expect_err("expected compile failure")
    }

    fn child<'c>(code: &'c CodeObject, name: &str) -> &'c CodeObject {
        code.children()
            .find(|child| child.name == name)
            .expect("nested code object")
    }

    #[test]
    fn module_names_use_name_instructions() {
        let code = compile_source("x = 1\nprint(x)\n");
        assert!(code.instructions.contains(&Instruction::StoreName(0)));
        assert_eq!(code.names, vec!["x", "print"]);
        assert_eq!(code.instructions.last(), Some(&Instruction::ReturnValue));
    }

    #[test]
    fn function_locals_use_fast_slots_and_globals_use_global_loads() {
        let code = compile_source(indoc! {"
            def f(a):
                b = a + 1
                return len(b)
        "});
        let f = child(&code, "f");
        assert_eq!(f.varnames, vec!["a", "b"]);
        assert!(f.instructions.contains(&Instruction::StoreFast(1)));
        assert!(f.instructions.contains(&Instruction::LoadGlobal(0)));
        assert_eq!(f.params.positional_count, 1);
    }

    #[test]
    fn closures_capture_cells() {
        let code = compile_source(indoc! {"
            def outer():
                n = 0
                def inner():
                    return n
                return inner
        "});
        let outer = child(&code, "outer");
        assert_eq!(outer.cellvars, vec!["n"]);
        assert!(outer.instructions.contains(&Instruction::LoadClosure(0)));
        let inner = child(outer, "inner");
        assert_eq!(inner.freevars, vec!["n"]);
        assert_eq!(inner.qualname, "outer.<locals>.inner");
        assert!(inner.instructions.contains(&Instruction::LoadDeref(0)));
    }

    #[test]
    fn parameter_cells_are_mapped_to_their_slots() {
        let code = compile_source(indoc! {"
            def f(a, b):
                return lambda: b
        "});
        let f = child(&code, "f");
        assert_eq!(f.cellvars, vec!["b"]);
        assert_eq!(f.cell2arg, vec![Some(1)]);
    }

    #[test]
    fn try_body_is_covered_by_exception_table() {
        let code = compile_source(indoc! {"
            try:
                x = 1
            except ValueError:
                x = 2
        "});
        assert!(!code.exception_table.is_empty());
        let first = code.exception_table[0];
        assert_eq!(first.depth, 0);
        assert!(first.start < first.end);
        assert!(code.instructions.contains(&Instruction::CheckExcMatch));
    }

    #[test]
    fn methods_get_dotted_qualnames() {
        let code = compile_source(indoc! {"
            class A:
                def run(self):
                    return 1
        "});
        let class_body = child(&code, "A");
        assert!(class_body.flags.is_class_body);
        assert_eq!(child(class_body, "run").qualname, "A.run");
    }

    #[test]
    fn constants_are_interned_once() {
        let code = compile_source("a = 'x'\nb = 'x'\nc = 'x'\n");
        let strings = code
            .constants
            .iter()
            .filter(|constant| matches!(constant, Constant::Str(s) if s == "x"))
            .count();
        assert_eq!(strings, 1);
    }

    #[test]
    fn asserts_can_be_optimized_away() {
        let program = parse("assert False\n").expect("parse");
        let options = CompileOptions {
            optimize_asserts: true,
        };
        let code = compile(&program, options).expect("compile");
        assert!(!code.instructions.contains(&Instruction::LoadAssertionError));
    }

    #[test]
    fn control_flow_outside_its_construct_is_rejected() {
        assert!(matches!(compile_error("return 1\n"), CompileError::Lowering { .. }));
        assert!(matches!(compile_error("break\n"), CompileError::Lowering { .. }));
        assert!(matches!(
            compile_error("def f():\n    continue\n"),
            CompileError::Lowering { line: 2, .. }
        ));
    }

    #[test]
    fn invalid_targets_are_lowering_errors() {
        let err = compile_error("1 = x\n");
        assert!(matches!(err, CompileError::Lowering { ref message, .. } if message.contains("literal")));
        let err = compile_error("del f()\n");
        assert!(matches!(err, CompileError::Lowering { .. }));
    }

    #[test]
    fn irrefutable_case_must_be_last() {
        let err = compile_error(indoc! {"
            match x:
                case y:
                    pass
                case 1:
                    pass
        "});
        assert!(matches!(err, CompileError::Lowering { ref message, .. } if message.contains("unreachable")));
    }

    #[test]
    fn or_pattern_alternatives_must_bind_same_names() {
        let err = compile_error(indoc! {"
            match x:
                case [a] | (b, 1):
                    pass
        "});
        assert!(matches!(err, CompileError::Lowering { ref message, .. } if message.contains("different names")));
    }

    #[test]
    fn comprehension_is_called_with_outer_iterator() {
        let code = compile_source("y = [x for x in range(3)]\n");
        let comp = child(&code, "<listcomp>");
        assert_eq!(comp.varnames[0], ".0");
        assert_eq!(comp.params.positional_count, 1);
        assert!(code.instructions.contains(&Instruction::GetIter));
        assert!(code.instructions.contains(&Instruction::Call(1)));
    }

    #[test]
    fn generator_flags_reach_code_objects() {
        let code = compile_source(indoc! {"
            def gen():
                yield 1
            async def coro():
                return 2
        "});
        assert!(child(&code, "gen").flags.is_generator);
        assert!(child(&code, "coro").flags.is_coroutine);
    }
}
