use std::sync::Arc;

use crate::ast::{
    BinaryOperator, BoolOperator, ClassDef, Constant as AstConstant, ExceptHandler, Expression,
    ExpressionKind, FunctionDef, Parameters, Statement, StatementKind, UnaryOperator, WithItem,
};
use crate::bytecode::{
    CodeObject, Constant, Instruction, MAKE_CLOSURE, MAKE_DEFAULTS, MAKE_KWDEFAULTS, ParamSpec,
};
use crate::symtable::ScopeKind;
use crate::token::Span;

use super::ir::{AttrOp, BlockId, IrOp, JumpKind, NameOp};
use super::{CompileError, CompileResult, Compiler, FBlock};

impl<'a> Compiler<'a> {
    pub(super) fn compile_body(&mut self, body: &'a [Statement]) -> CompileResult<()> {
        for statement in body {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, statement: &'a Statement) -> CompileResult<()> {
        let saved = self.set_line(statement.span.line);
        let result = self.compile_statement_kind(statement);
        self.restore_line(saved);
        result
    }

    fn compile_statement_kind(&mut self, statement: &'a Statement) -> CompileResult<()> {
        let span = statement.span;
        match &statement.kind {
            StatementKind::Expr(value) => {
                self.compile_expr(value)?;
                self.op(Instruction::PopTop);
            }
            StatementKind::Assign { targets, value } => {
                self.compile_expr(value)?;
                for (index, target) in targets.iter().enumerate() {
                    if index + 1 < targets.len() {
                        self.op(Instruction::Copy(1));
                    }
                    self.compile_store(target)?;
                }
            }
            StatementKind::AugAssign { target, op, value } => {
                self.compile_aug_assign(target, *op, value)?;
            }
            StatementKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    self.compile_expr(value)?;
                    self.compile_store(target)?;
                } else {
                    check_annotation_target(target)?;
                }
            }
            StatementKind::Delete(targets) => {
                for target in targets {
                    self.compile_delete(target)?;
                }
            }
            StatementKind::Pass | StatementKind::Global(_) | StatementKind::Nonlocal(_) => {}
            StatementKind::Break => self.compile_break(span)?,
            StatementKind::Continue => self.compile_continue(span)?,
            StatementKind::Return(value) => self.compile_return(value.as_ref(), span)?,
            StatementKind::Raise { exc, cause } => {
                let mut count = 0;
                if let Some(exc) = exc {
                    self.compile_expr(exc)?;
                    count += 1;
                    if let Some(cause) = cause {
                        self.compile_expr(cause)?;
                        count += 1;
                    }
                }
                self.op(Instruction::Raise(count));
            }
            StatementKind::Assert { test, msg } => {
                if !self.options.optimize_asserts {
                    let end = self.new_block();
                    self.compile_jump_if(test, true, end)?;
                    self.op(Instruction::LoadAssertionError);
                    if let Some(msg) = msg {
                        self.compile_expr(msg)?;
                        self.op(Instruction::Call(1));
                    }
                    self.op(Instruction::Raise(1));
                    self.switch_to(end);
                }
            }
            StatementKind::If { test, body, orelse } => {
                let end = self.new_block();
                if orelse.is_empty() {
                    self.compile_jump_if(test, false, end)?;
                    self.compile_body(body)?;
                } else {
                    let otherwise = self.new_block();
                    self.compile_jump_if(test, false, otherwise)?;
                    self.compile_body(body)?;
                    self.jump(JumpKind::Always, end);
                    self.switch_to(otherwise);
                    self.compile_body(orelse)?;
                }
                self.switch_to(end);
            }
            StatementKind::While { test, body, orelse } => {
                self.compile_while(test, body, orelse)?;
            }
            StatementKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            } => {
                if *is_async {
                    return Err(CompileError::lowering(
                        "asynchronous 'for' is not supported",
                        span,
                    ));
                }
                self.compile_for(target, iter, body, orelse)?;
            }
            StatementKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
            } => {
                if finalbody.is_empty() {
                    self.compile_try_handlers(body, handlers, orelse, *is_star)?;
                } else {
                    self.compile_try_finally(body, handlers, orelse, finalbody, *is_star)?;
                }
            }
            StatementKind::With {
                items,
                body,
                is_async,
            } => {
                if *is_async {
                    return Err(CompileError::lowering(
                        "asynchronous 'with' is not supported",
                        span,
                    ));
                }
                self.compile_with(items, body)?;
            }
            StatementKind::FunctionDef(def) => self.compile_function_def(def, span)?,
            StatementKind::ClassDef(class) => self.compile_class_def(class, span)?,
            StatementKind::Match { subject, cases } => self.compile_match(subject, cases)?,
        }
        Ok(())
    }

    // ---- jumps -----------------------------------------------------------

    /// Jumps to `target` when `expr` evaluates to `condition`, short-circuiting
    /// `and`/`or`/`not` without materialising intermediate booleans.
    pub(super) fn compile_jump_if(
        &mut self,
        expr: &'a Expression,
        condition: bool,
        target: BlockId,
    ) -> CompileResult<()> {
        match &expr.kind {
            ExpressionKind::UnaryOp {
                op: UnaryOperator::Not,
                operand,
            } => self.compile_jump_if(operand, !condition, target),
            ExpressionKind::BoolOp { op, values } if !values.is_empty() => {
                let inner_condition = *op == BoolOperator::Or;
                let next = if inner_condition == condition {
                    target
                } else {
                    self.new_block()
                };
                let (last, rest) = values.split_last().expect("non-empty operands");
                for value in rest {
                    self.compile_jump_if(value, inner_condition, next)?;
                }
                self.compile_jump_if(last, condition, target)?;
                if next != target {
                    self.switch_to(next);
                }
                Ok(())
            }
            _ => {
                self.compile_expr(expr)?;
                let kind = if condition {
                    JumpKind::IfTrue
                } else {
                    JumpKind::IfFalse
                };
                self.jump(kind, target);
                Ok(())
            }
        }
    }

    // ---- loops -----------------------------------------------------------

    fn compile_while(
        &mut self,
        test: &'a Expression,
        body: &'a [Statement],
        orelse: &'a [Statement],
    ) -> CompileResult<()> {
        let start = self.new_block();
        let exit = self.new_block();
        let otherwise = if orelse.is_empty() {
            exit
        } else {
            self.new_block()
        };
        self.switch_to(start);
        if !is_constant_true(test) {
            self.compile_jump_if(test, false, otherwise)?;
        }
        self.push_fblock(FBlock::WhileLoop { start, exit });
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.jump(JumpKind::Always, start);
        if !orelse.is_empty() {
            self.switch_to(otherwise);
            self.compile_body(orelse)?;
        }
        self.switch_to(exit);
        Ok(())
    }

    fn compile_for(
        &mut self,
        target: &'a Expression,
        iter: &'a Expression,
        body: &'a [Statement],
        orelse: &'a [Statement],
    ) -> CompileResult<()> {
        let start = self.new_block();
        let exhausted = self.new_block();
        let exit = self.new_block();
        self.compile_expr(iter)?;
        self.op(Instruction::GetIter);
        self.switch_to(start);
        self.jump(JumpKind::ForIter, exhausted);
        self.compile_store(target)?;
        self.push_fblock(FBlock::ForLoop { start, exit });
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.jump(JumpKind::Always, start);
        self.switch_to(exhausted);
        self.compile_body(orelse)?;
        self.switch_to(exit);
        Ok(())
    }

    fn compile_break(&mut self, span: Span) -> CompileResult<()> {
        let Some(enclosing) = self.unwind_fblock_stack(false, true)? else {
            return Err(CompileError::lowering("'break' outside loop", span));
        };
        match enclosing {
            FBlock::ForLoop { exit, .. } => {
                self.op(Instruction::PopTop);
                self.jump(JumpKind::Always, exit);
            }
            FBlock::WhileLoop { exit, .. } => self.jump(JumpKind::Always, exit),
            _ => return Err(CompileError::internal("loop unwinding stopped at a non-loop")),
        }
        Ok(())
    }

    fn compile_continue(&mut self, span: Span) -> CompileResult<()> {
        let Some(enclosing) = self.unwind_fblock_stack(false, true)? else {
            return Err(CompileError::lowering("'continue' not properly in loop", span));
        };
        match enclosing {
            FBlock::ForLoop { start, .. } | FBlock::WhileLoop { start, .. } => {
                self.jump(JumpKind::Always, start);
            }
            _ => return Err(CompileError::internal("loop unwinding stopped at a non-loop")),
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&'a Expression>, span: Span) -> CompileResult<()> {
        if matches!(self.scope_kind(), ScopeKind::Module | ScopeKind::Class) {
            return Err(CompileError::lowering("'return' outside function", span));
        }
        let preserve_tos = value.is_some();
        if let Some(value) = value {
            self.compile_expr(value)?;
        }
        self.unwind_fblock_stack(preserve_tos, false)?;
        if !preserve_tos {
            self.load_const(Constant::None);
        }
        self.op(Instruction::ReturnValue);
        Ok(())
    }

    // ---- exceptions ------------------------------------------------------

    /// Runs `emit` with the innermost frame block inactive, so the emitted
    /// instructions fall under the enclosing handler.
    fn uncovered(
        &mut self,
        emit: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let top = self.pop_fblock()?;
        let result = emit(self);
        self.unit_mut().fblocks.push(top);
        result
    }

    /// `[prev, exc]` on the stack: restore the previous exception and re-raise.
    fn pop_except_and_reraise(&mut self) {
        self.op(Instruction::Swap(2));
        self.op(Instruction::PopExcept);
        self.op(Instruction::Reraise);
    }

    fn compile_try_finally(
        &mut self,
        body: &'a [Statement],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Statement],
        finalbody: &'a [Statement],
        is_star: bool,
    ) -> CompileResult<()> {
        let on_error = self.new_block();
        let cleanup = self.new_block();
        let exit = self.new_block();

        let handler = self.new_handler(on_error, 0);
        self.push_fblock(FBlock::FinallyTry {
            handler,
            body: finalbody,
        });
        if handlers.is_empty() {
            self.compile_body(body)?;
        } else {
            self.compile_try_handlers(body, handlers, orelse, is_star)?;
        }
        self.pop_fblock()?;
        self.compile_body(finalbody)?;
        self.jump(JumpKind::Always, exit);

        // [exc]
        self.switch_to(on_error);
        let cleanup_handler = self.new_handler(cleanup, 0);
        self.push_fblock(FBlock::FinallyEnd {
            handler: cleanup_handler,
        });
        self.op(Instruction::PushExcInfo);
        self.compile_body(finalbody)?;
        self.op(Instruction::Reraise);
        self.pop_fblock()?;

        // [prev, exc]
        self.switch_to(cleanup);
        self.pop_except_and_reraise();
        self.switch_to(exit);
        Ok(())
    }

    fn compile_try_handlers(
        &mut self,
        body: &'a [Statement],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Statement],
        is_star: bool,
    ) -> CompileResult<()> {
        if handlers.is_empty() {
            self.compile_body(body)?;
            return self.compile_body(orelse);
        }
        if is_star {
            self.compile_try_star(body, handlers, orelse)
        } else {
            self.compile_try_except(body, handlers, orelse)
        }
    }

    fn compile_try_except(
        &mut self,
        body: &'a [Statement],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Statement],
    ) -> CompileResult<()> {
        let on_error = self.new_block();
        let cleanup = self.new_block();
        let end = self.new_block();

        let handler = self.new_handler(on_error, 0);
        self.push_fblock(FBlock::TryExcept { handler });
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.compile_body(orelse)?;
        self.jump(JumpKind::Always, end);

        // [exc]
        self.switch_to(on_error);
        let cleanup_handler = self.new_handler(cleanup, 0);
        self.push_fblock(FBlock::ExceptionHandler {
            handler: cleanup_handler,
        });
        self.op(Instruction::PushExcInfo);

        for (index, clause) in handlers.iter().enumerate() {
            let saved = self.set_line(clause.span.line);
            let next_clause = self.new_block();
            match &clause.type_ {
                Some(type_) => {
                    self.compile_expr(type_)?;
                    self.op(Instruction::CheckExcMatch);
                    self.jump(JumpKind::IfFalse, next_clause);
                }
                None if index + 1 < handlers.len() => {
                    return Err(CompileError::lowering(
                        "default 'except:' must be last",
                        clause.span,
                    ));
                }
                None => {}
            }

            match &clause.name {
                Some(name) => {
                    // [prev, exc] -> [prev]
                    self.store_name(name);
                    let cleanup_end = self.new_block();
                    let body_handler = self.new_handler(cleanup_end, 0);
                    self.push_fblock(FBlock::HandlerCleanup {
                        handler: Some(body_handler),
                        name: Some(name),
                    });
                    self.compile_body(&clause.body)?;
                    self.pop_fblock()?;
                    self.uncovered(|this| {
                        this.op(Instruction::PopExcept);
                        this.unbind(name);
                        this.jump(JumpKind::Always, end);
                        Ok(())
                    })?;

                    // [prev, exc2]: the body raised; unbind and propagate.
                    self.switch_to(cleanup_end);
                    self.unbind(name);
                    self.op(Instruction::Reraise);
                }
                None => {
                    self.op(Instruction::PopTop);
                    self.push_fblock(FBlock::HandlerCleanup {
                        handler: None,
                        name: None,
                    });
                    self.compile_body(&clause.body)?;
                    self.pop_fblock()?;
                    self.uncovered(|this| {
                        this.op(Instruction::PopExcept);
                        this.jump(JumpKind::Always, end);
                        Ok(())
                    })?;
                }
            }
            self.switch_to(next_clause);
            self.restore_line(saved);
        }

        // No clause matched: [prev, exc]
        self.op(Instruction::Reraise);
        self.pop_fblock()?;

        self.switch_to(cleanup);
        self.pop_except_and_reraise();
        self.switch_to(end);
        Ok(())
    }

    /// `except*`: every clause splits what is left of the group; whatever the
    /// bodies raise plus the unmatched remainder is re-raised at the end.
    fn compile_try_star(
        &mut self,
        body: &'a [Statement],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Statement],
    ) -> CompileResult<()> {
        let on_error = self.new_block();
        let otherwise = self.new_block();
        let reraise_star = self.new_block();
        let reraise = self.new_block();
        let cleanup = self.new_block();
        let end = self.new_block();

        let handler = self.new_handler(on_error, 0);
        self.push_fblock(FBlock::TryExcept { handler });
        self.compile_body(body)?;
        self.pop_fblock()?;
        self.jump(JumpKind::Always, otherwise);

        // [exc]
        self.switch_to(on_error);
        let cleanup_handler = self.new_handler(cleanup, 0);
        self.push_fblock(FBlock::ExceptionGroupHandler {
            handler: cleanup_handler,
        });
        self.op(Instruction::PushExcInfo);

        for (index, clause) in handlers.iter().enumerate() {
            let saved = self.set_line(clause.span.line);
            let Some(type_) = &clause.type_ else {
                return Err(CompileError::lowering(
                    "expected exception type after 'except*'",
                    clause.span,
                ));
            };
            let no_match = self.new_block();
            let next_clause = self.new_block();
            let cleanup_end = self.new_block();

            if index == 0 {
                // [prev, exc] -> [prev, orig, [], exc]
                self.op(Instruction::Copy(1));
                self.op(Instruction::BuildList(0));
                self.op(Instruction::Swap(2));
            }
            self.compile_expr(type_)?;
            self.op(Instruction::CheckEgMatch);
            self.op(Instruction::Copy(1));
            self.jump(JumpKind::IfNone, no_match);

            // [prev, orig, raised, rest, match]
            match &clause.name {
                Some(name) => self.store_name(name),
                None => self.op(Instruction::PopTop),
            }
            let body_handler = self.new_handler(cleanup_end, 0);
            self.push_fblock(FBlock::HandlerCleanup {
                handler: Some(body_handler),
                name: clause.name.as_deref(),
            });
            self.compile_body(&clause.body)?;
            self.pop_fblock()?;
            if let Some(name) = &clause.name {
                self.unbind(name);
            }
            self.jump(JumpKind::Always, next_clause);

            // [prev, orig, raised, rest, new exc]
            self.switch_to(cleanup_end);
            if let Some(name) = &clause.name {
                self.unbind(name);
            }
            self.op(Instruction::ListAppend(2));
            self.jump(JumpKind::Always, next_clause);

            self.switch_to(no_match);
            self.op(Instruction::PopTop);

            self.switch_to(next_clause);
            if index + 1 == handlers.len() {
                // Fold the unmatched rest into the list of things to re-raise.
                self.op(Instruction::ListAppend(1));
                self.jump(JumpKind::Always, reraise_star);
            }
            self.restore_line(saved);
        }
        self.pop_fblock()?;

        // [prev, orig, raised]
        self.switch_to(reraise_star);
        self.op(Instruction::PrepReraiseStar);
        self.op(Instruction::Copy(1));
        self.jump(JumpKind::IfNotNone, reraise);
        self.op(Instruction::PopTop);
        self.op(Instruction::PopExcept);
        self.jump(JumpKind::Always, end);

        // [prev, exc]
        self.switch_to(reraise);
        self.op(Instruction::Swap(2));
        self.op(Instruction::PopExcept);
        self.op(Instruction::Reraise);

        self.switch_to(cleanup);
        self.pop_except_and_reraise();

        self.switch_to(otherwise);
        self.compile_body(orelse)?;
        self.jump(JumpKind::Always, end);
        self.switch_to(end);
        Ok(())
    }

    /// `name = None; del name`, so a caught exception does not outlive its
    /// handler.
    fn unbind(&mut self, name: &str) {
        self.load_const(Constant::None);
        self.store_name(name);
        self.name_op(name, NameOp::Delete);
    }

    // ---- with ------------------------------------------------------------

    fn compile_with(&mut self, items: &'a [WithItem], body: &'a [Statement]) -> CompileResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.compile_body(body);
        };
        let on_error = self.new_block();
        let suppress = self.new_block();
        let cleanup = self.new_block();
        let exit = self.new_block();

        self.compile_expr(&item.context)?;
        // [exit, enter result]
        self.op(Instruction::BeforeWith);
        let handler = self.new_handler(on_error, 1);
        self.push_fblock(FBlock::With { handler });
        match &item.target {
            Some(target) => self.compile_store(target)?,
            None => self.op(Instruction::PopTop),
        }
        self.compile_with(rest, body)?;
        self.pop_fblock()?;
        self.call_exit_with_nones();
        self.op(Instruction::PopTop);
        self.jump(JumpKind::Always, exit);

        // [exit, exc]
        self.switch_to(on_error);
        let cleanup_handler = self.new_handler(cleanup, 0);
        self.push_fblock(FBlock::ExceptionHandler {
            handler: cleanup_handler,
        });
        self.op(Instruction::PushExcInfo);
        self.op(Instruction::WithExceptStart);
        self.jump(JumpKind::IfTrue, suppress);
        self.op(Instruction::Reraise);
        self.pop_fblock()?;

        // [exit, prev, exc]
        self.switch_to(suppress);
        self.op(Instruction::PopTop);
        self.op(Instruction::PopExcept);
        self.op(Instruction::PopTop);
        self.jump(JumpKind::Always, exit);

        self.switch_to(cleanup);
        self.pop_except_and_reraise();
        self.switch_to(exit);
        Ok(())
    }

    // ---- targets ---------------------------------------------------------

    pub(super) fn compile_store(&mut self, target: &'a Expression) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => self.store_name(name),
            ExpressionKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                self.emit(IrOp::Attr(AttrOp::Store, attr.clone()));
            }
            ExpressionKind::Subscript { value, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.op(Instruction::StoreSubscr);
            }
            ExpressionKind::Tuple(elements) | ExpressionKind::List(elements) => {
                self.unpack(elements, target.span)?;
                for element in elements {
                    match &element.kind {
                        ExpressionKind::Starred(inner) => self.compile_store(inner)?,
                        _ => self.compile_store(element)?,
                    }
                }
            }
            ExpressionKind::Starred(_) => {
                return Err(CompileError::lowering(
                    "starred assignment target must be in a list or tuple",
                    target.span,
                ));
            }
            other => {
                return Err(CompileError::lowering(
                    format!("cannot assign to {}", describe_target(other)),
                    target.span,
                ));
            }
        }
        Ok(())
    }

    /// Emits the unpack for a tuple/list target, allowing one starred element.
    fn unpack(&mut self, elements: &[Expression], span: Span) -> CompileResult<()> {
        let mut star = None;
        for (index, element) in elements.iter().enumerate() {
            if matches!(element.kind, ExpressionKind::Starred(_)) {
                if star.is_some() {
                    return Err(CompileError::lowering(
                        "multiple starred expressions in assignment",
                        span,
                    ));
                }
                star = Some(index);
            }
        }
        let count = elements.len() as u32;
        match star {
            None => self.op(Instruction::UnpackSequence(count)),
            Some(index) => self.op(Instruction::UnpackEx {
                before: index as u32,
                after: count - index as u32 - 1,
            }),
        }
        Ok(())
    }

    fn compile_delete(&mut self, target: &'a Expression) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => self.name_op(name, NameOp::Delete),
            ExpressionKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                self.emit(IrOp::Attr(AttrOp::Delete, attr.clone()));
            }
            ExpressionKind::Subscript { value, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.op(Instruction::DeleteSubscr);
            }
            ExpressionKind::Tuple(elements) | ExpressionKind::List(elements) => {
                for element in elements {
                    self.compile_delete(element)?;
                }
            }
            other => {
                return Err(CompileError::lowering(
                    format!("cannot delete {}", describe_target(other)),
                    target.span,
                ));
            }
        }
        Ok(())
    }

    fn compile_aug_assign(
        &mut self,
        target: &'a Expression,
        op: BinaryOperator,
        value: &'a Expression,
    ) -> CompileResult<()> {
        let binary = Instruction::BinaryOp { op, inplace: true };
        match &target.kind {
            ExpressionKind::Name(name) => {
                self.load_name(name);
                self.compile_expr(value)?;
                self.op(binary);
                self.store_name(name);
            }
            ExpressionKind::Attribute { value: owner, attr } => {
                self.compile_expr(owner)?;
                self.op(Instruction::Copy(1));
                self.emit(IrOp::Attr(AttrOp::Load, attr.clone()));
                self.compile_expr(value)?;
                self.op(binary);
                self.op(Instruction::Swap(2));
                self.emit(IrOp::Attr(AttrOp::Store, attr.clone()));
            }
            ExpressionKind::Subscript {
                value: container,
                index,
            } => {
                self.compile_expr(container)?;
                self.compile_expr(index)?;
                self.op(Instruction::Copy(2));
                self.op(Instruction::Copy(2));
                self.op(Instruction::BinarySubscr);
                self.compile_expr(value)?;
                self.op(binary);
                // [container, index, result] -> [result, container, index]
                self.op(Instruction::Swap(3));
                self.op(Instruction::Swap(2));
                self.op(Instruction::StoreSubscr);
            }
            _ => {
                return Err(CompileError::lowering(
                    "illegal expression for augmented assignment",
                    target.span,
                ));
            }
        }
        Ok(())
    }

    // ---- definitions -----------------------------------------------------

    /// Pushes positional and keyword-only defaults; returns the matching
    /// `MakeFunction` flags.
    pub(super) fn compile_defaults(&mut self, params: &'a Parameters) -> CompileResult<u32> {
        let mut flags = 0;
        let defaults: Vec<&Expression> = params
            .positional()
            .filter_map(|param| param.default.as_ref())
            .collect();
        if !defaults.is_empty() {
            for default in &defaults {
                self.compile_expr(default)?;
            }
            self.op(Instruction::BuildTuple(defaults.len() as u32));
            flags |= MAKE_DEFAULTS;
        }
        let mut kwdefaults = 0;
        for param in &params.kwonly {
            if let Some(default) = &param.default {
                self.load_const(Constant::str(&param.name));
                self.compile_expr(default)?;
                kwdefaults += 1;
            }
        }
        if kwdefaults > 0 {
            self.op(Instruction::BuildMap(kwdefaults));
            flags |= MAKE_KWDEFAULTS;
        }
        Ok(flags)
    }

    /// Builds a function object for `code` in the current scope.
    pub(super) fn make_closure(&mut self, code: Arc<CodeObject>, mut flags: u32) {
        if !code.freevars.is_empty() {
            for name in &code.freevars {
                self.emit(IrOp::LoadClosure(name.clone()));
            }
            self.op(Instruction::BuildTuple(code.freevars.len() as u32));
            flags |= MAKE_CLOSURE;
        }
        self.load_const(Constant::Code(code));
        self.op(Instruction::MakeFunction(flags));
    }

    fn compile_function_def(&mut self, def: &'a FunctionDef, span: Span) -> CompileResult<()> {
        for decorator in &def.decorators {
            self.compile_expr(decorator)?;
        }
        let flags = self.compile_defaults(&def.params)?;

        self.enter_scope(&def.name, span)?;
        self.set_params(param_spec(&def.params));
        self.compile_body(&def.body)?;
        self.load_const(Constant::None);
        self.op(Instruction::ReturnValue);
        let code = self.exit_scope()?;

        self.make_closure(code, flags);
        for _ in &def.decorators {
            self.op(Instruction::Call(1));
        }
        self.store_name(&def.name);
        Ok(())
    }

    fn compile_class_def(&mut self, class: &'a ClassDef, span: Span) -> CompileResult<()> {
        for decorator in &class.decorators {
            self.compile_expr(decorator)?;
        }
        self.op(Instruction::LoadBuildClass);

        self.enter_scope(&class.name, span)?;
        let qualname = self.unit().ir.qualname.clone();
        self.load_name("__name__");
        self.store_name("__module__");
        self.load_const(Constant::str(qualname));
        self.store_name("__qualname__");
        self.compile_body(&class.body)?;
        let needs_class_cell = self.table.scope(self.unit().scope).needs_class_cell;
        if needs_class_cell {
            self.emit(IrOp::LoadClosure("__class__".to_string()));
        } else {
            self.load_const(Constant::None);
        }
        self.op(Instruction::ReturnValue);
        let code = self.exit_scope()?;

        self.make_closure(code, 0);
        self.load_const(Constant::str(&class.name));
        self.compile_call_arguments(2, &class.bases, &class.keywords)?;
        for _ in &class.decorators {
            self.op(Instruction::Call(1));
        }
        self.store_name(&class.name);
        Ok(())
    }
}

pub(super) fn param_spec(params: &Parameters) -> ParamSpec {
    ParamSpec {
        posonly_count: params.posonly.len() as u32,
        positional_count: (params.posonly.len() + params.args.len()) as u32,
        kwonly_count: params.kwonly.len() as u32,
        has_varargs: params.vararg.is_some(),
        has_varkw: params.kwarg.is_some(),
    }
}

fn is_constant_true(expr: &Expression) -> bool {
    match &expr.kind {
        ExpressionKind::Constant(AstConstant::Bool(value)) => *value,
        ExpressionKind::Constant(AstConstant::Int(value)) => *value != 0,
        _ => false,
    }
}

fn check_annotation_target(target: &Expression) -> CompileResult<()> {
    match &target.kind {
        ExpressionKind::Name(_)
        | ExpressionKind::Attribute { .. }
        | ExpressionKind::Subscript { .. } => Ok(()),
        other => Err(CompileError::lowering(
            format!("cannot annotate {}", describe_target(other)),
            target.span,
        )),
    }
}

fn describe_target(kind: &ExpressionKind) -> &'static str {
    match kind {
        ExpressionKind::Constant(_) | ExpressionKind::FString(_) => "literal",
        ExpressionKind::Call { .. } => "function call",
        ExpressionKind::Lambda { .. } => "lambda",
        ExpressionKind::Compare { .. } => "comparison",
        ExpressionKind::BoolOp { .. } | ExpressionKind::BinOp { .. } | ExpressionKind::UnaryOp { .. } => {
            "expression"
        }
        ExpressionKind::NamedExpr { .. } => "named expression",
        ExpressionKind::IfExp { .. } => "conditional expression",
        ExpressionKind::Dict(_) | ExpressionKind::Set(_) => "literal",
        ExpressionKind::ListComp { .. }
        | ExpressionKind::SetComp { .. }
        | ExpressionKind::DictComp { .. }
        | ExpressionKind::GeneratorExp { .. } => "comprehension",
        ExpressionKind::Await(_) => "await expression",
        ExpressionKind::Yield(_) | ExpressionKind::YieldFrom(_) => "yield expression",
        _ => "expression",
    }
}
