//! First pass: record bindings, uses and declarations per scope.

use super::{DeclaredVia, ScopeId, ScopeKind, Symbol, SymbolTable};
use crate::ast::{
    Comprehension, Expression, ExpressionKind, FStringPart, Parameters, Pattern, PatternKind,
    Program, Statement, StatementKind,
};
use crate::compiler::{CompileError, CompileResult};
use crate::token::Span;

pub(super) fn collect(table: &mut SymbolTable, program: &Program) -> CompileResult<()> {
    let root = table.add_scope(ScopeKind::Module, "<module>", None, Span::default());
    let mut collector = Collector {
        table,
        stack: vec![root],
    };
    collector.visit_body(&program.body)
}

struct Collector<'t> {
    table: &'t mut SymbolTable,
    stack: Vec<ScopeId>,
}

impl Collector<'_> {
    fn current(&self) -> ScopeId {
        *self.stack.last().expect("scope stack is never empty")
    }

    fn kind(&self) -> ScopeKind {
        self.table.scope(self.current()).kind
    }

    fn symbol_mut(&mut self, scope: ScopeId, name: &str, span: Span) -> &mut Symbol {
        self.table
            .scope_mut(scope)
            .symbols
            .entry(name.to_string())
            .or_insert_with(|| Symbol::new(name, span))
    }

    fn bind(&mut self, name: &str, via: DeclaredVia, span: Span) {
        let scope = self.current();
        let symbol = self.symbol_mut(scope, name, span);
        symbol.is_bound = true;
        symbol.declared_via.get_or_insert(via);
    }

    fn use_name(&mut self, name: &str, span: Span) {
        let scope = self.current();
        self.symbol_mut(scope, name, span).is_used = true;
        if name == "super" && matches!(self.kind(), ScopeKind::Function | ScopeKind::Lambda) {
            self.symbol_mut(scope, "__class__", span).is_used = true;
        }
    }

    fn declare_global(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let scope = self.current();
        let scope_name = self.table.scope(scope).name.clone();
        let symbol = self.symbol_mut(scope, name, span);
        if symbol.is_parameter {
            return Err(CompileError::conflict(&scope_name, name, "parameter declared global", span));
        }
        if symbol.is_nonlocal {
            return Err(CompileError::conflict(&scope_name, name, "name declared nonlocal and global", span));
        }
        if (symbol.is_used || symbol.is_bound) && !symbol.explicit_global {
            return Err(CompileError::conflict(
                &scope_name,
                name,
                "name used or assigned before global declaration",
                span,
            ));
        }
        symbol.explicit_global = true;
        symbol.declared_via = Some(DeclaredVia::Global);
        Ok(())
    }

    fn declare_nonlocal(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let scope = self.current();
        match self.kind() {
            ScopeKind::Module => {
                return Err(CompileError::lowering(
                    "nonlocal declaration not allowed at module level",
                    span,
                ));
            }
            ScopeKind::Class if self.table.scope(scope).parent == Some(self.table.root()) => {
                return Err(CompileError::NonlocalNotFound {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                });
            }
            _ => {}
        }
        let scope_name = self.table.scope(scope).name.clone();
        let symbol = self.symbol_mut(scope, name, span);
        if symbol.is_parameter {
            return Err(CompileError::conflict(&scope_name, name, "parameter declared nonlocal", span));
        }
        if symbol.explicit_global {
            return Err(CompileError::conflict(&scope_name, name, "name declared global and nonlocal", span));
        }
        if (symbol.is_used || symbol.is_bound) && !symbol.is_nonlocal {
            return Err(CompileError::conflict(
                &scope_name,
                name,
                "name used or assigned before nonlocal declaration",
                span,
            ));
        }
        symbol.is_nonlocal = true;
        symbol.declared_via = Some(DeclaredVia::Nonlocal);
        symbol.span = span;
        Ok(())
    }

    fn enter(&mut self, kind: ScopeKind, name: &str, span: Span) -> ScopeId {
        let parent = self.current();
        let id = self.table.add_scope(kind, name, Some(parent), span);
        self.stack.push(id);
        id
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    fn add_parameters(&mut self, params: &Parameters) -> CompileResult<()> {
        let scope = self.current();
        for param in params.all() {
            let scope_name = self.table.scope(scope).name.clone();
            let symbol = self.symbol_mut(scope, &param.name, param.span);
            if symbol.is_parameter {
                return Err(CompileError::conflict(
                    &scope_name,
                    &param.name,
                    "duplicate argument",
                    param.span,
                ));
            }
            symbol.is_parameter = true;
            symbol.is_bound = true;
            symbol.declared_via = Some(DeclaredVia::Parameter);
        }
        let names = params.names().into_iter().map(str::to_string).collect();
        let has_varargs = params.vararg.is_some();
        let has_varkw = params.kwarg.is_some();
        let scope = self.table.scope_mut(scope);
        scope.params = names;
        scope.has_varargs = has_varargs;
        scope.has_varkw = has_varkw;
        Ok(())
    }

    fn visit_parameter_defaults(&mut self, params: &Parameters) -> CompileResult<()> {
        for param in params.all() {
            if let Some(default) = &param.default {
                self.visit_expr(default)?;
            }
        }
        Ok(())
    }

    fn visit_body(&mut self, body: &[Statement]) -> CompileResult<()> {
        for statement in body {
            self.visit_stmt(statement)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, statement: &Statement) -> CompileResult<()> {
        let span = statement.span;
        match &statement.kind {
            StatementKind::Expr(value) => self.visit_expr(value)?,
            StatementKind::Assign { targets, value } => {
                self.visit_expr(value)?;
                for target in targets {
                    self.visit_target(target, DeclaredVia::Assignment)?;
                }
            }
            StatementKind::AugAssign { target, value, .. } => {
                self.visit_expr(value)?;
                if let ExpressionKind::Name(name) = &target.kind {
                    self.use_name(name, target.span);
                    self.bind(name, DeclaredVia::Assignment, target.span);
                } else {
                    self.visit_expr(target)?;
                }
            }
            StatementKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
                match &target.kind {
                    ExpressionKind::Name(name) => {
                        self.bind(name, DeclaredVia::Assignment, target.span);
                    }
                    _ if value.is_some() => self.visit_target(target, DeclaredVia::Assignment)?,
                    _ => {}
                }
            }
            StatementKind::Delete(targets) => {
                for target in targets {
                    self.visit_target(target, DeclaredVia::Assignment)?;
                }
            }
            StatementKind::Pass | StatementKind::Break | StatementKind::Continue => {}
            StatementKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            StatementKind::Raise { exc, cause } => {
                if let Some(exc) = exc {
                    self.visit_expr(exc)?;
                }
                if let Some(cause) = cause {
                    self.visit_expr(cause)?;
                }
            }
            StatementKind::Global(names) => {
                for name in names {
                    self.declare_global(name, span)?;
                }
            }
            StatementKind::Nonlocal(names) => {
                for name in names {
                    self.declare_nonlocal(name, span)?;
                }
            }
            StatementKind::Assert { test, msg } => {
                self.visit_expr(test)?;
                if let Some(msg) = msg {
                    self.visit_expr(msg)?;
                }
            }
            StatementKind::If { test, body, orelse }
            | StatementKind::While { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_body(body)?;
                self.visit_body(orelse)?;
            }
            StatementKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                self.visit_expr(iter)?;
                self.visit_target(target, DeclaredVia::Assignment)?;
                self.visit_body(body)?;
                self.visit_body(orelse)?;
            }
            StatementKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                self.visit_body(body)?;
                for handler in handlers {
                    if let Some(type_) = &handler.type_ {
                        self.visit_expr(type_)?;
                    }
                    if let Some(name) = &handler.name {
                        self.bind(name, DeclaredVia::ExceptTarget, handler.span);
                    }
                    self.visit_body(&handler.body)?;
                }
                self.visit_body(orelse)?;
                self.visit_body(finalbody)?;
            }
            StatementKind::With { items, body, .. } => {
                for item in items {
                    self.visit_expr(&item.context)?;
                    if let Some(target) = &item.target {
                        self.visit_target(target, DeclaredVia::Assignment)?;
                    }
                }
                self.visit_body(body)?;
            }
            StatementKind::FunctionDef(def) => {
                for decorator in &def.decorators {
                    self.visit_expr(decorator)?;
                }
                self.visit_parameter_defaults(&def.params)?;
                self.bind(&def.name, DeclaredVia::Assignment, span);
                let scope = self.enter(ScopeKind::Function, &def.name, span);
                self.table.scope_mut(scope).is_coroutine = def.is_async;
                self.add_parameters(&def.params)?;
                self.visit_body(&def.body)?;
                self.leave();
            }
            StatementKind::ClassDef(class) => {
                for decorator in &class.decorators {
                    self.visit_expr(decorator)?;
                }
                for base in &class.bases {
                    self.visit_expr(base)?;
                }
                for keyword in &class.keywords {
                    self.visit_expr(&keyword.value)?;
                }
                self.bind(&class.name, DeclaredVia::Assignment, span);
                self.enter(ScopeKind::Class, &class.name, span);
                self.visit_body(&class.body)?;
                self.leave();
            }
            StatementKind::Match { subject, cases } => {
                self.visit_expr(subject)?;
                for case in cases {
                    self.visit_pattern(&case.pattern)?;
                    if let Some(guard) = &case.guard {
                        self.visit_expr(guard)?;
                    }
                    self.visit_body(&case.body)?;
                }
            }
        }
        Ok(())
    }

    fn visit_pattern(&mut self, pattern: &Pattern) -> CompileResult<()> {
        match &pattern.kind {
            PatternKind::Value(value) => self.visit_expr(value)?,
            PatternKind::Singleton(_) => {}
            PatternKind::Sequence(items) | PatternKind::Or(items) => {
                for item in items {
                    self.visit_pattern(item)?;
                }
            }
            PatternKind::Star(name) => {
                if let Some(name) = name {
                    self.bind(name, DeclaredVia::PatternCapture, pattern.span);
                }
            }
            PatternKind::Mapping {
                keys,
                patterns,
                rest,
            } => {
                for key in keys {
                    self.visit_expr(key)?;
                }
                for item in patterns {
                    self.visit_pattern(item)?;
                }
                if let Some(rest) = rest {
                    self.bind(rest, DeclaredVia::PatternCapture, pattern.span);
                }
            }
            PatternKind::Class {
                cls,
                patterns,
                kwd_patterns,
                ..
            } => {
                self.visit_expr(cls)?;
                for item in patterns.iter().chain(kwd_patterns) {
                    self.visit_pattern(item)?;
                }
            }
            PatternKind::As { pattern: inner, name } => {
                if let Some(inner) = inner {
                    self.visit_pattern(inner)?;
                }
                if let Some(name) = name {
                    self.bind(name, DeclaredVia::PatternCapture, pattern.span);
                }
            }
        }
        Ok(())
    }

    fn visit_target(&mut self, target: &Expression, via: DeclaredVia) -> CompileResult<()> {
        match &target.kind {
            ExpressionKind::Name(name) => self.bind(name, via, target.span),
            ExpressionKind::Tuple(elements) | ExpressionKind::List(elements) => {
                for element in elements {
                    self.visit_target(element, via)?;
                }
            }
            ExpressionKind::Starred(inner) => self.visit_target(inner, via)?,
            // Invalid targets are rejected during lowering.
            _ => self.visit_expr(target)?,
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &Expression) -> CompileResult<()> {
        let span = expr.span;
        match &expr.kind {
            ExpressionKind::Name(name) => self.use_name(name, span),
            ExpressionKind::Constant(_) => {}
            ExpressionKind::BoolOp { values, .. } => {
                for value in values {
                    self.visit_expr(value)?;
                }
            }
            ExpressionKind::NamedExpr { target, value } => {
                self.visit_expr(value)?;
                if self.kind() == ScopeKind::Comprehension {
                    self.bind_walrus_in_comprehension(target, span)?;
                } else {
                    self.bind(target, DeclaredVia::Assignment, span);
                }
            }
            ExpressionKind::BinOp { left, right, .. } => {
                self.visit_expr(left)?;
                self.visit_expr(right)?;
            }
            ExpressionKind::UnaryOp { operand, .. } => self.visit_expr(operand)?,
            ExpressionKind::Lambda { params, body } => {
                self.visit_parameter_defaults(params)?;
                self.enter(ScopeKind::Lambda, "<lambda>", span);
                self.add_parameters(params)?;
                self.visit_expr(body)?;
                self.leave();
            }
            ExpressionKind::IfExp { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_expr(body)?;
                self.visit_expr(orelse)?;
            }
            ExpressionKind::Dict(items) => {
                for (key, value) in items {
                    if let Some(key) = key {
                        self.visit_expr(key)?;
                    }
                    self.visit_expr(value)?;
                }
            }
            ExpressionKind::Set(elements)
            | ExpressionKind::List(elements)
            | ExpressionKind::Tuple(elements) => {
                for element in elements {
                    self.visit_expr(element)?;
                }
            }
            ExpressionKind::ListComp {
                element,
                generators,
            } => self.visit_comprehension("<listcomp>", span, generators, &[element], false)?,
            ExpressionKind::SetComp {
                element,
                generators,
            } => self.visit_comprehension("<setcomp>", span, generators, &[element], false)?,
            ExpressionKind::GeneratorExp {
                element,
                generators,
            } => self.visit_comprehension("<genexpr>", span, generators, &[element], true)?,
            ExpressionKind::DictComp {
                key,
                value,
                generators,
            } => self.visit_comprehension("<dictcomp>", span, generators, &[key, value], false)?,
            ExpressionKind::Await(value) => {
                let scope = self.table.scope(self.current());
                if scope.kind != ScopeKind::Function || !scope.is_coroutine {
                    return Err(CompileError::lowering(
                        "'await' outside async function",
                        span,
                    ));
                }
                self.visit_expr(value)?;
            }
            ExpressionKind::Yield(value) => {
                self.mark_generator(span)?;
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            ExpressionKind::YieldFrom(value) => {
                self.mark_generator(span)?;
                if self.table.scope(self.current()).is_coroutine {
                    return Err(CompileError::lowering(
                        "'yield from' inside async function",
                        span,
                    ));
                }
                self.visit_expr(value)?;
            }
            ExpressionKind::Compare {
                left, comparators, ..
            } => {
                self.visit_expr(left)?;
                for comparator in comparators {
                    self.visit_expr(comparator)?;
                }
            }
            ExpressionKind::Call {
                func,
                args,
                keywords,
            } => {
                self.visit_expr(func)?;
                for arg in args {
                    self.visit_expr(arg)?;
                }
                for keyword in keywords {
                    self.visit_expr(&keyword.value)?;
                }
            }
            ExpressionKind::FString(parts) => self.visit_fstring(parts)?,
            ExpressionKind::Attribute { value, .. } => self.visit_expr(value)?,
            ExpressionKind::Subscript { value, index } => {
                self.visit_expr(value)?;
                self.visit_expr(index)?;
            }
            ExpressionKind::Starred(value) => self.visit_expr(value)?,
            ExpressionKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part)?;
                }
            }
        }
        Ok(())
    }

    fn visit_fstring(&mut self, parts: &[FStringPart]) -> CompileResult<()> {
        for part in parts {
            if let FStringPart::Field {
                value, format_spec, ..
            } = part
            {
                self.visit_expr(value)?;
                if let Some(spec) = format_spec {
                    self.visit_fstring(spec)?;
                }
            }
        }
        Ok(())
    }

    fn mark_generator(&mut self, span: Span) -> CompileResult<()> {
        let scope = self.current();
        match self.kind() {
            ScopeKind::Function | ScopeKind::Lambda => {
                self.table.scope_mut(scope).is_generator = true;
                Ok(())
            }
            ScopeKind::Comprehension => Err(CompileError::lowering(
                "'yield' inside comprehension",
                span,
            )),
            ScopeKind::Module | ScopeKind::Class => {
                Err(CompileError::lowering("'yield' outside function", span))
            }
        }
    }

    /// Comprehensions evaluate their first iterable in the enclosing scope and
    /// everything else in a synthetic function scope whose only parameter is
    /// the iterator `.0`.
    fn visit_comprehension(
        &mut self,
        name: &str,
        span: Span,
        generators: &[Comprehension],
        elements: &[&Expression],
        is_generator: bool,
    ) -> CompileResult<()> {
        let Some(first) = generators.first() else {
            return Err(CompileError::lowering("comprehension without 'for'", span));
        };
        if generators.iter().any(|generator| generator.is_async) {
            return Err(CompileError::lowering(
                "asynchronous comprehensions are not supported",
                span,
            ));
        }
        self.visit_expr(&first.iter)?;

        let scope = self.enter(ScopeKind::Comprehension, name, span);
        {
            let symbol = self.symbol_mut(scope, ".0", span);
            symbol.is_parameter = true;
            symbol.is_bound = true;
            symbol.declared_via = Some(DeclaredVia::Parameter);
        }
        let scope_record = self.table.scope_mut(scope);
        scope_record.params = vec![".0".to_string()];
        scope_record.is_generator = is_generator;

        for (index, generator) in generators.iter().enumerate() {
            if index > 0 {
                self.visit_expr(&generator.iter)?;
            }
            self.visit_target(&generator.target, DeclaredVia::ComprehensionTarget)?;
            for condition in &generator.ifs {
                self.visit_expr(condition)?;
            }
        }
        for element in elements {
            self.visit_expr(element)?;
        }
        self.leave();
        Ok(())
    }

    /// `:=` inside a comprehension binds in the nearest enclosing scope that is
    /// not a comprehension; the comprehensions in between forward the name.
    fn bind_walrus_in_comprehension(&mut self, name: &str, span: Span) -> CompileResult<()> {
        let mut depth = self.stack.len() - 1;
        while self.table.scope(self.stack[depth]).kind == ScopeKind::Comprehension {
            let scope = self.table.scope(self.stack[depth]);
            if scope
                .symbol(name)
                .is_some_and(|symbol| symbol.declared_via == Some(DeclaredVia::ComprehensionTarget))
            {
                return Err(CompileError::conflict(
                    &scope.name,
                    name,
                    "assignment expression cannot rebind comprehension iteration variable",
                    span,
                ));
            }
            depth -= 1;
        }

        let target = self.stack[depth];
        let target_kind = self.table.scope(target).kind;
        if target_kind == ScopeKind::Class {
            return Err(CompileError::lowering(
                "assignment expression within a comprehension cannot be used in a class body",
                span,
            ));
        }
        let symbol = self.symbol_mut(target, name, span);
        symbol.is_bound = true;
        symbol.walrus_target = true;
        symbol.declared_via.get_or_insert(DeclaredVia::Assignment);

        for index in depth + 1..self.stack.len() {
            let scope = self.stack[index];
            let symbol = self.symbol_mut(scope, name, span);
            if target_kind == ScopeKind::Module {
                symbol.explicit_global = true;
            } else {
                symbol.is_nonlocal = true;
            }
        }
        Ok(())
    }
}
