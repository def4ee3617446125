use crate::ast::{
    BoolOperator, ComparisonOperator, Comprehension, Constant as AstConstant, Expression,
    ExpressionKind, FStringPart, Keyword,
};
use crate::bytecode::{Constant, Conversion, Instruction, ParamSpec};
use crate::symtable::{ScopeKind, Storage};

use super::ir::{AttrOp, IrOp, JumpKind};
use super::stmt::param_spec;
use super::{CompileError, CompileResult, Compiler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComprehensionKind {
    List,
    Set,
    Dict,
    Generator,
}

impl ComprehensionKind {
    fn code_name(self) -> &'static str {
        match self {
            ComprehensionKind::List => "<listcomp>",
            ComprehensionKind::Set => "<setcomp>",
            ComprehensionKind::Dict => "<dictcomp>",
            ComprehensionKind::Generator => "<genexpr>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Display {
    Tuple,
    List,
    Set,
}

impl<'a> Compiler<'a> {
    pub(super) fn compile_expr(&mut self, expr: &'a Expression) -> CompileResult<()> {
        let saved = self.set_line(expr.span.line);
        let result = self.compile_expr_kind(expr);
        self.restore_line(saved);
        result
    }

    fn compile_expr_kind(&mut self, expr: &'a Expression) -> CompileResult<()> {
        match &expr.kind {
            ExpressionKind::BoolOp { op, values } => {
                let end = self.new_block();
                let kind = match op {
                    BoolOperator::And => JumpKind::IfFalseOrPop,
                    BoolOperator::Or => JumpKind::IfTrueOrPop,
                };
                let Some((last, rest)) = values.split_last() else {
                    return Err(CompileError::internal("boolean operation without operands"));
                };
                for value in rest {
                    self.compile_expr(value)?;
                    self.jump(kind, end);
                }
                self.compile_expr(last)?;
                self.switch_to(end);
            }
            ExpressionKind::NamedExpr { target, value } => {
                self.compile_expr(value)?;
                self.op(Instruction::Copy(1));
                self.store_name(target);
            }
            ExpressionKind::BinOp { left, op, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.op(Instruction::BinaryOp {
                    op: *op,
                    inplace: false,
                });
            }
            ExpressionKind::UnaryOp { op, operand } => {
                self.compile_expr(operand)?;
                self.op(Instruction::UnaryOp(*op));
            }
            ExpressionKind::Lambda { params, body } => {
                let flags = self.compile_defaults(params)?;
                self.enter_scope("<lambda>", expr.span)?;
                self.set_params(param_spec(params));
                self.compile_expr(body)?;
                if self.unit().ir.flags.is_generator {
                    self.op(Instruction::PopTop);
                    self.load_const(Constant::None);
                }
                self.op(Instruction::ReturnValue);
                let code = self.exit_scope()?;
                self.make_closure(code, flags);
            }
            ExpressionKind::IfExp { test, body, orelse } => {
                let otherwise = self.new_block();
                let end = self.new_block();
                self.compile_jump_if(test, false, otherwise)?;
                self.compile_expr(body)?;
                self.jump(JumpKind::Always, end);
                self.switch_to(otherwise);
                self.compile_expr(orelse)?;
                self.switch_to(end);
            }
            ExpressionKind::Dict(items) => self.compile_dict(items)?,
            ExpressionKind::Set(elements) => self.compile_display(elements, Display::Set)?,
            ExpressionKind::List(elements) => self.compile_display(elements, Display::List)?,
            ExpressionKind::Tuple(elements) => {
                if let Some(folded) = fold_constant_tuple(elements) {
                    self.load_const(folded);
                } else {
                    self.compile_display(elements, Display::Tuple)?;
                }
            }
            ExpressionKind::ListComp {
                element,
                generators,
            } => self.compile_comprehension(
                ComprehensionKind::List,
                expr,
                generators,
                element,
                None,
            )?,
            ExpressionKind::SetComp {
                element,
                generators,
            } => self.compile_comprehension(
                ComprehensionKind::Set,
                expr,
                generators,
                element,
                None,
            )?,
            ExpressionKind::DictComp {
                key,
                value,
                generators,
            } => self.compile_comprehension(
                ComprehensionKind::Dict,
                expr,
                generators,
                key,
                Some(value),
            )?,
            ExpressionKind::GeneratorExp {
                element,
                generators,
            } => self.compile_comprehension(
                ComprehensionKind::Generator,
                expr,
                generators,
                element,
                None,
            )?,
            ExpressionKind::Await(value) => {
                self.compile_expr(value)?;
                self.op(Instruction::GetAwaitable);
                self.load_const(Constant::None);
                self.compile_yield_from_loop();
            }
            ExpressionKind::Yield(value) => {
                match value {
                    Some(value) => self.compile_expr(value)?,
                    None => self.load_const(Constant::None),
                }
                self.op(Instruction::YieldValue);
            }
            ExpressionKind::YieldFrom(value) => {
                self.compile_expr(value)?;
                self.op(Instruction::GetYieldFromIter);
                self.load_const(Constant::None);
                self.compile_yield_from_loop();
            }
            ExpressionKind::Compare {
                left,
                ops,
                comparators,
            } => self.compile_compare(left, ops, comparators)?,
            ExpressionKind::Call {
                func,
                args,
                keywords,
            } => {
                if self.is_zero_arg_super(func, args, keywords) {
                    self.compile_zero_arg_super();
                } else {
                    self.compile_expr(func)?;
                    self.compile_call_arguments(0, args, keywords)?;
                }
            }
            ExpressionKind::FString(parts) => {
                let count = self.compile_fstring_parts(parts)?;
                match count {
                    0 => self.load_const(Constant::str("")),
                    1 => {}
                    n => self.op(Instruction::BuildString(n)),
                }
            }
            ExpressionKind::Constant(constant) => self.load_const(constant_of(constant)),
            ExpressionKind::Attribute { value, attr } => {
                self.compile_expr(value)?;
                self.emit(IrOp::Attr(AttrOp::Load, attr.clone()));
            }
            ExpressionKind::Subscript { value, index } => {
                self.compile_expr(value)?;
                self.compile_expr(index)?;
                self.op(Instruction::BinarySubscr);
            }
            ExpressionKind::Starred(_) => {
                return Err(CompileError::lowering(
                    "can't use starred expression here",
                    expr.span,
                ));
            }
            ExpressionKind::Name(name) => self.load_name(name),
            ExpressionKind::Slice { lower, upper, step } => {
                for bound in [lower, upper] {
                    match bound {
                        Some(bound) => self.compile_expr(bound)?,
                        None => self.load_const(Constant::None),
                    }
                }
                match step {
                    Some(step) => {
                        self.compile_expr(step)?;
                        self.op(Instruction::BuildSlice(3));
                    }
                    None => self.op(Instruction::BuildSlice(2)),
                }
            }
        }
        Ok(())
    }

    /// `[receiver, value]` on the stack: delegate until the receiver returns.
    fn compile_yield_from_loop(&mut self) {
        let start = self.new_block();
        let exit = self.new_block();
        self.switch_to(start);
        self.jump(JumpKind::Send, exit);
        self.op(Instruction::YieldValue);
        self.jump(JumpKind::Always, start);
        self.switch_to(exit);
    }

    fn compile_compare(
        &mut self,
        left: &'a Expression,
        ops: &[ComparisonOperator],
        comparators: &'a [Expression],
    ) -> CompileResult<()> {
        self.compile_expr(left)?;
        let Some((last_op, chained_ops)) = ops.split_last() else {
            return Err(CompileError::internal("comparison without operators"));
        };
        if chained_ops.is_empty() {
            self.compile_expr(&comparators[0])?;
            self.op(compare_instruction(*last_op));
            return Ok(());
        }

        // a < b < c: keep `b` under the partial result and bail out on the
        // first false comparison.
        let cleanup = self.new_block();
        let end = self.new_block();
        for (op, comparator) in chained_ops.iter().zip(comparators) {
            self.compile_expr(comparator)?;
            self.op(Instruction::Swap(2));
            self.op(Instruction::Copy(2));
            self.op(compare_instruction(*op));
            self.jump(JumpKind::IfFalseOrPop, cleanup);
        }
        let last = comparators
            .last()
            .ok_or_else(|| CompileError::internal("comparison without operands"))?;
        self.compile_expr(last)?;
        self.op(compare_instruction(*last_op));
        self.jump(JumpKind::Always, end);

        self.switch_to(cleanup);
        self.op(Instruction::Swap(2));
        self.op(Instruction::PopTop);
        self.switch_to(end);
        Ok(())
    }

    // ---- displays --------------------------------------------------------

    fn compile_display(&mut self, elements: &'a [Expression], display: Display) -> CompileResult<()> {
        let count = elements.len() as u32;
        let has_star = elements
            .iter()
            .any(|element| matches!(element.kind, ExpressionKind::Starred(_)));
        if !has_star {
            for element in elements {
                self.compile_expr(element)?;
            }
            self.op(match display {
                Display::Tuple => Instruction::BuildTuple(count),
                Display::List => Instruction::BuildList(count),
                Display::Set => Instruction::BuildSet(count),
            });
            return Ok(());
        }

        let (build, add, extend) = match display {
            Display::Tuple | Display::List => (
                Instruction::BuildList(0),
                Instruction::ListAppend(1),
                Instruction::ListExtend(1),
            ),
            Display::Set => (
                Instruction::BuildSet(0),
                Instruction::SetAdd(1),
                Instruction::SetUpdate(1),
            ),
        };
        self.op(build);
        for element in elements {
            match &element.kind {
                ExpressionKind::Starred(inner) => {
                    self.compile_expr(inner)?;
                    self.op(extend);
                }
                _ => {
                    self.compile_expr(element)?;
                    self.op(add);
                }
            }
        }
        if display == Display::Tuple {
            self.op(Instruction::ListToTuple);
        }
        Ok(())
    }

    fn compile_dict(&mut self, items: &'a [(Option<Expression>, Expression)]) -> CompileResult<()> {
        let mut pending = 0;
        let mut have_dict = false;
        for (key, value) in items {
            match key {
                Some(key) => {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                    pending += 1;
                }
                None => {
                    if pending > 0 || !have_dict {
                        self.op(Instruction::BuildMap(pending));
                        if have_dict {
                            self.op(Instruction::DictUpdate(1));
                        }
                        have_dict = true;
                        pending = 0;
                    }
                    self.compile_expr(value)?;
                    self.op(Instruction::DictUpdate(1));
                }
            }
        }
        if pending > 0 || !have_dict {
            self.op(Instruction::BuildMap(pending));
            if have_dict {
                self.op(Instruction::DictUpdate(1));
            }
        }
        Ok(())
    }

    // ---- calls -----------------------------------------------------------

    /// Pushes the arguments of a call whose callable (and `n_pre` extra
    /// leading positional arguments) is already on the stack, then calls.
    pub(super) fn compile_call_arguments(
        &mut self,
        n_pre: u32,
        args: &'a [Expression],
        keywords: &'a [Keyword],
    ) -> CompileResult<()> {
        for (index, keyword) in keywords.iter().enumerate() {
            if let Some(name) = &keyword.arg
                && keywords[..index]
                    .iter()
                    .any(|earlier| earlier.arg.as_deref() == Some(name))
            {
                return Err(CompileError::lowering(
                    format!("keyword argument repeated: {name}"),
                    keyword.value.span,
                ));
            }
        }

        let has_star = args
            .iter()
            .any(|arg| matches!(arg.kind, ExpressionKind::Starred(_)))
            || keywords.iter().any(|keyword| keyword.arg.is_none());

        if !has_star {
            for arg in args {
                self.compile_expr(arg)?;
            }
            let positional = n_pre + args.len() as u32;
            if keywords.is_empty() {
                self.op(Instruction::Call(positional));
            } else {
                let mut names = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    self.compile_expr(&keyword.value)?;
                    names.push(Constant::str(keyword.arg.as_deref().unwrap_or_default()));
                }
                self.load_const(Constant::Tuple(names));
                self.op(Instruction::CallKw(positional + keywords.len() as u32));
            }
            return Ok(());
        }

        self.op(Instruction::BuildList(n_pre));
        for arg in args {
            match &arg.kind {
                ExpressionKind::Starred(inner) => {
                    self.compile_expr(inner)?;
                    self.op(Instruction::ListExtend(1));
                }
                _ => {
                    self.compile_expr(arg)?;
                    self.op(Instruction::ListAppend(1));
                }
            }
        }
        self.op(Instruction::ListToTuple);

        let has_kwargs = !keywords.is_empty();
        if has_kwargs {
            self.op(Instruction::BuildMap(0));
            for keyword in keywords {
                if let Some(name) = &keyword.arg {
                    self.load_const(Constant::str(name));
                    self.compile_expr(&keyword.value)?;
                    self.op(Instruction::BuildMap(1));
                } else {
                    self.compile_expr(&keyword.value)?;
                }
                self.op(Instruction::DictMerge(1));
            }
        }
        self.op(Instruction::CallEx { has_kwargs });
        Ok(())
    }

    /// `super()` with no arguments inside a method body.
    fn is_zero_arg_super(
        &self,
        func: &Expression,
        args: &[Expression],
        keywords: &[Keyword],
    ) -> bool {
        if !args.is_empty() || !keywords.is_empty() {
            return false;
        }
        if !matches!(&func.kind, ExpressionKind::Name(name) if name == "super") {
            return false;
        }
        let scope_id = self.unit().scope;
        let scope = self.table.scope(scope_id);
        matches!(scope.kind, ScopeKind::Function | ScopeKind::Lambda)
            && !scope.params.is_empty()
            && matches!(
                self.table.storage(scope_id, "super"),
                Storage::Global | Storage::Builtin
            )
            && self.table.storage(scope_id, "__class__") == Storage::Free
    }

    fn compile_zero_arg_super(&mut self) {
        let first_param = self.table.scope(self.unit().scope).params[0].clone();
        self.load_name("super");
        self.load_name("__class__");
        self.load_name(&first_param);
        self.op(Instruction::Call(2));
    }

    // ---- f-strings -------------------------------------------------------

    /// Pushes one string per part and returns how many were pushed.
    fn compile_fstring_parts(&mut self, parts: &'a [FStringPart]) -> CompileResult<u32> {
        let mut count = 0;
        for part in parts {
            match part {
                FStringPart::Literal(text) => {
                    if !text.is_empty() {
                        self.load_const(Constant::str(text));
                        count += 1;
                    }
                }
                FStringPart::Field {
                    value,
                    conversion,
                    format_spec,
                    debug_text,
                } => {
                    if let Some(text) = debug_text {
                        self.load_const(Constant::str(text));
                        count += 1;
                    }
                    self.compile_expr(value)?;
                    let mut conversion = Conversion::from_char(*conversion);
                    // `{x=}` shows the repr unless a format spec is given.
                    if debug_text.is_some()
                        && conversion == Conversion::None
                        && format_spec.is_none()
                    {
                        conversion = Conversion::Repr;
                    }
                    let has_spec = match format_spec {
                        Some(spec) => {
                            match self.compile_fstring_parts(spec)? {
                                0 => self.load_const(Constant::str("")),
                                1 => {}
                                n => self.op(Instruction::BuildString(n)),
                            }
                            true
                        }
                        None => false,
                    };
                    self.op(Instruction::FormatValue {
                        conversion,
                        has_spec,
                    });
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    // ---- comprehensions --------------------------------------------------

    /// Comprehensions run in their own function, called with the iterator of
    /// the first `for` clause evaluated in the enclosing scope.
    fn compile_comprehension(
        &mut self,
        kind: ComprehensionKind,
        expr: &'a Expression,
        generators: &'a [Comprehension],
        element: &'a Expression,
        value: Option<&'a Expression>,
    ) -> CompileResult<()> {
        let first = generators
            .first()
            .ok_or_else(|| CompileError::lowering("comprehension without 'for'", expr.span))?;

        self.enter_scope(kind.code_name(), expr.span)?;
        self.set_params(ParamSpec {
            positional_count: 1,
            ..ParamSpec::default()
        });
        match kind {
            ComprehensionKind::List => self.op(Instruction::BuildList(0)),
            ComprehensionKind::Set => self.op(Instruction::BuildSet(0)),
            ComprehensionKind::Dict => self.op(Instruction::BuildMap(0)),
            ComprehensionKind::Generator => {}
        }
        self.compile_comprehension_generator(kind, generators, 0, element, value)?;
        if kind == ComprehensionKind::Generator {
            self.load_const(Constant::None);
        }
        self.op(Instruction::ReturnValue);
        let code = self.exit_scope()?;

        self.make_closure(code, 0);
        self.compile_expr(&first.iter)?;
        self.op(Instruction::GetIter);
        self.op(Instruction::Call(1));
        Ok(())
    }

    fn compile_comprehension_generator(
        &mut self,
        kind: ComprehensionKind,
        generators: &'a [Comprehension],
        index: usize,
        element: &'a Expression,
        value: Option<&'a Expression>,
    ) -> CompileResult<()> {
        let generator = &generators[index];
        let start = self.new_block();
        let exhausted = self.new_block();

        if index == 0 {
            self.load_name(".0");
        } else {
            self.compile_expr(&generator.iter)?;
            self.op(Instruction::GetIter);
        }
        self.switch_to(start);
        self.jump(JumpKind::ForIter, exhausted);
        self.compile_store(&generator.target)?;
        for condition in &generator.ifs {
            self.compile_jump_if(condition, false, start)?;
        }

        if index + 1 < generators.len() {
            self.compile_comprehension_generator(kind, generators, index + 1, element, value)?;
        } else {
            // Accumulator sits below one iterator per `for` clause.
            let depth = generators.len() as u32 + 1;
            match kind {
                ComprehensionKind::Generator => {
                    self.compile_expr(element)?;
                    self.op(Instruction::YieldValue);
                    self.op(Instruction::PopTop);
                }
                ComprehensionKind::List => {
                    self.compile_expr(element)?;
                    self.op(Instruction::ListAppend(depth));
                }
                ComprehensionKind::Set => {
                    self.compile_expr(element)?;
                    self.op(Instruction::SetAdd(depth));
                }
                ComprehensionKind::Dict => {
                    let value = value
                        .ok_or_else(|| CompileError::internal("dict comprehension without value"))?;
                    self.compile_expr(element)?;
                    self.compile_expr(value)?;
                    self.op(Instruction::MapAdd(depth));
                }
            }
        }
        self.jump(JumpKind::Always, start);
        self.switch_to(exhausted);
        Ok(())
    }
}

fn compare_instruction(op: ComparisonOperator) -> Instruction {
    match op {
        ComparisonOperator::Is => Instruction::IsOp(false),
        ComparisonOperator::IsNot => Instruction::IsOp(true),
        ComparisonOperator::In => Instruction::ContainsOp(false),
        ComparisonOperator::NotIn => Instruction::ContainsOp(true),
        other => Instruction::CompareOp(other),
    }
}

pub(super) fn constant_of(constant: &AstConstant) -> Constant {
    match constant {
        AstConstant::None => Constant::None,
        AstConstant::Bool(value) => Constant::Bool(*value),
        AstConstant::Int(value) => Constant::Int(*value),
        AstConstant::Float(value) => Constant::Float(*value),
        AstConstant::Str(value) => Constant::str(value),
        AstConstant::Ellipsis => Constant::Ellipsis,
    }
}

fn fold_constant_tuple(elements: &[Expression]) -> Option<Constant> {
    elements
        .iter()
        .map(|element| match &element.kind {
            ExpressionKind::Constant(constant) => Some(constant_of(constant)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .map(Constant::Tuple)
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{CodeObject, Constant, Instruction};
    use crate::compiler::{CompileOptions, compile};
    use crate::parser::parse;
    use std::sync::Arc;

    fn compile_source(source: &str) -> Arc<CodeObject> {
        compile(&parse(source).expect("parse"), CompileOptions::default()).expect("compile")
    }

    #[test]
    fn chained_comparison_evaluates_middle_operand_once() {
        let code = compile_source("r = a < b < c\n");
        let loads_b = code
            .instructions
            .iter()
            .filter(|instruction| **instruction == Instruction::LoadName(1))
            .count();
        assert_eq!(loads_b, 1);
        assert!(
            code.instructions
                .iter()
                .any(|instruction| matches!(instruction, Instruction::JumpIfFalseOrPop(_)))
        );
    }

    #[test]
    fn constant_tuples_are_folded() {
        let code = compile_source("t = (1, 'a', None)\n");
        assert!(code.constants.iter().any(|constant| matches!(
            constant,
            Constant::Tuple(items) if items.len() == 3
        )));
        assert!(
            !code
                .instructions
                .iter()
                .any(|instruction| matches!(instruction, Instruction::BuildTuple(_)))
        );
    }

    #[test]
    fn keyword_calls_pass_a_names_tuple() {
        let code = compile_source("f(1, x=2, y=3)\n");
        assert!(code.instructions.contains(&Instruction::CallKw(3)));
    }

    #[test]
    fn star_arguments_use_the_unpacking_call() {
        let code = compile_source("f(*a, **k)\n");
        assert!(code.instructions.contains(&Instruction::ListToTuple));
        assert!(
            code.instructions
                .contains(&Instruction::CallEx { has_kwargs: true })
        );
    }

    #[test]
    fn repeated_keywords_are_rejected() {
        let program = parse("f(a=1, a=2)\n").expect("parse");
        assert!(compile(&program, CompileOptions::default()).is_err());
    }

    #[test]
    fn zero_argument_super_loads_class_cell_and_first_parameter() {
        let code = compile_source(
            "class A:\n    def f(self):\n        return super().f()\n",
        );
        let class_body = code.children().next().expect("class body");
        let method = class_body.children().next().expect("method");
        assert!(method.instructions.contains(&Instruction::LoadDeref(0)));
        assert!(method.instructions.contains(&Instruction::LoadFast(0)));
        assert!(method.instructions.contains(&Instruction::Call(2)));
    }

    #[test]
    fn debug_fstring_fields_emit_their_source_text() {
        let code = compile_source("x = 1\ns = f'{x=}'\n");
        assert!(
            code.constants
                .iter()
                .any(|constant| matches!(constant, Constant::Str(text) if text == "x="))
        );
        assert!(code.instructions.contains(&Instruction::BuildString(2)));
    }
}
