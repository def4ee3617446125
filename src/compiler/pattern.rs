//! Lowering of `match` statements.
//!
//! A pattern consumes the subject on top of the stack. Captured values are
//! not stored as they are found: they pile up on the stack (below whatever the
//! pattern is still working on) and are only written to their names once the
//! whole pattern matched. On failure the pattern jumps to one of the
//! `fail_pop` blocks, each of which pops one more item than the next.

use rustc_hash::FxHashSet;

use crate::ast::{
    BinaryOperator, ComparisonOperator, Constant as AstConstant, Expression, ExpressionKind,
    MatchCase, Pattern, PatternKind,
};
use crate::bytecode::{ConstKey, Constant, Instruction};
use crate::token::Span;

use super::expr::constant_of;
use super::ir::{BlockId, JumpKind, NameOp};
use super::{CompileError, CompileResult, Compiler};

#[derive(Debug, Default)]
struct PatternContext {
    /// Names captured so far, in the order their values sit on the stack.
    stores: Vec<String>,
    allow_irrefutable: bool,
    fail_pop: Vec<BlockId>,
    /// Items above the captured values that a failure must also pop.
    on_top: usize,
}

fn is_wildcard(pattern: &Pattern) -> bool {
    matches!(
        pattern.kind,
        PatternKind::As {
            pattern: None,
            name: None
        }
    )
}

fn is_star_wildcard(pattern: &Pattern) -> bool {
    matches!(pattern.kind, PatternKind::Star(None))
}

impl<'a> Compiler<'a> {
    pub(super) fn compile_match(
        &mut self,
        subject: &'a Expression,
        cases: &'a [MatchCase],
    ) -> CompileResult<()> {
        self.compile_expr(subject)?;
        let end = self.new_block();
        let Some(last) = cases.last() else {
            return Err(CompileError::internal("match statement without cases"));
        };
        let has_default = cases.len() > 1 && is_wildcard(&last.pattern);
        let checked = &cases[..cases.len() - usize::from(has_default)];

        for (index, case) in checked.iter().enumerate() {
            let saved_line = self.set_line(case.pattern.span.line);
            let next = self.new_block();

            // Bindings the pattern may overwrite are saved so that a failing
            // guard can put them back.
            let saved = match &case.guard {
                Some(_) => capture_names(&case.pattern),
                None => Vec::new(),
            };
            for name in &saved {
                self.name_op(name, NameOp::Save);
            }
            self.op(Instruction::Copy(saved.len() as u32 + 1));

            let mut pc = PatternContext {
                allow_irrefutable: case.guard.is_some() || index + 1 == cases.len(),
                ..PatternContext::default()
            };
            self.compile_pattern(&case.pattern, &mut pc)?;
            for name in &pc.stores {
                self.store_name(name);
            }

            let guard_failed = match &case.guard {
                Some(guard) => {
                    let guard_failed = self.new_block();
                    self.compile_jump_if(guard, false, guard_failed)?;
                    for _ in &saved {
                        self.op(Instruction::PopTop);
                    }
                    Some(guard_failed)
                }
                None => None,
            };
            self.op(Instruction::PopTop);
            self.restore_line(saved_line);
            self.compile_body(&case.body)?;
            let saved_line = self.set_line(case.pattern.span.line);
            self.jump(JumpKind::Always, end);

            if let Some(guard_failed) = guard_failed {
                self.switch_to(guard_failed);
                for name in saved.iter().rev() {
                    self.name_op(name, NameOp::Restore);
                }
                self.jump(JumpKind::Always, next);
            }

            if self.emit_and_reset_fail_pop(&mut pc) {
                for _ in &saved {
                    self.op(Instruction::PopTop);
                }
            }
            self.switch_to(next);
            self.restore_line(saved_line);
        }

        // No case matched.
        self.op(Instruction::PopTop);
        if has_default {
            if let Some(guard) = &last.guard {
                self.compile_jump_if(guard, false, end)?;
            }
            self.compile_body(&last.body)?;
        }
        self.switch_to(end);
        Ok(())
    }

    fn compile_pattern(&mut self, pattern: &'a Pattern, pc: &mut PatternContext) -> CompileResult<()> {
        let saved = self.set_line(pattern.span.line);
        let result = match &pattern.kind {
            PatternKind::Value(value) => {
                self.compile_expr(value)?;
                self.op(Instruction::CompareOp(ComparisonOperator::Eq));
                self.jump_to_fail_pop(pc, JumpKind::IfFalse);
                Ok(())
            }
            PatternKind::Singleton(constant) => {
                self.load_const(constant_of(constant));
                self.op(Instruction::IsOp(false));
                self.jump_to_fail_pop(pc, JumpKind::IfFalse);
                Ok(())
            }
            PatternKind::Sequence(patterns) => self.compile_sequence_pattern(patterns, pattern.span, pc),
            PatternKind::Star(name) => self.store_capture(name.as_deref(), pattern.span, pc),
            PatternKind::Mapping {
                keys,
                patterns,
                rest,
            } => self.compile_mapping_pattern(keys, patterns, rest.as_deref(), pattern.span, pc),
            PatternKind::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            } => self.compile_class_pattern(cls, patterns, kwd_attrs, kwd_patterns, pattern.span, pc),
            PatternKind::As {
                pattern: inner,
                name,
            } => self.compile_as_pattern(inner.as_deref(), name.as_deref(), pattern.span, pc),
            PatternKind::Or(alternatives) => self.compile_or_pattern(alternatives, pattern.span, pc),
        };
        self.restore_line(saved);
        result
    }

    /// Nested patterns may always be irrefutable.
    fn compile_subpattern(&mut self, pattern: &'a Pattern, pc: &mut PatternContext) -> CompileResult<()> {
        let allow = std::mem::replace(&mut pc.allow_irrefutable, true);
        let result = self.compile_pattern(pattern, pc);
        pc.allow_irrefutable = allow;
        result
    }

    // ---- failure paths ---------------------------------------------------

    fn ensure_fail_pop(&mut self, pc: &mut PatternContext, pops: usize) {
        while pc.fail_pop.len() <= pops {
            let block = self.new_block();
            pc.fail_pop.push(block);
        }
    }

    fn jump_to_fail_pop(&mut self, pc: &mut PatternContext, kind: JumpKind) {
        let pops = pc.on_top + pc.stores.len();
        self.ensure_fail_pop(pc, pops);
        self.jump(kind, pc.fail_pop[pops]);
    }

    /// Lays out the failure blocks; returns false when nothing can fail.
    fn emit_and_reset_fail_pop(&mut self, pc: &mut PatternContext) -> bool {
        let Some((&first, rest)) = pc.fail_pop.split_first() else {
            return false;
        };
        for &block in rest.iter().rev() {
            self.switch_to(block);
            self.op(Instruction::PopTop);
        }
        self.switch_to(first);
        pc.fail_pop.clear();
        true
    }

    // ---- captures --------------------------------------------------------

    /// Moves the top of the stack below everything the pattern still holds
    /// and records it as a pending store for `name`.
    fn store_capture(&mut self, name: Option<&str>, span: Span, pc: &mut PatternContext) -> CompileResult<()> {
        let Some(name) = name else {
            self.op(Instruction::PopTop);
            return Ok(());
        };
        if pc.stores.iter().any(|stored| stored == name) {
            return Err(CompileError::lowering(
                format!("multiple assignments to name '{name}' in pattern"),
                span,
            ));
        }
        self.rotate(pc.on_top + pc.stores.len() + 1);
        pc.stores.push(name.to_string());
        Ok(())
    }

    /// Moves the top item down to position `count`.
    fn rotate(&mut self, count: usize) {
        for depth in (2..=count).rev() {
            self.op(Instruction::Swap(depth as u32));
        }
    }

    fn compile_as_pattern(
        &mut self,
        inner: Option<&'a Pattern>,
        name: Option<&str>,
        span: Span,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        let Some(inner) = inner else {
            if !pc.allow_irrefutable {
                let message = match name {
                    Some(name) => format!("name capture '{name}' makes remaining patterns unreachable"),
                    None => "wildcard makes remaining patterns unreachable".to_string(),
                };
                return Err(CompileError::lowering(message, span));
            }
            return self.store_capture(name, span, pc);
        };
        pc.on_top += 1;
        self.op(Instruction::Copy(1));
        self.compile_pattern(inner, pc)?;
        pc.on_top -= 1;
        self.store_capture(name, span, pc)
    }

    // ---- sequences -------------------------------------------------------

    fn compile_sequence_pattern(
        &mut self,
        patterns: &'a [Pattern],
        span: Span,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        let size = patterns.len();
        let mut star = None;
        let mut only_wildcard = true;
        let mut star_wildcard = false;
        for (index, pattern) in patterns.iter().enumerate() {
            if matches!(pattern.kind, PatternKind::Star(_)) {
                if star.is_some() {
                    return Err(CompileError::lowering(
                        "multiple starred names in sequence pattern",
                        span,
                    ));
                }
                star_wildcard = is_star_wildcard(pattern);
                only_wildcard &= star_wildcard;
                star = Some(index);
                continue;
            }
            only_wildcard &= is_wildcard(pattern);
        }

        pc.on_top += 1;
        self.op(Instruction::MatchSequence);
        self.jump_to_fail_pop(pc, JumpKind::IfFalse);
        match star {
            None => {
                self.op(Instruction::GetLen);
                self.load_const(Constant::Int(size as i64));
                self.op(Instruction::CompareOp(ComparisonOperator::Eq));
                self.jump_to_fail_pop(pc, JumpKind::IfFalse);
            }
            Some(_) if size > 1 => {
                self.op(Instruction::GetLen);
                self.load_const(Constant::Int(size as i64 - 1));
                self.op(Instruction::CompareOp(ComparisonOperator::GtE));
                self.jump_to_fail_pop(pc, JumpKind::IfFalse);
            }
            Some(_) => {}
        }
        pc.on_top -= 1;

        if only_wildcard {
            self.op(Instruction::PopTop);
            Ok(())
        } else if star_wildcard {
            self.compile_sequence_subscripts(patterns, star, pc)
        } else {
            self.compile_sequence_unpack(patterns, star, pc)
        }
    }

    fn compile_sequence_unpack(
        &mut self,
        patterns: &'a [Pattern],
        star: Option<usize>,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        let size = patterns.len();
        match star {
            Some(index) => self.op(Instruction::UnpackEx {
                before: index as u32,
                after: (size - index - 1) as u32,
            }),
            None => self.op(Instruction::UnpackSequence(size as u32)),
        }
        pc.on_top += size;
        for pattern in patterns {
            pc.on_top -= 1;
            self.compile_subpattern(pattern, pc)?;
        }
        Ok(())
    }

    /// `[a, *_, b]`: index into the subject instead of unpacking the middle.
    fn compile_sequence_subscripts(
        &mut self,
        patterns: &'a [Pattern],
        star: Option<usize>,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        let size = patterns.len();
        pc.on_top += 1;
        for (index, pattern) in patterns.iter().enumerate() {
            if is_wildcard(pattern) || Some(index) == star {
                continue;
            }
            self.op(Instruction::Copy(1));
            if star.is_none_or(|star| index < star) {
                self.load_const(Constant::Int(index as i64));
            } else {
                self.op(Instruction::GetLen);
                self.load_const(Constant::Int((size - index) as i64));
                self.op(Instruction::BinaryOp {
                    op: BinaryOperator::Sub,
                    inplace: false,
                });
            }
            self.op(Instruction::BinarySubscr);
            self.compile_subpattern(pattern, pc)?;
        }
        pc.on_top -= 1;
        self.op(Instruction::PopTop);
        Ok(())
    }

    // ---- mappings --------------------------------------------------------

    fn compile_mapping_pattern(
        &mut self,
        keys: &'a [Expression],
        patterns: &'a [Pattern],
        rest: Option<&str>,
        span: Span,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        if keys.len() != patterns.len() {
            return Err(CompileError::internal(
                "mapping pattern keys and patterns differ in length",
            ));
        }
        let size = keys.len();
        pc.on_top += 1;
        self.op(Instruction::MatchMapping);
        self.jump_to_fail_pop(pc, JumpKind::IfFalse);
        if size == 0 && rest.is_none() {
            pc.on_top -= 1;
            self.op(Instruction::PopTop);
            return Ok(());
        }
        if size > 0 {
            self.op(Instruction::GetLen);
            self.load_const(Constant::Int(size as i64));
            self.op(Instruction::CompareOp(ComparisonOperator::GtE));
            self.jump_to_fail_pop(pc, JumpKind::IfFalse);
        }

        let mut seen: FxHashSet<ConstKey> = FxHashSet::default();
        for key in keys {
            match &key.kind {
                ExpressionKind::Constant(constant) => {
                    if !seen.insert(constant_of(constant).key()) {
                        return Err(CompileError::lowering(
                            format!("mapping pattern checks duplicate key ({})", key_repr(constant)),
                            key.span,
                        ));
                    }
                }
                ExpressionKind::Attribute { .. } | ExpressionKind::UnaryOp { .. } | ExpressionKind::BinOp { .. } => {}
                _ => {
                    return Err(CompileError::lowering(
                        "mapping pattern keys may only match literals and attribute lookups",
                        key.span,
                    ));
                }
            }
            self.compile_expr(key)?;
        }
        // [subject, keys] -> [subject, keys, values or None]
        self.op(Instruction::BuildTuple(size as u32));
        self.op(Instruction::MatchKeys);
        pc.on_top += 2;
        self.op(Instruction::Copy(1));
        self.load_const(Constant::None);
        self.op(Instruction::IsOp(true));
        self.jump_to_fail_pop(pc, JumpKind::IfFalse);

        self.op(Instruction::UnpackSequence(size as u32));
        pc.on_top += size;
        pc.on_top -= 1;
        for pattern in patterns {
            pc.on_top -= 1;
            self.compile_subpattern(pattern, pc)?;
        }
        pc.on_top -= 2;
        match rest {
            Some(rest) => {
                self.op(Instruction::CopyDictWithoutKeys);
                self.store_capture(Some(rest), span, pc)?;
            }
            None => {
                self.op(Instruction::PopTop);
                self.op(Instruction::PopTop);
            }
        }
        Ok(())
    }

    // ---- classes ---------------------------------------------------------

    fn compile_class_pattern(
        &mut self,
        cls: &'a Expression,
        patterns: &'a [Pattern],
        kwd_attrs: &[String],
        kwd_patterns: &'a [Pattern],
        span: Span,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        if kwd_attrs.len() != kwd_patterns.len() {
            return Err(CompileError::internal(
                "class pattern attributes and patterns differ in length",
            ));
        }
        for (index, attr) in kwd_attrs.iter().enumerate() {
            if kwd_attrs[..index].contains(attr) {
                return Err(CompileError::lowering(
                    format!("attribute name repeated in class pattern: {attr}"),
                    span,
                ));
            }
        }
        let nargs = patterns.len();
        let total = nargs + kwd_attrs.len();

        self.compile_expr(cls)?;
        let names = kwd_attrs.iter().map(Constant::str).collect();
        self.load_const(Constant::Tuple(names));
        self.op(Instruction::MatchClass(nargs as u32));
        self.op(Instruction::Copy(1));
        self.load_const(Constant::None);
        self.op(Instruction::IsOp(true));
        pc.on_top += 1;
        self.jump_to_fail_pop(pc, JumpKind::IfFalse);

        self.op(Instruction::UnpackSequence(total as u32));
        pc.on_top += total;
        pc.on_top -= 1;
        for pattern in patterns.iter().chain(kwd_patterns) {
            pc.on_top -= 1;
            if is_wildcard(pattern) {
                self.op(Instruction::PopTop);
                continue;
            }
            self.compile_subpattern(pattern, pc)?;
        }
        Ok(())
    }

    // ---- alternatives ----------------------------------------------------

    /// Every alternative works on its own copy of the subject. The names bound
    /// by the first alternative fix the order captures must end up in; later
    /// alternatives rotate their captures into that order before joining.
    fn compile_or_pattern(
        &mut self,
        alternatives: &'a [Pattern],
        span: Span,
        pc: &mut PatternContext,
    ) -> CompileResult<()> {
        let end = self.new_block();
        let outer_stores = std::mem::take(&mut pc.stores);
        let outer_fail_pop = std::mem::take(&mut pc.fail_pop);
        let outer_on_top = pc.on_top;
        let outer_allow = pc.allow_irrefutable;

        let mut control: Option<Vec<String>> = None;
        for (index, alternative) in alternatives.iter().enumerate() {
            pc.stores = Vec::new();
            pc.allow_irrefutable = index + 1 == alternatives.len() && outer_allow;
            pc.fail_pop = Vec::new();
            pc.on_top = 0;
            self.op(Instruction::Copy(1));
            self.compile_pattern(alternative, pc)?;

            match &control {
                None => control = Some(pc.stores.clone()),
                Some(control) => {
                    if control.len() != pc.stores.len() {
                        return Err(different_names(span));
                    }
                    for icontrol in (0..control.len()).rev() {
                        let name = &control[icontrol];
                        let Some(istores) = pc.stores.iter().position(|stored| stored == name)
                        else {
                            return Err(different_names(span));
                        };
                        if icontrol != istores {
                            let rotations = istores + 1;
                            let rotated: Vec<String> = pc.stores.drain(..rotations).collect();
                            let at = icontrol - istores;
                            pc.stores.splice(at..at, rotated);
                            for _ in 0..rotations {
                                self.rotate(icontrol + 1);
                            }
                        }
                    }
                }
            }
            self.jump(JumpKind::Always, end);
            self.emit_and_reset_fail_pop(pc);
        }

        pc.stores = outer_stores;
        pc.fail_pop = outer_fail_pop;
        pc.on_top = outer_on_top;
        pc.allow_irrefutable = outer_allow;

        // No alternative matched: drop the remaining copy of the subject.
        self.op(Instruction::PopTop);
        self.jump_to_fail_pop(pc, JumpKind::Always);

        self.switch_to(end);
        let control = control.unwrap_or_default();
        let rotations = control.len() + 1 + pc.on_top + pc.stores.len();
        for name in control {
            self.rotate(rotations);
            if pc.stores.contains(&name) {
                return Err(CompileError::lowering(
                    format!("multiple assignments to name '{name}' in pattern"),
                    span,
                ));
            }
            pc.stores.push(name);
        }
        // The subject copy the alternatives worked on.
        self.op(Instruction::PopTop);
        Ok(())
    }
}

fn different_names(span: Span) -> CompileError {
    CompileError::lowering("alternative patterns bind different names", span)
}

fn key_repr(constant: &AstConstant) -> String {
    match constant {
        AstConstant::Str(value) => format!("'{value}'"),
        AstConstant::Int(value) => value.to_string(),
        AstConstant::Float(value) => format!("{value:?}"),
        AstConstant::Bool(true) => "True".to_string(),
        AstConstant::Bool(false) => "False".to_string(),
        AstConstant::None => "None".to_string(),
        AstConstant::Ellipsis => "Ellipsis".to_string(),
    }
}

/// Names a pattern binds, in first-seen order.
fn capture_names(pattern: &Pattern) -> Vec<String> {
    fn walk(pattern: &Pattern, names: &mut Vec<String>) {
        let add = |name: &Option<String>, names: &mut Vec<String>| {
            if let Some(name) = name
                && !names.contains(name)
            {
                names.push(name.clone());
            }
        };
        match &pattern.kind {
            PatternKind::Value(_) | PatternKind::Singleton(_) => {}
            PatternKind::Sequence(items) => {
                for item in items {
                    walk(item, names);
                }
            }
            PatternKind::Star(name) => add(name, names),
            PatternKind::Mapping { patterns, rest, .. } => {
                for item in patterns {
                    walk(item, names);
                }
                add(rest, names);
            }
            PatternKind::Class {
                patterns,
                kwd_patterns,
                ..
            } => {
                for item in patterns.iter().chain(kwd_patterns) {
                    walk(item, names);
                }
            }
            PatternKind::As { pattern, name } => {
                if let Some(inner) = pattern {
                    walk(inner, names);
                }
                add(name, names);
            }
            PatternKind::Or(alternatives) => {
                if let Some(first) = alternatives.first() {
                    walk(first, names);
                }
            }
        }
    }
    let mut names = Vec::new();
    walk(pattern, &mut names);
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn first_case_pattern(source: &str) -> Pattern {
        let program = parse(source).expect("parse");
        match &program.body[0].kind {
            crate::ast::StatementKind::Match { cases, .. } => cases[0].pattern.clone(),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn capture_names_follow_source_order_without_duplicates() {
        let pattern = first_case_pattern("match p:\n    case [a, {'k': b, **rest}, *tail] as whole:\n        pass\n");
        assert_eq!(capture_names(&pattern), vec!["a", "b", "rest", "tail", "whole"]);
    }

    #[test]
    fn or_patterns_only_contribute_their_first_alternative() {
        let pattern = first_case_pattern("match p:\n    case (x, 1) | (1, x):\n        pass\n");
        assert_eq!(capture_names(&pattern), vec!["x"]);
    }

    #[test]
    fn wildcards_are_recognised() {
        let pattern = first_case_pattern("match p:\n    case _:\n        pass\n");
        assert!(is_wildcard(&pattern));
        let pattern = first_case_pattern("match p:\n    case [*_]:\n        pass\n");
        let PatternKind::Sequence(items) = &pattern.kind else {
            panic!("expected a sequence pattern");
        };
        assert!(is_star_wildcard(&items[0]));
    }
}
