//! `case` pattern grammar.

use super::{ParseResult, Parser};
use crate::ast::{Constant, Expression, ExpressionKind, Pattern, PatternKind};
use crate::token::{Span, TokenKind};

impl<'a> Parser<'a> {
    /// Top-level case pattern; a bare comma-separated list is a sequence.
    pub(super) fn parse_case_patterns(&mut self) -> ParseResult<Pattern> {
        let start = self.current_span();
        let first = self.parse_maybe_star_pattern()?;
        if !self.check(&TokenKind::Comma) {
            if matches!(first.kind, PatternKind::Star(_)) {
                return Err(self.invalid("can't use starred pattern here"));
            }
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::Colon) || self.check(&TokenKind::If) {
                break;
            }
            elements.push(self.parse_maybe_star_pattern()?);
        }
        Ok(self.pattern(PatternKind::Sequence(elements), start))
    }

    fn parse_maybe_star_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.current_span();
        if self.eat(&TokenKind::Star) {
            let name = self.expect_identifier()?;
            let name = (name != "_").then_some(name);
            return Ok(self.pattern(PatternKind::Star(name), start));
        }
        self.parse_as_pattern()
    }

    fn parse_as_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.current_span();
        let pattern = self.parse_or_pattern()?;
        if !self.eat(&TokenKind::As) {
            return Ok(pattern);
        }
        let name = self.expect_identifier()?;
        if name == "_" {
            return Err(self.invalid("cannot use '_' as a target"));
        }
        Ok(self.pattern(
            PatternKind::As {
                pattern: Some(Box::new(pattern)),
                name: Some(name),
            },
            start,
        ))
    }

    fn parse_or_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.current_span();
        let first = self.parse_closed_pattern()?;
        if !self.check(&TokenKind::VBar) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat(&TokenKind::VBar) {
            alternatives.push(self.parse_closed_pattern()?);
        }
        Ok(self.pattern(PatternKind::Or(alternatives), start))
    }

    fn parse_closed_pattern(&mut self) -> ParseResult<Pattern> {
        let start = self.current_span();
        match self.peek() {
            &TokenKind::Identifier(name) => {
                if matches!(self.peek_at(1), TokenKind::Dot | TokenKind::LParen) {
                    let value = self.parse_dotted_name()?;
                    if self.check(&TokenKind::LParen) {
                        return self.parse_class_pattern(value, start);
                    }
                    return Ok(self.pattern(PatternKind::Value(value), start));
                }
                self.advance();
                let name = (name != "_").then(|| name.to_string());
                Ok(self.pattern(
                    PatternKind::As {
                        pattern: None,
                        name,
                    },
                    start,
                ))
            }
            TokenKind::None => {
                self.advance();
                Ok(self.pattern(PatternKind::Singleton(Constant::None), start))
            }
            TokenKind::True => {
                self.advance();
                Ok(self.pattern(PatternKind::Singleton(Constant::Bool(true)), start))
            }
            TokenKind::False => {
                self.advance();
                Ok(self.pattern(PatternKind::Singleton(Constant::Bool(false)), start))
            }
            TokenKind::Minus | TokenKind::Integer(_) | TokenKind::Float(_) => {
                let value = self.parse_signed_number()?;
                Ok(self.pattern(PatternKind::Value(value), start))
            }
            TokenKind::String(_) => {
                let value = self.parse_string_literal()?;
                Ok(self.pattern(PatternKind::Value(value), start))
            }
            TokenKind::FString { .. } => Err(self.invalid("patterns may not match formatted string literals")),
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(self.pattern(PatternKind::Sequence(Vec::new()), start));
                }
                let first = self.parse_maybe_star_pattern()?;
                if self.eat(&TokenKind::RParen) {
                    if matches!(first.kind, PatternKind::Star(_)) {
                        return Ok(self.pattern(PatternKind::Sequence(vec![first]), start));
                    }
                    return Ok(first);
                }
                let mut elements = vec![first];
                while self.eat(&TokenKind::Comma) {
                    if self.check(&TokenKind::RParen) {
                        break;
                    }
                    elements.push(self.parse_maybe_star_pattern()?);
                }
                self.expect(&TokenKind::RParen, ")")?;
                Ok(self.pattern(PatternKind::Sequence(elements), start))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    elements.push(self.parse_maybe_star_pattern()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "]")?;
                Ok(self.pattern(PatternKind::Sequence(elements), start))
            }
            TokenKind::LBrace => self.parse_mapping_pattern(start),
            _ => Err(self.unexpected("pattern")),
        }
    }

    fn parse_mapping_pattern(&mut self, start: Span) -> ParseResult<Pattern> {
        self.expect(&TokenKind::LBrace, "{")?;
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !self.check(&TokenKind::RBrace) {
            if self.eat(&TokenKind::DoubleStar) {
                let name = self.expect_identifier()?;
                if name == "_" {
                    return Err(self.invalid("cannot use '_' as a target"));
                }
                rest = Some(name);
                self.eat(&TokenKind::Comma);
                break;
            }
            keys.push(self.parse_mapping_key()?);
            self.expect(&TokenKind::Colon, ":")?;
            patterns.push(self.parse_as_pattern()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBrace, "}")?;
        Ok(self.pattern(
            PatternKind::Mapping {
                keys,
                patterns,
                rest,
            },
            start,
        ))
    }

    fn parse_mapping_key(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let constant = match self.peek() {
            TokenKind::None => Constant::None,
            TokenKind::True => Constant::Bool(true),
            TokenKind::False => Constant::Bool(false),
            TokenKind::Minus | TokenKind::Integer(_) | TokenKind::Float(_) => {
                return self.parse_signed_number();
            }
            TokenKind::String(_) => return self.parse_string_literal(),
            TokenKind::Identifier(_) if matches!(self.peek_at(1), TokenKind::Dot) => {
                return self.parse_dotted_name();
            }
            _ => return Err(self.unexpected("literal or attribute as mapping key")),
        };
        self.advance();
        Ok(Expression::new(
            ExpressionKind::Constant(constant),
            self.span_from(start),
        ))
    }

    fn parse_class_pattern(&mut self, cls: Expression, start: Span) -> ParseResult<Pattern> {
        self.expect(&TokenKind::LParen, "(")?;
        let mut patterns = Vec::new();
        let mut kwd_attrs = Vec::new();
        let mut kwd_patterns = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if let &TokenKind::Identifier(name) = self.peek()
                && matches!(self.peek_at(1), TokenKind::Equal)
            {
                self.advance();
                self.advance();
                kwd_attrs.push(name.to_string());
                kwd_patterns.push(self.parse_as_pattern()?);
            } else {
                if !kwd_attrs.is_empty() {
                    return Err(self.invalid("positional patterns follow keyword patterns"));
                }
                patterns.push(self.parse_as_pattern()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, ")")?;
        Ok(self.pattern(
            PatternKind::Class {
                cls,
                patterns,
                kwd_attrs,
                kwd_patterns,
            },
            start,
        ))
    }

    fn parse_dotted_name(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let first = self.expect_identifier()?;
        let mut value = Expression::new(ExpressionKind::Name(first), self.span_from(start));
        while self.eat(&TokenKind::Dot) {
            let attr = self.expect_identifier()?;
            value = Expression::new(
                ExpressionKind::Attribute {
                    value: Box::new(value),
                    attr,
                },
                self.span_from(start),
            );
        }
        Ok(value)
    }

    fn parse_signed_number(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let negative = self.eat(&TokenKind::Minus);
        let constant = match *self.peek() {
            TokenKind::Integer(value) if negative => match value.checked_neg() {
                Some(value) => Constant::Int(value),
                None => return Err(self.invalid("integer literal too large")),
            },
            TokenKind::Integer(value) => Constant::Int(value),
            TokenKind::Float(value) => Constant::Float(if negative { -value } else { value }),
            _ => return Err(self.unexpected("number")),
        };
        self.advance();
        Ok(Expression::new(
            ExpressionKind::Constant(constant),
            self.span_from(start),
        ))
    }

    fn parse_string_literal(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let mut value = String::new();
        while let TokenKind::String(text) = self.peek() {
            value.push_str(text);
            self.advance();
        }
        if matches!(self.peek(), TokenKind::FString { .. }) {
            return Err(self.invalid("patterns may not match formatted string literals"));
        }
        Ok(Expression::new(
            ExpressionKind::Constant(Constant::Str(value)),
            self.span_from(start),
        ))
    }

    fn pattern(&self, kind: PatternKind, start: Span) -> Pattern {
        Pattern {
            kind,
            span: self.span_from(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::StatementKind;
    use crate::parser::parse;
    use indoc::indoc;

    fn first_pattern(source: &str) -> Pattern {
        let program = parse(source).expect("parse");
        let StatementKind::Match { mut cases, .. } = program.body[0].kind.clone() else {
            panic!("expected match statement");
        };
        cases.remove(0).pattern
    }

    #[test]
    fn parses_class_pattern_with_keywords() {
        let pattern = first_pattern(indoc! {"
            match p:
                case geometry.Point(0, y=ys) as hit:
                    pass
        "});
        let PatternKind::As {
            pattern: Some(inner),
            name: Some(name),
        } = pattern.kind
        else {
            panic!("expected as-pattern");
        };
        assert_eq!(name, "hit");
        let PatternKind::Class {
            cls,
            patterns,
            kwd_attrs,
            ..
        } = inner.kind
        else {
            panic!("expected class pattern");
        };
        assert!(matches!(cls.kind, ExpressionKind::Attribute { .. }));
        assert_eq!(patterns.len(), 1);
        assert_eq!(kwd_attrs, vec!["y".to_string()]);
    }

    #[test]
    fn parses_mapping_pattern_with_rest() {
        let pattern = first_pattern(indoc! {"
            match config:
                case {'mode': 'fast', -1: None, **rest}:
                    pass
        "});
        let PatternKind::Mapping {
            keys,
            patterns,
            rest,
        } = pattern.kind
        else {
            panic!("expected mapping pattern");
        };
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].kind, ExpressionKind::Constant(Constant::Int(-1)));
        assert!(matches!(
            patterns[1].kind,
            PatternKind::Singleton(Constant::None)
        ));
        assert_eq!(rest.as_deref(), Some("rest"));
    }

    #[test]
    fn distinguishes_group_from_sequence() {
        let grouped = first_pattern("match x:\n    case (a):\n        pass\n");
        assert!(matches!(
            grouped.kind,
            PatternKind::As { pattern: None, name: Some(_) }
        ));
        let sequence = first_pattern("match x:\n    case (a,):\n        pass\n");
        assert!(matches!(sequence.kind, PatternKind::Sequence(ref items) if items.len() == 1));
        let wildcard = first_pattern("match x:\n    case _:\n        pass\n");
        assert!(matches!(
            wildcard.kind,
            PatternKind::As { pattern: None, name: None }
        ));
    }
}
