//! Replacement-field parsing for f-string bodies.

use super::{ParseError, ParseResult, Parser};
use crate::ast::FStringPart;
use crate::lexer::{self, Lexer};
use crate::token::TokenKind;

/// Splits an f-string body into literal text and replacement fields.
///
/// `body_start`, `line` and `column` locate the first body character in the
/// enclosing source so that field expressions get absolute spans.
pub(super) fn parse_fstring(
    body: &str,
    raw: bool,
    body_start: usize,
    line: usize,
    column: usize,
) -> ParseResult<Vec<FStringPart>> {
    let mut parser = FStringParser {
        body,
        raw,
        body_start,
        line,
        column,
        pos: 0,
    };
    let parts = parser.parse_parts(false)?;
    if parser.pos < body.len() {
        return Err(parser.error("single '}' is not allowed", parser.pos));
    }
    Ok(parts)
}

struct FStringParser<'a> {
    body: &'a str,
    raw: bool,
    body_start: usize,
    line: usize,
    column: usize,
    pos: usize,
}

impl<'a> FStringParser<'a> {
    fn parse_parts(&mut self, in_spec: bool) -> ParseResult<Vec<FStringPart>> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut literal_start = self.pos;

        while let Some(ch) = self.peek(0) {
            match ch {
                '{' if !in_spec && self.peek(1) == Some('{') => {
                    literal.push('{');
                    self.pos += 2;
                }
                '{' => {
                    self.flush_literal(&mut parts, &mut literal, literal_start)?;
                    parts.push(self.parse_field()?);
                    literal_start = self.pos;
                }
                '}' if in_spec => break,
                '}' if self.peek(1) == Some('}') => {
                    literal.push('}');
                    self.pos += 2;
                }
                '}' => return Err(self.error("single '}' is not allowed", self.pos)),
                _ => {
                    literal.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        self.flush_literal(&mut parts, &mut literal, literal_start)?;
        Ok(parts)
    }

    fn flush_literal(
        &self,
        parts: &mut Vec<FStringPart>,
        literal: &mut String,
        start: usize,
    ) -> ParseResult<()> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(literal);
        let text = if self.raw {
            text
        } else {
            let (line, column) = self.location(start);
            lexer::unescape(&text, line, column)?.into_owned()
        };
        parts.push(FStringPart::Literal(text));
        Ok(())
    }

    fn parse_field(&mut self) -> ParseResult<FStringPart> {
        let open = self.pos;
        self.pos += 1;
        let expr_start = self.pos;
        let expr_end = self.scan_expression_end(open)?;
        let expr_text = &self.body[expr_start..expr_end];
        if expr_text.trim().is_empty() {
            return Err(self.error("empty expression not allowed", open));
        }
        self.pos = expr_end;

        let mut debug_text = None;
        if self.peek(0) == Some('=') {
            self.pos += 1;
            while matches!(self.peek(0), Some(' ' | '\t' | '\n')) {
                self.pos += 1;
            }
            debug_text = Some(self.body[expr_start..self.pos].to_string());
        }

        let mut conversion = None;
        if self.peek(0) == Some('!') {
            self.pos += 1;
            match self.peek(0) {
                Some(c @ ('r' | 's' | 'a')) => {
                    conversion = Some(c);
                    self.pos += 1;
                }
                _ => {
                    return Err(self.error(
                        "invalid conversion character: expected 's', 'r', or 'a'",
                        self.pos,
                    ));
                }
            }
        }

        let mut format_spec = None;
        if self.peek(0) == Some(':') {
            self.pos += 1;
            format_spec = Some(self.parse_parts(true)?);
        }

        if self.peek(0) != Some('}') {
            return Err(self.error("expecting '}'", open));
        }
        self.pos += 1;

        if debug_text.is_some() && conversion.is_none() && format_spec.is_none() {
            conversion = Some('r');
        }

        let value = self.parse_expression(expr_text, expr_start)?;
        Ok(FStringPart::Field {
            value: Box::new(value),
            conversion,
            format_spec,
            debug_text,
        })
    }

    /// Finds where the field expression stops: at a top-level `}`, `!`, `:`
    /// or self-documenting `=`.
    fn scan_expression_end(&self, open: usize) -> ParseResult<usize> {
        let bytes = self.body.as_bytes();
        let mut index = self.pos;
        let mut depth = 0usize;
        while index < bytes.len() {
            let ch = bytes[index];
            match ch {
                b'\'' | b'"' => {
                    index = self.skip_string(index)?;
                    continue;
                }
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b'}' if depth == 0 => return Ok(index),
                b'}' => depth -= 1,
                b'=' | b'!' | b'<' | b'>' if bytes.get(index + 1) == Some(&b'=') => {
                    index += 2;
                    continue;
                }
                b'!' | b':' | b'=' if depth == 0 => return Ok(index),
                _ => {}
            }
            index += 1;
        }
        Err(self.error("expecting '}'", open))
    }

    fn skip_string(&self, start: usize) -> ParseResult<usize> {
        let bytes = self.body.as_bytes();
        let quote = bytes[start];
        let triple = bytes.get(start + 1) == Some(&quote) && bytes.get(start + 2) == Some(&quote);
        let width = if triple { 3 } else { 1 };
        let mut index = start + width;
        while index < bytes.len() {
            if bytes[index] == b'\\' {
                index += 2;
                continue;
            }
            if bytes[index] == quote
                && (!triple
                    || (bytes.get(index + 1) == Some(&quote)
                        && bytes.get(index + 2) == Some(&quote)))
            {
                return Ok(index + width);
            }
            index += 1;
        }
        Err(self.error("unterminated string in expression", start))
    }

    fn parse_expression(
        &self,
        text: &'a str,
        start: usize,
    ) -> ParseResult<crate::ast::Expression> {
        let (line, column) = self.location(start);
        let mut lexer = Lexer::for_expression(text, self.body_start + start, line, column);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let is_eof = matches!(token.kind, TokenKind::EOF);
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        let mut parser = Parser::new(tokens);
        let value = if parser.check(&TokenKind::Yield) {
            parser.parse_yield()?
        } else {
            parser.parse_star_expressions()?
        };
        parser.eat(&TokenKind::Newline);
        if !parser.check(&TokenKind::EOF) {
            return Err(parser.unexpected("'}'"));
        }
        Ok(value)
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.body[self.pos..].chars().nth(ahead)
    }

    fn location(&self, index: usize) -> (usize, usize) {
        let before = &self.body[..index];
        match before.rfind('\n') {
            Some(newline) => (
                self.line + before.matches('\n').count(),
                before[newline + 1..].chars().count(),
            ),
            None => (self.line, self.column + before.chars().count()),
        }
    }

    fn error(&self, message: &str, index: usize) -> ParseError {
        let (line, column) = self.location(index);
        ParseError::Invalid {
            message: format!("f-string: {message}"),
            line,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Constant, ExpressionKind};

    fn parts(body: &str) -> Vec<FStringPart> {
        parse_fstring(body, false, 2, 1, 2).expect("f-string should parse")
    }

    #[test]
    fn splits_literals_and_fields() {
        let parsed = parts("a {x!r:>{width}} b {{c}}");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], FStringPart::Literal("a ".to_string()));
        let FStringPart::Field {
            value,
            conversion,
            format_spec,
            debug_text,
        } = &parsed[1]
        else {
            panic!("expected field");
        };
        assert_eq!(value.kind, ExpressionKind::Name("x".to_string()));
        assert_eq!(value.span.start, 5);
        assert_eq!(*conversion, Some('r'));
        assert!(debug_text.is_none());
        let spec = format_spec.as_ref().expect("format spec");
        assert_eq!(spec[0], FStringPart::Literal(">".to_string()));
        assert!(matches!(spec[1], FStringPart::Field { .. }));
        assert_eq!(parsed[2], FStringPart::Literal(" b {c}".to_string()));
    }

    #[test]
    fn self_documenting_field_defaults_to_repr() {
        let parsed = parts("{x + 1 = }");
        let FStringPart::Field {
            conversion,
            debug_text,
            ..
        } = &parsed[0]
        else {
            panic!("expected field");
        };
        assert_eq!(debug_text.as_deref(), Some("x + 1 = "));
        assert_eq!(*conversion, Some('r'));
    }

    #[test]
    fn comparison_operators_do_not_end_the_field() {
        let parsed = parts("{a == b}{c != 'd:}'}");
        assert_eq!(parsed.len(), 2);
        let FStringPart::Field { value, .. } = &parsed[1] else {
            panic!("expected field");
        };
        let ExpressionKind::Compare { comparators, .. } = &value.kind else {
            panic!("expected comparison");
        };
        assert_eq!(
            comparators[0].kind,
            ExpressionKind::Constant(Constant::Str("d:}".to_string()))
        );
    }

    #[test]
    fn rejects_single_closing_brace_and_empty_field() {
        let err = parse_fstring("a } b", false, 0, 1, 0).expect_err("single brace");
        assert!(err.to_string().contains("single '}'"));
        let err = parse_fstring("{ }", false, 0, 1, 0).expect_err("empty field");
        assert!(err.to_string().contains("empty expression"));
    }
}
