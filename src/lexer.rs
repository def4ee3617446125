use std::borrow::Cow;
use std::{iter::Peekable, str::CharIndices};

pub mod error;

pub use error::{LexError, LexResult};

use crate::token::{AugOperator, Span, Token, TokenKind, keyword};

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    offset: usize,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token<'a>>,
    brackets: Vec<(char, usize, usize)>,
    at_line_start: bool,
    line_has_tokens: bool,
    eof_reached: bool,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            offset: 0,
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            brackets: Vec::new(),
            at_line_start: true,
            line_has_tokens: false,
            eof_reached: false,
            line: 1,
            column: 0,
        }
    }

    /// Lexer for an expression embedded in a larger source (f-string fields).
    ///
    /// Spans are reported relative to the enclosing source and newlines are
    /// treated as if inside brackets.
    pub fn for_expression(input: &'a str, offset: usize, line: usize, column: usize) -> Self {
        let mut lexer = Self::new(input);
        lexer.offset = offset;
        lexer.line = line;
        lexer.column = column;
        lexer.at_line_start = false;
        lexer.brackets.push(('(', line, column));
        lexer
    }

    pub fn next_token(&mut self) -> LexResult<Token<'a>> {
        loop {
            if let Some(token) = self.pending_tokens.pop() {
                return Ok(token);
            }

            if self.eof_reached {
                return Ok(Token::new(TokenKind::EOF, self.empty_span()));
            }

            if self.at_line_start {
                self.at_line_start = false;
                if let Some(token) = self.handle_indentation()? {
                    return Ok(token);
                }
                continue;
            }

            self.skip_whitespace();

            let Some(&(start_idx, ch)) = self.chars.peek() else {
                return Ok(self.finish());
            };

            let start_line = self.line;
            let start_column = self.column;
            match ch {
                '\n' | '\r' => {
                    self.advance_char();
                    if ch == '\r' && matches!(self.chars.peek(), Some(&(_, '\n'))) {
                        self.advance_char();
                    }
                    if !self.brackets.is_empty() {
                        continue;
                    }
                    self.at_line_start = true;
                    self.line_has_tokens = false;
                    return Ok(Token::new(
                        TokenKind::Newline,
                        self.span(start_idx, start_idx + 1, start_line, start_column),
                    ));
                }
                '#' => {
                    self.skip_comment();
                    continue;
                }
                '\\' => {
                    self.advance_char();
                    match self.chars.peek() {
                        Some(&(_, '\n')) => {
                            self.advance_char();
                            continue;
                        }
                        Some(&(_, '\r')) => {
                            self.advance_char();
                            if matches!(self.chars.peek(), Some(&(_, '\n'))) {
                                self.advance_char();
                            }
                            continue;
                        }
                        _ => {
                            return Err(LexError::UnexpectedCharacter {
                                character: '\\',
                                line: start_line,
                                column: start_column,
                            });
                        }
                    }
                }
                _ => {}
            }

            self.line_has_tokens = true;
            return match ch {
                '"' | '\'' => self.read_string(start_idx, "", start_line, start_column),
                c if c.is_alphabetic() || c == '_' => {
                    self.read_identifier_or_prefixed_string(start_idx, start_line, start_column)
                }
                c if c.is_ascii_digit() => self.read_number(start_idx, start_line, start_column),
                '.' if self.peek_second().is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number(start_idx, start_line, start_column)
                }
                _ => self.read_operator(start_idx, ch, start_line, start_column),
            };
        }
    }

    fn handle_indentation(&mut self) -> LexResult<Option<Token<'a>>> {
        loop {
            let mut indent_level = 0;
            while let Some(&(_, c)) = self.chars.peek() {
                match c {
                    ' ' => {
                        self.advance_char();
                        indent_level += 1;
                    }
                    '\t' => {
                        return Err(LexError::TabIndentation {
                            line: self.line,
                            column: self.column,
                        });
                    }
                    '\x0c' => {
                        self.advance_char();
                    }
                    _ => break,
                }
            }

            match self.chars.peek() {
                // Blank and comment-only lines do not affect indentation.
                Some(&(_, '\n' | '\r')) => {
                    self.skip_line_break();
                    continue;
                }
                Some(&(_, '#')) => {
                    self.skip_comment();
                    if self.chars.peek().is_some() {
                        self.skip_line_break();
                        continue;
                    }
                    return Ok(None);
                }
                None => return Ok(None),
                Some(_) => {}
            }

            let current_indent = self.current_indent();
            let span = self.empty_span();
            if indent_level > current_indent {
                self.indent_stack.push(indent_level);
                return Ok(Some(Token::new(TokenKind::Indent, span)));
            }
            if indent_level < current_indent {
                while let Some(&top) = self.indent_stack.last() {
                    if top > indent_level {
                        self.indent_stack.pop();
                        self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
                    } else {
                        break;
                    }
                }
                if self.current_indent() != indent_level {
                    return Err(LexError::InvalidDedent {
                        indent_level,
                        line: self.line,
                        column: self.column,
                    });
                }
            }
            return Ok(self.pending_tokens.pop());
        }
    }

    fn finish(&mut self) -> Token<'a> {
        self.eof_reached = true;
        let span = self.empty_span();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
        }
        if self.line_has_tokens {
            self.line_has_tokens = false;
            return Token::new(TokenKind::Newline, span);
        }
        self.pending_tokens
            .pop()
            .unwrap_or_else(|| Token::new(TokenKind::EOF, span))
    }

    fn skip_whitespace(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' || c == '\t' || c == '\x0c' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == '\n' || c == '\r' {
                break;
            }
            self.advance_char();
        }
    }

    fn skip_line_break(&mut self) {
        if let Some((_, '\r')) = self.advance_char()
            && matches!(self.chars.peek(), Some(&(_, '\n')))
        {
            self.advance_char();
        }
    }

    fn read_identifier_or_prefixed_string(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> LexResult<Token<'a>> {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];

        if let Some(&(_, '"' | '\'')) = self.chars.peek()
            && ident.len() <= 2
            && ident
                .chars()
                .all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'u' | 'f' | 'b'))
        {
            return self.read_string(start, ident, line, column);
        }

        let kind = keyword(ident).unwrap_or(TokenKind::Identifier(ident));
        Ok(Token::new(kind, self.span(start, end_idx, line, column)))
    }

    fn read_number(&mut self, start: usize, line: usize, column: usize) -> LexResult<Token<'a>> {
        let radix = if self.chars.peek().is_some_and(|&(_, c)| c == '0') {
            match self.peek_second().map(|c| c.to_ascii_lowercase()) {
                Some('x') => Some(16),
                Some('o') => Some(8),
                Some('b') => Some(2),
                _ => None,
            }
        } else {
            None
        };

        let invalid = |this: &Self, end: usize| LexError::InvalidNumber {
            literal: this.input[start..end].to_string(),
            line,
            column,
        };

        if let Some(radix) = radix {
            self.advance_char();
            self.advance_char();
            while let Some(&(_, c)) = self.chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    self.advance_char();
                } else {
                    break;
                }
            }
            let end_idx = self.current_index();
            let digits: String = self.input[start + 2..end_idx]
                .chars()
                .filter(|&c| c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, radix).map_err(|_| invalid(self, end_idx))?;
            return Ok(Token::new(
                TokenKind::Integer(value),
                self.span(start, end_idx, line, column),
            ));
        }

        let mut is_float = false;
        self.consume_digits();
        if self.chars.peek().is_some_and(|&(_, c)| c == '.') {
            is_float = true;
            self.advance_char();
            self.consume_digits();
        }
        if self
            .chars
            .peek()
            .is_some_and(|&(_, c)| c == 'e' || c == 'E')
        {
            is_float = true;
            self.advance_char();
            if self
                .chars
                .peek()
                .is_some_and(|&(_, c)| c == '+' || c == '-')
            {
                self.advance_char();
            }
            self.consume_digits();
        }
        if self
            .chars
            .peek()
            .is_some_and(|&(_, c)| c.is_alphanumeric() || c == '_')
        {
            self.advance_char();
            let end_idx = self.current_index();
            return Err(invalid(self, end_idx));
        }

        let end_idx = self.current_index();
        let literal: String = self.input[start..end_idx]
            .chars()
            .filter(|&c| c != '_')
            .collect();
        let kind = if is_float {
            TokenKind::Float(
                literal
                    .parse::<f64>()
                    .map_err(|_| invalid(self, end_idx))?,
            )
        } else {
            TokenKind::Integer(
                literal
                    .parse::<i64>()
                    .map_err(|_| invalid(self, end_idx))?,
            )
        };
        Ok(Token::new(kind, self.span(start, end_idx, line, column)))
    }

    fn consume_digits(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn read_string(
        &mut self,
        start: usize,
        prefix: &str,
        line: usize,
        column: usize,
    ) -> LexResult<Token<'a>> {
        let lowered = prefix.to_ascii_lowercase();
        if lowered.contains('b') {
            return Err(LexError::UnsupportedPrefix {
                prefix: prefix.to_string(),
                line,
                column,
            });
        }
        let raw = lowered.contains('r');
        let formatted = lowered.contains('f');

        let (_, quote) = self
            .advance_char()
            .ok_or(LexError::UnterminatedString { line, column })?;
        let triple = {
            let mut lookahead = self.chars.clone();
            matches!(
                (lookahead.next(), lookahead.next()),
                (Some((_, a)), Some((_, b))) if a == quote && b == quote
            )
        };
        if triple {
            self.advance_char();
            self.advance_char();
        }

        let content_start = self.current_index();
        loop {
            let Some((idx, c)) = self.advance_char() else {
                return Err(LexError::UnterminatedString { line, column });
            };
            match c {
                '\\' => {
                    if self.advance_char().is_none() {
                        return Err(LexError::UnterminatedString { line, column });
                    }
                }
                '\n' | '\r' if !triple => {
                    return Err(LexError::UnterminatedString { line, column });
                }
                c if c == quote => {
                    if !triple {
                        let body = &self.input[content_start..idx];
                        return self.string_token(
                            body,
                            raw,
                            formatted,
                            content_start,
                            self.span(start, idx + 1, line, column),
                        );
                    }
                    let mut lookahead = self.chars.clone();
                    if matches!(
                        (lookahead.next(), lookahead.next()),
                        (Some((_, a)), Some((_, b))) if a == quote && b == quote
                    ) {
                        self.advance_char();
                        self.advance_char();
                        let body = &self.input[content_start..idx];
                        return self.string_token(
                            body,
                            raw,
                            formatted,
                            content_start,
                            self.span(start, idx + 3, line, column),
                        );
                    }
                }
                _ => {}
            }
        }
    }

    fn string_token(
        &self,
        body: &'a str,
        raw: bool,
        formatted: bool,
        content_start: usize,
        span: Span,
    ) -> LexResult<Token<'a>> {
        if formatted {
            return Ok(Token::new(
                TokenKind::FString {
                    body,
                    raw,
                    body_start: content_start + self.offset,
                },
                span,
            ));
        }
        let value = if raw {
            Cow::Borrowed(body)
        } else {
            unescape(body, span.line, span.column)?
        };
        Ok(Token::new(TokenKind::String(value), span))
    }

    fn read_operator(
        &mut self,
        start: usize,
        ch: char,
        line: usize,
        column: usize,
    ) -> LexResult<Token<'a>> {
        let rest = &self.input[start..];
        let (kind, len) = if let Some(kind) = three_char_operator(rest) {
            (kind, 3)
        } else if let Some(kind) = two_char_operator(rest) {
            (kind, 2)
        } else {
            let kind = match ch {
                '=' => TokenKind::Equal,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '@' => TokenKind::At,
                '&' => TokenKind::Amper,
                '|' => TokenKind::VBar,
                '^' => TokenKind::Circumflex,
                '~' => TokenKind::Tilde,
                '<' => TokenKind::Less,
                '>' => TokenKind::Greater,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                ',' => TokenKind::Comma,
                '.' => TokenKind::Dot,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                _ => {
                    return Err(LexError::UnexpectedCharacter {
                        character: ch,
                        line,
                        column,
                    });
                }
            };
            (kind, 1)
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                self.brackets.push((ch, line, column));
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _, _)) if open == expected => {}
                    _ => {
                        return Err(LexError::UnmatchedDelimiter {
                            delimiter: ch,
                            line,
                            column,
                        });
                    }
                }
            }
            _ => {}
        }

        for _ in 0..len {
            self.advance_char();
        }
        Ok(Token::new(kind, self.span(start, start + len, line, column)))
    }
}

fn three_char_operator(rest: &str) -> Option<TokenKind<'static>> {
    let kind = match rest.get(..3)? {
        "**=" => TokenKind::AugAssign(AugOperator::Pow),
        "//=" => TokenKind::AugAssign(AugOperator::FloorDiv),
        ">>=" => TokenKind::AugAssign(AugOperator::RShift),
        "<<=" => TokenKind::AugAssign(AugOperator::LShift),
        "..." => TokenKind::Ellipsis,
        _ => return None,
    };
    Some(kind)
}

fn two_char_operator(rest: &str) -> Option<TokenKind<'static>> {
    let kind = match rest.get(..2)? {
        "**" => TokenKind::DoubleStar,
        "//" => TokenKind::DoubleSlash,
        "<<" => TokenKind::LeftShift,
        ">>" => TokenKind::RightShift,
        "<=" => TokenKind::LessEqual,
        ">=" => TokenKind::GreaterEqual,
        "==" => TokenKind::EqEqual,
        "!=" => TokenKind::NotEqual,
        ":=" => TokenKind::ColonEqual,
        "->" => TokenKind::Arrow,
        "+=" => TokenKind::AugAssign(AugOperator::Add),
        "-=" => TokenKind::AugAssign(AugOperator::Sub),
        "*=" => TokenKind::AugAssign(AugOperator::Mul),
        "/=" => TokenKind::AugAssign(AugOperator::Div),
        "%=" => TokenKind::AugAssign(AugOperator::Mod),
        "&=" => TokenKind::AugAssign(AugOperator::BitAnd),
        "|=" => TokenKind::AugAssign(AugOperator::BitOr),
        "^=" => TokenKind::AugAssign(AugOperator::BitXor),
        "@=" => TokenKind::AugAssign(AugOperator::MatMul),
        _ => return None,
    };
    Some(kind)
}

/// Resolves backslash escapes in a non-raw string body.
pub fn unescape(body: &str, line: usize, column: usize) -> LexResult<Cow<'_, str>> {
    if !body.contains('\\') {
        return Ok(Cow::Borrowed(body));
    }

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escape) = chars.next() else {
            out.push('\\');
            break;
        };
        match escape {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut value = escape.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' | 'u' | 'U' => {
                let width = match escape {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next()).collect();
                let decoded = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == width)
                    .and_then(char::from_u32);
                match decoded {
                    Some(decoded) => out.push(decoded),
                    None => {
                        return Err(LexError::InvalidEscape {
                            sequence: format!("{escape}{digits}"),
                            line,
                            column,
                        });
                    }
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(Cow::Owned(out))
}

impl<'a> Iterator for Lexer<'a> {
    type Item = LexResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(token) if matches!(token.kind, TokenKind::EOF) && self.pending_tokens.is_empty() => {
                None
            }
            other => Some(other),
        }
    }
}

impl<'a> Lexer<'a> {
    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, c)| c)
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn span(&self, start: usize, end: usize, line: usize, column: usize) -> Span {
        Span {
            start: start + self.offset,
            end: end + self.offset,
            line,
            column,
        }
    }

    fn empty_span(&mut self) -> Span {
        let index = self.current_index();
        self.span(index, index, self.line, self.column)
    }
}

pub fn tokenize(input: &str) -> LexResult<Vec<Token<'_>>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::EOF);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    if let Some(&(delimiter, line, column)) = lexer.brackets.last() {
        return Err(LexError::UnmatchedDelimiter {
            delimiter,
            line,
            column,
        });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn kinds(input: &str) -> Vec<TokenKind<'_>> {
        tokenize(input)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn test_simple_program() {
        let input = indoc! {"
            def fn():
                n = 4 + 4
                print(n)
            fn()
        "};
        let expected_tokens = vec![
            TokenKind::Def,
            TokenKind::Identifier("fn"),
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Colon,
            TokenKind::Newline,
            TokenKind::Indent,
            TokenKind::Identifier("n"),
            TokenKind::Equal,
            TokenKind::Integer(4),
            TokenKind::Plus,
            TokenKind::Integer(4),
            TokenKind::Newline,
            TokenKind::Identifier("print"),
            TokenKind::LParen,
            TokenKind::Identifier("n"),
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::Dedent,
            TokenKind::Identifier("fn"),
            TokenKind::LParen,
            TokenKind::RParen,
            TokenKind::Newline,
            TokenKind::EOF,
        ];
        assert_eq!(kinds(input), expected_tokens);
    }

    #[test]
    fn skips_blank_lines_comments_and_bracketed_newlines() {
        let input = indoc! {"
            x = [1,
                 2]  # trailing

            # only a comment
            y = x
        "};
        assert_eq!(
            kinds(input),
            vec![
                TokenKind::Identifier("x"),
                TokenKind::Equal,
                TokenKind::LBracket,
                TokenKind::Integer(1),
                TokenKind::Comma,
                TokenKind::Integer(2),
                TokenKind::RBracket,
                TokenKind::Newline,
                TokenKind::Identifier("y"),
                TokenKind::Equal,
                TokenKind::Identifier("x"),
                TokenKind::Newline,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn emits_newline_and_dedents_without_trailing_newline() {
        assert_eq!(
            kinds("if x:\n    y"),
            vec![
                TokenKind::If,
                TokenKind::Identifier("x"),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("y"),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn reads_numeric_literals() {
        assert_eq!(
            kinds("0x1F 0o17 0b101 1_000 2.5 1e3 .5\n"),
            vec![
                TokenKind::Integer(31),
                TokenKind::Integer(15),
                TokenKind::Integer(5),
                TokenKind::Integer(1000),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Float(0.5),
                TokenKind::Newline,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn reads_longest_operators() {
        assert_eq!(
            kinds("a **= b // c != d := e -> ...\n"),
            vec![
                TokenKind::Identifier("a"),
                TokenKind::AugAssign(AugOperator::Pow),
                TokenKind::Identifier("b"),
                TokenKind::DoubleSlash,
                TokenKind::Identifier("c"),
                TokenKind::NotEqual,
                TokenKind::Identifier("d"),
                TokenKind::ColonEqual,
                TokenKind::Identifier("e"),
                TokenKind::Arrow,
                TokenKind::Ellipsis,
                TokenKind::Newline,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn decodes_string_escapes_and_raw_strings() {
        let tokens = kinds(r#"'a\tb' r'a\tb' """x"y""" '\x41\u00e9'"#);
        assert_eq!(tokens[0], TokenKind::String(Cow::Borrowed("a\tb")));
        assert_eq!(tokens[1], TokenKind::String(Cow::Borrowed("a\\tb")));
        assert_eq!(tokens[2], TokenKind::String(Cow::Borrowed("x\"y")));
        assert_eq!(tokens[3], TokenKind::String(Cow::Borrowed("Aé")));
    }

    #[test]
    fn keeps_fstring_body_for_the_parser() {
        let tokens = tokenize("f'{x!r:>4}'").expect("tokenize");
        assert!(matches!(
            tokens[0].kind,
            TokenKind::FString { body: "{x!r:>4}", raw: false, body_start: 2 }
        ));
    }

    #[test]
    fn errors_on_invalid_character() {
        let err = tokenize("x = 1 ? 2\n").expect_err("expected lexing failure");
        assert!(err.to_string().contains("Unexpected character '?'"));
    }

    #[test]
    fn errors_on_integer_overflow() {
        let err = tokenize("n = 99999999999999999999999999\n").expect_err("expected overflow");
        assert!(err.to_string().contains("Invalid numeric literal"));
    }

    #[test]
    fn errors_on_inconsistent_dedent() {
        let input = "if x:\n    y = 1\n  z = 2\n";
        let err = tokenize(input).expect_err("expected dedent failure");
        assert!(matches!(err, LexError::InvalidDedent { indent_level: 2, .. }));
    }

    #[test]
    fn errors_on_unclosed_bracket() {
        let err = tokenize("x = (1,\n").expect_err("expected unmatched delimiter");
        assert!(matches!(err, LexError::UnmatchedDelimiter { delimiter: '(', .. }));
    }
}
