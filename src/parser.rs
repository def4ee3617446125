use thiserror::Error;

use crate::ast::{
    BinaryOperator, BoolOperator, ClassDef, ComparisonOperator, Comprehension, Constant,
    ExceptHandler, Expression, ExpressionKind, FStringPart, FunctionDef, Keyword, MatchCase,
    Parameter, Parameters, Program, Statement, StatementKind, UnaryOperator, WithItem,
};
use crate::lexer::{self, LexError};
use crate::token::{AugOperator, Span, Token, TokenKind};

mod fstring;
mod pattern;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at line {line}, column {column}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("{message} at line {line}, column {column}")]
    Invalid {
        message: String,
        line: usize,
        column: usize,
    },
    #[error(transparent)]
    Lex(#[from] LexError),
}

pub type ParseResult<T> = Result<T, ParseError>;

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token<'a>>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::EOF) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> ParseResult<Vec<Statement>> {
        let statement = match self.peek() {
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for(false)?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::With => self.parse_with(false)?,
            TokenKind::Def => self.parse_function_def(Vec::new(), false)?,
            TokenKind::Class => self.parse_class_def(Vec::new())?,
            TokenKind::At => self.parse_decorated()?,
            TokenKind::Async => self.parse_async()?,
            TokenKind::Identifier("match") => match self.try_parse_match()? {
                Some(statement) => statement,
                None => return self.parse_simple_statements(),
            },
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![statement])
    }

    fn parse_simple_statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = vec![self.parse_simple_statement()?];
        while self.eat(&TokenKind::Semicolon) {
            if self.check(&TokenKind::Newline) {
                break;
            }
            statements.push(self.parse_simple_statement()?);
        }
        self.expect(&TokenKind::Newline, "newline")?;
        Ok(statements)
    }

    fn parse_simple_statement(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        let kind = match self.peek() {
            TokenKind::Pass => {
                self.advance();
                StatementKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StatementKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StatementKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if self.at_statement_end() {
                    StatementKind::Return(None)
                } else {
                    StatementKind::Return(Some(self.parse_star_expressions()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StatementKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.parse_expression()?;
                    let cause = if self.eat(&TokenKind::From) {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    StatementKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            TokenKind::Global => {
                self.advance();
                StatementKind::Global(self.parse_name_list()?)
            }
            TokenKind::Nonlocal => {
                self.advance();
                StatementKind::Nonlocal(self.parse_name_list()?)
            }
            TokenKind::Del => {
                self.advance();
                let mut targets = vec![self.parse_bitwise_or()?];
                while self.eat(&TokenKind::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.parse_bitwise_or()?);
                }
                StatementKind::Delete(targets)
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expression()?;
                let msg = if self.eat(&TokenKind::Comma) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                StatementKind::Assert { test, msg }
            }
            TokenKind::Import | TokenKind::From => {
                return Err(self.invalid("import statements are not supported"));
            }
            _ => return self.parse_expression_statement(),
        };
        Ok(Statement {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        let first = self.parse_assignment_value()?;

        if let TokenKind::AugAssign(op) = *self.peek() {
            self.advance();
            let value = self.parse_assignment_value()?;
            return Ok(Statement {
                kind: StatementKind::AugAssign {
                    target: first,
                    op: aug_operator(op),
                    value,
                },
                span: self.span_from(start),
            });
        }

        if self.eat(&TokenKind::Colon) {
            let annotation = self.parse_expression()?;
            let value = if self.eat(&TokenKind::Equal) {
                Some(self.parse_assignment_value()?)
            } else {
                None
            };
            return Ok(Statement {
                kind: StatementKind::AnnAssign {
                    target: first,
                    annotation,
                    value,
                },
                span: self.span_from(start),
            });
        }

        if !self.check(&TokenKind::Equal) {
            return Ok(Statement {
                kind: StatementKind::Expr(first),
                span: self.span_from(start),
            });
        }

        let mut targets = vec![first];
        let mut value = None;
        while self.eat(&TokenKind::Equal) {
            let next = self.parse_assignment_value()?;
            if self.check(&TokenKind::Equal) {
                targets.push(next);
            } else {
                value = Some(next);
            }
        }
        let value = value.ok_or_else(|| self.invalid("assignment is missing a value"))?;
        Ok(Statement {
            kind: StatementKind::Assign { targets, value },
            span: self.span_from(start),
        })
    }

    fn parse_assignment_value(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Yield) {
            self.parse_yield()
        } else {
            self.parse_star_expressions()
        }
    }

    fn parse_name_list(&mut self) -> ParseResult<Vec<String>> {
        let mut names = vec![self.expect_identifier()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_identifier()?);
        }
        Ok(names)
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Statement>> {
        self.expect(&TokenKind::Colon, ":")?;
        if !self.eat(&TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        self.expect(&TokenKind::Indent, "indented block")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::EOF) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            body.extend(self.parse_statement()?);
        }
        self.eat(&TokenKind::Dedent);
        Ok(body)
    }

    fn parse_if(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        // `if` or `elif`
        self.advance();
        let test = self.parse_named_expression()?;
        let body = self.parse_block()?;
        let orelse = if self.check(&TokenKind::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Statement {
            kind: StatementKind::If { test, body, orelse },
            span: self.span_from(start),
        })
    }

    fn parse_while(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::While, "while")?;
        let test = self.parse_named_expression()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Statement {
            kind: StatementKind::While { test, body, orelse },
            span: self.span_from(start),
        })
    }

    fn parse_for(&mut self, is_async: bool) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::For, "for")?;
        let target = self.parse_target_list()?;
        self.expect(&TokenKind::In, "in")?;
        let iter = self.parse_star_expressions()?;
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        Ok(Statement {
            kind: StatementKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
            },
            span: self.span_from(start),
        })
    }

    fn parse_else_block(&mut self) -> ParseResult<Vec<Statement>> {
        if self.eat(&TokenKind::Else) {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_try(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::Try, "try")?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        let mut is_star = None;
        while self.check(&TokenKind::Except) {
            let handler_start = self.current_span();
            self.advance();
            let star = self.eat(&TokenKind::Star);
            if *is_star.get_or_insert(star) != star {
                return Err(self.invalid("cannot have both 'except' and 'except*' on the same 'try'"));
            }
            let (type_, name) = if self.check(&TokenKind::Colon) {
                if star {
                    return Err(self.invalid("expected one or more exception types"));
                }
                (None, None)
            } else {
                let type_ = self.parse_expression()?;
                let type_ = if self.check(&TokenKind::Comma) {
                    let mut elements = vec![type_];
                    while self.eat(&TokenKind::Comma) {
                        elements.push(self.parse_expression()?);
                    }
                    Expression::new(ExpressionKind::Tuple(elements), self.span_from(handler_start))
                } else {
                    type_
                };
                let name = if self.eat(&TokenKind::As) {
                    Some(self.expect_identifier()?)
                } else {
                    None
                };
                (Some(type_), name)
            };
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                type_,
                name,
                body: handler_body,
                span: self.span_from(handler_start),
            });
        }

        let orelse = if !handlers.is_empty() {
            self.parse_else_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(&TokenKind::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally' block"));
        }
        Ok(Statement {
            kind: StatementKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
                is_star: is_star.unwrap_or(false),
            },
            span: self.span_from(start),
        })
    }

    fn parse_with(&mut self, is_async: bool) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::With, "with")?;

        let items = if self.check(&TokenKind::LParen) {
            let saved = self.position;
            match self.parse_parenthesized_with_items() {
                Ok(items) => items,
                Err(_) => {
                    self.position = saved;
                    self.parse_with_items()?
                }
            }
        } else {
            self.parse_with_items()?
        };
        let body = self.parse_block()?;
        Ok(Statement {
            kind: StatementKind::With {
                items,
                body,
                is_async,
            },
            span: self.span_from(start),
        })
    }

    fn parse_parenthesized_with_items(&mut self) -> ParseResult<Vec<WithItem>> {
        self.expect(&TokenKind::LParen, "(")?;
        let mut items = vec![self.parse_with_item()?];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            items.push(self.parse_with_item()?);
        }
        self.expect(&TokenKind::RParen, ")")?;
        if !self.check(&TokenKind::Colon) {
            return Err(self.unexpected(":"));
        }
        Ok(items)
    }

    fn parse_with_items(&mut self) -> ParseResult<Vec<WithItem>> {
        let mut items = vec![self.parse_with_item()?];
        while self.eat(&TokenKind::Comma) {
            items.push(self.parse_with_item()?);
        }
        Ok(items)
    }

    fn parse_with_item(&mut self) -> ParseResult<WithItem> {
        let context = self.parse_expression()?;
        let target = if self.eat(&TokenKind::As) {
            Some(self.parse_target()?)
        } else {
            None
        };
        Ok(WithItem { context, target })
    }

    fn parse_decorated(&mut self) -> ParseResult<Statement> {
        let mut decorators = Vec::new();
        while self.eat(&TokenKind::At) {
            decorators.push(self.parse_named_expression()?);
            self.expect(&TokenKind::Newline, "newline")?;
        }
        match self.peek() {
            TokenKind::Def => self.parse_function_def(decorators, false),
            TokenKind::Class => self.parse_class_def(decorators),
            TokenKind::Async => {
                self.advance();
                self.parse_function_def(decorators, true)
            }
            _ => Err(self.unexpected("function or class definition")),
        }
    }

    fn parse_async(&mut self) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::Async, "async")?;
        let mut statement = match self.peek() {
            TokenKind::Def => self.parse_function_def(Vec::new(), true)?,
            TokenKind::For => self.parse_for(true)?,
            TokenKind::With => self.parse_with(true)?,
            _ => return Err(self.unexpected("'def', 'for' or 'with' after 'async'")),
        };
        statement.span = self.span_from(start);
        Ok(statement)
    }

    fn parse_function_def(
        &mut self,
        decorators: Vec<Expression>,
        is_async: bool,
    ) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::Def, "def")?;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::LParen, "(")?;
        let params = self.parse_parameters(&TokenKind::RParen, true)?;
        self.expect(&TokenKind::RParen, ")")?;
        let returns = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Statement {
            kind: StatementKind::FunctionDef(Box::new(FunctionDef {
                name,
                params,
                body,
                decorators,
                returns,
                is_async,
            })),
            span: self.span_from(start),
        })
    }

    fn parse_parameters(
        &mut self,
        closing: &TokenKind<'a>,
        allow_annotations: bool,
    ) -> ParseResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;

        while !self.check(closing) {
            if self.eat(&TokenKind::Slash) {
                if seen_star || !params.posonly.is_empty() || params.args.is_empty() {
                    return Err(self.invalid("'/' must follow at least one positional parameter"));
                }
                params.posonly = std::mem::take(&mut params.args);
            } else if self.eat(&TokenKind::DoubleStar) {
                params.kwarg = Some(self.parse_parameter(allow_annotations)?);
                self.eat(&TokenKind::Comma);
                break;
            } else if self.eat(&TokenKind::Star) {
                if seen_star {
                    return Err(self.invalid("'*' may appear only once"));
                }
                seen_star = true;
                if !self.check(&TokenKind::Comma) {
                    params.vararg = Some(self.parse_parameter(allow_annotations)?);
                }
            } else {
                let mut param = self.parse_parameter(allow_annotations)?;
                if self.eat(&TokenKind::Equal) {
                    param.default = Some(self.parse_expression()?);
                    if !seen_star {
                        seen_default = true;
                    }
                } else if seen_default && !seen_star {
                    return Err(self.invalid("non-default argument follows default argument"));
                }
                if seen_star {
                    params.kwonly.push(param);
                } else {
                    params.args.push(param);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_parameter(&mut self, allow_annotations: bool) -> ParseResult<Parameter> {
        let span = self.current_span();
        let name = self.expect_identifier()?;
        let annotation = if allow_annotations && self.eat(&TokenKind::Colon) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(Parameter {
            name,
            annotation,
            default: None,
            span,
        })
    }

    fn parse_class_def(&mut self, decorators: Vec<Expression>) -> ParseResult<Statement> {
        let start = self.current_span();
        self.expect(&TokenKind::Class, "class")?;
        let name = self.expect_identifier()?;
        let (bases, keywords) = if self.eat(&TokenKind::LParen) {
            let arguments = self.parse_call_arguments()?;
            self.expect(&TokenKind::RParen, ")")?;
            arguments
        } else {
            (Vec::new(), Vec::new())
        };
        let body = self.parse_block()?;
        Ok(Statement {
            kind: StatementKind::ClassDef(Box::new(ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            })),
            span: self.span_from(start),
        })
    }

    /// `match` is a soft keyword: fall back to an expression statement unless
    /// the line has the shape of a match statement.
    fn try_parse_match(&mut self) -> ParseResult<Option<Statement>> {
        let saved = self.position;
        let start = self.current_span();
        self.advance();
        let subject = match self.parse_star_named_expressions() {
            Ok(subject) => subject,
            Err(_) => {
                self.position = saved;
                return Ok(None);
            }
        };
        if !(self.check(&TokenKind::Colon)
            && matches!(self.peek_at(1), TokenKind::Newline)
            && matches!(self.peek_at(2), TokenKind::Indent)
            && matches!(self.peek_at(3), TokenKind::Identifier("case")))
        {
            self.position = saved;
            return Ok(None);
        }
        self.advance();
        self.advance();
        self.advance();

        let mut cases = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::EOF) {
            if self.eat(&TokenKind::Newline) {
                continue;
            }
            if !matches!(self.peek(), TokenKind::Identifier("case")) {
                return Err(self.unexpected("'case'"));
            }
            self.advance();
            let pattern = self.parse_case_patterns()?;
            let guard = if self.eat(&TokenKind::If) {
                Some(self.parse_named_expression()?)
            } else {
                None
            };
            let body = self.parse_block()?;
            cases.push(MatchCase {
                pattern,
                guard,
                body,
            });
        }
        self.eat(&TokenKind::Dedent);
        Ok(Some(Statement {
            kind: StatementKind::Match { subject, cases },
            span: self.span_from(start),
        }))
    }

    // ---- expressions -------------------------------------------------------

    /// Comma-separated expressions (with `*` items); more than one item, or a
    /// trailing comma, makes a tuple.
    pub(crate) fn parse_star_expressions(&mut self) -> ParseResult<Expression> {
        self.parse_expression_list(Self::parse_star_expression)
    }

    fn parse_star_named_expressions(&mut self) -> ParseResult<Expression> {
        self.parse_expression_list(|parser| {
            if parser.check(&TokenKind::Star) {
                parser.parse_star_expression()
            } else {
                parser.parse_named_expression()
            }
        })
    }

    fn parse_expression_list(
        &mut self,
        mut item: impl FnMut(&mut Self) -> ParseResult<Expression>,
    ) -> ParseResult<Expression> {
        let start = self.current_span();
        let first = item(self)?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            elements.push(item(self)?);
        }
        Ok(Expression::new(
            ExpressionKind::Tuple(elements),
            self.span_from(start),
        ))
    }

    fn parse_star_expression(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Star) {
            let start = self.current_span();
            self.advance();
            let value = self.parse_bitwise_or()?;
            return Ok(Expression::new(
                ExpressionKind::Starred(Box::new(value)),
                self.span_from(start),
            ));
        }
        self.parse_expression()
    }

    fn parse_target_list(&mut self) -> ParseResult<Expression> {
        self.parse_expression_list(Self::parse_target)
    }

    fn parse_target(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Star) {
            let start = self.current_span();
            self.advance();
            let value = self.parse_bitwise_or()?;
            return Ok(Expression::new(
                ExpressionKind::Starred(Box::new(value)),
                self.span_from(start),
            ));
        }
        self.parse_bitwise_or()
    }

    pub(crate) fn parse_named_expression(&mut self) -> ParseResult<Expression> {
        if let &TokenKind::Identifier(name) = self.peek()
            && matches!(self.peek_at(1), TokenKind::ColonEqual)
        {
            let start = self.current_span();
            self.advance();
            self.advance();
            let value = self.parse_expression()?;
            return Ok(Expression::new(
                ExpressionKind::NamedExpr {
                    target: name.to_string(),
                    value: Box::new(value),
                },
                self.span_from(start),
            ));
        }
        self.parse_expression()
    }

    pub(crate) fn parse_expression(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let start = self.current_span();
        let body = self.parse_disjunction()?;
        if !self.check(&TokenKind::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_disjunction()?;
        self.expect(&TokenKind::Else, "else")?;
        let orelse = self.parse_expression()?;
        Ok(Expression::new(
            ExpressionKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            self.span_from(start),
        ))
    }

    fn parse_expression_no_conditional(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        self.parse_disjunction()
    }

    fn parse_lambda(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        self.expect(&TokenKind::Lambda, "lambda")?;
        let params = self.parse_parameters(&TokenKind::Colon, false)?;
        self.expect(&TokenKind::Colon, ":")?;
        let body = self.parse_expression()?;
        Ok(Expression::new(
            ExpressionKind::Lambda {
                params: Box::new(params),
                body: Box::new(body),
            },
            self.span_from(start),
        ))
    }

    fn parse_disjunction(&mut self) -> ParseResult<Expression> {
        self.parse_bool_op(BoolOperator::Or)
    }

    fn parse_bool_op(&mut self, op: BoolOperator) -> ParseResult<Expression> {
        let start = self.current_span();
        let (token, operand): (TokenKind<'static>, fn(&mut Self) -> ParseResult<Expression>) =
            match op {
                BoolOperator::Or => (TokenKind::Or, |p| p.parse_bool_op(BoolOperator::And)),
                BoolOperator::And => (TokenKind::And, Self::parse_inversion),
            };
        let first = operand(self)?;
        if !self.check(&token) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&token) {
            values.push(operand(self)?);
        }
        Ok(Expression::new(
            ExpressionKind::BoolOp { op, values },
            self.span_from(start),
        ))
    }

    fn parse_inversion(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Not) {
            let start = self.current_span();
            self.advance();
            let operand = self.parse_inversion()?;
            return Ok(Expression::new(
                ExpressionKind::UnaryOp {
                    op: UnaryOperator::Not,
                    operand: Box::new(operand),
                },
                self.span_from(start),
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let left = self.parse_bitwise_or()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::EqEqual => ComparisonOperator::Eq,
                TokenKind::NotEqual => ComparisonOperator::NotEq,
                TokenKind::Less => ComparisonOperator::Lt,
                TokenKind::LessEqual => ComparisonOperator::LtE,
                TokenKind::Greater => ComparisonOperator::Gt,
                TokenKind::GreaterEqual => ComparisonOperator::GtE,
                TokenKind::In => ComparisonOperator::In,
                TokenKind::Not if matches!(self.peek_at(1), TokenKind::In) => {
                    self.advance();
                    ComparisonOperator::NotIn
                }
                TokenKind::Is => {
                    if matches!(self.peek_at(1), TokenKind::Not) {
                        self.advance();
                        ComparisonOperator::IsNot
                    } else {
                        ComparisonOperator::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitwise_or()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expression::new(
            ExpressionKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            self.span_from(start),
        ))
    }

    pub(crate) fn parse_bitwise_or(&mut self) -> ParseResult<Expression> {
        self.parse_binary_level(0)
    }

    /// Left-associative binary operator levels, loosest first.
    fn parse_binary_level(&mut self, level: usize) -> ParseResult<Expression> {
        const LEVELS: usize = 6;
        if level == LEVELS {
            return self.parse_factor();
        }
        let start = self.current_span();
        let mut left = self.parse_binary_level(level + 1)?;
        loop {
            let op = match (level, self.peek()) {
                (0, TokenKind::VBar) => BinaryOperator::BitOr,
                (1, TokenKind::Circumflex) => BinaryOperator::BitXor,
                (2, TokenKind::Amper) => BinaryOperator::BitAnd,
                (3, TokenKind::LeftShift) => BinaryOperator::LShift,
                (3, TokenKind::RightShift) => BinaryOperator::RShift,
                (4, TokenKind::Plus) => BinaryOperator::Add,
                (4, TokenKind::Minus) => BinaryOperator::Sub,
                (5, TokenKind::Star) => BinaryOperator::Mul,
                (5, TokenKind::Slash) => BinaryOperator::Div,
                (5, TokenKind::DoubleSlash) => BinaryOperator::FloorDiv,
                (5, TokenKind::Percent) => BinaryOperator::Mod,
                (5, TokenKind::At) => BinaryOperator::MatMul,
                _ => break,
            };
            self.advance();
            let right = self.parse_binary_level(level + 1)?;
            left = Expression::new(
                ExpressionKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> ParseResult<Expression> {
        let op = match self.peek() {
            TokenKind::Plus => UnaryOperator::UAdd,
            TokenKind::Minus => UnaryOperator::USub,
            TokenKind::Tilde => UnaryOperator::Invert,
            _ => return self.parse_power(),
        };
        let start = self.current_span();
        self.advance();
        let operand = self.parse_factor()?;
        Ok(Expression::new(
            ExpressionKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            self.span_from(start),
        ))
    }

    fn parse_power(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let base = if self.eat(&TokenKind::Await) {
            let value = self.parse_primary()?;
            Expression::new(
                ExpressionKind::Await(Box::new(value)),
                self.span_from(start),
            )
        } else {
            self.parse_primary()?
        };
        if !self.eat(&TokenKind::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.parse_factor()?;
        Ok(Expression::new(
            ExpressionKind::BinOp {
                left: Box::new(base),
                op: BinaryOperator::Pow,
                right: Box::new(exponent),
            },
            self.span_from(start),
        ))
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let attr = self.expect_identifier()?;
                    expr = Expression::new(
                        ExpressionKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_arguments()?;
                    self.expect(&TokenKind::RParen, ")")?;
                    expr = Expression::new(
                        ExpressionKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        self.span_from(start),
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_slices()?;
                    self.expect(&TokenKind::RBracket, "]")?;
                    expr = Expression::new(
                        ExpressionKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        self.span_from(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_call_arguments(&mut self) -> ParseResult<(Vec<Expression>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let start = self.current_span();
            if self.eat(&TokenKind::DoubleStar) {
                let value = self.parse_expression()?;
                keywords.push(Keyword { arg: None, value });
            } else if self.eat(&TokenKind::Star) {
                let value = self.parse_expression()?;
                args.push(Expression::new(
                    ExpressionKind::Starred(Box::new(value)),
                    self.span_from(start),
                ));
            } else if let &TokenKind::Identifier(name) = self.peek()
                && matches!(self.peek_at(1), TokenKind::Equal)
            {
                self.advance();
                self.advance();
                let value = self.parse_expression()?;
                keywords.push(Keyword {
                    arg: Some(name.to_string()),
                    value,
                });
            } else {
                let value = self.parse_named_expression()?;
                if self.check(&TokenKind::For) || self.check(&TokenKind::Async) {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expression::new(
                        ExpressionKind::GeneratorExp {
                            element: Box::new(value),
                            generators,
                        },
                        self.span_from(start),
                    ));
                } else {
                    if keywords.iter().any(|k| k.arg.is_some()) {
                        return Err(self.invalid("positional argument follows keyword argument"));
                    }
                    args.push(value);
                }
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn parse_slices(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let first = self.parse_slice()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_slice()?);
        }
        Ok(Expression::new(
            ExpressionKind::Tuple(elements),
            self.span_from(start),
        ))
    }

    fn parse_slice(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else if self.check(&TokenKind::Star) {
            return self.parse_star_expression();
        } else {
            let value = self.parse_named_expression()?;
            if !self.check(&TokenKind::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect(&TokenKind::Colon, ":")?;
        let upper = if self.starts_expression() {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        let step = if self.eat(&TokenKind::Colon) && self.starts_expression() {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expression::new(
            ExpressionKind::Slice { lower, upper, step },
            self.span_from(start),
        ))
    }

    fn parse_atom(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        let kind = match self.peek() {
            &TokenKind::Identifier(name) => {
                self.advance();
                ExpressionKind::Name(name.to_string())
            }
            &TokenKind::Integer(value) => {
                self.advance();
                ExpressionKind::Constant(Constant::Int(value))
            }
            &TokenKind::Float(value) => {
                self.advance();
                ExpressionKind::Constant(Constant::Float(value))
            }
            TokenKind::True => {
                self.advance();
                ExpressionKind::Constant(Constant::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExpressionKind::Constant(Constant::Bool(false))
            }
            TokenKind::None => {
                self.advance();
                ExpressionKind::Constant(Constant::None)
            }
            TokenKind::Ellipsis => {
                self.advance();
                ExpressionKind::Constant(Constant::Ellipsis)
            }
            TokenKind::String(_) | TokenKind::FString { .. } => self.parse_strings()?,
            TokenKind::LParen => return self.parse_parenthesized(),
            TokenKind::LBracket => return self.parse_list_display(),
            TokenKind::LBrace => return self.parse_brace_display(),
            TokenKind::Yield => return Err(self.invalid("'yield' outside parentheses")),
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expression::new(kind, self.span_from(start)))
    }

    fn parse_strings(&mut self) -> ParseResult<ExpressionKind> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        loop {
            let token = self.peek_token().clone();
            match token.kind {
                TokenKind::String(value) => {
                    self.advance();
                    push_literal(&mut parts, &value);
                }
                TokenKind::FString {
                    body,
                    raw,
                    body_start,
                } => {
                    self.advance();
                    formatted = true;
                    let column = token.span.column + (body_start - token.span.start);
                    let body_parts =
                        fstring::parse_fstring(body, raw, body_start, token.span.line, column)?;
                    for part in body_parts {
                        match part {
                            FStringPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(ExpressionKind::FString(parts));
        }
        let value = match parts.pop() {
            Some(FStringPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(ExpressionKind::Constant(Constant::Str(value)))
    }

    fn parse_parenthesized(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        self.expect(&TokenKind::LParen, "(")?;
        if self.eat(&TokenKind::RParen) {
            return Ok(Expression::new(
                ExpressionKind::Tuple(Vec::new()),
                self.span_from(start),
            ));
        }
        if self.check(&TokenKind::Yield) {
            let value = self.parse_yield()?;
            self.expect(&TokenKind::RParen, ")")?;
            return Ok(value);
        }

        let first = if self.check(&TokenKind::Star) {
            self.parse_star_expression()?
        } else {
            self.parse_named_expression()?
        };
        if self.check(&TokenKind::For) || self.check(&TokenKind::Async) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RParen, ")")?;
            return Ok(Expression::new(
                ExpressionKind::GeneratorExp {
                    element: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }
        if self.eat(&TokenKind::RParen) {
            if matches!(first.kind, ExpressionKind::Starred(_)) {
                return Err(self.invalid("cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RParen) {
                break;
            }
            elements.push(self.parse_star_named_item()?);
        }
        self.expect(&TokenKind::RParen, ")")?;
        Ok(Expression::new(
            ExpressionKind::Tuple(elements),
            self.span_from(start),
        ))
    }

    fn parse_star_named_item(&mut self) -> ParseResult<Expression> {
        if self.check(&TokenKind::Star) {
            self.parse_star_expression()
        } else {
            self.parse_named_expression()
        }
    }

    fn parse_list_display(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        self.expect(&TokenKind::LBracket, "[")?;
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expression::new(
                ExpressionKind::List(Vec::new()),
                self.span_from(start),
            ));
        }
        let first = self.parse_star_named_item()?;
        if self.check(&TokenKind::For) || self.check(&TokenKind::Async) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RBracket, "]")?;
            return Ok(Expression::new(
                ExpressionKind::ListComp {
                    element: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_star_named_item()?);
        }
        self.expect(&TokenKind::RBracket, "]")?;
        Ok(Expression::new(
            ExpressionKind::List(elements),
            self.span_from(start),
        ))
    }

    fn parse_brace_display(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        self.expect(&TokenKind::LBrace, "{")?;
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expression::new(
                ExpressionKind::Dict(Vec::new()),
                self.span_from(start),
            ));
        }

        if self.eat(&TokenKind::DoubleStar) {
            let value = self.parse_bitwise_or()?;
            return self.finish_dict(start, vec![(None, value)]);
        }

        let first = self.parse_star_named_item()?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_expression()?;
            if self.check(&TokenKind::For) || self.check(&TokenKind::Async) {
                let generators = self.parse_comprehension_clauses()?;
                self.expect(&TokenKind::RBrace, "}")?;
                return Ok(Expression::new(
                    ExpressionKind::DictComp {
                        key: Box::new(first),
                        value: Box::new(value),
                        generators,
                    },
                    self.span_from(start),
                ));
            }
            return self.finish_dict(start, vec![(Some(first), value)]);
        }

        if self.check(&TokenKind::For) || self.check(&TokenKind::Async) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&TokenKind::RBrace, "}")?;
            return Ok(Expression::new(
                ExpressionKind::SetComp {
                    element: Box::new(first),
                    generators,
                },
                self.span_from(start),
            ));
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            elements.push(self.parse_star_named_item()?);
        }
        self.expect(&TokenKind::RBrace, "}")?;
        Ok(Expression::new(
            ExpressionKind::Set(elements),
            self.span_from(start),
        ))
    }

    fn finish_dict(
        &mut self,
        start: Span,
        mut items: Vec<(Option<Expression>, Expression)>,
    ) -> ParseResult<Expression> {
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            if self.eat(&TokenKind::DoubleStar) {
                items.push((None, self.parse_bitwise_or()?));
                continue;
            }
            let key = self.parse_expression()?;
            self.expect(&TokenKind::Colon, ":")?;
            let value = self.parse_expression()?;
            items.push((Some(key), value));
        }
        self.expect(&TokenKind::RBrace, "}")?;
        Ok(Expression::new(
            ExpressionKind::Dict(items),
            self.span_from(start),
        ))
    }

    fn parse_comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        loop {
            let is_async = self.eat(&TokenKind::Async);
            if !self.eat(&TokenKind::For) {
                if is_async {
                    return Err(self.unexpected("for"));
                }
                break;
            }
            let target = self.parse_target_list()?;
            self.expect(&TokenKind::In, "in")?;
            let iter = self.parse_disjunction()?;
            let mut ifs = Vec::new();
            while self.eat(&TokenKind::If) {
                ifs.push(self.parse_expression_no_conditional()?);
            }
            generators.push(Comprehension {
                target,
                iter,
                ifs,
                is_async,
            });
        }
        Ok(generators)
    }

    fn parse_yield(&mut self) -> ParseResult<Expression> {
        let start = self.current_span();
        self.expect(&TokenKind::Yield, "yield")?;
        if self.eat(&TokenKind::From) {
            let value = self.parse_expression()?;
            return Ok(Expression::new(
                ExpressionKind::YieldFrom(Box::new(value)),
                self.span_from(start),
            ));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_star_expressions()?))
        } else {
            None
        };
        Ok(Expression::new(
            ExpressionKind::Yield(value),
            self.span_from(start),
        ))
    }

    // ---- token helpers -----------------------------------------------------

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Identifier(_)
                | TokenKind::Integer(_)
                | TokenKind::Float(_)
                | TokenKind::String(_)
                | TokenKind::FString { .. }
                | TokenKind::True
                | TokenKind::False
                | TokenKind::None
                | TokenKind::Ellipsis
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Await
                | TokenKind::Star
                | TokenKind::Yield
        )
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::EOF
        )
    }

    fn peek_token(&self) -> &Token<'a> {
        let index = self.position.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek(&self) -> &TokenKind<'a> {
        &self.peek_token().kind
    }

    fn peek_at(&self, distance: usize) -> &TokenKind<'a> {
        let index = (self.position + distance).min(self.tokens.len().saturating_sub(1));
        &self.tokens[index].kind
    }

    fn check(&self, kind: &TokenKind<'_>) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind<'_>) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind<'_>, expected: &str) -> ParseResult<Span> {
        if self.check(kind) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let &TokenKind::Identifier(name) = self.peek() {
            self.advance();
            Ok(name.to_string())
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn current_span(&self) -> Span {
        self.peek_token().span
    }

    fn previous_end(&self) -> usize {
        self.position
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map(|token| token.span.end)
            .unwrap_or(0)
    }

    fn span_from(&self, start: Span) -> Span {
        Span {
            end: self.previous_end().max(start.start),
            ..start
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek_token();
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: describe_token(&token.kind),
            line: token.span.line,
            column: token.span.column,
        }
    }

    fn invalid(&self, message: &str) -> ParseError {
        let span = self.current_span();
        ParseError::Invalid {
            message: message.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

fn aug_operator(op: AugOperator) -> BinaryOperator {
    match op {
        AugOperator::Add => BinaryOperator::Add,
        AugOperator::Sub => BinaryOperator::Sub,
        AugOperator::Mul => BinaryOperator::Mul,
        AugOperator::MatMul => BinaryOperator::MatMul,
        AugOperator::Div => BinaryOperator::Div,
        AugOperator::FloorDiv => BinaryOperator::FloorDiv,
        AugOperator::Mod => BinaryOperator::Mod,
        AugOperator::Pow => BinaryOperator::Pow,
        AugOperator::LShift => BinaryOperator::LShift,
        AugOperator::RShift => BinaryOperator::RShift,
        AugOperator::BitAnd => BinaryOperator::BitAnd,
        AugOperator::BitOr => BinaryOperator::BitOr,
        AugOperator::BitXor => BinaryOperator::BitXor,
    }
}

fn describe_token(kind: &TokenKind<'_>) -> String {
    match kind {
        TokenKind::Identifier(name) => format!("identifier '{name}'"),
        TokenKind::Integer(value) => format!("integer {value}"),
        TokenKind::Float(value) => format!("float {value}"),
        TokenKind::String(_) | TokenKind::FString { .. } => "string literal".to_string(),
        TokenKind::Newline => "newline".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        TokenKind::EOF => "end of file".to_string(),
        other => format!("{other:?}"),
    }
}

/// Parses an already tokenized module.
pub fn parse_tokens(tokens: Vec<Token<'_>>) -> ParseResult<Program> {
    Parser::new(tokens).parse_program()
}

pub fn parse(input: &str) -> ParseResult<Program> {
    let tokens = lexer::tokenize(input)?;
    parse_tokens(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::PatternKind;
    use indoc::indoc;

    fn name(id: &str) -> ExpressionKind {
        ExpressionKind::Name(id.to_string())
    }

    #[test]
    fn parses_simple_program() {
        let input = indoc! {"
            def fn():
                n = 4 + 4
                print(n)
            fn()
        "};
        let program = parse(input).expect("parse failed");
        assert_eq!(program.body.len(), 2);

        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected function definition");
        };
        assert_eq!(def.name, "fn");
        assert_eq!(def.body.len(), 2);
        let StatementKind::Assign { targets, value } = &def.body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(targets[0].kind, name("n"));
        assert!(matches!(
            value.kind,
            ExpressionKind::BinOp {
                op: BinaryOperator::Add,
                ..
            }
        ));
        assert!(matches!(
            &program.body[1].kind,
            StatementKind::Expr(Expression {
                kind: ExpressionKind::Call { .. },
                ..
            })
        ));
    }

    #[test]
    fn respects_operator_precedence() {
        let program = parse("x = 1 + 2 * 3 ** 2\n").expect("parse");
        let StatementKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let ExpressionKind::BinOp { op, right, .. } = &value.kind else {
            panic!("expected binop");
        };
        assert_eq!(*op, BinaryOperator::Add);
        let ExpressionKind::BinOp { op, right, .. } = &right.kind else {
            panic!("expected nested binop");
        };
        assert_eq!(*op, BinaryOperator::Mul);
        assert!(matches!(
            right.kind,
            ExpressionKind::BinOp {
                op: BinaryOperator::Pow,
                ..
            }
        ));
    }

    #[test]
    fn parses_full_parameter_list() {
        let program = parse("def f(a, /, b=2, *args, c, d=4, **kw): pass\n").expect("parse");
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected function definition");
        };
        assert_eq!(def.params.posonly.len(), 1);
        assert_eq!(def.params.args.len(), 1);
        assert_eq!(def.params.vararg.as_ref().map(|p| p.name.as_str()), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwarg.as_ref().map(|p| p.name.as_str()), Some("kw"));
        assert_eq!(
            def.params.names(),
            vec!["a", "b", "c", "d", "args", "kw"]
        );
    }

    #[test]
    fn parses_chained_comparison_with_not_in() {
        let program = parse("a < b not in c is not d\n").expect("parse");
        let StatementKind::Expr(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExpressionKind::Compare { ops, .. } = &expr.kind else {
            panic!("expected comparison");
        };
        assert_eq!(
            ops,
            &vec![
                ComparisonOperator::Lt,
                ComparisonOperator::NotIn,
                ComparisonOperator::IsNot
            ]
        );
    }

    #[test]
    fn parses_comprehensions_and_generator_argument() {
        let program = parse("total(x * 2 for x in xs if x)\n").expect("parse");
        let StatementKind::Expr(expr) = &program.body[0].kind else {
            panic!("expected expression statement");
        };
        let ExpressionKind::Call { args, .. } = &expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(
            &args[0].kind,
            ExpressionKind::GeneratorExp { generators, .. } if generators[0].ifs.len() == 1
        ));
    }

    #[test]
    fn treats_match_as_soft_keyword() {
        let input = indoc! {"
            match = 1
            match point:
                case (0, y):
                    pass
                case Point(x=0) | [_, *rest]:
                    pass
        "};
        let program = parse(input).expect("parse");
        assert!(matches!(program.body[0].kind, StatementKind::Assign { .. }));
        let StatementKind::Match { cases, .. } = &program.body[1].kind else {
            panic!("expected match statement");
        };
        assert_eq!(cases.len(), 2);
        assert!(matches!(cases[0].pattern.kind, PatternKind::Sequence(_)));
        assert!(matches!(cases[1].pattern.kind, PatternKind::Or(_)));
    }

    #[test]
    fn parses_try_star_and_finally() {
        let input = indoc! {"
            try:
                pass
            except* ValueError as eg:
                pass
            finally:
                pass
        "};
        let program = parse(input).expect("parse");
        assert!(matches!(
            &program.body[0].kind,
            StatementKind::Try { is_star: true, handlers, finalbody, .. }
                if handlers.len() == 1 && finalbody.len() == 1
        ));
    }

    #[test]
    fn rejects_mixed_except_forms() {
        let input = indoc! {"
            try:
                pass
            except ValueError:
                pass
            except* TypeError:
                pass
        "};
        let err = parse(input).expect_err("mixed except forms");
        assert!(err.to_string().contains("except*"));
    }

    #[test]
    fn reports_unexpected_token_with_position() {
        let err = parse("x = )\n").expect_err("expected parse failure");
        assert!(matches!(err, ParseError::Lex(LexError::UnmatchedDelimiter { .. })));
        let err = parse("x = = 1\n").expect_err("expected parse failure");
        assert!(matches!(
            err,
            ParseError::UnexpectedToken { line: 1, .. }
        ));
    }

    #[test]
    fn parses_yield_statements() {
        let input = indoc! {"
            def gen(inner):
                yield
                yield 1, 2
                yield from inner
                total = yield 3
        "};
        let program = parse(input).expect("parse");
        let StatementKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected function definition");
        };
        assert!(matches!(
            &def.body[0].kind,
            StatementKind::Expr(Expression { kind: ExpressionKind::Yield(None), .. })
        ));
        assert!(matches!(
            &def.body[1].kind,
            StatementKind::Expr(Expression { kind: ExpressionKind::Yield(Some(_)), .. })
        ));
        assert!(matches!(
            &def.body[2].kind,
            StatementKind::Expr(Expression { kind: ExpressionKind::YieldFrom(_), .. })
        ));
        assert!(matches!(
            &def.body[3].kind,
            StatementKind::Assign { value: Expression { kind: ExpressionKind::Yield(Some(_)), .. }, .. }
        ));
    }

    #[test]
    fn concatenates_adjacent_string_literals() {
        let program = parse("s = 'a' \"b\"\n").expect("parse");
        let StatementKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(
            value.kind,
            ExpressionKind::Constant(Constant::Str("ab".to_string()))
        );
    }
}
