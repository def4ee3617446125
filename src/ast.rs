//! Syntax tree consumed by the scope resolver and the IR builder.
//!
//! Every statement and expression carries a span running from its first to its
//! last token (line and column are those of the first token). The `(start, end)`
//! offsets double as a stable key when the resolver attaches a scope to a
//! function, class, lambda or comprehension node.

use crate::token::Span;

#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum StatementKind {
    Expr(Expression),
    Assign {
        targets: Vec<Expression>,
        value: Expression,
    },
    AugAssign {
        target: Expression,
        op: BinaryOperator,
        value: Expression,
    },
    AnnAssign {
        target: Expression,
        annotation: Expression,
        value: Option<Expression>,
    },
    Delete(Vec<Expression>),
    Pass,
    Break,
    Continue,
    Return(Option<Expression>),
    Raise {
        exc: Option<Expression>,
        cause: Option<Expression>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Assert {
        test: Expression,
        msg: Option<Expression>,
    },
    If {
        test: Expression,
        body: Vec<Statement>,
        orelse: Vec<Statement>,
    },
    While {
        test: Expression,
        body: Vec<Statement>,
        orelse: Vec<Statement>,
    },
    For {
        target: Expression,
        iter: Expression,
        body: Vec<Statement>,
        orelse: Vec<Statement>,
        is_async: bool,
    },
    Try {
        body: Vec<Statement>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Statement>,
        finalbody: Vec<Statement>,
        is_star: bool,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Statement>,
        is_async: bool,
    },
    FunctionDef(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
    Match {
        subject: Expression,
        cases: Vec<MatchCase>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct ExceptHandler {
    pub type_: Option<Expression>,
    pub name: Option<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct WithItem {
    pub context: Expression,
    pub target: Option<Expression>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Parameters,
    pub body: Vec<Statement>,
    pub decorators: Vec<Expression>,
    pub returns: Option<Expression>,
    pub is_async: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<Expression>,
    pub keywords: Vec<Keyword>,
    pub body: Vec<Statement>,
    pub decorators: Vec<Expression>,
}

/// Formal parameters in declaration order.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Parameters {
    pub posonly: Vec<Parameter>,
    pub args: Vec<Parameter>,
    pub vararg: Option<Parameter>,
    pub kwonly: Vec<Parameter>,
    pub kwarg: Option<Parameter>,
}

impl Parameters {
    /// Positional parameters (positional-only first) with their defaults.
    pub fn positional(&self) -> impl Iterator<Item = &Parameter> {
        self.posonly.iter().chain(self.args.iter())
    }

    /// All parameter names in frame-slot order: positional, keyword-only,
    /// then `*args` and `**kwargs`.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.positional().map(|p| p.name.as_str()).collect();
        names.extend(self.kwonly.iter().map(|p| p.name.as_str()));
        names.extend(self.vararg.iter().map(|p| p.name.as_str()));
        names.extend(self.kwarg.iter().map(|p| p.name.as_str()));
        names
    }

    pub fn all(&self) -> impl Iterator<Item = &Parameter> {
        self.positional()
            .chain(self.vararg.iter())
            .chain(self.kwonly.iter())
            .chain(self.kwarg.iter())
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<Expression>,
    pub default: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Keyword {
    /// `None` for `**mapping` unpacking.
    pub arg: Option<String>,
    pub value: Expression,
}

#[derive(Debug, PartialEq, Clone)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expression>,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, PartialEq, Clone)]
pub enum PatternKind {
    /// Literal or dotted-name value compared with `==`.
    Value(Expression),
    /// `None`, `True` or `False`, compared with `is`.
    Singleton(Constant),
    Sequence(Vec<Pattern>),
    /// `*name` inside a sequence pattern; `None` for `*_`.
    Star(Option<String>),
    Mapping {
        keys: Vec<Expression>,
        patterns: Vec<Pattern>,
        rest: Option<String>,
    },
    Class {
        cls: Expression,
        patterns: Vec<Pattern>,
        kwd_attrs: Vec<String>,
        kwd_patterns: Vec<Pattern>,
    },
    /// Capture (`name`), wildcard (`_`, no pattern and no name) or `pattern as name`.
    As {
        pattern: Option<Box<Pattern>>,
        name: Option<String>,
    },
    Or(Vec<Pattern>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub span: Span,
}

impl Expression {
    pub fn new(kind: ExpressionKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExpressionKind {
    BoolOp {
        op: BoolOperator,
        values: Vec<Expression>,
    },
    NamedExpr {
        target: String,
        value: Box<Expression>,
    },
    BinOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Lambda {
        params: Box<Parameters>,
        body: Box<Expression>,
    },
    IfExp {
        test: Box<Expression>,
        body: Box<Expression>,
        orelse: Box<Expression>,
    },
    /// Items with a `None` key are `**mapping` unpackings.
    Dict(Vec<(Option<Expression>, Expression)>),
    Set(Vec<Expression>),
    List(Vec<Expression>),
    Tuple(Vec<Expression>),
    ListComp {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expression>,
        value: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        element: Box<Expression>,
        generators: Vec<Comprehension>,
    },
    Await(Box<Expression>),
    Yield(Option<Box<Expression>>),
    YieldFrom(Box<Expression>),
    Compare {
        left: Box<Expression>,
        ops: Vec<ComparisonOperator>,
        comparators: Vec<Expression>,
    },
    Call {
        func: Box<Expression>,
        args: Vec<Expression>,
        keywords: Vec<Keyword>,
    },
    FString(Vec<FStringPart>),
    Constant(Constant),
    Attribute {
        value: Box<Expression>,
        attr: String,
    },
    Subscript {
        value: Box<Expression>,
        index: Box<Expression>,
    },
    Starred(Box<Expression>),
    Name(String),
    Slice {
        lower: Option<Box<Expression>>,
        upper: Option<Box<Expression>>,
        step: Option<Box<Expression>>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct Comprehension {
    pub target: Expression,
    pub iter: Expression,
    pub ifs: Vec<Expression>,
    pub is_async: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub enum FStringPart {
    Literal(String),
    Field {
        value: Box<Expression>,
        conversion: Option<char>,
        format_spec: Option<Vec<FStringPart>>,
        /// Source text (including `=`) echoed by self-documenting fields.
        debug_text: Option<String>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::MatMul => "@",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }

    /// Forward and reflected dunder names.
    pub fn dunders(self) -> (&'static str, &'static str) {
        match self {
            Self::Add => ("__add__", "__radd__"),
            Self::Sub => ("__sub__", "__rsub__"),
            Self::Mul => ("__mul__", "__rmul__"),
            Self::MatMul => ("__matmul__", "__rmatmul__"),
            Self::Div => ("__truediv__", "__rtruediv__"),
            Self::FloorDiv => ("__floordiv__", "__rfloordiv__"),
            Self::Mod => ("__mod__", "__rmod__"),
            Self::Pow => ("__pow__", "__rpow__"),
            Self::LShift => ("__lshift__", "__rlshift__"),
            Self::RShift => ("__rshift__", "__rrshift__"),
            Self::BitAnd => ("__and__", "__rand__"),
            Self::BitOr => ("__or__", "__ror__"),
            Self::BitXor => ("__xor__", "__rxor__"),
        }
    }

    pub fn inplace_dunder(self) -> &'static str {
        match self {
            Self::Add => "__iadd__",
            Self::Sub => "__isub__",
            Self::Mul => "__imul__",
            Self::MatMul => "__imatmul__",
            Self::Div => "__itruediv__",
            Self::FloorDiv => "__ifloordiv__",
            Self::Mod => "__imod__",
            Self::Pow => "__ipow__",
            Self::LShift => "__ilshift__",
            Self::RShift => "__irshift__",
            Self::BitAnd => "__iand__",
            Self::BitOr => "__ior__",
            Self::BitXor => "__ixor__",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum UnaryOperator {
    Not,
    Invert,
    UAdd,
    USub,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl ComparisonOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}
