use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Invalid dedent to {indent_level} spaces at line {line}, column {column}")]
    InvalidDedent {
        indent_level: usize,
        line: usize,
        column: usize,
    },
    #[error("Unexpected character '{character}' at line {line}, column {column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Tabs are not supported for indentation at line {line}, column {column}")]
    TabIndentation { line: usize, column: usize },
    #[error("Invalid numeric literal '{literal}' at line {line}, column {column}")]
    InvalidNumber {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Unsupported string prefix '{prefix}' at line {line}, column {column}")]
    UnsupportedPrefix {
        prefix: String,
        line: usize,
        column: usize,
    },
    #[error("Invalid escape sequence '\\{sequence}' at line {line}, column {column}")]
    InvalidEscape {
        sequence: String,
        line: usize,
        column: usize,
    },
    #[error("Unmatched '{delimiter}' at line {line}, column {column}")]
    UnmatchedDelimiter {
        delimiter: char,
        line: usize,
        column: usize,
    },
}

pub type LexResult<T> = Result<T, LexError>;
