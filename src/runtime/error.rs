use std::fmt;

use thiserror::Error;

use crate::runtime::value::Value;

/// Builtin exception classes the runtime can raise without a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    StopIteration,
    GeneratorExit,
    AssertionError,
    ExceptionGroup,
}

impl ExceptionKind {
    /// Declaration order; every kind appears after its base.
    pub const ALL: [ExceptionKind; 20] = [
        Self::BaseException,
        Self::Exception,
        Self::ArithmeticError,
        Self::ZeroDivisionError,
        Self::OverflowError,
        Self::LookupError,
        Self::IndexError,
        Self::KeyError,
        Self::ValueError,
        Self::TypeError,
        Self::NameError,
        Self::UnboundLocalError,
        Self::AttributeError,
        Self::RuntimeError,
        Self::RecursionError,
        Self::NotImplementedError,
        Self::StopIteration,
        Self::GeneratorExit,
        Self::AssertionError,
        Self::ExceptionGroup,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::BaseException => "BaseException",
            Self::Exception => "Exception",
            Self::ArithmeticError => "ArithmeticError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::OverflowError => "OverflowError",
            Self::LookupError => "LookupError",
            Self::IndexError => "IndexError",
            Self::KeyError => "KeyError",
            Self::ValueError => "ValueError",
            Self::TypeError => "TypeError",
            Self::NameError => "NameError",
            Self::UnboundLocalError => "UnboundLocalError",
            Self::AttributeError => "AttributeError",
            Self::RuntimeError => "RuntimeError",
            Self::RecursionError => "RecursionError",
            Self::NotImplementedError => "NotImplementedError",
            Self::StopIteration => "StopIteration",
            Self::GeneratorExit => "GeneratorExit",
            Self::AssertionError => "AssertionError",
            Self::ExceptionGroup => "ExceptionGroup",
        }
    }

    pub fn base(self) -> Option<ExceptionKind> {
        Some(match self {
            Self::BaseException => return None,
            Self::Exception | Self::GeneratorExit => Self::BaseException,
            Self::ZeroDivisionError | Self::OverflowError => Self::ArithmeticError,
            Self::IndexError | Self::KeyError => Self::LookupError,
            Self::UnboundLocalError => Self::NameError,
            Self::RecursionError | Self::NotImplementedError => Self::RuntimeError,
            _ => Self::Exception,
        })
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An exception in flight. Builtin failures stay cheap until Python code
/// observes them; anything raised by user code is already an object.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("{kind}: {message}")]
    Builtin { kind: ExceptionKind, message: String },
    #[error("exception object")]
    Object(Value),
}

pub type RtResult<T> = Result<T, RuntimeError>;

/// Longest string or sequence that repetition, padding or formatting may
/// build, counted in items or characters.
pub const MAX_BUILT_LEN: usize = 1 << 31;

/// Rejects a requested length above `MAX_BUILT_LEN` with `OverflowError`.
pub fn check_built_len(len: usize, what: &str) -> RtResult<usize> {
    if len > MAX_BUILT_LEN {
        return Err(RuntimeError::too_long(what));
    }
    Ok(len)
}

impl RuntimeError {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self::Builtin {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::AttributeError, message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ExceptionKind::OverflowError, "integer overflow")
    }

    pub fn too_long(what: &str) -> Self {
        Self::new(ExceptionKind::OverflowError, format!("{what} is too long"))
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(
            ExceptionKind::NameError,
            format!("name '{name}' is not defined"),
        )
    }

    pub fn unbound_local(name: &str) -> Self {
        Self::new(
            ExceptionKind::UnboundLocalError,
            format!("cannot access local variable '{name}' where it is not associated with a value"),
        )
    }

    pub fn no_attribute(type_name: &str, attribute: &str) -> Self {
        Self::attribute_error(format!(
            "'{type_name}' object has no attribute '{attribute}'"
        ))
    }

    pub fn unhashable(type_name: &str) -> Self {
        Self::type_error(format!("unhashable type: '{type_name}'"))
    }

    pub fn not_callable(type_name: &str) -> Self {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    pub fn not_iterable(type_name: &str) -> Self {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    /// Builtin kind of an unmaterialised error.
    pub fn kind(&self) -> Option<ExceptionKind> {
        match self {
            Self::Builtin { kind, .. } => Some(*kind),
            Self::Object(_) => None,
        }
    }

    pub fn expect_arity(
        name: &str,
        min: usize,
        max: usize,
        found: usize,
    ) -> Result<(), RuntimeError> {
        if (min..=max).contains(&found) {
            return Ok(());
        }
        let message = if min == max {
            match min {
                0 => format!("{name}() takes no arguments ({found} given)"),
                1 => format!("{name}() takes exactly one argument ({found} given)"),
                _ => format!("{name}() takes exactly {min} arguments ({found} given)"),
            }
        } else if found < min {
            format!("{name} expected at least {min} argument{}, got {found}", plural(min))
        } else {
            format!("{name} expected at most {max} argument{}, got {found}", plural(max))
        };
        Err(Self::type_error(message))
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Arity or keyword mismatch found while binding call arguments to
/// parameters. Raised as `TypeError` before the callee runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentBindingError {
    #[error("{function}() takes {expected} positional argument{} but {given} {} given", if .expected.as_str() == "1" { "" } else { "s" }, if *.given == 1 { "was" } else { "were" })]
    TooManyPositional {
        function: String,
        expected: String,
        given: usize,
    },
    #[error("{function}() missing {} required positional argument{}: {}", .names.len(), plural(.names.len()), quote_names(.names))]
    MissingPositional { function: String, names: Vec<String> },
    #[error("{function}() missing {} required keyword-only argument{}: {}", .names.len(), plural(.names.len()), quote_names(.names))]
    MissingKeywordOnly { function: String, names: Vec<String> },
    #[error("{function}() got an unexpected keyword argument '{name}'")]
    UnexpectedKeyword { function: String, name: String },
    #[error("{function}() got multiple values for argument '{name}'")]
    MultipleValues { function: String, name: String },
    #[error("{function}() got some positional-only arguments passed as keyword arguments: '{name}'")]
    PositionalOnlyAsKeyword { function: String, name: String },
}

fn quote_names(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

impl From<ArgumentBindingError> for RuntimeError {
    fn from(error: ArgumentBindingError) -> Self {
        RuntimeError::type_error(error.to_string())
    }
}

/// No consistent C3 linearisation exists for the given bases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot create a consistent method resolution order (MRO) for bases {}", .bases.join(", "))]
pub struct MroError {
    pub bases: Vec<String>,
}

impl From<MroError> for RuntimeError {
    fn from(error: MroError) -> Self {
        RuntimeError::type_error(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_declared_after_their_bases() {
        for (index, kind) in ExceptionKind::ALL.iter().enumerate() {
            if let Some(base) = kind.base() {
                let base_index = ExceptionKind::ALL
                    .iter()
                    .position(|candidate| *candidate == base)
                    .expect("base is declared");
                assert!(base_index < index, "{kind} before {base}");
            }
        }
    }

    #[test]
    fn binding_errors_read_like_python() {
        let error = ArgumentBindingError::TooManyPositional {
            function: "f".to_string(),
            expected: "2".to_string(),
            given: 3,
        };
        assert_eq!(
            error.to_string(),
            "f() takes 2 positional arguments but 3 were given"
        );
        let error = ArgumentBindingError::MissingPositional {
            function: "g".to_string(),
            names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        assert_eq!(
            error.to_string(),
            "g() missing 3 required positional arguments: 'a', 'b' and 'c'"
        );
    }

    #[test]
    fn arity_messages() {
        let error = RuntimeError::expect_arity("len", 1, 1, 2).unwrap_err();
        assert_eq!(
            error.to_string(),
            "TypeError: len() takes exactly one argument (2 given)"
        );
        assert!(RuntimeError::expect_arity("range", 1, 3, 2).is_ok());
    }
}
