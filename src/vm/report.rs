use std::fmt;

use thiserror::Error;

use crate::runtime::class::TraceEntry;
use crate::runtime::exception;
use crate::runtime::object::CallContext;
use crate::runtime::value::Value;

/// Why an exception is printed above another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainReason {
    /// `raise ... from cause`.
    Cause,
    /// Raised while another exception was being handled.
    Context,
}

/// Thread-safe rendering of an uncaught exception and its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    /// `Name` for builtins, `module.Name` for classes from other modules.
    pub type_name: String,
    pub message: String,
    /// Frames unwound, outermost first.
    pub trace: Vec<TraceEntry>,
    pub chained: Option<Box<(ChainReason, ExceptionReport)>>,
}

impl ExceptionReport {
    /// `Type: message`, or just `Type` for an empty message.
    pub fn summary(&self) -> String {
        if self.message.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}: {}", self.type_name, self.message)
        }
    }
}

impl fmt::Display for ExceptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(chained) = &self.chained {
            let (reason, earlier) = chained.as_ref();
            writeln!(f, "{earlier}")?;
            match reason {
                ChainReason::Cause => writeln!(
                    f,
                    "The above exception was the direct cause of the following exception:\n"
                )?,
                ChainReason::Context => writeln!(
                    f,
                    "During handling of the above exception, another exception occurred:\n"
                )?,
            }
        }
        writeln!(f, "Traceback (most recent call last):")?;
        for entry in &self.trace {
            writeln!(f, "  line {}, in {}", entry.line, entry.name)?;
        }
        write!(f, "{}", self.summary())
    }
}

impl std::error::Error for ExceptionReport {}

/// An exception that escaped the module, with the live object for callers
/// on the interpreter thread.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct UncaughtException {
    pub exception: Value,
    pub report: ExceptionReport,
}

pub(crate) fn build(ctx: &mut dyn CallContext, exception: &Value) -> ExceptionReport {
    let mut seen = Vec::new();
    build_chain(ctx, exception, &mut seen)
}

fn build_chain(ctx: &mut dyn CallContext, exception: &Value, seen: &mut Vec<Value>) -> ExceptionReport {
    seen.push(exception.clone());
    let type_name = match exception::class_of(exception) {
        Some(class) => {
            let module = class.dict.borrow().get("__module__").and_then(|module| module.as_str().map(str::to_string));
            match module {
                Some(module) if module != "__main__" && module != "builtins" => {
                    format!("{module}.{}", class.qualname)
                }
                _ => class.qualname.clone(),
            }
        }
        None => exception.type_name(&ctx.types()),
    };
    let message = exception::message(ctx, exception).unwrap_or_else(|_| "<exception str() failed>".to_string());
    let mut trace = exception::trace(exception);
    trace.reverse();

    let suppress = matches!(exception::attribute(exception, "__suppress_context__"), Some(Value::Bool(true)));
    let earlier = match exception::cause(exception) {
        Some(cause) => Some((ChainReason::Cause, cause)),
        None if !suppress => exception::context(exception).map(|context| (ChainReason::Context, context)),
        None => None,
    };
    let chained = earlier
        .filter(|(_, earlier)| !seen.iter().any(|value| value.is(earlier)))
        .map(|(reason, earlier)| Box::new((reason, build_chain(ctx, &earlier, seen))));
    ExceptionReport {
        type_name,
        message,
        trace,
        chained,
    }
}
