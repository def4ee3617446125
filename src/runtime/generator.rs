use std::any::Any;

use crate::runtime::class::{ClassRef, Types};
use crate::runtime::object::RuntimeObject;
use crate::runtime::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Body not started yet.
    Created,
    /// Stopped at a `yield`.
    Suspended,
    Running,
    Finished,
}

/// How a generator is resumed.
#[derive(Debug, Clone)]
pub enum ResumeAction {
    /// `next()` is `Send(None)`.
    Send(Value),
    /// Raise the exception at the suspension point.
    Throw(Value),
    /// Raise `GeneratorExit` and expect the body to finish.
    Close,
}

/// Outcome of one resume.
#[derive(Debug, Clone)]
pub enum GeneratorStep {
    Yielded(Value),
    Returned(Value),
}

/// A generator or coroutine. The suspended frame is owned here but only the
/// VM knows its layout.
pub struct GeneratorObject {
    pub state: GeneratorState,
    pub frame: Option<Box<dyn Any>>,
    pub is_coroutine: bool,
    pub name: String,
    pub qualname: String,
    /// Exception being handled inside the body when it last yielded.
    pub saved_exception: Option<Value>,
}

impl GeneratorObject {
    pub fn new(frame: Box<dyn Any>, is_coroutine: bool, name: &str, qualname: &str) -> Self {
        Self {
            state: GeneratorState::Created,
            frame: Some(frame),
            is_coroutine,
            name: name.to_string(),
            qualname: qualname.to_string(),
            saved_exception: None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        if self.is_coroutine { "coroutine" } else { "generator" }
    }
}

impl std::fmt::Debug for GeneratorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorObject")
            .field("state", &self.state)
            .field("qualname", &self.qualname)
            .finish_non_exhaustive()
    }
}

impl RuntimeObject for GeneratorObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn class(&self, types: &Types) -> ClassRef {
        if self.is_coroutine {
            types.coroutine.clone()
        } else {
            types.generator.clone()
        }
    }
}
