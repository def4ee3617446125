use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use crate::runtime::class::{ClassRef, Types};
use crate::runtime::error::{RtResult, RuntimeError};
use crate::runtime::function::Namespace;
use crate::runtime::generator::{GeneratorStep, ResumeAction};
use crate::runtime::value::Value;

/// A heap object. Behaviour is looked up through the object's class; the
/// trait only exposes what the lookup procedure needs.
pub trait RuntimeObject: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// The Python-visible class of this object.
    fn class(&self, types: &Types) -> ClassRef;
}

pub type ObjectRef = Rc<RefCell<dyn RuntimeObject>>;

/// Implements `RuntimeObject` for a native payload whose class is a fixed
/// field of `Types`.
macro_rules! runtime_object {
    ($type:ty, $field:ident) => {
        impl $crate::runtime::object::RuntimeObject for $type {
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn class(
                &self,
                types: &$crate::runtime::class::Types,
            ) -> $crate::runtime::class::ClassRef {
                types.$field.clone()
            }
        }
    };
}

pub(crate) use runtime_object;

pub fn new_object<T: RuntimeObject>(object: T) -> ObjectRef {
    Rc::new(RefCell::new(object))
}

pub fn downcast<T: RuntimeObject>(object: &ObjectRef) -> Option<Ref<'_, T>> {
    Ref::filter_map(object.borrow(), |inner| inner.as_any().downcast_ref::<T>()).ok()
}

pub fn downcast_mut<T: RuntimeObject>(object: &ObjectRef) -> Option<RefMut<'_, T>> {
    RefMut::filter_map(object.borrow_mut(), |inner| {
        inner.as_any_mut().downcast_mut::<T>()
    })
    .ok()
}

pub fn is_a<T: RuntimeObject>(object: &ObjectRef) -> bool {
    object.borrow().as_any().is::<T>()
}

/// Identity of a heap object, stable for its lifetime.
pub fn object_id(object: &ObjectRef) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

/// Arguments of a call as they arrive at the callee.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn prepend(mut self, receiver: Value) -> Self {
        self.positional.insert(0, receiver);
        self
    }

    /// Positional arguments only, within `min..=max`.
    pub fn expect(&self, name: &str, min: usize, max: usize) -> RtResult<()> {
        self.no_keywords(name)?;
        RuntimeError::expect_arity(name, min, max, self.positional.len())
    }

    pub fn no_keywords(&self, name: &str) -> RtResult<()> {
        match self.keywords.first() {
            Some(_) => Err(RuntimeError::type_error(format!(
                "{name}() takes no keyword arguments"
            ))),
            None => Ok(()),
        }
    }

    /// Removes and returns a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(key, _)| key == name)?;
        Some(self.keywords.remove(index).1)
    }

    /// Fails on any keyword left after the callee took the ones it knows.
    pub fn finish_keywords(&self, name: &str) -> RtResult<()> {
        match self.keywords.first() {
            Some((key, _)) => Err(RuntimeError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            ))),
            None => Ok(()),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn arg(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or(Value::None)
    }
}

/// Builtin implemented in Rust.
pub type NativeFn = fn(&mut dyn CallContext, Args) -> RtResult<Value>;

/// What runtime objects can ask of the running interpreter.
pub trait CallContext {
    fn types(&self) -> Rc<Types>;
    /// Calls any callable value.
    fn call(&mut self, callee: &Value, args: Args) -> RtResult<Value>;
    /// Drives a suspended generator or coroutine one step.
    fn resume(&mut self, generator: &ObjectRef, action: ResumeAction) -> RtResult<GeneratorStep>;
    /// Turns a builtin error into a live exception object.
    fn materialize(&mut self, error: RuntimeError) -> Value;
    /// Appends to the program's standard output.
    fn write_stdout(&mut self, text: &str);
    /// Executes a class body function with `namespace` as its locals and
    /// returns what the body returned (the `__class__` cell or `None`).
    fn run_class_body(&mut self, body: &Value, namespace: Namespace) -> RtResult<Value>;
}
