//! The object model shared by the VM and the builtins: values, classes,
//! exceptions and the protocols that dispatch on them.

pub mod arith;
pub mod class;
pub mod dict;
pub mod error;
pub mod exception;
pub mod format;
pub mod function;
pub mod generator;
pub mod iter;
pub mod list;
pub mod object;
pub mod protocol;
pub mod value;

pub use class::{ClassRef, Types};
pub use error::{ExceptionKind, RtResult, RuntimeError};
pub use object::{Args, CallContext, ObjectRef};
pub use value::Value;
