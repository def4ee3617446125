//! Callables and the descriptor objects that wrap them.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::bytecode::CodeObject;
use crate::runtime::class::{AttrMap, ClassRef};
use crate::runtime::object::{NativeFn, runtime_object};
use crate::runtime::value::{CellRef, Value};

/// A module or class-body namespace: names to values, in definition order.
pub type Namespace = Rc<RefCell<IndexMap<String, Value, FxBuildHasher>>>;

pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(IndexMap::default()))
}

/// A code object sitting in a constant pool, waiting for `MakeFunction`.
#[derive(Debug)]
pub struct CodeValue(pub Arc<CodeObject>);

runtime_object!(CodeValue, code);

/// A Python function: code plus everything captured when `def` ran.
#[derive(Debug)]
pub struct FunctionObject {
    pub code: Arc<CodeObject>,
    pub constants: Rc<[Value]>,
    pub name: String,
    pub qualname: String,
    pub globals: Namespace,
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(String, Value)>,
    pub closure: Vec<CellRef>,
    pub dict: AttrMap,
}

runtime_object!(FunctionObject, function);

/// A builtin implemented in Rust. Method descriptors bind their receiver
/// like Python functions do; plain builtins never bind.
#[derive(Debug)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
    pub binds: bool,
}

runtime_object!(NativeFunction, builtin_function);

/// A callable with its first argument fixed.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

runtime_object!(BoundMethod, method);

#[derive(Debug, Clone, Default)]
pub struct PropertyObject {
    pub getter: Option<Value>,
    pub setter: Option<Value>,
    pub deleter: Option<Value>,
}

runtime_object!(PropertyObject, property);

#[derive(Debug)]
pub struct StaticMethodObject {
    pub function: Value,
}

runtime_object!(StaticMethodObject, staticmethod);

#[derive(Debug)]
pub struct ClassMethodObject {
    pub function: Value,
}

runtime_object!(ClassMethodObject, classmethod);

/// `super(cls, obj)`: attribute lookup starts after `this_class` in the MRO
/// of the receiver's class.
#[derive(Debug)]
pub struct SuperObject {
    pub this_class: ClassRef,
    pub receiver: Value,
    /// Class whose MRO is searched: the receiver's class, or the receiver
    /// itself when it is a class.
    pub start_class: ClassRef,
}

runtime_object!(SuperObject, super_);
