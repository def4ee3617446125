use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::bytecode::Constant;
use crate::runtime::class::{ClassRef, Types};
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{ObjectRef, downcast, new_object, object_id};

/// Shared, mutable storage for a captured variable.
pub type CellRef = Rc<RefCell<Option<Value>>>;

/// A Python value. Small immutable values are stored inline; everything
/// else lives on the heap behind an `ObjectRef`.
#[derive(Clone)]
pub enum Value {
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Class(ClassRef),
    Cell(CellRef),
    Object(ObjectRef),
    /// Marker pushed when a binding saved around a match guard was unset.
    Unbound,
}

impl Value {
    pub fn str(text: impl Into<Rc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::Object(new_object(ListObject::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Object(new_object(TupleObject::new(items)))
    }

    pub fn new_cell(value: Option<Value>) -> CellRef {
        Rc::new(RefCell::new(value))
    }

    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::None => Value::None,
            Constant::Bool(value) => Value::Bool(*value),
            Constant::Int(value) => Value::Int(*value),
            Constant::Float(value) => Value::Float(*value),
            Constant::Str(value) => Value::str(value.as_str()),
            Constant::Ellipsis => Value::Ellipsis,
            Constant::Tuple(items) => Value::tuple(items.iter().map(Value::from_constant).collect()),
            Constant::Code(code) => Value::Object(new_object(
                crate::runtime::function::CodeValue(code.clone()),
            )),
        }
    }

    pub fn class(&self, types: &Types) -> ClassRef {
        match self {
            Value::None => types.none_type.clone(),
            Value::NotImplemented => types.not_implemented_type.clone(),
            Value::Ellipsis => types.ellipsis_type.clone(),
            Value::Bool(_) => types.bool.clone(),
            Value::Int(_) => types.int.clone(),
            Value::Float(_) => types.float.clone(),
            Value::Str(_) => types.str.clone(),
            Value::Class(_) => types.type_.clone(),
            Value::Cell(_) | Value::Unbound => types.cell.clone(),
            Value::Object(object) => object.borrow().class(types),
        }
    }

    pub fn type_name(&self, types: &Types) -> String {
        self.class(types).name.clone()
    }

    /// `is`: identity for heap values, equality of payload for inline ones.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None)
            | (Value::NotImplemented, Value::NotImplemented)
            | (Value::Ellipsis, Value::Ellipsis)
            | (Value::Unbound, Value::Unbound) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Cell(a), Value::Cell(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => object_id(a) == object_id(b),
            _ => false,
        }
    }

    /// Value of `id()`.
    pub fn id(&self) -> i64 {
        let address = match self {
            Value::Class(class) => Rc::as_ptr(class) as usize,
            Value::Cell(cell) => Rc::as_ptr(cell) as usize,
            Value::Object(object) => object_id(object),
            Value::Str(text) => Rc::as_ptr(text) as *const u8 as usize,
            Value::Int(value) => return *value,
            Value::Bool(value) => return i64::from(*value),
            Value::Float(value) => return value.to_bits() as i64,
            Value::None => return 0x1000,
            Value::NotImplemented => return 0x1008,
            Value::Ellipsis => return 0x1010,
            Value::Unbound => return 0x1018,
        };
        address as i64
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Value::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Integer value of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Numeric value of ints, bools and floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            other => other.as_int().map(|value| value as f64),
        }
    }

    /// Items of a tuple value.
    pub fn tuple_items(&self) -> Option<Vec<Value>> {
        let object = self.as_object()?;
        downcast::<TupleObject>(object).map(|tuple| tuple.items.clone())
    }

    /// Items of a list value, copied out.
    pub fn list_items(&self) -> Option<Vec<Value>> {
        let object = self.as_object()?;
        downcast::<ListObject>(object).map(|list| list.items.clone())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::NotImplemented => f.write_str("NotImplemented"),
            Value::Ellipsis => f.write_str("Ellipsis"),
            Value::Bool(value) => write!(f, "{}", if *value { "True" } else { "False" }),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::Str(text) => write!(f, "{text:?}"),
            Value::Class(class) => write!(f, "<class '{}'>", class.name),
            Value::Cell(_) => f.write_str("<cell>"),
            Value::Object(object) => write!(f, "<object {:#x}>", object_id(object)),
            Value::Unbound => f.write_str("<unbound>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_of_inline_values_compares_payloads() {
        assert!(Value::Int(3).is(&Value::Int(3)));
        assert!(!Value::Int(3).is(&Value::Bool(true)));
        assert!(Value::None.is(&Value::None));
    }

    #[test]
    fn identity_of_heap_values_compares_addresses() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert!(a.is(&a.clone()));
        assert!(!a.is(&b));
    }

    #[test]
    fn cells_share_mutation() {
        let cell = Value::new_cell(Some(Value::Int(1)));
        let alias = cell.clone();
        *cell.borrow_mut() = Some(Value::Int(2));
        assert!(matches!(*alias.borrow(), Some(Value::Int(2))));
    }
}
