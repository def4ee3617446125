//! The object protocols: attribute lookup with descriptors, truthiness,
//! hashing and equality, iteration, `len`, subscription and membership.
//!
//! Every operation first handles the native payloads directly and otherwise
//! falls back to the dunder methods found by walking the class MRO.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::runtime::class::{ClassKind, ClassRef, InstanceObject, Types, is_subclass, mro};
use crate::runtime::dict::{self, DictObject, SetObject, table};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::function::{
    BoundMethod, ClassMethodObject, FunctionObject, NativeFunction, PropertyObject,
    StaticMethodObject, SuperObject,
};
use crate::runtime::generator::{GeneratorObject, GeneratorStep, ResumeAction};
use crate::runtime::iter::{
    CallableIterator, EnumerateIterator, FilterIterator, MapIterator, RangeIterator, RangeObject,
    SequenceIterator, SliceObject, SnapshotIterator, TableIterator, ZipIterator,
};
use crate::runtime::list::{ListObject, SliceIndices, TupleObject, index_or_error};
use crate::runtime::object::{Args, CallContext, ObjectRef, downcast, downcast_mut, is_a, new_object};
use crate::runtime::value::Value;

pub use crate::runtime::format::{repr, str_of};

pub fn type_name(ctx: &dyn CallContext, value: &Value) -> String {
    value.type_name(&ctx.types())
}

// ---- errors ---------------------------------------------------------------

fn kind_is_subclass(kind: ExceptionKind, target: ExceptionKind) -> bool {
    let mut current = Some(kind);
    while let Some(kind) = current {
        if kind == target {
            return true;
        }
        current = kind.base();
    }
    false
}

/// Whether an in-flight error is an instance of the builtin `kind`.
pub fn error_is(types: &Types, error: &RuntimeError, kind: ExceptionKind) -> bool {
    match error {
        RuntimeError::Builtin { kind: found, .. } => kind_is_subclass(*found, kind),
        RuntimeError::Object(value) => exception::class_of(value)
            .is_some_and(|class| is_subclass(&class, types.exception(kind))),
    }
}

/// The value carried by a `StopIteration`.
pub fn stop_iteration_value(error: &RuntimeError) -> Value {
    match error {
        RuntimeError::Builtin { .. } => Value::None,
        RuntimeError::Object(value) => exception::args(value).into_iter().next().unwrap_or(Value::None),
    }
}

// ---- hashing and equality -------------------------------------------------

fn hash_int(value: i64) -> i64 {
    if value == -1 { -2 } else { value }
}

fn hash_float(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return hash_int(value as i64);
    }
    hash_int(value.to_bits() as i64)
}

fn hash_str(text: &str) -> i64 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    hash_int(hasher.finish() as i64)
}

/// Hash of values that never run Python code to be hashed.
pub fn native_hash(value: &Value) -> Option<i64> {
    match value {
        Value::None => Some(0x2c1a_9e37),
        Value::NotImplemented => Some(0x2c1a_9e38),
        Value::Ellipsis => Some(0x2c1a_9e39),
        Value::Bool(value) => Some(i64::from(*value)),
        Value::Int(value) => Some(hash_int(*value)),
        Value::Float(value) => Some(hash_float(*value)),
        Value::Str(text) => Some(hash_str(text)),
        Value::Class(_) | Value::Cell(_) | Value::Unbound => Some(hash_int(value.id() >> 4)),
        Value::Object(_) => None,
    }
}

pub fn hash_value(ctx: &mut dyn CallContext, value: &Value) -> RtResult<i64> {
    if let Some(hash) = native_hash(value) {
        return Ok(hash);
    }
    if let Some(items) = value.tuple_items() {
        let mut combined: i64 = 0x345678;
        for item in &items {
            let hash = hash_value(ctx, item)?;
            combined = (combined ^ hash).wrapping_mul(1_000_003);
        }
        return Ok(hash_int(combined ^ items.len() as i64));
    }
    let types = ctx.types();
    let class = value.class(&types);
    match class.lookup("__hash__") {
        Some(Value::None) => Err(RuntimeError::unhashable(&class.name)),
        Some(method) if method.as_object().is_some_and(is_a::<FunctionObject>) => {
            match call_found_special(ctx, value, &class, method, Vec::new())? {
                Value::Int(hash) => Ok(hash_int(hash)),
                Value::Bool(hash) => Ok(i64::from(hash)),
                _ => Err(RuntimeError::type_error(
                    "__hash__ method should return an integer",
                )),
            }
        }
        _ => Ok(hash_int(value.id() >> 4)),
    }
}

fn numbers_equal(a: &Value, b: &Value) -> Option<bool> {
    match (a.as_int(), b.as_int()) {
        (Some(a), Some(b)) => return Some(a == b),
        (None, None) => {}
        (Some(int), None) | (None, Some(int)) => {
            let other = if a.as_int().is_some() { b } else { a };
            if let Value::Float(float) = other {
                return Some(float_equals_int(*float, int));
            }
            return None;
        }
    }
    match (a, b) {
        (Value::Float(a), Value::Float(b)) => Some(a == b),
        _ => None,
    }
}

pub fn float_equals_int(float: f64, int: i64) -> bool {
    float.fract() == 0.0 && float >= i64::MIN as f64 && float < i64::MAX as f64 && float as i64 == int
}

/// Equality that needs no Python code, or `None` when a dunder may decide.
pub fn native_eq(a: &Value, b: &Value) -> Option<bool> {
    if let Some(equal) = numbers_equal(a, b) {
        return Some(equal);
    }
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => Some(a == b),
        (Value::Object(_), _) | (_, Value::Object(_)) => None,
        (a, b) => Some(a.is(b)),
    }
}

/// `a == b` as a bool, with the identity shortcut containers use.
pub fn values_equal(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<bool> {
    if a.is(b) {
        return Ok(true);
    }
    if let Some(equal) = native_eq(a, b) {
        return Ok(equal);
    }
    let result = crate::runtime::arith::compare(ctx, crate::ast::ComparisonOperator::Eq, a, b)?;
    truthy(ctx, &result)
}

// ---- truthiness -------------------------------------------------------------

pub fn truthy(ctx: &mut dyn CallContext, value: &Value) -> RtResult<bool> {
    let object = match value {
        Value::None => return Ok(false),
        Value::Bool(value) => return Ok(*value),
        Value::Int(value) => return Ok(*value != 0),
        Value::Float(value) => return Ok(*value != 0.0),
        Value::Str(text) => return Ok(!text.is_empty()),
        Value::Object(object) => object,
        _ => return Ok(true),
    };
    if let Some(length) = native_len(object) {
        return Ok(length != 0);
    }
    if !is_a::<InstanceObject>(object) {
        return Ok(true);
    }
    if let Some(result) = call_special(ctx, value, "__bool__", Vec::new())? {
        return match result {
            Value::Bool(result) => Ok(result),
            other => Err(RuntimeError::type_error(format!(
                "__bool__ should return bool, returned {}",
                type_name(ctx, &other)
            ))),
        };
    }
    if let Some(result) = call_special(ctx, value, "__len__", Vec::new())? {
        return Ok(length_result(ctx, result)? != 0);
    }
    Ok(true)
}

// ---- attributes -------------------------------------------------------------

enum DescriptorKind {
    Plain,
    Function,
    StaticMethod(Value),
    ClassMethod(Value),
    Property(PropertyObject),
    User,
}

fn descriptor_kind(attr: &Value) -> DescriptorKind {
    let Value::Object(object) = attr else {
        return DescriptorKind::Plain;
    };
    let inner = object.borrow();
    let any = inner.as_any();
    if any.is::<FunctionObject>() {
        return DescriptorKind::Function;
    }
    if let Some(native) = any.downcast_ref::<NativeFunction>() {
        return if native.binds {
            DescriptorKind::Function
        } else {
            DescriptorKind::Plain
        };
    }
    if let Some(method) = any.downcast_ref::<StaticMethodObject>() {
        return DescriptorKind::StaticMethod(method.function.clone());
    }
    if let Some(method) = any.downcast_ref::<ClassMethodObject>() {
        return DescriptorKind::ClassMethod(method.function.clone());
    }
    if let Some(property) = any.downcast_ref::<PropertyObject>() {
        return DescriptorKind::Property(property.clone());
    }
    if let Some(instance) = any.downcast_ref::<InstanceObject>()
        && instance.class.lookup("__get__").is_some()
    {
        return DescriptorKind::User;
    }
    DescriptorKind::Plain
}

/// Properties and user objects defining `__set__` or `__delete__` win over
/// the instance dictionary.
fn is_data_descriptor(attr: &Value) -> bool {
    let Some(object) = attr.as_object() else {
        return false;
    };
    let inner = object.borrow();
    let any = inner.as_any();
    if any.is::<PropertyObject>() {
        return true;
    }
    any.downcast_ref::<InstanceObject>().is_some_and(|instance| {
        instance.class.lookup("__set__").is_some() || instance.class.lookup("__delete__").is_some()
    })
}

/// Applies the descriptor protocol to an attribute found on `owner`.
/// `instance` is `None` when the lookup started at the class.
pub fn descriptor_get(
    ctx: &mut dyn CallContext,
    attr: Value,
    instance: Option<&Value>,
    owner: &ClassRef,
) -> RtResult<Value> {
    match descriptor_kind(&attr) {
        DescriptorKind::Plain => Ok(attr),
        DescriptorKind::Function => Ok(match instance {
            Some(receiver) => bind(receiver.clone(), attr),
            None => attr,
        }),
        DescriptorKind::StaticMethod(function) => Ok(function),
        DescriptorKind::ClassMethod(function) => Ok(bind(Value::Class(owner.clone()), function)),
        DescriptorKind::Property(property) => match (instance, property.getter) {
            (None, _) => Ok(attr),
            (Some(receiver), Some(getter)) => ctx.call(&getter, Args::new(vec![receiver.clone()])),
            (Some(receiver), None) => Err(RuntimeError::attribute_error(format!(
                "property of '{}' object has no getter",
                type_name(ctx, receiver)
            ))),
        },
        DescriptorKind::User => {
            let receiver = instance.cloned().unwrap_or(Value::None);
            let result = call_special(
                ctx,
                &attr,
                "__get__",
                vec![receiver, Value::Class(owner.clone())],
            )?;
            Ok(result.unwrap_or(attr))
        }
    }
}

pub fn bind(receiver: Value, function: Value) -> Value {
    Value::Object(new_object(BoundMethod { receiver, function }))
}

/// The attribute dictionary of an instance or function, if any.
fn instance_attribute(object: &ObjectRef, name: &str) -> Option<Value> {
    let inner = object.borrow();
    let any = inner.as_any();
    if let Some(instance) = any.downcast_ref::<InstanceObject>() {
        return instance.dict.get(name).cloned();
    }
    if let Some(function) = any.downcast_ref::<FunctionObject>() {
        return function.dict.get(name).cloned();
    }
    None
}

/// Attributes of builtin objects that are not stored in any dictionary.
fn builtin_attribute(ctx: &mut dyn CallContext, value: &Value, name: &str) -> RtResult<Option<Value>> {
    let Value::Object(object) = value else {
        return Ok(None);
    };
    let inner = object.borrow();
    let any = inner.as_any();
    if let Some(function) = any.downcast_ref::<FunctionObject>() {
        return Ok(match name {
            "__name__" => Some(Value::str(function.name.as_str())),
            "__qualname__" => Some(Value::str(function.qualname.as_str())),
            "__doc__" => Some(Value::None),
            "__defaults__" if function.defaults.is_empty() => Some(Value::None),
            "__defaults__" => Some(Value::tuple(function.defaults.clone())),
            "__module__" => Some(function.globals.borrow().get("__name__").cloned().unwrap_or(Value::None)),
            _ => None,
        });
    }
    if let Some(native) = any.downcast_ref::<NativeFunction>() {
        return Ok(match name {
            "__name__" | "__qualname__" => Some(Value::str(native.name)),
            _ => None,
        });
    }
    if let Some(method) = any.downcast_ref::<BoundMethod>() {
        let (receiver, function) = (method.receiver.clone(), method.function.clone());
        drop(inner);
        return Ok(match name {
            "__self__" => Some(receiver),
            "__func__" => Some(function),
            "__name__" | "__qualname__" => Some(get_attr(ctx, &function, name)?),
            _ => None,
        });
    }
    if let Some(generator) = any.downcast_ref::<GeneratorObject>() {
        return Ok(match name {
            "__name__" => Some(Value::str(generator.name.as_str())),
            "__qualname__" => Some(Value::str(generator.qualname.as_str())),
            _ => None,
        });
    }
    if let Some(property) = any.downcast_ref::<PropertyObject>() {
        let slot = match name {
            "fget" => &property.getter,
            "fset" => &property.setter,
            "fdel" => &property.deleter,
            _ => return Ok(None),
        };
        return Ok(Some(slot.clone().unwrap_or(Value::None)));
    }
    if let Some(method) = any.downcast_ref::<StaticMethodObject>() {
        return Ok((name == "__func__").then(|| method.function.clone()));
    }
    if let Some(method) = any.downcast_ref::<ClassMethodObject>() {
        return Ok((name == "__func__").then(|| method.function.clone()));
    }
    if let Some(range) = any.downcast_ref::<RangeObject>() {
        return Ok(match name {
            "start" => Some(Value::Int(range.start)),
            "stop" => Some(Value::Int(range.stop)),
            "step" => Some(Value::Int(range.step)),
            _ => None,
        });
    }
    if let Some(slice) = any.downcast_ref::<SliceObject>() {
        return Ok(match name {
            "start" => Some(slice.start.clone()),
            "stop" => Some(slice.stop.clone()),
            "step" => Some(slice.step.clone()),
            _ => None,
        });
    }
    let Some(instance) = any.downcast_ref::<InstanceObject>() else {
        return Ok(None);
    };
    match name {
        "__dict__" => {
            let pairs: Vec<(Value, Value)> = instance
                .dict
                .iter()
                .map(|(key, value)| (Value::str(key.as_str()), value.clone()))
                .collect();
            drop(inner);
            dict::dict_from_pairs(ctx, pairs).map(Some)
        }
        "__traceback__" if instance.class.is_exception() => Ok(Some(Value::None)),
        _ => Ok(None),
    }
}

/// `getattr(value, name)`.
pub fn get_attr(ctx: &mut dyn CallContext, value: &Value, name: &str) -> RtResult<Value> {
    let types = ctx.types();
    if name == "__class__" {
        return Ok(Value::Class(value.class(&types)));
    }
    match value {
        Value::Class(class) => class_get_attr(ctx, class, name),
        Value::Object(object) if is_a::<SuperObject>(object) => super_get_attr(ctx, object, name),
        _ => generic_get_attr(ctx, value, name),
    }
}

/// `getattr(value, name, None)`-style lookup that maps `AttributeError` to `None`.
pub fn get_attr_opt(ctx: &mut dyn CallContext, value: &Value, name: &str) -> RtResult<Option<Value>> {
    match get_attr(ctx, value, name) {
        Ok(found) => Ok(Some(found)),
        Err(error) if error_is(&ctx.types(), &error, ExceptionKind::AttributeError) => Ok(None),
        Err(error) => Err(error),
    }
}

fn generic_get_attr(ctx: &mut dyn CallContext, value: &Value, name: &str) -> RtResult<Value> {
    let types = ctx.types();
    let class = value.class(&types);
    let class_attr = class.lookup(name);
    if let Some(attr) = &class_attr
        && is_data_descriptor(attr)
    {
        return descriptor_get(ctx, attr.clone(), Some(value), &class);
    }
    if let Value::Object(object) = value
        && let Some(found) = instance_attribute(object, name)
    {
        return Ok(found);
    }
    if let Some(attr) = class_attr {
        return descriptor_get(ctx, attr, Some(value), &class);
    }
    if let Some(found) = builtin_attribute(ctx, value, name)? {
        return Ok(found);
    }
    if class.kind != ClassKind::Builtin
        && let Some(getattr) = class.lookup("__getattr__")
    {
        let bound = descriptor_get(ctx, getattr, Some(value), &class)?;
        return ctx.call(&bound, Args::new(vec![Value::str(name)]));
    }
    Err(RuntimeError::no_attribute(&class.name, name))
}

fn class_get_attr(ctx: &mut dyn CallContext, class: &ClassRef, name: &str) -> RtResult<Value> {
    match name {
        "__name__" => return Ok(Value::str(class.name.as_str())),
        "__qualname__" => return Ok(Value::str(class.qualname.as_str())),
        "__mro__" => return Ok(Value::tuple(mro(class).into_iter().map(Value::Class).collect())),
        "__bases__" => {
            return Ok(Value::tuple(class.bases.iter().cloned().map(Value::Class).collect()));
        }
        "__base__" => {
            return Ok(class.bases.first().cloned().map(Value::Class).unwrap_or(Value::None));
        }
        "__dict__" => {
            let pairs: Vec<(Value, Value)> = class
                .dict
                .borrow()
                .iter()
                .map(|(key, value)| (Value::str(key.as_str()), value.clone()))
                .collect();
            return dict::dict_from_pairs(ctx, pairs);
        }
        "__doc__" if class.lookup("__doc__").is_none() => return Ok(Value::None),
        _ => {}
    }
    if let Some(attr) = class.lookup(name) {
        return descriptor_get(ctx, attr, None, class);
    }
    let types = ctx.types();
    if let Some(attr) = types.type_.lookup(name) {
        let receiver = Value::Class(class.clone());
        return descriptor_get(ctx, attr, Some(&receiver), &types.type_);
    }
    Err(RuntimeError::attribute_error(format!(
        "type object '{}' has no attribute '{name}'",
        class.name
    )))
}

fn super_get_attr(ctx: &mut dyn CallContext, object: &ObjectRef, name: &str) -> RtResult<Value> {
    let (this_class, receiver, start_class) = {
        let proxy = downcast::<SuperObject>(object).expect("checked super object");
        (proxy.this_class.clone(), proxy.receiver.clone(), proxy.start_class.clone())
    };
    let order = mro(&start_class);
    let position = order
        .iter()
        .position(|class| std::rc::Rc::ptr_eq(class, &this_class))
        .map_or(order.len(), |position| position + 1);
    for class in &order[position..] {
        let found = class.dict.borrow().get(name).cloned();
        if let Some(attr) = found {
            let instance = (!matches!(receiver, Value::Class(_))).then_some(&receiver);
            return descriptor_get(ctx, attr, instance, &start_class);
        }
    }
    Err(RuntimeError::attribute_error(format!(
        "'super' object has no attribute '{name}'"
    )))
}

pub fn set_attr(ctx: &mut dyn CallContext, target: &Value, name: &str, value: Value) -> RtResult<()> {
    let types = ctx.types();
    if let Value::Class(class) = target {
        if class.kind == ClassKind::Builtin {
            return Err(RuntimeError::type_error(format!(
                "cannot set '{name}' attribute of immutable type '{}'",
                class.name
            )));
        }
        class.insert(name, value);
        return Ok(());
    }
    let class = target.class(&types);
    if let Some(attr) = class.lookup(name)
        && is_data_descriptor(&attr)
    {
        if let Some(property) = attr.as_object().and_then(|object| downcast::<PropertyObject>(object).map(|p| p.clone())) {
            let Some(setter) = property.setter else {
                return Err(RuntimeError::attribute_error(format!(
                    "property '{name}' of '{}' object has no setter",
                    class.name
                )));
            };
            ctx.call(&setter, Args::new(vec![target.clone(), value]))?;
            return Ok(());
        }
        if call_special(ctx, &attr, "__set__", vec![target.clone(), value])?.is_some() {
            return Ok(());
        }
        return Err(RuntimeError::attribute_error(format!(
            "'{}' object attribute '{name}' is read-only",
            class.name
        )));
    }
    if let Value::Object(object) = target {
        let mut inner = object.borrow_mut();
        let any = inner.as_any_mut();
        if let Some(instance) = any.downcast_mut::<InstanceObject>() {
            instance.dict.insert(name.to_string(), value);
            return Ok(());
        }
        if let Some(function) = any.downcast_mut::<FunctionObject>() {
            function.dict.insert(name.to_string(), value);
            return Ok(());
        }
    }
    Err(RuntimeError::no_attribute(&class.name, name))
}

pub fn del_attr(ctx: &mut dyn CallContext, target: &Value, name: &str) -> RtResult<()> {
    let types = ctx.types();
    if let Value::Class(class) = target {
        if class.kind == ClassKind::Builtin || class.dict.borrow_mut().shift_remove(name).is_none() {
            return Err(RuntimeError::attribute_error(format!(
                "type object '{}' has no attribute '{name}'",
                class.name
            )));
        }
        return Ok(());
    }
    let class = target.class(&types);
    if let Some(attr) = class.lookup(name)
        && is_data_descriptor(&attr)
    {
        if let Some(property) = attr.as_object().and_then(|object| downcast::<PropertyObject>(object).map(|p| p.clone())) {
            let Some(deleter) = property.deleter else {
                return Err(RuntimeError::attribute_error(format!(
                    "property '{name}' of '{}' object has no deleter",
                    class.name
                )));
            };
            ctx.call(&deleter, Args::new(vec![target.clone()]))?;
            return Ok(());
        }
        if call_special(ctx, &attr, "__delete__", vec![target.clone()])?.is_some() {
            return Ok(());
        }
    }
    if let Value::Object(object) = target {
        let mut inner = object.borrow_mut();
        let any = inner.as_any_mut();
        let removed = if let Some(instance) = any.downcast_mut::<InstanceObject>() {
            instance.dict.shift_remove(name)
        } else if let Some(function) = any.downcast_mut::<FunctionObject>() {
            function.dict.shift_remove(name)
        } else {
            None
        };
        if removed.is_some() {
            return Ok(());
        }
    }
    Err(RuntimeError::no_attribute(&class.name, name))
}

/// Looks `name` up on the type of `value` (never the instance) and calls it
/// with `value` bound. `Ok(None)` when the type does not define it.
pub fn call_special(
    ctx: &mut dyn CallContext,
    value: &Value,
    name: &str,
    args: Vec<Value>,
) -> RtResult<Option<Value>> {
    let types = ctx.types();
    let class = value.class(&types);
    let Some(attr) = class.lookup(name) else {
        return Ok(None);
    };
    if attr.is_none() {
        return Ok(None);
    }
    call_found_special(ctx, value, &class, attr, args).map(Some)
}

/// Calls an attribute already found on `class` with `value` as receiver.
pub fn call_found_special(
    ctx: &mut dyn CallContext,
    value: &Value,
    class: &ClassRef,
    attr: Value,
    args: Vec<Value>,
) -> RtResult<Value> {
    if let DescriptorKind::Function = descriptor_kind(&attr) {
        let mut positional = Vec::with_capacity(args.len() + 1);
        positional.push(value.clone());
        positional.extend(args);
        return ctx.call(&attr, Args::new(positional));
    }
    let bound = descriptor_get(ctx, attr, Some(value), class)?;
    ctx.call(&bound, Args::new(args))
}

/// `value.name(*args)` with full attribute lookup.
pub fn call_method(ctx: &mut dyn CallContext, value: &Value, name: &str, args: Vec<Value>) -> RtResult<Value> {
    let method = get_attr(ctx, value, name)?;
    ctx.call(&method, Args::new(args))
}

// ---- isinstance ---------------------------------------------------------------

pub fn isinstance(ctx: &mut dyn CallContext, value: &Value, spec: &Value) -> RtResult<bool> {
    let types = ctx.types();
    let class = value.class(&types);
    class_matches(&class, spec, "isinstance")
}

pub fn class_matches(class: &ClassRef, spec: &Value, caller: &str) -> RtResult<bool> {
    match spec {
        Value::Class(target) => Ok(is_subclass(class, target)),
        other => match other.tuple_items() {
            Some(items) => {
                for item in &items {
                    if class_matches(class, item, caller)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            None => Err(RuntimeError::type_error(format!(
                "{caller}() arg 2 must be a type, a tuple of types, or a union"
            ))),
        },
    }
}

// ---- len -----------------------------------------------------------------------

fn native_len(object: &ObjectRef) -> Option<usize> {
    let inner = object.borrow();
    let any = inner.as_any();
    if let Some(list) = any.downcast_ref::<ListObject>() {
        return Some(list.items.len());
    }
    if let Some(tuple) = any.downcast_ref::<TupleObject>() {
        return Some(tuple.items.len());
    }
    if let Some(dict) = any.downcast_ref::<DictObject>() {
        return Some(dict.len());
    }
    if let Some(set) = any.downcast_ref::<SetObject>() {
        return Some(set.table.len());
    }
    if let Some(range) = any.downcast_ref::<RangeObject>() {
        return Some(range.len());
    }
    None
}

fn length_result(ctx: &mut dyn CallContext, result: Value) -> RtResult<usize> {
    match result.as_int() {
        Some(length) if length >= 0 => Ok(length as usize),
        Some(_) => Err(RuntimeError::value_error("__len__() should return >= 0")),
        None => Err(RuntimeError::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            type_name(ctx, &result)
        ))),
    }
}

pub fn len(ctx: &mut dyn CallContext, value: &Value) -> RtResult<usize> {
    match value {
        Value::Str(text) => return Ok(text.chars().count()),
        Value::Object(object) => {
            if let Some(length) = native_len(object) {
                return Ok(length);
            }
            if let Some(result) = call_special(ctx, value, "__len__", Vec::new())? {
                return length_result(ctx, result);
            }
        }
        _ => {}
    }
    Err(RuntimeError::type_error(format!(
        "object of type '{}' has no len()",
        type_name(ctx, value)
    )))
}

// ---- iteration -----------------------------------------------------------------

fn is_iterator_object(object: &ObjectRef) -> bool {
    let inner = object.borrow();
    let any = inner.as_any();
    any.is::<SequenceIterator>()
        || any.is::<SnapshotIterator>()
        || any.is::<TableIterator>()
        || any.is::<RangeIterator>()
        || any.is::<EnumerateIterator>()
        || any.is::<ZipIterator>()
        || any.is::<MapIterator>()
        || any.is::<FilterIterator>()
        || any.is::<CallableIterator>()
        || any.is::<GeneratorObject>()
}

pub fn iterator(items: Vec<Value>) -> Value {
    Value::Object(new_object(SnapshotIterator::new(items)))
}

fn str_chars(text: &str) -> Vec<Value> {
    text.chars().map(|ch| Value::str(ch.to_string())).collect()
}

/// `iter(value)`.
pub fn get_iter(ctx: &mut dyn CallContext, value: &Value) -> RtResult<Value> {
    let object = match value {
        Value::Str(text) => return Ok(iterator(str_chars(text))),
        Value::Object(object) => object,
        _ => return Err(RuntimeError::not_iterable(&type_name(ctx, value))),
    };
    if is_iterator_object(object) {
        return Ok(value.clone());
    }
    {
        let inner = object.borrow();
        let any = inner.as_any();
        if any.is::<ListObject>() || any.is::<TupleObject>() {
            return Ok(Value::Object(new_object(SequenceIterator {
                source: value.clone(),
                index: 0,
            })));
        }
        if let Some(range) = any.downcast_ref::<RangeObject>() {
            return Ok(Value::Object(new_object(RangeIterator {
                next: range.start,
                remaining: range.len(),
                step: range.step,
            })));
        }
    }
    if let Some(len) = table(object).map(|table| table.len()) {
        return Ok(Value::Object(new_object(TableIterator {
            source: object.clone(),
            position: 0,
            expected_len: len,
        })));
    }
    if let Some(result) = call_special(ctx, value, "__iter__", Vec::new())? {
        return Ok(result);
    }
    if is_a::<InstanceObject>(object)
        && value.class(&ctx.types()).lookup("__getitem__").is_some()
    {
        return Ok(Value::Object(new_object(SequenceIterator {
            source: value.clone(),
            index: 0,
        })));
    }
    Err(RuntimeError::not_iterable(&type_name(ctx, value)))
}

/// Advances an iterator; `Ok(None)` on exhaustion.
pub fn next_item(ctx: &mut dyn CallContext, iterator: &Value) -> RtResult<Option<Value>> {
    let Value::Object(object) = iterator else {
        return Err(not_an_iterator(ctx, iterator));
    };
    if let Some(mut state) = downcast_mut::<SnapshotIterator>(object) {
        let item = state.items.get(state.index).cloned();
        if item.is_some() {
            state.index += 1;
        }
        return Ok(item);
    }
    if let Some(mut state) = downcast_mut::<TableIterator>(object) {
        let Some(live) = table(&state.source) else {
            return Ok(None);
        };
        if live.len() != state.expected_len {
            let what = if is_a::<SetObject>(&state.source) {
                "Set"
            } else {
                "dictionary"
            };
            return Err(RuntimeError::runtime_error(format!(
                "{what} changed size during iteration"
            )));
        }
        let Some((slot, key)) = live.key_from(state.position) else {
            return Ok(None);
        };
        drop(live);
        state.position = slot + 1;
        return Ok(Some(key));
    }
    if let Some(mut state) = downcast_mut::<RangeIterator>(object) {
        if state.remaining == 0 {
            return Ok(None);
        }
        let value = state.next;
        state.remaining -= 1;
        state.next = state.next.wrapping_add(state.step);
        return Ok(Some(Value::Int(value)));
    }
    let sequence = downcast::<SequenceIterator>(object).map(|state| (state.source.clone(), state.index));
    if let Some((source, index)) = sequence {
        let item = sequence_item(ctx, &source, index)?;
        if item.is_some()
            && let Some(mut state) = downcast_mut::<SequenceIterator>(object)
        {
            state.index += 1;
        }
        return Ok(item);
    }
    if is_a::<GeneratorObject>(object) {
        return match ctx.resume(object, ResumeAction::Send(Value::None))? {
            GeneratorStep::Yielded(value) => Ok(Some(value)),
            GeneratorStep::Returned(_) => Ok(None),
        };
    }
    let enumerate = downcast::<EnumerateIterator>(object).map(|state| (state.inner.clone(), state.count));
    if let Some((inner, count)) = enumerate {
        let Some(item) = next_item(ctx, &inner)? else {
            return Ok(None);
        };
        if let Some(mut state) = downcast_mut::<EnumerateIterator>(object) {
            state.count += 1;
        }
        return Ok(Some(Value::tuple(vec![Value::Int(count), item])));
    }
    let zip = downcast::<ZipIterator>(object).map(|state| state.inners.clone());
    if let Some(inners) = zip {
        if inners.is_empty() {
            return Ok(None);
        }
        let mut items = Vec::with_capacity(inners.len());
        for inner in &inners {
            match next_item(ctx, inner)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        return Ok(Some(Value::tuple(items)));
    }
    let map = downcast::<MapIterator>(object).map(|state| (state.function.clone(), state.inners.clone()));
    if let Some((function, inners)) = map {
        let mut items = Vec::with_capacity(inners.len());
        for inner in &inners {
            match next_item(ctx, inner)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        return ctx.call(&function, Args::new(items)).map(Some);
    }
    let filter = downcast::<FilterIterator>(object).map(|state| (state.function.clone(), state.inner.clone()));
    if let Some((function, inner)) = filter {
        while let Some(item) = next_item(ctx, &inner)? {
            let keep = if function.is_none() {
                truthy(ctx, &item)?
            } else {
                let verdict = ctx.call(&function, Args::new(vec![item.clone()]))?;
                truthy(ctx, &verdict)?
            };
            if keep {
                return Ok(Some(item));
            }
        }
        return Ok(None);
    }
    let callable = downcast::<CallableIterator>(object)
        .map(|state| (state.function.clone(), state.sentinel.clone(), state.done));
    if let Some((function, sentinel, done)) = callable {
        if done {
            return Ok(None);
        }
        let item = ctx.call(&function, Args::new(Vec::new()))?;
        if values_equal(ctx, &item, &sentinel)? {
            if let Some(mut state) = downcast_mut::<CallableIterator>(object) {
                state.done = true;
            }
            return Ok(None);
        }
        return Ok(Some(item));
    }
    match call_special(ctx, iterator, "__next__", Vec::new()) {
        Ok(Some(item)) => Ok(Some(item)),
        Ok(None) => Err(not_an_iterator(ctx, iterator)),
        Err(error) if error_is(&ctx.types(), &error, ExceptionKind::StopIteration) => Ok(None),
        Err(error) => Err(error),
    }
}

fn not_an_iterator(ctx: &dyn CallContext, value: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "'{}' object is not an iterator",
        type_name(ctx, value)
    ))
}

/// Item `index` of a list, tuple or `__getitem__` sequence, `None` past the end.
fn sequence_item(ctx: &mut dyn CallContext, source: &Value, index: usize) -> RtResult<Option<Value>> {
    if let Some(object) = source.as_object() {
        let inner = object.borrow();
        let any = inner.as_any();
        if let Some(list) = any.downcast_ref::<ListObject>() {
            return Ok(list.items.get(index).cloned());
        }
        if let Some(tuple) = any.downcast_ref::<TupleObject>() {
            return Ok(tuple.items.get(index).cloned());
        }
    }
    match call_special(ctx, source, "__getitem__", vec![Value::Int(index as i64)]) {
        Ok(item) => Ok(item),
        Err(error)
            if error_is(&ctx.types(), &error, ExceptionKind::IndexError)
                || error_is(&ctx.types(), &error, ExceptionKind::StopIteration) =>
        {
            Ok(None)
        }
        Err(error) => Err(error),
    }
}

/// Drains an iterable into a vector.
pub fn collect(ctx: &mut dyn CallContext, iterable: &Value) -> RtResult<Vec<Value>> {
    if let Some(items) = iterable.list_items().or_else(|| iterable.tuple_items()) {
        return Ok(items);
    }
    let iterator = get_iter(ctx, iterable)?;
    let mut items = Vec::new();
    while let Some(item) = next_item(ctx, &iterator)? {
        items.push(item);
    }
    Ok(items)
}

// ---- subscription ---------------------------------------------------------------

fn slice_bound(ctx: &dyn CallContext, value: &Value) -> RtResult<Option<i64>> {
    match value {
        Value::None => Ok(None),
        other => other.as_int().map(Some).ok_or_else(|| {
            RuntimeError::type_error(format!(
                "slice indices must be integers or None or have an __index__ method, not {}",
                type_name(ctx, other)
            ))
        }),
    }
}

/// Resolves a slice object against a sequence length.
pub fn slice_indices(ctx: &dyn CallContext, slice: &Value, len: usize) -> RtResult<Option<SliceIndices>> {
    let Some(object) = slice.as_object() else {
        return Ok(None);
    };
    let Some(parts) = downcast::<SliceObject>(object).map(|slice| slice.clone()) else {
        return Ok(None);
    };
    let start = slice_bound(ctx, &parts.start)?;
    let stop = slice_bound(ctx, &parts.stop)?;
    let step = slice_bound(ctx, &parts.step)?;
    SliceIndices::resolve(start, stop, step, len).map(Some)
}

fn index_type_error(ctx: &dyn CallContext, container: &str, index: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "{container} indices must be integers or slices, not {}",
        type_name(ctx, index)
    ))
}

/// `container[index]`.
pub fn get_item(ctx: &mut dyn CallContext, container: &Value, index: &Value) -> RtResult<Value> {
    if let Value::Str(text) = container {
        if let Some(position) = index.as_int() {
            let count = text.chars().count();
            let position = index_or_error(position, count, "string")?;
            let ch = text.chars().nth(position).expect("index within bounds");
            return Ok(Value::str(ch.to_string()));
        }
        let chars: Vec<char> = text.chars().collect();
        if let Some(indices) = slice_indices(ctx, index, chars.len())? {
            return Ok(Value::str(indices.select(&chars).into_iter().collect::<String>()));
        }
        return Err(index_type_error(ctx, "string", index));
    }
    let Value::Object(object) = container else {
        if let Value::Class(class) = container
            && let Some(method) = class.lookup("__class_getitem__")
        {
            let bound = descriptor_get(ctx, method, None, class)?;
            return ctx.call(&bound, Args::new(vec![index.clone()]));
        }
        return Err(not_subscriptable(ctx, container));
    };
    let sequence = {
        let inner = object.borrow();
        let any = inner.as_any();
        if let Some(list) = any.downcast_ref::<ListObject>() {
            Some(("list", list.items.clone()))
        } else {
            any.downcast_ref::<TupleObject>()
                .map(|tuple| ("tuple", tuple.items.clone()))
        }
    };
    if let Some((kind, items)) = sequence {
        if let Some(position) = index.as_int() {
            let position = index_or_error(position, items.len(), kind)?;
            return Ok(items[position].clone());
        }
        if let Some(indices) = slice_indices(ctx, index, items.len())? {
            let selected = indices.select(&items);
            return Ok(if kind == "list" {
                Value::list(selected)
            } else {
                Value::tuple(selected)
            });
        }
        return Err(index_type_error(ctx, kind, index));
    }
    if is_a::<DictObject>(object) {
        return match dict::dict_get(ctx, object, index)? {
            Some(value) => Ok(value),
            None => Err(dict::key_error(ctx, index.clone())),
        };
    }
    let range = downcast::<RangeObject>(object).map(|range| *range);
    if let Some(range) = range {
        if let Some(position) = index.as_int() {
            let position = index_or_error(position, range.len(), "range object")?;
            return Ok(Value::Int(range.get(position)));
        }
        if let Some(indices) = slice_indices(ctx, index, range.len())? {
            return Ok(Value::Object(new_object(RangeObject {
                start: range.start + indices.start * range.step,
                stop: range.start + indices.stop * range.step,
                step: range.step * indices.step,
            })));
        }
        return Err(index_type_error(ctx, "range", index));
    }
    if let Some(result) = call_special(ctx, container, "__getitem__", vec![index.clone()])? {
        return Ok(result);
    }
    Err(not_subscriptable(ctx, container))
}

fn not_subscriptable(ctx: &dyn CallContext, value: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "'{}' object is not subscriptable",
        type_name(ctx, value)
    ))
}

/// `container[index] = value`.
pub fn set_item(ctx: &mut dyn CallContext, container: &Value, index: &Value, value: Value) -> RtResult<()> {
    if let Value::Object(object) = container {
        if is_a::<ListObject>(object) {
            let len = downcast::<ListObject>(object).map_or(0, |list| list.items.len());
            if let Some(position) = index.as_int() {
                let position = index_or_error(position, len, "list assignment")?;
                if let Some(mut list) = downcast_mut::<ListObject>(object) {
                    list.items[position] = value;
                }
                return Ok(());
            }
            if let Some(indices) = slice_indices(ctx, index, len)? {
                let replacement = collect(ctx, &value)?;
                let mut list = downcast_mut::<ListObject>(object).expect("checked list");
                if indices.step == 1 {
                    let start = indices.start as usize;
                    let stop = (indices.stop.max(indices.start)) as usize;
                    list.items.splice(start..stop, replacement);
                    return Ok(());
                }
                let positions: Vec<usize> = indices.positions().collect();
                if positions.len() != replacement.len() {
                    return Err(RuntimeError::value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        positions.len()
                    )));
                }
                for (position, item) in positions.into_iter().zip(replacement) {
                    list.items[position] = item;
                }
                return Ok(());
            }
            return Err(index_type_error(ctx, "list", index));
        }
        if is_a::<DictObject>(object) {
            return dict::dict_set(ctx, object, index.clone(), value);
        }
        if call_special(ctx, container, "__setitem__", vec![index.clone(), value])?.is_some() {
            return Ok(());
        }
    }
    Err(RuntimeError::type_error(format!(
        "'{}' object does not support item assignment",
        type_name(ctx, container)
    )))
}

/// `del container[index]`.
pub fn del_item(ctx: &mut dyn CallContext, container: &Value, index: &Value) -> RtResult<()> {
    if let Value::Object(object) = container {
        if is_a::<ListObject>(object) {
            let len = downcast::<ListObject>(object).map_or(0, |list| list.items.len());
            if let Some(position) = index.as_int() {
                let position = index_or_error(position, len, "list assignment")?;
                if let Some(mut list) = downcast_mut::<ListObject>(object) {
                    list.items.remove(position);
                }
                return Ok(());
            }
            if let Some(indices) = slice_indices(ctx, index, len)? {
                let mut doomed: Vec<usize> = indices.positions().collect();
                doomed.sort_unstable();
                let mut list = downcast_mut::<ListObject>(object).expect("checked list");
                for position in doomed.into_iter().rev() {
                    list.items.remove(position);
                }
                return Ok(());
            }
            return Err(index_type_error(ctx, "list", index));
        }
        if is_a::<DictObject>(object) {
            return match dict::dict_remove(ctx, object, index)? {
                Some(_) => Ok(()),
                None => Err(dict::key_error(ctx, index.clone())),
            };
        }
        if call_special(ctx, container, "__delitem__", vec![index.clone()])?.is_some() {
            return Ok(());
        }
    }
    Err(RuntimeError::type_error(format!(
        "'{}' object doesn't support item deletion",
        type_name(ctx, container)
    )))
}

/// `item in container`.
pub fn contains(ctx: &mut dyn CallContext, container: &Value, item: &Value) -> RtResult<bool> {
    if let Value::Str(text) = container {
        return match item {
            Value::Str(needle) => Ok(text.contains(&**needle)),
            other => Err(RuntimeError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(ctx, other)
            ))),
        };
    }
    if let Value::Object(object) = container {
        if table(object).is_some() {
            return dict::dict_contains(ctx, object, item);
        }
        let range = downcast::<RangeObject>(object).map(|range| *range);
        if let Some(range) = range
            && let Some(value) = item.as_int()
        {
            return Ok(range.contains(value));
        }
        if let Some(items) = container.list_items().or_else(|| container.tuple_items()) {
            for candidate in &items {
                if values_equal(ctx, candidate, item)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }
        if let Some(result) = call_special(ctx, container, "__contains__", vec![item.clone()])? {
            return truthy(ctx, &result);
        }
    }
    let iterator = match get_iter(ctx, container) {
        Ok(iterator) => iterator,
        Err(error) if error_is(&ctx.types(), &error, ExceptionKind::TypeError) => {
            return Err(RuntimeError::type_error(format!(
                "argument of type '{}' is not iterable",
                type_name(ctx, container)
            )));
        }
        Err(error) => return Err(error),
    };
    while let Some(candidate) = next_item(ctx, &iterator)? {
        if values_equal(ctx, &candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}
