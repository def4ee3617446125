//! Exception instances: arguments, chaining, unwind traces and the
//! exception-group split used by `except*`.

use crate::runtime::class::{ClassKind, ClassRef, InstanceObject, TraceEntry, Types, is_subclass};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::object::{CallContext, downcast, downcast_mut, new_object};
use crate::runtime::protocol::{repr, str_of};
use crate::runtime::value::Value;

/// Creates an exception instance of `class` with the given `args`.
pub fn new_exception(class: &ClassRef, args: Vec<Value>) -> Value {
    let mut instance = InstanceObject::new(class.clone());
    instance.dict.insert("args".to_string(), Value::tuple(args));
    instance.dict.insert("__cause__".to_string(), Value::None);
    instance.dict.insert("__context__".to_string(), Value::None);
    instance
        .dict
        .insert("__suppress_context__".to_string(), Value::Bool(false));
    Value::Object(new_object(instance))
}

pub fn from_builtin(types: &Types, kind: ExceptionKind, message: String) -> Value {
    let args = if message.is_empty() {
        Vec::new()
    } else {
        vec![Value::str(message)]
    };
    new_exception(types.exception(kind), args)
}

/// True for instances of `BaseException` subclasses.
pub fn is_exception(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|object| downcast::<InstanceObject>(object).map(|instance| instance.class.is_exception()))
        .unwrap_or(false)
}

pub fn is_exception_class(value: &Value) -> bool {
    value.as_class().is_some_and(|class| class.is_exception())
}

pub fn class_of(exception: &Value) -> Option<ClassRef> {
    let object = exception.as_object()?;
    downcast::<InstanceObject>(object).map(|instance| instance.class.clone())
}

pub fn attribute(exception: &Value, name: &str) -> Option<Value> {
    let object = exception.as_object()?;
    downcast::<InstanceObject>(object).and_then(|instance| instance.dict.get(name).cloned())
}

pub fn set_attribute(exception: &Value, name: &str, value: Value) {
    if let Some(object) = exception.as_object()
        && let Some(mut instance) = downcast_mut::<InstanceObject>(object)
    {
        instance.dict.insert(name.to_string(), value);
    }
}

pub fn args(exception: &Value) -> Vec<Value> {
    attribute(exception, "args")
        .and_then(|args| args.tuple_items())
        .unwrap_or_default()
}

pub fn set_args(exception: &Value, args: Vec<Value>) {
    set_attribute(exception, "args", Value::tuple(args));
}

pub fn context(exception: &Value) -> Option<Value> {
    attribute(exception, "__context__").filter(|value| !value.is_none())
}

pub fn cause(exception: &Value) -> Option<Value> {
    attribute(exception, "__cause__").filter(|value| !value.is_none())
}

/// `raise exc from cause`: also suppresses the implicit context.
pub fn set_cause(exception: &Value, cause: Value) {
    set_attribute(exception, "__cause__", cause);
    set_attribute(exception, "__suppress_context__", Value::Bool(true));
}

/// Records `active` as the implicit context of a newly raised exception,
/// refusing to create a cycle in the context chain.
pub fn chain_context(exception: &Value, active: &Value) {
    if exception.is(active) {
        return;
    }
    let mut cursor = context(active);
    let mut link = active.clone();
    while let Some(next) = cursor {
        if next.is(exception) {
            set_attribute(&link, "__context__", Value::None);
            break;
        }
        cursor = context(&next);
        link = next;
    }
    set_attribute(exception, "__context__", active.clone());
}

pub fn push_trace(exception: &Value, entry: TraceEntry) {
    if let Some(object) = exception.as_object()
        && let Some(mut instance) = downcast_mut::<InstanceObject>(object)
    {
        instance.trace.push(entry);
    }
}

/// Frames the exception unwound through, innermost first.
pub fn trace(exception: &Value) -> Vec<TraceEntry> {
    exception
        .as_object()
        .and_then(|object| downcast::<InstanceObject>(object).map(|instance| instance.trace.clone()))
        .unwrap_or_default()
}

/// `str(exc)`.
pub fn message(ctx: &mut dyn CallContext, exception: &Value) -> RtResult<String> {
    let Some(class) = class_of(exception) else {
        return str_of(ctx, exception);
    };
    if let Some(exceptions) = group_exceptions(exception) {
        let message = attribute(exception, "message")
            .and_then(|message| message.as_str().map(str::to_string))
            .unwrap_or_default();
        let count = exceptions.len();
        let suffix = if count == 1 { "" } else { "s" };
        return Ok(format!("{message} ({count} sub-exception{suffix})"));
    }
    let args = args(exception);
    match args.as_slice() {
        [] => Ok(String::new()),
        [single] if class.kind == ClassKind::Exception(ExceptionKind::KeyError) => repr(ctx, single),
        [single] => str_of(ctx, single),
        _ => repr(ctx, &Value::tuple(args)),
    }
}

/// Whether `exception` is an instance of the class (or any class in the
/// tuple) given to `except`.
pub fn matches(ctx: &mut dyn CallContext, exception: &Value, spec: &Value) -> RtResult<bool> {
    let Some(class) = class_of(exception) else {
        return Ok(false);
    };
    if let Some(items) = spec.tuple_items() {
        for item in items {
            if matches(ctx, exception, &item)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    match spec {
        Value::Class(target) if target.is_exception() => Ok(is_subclass(&class, target)),
        _ => Err(RuntimeError::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

// ---- exception groups ----------------------------------------------------

pub fn new_group(types: &Types, message: Value, exceptions: Vec<Value>) -> Value {
    let class = types.exception(ExceptionKind::ExceptionGroup);
    let group = new_exception(class, vec![message.clone(), Value::list(exceptions.clone())]);
    set_attribute(&group, "message", message);
    set_attribute(&group, "exceptions", Value::tuple(exceptions));
    group
}

/// Sub-exceptions of an exception group, `None` for ordinary exceptions.
pub fn group_exceptions(exception: &Value) -> Option<Vec<Value>> {
    let class = class_of(exception)?;
    if class.kind != ClassKind::Exception(ExceptionKind::ExceptionGroup) {
        return None;
    }
    attribute(exception, "exceptions").and_then(|exceptions| exceptions.tuple_items())
}

/// A new group with the same message and chaining as `original` holding
/// `exceptions`.
fn derive(types: &Types, original: &Value, exceptions: Vec<Value>) -> Value {
    let message = attribute(original, "message").unwrap_or_else(|| Value::str(""));
    let group = new_group(types, message, exceptions);
    for name in ["__cause__", "__context__", "__suppress_context__"] {
        if let Some(value) = attribute(original, name) {
            set_attribute(&group, name, value);
        }
    }
    if let Some(object) = group.as_object()
        && let Some(mut instance) = downcast_mut::<InstanceObject>(object)
    {
        instance.trace = trace(original);
    }
    group
}

/// Splits `exception` into the part matching `spec` and the rest, keeping
/// the nesting of groups. A side is `None` when it would be empty; a side
/// equal to the whole input is the input object itself.
pub fn split(
    ctx: &mut dyn CallContext,
    exception: &Value,
    spec: &Value,
) -> RtResult<(Option<Value>, Option<Value>)> {
    if matches(ctx, exception, spec)? {
        return Ok((Some(exception.clone()), None));
    }
    let Some(children) = group_exceptions(exception) else {
        return Ok((None, Some(exception.clone())));
    };
    let mut matched = Vec::new();
    let mut rest = Vec::new();
    for child in &children {
        let (child_match, child_rest) = split(ctx, child, spec)?;
        matched.extend(child_match);
        rest.extend(child_rest);
    }
    let types = ctx.types();
    let side = |items: Vec<Value>| -> Option<Value> {
        if items.is_empty() {
            None
        } else if items.len() == children.len()
            && items.iter().zip(&children).all(|(item, child)| item.is(child))
        {
            Some(exception.clone())
        } else {
            Some(derive(&types, exception, items))
        }
    };
    Ok((side(matched), side(rest)))
}

/// `CheckEgMatch`: returns `(rest, match)` for an `except*` clause.
pub fn except_star_match(
    ctx: &mut dyn CallContext,
    exception: &Value,
    spec: &Value,
) -> RtResult<(Value, Value)> {
    check_star_spec(spec)?;
    if exception.is_none() {
        return Ok((Value::None, Value::None));
    }
    if group_exceptions(exception).is_none() {
        if matches(ctx, exception, spec)? {
            let types = ctx.types();
            let wrapped = new_group(&types, Value::str(""), vec![exception.clone()]);
            return Ok((Value::None, wrapped));
        }
        return Ok((exception.clone(), Value::None));
    }
    let (matched, rest) = split(ctx, exception, spec)?;
    Ok((rest.unwrap_or(Value::None), matched.unwrap_or(Value::None)))
}

fn check_star_spec(spec: &Value) -> RtResult<()> {
    let classes = spec.tuple_items().unwrap_or_else(|| vec![spec.clone()]);
    for class in classes {
        if let Value::Class(class) = &class
            && class.kind == ClassKind::Exception(ExceptionKind::ExceptionGroup)
        {
            return Err(RuntimeError::type_error(
                "catching ExceptionGroup with except* is not allowed. Use except instead.",
            ));
        }
    }
    Ok(())
}

/// `PrepReraiseStar`: what an `except*` statement re-raises once all clauses
/// ran. `raised` holds exceptions raised by clause bodies followed by the
/// unmatched remainder; `None` entries are skipped.
pub fn prep_reraise_star(types: &Types, raised: Vec<Value>) -> Value {
    let mut items: Vec<Value> = raised.into_iter().filter(|item| !item.is_none()).collect();
    match items.len() {
        0 => Value::None,
        1 => items.remove(0),
        _ => new_group(types, Value::str(""), items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::class::Constructors;

    fn types() -> Types {
        Types::new(Constructors::default())
    }

    #[test]
    fn builtin_errors_keep_their_message_as_the_only_argument() {
        let types = types();
        let error = from_builtin(&types, ExceptionKind::ValueError, "bad".to_string());
        let args = args(&error);
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].as_str(), Some("bad"));
        let bare = from_builtin(&types, ExceptionKind::ValueError, String::new());
        assert!(super::args(&bare).is_empty());
    }

    #[test]
    fn context_chain_never_becomes_a_cycle() {
        let types = types();
        let first = from_builtin(&types, ExceptionKind::ValueError, "a".to_string());
        let second = from_builtin(&types, ExceptionKind::TypeError, "b".to_string());
        chain_context(&second, &first);
        chain_context(&first, &second);
        assert!(context(&first).is_some_and(|value| value.is(&second)));
        assert!(context(&second).is_none());
    }

    #[test]
    fn reraise_star_policy() {
        let types = types();
        let a = from_builtin(&types, ExceptionKind::ValueError, "a".to_string());
        let b = from_builtin(&types, ExceptionKind::TypeError, "b".to_string());
        assert!(prep_reraise_star(&types, vec![Value::None]).is_none());
        assert!(prep_reraise_star(&types, vec![Value::None, a.clone()]).is(&a));
        let group = prep_reraise_star(&types, vec![a, b]);
        assert_eq!(group_exceptions(&group).map(|items| items.len()), Some(2));
    }
}
