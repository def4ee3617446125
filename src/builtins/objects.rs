//! `object`, the exception classes, generators and `property`.

use crate::runtime::class::{Types, is_subclass, mro};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::format::{default_repr, repr};
use crate::runtime::function::PropertyObject;
use crate::runtime::generator::{GeneratorObject, GeneratorStep, ResumeAction};
use crate::runtime::object::{Args, CallContext, ObjectRef, downcast, is_a, new_object};
use crate::runtime::protocol::{self, truthy, type_name};
use crate::runtime::value::Value;

use super::{add_methods, method, stop_iteration, take_self, wrong_self};

pub(super) fn install(types: &Types) {
    add_methods(
        &types.object,
        &[
            ("__init__", object_init),
            ("__repr__", object_repr),
            ("__str__", object_str),
            ("__eq__", object_eq),
            ("__ne__", object_ne),
            ("__hash__", object_hash),
        ],
    );

    let base = types.exception(ExceptionKind::BaseException);
    add_methods(
        base,
        &[
            ("__init__", exception_init),
            ("__str__", exception_str),
            ("__repr__", exception_repr),
            ("with_traceback", with_traceback),
            ("add_note", add_note),
        ],
    );
    let stop = types.exception(ExceptionKind::StopIteration);
    let value = PropertyObject {
        getter: Some(method("value", stop_iteration_value)),
        ..PropertyObject::default()
    };
    stop.insert("value", Value::Object(new_object(value)));
    add_methods(
        types.exception(ExceptionKind::ExceptionGroup),
        &[
            ("__init__", group_init),
            ("subgroup", group_subgroup),
            ("split", group_split),
            ("derive", group_derive),
        ],
    );

    for class in [&types.generator, &types.coroutine] {
        add_methods(
            class,
            &[
                ("send", generator_send),
                ("throw", generator_throw),
                ("close", generator_close),
            ],
        );
    }
    add_methods(
        &types.generator,
        &[("__iter__", generator_iter), ("__next__", generator_next)],
    );

    add_methods(
        &types.property,
        &[
            ("getter", property_getter),
            ("setter", property_setter),
            ("deleter", property_deleter),
        ],
    );
    add_methods(&types.type_, &[("mro", type_mro)]);
}

// ---- object ----------------------------------------------------------------

fn object_init(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    take_self(&mut args, "object", "__init__")?;
    if !args.is_empty() {
        return Err(RuntimeError::type_error(
            "object.__init__() takes exactly one argument (the instance to initialize)",
        ));
    }
    Ok(Value::None)
}

fn object_repr(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "object", "__repr__")?;
    Ok(Value::str(default_repr(ctx, &this)))
}

fn object_str(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "object", "__str__")?;
    repr(ctx, &this).map(Value::str)
}

fn object_eq(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "object", "__eq__")?;
    args.expect("__eq__", 1, 1)?;
    Ok(if this.is(&args.positional[0]) {
        Value::Bool(true)
    } else {
        Value::NotImplemented
    })
}

/// Inverts `__eq__`, so defining `__eq__` alone also gives `!=`.
fn object_ne(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "object", "__ne__")?;
    args.expect("__ne__", 1, 1)?;
    match protocol::call_special(ctx, &this, "__eq__", vec![args.positional[0].clone()])? {
        None | Some(Value::NotImplemented) => Ok(Value::NotImplemented),
        Some(result) => Ok(Value::Bool(!truthy(ctx, &result)?)),
    }
}

fn object_hash(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "object", "__hash__")?;
    Ok(Value::Int(this.id() >> 4))
}

// ---- exceptions --------------------------------------------------------------

fn exception_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<Value> {
    let this = take_self(args, "BaseException", name)?;
    if !exception::is_exception(&this) {
        return Err(wrong_self(ctx, "BaseException", name, &this));
    }
    Ok(this)
}

fn exception_init(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "__init__")?;
    if !args.keywords.is_empty() {
        return Err(RuntimeError::type_error(format!(
            "{}() takes no keyword arguments",
            type_name(ctx, &this)
        )));
    }
    exception::set_args(&this, args.positional);
    Ok(Value::None)
}

fn exception_str(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "__str__")?;
    exception::message(ctx, &this).map(Value::str)
}

fn exception_repr(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "__repr__")?;
    let mut parts = Vec::new();
    for arg in exception::args(&this) {
        parts.push(repr(ctx, &arg)?);
    }
    Ok(Value::str(format!("{}({})", type_name(ctx, &this), parts.join(", "))))
}

fn with_traceback(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "with_traceback")?;
    args.expect("with_traceback", 1, 1)?;
    Ok(this)
}

fn add_note(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "add_note")?;
    args.expect("add_note", 1, 1)?;
    let note = args.positional.remove(0);
    if note.as_str().is_none() {
        return Err(RuntimeError::type_error(format!(
            "note must be a str, not '{}'",
            type_name(ctx, &note)
        )));
    }
    let mut notes = exception::attribute(&this, "__notes__")
        .and_then(|notes| notes.list_items())
        .unwrap_or_default();
    notes.push(note);
    exception::set_attribute(&this, "__notes__", Value::list(notes));
    Ok(Value::None)
}

fn stop_iteration_value(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = exception_self(ctx, &mut args, "value")?;
    Ok(exception::args(&this).into_iter().next().unwrap_or(Value::None))
}

fn group_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<Value> {
    let this = take_self(args, "ExceptionGroup", name)?;
    if exception::group_exceptions(&this).is_none() && name != "__init__" {
        return Err(wrong_self(ctx, "ExceptionGroup", name, &this));
    }
    Ok(this)
}

fn group_init(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = group_self(ctx, &mut args, "__init__")?;
    args.expect("ExceptionGroup", 2, 2)?;
    let (message, exceptions) = (args.positional[0].clone(), args.positional[1].clone());
    if message.as_str().is_none() {
        return Err(RuntimeError::type_error(format!(
            "argument 1 must be str, not {}",
            type_name(ctx, &message)
        )));
    }
    let Some(items) = exceptions.list_items().or_else(|| exceptions.tuple_items()) else {
        return Err(RuntimeError::type_error(
            "second argument (exceptions) must be a sequence",
        ));
    };
    if items.is_empty() {
        return Err(RuntimeError::value_error(
            "second argument (exceptions) must be a non-empty sequence",
        ));
    }
    let types = ctx.types();
    let exception_class = types.exception(ExceptionKind::Exception);
    for (index, item) in items.iter().enumerate() {
        let Some(class) = exception::class_of(item).filter(|_| exception::is_exception(item)) else {
            return Err(RuntimeError::value_error(format!(
                "Item {index} of second argument (exceptions) is not an exception"
            )));
        };
        if !is_subclass(&class, exception_class) {
            return Err(RuntimeError::type_error(
                "Cannot nest BaseExceptions in an ExceptionGroup",
            ));
        }
    }
    exception::set_args(&this, vec![message.clone(), exceptions]);
    exception::set_attribute(&this, "message", message);
    exception::set_attribute(&this, "exceptions", Value::tuple(items));
    Ok(Value::None)
}

fn group_subgroup(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = group_self(ctx, &mut args, "subgroup")?;
    args.expect("subgroup", 1, 1)?;
    let (matched, _) = exception::split(ctx, &this, &args.positional[0])?;
    Ok(matched.unwrap_or(Value::None))
}

fn group_split(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = group_self(ctx, &mut args, "split")?;
    args.expect("split", 1, 1)?;
    let (matched, rest) = exception::split(ctx, &this, &args.positional[0])?;
    Ok(Value::tuple(vec![
        matched.unwrap_or(Value::None),
        rest.unwrap_or(Value::None),
    ]))
}

fn group_derive(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = group_self(ctx, &mut args, "derive")?;
    args.expect("derive", 1, 1)?;
    let exceptions = protocol::collect(ctx, &args.positional[0])?;
    let message = exception::attribute(&this, "message").unwrap_or_else(|| Value::str(""));
    Ok(exception::new_group(&ctx.types(), message, exceptions))
}

// ---- generators ----------------------------------------------------------------

fn generator_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<ObjectRef> {
    let this = take_self(args, "generator", name)?;
    match this.as_object() {
        Some(object) if is_a::<GeneratorObject>(object) => Ok(object.clone()),
        _ => Err(wrong_self(ctx, "generator", name, &this)),
    }
}

fn finish_step(ctx: &mut dyn CallContext, step: GeneratorStep) -> RtResult<Value> {
    match step {
        GeneratorStep::Yielded(value) => Ok(value),
        GeneratorStep::Returned(value) => Err(stop_iteration(ctx, value)),
    }
}

fn generator_iter(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = generator_self(ctx, &mut args, "__iter__")?;
    Ok(Value::Object(this))
}

fn generator_next(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = generator_self(ctx, &mut args, "__next__")?;
    let step = ctx.resume(&this, ResumeAction::Send(Value::None))?;
    finish_step(ctx, step)
}

fn generator_send(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = generator_self(ctx, &mut args, "send")?;
    args.expect("send", 1, 1)?;
    let step = ctx.resume(&this, ResumeAction::Send(args.positional.remove(0)))?;
    finish_step(ctx, step)
}

/// `throw(exc)`, or the legacy `throw(type, value)` form.
fn generator_throw(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = generator_self(ctx, &mut args, "throw")?;
    args.expect("throw", 1, 3)?;
    let value = args.get(1).cloned().unwrap_or(Value::None);
    let thrown = args.positional.remove(0);
    let exception = if exception::is_exception_class(&thrown) {
        if exception::is_exception(&value)
            && let (Some(class), Some(target)) = (exception::class_of(&value), thrown.as_class())
            && is_subclass(&class, target)
        {
            value
        } else {
            let call_args = if value.is_none() {
                Vec::new()
            } else {
                value.tuple_items().unwrap_or_else(|| vec![value])
            };
            ctx.call(&thrown, Args::new(call_args))?
        }
    } else if exception::is_exception(&thrown) {
        if !value.is_none() {
            return Err(RuntimeError::type_error(
                "instance exception may not have a separate value",
            ));
        }
        thrown
    } else {
        return Err(RuntimeError::type_error(format!(
            "exceptions must be classes or instances deriving from BaseException, not {}",
            type_name(ctx, &thrown)
        )));
    };
    let step = ctx.resume(&this, ResumeAction::Throw(exception))?;
    finish_step(ctx, step)
}

fn generator_close(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = generator_self(ctx, &mut args, "close")?;
    args.expect("close", 0, 0)?;
    match ctx.resume(&this, ResumeAction::Close)? {
        GeneratorStep::Returned(value) | GeneratorStep::Yielded(value) => Ok(value),
    }
}

// ---- property and type ----------------------------------------------------------

fn property_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<PropertyObject> {
    let this = take_self(args, "property", name)?;
    let property = this
        .as_object()
        .and_then(|object| downcast::<PropertyObject>(object).map(|property| property.clone()));
    property.ok_or_else(|| wrong_self(ctx, "property", name, &this))
}

fn property_with(
    ctx: &mut dyn CallContext,
    mut args: Args,
    name: &str,
    update: fn(&mut PropertyObject, Value),
) -> RtResult<Value> {
    let mut property = property_self(ctx, &mut args, name)?;
    args.expect(name, 1, 1)?;
    update(&mut property, args.positional.remove(0));
    Ok(Value::Object(new_object(property)))
}

fn property_getter(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    property_with(ctx, args, "getter", |property, function| property.getter = Some(function))
}

fn property_setter(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    property_with(ctx, args, "setter", |property, function| property.setter = Some(function))
}

fn property_deleter(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    property_with(ctx, args, "deleter", |property, function| property.deleter = Some(function))
}

fn type_mro(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "type", "mro")?;
    match this.as_class() {
        Some(class) => Ok(Value::list(mro(class).into_iter().map(Value::Class).collect())),
        None => Err(wrong_self(ctx, "type", "mro", &this)),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::builtins::tests::{error, output};

    #[test]
    fn defining_eq_also_defines_ne() {
        let source = indoc! {"
            class P:
                def __init__(self, x):
                    self.x = x
                def __eq__(self, other):
                    return self.x == other.x
            print(P(1) != P(1), P(1) != P(2))
        "};
        assert_eq!(output(source), "False True\n");
    }

    #[test]
    fn exception_str_and_repr() {
        let source = indoc! {"
            e = ValueError('bad', 2)
            print(str(e), repr(e), repr(KeyError('k')), str(KeyError('k')))
            print(repr(ValueError()), str(ValueError('x')))
        "};
        assert_eq!(
            output(source),
            "('bad', 2) ValueError('bad', 2) KeyError('k') 'k'\nValueError() x\n"
        );
    }

    #[test]
    fn exception_group_split_keeps_structure() {
        let source = indoc! {"
            eg = ExceptionGroup('many', [ValueError(1), TypeError(2), ValueError(3)])
            matched, rest = eg.split(ValueError)
            print(repr(matched.exceptions), repr(rest.exceptions), matched.message)
            print(eg.subgroup(KeyError))
        "};
        assert_eq!(
            output(source),
            "(ValueError(1), ValueError(3)) (TypeError(2),) many\nNone\n"
        );
    }

    #[test]
    fn exception_group_rejects_empty_sequences() {
        assert_eq!(
            error("ExceptionGroup('x', [])"),
            "ValueError: second argument (exceptions) must be a non-empty sequence"
        );
    }

    #[test]
    fn stop_iteration_carries_the_return_value() {
        let source = indoc! {"
            def gen():
                yield 1
                return 'done'
            g = gen()
            next(g)
            try:
                next(g)
            except StopIteration as stop:
                print(stop.value)
        "};
        assert_eq!(output(source), "done\n");
    }

    #[test]
    fn generator_throw_and_close() {
        let source = indoc! {"
            def gen():
                try:
                    yield 1
                except KeyError:
                    yield 'caught'
                finally:
                    print('cleanup')
            g = gen()
            next(g)
            print(g.throw(KeyError))
            g.close()
        "};
        assert_eq!(output(source), "caught\ncleanup\n");
    }

    #[test]
    fn property_decorators_build_new_properties() {
        let source = indoc! {"
            class C:
                def __init__(self):
                    self._x = 0
                @property
                def x(self):
                    return self._x
                @x.setter
                def x(self, value):
                    self._x = value * 2
            c = C()
            c.x = 4
            print(c.x)
        "};
        assert_eq!(output(source), "8\n");
    }
}
