//! Constructors of the builtin classes, plus the few numeric methods.

use crate::runtime::class::{AttrMap, ClassObject, Constructors, InstanceObject, Types, is_subclass};
use crate::runtime::dict::{self, SetObject};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::function::{ClassMethodObject, PropertyObject, StaticMethodObject, SuperObject};
use crate::runtime::iter::{RangeObject, SliceObject};
use crate::runtime::object::{Args, CallContext, new_object};
use crate::runtime::protocol::{self, str_of, truthy, type_name};
use crate::runtime::value::Value;

use super::{add_methods, index_arg, take_self, wrong_self};

pub(super) fn constructors() -> Constructors {
    Constructors {
        object: Some(object_new),
        type_: Some(type_new),
        int: Some(int_new),
        bool: Some(bool_new),
        float: Some(float_new),
        str: Some(str_new),
        list: Some(list_new),
        tuple: Some(tuple_new),
        dict: Some(dict_new),
        set: Some(set_new),
        range: Some(range_new),
        slice: Some(slice_new),
        property: Some(property_new),
        staticmethod: Some(staticmethod_new),
        classmethod: Some(classmethod_new),
        super_: Some(super_new),
    }
}

pub(super) fn install(types: &Types) {
    add_methods(&types.int, &[("bit_length", int_bit_length), ("__index__", int_index)]);
    add_methods(&types.float, &[("is_integer", float_is_integer)]);
    for class in [&types.list, &types.dict, &types.set] {
        class.insert("__hash__", Value::None);
    }
}

fn object_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    if !args.is_empty() {
        return Err(RuntimeError::type_error("object() takes no arguments"));
    }
    Ok(Value::Object(new_object(InstanceObject::new(ctx.types().object.clone()))))
}

/// `type(obj)`, or `type(name, bases, namespace)` to create a class.
fn type_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.no_keywords("type")?;
    match args.positional.as_slice() {
        [value] => Ok(Value::Class(value.class(&ctx.types()))),
        [name, bases, namespace] => {
            let Some(name) = name.as_str() else {
                return Err(RuntimeError::type_error(format!(
                    "type.__new__() argument 1 must be str, not {}",
                    type_name(ctx, name)
                )));
            };
            let mut classes = Vec::new();
            for base in protocol::collect(ctx, bases)? {
                match base {
                    Value::Class(class) => classes.push(class),
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "bases must be types, not {}",
                            type_name(ctx, &other)
                        )));
                    }
                }
            }
            if classes.is_empty() {
                classes.push(ctx.types().object.clone());
            }
            let mut attrs = AttrMap::default();
            let pairs = namespace
                .as_object()
                .and_then(|object| dict::table(object).map(|table| table.items()))
                .ok_or_else(|| RuntimeError::type_error("type.__new__() argument 3 must be dict"))?;
            for (key, value) in pairs {
                let Some(key) = key.as_str() else {
                    return Err(RuntimeError::type_error("attribute name must be string"));
                };
                attrs.insert(key.to_string(), value);
            }
            attrs
                .entry("__module__".to_string())
                .or_insert_with(|| Value::str("__main__"));
            ClassObject::create(name, name, classes, attrs).map(Value::Class)
        }
        _ => Err(RuntimeError::type_error("type() takes 1 or 3 arguments")),
    }
}

// ---- numbers ---------------------------------------------------------------

/// Parses an integer literal the way `int(text, base)` does.
pub(super) fn parse_int(text: &str, base: u32) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) if lower.len() > 1 && lower.starts_with('0') && lower.trim_start_matches(['0', '_']).is_empty() => {
            (10, lower.as_str())
        }
        (0, _) if lower.len() > 1 && lower.starts_with('0') => return None,
        (0, _) => (10, lower.as_str()),
        (base, _) => (base, lower.as_str()),
    };
    let digits = digits.strip_prefix('_').filter(|_| lower.len() > digits.len()).unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    // Accumulate towards the sign so i64::MIN parses.
    let mut value: i64 = 0;
    for ch in digits.chars().filter(|ch| *ch != '_') {
        let digit = ch.to_digit(base)? as i64;
        let scaled = value.checked_mul(base as i64)?;
        value = if negative { scaled.checked_sub(digit)? } else { scaled.checked_add(digit)? };
    }
    Some(value)
}

fn float_to_int(value: f64) -> RtResult<i64> {
    if value.is_nan() {
        return Err(RuntimeError::value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(RuntimeError::new(
            ExceptionKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = value.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(RuntimeError::overflow());
    }
    Ok(truncated as i64)
}

fn int_new(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let base = args.take_keyword("base");
    args.finish_keywords("int")?;
    RuntimeError::expect_arity("int", 0, 2, args.len())?;
    let base = match base.or_else(|| args.get(1).cloned()) {
        Some(base) => Some(index_arg(ctx, &base)?),
        None => None,
    };
    let Some(value) = args.get(0).cloned() else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = base {
        if base != 0 && !(2..=36).contains(&base) {
            return Err(RuntimeError::value_error("int() base must be >= 2 and <= 36, or 0"));
        }
        let Some(text) = value.as_str() else {
            return Err(RuntimeError::type_error(
                "int() can't convert non-string with explicit base",
            ));
        };
        return parse_int(text, base as u32).map(Value::Int).ok_or_else(|| {
            RuntimeError::value_error(format!(
                "invalid literal for int() with base {base}: {}",
                crate::runtime::format::str_repr(text)
            ))
        });
    }
    match &value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or_default())),
        Value::Float(number) => float_to_int(*number).map(Value::Int),
        Value::Str(text) => parse_int(text, 10).map(Value::Int).ok_or_else(|| {
            RuntimeError::value_error(format!(
                "invalid literal for int() with base 10: {}",
                crate::runtime::format::str_repr(text)
            ))
        }),
        other => {
            for name in ["__int__", "__index__"] {
                if let Some(result) = protocol::call_special(ctx, other, name, Vec::new())? {
                    return match result.as_int() {
                        Some(number) => Ok(Value::Int(number)),
                        None => Err(RuntimeError::type_error(format!(
                            "{name} returned non-int (type {})",
                            type_name(ctx, &result)
                        ))),
                    };
                }
            }
            Err(RuntimeError::type_error(format!(
                "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                type_name(ctx, other)
            )))
        }
    }
}

pub(super) fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let unsigned = lower.trim_start_matches(['+', '-']);
    if matches!(unsigned, "inf" | "infinity" | "nan") {
        let magnitude = if unsigned == "nan" { f64::NAN } else { f64::INFINITY };
        return Some(if lower.starts_with('-') { -magnitude } else { magnitude });
    }
    if trimmed.starts_with('_') || trimmed.ends_with('_') || trimmed.contains("__") {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|ch| *ch != '_').collect();
    if cleaned.is_empty() || cleaned.chars().any(|ch| ch.is_alphabetic() && ch != 'e' && ch != 'E') {
        return None;
    }
    cleaned.parse().ok()
}

fn float_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("float", 0, 1)?;
    let Some(value) = args.get(0) else {
        return Ok(Value::Float(0.0));
    };
    match value {
        Value::Float(_) | Value::Int(_) | Value::Bool(_) => Ok(Value::Float(value.as_float().unwrap_or_default())),
        Value::Str(text) => parse_float(text).map(Value::Float).ok_or_else(|| {
            RuntimeError::value_error(format!(
                "could not convert string to float: {}",
                crate::runtime::format::str_repr(text)
            ))
        }),
        other => {
            if let Some(result) = protocol::call_special(ctx, other, "__float__", Vec::new())? {
                return match result {
                    Value::Float(_) => Ok(result),
                    _ => Err(RuntimeError::type_error(format!(
                        "{}.__float__ returned non-float (type {})",
                        type_name(ctx, other),
                        type_name(ctx, &result)
                    ))),
                };
            }
            Err(RuntimeError::type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                type_name(ctx, other)
            )))
        }
    }
}

fn bool_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("bool", 0, 1)?;
    match args.get(0) {
        Some(value) => truthy(ctx, value).map(Value::Bool),
        None => Ok(Value::Bool(false)),
    }
}

fn int_bit_length(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "int", "bit_length")?;
    let Some(number) = this.as_int() else {
        return Err(wrong_self(ctx, "int", "bit_length", &this));
    };
    Ok(Value::Int(i64::from(64 - number.unsigned_abs().leading_zeros())))
}

fn int_index(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "int", "__index__")?;
    this.as_int()
        .map(Value::Int)
        .ok_or_else(|| wrong_self(ctx, "int", "__index__", &this))
}

fn float_is_integer(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let this = take_self(&mut args, "float", "is_integer")?;
    match this {
        Value::Float(number) => Ok(Value::Bool(number.is_finite() && number.fract() == 0.0)),
        other => Err(wrong_self(ctx, "float", "is_integer", &other)),
    }
}

// ---- strings and containers ------------------------------------------------------

fn str_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("str", 0, 1)?;
    match args.get(0) {
        Some(value) => str_of(ctx, value).map(Value::str),
        None => Ok(Value::str("")),
    }
}

fn list_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("list", 0, 1)?;
    match args.get(0) {
        Some(iterable) => protocol::collect(ctx, iterable).map(Value::list),
        None => Ok(Value::list(Vec::new())),
    }
}

fn tuple_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("tuple", 0, 1)?;
    match args.get(0) {
        Some(iterable) if iterable.tuple_items().is_some() => Ok(iterable.clone()),
        Some(iterable) => protocol::collect(ctx, iterable).map(Value::tuple),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn dict_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    RuntimeError::expect_arity("dict", 0, 1, args.len())?;
    let dict = dict::new_dict();
    let Args {
        positional,
        keywords,
    } = args;
    if let Some(source) = positional.into_iter().next() {
        super::containers::update_dict(ctx, &dict, &source)?;
    }
    for (key, value) in keywords {
        dict::dict_set(ctx, &dict, Value::str(key), value)?;
    }
    Ok(Value::Object(dict))
}

fn set_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("set", 0, 1)?;
    match args.get(0) {
        Some(iterable) => {
            let items = protocol::collect(ctx, iterable)?;
            dict::set_from_items(ctx, items)
        }
        None => Ok(Value::Object(new_object(SetObject::default()))),
    }
}

fn range_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("range", 1, 3)?;
    let mut bounds = Vec::with_capacity(3);
    for value in &args.positional {
        bounds.push(index_arg(ctx, value)?);
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(RuntimeError::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Object(new_object(RangeObject { start, stop, step })))
}

fn slice_new(_ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("slice", 1, 3)?;
    let (start, stop, step) = match args.positional.as_slice() {
        [stop] => (Value::None, stop.clone(), Value::None),
        [start, stop] => (start.clone(), stop.clone(), Value::None),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        _ => unreachable!("arity checked"),
    };
    Ok(Value::Object(new_object(SliceObject { start, stop, step })))
}

// ---- descriptors and super ---------------------------------------------------------

fn property_new(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let mut slots = [
        args.take_keyword("fget"),
        args.take_keyword("fset"),
        args.take_keyword("fdel"),
    ];
    args.take_keyword("doc");
    args.finish_keywords("property")?;
    RuntimeError::expect_arity("property", 0, 4, args.len())?;
    for (slot, value) in slots.iter_mut().zip(args.positional) {
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    let [getter, setter, deleter] = slots.map(|slot| slot.filter(|value| !value.is_none()));
    Ok(Value::Object(new_object(PropertyObject {
        getter,
        setter,
        deleter,
    })))
}

fn staticmethod_new(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    args.expect("staticmethod", 1, 1)?;
    Ok(Value::Object(new_object(StaticMethodObject {
        function: args.positional.remove(0),
    })))
}

fn classmethod_new(_ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    args.expect("classmethod", 1, 1)?;
    Ok(Value::Object(new_object(ClassMethodObject {
        function: args.positional.remove(0),
    })))
}

/// `super(cls, obj)`; the zero-argument form is rewritten by the compiler.
fn super_new(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.no_keywords("super")?;
    let (this_class, receiver) = match args.positional.as_slice() {
        [] => return Err(RuntimeError::runtime_error("super(): no arguments")),
        [Value::Class(class), receiver] => (class.clone(), receiver.clone()),
        [Value::Class(_)] => {
            return Err(RuntimeError::runtime_error(
                "super() with a single argument is not supported",
            ));
        }
        [other, ..] if args.len() <= 2 => {
            return Err(RuntimeError::type_error(format!(
                "super() argument 1 must be a type, not {}",
                type_name(ctx, other)
            )));
        }
        _ => return Err(RuntimeError::type_error("super() takes at most 2 arguments")),
    };
    let start_class = match &receiver {
        Value::Class(class) if is_subclass(class, &this_class) => class.clone(),
        other => {
            let class = other.class(&ctx.types());
            if !is_subclass(&class, &this_class) {
                return Err(RuntimeError::type_error(
                    "super(type, obj): obj must be an instance or subtype of type",
                ));
            }
            class
        }
    };
    Ok(Value::Object(new_object(SuperObject {
        this_class,
        receiver,
        start_class,
    })))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{parse_float, parse_int};
    use crate::builtins::tests::{error, output};

    #[test]
    fn integer_literals_follow_base_rules() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-0x1f", 0), Some(-31));
        assert_eq!(parse_int("1_000", 10), Some(1000));
        assert_eq!(parse_int("ff", 16), Some(255));
        assert_eq!(parse_int("0b101", 2), Some(5));
        assert_eq!(parse_int("012", 0), None);
        assert_eq!(parse_int("1__0", 10), None);
        assert_eq!(parse_int("", 10), None);
        assert_eq!(parse_int("99999999999999999999", 10), None);
    }

    #[test]
    fn float_literals_accept_special_values() {
        assert_eq!(parse_float("1.5e3"), Some(1500.0));
        assert_eq!(parse_float("-inf"), Some(f64::NEG_INFINITY));
        assert!(parse_float("nan").is_some_and(f64::is_nan));
        assert_eq!(parse_float("abc"), None);
    }

    #[test]
    fn constructors_convert_their_argument() {
        let source = indoc! {"
            print(int('12'), int(3.9), int(-3.9), int('z', 36), float('2.5'), str(1.0))
            print(list('ab'), tuple([1]), dict([(1, 2)], x=3), set(), bool([]))
            print(range(3), list(range(10, 0, -3)), slice(1, 2))
        "};
        assert_eq!(
            output(source),
            "12 3 -3 35 2.5 1.0\n['a', 'b'] (1,) {1: 2, 'x': 3} set() False\nrange(0, 3) [10, 7, 4, 1] slice(1, 2, None)\n"
        );
    }

    #[test]
    fn conversion_failures_name_the_input() {
        assert_eq!(
            error("int('4x')"),
            "ValueError: invalid literal for int() with base 10: '4x'"
        );
        assert_eq!(error("float('x')"), "ValueError: could not convert string to float: 'x'");
        assert_eq!(error("range(1, 2, 0)"), "ValueError: range() arg 3 must not be zero");
    }

    #[test]
    fn type_with_three_arguments_creates_a_class() {
        let source = indoc! {"
            Point = type('Point', (), {'x': 1})
            print(Point.__name__, Point().x)
        "};
        assert_eq!(output(source), "Point 1\n");
    }

    #[test]
    fn explicit_super_walks_the_mro() {
        let source = indoc! {"
            class A:
                def who(self):
                    return 'A'
            class B(A):
                def who(self):
                    return 'B' + super(B, self).who()
            print(B().who())
        "};
        assert_eq!(output(source), "BA\n");
    }
}
