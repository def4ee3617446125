//! The builtin functions.

use crate::ast::BinaryOperator;
use crate::runtime::arith;
use crate::runtime::class::{AttrMap, ClassObject, InstanceObject};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::format::{ascii_escape, format_value, repr};
use crate::runtime::function::{BoundMethod, FunctionObject, NativeFunction, new_namespace};
use crate::runtime::generator::{GeneratorObject, GeneratorStep, ResumeAction};
use crate::runtime::iter::{CallableIterator, EnumerateIterator, FilterIterator, MapIterator, ZipIterator};
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{Args, CallContext, NativeFn, is_a, new_object};
use crate::runtime::protocol::{self, error_is, str_of, truthy, type_name};
use crate::runtime::value::Value;

use super::containers::sort_values;
use super::{index_arg, stop_iteration};

pub(super) const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("__build_class__", build_class),
    ("print", print),
    ("len", len),
    ("repr", repr_),
    ("ascii", ascii),
    ("isinstance", isinstance),
    ("issubclass", issubclass),
    ("getattr", getattr),
    ("setattr", setattr),
    ("hasattr", hasattr),
    ("delattr", delattr),
    ("id", id),
    ("hash", hash),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("sorted", sorted),
    ("reversed", reversed),
    ("enumerate", enumerate),
    ("zip", zip),
    ("map", map),
    ("filter", filter),
    ("any", any),
    ("all", all),
    ("iter", iter),
    ("next", next),
    ("callable", callable),
    ("chr", chr),
    ("ord", ord),
    ("round", round),
    ("divmod", divmod),
    ("pow", pow),
    ("format", format),
];

/// `__build_class__(body, name, *bases)`: runs the class body and creates
/// the class from the namespace it filled.
fn build_class(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    if let Some((key, _)) = args.keywords.first() {
        return Err(RuntimeError::type_error(format!(
            "class keyword argument '{key}' is not supported"
        )));
    }
    let mut positional = args.positional.into_iter();
    let (Some(body), Some(name)) = (positional.next(), positional.next()) else {
        return Err(RuntimeError::type_error("__build_class__: not enough arguments"));
    };
    let Some(name) = name.as_str().map(str::to_string) else {
        return Err(RuntimeError::type_error("__build_class__: name is not a string"));
    };
    let mut bases = Vec::new();
    for base in positional {
        match base {
            Value::Class(class) => bases.push(class),
            other => {
                return Err(RuntimeError::type_error(format!(
                    "bases must be types, not {}",
                    type_name(ctx, &other)
                )));
            }
        }
    }
    if bases.is_empty() {
        bases.push(ctx.types().object.clone());
    }

    let namespace = new_namespace();
    let class_cell = ctx.run_class_body(&body, namespace.clone())?;
    let attrs: AttrMap = namespace.borrow().clone();
    let qualname = attrs
        .get("__qualname__")
        .and_then(|qualname| qualname.as_str().map(str::to_string))
        .unwrap_or_else(|| name.clone());
    let class = ClassObject::create(&name, &qualname, bases, attrs)?;
    if let Value::Cell(cell) = class_cell {
        *cell.borrow_mut() = Some(Value::Class(class.clone()));
    }

    let entries: Vec<(String, Value)> = class
        .dict
        .borrow()
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for (key, value) in entries {
        if let Value::Object(object) = &value
            && is_a::<InstanceObject>(object)
        {
            protocol::call_special(ctx, &value, "__set_name__", vec![Value::Class(class.clone()), Value::str(key)])?;
        }
    }
    Ok(Value::Class(class))
}

/// `sep` or `end`: a string, or `None` for the default.
fn text_keyword(ctx: &dyn CallContext, name: &str, value: Option<Value>, default: &str) -> RtResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(text)) => Ok(text.to_string()),
        Some(other) => Err(RuntimeError::type_error(format!(
            "{name} must be None or a string, not {}",
            type_name(ctx, &other)
        ))),
    }
}

fn print(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let sep = args.take_keyword("sep");
    let end = args.take_keyword("end");
    if args.take_keyword("file").is_some_and(|file| !file.is_none()) {
        return Err(RuntimeError::type_error("print() only writes to standard output"));
    }
    args.take_keyword("flush");
    args.finish_keywords("print")?;
    let sep = text_keyword(ctx, "sep", sep, " ")?;
    let end = text_keyword(ctx, "end", end, "\n")?;
    let mut line = String::new();
    for (position, value) in args.positional.iter().enumerate() {
        if position > 0 {
            line.push_str(&sep);
        }
        line.push_str(&str_of(ctx, value)?);
    }
    line.push_str(&end);
    ctx.write_stdout(&line);
    Ok(Value::None)
}

fn len(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("len", 1, 1)?;
    let length = protocol::len(ctx, &args.positional[0])?;
    Ok(Value::Int(length as i64))
}

fn repr_(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("repr", 1, 1)?;
    repr(ctx, &args.positional[0]).map(Value::str)
}

fn ascii(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("ascii", 1, 1)?;
    let text = repr(ctx, &args.positional[0])?;
    Ok(Value::str(ascii_escape(&text)))
}

fn isinstance(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("isinstance", 2, 2)?;
    protocol::isinstance(ctx, &args.positional[0], &args.positional[1]).map(Value::Bool)
}

fn issubclass(_ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("issubclass", 2, 2)?;
    let Value::Class(class) = &args.positional[0] else {
        return Err(RuntimeError::type_error("issubclass() arg 1 must be a class"));
    };
    protocol::class_matches(class, &args.positional[1], "issubclass").map(Value::Bool)
}

fn attribute_name<'a>(ctx: &dyn CallContext, name: &'a Value) -> RtResult<&'a str> {
    name.as_str().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "attribute name must be string, not '{}'",
            type_name(ctx, name)
        ))
    })
}

fn getattr(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("getattr", 2, 3)?;
    let name = attribute_name(ctx, &args.positional[1])?;
    match protocol::get_attr(ctx, &args.positional[0], name) {
        Err(error)
            if args.len() == 3 && error_is(&ctx.types(), &error, ExceptionKind::AttributeError) =>
        {
            Ok(args.positional[2].clone())
        }
        result => result,
    }
}

fn setattr(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("setattr", 3, 3)?;
    let name = attribute_name(ctx, &args.positional[1])?;
    protocol::set_attr(ctx, &args.positional[0], name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn hasattr(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("hasattr", 2, 2)?;
    let name = attribute_name(ctx, &args.positional[1])?;
    match protocol::get_attr(ctx, &args.positional[0], name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(error) if error_is(&ctx.types(), &error, ExceptionKind::AttributeError) => Ok(Value::Bool(false)),
        Err(error) => Err(error),
    }
}

fn delattr(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("delattr", 2, 2)?;
    let name = attribute_name(ctx, &args.positional[1])?;
    protocol::del_attr(ctx, &args.positional[0], name)?;
    Ok(Value::None)
}

fn id(_ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("id", 1, 1)?;
    Ok(Value::Int(args.positional[0].id()))
}

fn hash(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("hash", 1, 1)?;
    protocol::hash_value(ctx, &args.positional[0]).map(Value::Int)
}

fn abs(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("abs", 1, 1)?;
    let value = &args.positional[0];
    match value {
        Value::Float(number) => return Ok(Value::Float(number.abs())),
        Value::Int(_) | Value::Bool(_) => {
            let number = value.as_int().unwrap_or_default();
            return number.checked_abs().map(Value::Int).ok_or_else(RuntimeError::overflow);
        }
        _ => {}
    }
    match protocol::call_special(ctx, value, "__abs__", Vec::new())? {
        Some(result) => Ok(result),
        None => Err(RuntimeError::type_error(format!(
            "bad operand type for abs(): '{}'",
            type_name(ctx, value)
        ))),
    }
}

/// Shared body of `min` and `max`.
fn extreme(ctx: &mut dyn CallContext, mut args: Args, name: &str, want_less: bool) -> RtResult<Value> {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let default = args.take_keyword("default");
    args.finish_keywords(name)?;
    let candidates = match args.positional.len() {
        0 => {
            return Err(RuntimeError::type_error(format!(
                "{name} expected at least 1 argument, got 0"
            )));
        }
        1 => protocol::collect(ctx, &args.positional[0])?,
        _ if default.is_some() => {
            return Err(RuntimeError::type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        _ => args.positional,
    };
    let mut best: Option<(Value, Value)> = None;
    for item in candidates {
        let score = match &key {
            Some(key) => ctx.call(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_score, _)) if want_less => arith::less_than(ctx, &score, best_score)?,
            Some((best_score, _)) => arith::less_than(ctx, best_score, &score)?,
        };
        if replace {
            best = Some((score, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(RuntimeError::value_error(format!(
            "{name}() iterable argument is empty"
        ))),
    }
}

fn min(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    extreme(ctx, args, "min", true)
}

fn max(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    extreme(ctx, args, "max", false)
}

fn sum(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let start = args.take_keyword("start");
    args.finish_keywords("sum")?;
    RuntimeError::expect_arity("sum", 1, 2, args.len())?;
    let mut total = start.or_else(|| args.get(1).cloned()).unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return Err(RuntimeError::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in protocol::collect(ctx, &args.positional[0])? {
        total = arith::binary_op(ctx, BinaryOperator::Add, &total, &item)?;
    }
    Ok(total)
}

fn sorted(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => truthy(ctx, &reverse)?,
        None => false,
    };
    args.finish_keywords("sorted")?;
    RuntimeError::expect_arity("sorted", 1, 1, args.len())?;
    let items = protocol::collect(ctx, &args.positional[0])?;
    sort_values(ctx, items, key.as_ref(), reverse).map(Value::list)
}

fn reversed(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("reversed", 1, 1)?;
    let sequence = &args.positional[0];
    if let Value::Object(object) = sequence
        && is_a::<InstanceObject>(object)
    {
        if let Some(result) = protocol::call_special(ctx, sequence, "__reversed__", Vec::new())? {
            return Ok(result);
        }
        let class = sequence.class(&ctx.types());
        if class.lookup("__len__").is_some() && class.lookup("__getitem__").is_some() {
            let length = protocol::len(ctx, sequence)?;
            let mut items = Vec::new();
            for index in (0..length).rev() {
                items.push(protocol::get_item(ctx, sequence, &Value::Int(index as i64))?);
            }
            return Ok(protocol::iterator(items));
        }
    }
    let native = match sequence {
        Value::Str(_) => true,
        Value::Object(object) => {
            is_a::<ListObject>(object)
                || is_a::<TupleObject>(object)
                || is_a::<crate::runtime::iter::RangeObject>(object)
                || is_a::<crate::runtime::dict::DictObject>(object)
        }
        _ => false,
    };
    if !native {
        return Err(RuntimeError::type_error(format!(
            "'{}' object is not reversible",
            type_name(ctx, sequence)
        )));
    }
    let mut items = protocol::collect(ctx, sequence)?;
    items.reverse();
    Ok(protocol::iterator(items))
}

fn enumerate(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let start = args.take_keyword("start");
    args.finish_keywords("enumerate")?;
    RuntimeError::expect_arity("enumerate", 1, 2, args.len())?;
    let count = match start.or_else(|| args.get(1).cloned()) {
        Some(start) => index_arg(ctx, &start)?,
        None => 0,
    };
    let inner = protocol::get_iter(ctx, &args.positional[0])?;
    Ok(Value::Object(new_object(EnumerateIterator { inner, count })))
}

fn zip(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let strict = match args.take_keyword("strict") {
        Some(strict) => truthy(ctx, &strict)?,
        None => false,
    };
    args.finish_keywords("zip")?;
    if strict {
        let mut columns = Vec::with_capacity(args.len());
        for iterable in &args.positional {
            columns.push(protocol::collect(ctx, iterable)?);
        }
        if let Some(first) = columns.first() {
            let expected = first.len();
            for (position, column) in columns.iter().enumerate().skip(1) {
                if column.len() != expected {
                    let relation = if column.len() < expected { "shorter" } else { "longer" };
                    let plural = if position == 1 { "" } else { "s" };
                    let bound = if position == 1 {
                        "1".to_string()
                    } else {
                        format!("1-{position}")
                    };
                    return Err(RuntimeError::value_error(format!(
                        "zip() argument {} is {relation} than argument{plural} {bound}",
                        position + 1
                    )));
                }
            }
        }
        let rows = columns.first().map_or(0, Vec::len);
        let tuples = (0..rows)
            .map(|row| Value::tuple(columns.iter().map(|column| column[row].clone()).collect()))
            .collect();
        return Ok(protocol::iterator(tuples));
    }
    let mut inners = Vec::with_capacity(args.len());
    for iterable in &args.positional {
        inners.push(protocol::get_iter(ctx, iterable)?);
    }
    Ok(Value::Object(new_object(ZipIterator { inners })))
}

fn map(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.no_keywords("map")?;
    if args.len() < 2 {
        return Err(RuntimeError::type_error("map() must have at least two arguments."));
    }
    let mut positional = args.positional.into_iter();
    let function = positional.next().unwrap_or(Value::None);
    let mut inners = Vec::new();
    for iterable in positional {
        inners.push(protocol::get_iter(ctx, &iterable)?);
    }
    Ok(Value::Object(new_object(MapIterator { function, inners })))
}

fn filter(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("filter", 2, 2)?;
    let inner = protocol::get_iter(ctx, &args.positional[1])?;
    Ok(Value::Object(new_object(FilterIterator {
        function: args.positional[0].clone(),
        inner,
    })))
}

/// Stops at the first item whose truth equals `stop_on`.
fn short_circuit(ctx: &mut dyn CallContext, args: Args, name: &str, stop_on: bool) -> RtResult<Value> {
    args.expect(name, 1, 1)?;
    let iterator = protocol::get_iter(ctx, &args.positional[0])?;
    while let Some(item) = protocol::next_item(ctx, &iterator)? {
        if truthy(ctx, &item)? == stop_on {
            return Ok(Value::Bool(stop_on));
        }
    }
    Ok(Value::Bool(!stop_on))
}

fn any(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    short_circuit(ctx, args, "any", true)
}

fn all(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    short_circuit(ctx, args, "all", false)
}

fn iter(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("iter", 1, 2)?;
    match args.positional.as_slice() {
        [iterable] => protocol::get_iter(ctx, iterable),
        [function, sentinel] => {
            if !is_callable(ctx, function) {
                return Err(RuntimeError::type_error("iter(v, w): v must be callable"));
            }
            Ok(Value::Object(new_object(CallableIterator {
                function: function.clone(),
                sentinel: sentinel.clone(),
                done: false,
            })))
        }
        _ => unreachable!("arity checked"),
    }
}

fn next(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("next", 1, 2)?;
    let iterator = &args.positional[0];
    let default = args.get(1).cloned();
    if let Value::Object(object) = iterator {
        if is_a::<GeneratorObject>(object) {
            return match ctx.resume(object, ResumeAction::Send(Value::None))? {
                GeneratorStep::Yielded(value) => Ok(value),
                GeneratorStep::Returned(value) => exhausted(ctx, value, default),
            };
        }
        if is_a::<InstanceObject>(object) {
            return match protocol::call_special(ctx, iterator, "__next__", Vec::new()) {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(RuntimeError::type_error(format!(
                    "'{}' object is not an iterator",
                    type_name(ctx, iterator)
                ))),
                Err(error)
                    if default.is_some() && error_is(&ctx.types(), &error, ExceptionKind::StopIteration) =>
                {
                    Ok(default.unwrap_or(Value::None))
                }
                Err(error) => Err(error),
            };
        }
    }
    match protocol::next_item(ctx, iterator)? {
        Some(value) => Ok(value),
        None => exhausted(ctx, Value::None, default),
    }
}

/// What `next` returns once the iterator is done.
fn exhausted(ctx: &mut dyn CallContext, value: Value, default: Option<Value>) -> RtResult<Value> {
    match default {
        Some(default) => Ok(default),
        None => Err(stop_iteration(ctx, value)),
    }
}

fn is_callable(ctx: &dyn CallContext, value: &Value) -> bool {
    match value {
        Value::Class(_) => true,
        Value::Object(object) => {
            is_a::<FunctionObject>(object)
                || is_a::<NativeFunction>(object)
                || is_a::<BoundMethod>(object)
                || (is_a::<InstanceObject>(object)
                    && value.class(&ctx.types()).lookup("__call__").is_some())
        }
        _ => false,
    }
}

fn callable(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("callable", 1, 1)?;
    Ok(Value::Bool(is_callable(ctx, &args.positional[0])))
}

fn chr(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("chr", 1, 1)?;
    let code = index_arg(ctx, &args.positional[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|ch| Value::str(ch.to_string()))
        .ok_or_else(|| RuntimeError::value_error("chr() arg not in range(0x110000)"))
}

fn ord(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("ord", 1, 1)?;
    let Value::Str(text) = &args.positional[0] else {
        return Err(RuntimeError::type_error(format!(
            "ord() expected string of length 1, but {} found",
            type_name(ctx, &args.positional[0])
        )));
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(Value::Int(i64::from(u32::from(ch)))),
        _ => Err(RuntimeError::type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 {
        2.0 * (value / 2.0).round()
    } else {
        rounded
    }
}

fn round(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let ndigits = args.take_keyword("ndigits");
    args.finish_keywords("round")?;
    RuntimeError::expect_arity("round", 1, 2, args.len())?;
    let ndigits = match ndigits.or_else(|| args.get(1).cloned()) {
        None | Some(Value::None) => None,
        Some(digits) => Some(index_arg(ctx, &digits)?),
    };
    let number = &args.positional[0];
    match (number, ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(number.as_int().unwrap_or_default())),
        (Value::Int(_) | Value::Bool(_), Some(digits)) => {
            let value = number.as_int().unwrap_or_default();
            if digits >= 0 {
                return Ok(Value::Int(value));
            }
            let Some(scale) = u32::try_from(-digits).ok().and_then(|power| 10i64.checked_pow(power)) else {
                return Ok(Value::Int(0));
            };
            let quotient = value.div_euclid(scale);
            let remainder = value.rem_euclid(scale);
            let round_up = match (remainder * 2).cmp(&scale) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => quotient % 2 != 0,
                std::cmp::Ordering::Less => false,
            };
            let quotient = if round_up { quotient + 1 } else { quotient };
            quotient.checked_mul(scale).map(Value::Int).ok_or_else(RuntimeError::overflow)
        }
        (Value::Float(value), None) => {
            if value.is_nan() {
                return Err(RuntimeError::value_error("cannot convert float NaN to integer"));
            }
            if value.is_infinite() {
                return Err(RuntimeError::new(
                    ExceptionKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            let rounded = round_half_even(*value);
            if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                return Err(RuntimeError::overflow());
            }
            Ok(Value::Int(rounded as i64))
        }
        (Value::Float(value), Some(digits)) => {
            if !value.is_finite() {
                return Ok(Value::Float(*value));
            }
            if digits >= 0 {
                let precision = usize::try_from(digits.min(320)).unwrap_or(320);
                let text = format!("{value:.precision$}");
                return Ok(Value::Float(text.parse().unwrap_or(*value)));
            }
            let scale = 10f64.powi(i32::try_from(-digits).unwrap_or(i32::MAX));
            if scale.is_infinite() {
                return Ok(Value::Float(0.0f64.copysign(*value)));
            }
            Ok(Value::Float(round_half_even(value / scale) * scale))
        }
        _ => {
            let extra = ndigits.map(Value::Int).into_iter().collect();
            match protocol::call_special(ctx, number, "__round__", extra)? {
                Some(result) => Ok(result),
                None => Err(RuntimeError::type_error(format!(
                    "type {} doesn't define __round__ method",
                    type_name(ctx, number)
                ))),
            }
        }
    }
}

fn divmod(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    if a.as_float().is_some() && b.as_float().is_some() {
        return arith::divmod(ctx, a, b);
    }
    for (receiver, name, other) in [(a, "__divmod__", b), (b, "__rdivmod__", a)] {
        if let Some(result) = protocol::call_special(ctx, receiver, name, vec![other.clone()])?
            && !matches!(result, Value::NotImplemented)
        {
            return Ok(result);
        }
    }
    Err(RuntimeError::type_error(format!(
        "unsupported operand type(s) for divmod(): '{}' and '{}'",
        type_name(ctx, a),
        type_name(ctx, b)
    )))
}

/// Inverse of `value` modulo `modulus`, by the extended Euclidean algorithm.
fn modular_inverse(value: i128, modulus: i128) -> Option<i128> {
    let (mut old_r, mut r) = (value.rem_euclid(modulus), modulus);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }
    (old_r == 1).then(|| old_s.rem_euclid(modulus))
}

fn modular_pow(base: i64, exponent: i64, modulus: i64) -> RtResult<i64> {
    if modulus == 0 {
        return Err(RuntimeError::value_error("pow() 3rd argument cannot be 0"));
    }
    let magnitude = i128::from(modulus).abs();
    let mut base = i128::from(base).rem_euclid(magnitude);
    if exponent < 0 {
        base = modular_inverse(base, magnitude).ok_or_else(|| {
            RuntimeError::value_error("base is not invertible for the given modulus")
        })?;
    }
    let mut exponent = exponent.unsigned_abs();
    let mut result = 1i128 % magnitude;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result * base % magnitude;
        }
        base = base * base % magnitude;
        exponent >>= 1;
    }
    // The result takes the sign of the modulus.
    if modulus < 0 && result != 0 {
        result -= magnitude;
    }
    i64::try_from(result).map_err(|_| RuntimeError::overflow())
}

fn pow(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let modulus = args.take_keyword("mod");
    args.finish_keywords("pow")?;
    RuntimeError::expect_arity("pow", 2, 3, args.len())?;
    let (base, exponent) = (&args.positional[0], &args.positional[1]);
    match modulus.or_else(|| args.get(2).cloned()) {
        None | Some(Value::None) => arith::binary_op(ctx, BinaryOperator::Pow, base, exponent),
        Some(modulus) => match (base.as_int(), exponent.as_int(), modulus.as_int()) {
            (Some(base), Some(exponent), Some(modulus)) => modular_pow(base, exponent, modulus).map(Value::Int),
            _ => Err(RuntimeError::type_error(
                "pow() 3rd argument not allowed unless all arguments are integers",
            )),
        },
    }
}

fn format(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    args.expect("format", 1, 2)?;
    let spec = match args.get(1) {
        None => String::new(),
        Some(Value::Str(spec)) => spec.to_string(),
        Some(other) => {
            return Err(RuntimeError::type_error(format!(
                "format() argument 2 must be str, not {}",
                type_name(ctx, other)
            )));
        }
    };
    format_value(ctx, &args.positional[0], &spec).map(Value::str)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{modular_pow, round_half_even};
    use crate::builtins::tests::{error, output};

    #[test]
    fn modular_power_handles_negative_operands() {
        assert_eq!(modular_pow(3, 4, 5).ok(), Some(1));
        assert_eq!(modular_pow(-2, 3, 7).ok(), Some(6));
        assert_eq!(modular_pow(3, -1, 7).ok(), Some(5));
        assert_eq!(modular_pow(2, 3, -5).ok(), Some(-2));
        assert!(modular_pow(2, -1, 4).is_err());
    }

    #[test]
    fn ties_round_to_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-0.5), -0.0);
        assert_eq!(round_half_even(1.4), 1.0);
    }

    #[test]
    fn print_separators() {
        let source = indoc! {"
            print(1, 'a', None, sep='-', end='!\\n')
            print()
            print('x', end='')
            print('y')
        "};
        assert_eq!(output(source), "1-a-None!\n\nxy\n");
    }

    #[test]
    fn reductions() {
        let source = indoc! {"
            print(min(3, 1, 2), max([3, 1, 2]), min('bca'), max([], default=0))
            print(min(['aaa', 'b', 'cc'], key=len), max([1, -5, 2], key=abs))
            print(sum([1, 2, 3]), sum([[1], [2]], []), sum([0.5, 0.25], 1))
            print(any([0, '', 3]), all([1, 'x']), all([]), any([]))
        "};
        assert_eq!(
            output(source),
            "1 3 a 0\nb -5\n6 [1, 2] 1.75\nTrue True True False\n"
        );
    }

    #[test]
    fn iteration_helpers() {
        let source = indoc! {"
            print(list(enumerate('ab', 1)), list(zip([1, 2, 3], 'xy')))
            print(list(map(lambda a, b: a * b, [1, 2], [3, 4])), list(filter(None, [0, 1, 2])))
            print(list(reversed([1, 2, 3])), list(reversed(range(3))), sorted({3: 0, 1: 0}))
            it = iter([10, 20])
            print(next(it), next(it), next(it, 'done'))
        "};
        assert_eq!(
            output(source),
            concat!(
                "[(1, 'a'), (2, 'b')] [(1, 'x'), (2, 'y')]\n",
                "[3, 8] [1, 2]\n",
                "[3, 2, 1] [2, 1, 0] [1, 3]\n",
                "10 20 done\n",
            )
        );
    }

    #[test]
    fn strict_zip_reports_the_short_argument() {
        assert_eq!(
            error("list(zip([1, 2], [1], strict=True))"),
            "ValueError: zip() argument 2 is shorter than argument 1"
        );
    }

    #[test]
    fn numeric_builtins() {
        let source = indoc! {"
            print(abs(-3), abs(-2.5), round(2.5), round(3.5), round(2.675, 2), round(1234, -2))
            print(divmod(7, -2), divmod(7.5, 2), pow(2, 10), pow(3, 4, 5), pow(2, -1))
            print(chr(65), ord('é'), format(3.14159, '.2f'), format(42, '08b'))
        "};
        assert_eq!(
            output(source),
            "3 2.5 2 4 2.67 1200\n(-4, -1) (3.0, 1.5) 1024 1 0.5\nA 233 3.14 00101010\n"
        );
    }

    #[test]
    fn attribute_builtins() {
        let source = indoc! {"
            class Box:
                pass
            b = Box()
            setattr(b, 'size', 3)
            print(getattr(b, 'size'), getattr(b, 'missing', None), hasattr(b, 'size'))
            delattr(b, 'size')
            print(hasattr(b, 'size'), callable(Box), callable(b), callable(len))
        "};
        assert_eq!(output(source), "3 None True\nFalse True False True\n");
    }

    #[test]
    fn next_on_exhausted_generator_raises_stop_iteration() {
        let source = indoc! {"
            def gen():
                yield 1
                return 'finished'
            g = gen()
            next(g)
            try:
                next(g)
            except StopIteration as stop:
                print('stopped with', stop.value)
        "};
        assert_eq!(output(source), "stopped with finished\n");
    }

    #[test]
    fn builtin_argument_errors() {
        assert_eq!(error("len(5)"), "TypeError: object of type 'int' has no len()");
        assert_eq!(error("min([])"), "ValueError: min() iterable argument is empty");
        assert_eq!(error("chr(-1)"), "ValueError: chr() arg not in range(0x110000)");
        assert_eq!(
            error("sum(['a'], '')"),
            "TypeError: sum() can't sum strings [use ''.join(seq) instead]"
        );
    }

    #[test]
    fn set_name_is_called_on_descriptors() {
        let source = indoc! {"
            class Field:
                def __set_name__(self, owner, name):
                    self.name = owner.__name__ + '.' + name
            class Model:
                title = Field()
            print(Model.title.name)
        "};
        assert_eq!(output(source), "Model.title\n");
    }
}
