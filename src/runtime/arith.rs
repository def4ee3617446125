//! Binary, unary and comparison operators.
//!
//! Native numbers, strings and containers are handled directly. Everything
//! else goes through the dunder protocol: the forward method, then the
//! reflected one on the right operand, with a right operand whose class is a
//! proper subclass of the left one getting the first try.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::ast::{BinaryOperator, ComparisonOperator, UnaryOperator};
use crate::runtime::class::{ClassKind, ClassRef, is_subclass};
use crate::runtime::dict::{self, DictObject, SetObject, table};
use crate::runtime::error::{MAX_BUILT_LEN, RtResult, RuntimeError};
use crate::runtime::format;
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{CallContext, downcast, downcast_mut, is_a};
use crate::runtime::protocol::{
    call_special, collect, contains, float_equals_int, native_eq, truthy, type_name, values_equal,
};
use crate::runtime::value::Value;

// ---- integers --------------------------------------------------------------

fn int_floor_div(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(RuntimeError::zero_division("integer division or modulo by zero"));
    }
    let quotient = a.checked_div(b).ok_or_else(RuntimeError::overflow)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn int_mod(a: i64, b: i64) -> RtResult<i64> {
    if b == 0 {
        return Err(RuntimeError::zero_division("integer division or modulo by zero"));
    }
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}

fn int_pow(base: i64, exponent: i64) -> RtResult<Value> {
    if exponent < 0 {
        if base == 0 {
            return Err(RuntimeError::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float((base as f64).powf(exponent as f64)));
    }
    match base {
        _ if exponent == 0 => Ok(Value::Int(1)),
        0 | 1 => Ok(Value::Int(base)),
        -1 => Ok(Value::Int(if exponent % 2 == 1 { -1 } else { 1 })),
        _ => u32::try_from(exponent)
            .ok()
            .and_then(|exponent| base.checked_pow(exponent))
            .map(Value::Int)
            .ok_or_else(RuntimeError::overflow),
    }
}

fn int_shift(value: i64, shift: i64, left: bool) -> RtResult<i64> {
    if shift < 0 {
        return Err(RuntimeError::value_error("negative shift count"));
    }
    if !left {
        return Ok(if shift >= 64 {
            if value < 0 { -1 } else { 0 }
        } else {
            value >> shift
        });
    }
    if value == 0 {
        return Ok(0);
    }
    if shift >= 64 {
        return Err(RuntimeError::overflow());
    }
    let shifted = value << shift;
    if shifted >> shift != value {
        return Err(RuntimeError::overflow());
    }
    Ok(shifted)
}

fn int_binary(op: BinaryOperator, a: i64, b: i64) -> RtResult<Option<Value>> {
    use BinaryOperator::*;
    let checked = |result: Option<i64>| result.map(Value::Int).ok_or_else(RuntimeError::overflow);
    let value = match op {
        Add => checked(a.checked_add(b))?,
        Sub => checked(a.checked_sub(b))?,
        Mul => checked(a.checked_mul(b))?,
        Div => {
            if b == 0 {
                return Err(RuntimeError::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        FloorDiv => Value::Int(int_floor_div(a, b)?),
        Mod => Value::Int(int_mod(a, b)?),
        Pow => int_pow(a, b)?,
        LShift => Value::Int(int_shift(a, b, true)?),
        RShift => Value::Int(int_shift(a, b, false)?),
        BitAnd => Value::Int(a & b),
        BitOr => Value::Int(a | b),
        BitXor => Value::Int(a ^ b),
        MatMul => return Ok(None),
    };
    Ok(Some(value))
}

// ---- floats ----------------------------------------------------------------

/// Python's `divmod` for floats: the remainder takes the sign of the divisor.
fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut remainder = a % b;
    let mut quotient = (a - remainder) / b;
    if remainder != 0.0 {
        if (b < 0.0) != (remainder < 0.0) {
            remainder += b;
            quotient -= 1.0;
        }
    } else {
        remainder = 0.0_f64.copysign(b);
    }
    let floor = if quotient != 0.0 {
        let floor = quotient.floor();
        if quotient - floor > 0.5 { floor + 1.0 } else { floor }
    } else {
        0.0_f64.copysign(a / b)
    };
    (floor, remainder)
}

fn float_pow(base: f64, exponent: f64) -> RtResult<f64> {
    if base == 0.0 && exponent < 0.0 {
        return Err(RuntimeError::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    if base < 0.0 && exponent.fract() != 0.0 && exponent.is_finite() {
        return Err(RuntimeError::value_error("math domain error"));
    }
    let result = base.powf(exponent);
    if result.is_infinite() && base.is_finite() && exponent.is_finite() {
        return Err(RuntimeError::new(
            crate::runtime::error::ExceptionKind::OverflowError,
            "(34, 'Numerical result out of range')",
        ));
    }
    Ok(result)
}

fn float_binary(op: BinaryOperator, a: f64, b: f64) -> RtResult<Option<Value>> {
    use BinaryOperator::*;
    let value = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float division by zero"));
            }
            a / b
        }
        FloorDiv => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        Mod => {
            if b == 0.0 {
                return Err(RuntimeError::zero_division("float modulo"));
            }
            float_divmod(a, b).1
        }
        Pow => float_pow(a, b)?,
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

/// `divmod(a, b)` for native numbers.
pub fn divmod(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<Value> {
    if let (Some(a), Some(b)) = (a.as_int(), b.as_int()) {
        return Ok(Value::tuple(vec![
            Value::Int(int_floor_div(a, b)?),
            Value::Int(int_mod(a, b)?),
        ]));
    }
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float())
        && is_number(a)
        && is_number(b)
    {
        if y == 0.0 {
            return Err(RuntimeError::zero_division("float divmod()"));
        }
        let (quotient, remainder) = float_divmod(x, y);
        return Ok(Value::tuple(vec![Value::Float(quotient), Value::Float(remainder)]));
    }
    if let Some(result) = call_special(ctx, a, "__divmod__", vec![b.clone()])?
        && !matches!(result, Value::NotImplemented)
    {
        return Ok(result);
    }
    if let Some(result) = call_special(ctx, b, "__rdivmod__", vec![a.clone()])?
        && !matches!(result, Value::NotImplemented)
    {
        return Ok(result);
    }
    Err(RuntimeError::type_error(format!(
        "unsupported operand type(s) for divmod(): '{}' and '{}'",
        type_name(ctx, a),
        type_name(ctx, b)
    )))
}

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_) | Value::Float(_))
}

// ---- sequences and sets ----------------------------------------------------

fn repeat<T: Clone>(items: &[T], count: i64) -> RtResult<Vec<T>> {
    if count <= 0 || items.is_empty() {
        return Ok(Vec::new());
    }
    let total = items
        .len()
        .checked_mul(count as usize)
        .filter(|total| *total <= MAX_BUILT_LEN)
        .ok_or_else(RuntimeError::overflow)?;
    let mut result = Vec::with_capacity(total);
    for _ in 0..count {
        result.extend_from_slice(items);
    }
    Ok(result)
}

enum Sequence {
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

fn sequence_of(value: &Value) -> Option<Sequence> {
    let object = value.as_object()?;
    let inner = object.borrow();
    let any = inner.as_any();
    if let Some(list) = any.downcast_ref::<ListObject>() {
        return Some(Sequence::List(list.items.clone()));
    }
    any.downcast_ref::<TupleObject>()
        .map(|tuple| Sequence::Tuple(tuple.items.clone()))
}

fn is_set(value: &Value) -> bool {
    value.as_object().is_some_and(is_a::<SetObject>)
}

fn is_dict(value: &Value) -> bool {
    value.as_object().is_some_and(is_a::<DictObject>)
}

fn table_keys(value: &Value) -> Vec<Value> {
    value
        .as_object()
        .and_then(|object| table(object).map(|table| table.keys()))
        .unwrap_or_default()
}

fn set_binary(ctx: &mut dyn CallContext, op: BinaryOperator, a: &Value, b: &Value) -> RtResult<Option<Value>> {
    let left = table_keys(a);
    let right = table_keys(b);
    let right_set = b.as_object().expect("set operand").clone();
    let left_set = a.as_object().expect("set operand").clone();
    let mut items = Vec::new();
    match op {
        BinaryOperator::BitOr => {
            items.extend(left);
            items.extend(right);
        }
        BinaryOperator::BitAnd => {
            for item in left {
                if dict::dict_contains(ctx, &right_set, &item)? {
                    items.push(item);
                }
            }
        }
        BinaryOperator::Sub => {
            for item in left {
                if !dict::dict_contains(ctx, &right_set, &item)? {
                    items.push(item);
                }
            }
        }
        BinaryOperator::BitXor => {
            for item in left {
                if !dict::dict_contains(ctx, &right_set, &item)? {
                    items.push(item);
                }
            }
            for item in right {
                if !dict::dict_contains(ctx, &left_set, &item)? {
                    items.push(item);
                }
            }
        }
        _ => return Ok(None),
    }
    dict::set_from_items(ctx, items).map(Some)
}

fn dict_union(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<Value> {
    let mut pairs = Vec::new();
    for source in [a, b] {
        if let Some(object) = source.as_object()
            && let Some(table) = table(object)
        {
            pairs.extend(table.items());
        }
    }
    dict::dict_from_pairs(ctx, pairs)
}

/// Operators whose operands are both native values.
fn native_binary(ctx: &mut dyn CallContext, op: BinaryOperator, a: &Value, b: &Value) -> RtResult<Option<Value>> {
    use BinaryOperator::*;
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if let (Value::Bool(x), Value::Bool(y)) = (a, b) {
            match op {
                BitAnd => return Ok(Some(Value::Bool(x & y))),
                BitOr => return Ok(Some(Value::Bool(x | y))),
                BitXor => return Ok(Some(Value::Bool(x ^ y))),
                _ => {}
            }
        }
        return int_binary(op, x, y);
    }
    if is_number(a) && is_number(b) {
        let (x, y) = (a.as_float().unwrap_or_default(), b.as_float().unwrap_or_default());
        return float_binary(op, x, y);
    }
    match (op, a, b) {
        (Add, Value::Str(x), Value::Str(y)) => {
            let mut joined = String::with_capacity(x.len() + y.len());
            joined.push_str(x);
            joined.push_str(y);
            return Ok(Some(Value::str(joined)));
        }
        (Mul, Value::Str(text), count) | (Mul, count, Value::Str(text)) if count.as_int().is_some() => {
            let count = count.as_int().unwrap_or_default();
            let chars: Vec<char> = text.chars().collect();
            return Ok(Some(Value::str(repeat(&chars, count)?.into_iter().collect::<String>())));
        }
        (Mod, Value::Str(template), args) => {
            return format::percent_format(ctx, template, args).map(|text| Some(Value::str(text)));
        }
        _ => {}
    }
    match (op, sequence_of(a), sequence_of(b)) {
        (Add, Some(Sequence::List(mut x)), Some(Sequence::List(y))) => {
            x.extend(y);
            return Ok(Some(Value::list(x)));
        }
        (Add, Some(Sequence::Tuple(mut x)), Some(Sequence::Tuple(y))) => {
            x.extend(y);
            return Ok(Some(Value::tuple(x)));
        }
        (Mul, Some(sequence), None) | (Mul, None, Some(sequence)) => {
            let count = if a.as_int().is_some() { a } else { b };
            if let Some(count) = count.as_int() {
                return Ok(Some(match sequence {
                    Sequence::List(items) => Value::list(repeat(&items, count)?),
                    Sequence::Tuple(items) => Value::tuple(repeat(&items, count)?),
                }));
            }
        }
        _ => {}
    }
    if is_set(a) && is_set(b) {
        return set_binary(ctx, op, a, b);
    }
    if op == BitOr && is_dict(a) && is_dict(b) {
        return dict_union(ctx, a, b).map(Some);
    }
    Ok(None)
}

fn unsupported(ctx: &dyn CallContext, op: BinaryOperator, a: &Value, b: &Value) -> RuntimeError {
    let (left, right) = (type_name(ctx, a), type_name(ctx, b));
    if op == BinaryOperator::Add && matches!(left.as_str(), "str" | "list" | "tuple") {
        return RuntimeError::type_error(format!(
            "can only concatenate {left} (not \"{right}\") to {left}"
        ));
    }
    if op == BinaryOperator::Mul && matches!(left.as_str(), "str" | "list" | "tuple") {
        return RuntimeError::type_error(format!(
            "can't multiply sequence by non-int of type '{right}'"
        ));
    }
    let symbol = if op == BinaryOperator::Pow { "** or pow()" } else { op.symbol() };
    RuntimeError::type_error(format!(
        "unsupported operand type(s) for {symbol}: '{left}' and '{right}'"
    ))
}

/// Whether the right operand's class should be asked first: it must be a
/// proper subclass of the left operand's class.
fn right_first(left: &ClassRef, right: &ClassRef) -> bool {
    !Rc::ptr_eq(left, right) && is_subclass(right, left) && right.kind != ClassKind::Builtin
}

fn try_dunder(ctx: &mut dyn CallContext, receiver: &Value, name: &str, other: &Value) -> RtResult<Option<Value>> {
    match call_special(ctx, receiver, name, vec![other.clone()])? {
        Some(Value::NotImplemented) | None => Ok(None),
        Some(result) => Ok(Some(result)),
    }
}

/// Forward then reflected dunder dispatch shared by arithmetic and rich
/// comparison.
fn dispatch_dunders(
    ctx: &mut dyn CallContext,
    a: &Value,
    b: &Value,
    forward: &str,
    reflected: &str,
) -> RtResult<Option<Value>> {
    let types = ctx.types();
    let (left, right) = (a.class(&types), b.class(&types));
    let same = Rc::ptr_eq(&left, &right);
    if right_first(&left, &right)
        && let Some(result) = try_dunder(ctx, b, reflected, a)?
    {
        return Ok(Some(result));
    }
    if let Some(result) = try_dunder(ctx, a, forward, b)? {
        return Ok(Some(result));
    }
    if !same
        && !right_first(&left, &right)
        && let Some(result) = try_dunder(ctx, b, reflected, a)?
    {
        return Ok(Some(result));
    }
    Ok(None)
}

pub fn binary_op(ctx: &mut dyn CallContext, op: BinaryOperator, a: &Value, b: &Value) -> RtResult<Value> {
    if let Some(result) = native_binary(ctx, op, a, b)? {
        return Ok(result);
    }
    let (forward, reflected) = op.dunders();
    if let Some(result) = dispatch_dunders(ctx, a, b, forward, reflected)? {
        return Ok(result);
    }
    Err(unsupported(ctx, op, a, b))
}

/// `a op= b`: mutates lists, sets and dicts in place, tries `__iop__` on
/// instances and otherwise falls back to the binary operator.
pub fn inplace_op(ctx: &mut dyn CallContext, op: BinaryOperator, a: &Value, b: &Value) -> RtResult<Value> {
    if let Value::Object(object) = a {
        if is_a::<ListObject>(object) {
            match op {
                BinaryOperator::Add => {
                    let items = collect(ctx, b)?;
                    if let Some(mut list) = downcast_mut::<ListObject>(object) {
                        list.items.extend(items);
                    }
                    return Ok(a.clone());
                }
                BinaryOperator::Mul if b.as_int().is_some() => {
                    let count = b.as_int().unwrap_or_default();
                    let items = downcast::<ListObject>(object).map(|list| list.items.clone()).unwrap_or_default();
                    let repeated = repeat(&items, count)?;
                    if let Some(mut list) = downcast_mut::<ListObject>(object) {
                        list.items = repeated;
                    }
                    return Ok(a.clone());
                }
                _ => {}
            }
        }
        if (is_set(a) && is_set(b)) || (is_dict(a) && is_dict(b) && op == BinaryOperator::BitOr) {
            if let Some(Value::Object(result)) = native_binary(ctx, op, a, b)? {
                let replacement = table(&result).map(|table| table.items()).unwrap_or_default();
                if let Some(mut target) = dict::table_mut(object) {
                    target.clear();
                }
                for (key, value) in replacement {
                    dict::dict_set(ctx, object, key, value)?;
                }
                return Ok(a.clone());
            }
        }
        if let Some(result) = call_special(ctx, a, op.inplace_dunder(), vec![b.clone()])?
            && !matches!(result, Value::NotImplemented)
        {
            return Ok(result);
        }
    }
    binary_op(ctx, op, a, b)
}

pub fn unary_op(ctx: &mut dyn CallContext, op: UnaryOperator, operand: &Value) -> RtResult<Value> {
    let result = match (op, operand) {
        (UnaryOperator::Not, value) => return Ok(Value::Bool(!truthy(ctx, value)?)),
        (UnaryOperator::USub, Value::Float(value)) => Some(Value::Float(-value)),
        (UnaryOperator::UAdd, Value::Float(value)) => Some(Value::Float(*value)),
        (UnaryOperator::USub, value) if value.as_int().is_some() => {
            let value = value.as_int().unwrap_or_default();
            Some(Value::Int(value.checked_neg().ok_or_else(RuntimeError::overflow)?))
        }
        (UnaryOperator::UAdd, value) if value.as_int().is_some() => value.as_int().map(Value::Int),
        (UnaryOperator::Invert, value) if value.as_int().is_some() => value.as_int().map(|value| Value::Int(!value)),
        _ => None,
    };
    if let Some(result) = result {
        return Ok(result);
    }
    let name = match op {
        UnaryOperator::USub => "__neg__",
        UnaryOperator::UAdd => "__pos__",
        UnaryOperator::Invert => "__invert__",
        UnaryOperator::Not => unreachable!("handled above"),
    };
    if let Some(result) = call_special(ctx, operand, name, Vec::new())? {
        return Ok(result);
    }
    let symbol = match op {
        UnaryOperator::USub => "-",
        UnaryOperator::UAdd => "+",
        _ => "~",
    };
    Err(RuntimeError::type_error(format!(
        "bad operand type for unary {symbol}: '{}'",
        type_name(ctx, operand)
    )))
}

// ---- comparison ------------------------------------------------------------

fn compare_int_float(int: i64, float: f64) -> Option<Ordering> {
    if float.is_nan() {
        return None;
    }
    if float_equals_int(float, int) {
        return Some(Ordering::Equal);
    }
    (int as f64).partial_cmp(&float).map(|ordering| match ordering {
        Ordering::Equal => {
            if (float as i64) < int { Ordering::Greater } else { Ordering::Less }
        }
        other => other,
    })
}

/// Ordering of two native numbers; `Err(())` when either is not a number.
fn number_ordering(a: &Value, b: &Value) -> Result<Option<Ordering>, ()> {
    match (a, b) {
        (x, y) if x.as_int().is_some() && y.as_int().is_some() => {
            Ok(x.as_int().partial_cmp(&y.as_int()))
        }
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y)),
        (Value::Float(x), y) if y.as_int().is_some() => {
            Ok(compare_int_float(y.as_int().unwrap_or_default(), *x).map(Ordering::reverse))
        }
        (x, Value::Float(y)) if x.as_int().is_some() => {
            Ok(compare_int_float(x.as_int().unwrap_or_default(), *y))
        }
        _ => Err(()),
    }
}

fn ordering_satisfies(op: ComparisonOperator, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return op == ComparisonOperator::NotEq;
    };
    match op {
        ComparisonOperator::Eq => ordering == Ordering::Equal,
        ComparisonOperator::NotEq => ordering != Ordering::Equal,
        ComparisonOperator::Lt => ordering == Ordering::Less,
        ComparisonOperator::LtE => ordering != Ordering::Greater,
        ComparisonOperator::Gt => ordering == Ordering::Greater,
        ComparisonOperator::GtE => ordering != Ordering::Less,
        _ => false,
    }
}

fn reflected_op(op: ComparisonOperator) -> ComparisonOperator {
    match op {
        ComparisonOperator::Lt => ComparisonOperator::Gt,
        ComparisonOperator::LtE => ComparisonOperator::GtE,
        ComparisonOperator::Gt => ComparisonOperator::Lt,
        ComparisonOperator::GtE => ComparisonOperator::LtE,
        other => other,
    }
}

fn comparison_dunder(op: ComparisonOperator) -> &'static str {
    match op {
        ComparisonOperator::Eq => "__eq__",
        ComparisonOperator::NotEq => "__ne__",
        ComparisonOperator::Lt => "__lt__",
        ComparisonOperator::LtE => "__le__",
        ComparisonOperator::Gt => "__gt__",
        ComparisonOperator::GtE => "__ge__",
        _ => "",
    }
}

/// Lexicographic comparison of two sequences of the same kind.
fn compare_sequences(
    ctx: &mut dyn CallContext,
    op: ComparisonOperator,
    a: &[Value],
    b: &[Value],
) -> RtResult<bool> {
    if matches!(op, ComparisonOperator::Eq | ComparisonOperator::NotEq) && a.len() != b.len() {
        return Ok(op == ComparisonOperator::NotEq);
    }
    for (x, y) in a.iter().zip(b) {
        if !values_equal(ctx, x, y)? {
            return match op {
                ComparisonOperator::Eq => Ok(false),
                ComparisonOperator::NotEq => Ok(true),
                _ => {
                    let result = compare(ctx, op, x, y)?;
                    truthy(ctx, &result)
                }
            };
        }
    }
    Ok(ordering_satisfies(op, Some(a.len().cmp(&b.len()))))
}

fn sets_equal(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<bool> {
    Ok(a_subset_of_b(ctx, a, b)? && table_keys(a).len() == table_keys(b).len())
}

fn a_subset_of_b(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<bool> {
    let target = b.as_object().expect("set operand").clone();
    for item in table_keys(a) {
        if !dict::dict_contains(ctx, &target, &item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn dicts_equal(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<bool> {
    let (Some(left), Some(right)) = (a.as_object(), b.as_object()) else {
        return Ok(false);
    };
    let pairs = table(left).map(|table| table.items()).unwrap_or_default();
    if pairs.len() != table(right).map_or(0, |table| table.len()) {
        return Ok(false);
    }
    for (key, value) in pairs {
        match dict::dict_get(ctx, right, &key)? {
            Some(other) if values_equal(ctx, &value, &other)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn native_compare(ctx: &mut dyn CallContext, op: ComparisonOperator, a: &Value, b: &Value) -> RtResult<Option<bool>> {
    if let Ok(ordering) = number_ordering(a, b) {
        return Ok(Some(ordering_satisfies(op, ordering)));
    }
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Ok(Some(ordering_satisfies(op, Some(x.cmp(y)))));
    }
    let equality = matches!(op, ComparisonOperator::Eq | ComparisonOperator::NotEq);
    match (sequence_of(a), sequence_of(b)) {
        (Some(Sequence::List(x)), Some(Sequence::List(y)))
        | (Some(Sequence::Tuple(x)), Some(Sequence::Tuple(y))) => {
            return compare_sequences(ctx, op, &x, &y).map(Some);
        }
        _ => {}
    }
    if is_set(a) && is_set(b) {
        let result = match op {
            ComparisonOperator::Eq => sets_equal(ctx, a, b)?,
            ComparisonOperator::NotEq => !sets_equal(ctx, a, b)?,
            ComparisonOperator::LtE => a_subset_of_b(ctx, a, b)?,
            ComparisonOperator::GtE => a_subset_of_b(ctx, b, a)?,
            ComparisonOperator::Lt => a_subset_of_b(ctx, a, b)? && !sets_equal(ctx, a, b)?,
            ComparisonOperator::Gt => a_subset_of_b(ctx, b, a)? && !sets_equal(ctx, a, b)?,
            _ => return Ok(None),
        };
        return Ok(Some(result));
    }
    if equality && is_dict(a) && is_dict(b) {
        let equal = dicts_equal(ctx, a, b)?;
        return Ok(Some(equal == (op == ComparisonOperator::Eq)));
    }
    if equality && let Some(equal) = native_eq(a, b) {
        return Ok(Some(equal == (op == ComparisonOperator::Eq)));
    }
    Ok(None)
}

/// Rich comparison. Returns whatever the dunder returned, which need not be
/// a bool.
pub fn compare(ctx: &mut dyn CallContext, op: ComparisonOperator, a: &Value, b: &Value) -> RtResult<Value> {
    match op {
        ComparisonOperator::Is => return Ok(Value::Bool(a.is(b))),
        ComparisonOperator::IsNot => return Ok(Value::Bool(!a.is(b))),
        ComparisonOperator::In => return contains(ctx, b, a).map(Value::Bool),
        ComparisonOperator::NotIn => return contains(ctx, b, a).map(|found| Value::Bool(!found)),
        _ => {}
    }
    if let Some(result) = native_compare(ctx, op, a, b)? {
        return Ok(Value::Bool(result));
    }
    let forward = comparison_dunder(op);
    let reflected = comparison_dunder(reflected_op(op));
    if let Some(result) = dispatch_dunders(ctx, a, b, forward, reflected)? {
        return Ok(result);
    }
    match op {
        ComparisonOperator::Eq => Ok(Value::Bool(a.is(b))),
        ComparisonOperator::NotEq => Ok(Value::Bool(!a.is(b))),
        _ => Err(RuntimeError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            type_name(ctx, a),
            type_name(ctx, b)
        ))),
    }
}

/// `a < b` as a bool, for sorting and `min`/`max`.
pub fn less_than(ctx: &mut dyn CallContext, a: &Value, b: &Value) -> RtResult<bool> {
    if let Ok(ordering) = number_ordering(a, b) {
        return Ok(ordering == Some(Ordering::Less));
    }
    let result = compare(ctx, ComparisonOperator::Lt, a, b)?;
    truthy(ctx, &result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_floors_toward_negative_infinity() {
        assert_eq!(int_floor_div(7, 2).ok(), Some(3));
        assert_eq!(int_floor_div(-7, 2).ok(), Some(-4));
        assert_eq!(int_mod(-7, 2).ok(), Some(1));
        assert_eq!(int_mod(7, -2).ok(), Some(-1));
        assert!(int_floor_div(1, 0).is_err());
    }

    #[test]
    fn integer_overflow_is_reported() {
        assert!(int_binary(BinaryOperator::Add, i64::MAX, 1).is_err());
        assert!(int_binary(BinaryOperator::Mul, i64::MIN, -1).is_err());
        assert!(int_floor_div(i64::MIN, -1).is_err());
        assert!(int_shift(1, 64, true).is_err());
        assert_eq!(int_shift(-8, 70, false).ok(), Some(-1));
    }

    #[test]
    fn powers() {
        assert!(matches!(int_pow(2, 10), Ok(Value::Int(1024))));
        assert!(matches!(int_pow(-1, 1 << 40), Ok(Value::Int(1))));
        assert!(matches!(int_pow(2, -1), Ok(Value::Float(value)) if value == 0.5));
        assert!(int_pow(10, 30).is_err());
    }

    #[test]
    fn float_modulo_takes_the_sign_of_the_divisor() {
        assert_eq!(float_divmod(7.5, -2.0), (-4.0, -0.5));
        assert_eq!(float_divmod(-7.5, 2.0), (-4.0, 0.5));
    }

    #[test]
    fn mixed_number_ordering_is_exact() {
        assert_eq!(compare_int_float(1, 1.5), Some(Ordering::Less));
        assert_eq!(compare_int_float(2, 2.0), Some(Ordering::Equal));
        assert_eq!(compare_int_float(i64::MAX, 9.223372036854775807e18), Some(Ordering::Less));
        assert_eq!(compare_int_float(0, f64::NAN), None);
    }
}
