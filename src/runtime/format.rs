//! Text conversions: `repr`, `str`, the format-spec mini-language used by
//! f-strings and `format()`, `str.format` and printf-style `%`.

use std::cell::RefCell;

use crate::runtime::class::{ClassRef, InstanceObject};
use crate::runtime::dict::{self, DictObject, SetObject};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError, check_built_len};
use crate::runtime::function::{
    BoundMethod, ClassMethodObject, CodeValue, FunctionObject, NativeFunction, PropertyObject,
    StaticMethodObject, SuperObject,
};
use crate::runtime::generator::GeneratorObject;
use crate::runtime::iter::{RangeObject, SliceObject};
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{CallContext, ObjectRef, is_a};
use crate::runtime::protocol::{self, call_special, type_name};
use crate::runtime::value::Value;

// ---- numbers ---------------------------------------------------------------

/// Splits Rust's `{:e}` output into mantissa and decimal exponent.
fn split_exponent(text: &str) -> (&str, i32) {
    match text.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse().unwrap_or(0)),
        None => (text, 0),
    }
}

fn exponent_suffix(exponent: i32) -> String {
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("e{sign}{:02}", exponent.unsigned_abs())
}

/// `repr(float)`: shortest round-tripping digits, scientific notation
/// outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = split_exponent(&scientific);
    if value == 0.0 || (-4..16).contains(&exponent) {
        let mut fixed = format!("{value}");
        if !fixed.contains('.') {
            fixed.push_str(".0");
        }
        return fixed;
    }
    format!("{mantissa}{}", exponent_suffix(exponent))
}

fn scientific(value: f64, precision: usize) -> String {
    let text = format!("{value:.precision$e}");
    let (mantissa, exponent) = split_exponent(&text);
    format!("{mantissa}{}", exponent_suffix(exponent))
}

fn strip_fraction_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// The `g` presentation type.
fn general(value: f64, precision: usize, alternate: bool, keep_point: bool) -> String {
    let precision = precision.max(1);
    let exponent = if value == 0.0 {
        0
    } else {
        split_exponent(&format!("{value:.prec$e}", prec = precision - 1)).1
    };
    if -4 <= exponent && exponent < precision as i32 {
        let digits = (precision as i32 - 1 - exponent).max(0) as usize;
        let mut fixed = format!("{value:.digits$}");
        if !alternate {
            fixed = strip_fraction_zeros(&fixed);
        }
        if keep_point && !fixed.contains('.') {
            fixed.push_str(".0");
        }
        fixed
    } else {
        let text = scientific(value, precision - 1);
        if alternate {
            return text;
        }
        let (mantissa, rest) = text.split_at(text.find('e').unwrap_or(text.len()));
        format!("{}{rest}", strip_fraction_zeros(mantissa))
    }
}

// ---- format specs ----------------------------------------------------------

/// A parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

fn invalid_spec() -> RuntimeError {
    RuntimeError::value_error("Invalid format specifier")
}

impl FormatSpec {
    pub fn parse(spec: &str) -> RtResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut i = 0;
        let is_align = |ch: char| matches!(ch, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = chars[0];
            parsed.align = Some(chars[1]);
            i = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&sign) = chars.get(i)
            && matches!(sign, '+' | '-' | ' ')
        {
            parsed.sign = sign;
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            if parsed.align.is_none() {
                parsed.fill = '0';
                parsed.align = Some('=');
            }
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i > start {
            let digits: String = chars[start..i].iter().collect();
            parsed.width = digits.parse().map_err(|_| invalid_spec())?;
        }
        if let Some(&separator) = chars.get(i)
            && matches!(separator, ',' | '_')
        {
            parsed.grouping = Some(separator);
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i == start {
                return Err(RuntimeError::value_error("Format specifier missing precision"));
            }
            let digits: String = chars[start..i].iter().collect();
            parsed.precision = Some(digits.parse().map_err(|_| invalid_spec())?);
        }
        if let Some(&kind) = chars.get(i) {
            parsed.kind = Some(kind);
            i += 1;
        }
        if i != chars.len() {
            return Err(invalid_spec());
        }
        parsed.check_bounds()?;
        Ok(parsed)
    }

    /// Width and precision both size the rendered text.
    fn check_bounds(&self) -> RtResult<()> {
        check_built_len(self.width, "formatted string")?;
        check_built_len(self.precision.unwrap_or(0), "formatted string")?;
        Ok(())
    }

    fn sign_of(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }
}

fn unknown_code(kind: char, type_name: &str) -> RuntimeError {
    RuntimeError::value_error(format!(
        "Unknown format code '{kind}' for object of type '{type_name}'"
    ))
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut grouped = String::with_capacity(chars.len() + chars.len() / every);
    for (index, ch) in chars.iter().enumerate() {
        if index > 0 && (chars.len() - index) % every == 0 {
            grouped.push(separator);
        }
        grouped.push(*ch);
    }
    grouped
}

/// Pads `prefix + body` to the spec's width. `prefix` holds the sign and
/// any radix prefix, which `=` alignment keeps in front of the fill.
fn pad(prefix: &str, body: &str, spec: &FormatSpec, numeric: bool) -> String {
    let len = prefix.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{prefix}{body}");
    }
    let fill_count = spec.width - len;
    let fill = |count: usize| spec.fill.to_string().repeat(count);
    match spec.align.unwrap_or(if numeric { '>' } else { '<' }) {
        '<' => format!("{prefix}{body}{}", fill(fill_count)),
        '^' => {
            let left = fill_count / 2;
            format!("{}{prefix}{body}{}", fill(left), fill(fill_count - left))
        }
        '=' => format!("{prefix}{}{body}", fill(fill_count)),
        _ => format!("{}{prefix}{body}", fill(fill_count)),
    }
}

pub fn format_int(value: i64, spec: &FormatSpec) -> RtResult<String> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(value as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(RuntimeError::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = value.unsigned_abs();
    let (radix_prefix, digits, every) = match kind {
        'd' | 'n' => ("", magnitude.to_string(), 3),
        'b' => ("0b", format!("{magnitude:b}"), 4),
        'o' => ("0o", format!("{magnitude:o}"), 4),
        'x' => ("0x", format!("{magnitude:x}"), 4),
        'X' => ("0X", format!("{magnitude:X}"), 4),
        'c' => {
            let ch = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| RuntimeError::new(ExceptionKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad("", &ch.to_string(), spec, false));
        }
        other => return Err(unknown_code(other, "int")),
    };
    let digits = match spec.grouping {
        Some(separator) => group_digits(&digits, separator, every),
        None => digits,
    };
    let mut prefix = spec.sign_of(value < 0).to_string();
    if spec.alternate {
        prefix.push_str(radix_prefix);
    }
    Ok(pad(&prefix, &digits, spec, true))
}

pub fn format_float(value: f64, spec: &FormatSpec) -> RtResult<String> {
    let kind = spec.kind;
    let magnitude = value.abs();
    let upper = matches!(kind, Some('E' | 'F' | 'G'));
    let body = if !value.is_finite() {
        let text = if value.is_nan() { "nan" } else { "inf" };
        let text = if kind == Some('%') { format!("{text}%") } else { text.to_string() };
        if upper { text.to_uppercase() } else { text }
    } else {
        let body = match kind {
            Some('f' | 'F') => format!("{magnitude:.prec$}", prec = spec.precision.unwrap_or(6)),
            Some('e' | 'E') => scientific(magnitude, spec.precision.unwrap_or(6)),
            Some('g' | 'G' | 'n') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, false),
            Some('%') => format!("{:.prec$}%", magnitude * 100.0, prec = spec.precision.unwrap_or(6)),
            None => match spec.precision {
                Some(precision) => general(magnitude, precision, spec.alternate, true),
                None => float_repr(magnitude),
            },
            Some(other) => return Err(unknown_code(other, "float")),
        };
        let body = if upper { body.to_uppercase() } else { body };
        match spec.grouping {
            Some(separator) => {
                let split = body.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(body.len());
                let (whole, rest) = body.split_at(split);
                format!("{}{rest}", group_digits(whole, separator, 3))
            }
            None => body,
        }
    };
    let negative = value.is_sign_negative() && !value.is_nan();
    Ok(pad(spec.sign_of(negative), &body, spec, true))
}

pub fn format_str(text: &str, spec: &FormatSpec) -> RtResult<String> {
    if let Some(kind) = spec.kind
        && kind != 's'
    {
        return Err(unknown_code(kind, "str"));
    }
    if spec.sign != '-' {
        return Err(RuntimeError::value_error("Sign not allowed in string format specifier"));
    }
    if spec.align == Some('=') {
        return Err(RuntimeError::value_error(
            "'=' alignment not allowed in string format specifier",
        ));
    }
    let body: String = match spec.precision {
        Some(precision) => text.chars().take(precision).collect(),
        None => text.to_string(),
    };
    Ok(pad("", &body, spec, false))
}

/// `format(value, spec)`.
pub fn format_value(ctx: &mut dyn CallContext, value: &Value, spec: &str) -> RtResult<String> {
    match value {
        Value::Str(text) => return format_str(text, &FormatSpec::parse(spec)?),
        Value::Float(number) => return format_float(*number, &FormatSpec::parse(spec)?),
        Value::Int(number) => return format_int(*number, &FormatSpec::parse(spec)?),
        Value::Bool(flag) if !spec.is_empty() => {
            return format_int(i64::from(*flag), &FormatSpec::parse(spec)?);
        }
        _ => {}
    }
    if let Some(result) = call_special(ctx, value, "__format__", vec![Value::str(spec)])? {
        return match result {
            Value::Str(text) => Ok(text.to_string()),
            other => Err(RuntimeError::type_error(format!(
                "__format__ must return a str, not {}",
                type_name(ctx, &other)
            ))),
        };
    }
    if spec.is_empty() {
        return str_of(ctx, value);
    }
    Err(RuntimeError::type_error(format!(
        "unsupported format string passed to {}.__format__",
        type_name(ctx, value)
    )))
}

// ---- repr and str ----------------------------------------------------------

pub fn str_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if (ch as u32) < 0x20 || ch as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", ch as u32));
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
    out
}

/// `ascii()`: `repr` with every non-ASCII character escaped.
pub fn ascii_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let code = ch as u32;
        match code {
            0..=0x7f => out.push(ch),
            0x80..=0xff => out.push_str(&format!("\\x{code:02x}")),
            0x100..=0xffff => out.push_str(&format!("\\u{code:04x}")),
            _ => out.push_str(&format!("\\U{code:08x}")),
        }
    }
    out
}

thread_local! {
    static REPR_IN_PROGRESS: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container as being printed, so a self-containing one prints `...`.
struct ReprGuard(i64);

impl ReprGuard {
    fn enter(id: i64) -> Option<Self> {
        REPR_IN_PROGRESS.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&id) {
                return None;
            }
            active.push(id);
            Some(ReprGuard(id))
        })
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        REPR_IN_PROGRESS.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|id| *id == self.0) {
                active.remove(position);
            }
        });
    }
}

fn join_reprs(ctx: &mut dyn CallContext, items: &[Value]) -> RtResult<String> {
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(repr(ctx, item)?);
    }
    Ok(parts.join(", "))
}

/// `module.qualname` as shown in class and instance reprs.
pub fn class_path(class: &ClassRef) -> String {
    let module = class.dict.borrow().get("__module__").and_then(|module| module.as_str().map(str::to_string));
    match module {
        Some(module) if module != "builtins" => format!("{module}.{}", class.qualname),
        _ => class.qualname.clone(),
    }
}

fn address(value: &Value) -> String {
    format!("{:#x}", value.id())
}

/// `object.__repr__`.
pub fn default_repr(ctx: &dyn CallContext, value: &Value) -> String {
    let class = value.class(&ctx.types());
    format!("<{} object at {}>", class_path(&class), address(value))
}

enum Shape {
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Text(String),
    Delegate(Value),
    Instance,
}

fn shape_of(value: &Value, object: &ObjectRef) -> Shape {
    let inner = object.borrow();
    let any = inner.as_any();
    if let Some(list) = any.downcast_ref::<ListObject>() {
        return Shape::List(list.items.clone());
    }
    if let Some(tuple) = any.downcast_ref::<TupleObject>() {
        return Shape::Tuple(tuple.items.clone());
    }
    if let Some(dict) = any.downcast_ref::<DictObject>() {
        return Shape::Dict(dict.items());
    }
    if let Some(set) = any.downcast_ref::<SetObject>() {
        return Shape::Set(set.table.keys());
    }
    if let Some(range) = any.downcast_ref::<RangeObject>() {
        return Shape::Text(if range.step == 1 {
            format!("range({}, {})", range.start, range.stop)
        } else {
            format!("range({}, {}, {})", range.start, range.stop, range.step)
        });
    }
    if let Some(slice) = any.downcast_ref::<SliceObject>() {
        return Shape::Tuple(vec![slice.start.clone(), slice.stop.clone(), slice.step.clone()]);
    }
    if let Some(function) = any.downcast_ref::<FunctionObject>() {
        return Shape::Text(format!("<function {} at {}>", function.qualname, address(value)));
    }
    if let Some(native) = any.downcast_ref::<NativeFunction>() {
        return Shape::Text(format!("<built-in function {}>", native.name));
    }
    if let Some(method) = any.downcast_ref::<BoundMethod>() {
        return Shape::Delegate(Value::tuple(vec![method.function.clone(), method.receiver.clone()]));
    }
    if let Some(generator) = any.downcast_ref::<GeneratorObject>() {
        return Shape::Text(format!(
            "<{} object {} at {}>",
            generator.kind_name(),
            generator.qualname,
            address(value)
        ));
    }
    if let Some(code) = any.downcast_ref::<CodeValue>() {
        return Shape::Text(format!("<code object {} at {}>", code.0.name, address(value)));
    }
    if any.is::<InstanceObject>() {
        return Shape::Instance;
    }
    let kind = if any.is::<PropertyObject>() {
        "property"
    } else if any.is::<StaticMethodObject>() {
        "staticmethod"
    } else if any.is::<ClassMethodObject>() {
        "classmethod"
    } else if any.is::<SuperObject>() {
        "super"
    } else {
        "iterator"
    };
    Shape::Text(format!("<{kind} object at {}>", address(value)))
}

fn method_repr(ctx: &mut dyn CallContext, pair: &Value) -> RtResult<String> {
    let items = pair.tuple_items().unwrap_or_default();
    let (function, receiver) = (&items[0], &items[1]);
    let name = match protocol::get_attr_opt(ctx, function, "__qualname__")? {
        Some(Value::Str(name)) => name.to_string(),
        _ => "?".to_string(),
    };
    let is_native = function.as_object().is_some_and(is_a::<NativeFunction>);
    if is_native {
        return Ok(format!(
            "<built-in method {name} of {} object at {}>",
            type_name(ctx, receiver),
            address(receiver)
        ));
    }
    Ok(format!("<bound method {name} of {}>", repr(ctx, receiver)?))
}

pub fn repr(ctx: &mut dyn CallContext, value: &Value) -> RtResult<String> {
    let object = match value {
        Value::None => return Ok("None".to_string()),
        Value::NotImplemented => return Ok("NotImplemented".to_string()),
        Value::Ellipsis => return Ok("Ellipsis".to_string()),
        Value::Bool(flag) => return Ok(if *flag { "True" } else { "False" }.to_string()),
        Value::Int(number) => return Ok(number.to_string()),
        Value::Float(number) => return Ok(float_repr(*number)),
        Value::Str(text) => return Ok(str_repr(text)),
        Value::Class(class) => return Ok(format!("<class '{}'>", class_path(class))),
        Value::Cell(_) | Value::Unbound => return Ok(format!("<cell at {}>", address(value))),
        Value::Object(object) => object,
    };
    let is_slice = is_a::<SliceObject>(object);
    match shape_of(value, object) {
        Shape::Text(text) => Ok(text),
        Shape::Delegate(pair) => method_repr(ctx, &pair),
        Shape::Tuple(items) if is_slice => Ok(format!("slice({})", join_reprs(ctx, &items)?)),
        Shape::Instance => instance_repr(ctx, value),
        shape => {
            let Some(_guard) = ReprGuard::enter(value.id()) else {
                return Ok(match shape {
                    Shape::List(_) => "[...]",
                    Shape::Tuple(_) => "(...)",
                    _ => "{...}",
                }
                .to_string());
            };
            match shape {
                Shape::List(items) => Ok(format!("[{}]", join_reprs(ctx, &items)?)),
                Shape::Tuple(items) if items.len() == 1 => Ok(format!("({},)", repr(ctx, &items[0])?)),
                Shape::Tuple(items) => Ok(format!("({})", join_reprs(ctx, &items)?)),
                Shape::Set(items) if items.is_empty() => Ok("set()".to_string()),
                Shape::Set(items) => Ok(format!("{{{}}}", join_reprs(ctx, &items)?)),
                Shape::Dict(pairs) => {
                    let mut parts = Vec::with_capacity(pairs.len());
                    for (key, item) in &pairs {
                        parts.push(format!("{}: {}", repr(ctx, key)?, repr(ctx, item)?));
                    }
                    Ok(format!("{{{}}}", parts.join(", ")))
                }
                _ => Ok(default_repr(ctx, value)),
            }
        }
    }
}

fn instance_repr(ctx: &mut dyn CallContext, value: &Value) -> RtResult<String> {
    let Some(_guard) = ReprGuard::enter(value.id()) else {
        return Ok("...".to_string());
    };
    match call_special(ctx, value, "__repr__", Vec::new())? {
        Some(Value::Str(text)) => Ok(text.to_string()),
        Some(other) => Err(RuntimeError::type_error(format!(
            "__repr__ returned non-string (type {})",
            type_name(ctx, &other)
        ))),
        None => Ok(default_repr(ctx, value)),
    }
}

/// `str(value)`.
pub fn str_of(ctx: &mut dyn CallContext, value: &Value) -> RtResult<String> {
    match value {
        Value::Str(text) => Ok(text.to_string()),
        Value::Object(object) if is_a::<InstanceObject>(object) => {
            match call_special(ctx, value, "__str__", Vec::new())? {
                Some(Value::Str(text)) => Ok(text.to_string()),
                Some(other) => Err(RuntimeError::type_error(format!(
                    "__str__ returned non-string (type {})",
                    type_name(ctx, &other)
                ))),
                None => repr(ctx, value),
            }
        }
        other => repr(ctx, other),
    }
}

// ---- str.format ------------------------------------------------------------

/// State of one `str.format` call: field numbering must be all automatic or
/// all manual.
struct FieldFormatter<'a> {
    positional: &'a [Value],
    keywords: &'a [(String, Value)],
    next_auto: usize,
    numbering: Option<bool>,
}

impl FieldFormatter<'_> {
    fn positional_index(&mut self, explicit: Option<usize>) -> RtResult<usize> {
        let automatic = explicit.is_none();
        match self.numbering {
            Some(mode) if mode != automatic => {
                return Err(RuntimeError::value_error(if automatic {
                    "cannot switch from manual field specification to automatic field numbering"
                } else {
                    "cannot switch from automatic field numbering to manual field specification"
                }));
            }
            _ => self.numbering = Some(automatic),
        }
        Ok(match explicit {
            Some(index) => index,
            None => {
                self.next_auto += 1;
                self.next_auto - 1
            }
        })
    }

    fn lookup(&mut self, ctx: &mut dyn CallContext, field: &str) -> RtResult<Value> {
        let head_end = field.find(['.', '[']).unwrap_or(field.len());
        let (head, mut rest) = field.split_at(head_end);
        let mut value = if head.is_empty() || head.chars().all(|ch| ch.is_ascii_digit()) {
            let explicit = if head.is_empty() { None } else { head.parse().ok() };
            let index = self.positional_index(explicit)?;
            self.positional.get(index).cloned().ok_or_else(|| {
                RuntimeError::index_error(format!(
                    "Replacement index {index} out of range for positional args tuple"
                ))
            })?
        } else {
            match self.keywords.iter().find(|(name, _)| name == head) {
                Some((_, value)) => value.clone(),
                None => return Err(dict::key_error(ctx, Value::str(head))),
            }
        };
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                value = protocol::get_attr(ctx, &value, &after[..end])?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after
                    .find(']')
                    .ok_or_else(|| RuntimeError::value_error("Missing ']' in format string"))?;
                let key = &after[..end];
                let key = match key.parse::<i64>() {
                    Ok(index) => Value::Int(index),
                    Err(_) => Value::str(key),
                };
                value = protocol::get_item(ctx, &value, &key)?;
                rest = &after[end + 1..];
            } else {
                return Err(RuntimeError::value_error(
                    "Only '.' or '[' may follow ']' in format field specifier",
                ));
            }
        }
        Ok(value)
    }

    fn render(&mut self, ctx: &mut dyn CallContext, template: &str, depth: usize) -> RtResult<String> {
        if depth > 2 {
            return Err(RuntimeError::value_error("Max string recursion exceeded"));
        }
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::with_capacity(template.len());
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    out.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    out.push('}');
                    i += 2;
                }
                '}' => {
                    return Err(RuntimeError::value_error(
                        "Single '}' encountered in format string",
                    ));
                }
                '{' => {
                    let mut nesting = 1;
                    let mut end = i + 1;
                    while end < chars.len() {
                        match chars[end] {
                            '{' => nesting += 1,
                            '}' => {
                                nesting -= 1;
                                if nesting == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        end += 1;
                    }
                    if end >= chars.len() {
                        return Err(RuntimeError::value_error(
                            "expected '}' before end of string",
                        ));
                    }
                    let field: String = chars[i + 1..end].iter().collect();
                    out.push_str(&self.replace_field(ctx, &field, depth)?);
                    i = end + 1;
                }
                ch => {
                    out.push(ch);
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    fn replace_field(&mut self, ctx: &mut dyn CallContext, field: &str, depth: usize) -> RtResult<String> {
        let mut bracket = false;
        let mut name_end = field.len();
        for (index, ch) in field.char_indices() {
            match ch {
                '[' => bracket = true,
                ']' => bracket = false,
                '!' | ':' if !bracket => {
                    name_end = index;
                    break;
                }
                _ => {}
            }
        }
        let (name, tail) = field.split_at(name_end);
        let (conversion, spec) = match tail.strip_prefix('!') {
            Some(after) => {
                let mut chars = after.chars();
                let conversion = chars.next();
                let rest = chars.as_str();
                let spec = match rest.strip_prefix(':') {
                    Some(spec) => spec,
                    None if rest.is_empty() => "",
                    None => {
                        return Err(RuntimeError::value_error(
                            "expected ':' after conversion specifier",
                        ));
                    }
                };
                (conversion, spec)
            }
            None => (None, tail.strip_prefix(':').unwrap_or("")),
        };
        let value = self.lookup(ctx, name)?;
        let value = match conversion {
            None => value,
            Some('r') => Value::str(repr(ctx, &value)?),
            Some('s') => Value::str(str_of(ctx, &value)?),
            Some('a') => Value::str(ascii_escape(&repr(ctx, &value)?)),
            Some(other) => {
                return Err(RuntimeError::value_error(format!(
                    "Unknown conversion specifier {other}"
                )));
            }
        };
        let spec = if spec.contains('{') {
            self.render(ctx, spec, depth + 1)?
        } else {
            spec.to_string()
        };
        format_value(ctx, &value, &spec)
    }
}

/// `template.format(*positional, **keywords)`.
pub fn format_string(
    ctx: &mut dyn CallContext,
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
) -> RtResult<String> {
    let mut formatter = FieldFormatter {
        positional,
        keywords,
        next_auto: 0,
        numbering: None,
    };
    formatter.render(ctx, template, 0)
}

// ---- printf-style ----------------------------------------------------------

fn number_for(ctx: &dyn CallContext, kind: char, value: &Value, integral: bool) -> RtResult<Value> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or_default())),
        Value::Float(number) if !integral => Ok(Value::Float(*number)),
        Value::Float(number) if matches!(kind, 'd' | 'i' | 'u') => {
            if !number.is_finite() {
                return Err(RuntimeError::new(
                    ExceptionKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            Ok(Value::Int(number.trunc() as i64))
        }
        other => {
            let expected = if integral && !matches!(kind, 'd' | 'i' | 'u') {
                "an integer is required"
            } else if integral {
                "a real number is required"
            } else {
                "must be real number"
            };
            let message = if integral {
                format!("%{kind} format: {expected}, not {}", type_name(ctx, other))
            } else {
                format!("{expected}, not {}", type_name(ctx, other))
            };
            Err(RuntimeError::type_error(message))
        }
    }
}

fn take_argument(values: &[Value], next: &mut usize) -> RtResult<Value> {
    let value = values
        .get(*next)
        .cloned()
        .ok_or_else(|| RuntimeError::type_error("not enough arguments for format string"))?;
    *next += 1;
    Ok(value)
}

/// `template % args`.
pub fn percent_format(ctx: &mut dyn CallContext, template: &str, args: &Value) -> RtResult<String> {
    let mapping = args
        .as_object()
        .filter(|object| is_a::<DictObject>(object))
        .cloned();
    let values = args.tuple_items().unwrap_or_else(|| vec![args.clone()]);
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut next = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }
        let mut keyed = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|ch| *ch == ')')
                .ok_or_else(|| RuntimeError::value_error("incomplete format key"))?;
            keyed = Some(chars[i + 1..i + close].iter().collect::<String>());
            i += close + 1;
        }
        let mut spec = FormatSpec::default();
        let mut left = false;
        let mut zero = false;
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                ' ' => {}
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        if chars.get(i) == Some(&'*') {
            let width = take_argument(&values, &mut next)?;
            spec.width = usize::try_from(width.as_int().unwrap_or(0)).unwrap_or(0);
            i += 1;
        } else {
            while let Some(digit) = chars.get(i).and_then(|ch| ch.to_digit(10)) {
                spec.width = spec.width.saturating_mul(10).saturating_add(digit as usize);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = 0usize;
            while let Some(digit) = chars.get(i).and_then(|ch| ch.to_digit(10)) {
                precision = precision.saturating_mul(10).saturating_add(digit as usize);
                i += 1;
            }
            spec.precision = Some(precision);
        }
        spec.check_bounds()?;
        while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
            i += 1;
        }
        let Some(&kind) = chars.get(i) else {
            return Err(RuntimeError::value_error("incomplete format"));
        };
        i += 1;
        let value = match &keyed {
            Some(key) => {
                let Some(mapping) = &mapping else {
                    return Err(RuntimeError::type_error("format requires a mapping"));
                };
                match dict::dict_get(ctx, mapping, &Value::str(key.as_str()))? {
                    Some(value) => value,
                    None => return Err(dict::key_error(ctx, Value::str(key.as_str()))),
                }
            }
            None => take_argument(&values, &mut next)?,
        };
        spec.align = Some(if left { '<' } else if zero && kind != 's' && kind != 'r' { '=' } else { '>' });
        if zero && !left && !matches!(kind, 's' | 'r' | 'a' | 'c') {
            spec.fill = '0';
        }
        let rendered = match kind {
            's' | 'r' | 'a' => {
                let text = match kind {
                    's' => str_of(ctx, &value)?,
                    'r' => repr(ctx, &value)?,
                    _ => ascii_escape(&repr(ctx, &value)?),
                };
                format_str(&text, &FormatSpec { sign: '-', kind: None, ..spec })?
            }
            'd' | 'i' | 'u' => {
                let number = number_for(ctx, kind, &value, true)?;
                format_int(number.as_int().unwrap_or_default(), &FormatSpec { kind: Some('d'), precision: None, ..spec })?
            }
            'o' | 'x' | 'X' => {
                let number = number_for(ctx, kind, &value, true)?;
                format_int(number.as_int().unwrap_or_default(), &FormatSpec { kind: Some(kind), precision: None, ..spec })?
            }
            'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                let number = number_for(ctx, kind, &value, false)?;
                let number = number.as_float().unwrap_or_default();
                format_float(number, &FormatSpec { kind: Some(kind), ..spec })?
            }
            'c' => {
                let text = match &value {
                    Value::Str(text) if text.chars().count() == 1 => text.to_string(),
                    other => match other.as_int().and_then(|code| u32::try_from(code).ok()).and_then(char::from_u32) {
                        Some(ch) => ch.to_string(),
                        None => return Err(RuntimeError::type_error("%c requires int or char")),
                    },
                };
                format_str(&text, &FormatSpec { sign: '-', precision: None, kind: None, ..spec })?
            }
            other => {
                return Err(RuntimeError::value_error(format!(
                    "unsupported format character '{other}' ({:#x}) at index {}",
                    other as u32,
                    i - 1
                )));
            }
        };
        out.push_str(&rendered);
    }
    if mapping.is_none() && next < values.len() {
        return Err(RuntimeError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_python() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(1.5e-5), "1.5e-05");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn string_repr_picks_quotes() {
        assert_eq!(str_repr("abc"), "'abc'");
        assert_eq!(str_repr("it's"), "\"it's\"");
        assert_eq!(str_repr("a\nb"), "'a\\nb'");
        assert_eq!(str_repr("'\""), "'\\'\"'");
    }

    #[test]
    fn spec_parsing() {
        let spec = FormatSpec::parse("*^+#012,.3f").expect("valid spec");
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.sign, '+');
        assert!(spec.alternate);
        assert_eq!(spec.width, 12);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.kind, Some('f'));
        assert!(FormatSpec::parse("5x5").is_err());
        let oversized = FormatSpec::parse(">999999999999").expect_err("too wide");
        assert_eq!(oversized.kind(), Some(ExceptionKind::OverflowError));
        assert!(FormatSpec::parse(".999999999999f").is_err());
    }

    fn int(value: i64, spec: &str) -> String {
        format_int(value, &FormatSpec::parse(spec).expect("valid spec")).expect("formats")
    }

    fn float(value: f64, spec: &str) -> String {
        format_float(value, &FormatSpec::parse(spec).expect("valid spec")).expect("formats")
    }

    #[test]
    fn integer_presentations() {
        assert_eq!(int(42, ""), "42");
        assert_eq!(int(42, "5"), "   42");
        assert_eq!(int(42, "<5"), "42   ");
        assert_eq!(int(-42, "06"), "-00042");
        assert_eq!(int(255, "#x"), "0xff");
        assert_eq!(int(5, "b"), "101");
        assert_eq!(int(1234567, ","), "1,234,567");
        assert_eq!(int(7, "+"), "+7");
        assert_eq!(int(65, "c"), "A");
    }

    #[test]
    fn float_presentations() {
        assert_eq!(float(3.14159, ".2f"), "3.14");
        assert_eq!(float(1234.5, "e"), "1.234500e+03");
        assert_eq!(float(0.00001, "g"), "1e-05");
        assert_eq!(float(1234.5, ".2"), "1.2e+03");
        assert_eq!(float(1.0, ".3"), "1.0");
        assert_eq!(float(0.25, ".0%"), "25%");
        assert_eq!(float(2.5, "08.2f"), "00002.50");
        assert_eq!(float(1234567.891, ",.2f"), "1,234,567.89");
    }

    #[test]
    fn string_padding_and_truncation() {
        let spec = FormatSpec::parse("^7.3").expect("valid spec");
        assert_eq!(format_str("abcdef", &spec).ok().as_deref(), Some("  abc  "));
        assert!(format_str("x", &FormatSpec::parse("d").expect("valid spec")).is_err());
    }
}
