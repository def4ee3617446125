//! Methods of `str`. Positions are counted in characters.

use std::rc::Rc;

use crate::runtime::class::Types;
use crate::runtime::error::{RtResult, RuntimeError, check_built_len};
use crate::runtime::format::format_string;
use crate::runtime::object::{Args, CallContext};
use crate::runtime::protocol::{self, type_name};
use crate::runtime::value::Value;

use super::{add_methods, index_arg, take_self, wrong_self};

pub(super) fn install(types: &Types) {
    add_methods(
        &types.str,
        &[
            ("join", join),
            ("split", split),
            ("rsplit", rsplit),
            ("splitlines", splitlines),
            ("strip", strip),
            ("lstrip", lstrip),
            ("rstrip", rstrip),
            ("upper", upper),
            ("lower", lower),
            ("casefold", lower),
            ("capitalize", capitalize),
            ("title", title),
            ("swapcase", swapcase),
            ("startswith", startswith),
            ("endswith", endswith),
            ("find", find),
            ("rfind", rfind),
            ("index", index),
            ("rindex", rindex),
            ("count", count),
            ("replace", replace),
            ("format", format),
            ("isdigit", isdigit),
            ("isdecimal", isdigit),
            ("isnumeric", isdigit),
            ("isalpha", isalpha),
            ("isalnum", isalnum),
            ("isspace", isspace),
            ("isupper", isupper),
            ("islower", islower),
            ("zfill", zfill),
            ("center", center),
            ("ljust", ljust),
            ("rjust", rjust),
            ("partition", partition),
            ("rpartition", rpartition),
            ("removeprefix", removeprefix),
            ("removesuffix", removesuffix),
        ],
    );
}

fn str_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<Rc<str>> {
    match take_self(args, "str", name)? {
        Value::Str(text) => Ok(text),
        other => Err(wrong_self(ctx, "str", name, &other)),
    }
}

fn str_arg(ctx: &dyn CallContext, name: &str, value: &Value) -> RtResult<Rc<str>> {
    match value {
        Value::Str(text) => Ok(text.clone()),
        other => Err(RuntimeError::type_error(format!(
            "{name}() argument must be str, not {}",
            type_name(ctx, other)
        ))),
    }
}

/// A `None`-or-str argument such as `sep` or `chars`.
fn optional_str(ctx: &dyn CallContext, name: &str, value: Option<Value>) -> RtResult<Option<Rc<str>>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(ctx, name, &value).map(Some),
    }
}

fn strs(parts: impl IntoIterator<Item = impl Into<Rc<str>>>) -> Value {
    Value::list(parts.into_iter().map(Value::str).collect())
}

fn join(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let separator = str_self(ctx, &mut args, "join")?;
    args.expect("join", 1, 1)?;
    let items = protocol::collect(ctx, &args.positional[0])?;
    let mut joined = String::new();
    for (position, item) in items.iter().enumerate() {
        let Value::Str(text) = item else {
            return Err(RuntimeError::type_error(format!(
                "sequence item {position}: expected str instance, {} found",
                type_name(ctx, item)
            )));
        };
        if position > 0 {
            joined.push_str(&separator);
        }
        joined.push_str(text);
    }
    Ok(Value::str(joined))
}

/// `sep` and `maxsplit` of `split` and `rsplit`, positional or keyword.
fn split_args(ctx: &mut dyn CallContext, args: &mut Args, name: &str) -> RtResult<(Option<Rc<str>>, Option<usize>)> {
    let sep = args.take_keyword("sep");
    let maxsplit = args.take_keyword("maxsplit");
    args.finish_keywords(name)?;
    RuntimeError::expect_arity(name, 0, 2, args.len())?;
    let sep = optional_str(ctx, name, sep.or_else(|| args.get(0).cloned()))?;
    let maxsplit = match maxsplit.or_else(|| args.get(1).cloned()) {
        Some(limit) => usize::try_from(index_arg(ctx, &limit)?).ok(),
        None => None,
    };
    if sep.as_deref() == Some("") {
        return Err(RuntimeError::value_error("empty separator"));
    }
    Ok((sep, maxsplit))
}

/// Whitespace splitting from the left; the remainder keeps inner spacing.
fn split_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|limit| parts.len() == limit) {
            parts.push(rest.to_string());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    parts
}

fn rsplit_whitespace(text: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|limit| parts.len() == limit) {
            parts.push(rest.to_string());
            break;
        }
        let start = rest
            .char_indices()
            .rev()
            .find(|(_, ch)| ch.is_whitespace())
            .map(|(position, ch)| position + ch.len_utf8())
            .unwrap_or(0);
        parts.push(rest[start..].to_string());
        rest = rest[..start].trim_end();
    }
    parts.reverse();
    parts
}

fn split(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "split")?;
    let (sep, maxsplit) = split_args(ctx, &mut args, "split")?;
    Ok(match (sep, maxsplit) {
        (None, maxsplit) => strs(split_whitespace(&text, maxsplit)),
        (Some(sep), Some(limit)) => strs(text.splitn(limit + 1, &*sep)),
        (Some(sep), None) => strs(text.split(&*sep)),
    })
}

fn rsplit(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "rsplit")?;
    let (sep, maxsplit) = split_args(ctx, &mut args, "rsplit")?;
    Ok(match (sep, maxsplit) {
        (None, maxsplit) => strs(rsplit_whitespace(&text, maxsplit)),
        (Some(sep), Some(limit)) => {
            let mut parts: Vec<&str> = text.rsplitn(limit + 1, &*sep).collect();
            parts.reverse();
            strs(parts)
        }
        (Some(sep), None) => strs(text.split(&*sep)),
    })
}

fn splitlines(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "splitlines")?;
    let keepends = args.take_keyword("keepends");
    args.finish_keywords("splitlines")?;
    RuntimeError::expect_arity("splitlines", 0, 1, args.len())?;
    let keepends = match keepends.or_else(|| args.get(0).cloned()) {
        Some(flag) => protocol::truthy(ctx, &flag)?,
        None => false,
    };
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((position, ch)) = chars.next() {
        if !matches!(ch, '\n' | '\r' | '\x0b' | '\x0c' | '\x1c' | '\x1d' | '\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}') {
            continue;
        }
        let mut end = position + ch.len_utf8();
        if ch == '\r' && chars.peek().is_some_and(|(_, next)| *next == '\n') {
            chars.next();
            end += 1;
        }
        lines.push(if keepends { &text[start..end] } else { &text[start..position] });
        start = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    Ok(strs(lines))
}

fn strip_with(ctx: &mut dyn CallContext, mut args: Args, name: &str, left: bool, right: bool) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, name)?;
    args.expect(name, 0, 1)?;
    let chars = optional_str(ctx, name, args.get(0).cloned())?;
    let strip_char = |ch: char| match &chars {
        Some(chars) => chars.contains(ch),
        None => ch.is_whitespace(),
    };
    let mut result: &str = &text;
    if left {
        result = result.trim_start_matches(strip_char);
    }
    if right {
        result = result.trim_end_matches(strip_char);
    }
    Ok(Value::str(result))
}

fn strip(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    strip_with(ctx, args, "strip", true, true)
}

fn lstrip(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    strip_with(ctx, args, "lstrip", true, false)
}

fn rstrip(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    strip_with(ctx, args, "rstrip", false, true)
}

fn map_text(ctx: &mut dyn CallContext, mut args: Args, name: &str, map: fn(&str) -> String) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, name)?;
    args.expect(name, 0, 0)?;
    Ok(Value::str(map(&text)))
}

fn upper(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    map_text(ctx, args, "upper", str::to_uppercase)
}

fn lower(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    map_text(ctx, args, "lower", str::to_lowercase)
}

fn capitalize(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    map_text(ctx, args, "capitalize", |text| {
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
            None => String::new(),
        }
    })
}

fn title(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    map_text(ctx, args, "title", |text| {
        let mut result = String::with_capacity(text.len());
        let mut previous_cased = false;
        for ch in text.chars() {
            if previous_cased {
                result.extend(ch.to_lowercase());
            } else {
                result.extend(ch.to_uppercase());
            }
            previous_cased = ch.is_alphabetic();
        }
        result
    })
}

fn swapcase(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    map_text(ctx, args, "swapcase", |text| {
        let mut result = String::with_capacity(text.len());
        for ch in text.chars() {
            if ch.is_uppercase() {
                result.extend(ch.to_lowercase());
            } else {
                result.extend(ch.to_uppercase());
            }
        }
        result
    })
}

/// A `start` or `end` argument clamped to `0..=len`.
fn bound(ctx: &mut dyn CallContext, value: Option<&Value>, default: usize, len: usize) -> RtResult<usize> {
    let bound = match value {
        None | Some(Value::None) => return Ok(default),
        Some(value) => index_arg(ctx, value)?,
    };
    Ok(if bound < 0 {
        (bound + len as i64).max(0) as usize
    } else {
        (bound as usize).min(len)
    })
}

/// The part of `text` between the optional `start` and `end` arguments
/// at `args[first..]`, and its character offset.
fn window<'a>(ctx: &mut dyn CallContext, text: &'a str, args: &Args, first: usize) -> RtResult<(&'a str, usize)> {
    let len = text.chars().count();
    let start = bound(ctx, args.get(first), 0, len)?;
    let end = bound(ctx, args.get(first + 1), len, len)?;
    if start > end {
        return Ok(("", start));
    }
    let byte = |chars: usize| text.char_indices().nth(chars).map_or(text.len(), |(position, _)| position);
    Ok((&text[byte(start)..byte(end)], start))
}

fn affix_test(ctx: &mut dyn CallContext, mut args: Args, name: &str, test: fn(&str, &str) -> bool) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, name)?;
    args.expect(name, 1, 3)?;
    let (window, _) = window(ctx, &text, &args, 1)?;
    let candidates = match &args.positional[0] {
        Value::Str(affix) => vec![affix.clone()],
        other => match other.tuple_items() {
            Some(items) => items
                .iter()
                .map(|item| str_arg(ctx, name, item))
                .collect::<RtResult<Vec<_>>>()?,
            None => {
                return Err(RuntimeError::type_error(format!(
                    "{name} first arg must be str or a tuple of str, not {}",
                    type_name(ctx, other)
                )));
            }
        },
    };
    Ok(Value::Bool(candidates.iter().any(|affix| test(window, affix))))
}

fn startswith(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    affix_test(ctx, args, "startswith", |text, affix| text.starts_with(affix))
}

fn endswith(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    affix_test(ctx, args, "endswith", |text, affix| text.ends_with(affix))
}

/// Character index of `sub` in the window, searching from the right when
/// `reverse` is set.
fn search(ctx: &mut dyn CallContext, args: &mut Args, name: &str, reverse: bool) -> RtResult<Option<usize>> {
    let text = str_self(ctx, args, name)?;
    args.expect(name, 1, 3)?;
    let needle = str_arg(ctx, name, &args.positional[0])?;
    let (window, offset) = window(ctx, &text, args, 1)?;
    let found = if reverse { window.rfind(&*needle) } else { window.find(&*needle) };
    Ok(found.map(|byte| offset + window[..byte].chars().count()))
}

fn position_or(found: Option<usize>) -> Value {
    Value::Int(found.map_or(-1, |position| position as i64))
}

fn find(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    search(ctx, &mut args, "find", false).map(position_or)
}

fn rfind(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    search(ctx, &mut args, "rfind", true).map(position_or)
}

fn index(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    search(ctx, &mut args, "index", false)?
        .map(|position| Value::Int(position as i64))
        .ok_or_else(|| RuntimeError::value_error("substring not found"))
}

fn rindex(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    search(ctx, &mut args, "rindex", true)?
        .map(|position| Value::Int(position as i64))
        .ok_or_else(|| RuntimeError::value_error("substring not found"))
}

fn count(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "count")?;
    args.expect("count", 1, 3)?;
    let needle = str_arg(ctx, "count", &args.positional[0])?;
    let (window, _) = window(ctx, &text, &args, 1)?;
    let found = if needle.is_empty() {
        window.chars().count() + 1
    } else {
        window.matches(&*needle).count()
    };
    Ok(Value::Int(found as i64))
}

fn replace(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "replace")?;
    let limit = args.take_keyword("count");
    args.finish_keywords("replace")?;
    RuntimeError::expect_arity("replace", 2, 3, args.len())?;
    let old = str_arg(ctx, "replace", &args.positional[0])?;
    let new = str_arg(ctx, "replace", &args.positional[1])?;
    let limit = match limit.or_else(|| args.get(2).cloned()) {
        Some(limit) => usize::try_from(index_arg(ctx, &limit)?).ok(),
        None => None,
    };
    Ok(Value::str(match limit {
        Some(limit) => text.replacen(&*old, &new, limit),
        None => text.replace(&*old, &new),
    }))
}

fn format(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let template = str_self(ctx, &mut args, "format")?;
    format_string(ctx, &template, &args.positional, &args.keywords).map(Value::str)
}

fn predicate(ctx: &mut dyn CallContext, mut args: Args, name: &str, test: fn(&str) -> bool) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, name)?;
    args.expect(name, 0, 0)?;
    Ok(Value::Bool(test(&text)))
}

fn isdigit(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "isdigit", |text| !text.is_empty() && text.chars().all(|ch| ch.is_numeric()))
}

fn isalpha(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "isalpha", |text| !text.is_empty() && text.chars().all(char::is_alphabetic))
}

fn isalnum(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "isalnum", |text| !text.is_empty() && text.chars().all(char::is_alphanumeric))
}

fn isspace(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "isspace", |text| !text.is_empty() && text.chars().all(char::is_whitespace))
}

fn isupper(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "isupper", |text| {
        text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
    })
}

fn islower(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    predicate(ctx, args, "islower", |text| {
        text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase)
    })
}

/// `width` and the fill character of the padding methods.
fn padding(ctx: &mut dyn CallContext, args: &Args, name: &str) -> RtResult<(usize, char)> {
    args.expect(name, 1, 2)?;
    let width = usize::try_from(index_arg(ctx, &args.positional[0])?).unwrap_or(0);
    let width = check_built_len(width, "padded string")?;
    let fill = match args.get(1) {
        None => ' ',
        Some(value) => {
            let text = str_arg(ctx, name, value)?;
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(fill), None) => fill,
                _ => {
                    return Err(RuntimeError::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
    };
    Ok((width, fill))
}

fn pad(text: &str, left: usize, right: usize, fill: char) -> Value {
    let mut result = String::with_capacity(text.len() + left + right);
    result.extend(std::iter::repeat_n(fill, left));
    result.push_str(text);
    result.extend(std::iter::repeat_n(fill, right));
    Value::str(result)
}

fn center(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "center")?;
    let (width, fill) = padding(ctx, &args, "center")?;
    let margin = width.saturating_sub(text.chars().count());
    let left = margin / 2 + (margin & width & 1);
    Ok(pad(&text, left, margin - left, fill))
}

fn ljust(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "ljust")?;
    let (width, fill) = padding(ctx, &args, "ljust")?;
    Ok(pad(&text, 0, width.saturating_sub(text.chars().count()), fill))
}

fn rjust(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "rjust")?;
    let (width, fill) = padding(ctx, &args, "rjust")?;
    Ok(pad(&text, width.saturating_sub(text.chars().count()), 0, fill))
}

fn zfill(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "zfill")?;
    args.expect("zfill", 1, 1)?;
    let width = usize::try_from(index_arg(ctx, &args.positional[0])?).unwrap_or(0);
    let width = check_built_len(width, "padded string")?;
    let zeros = width.saturating_sub(text.chars().count());
    let (sign, digits) = match text.chars().next() {
        Some(sign @ ('+' | '-')) => (Some(sign), &text[1..]),
        _ => (None, &*text),
    };
    let mut result = String::with_capacity(width.max(text.len()));
    result.extend(sign);
    result.extend(std::iter::repeat_n('0', zeros));
    result.push_str(digits);
    Ok(Value::str(result))
}

fn partition_with(ctx: &mut dyn CallContext, mut args: Args, name: &str, reverse: bool) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, name)?;
    args.expect(name, 1, 1)?;
    let sep = str_arg(ctx, name, &args.positional[0])?;
    if sep.is_empty() {
        return Err(RuntimeError::value_error("empty separator"));
    }
    let found = if reverse { text.rfind(&*sep) } else { text.find(&*sep) };
    let parts = match found {
        Some(position) => [&text[..position], &*sep, &text[position + sep.len()..]],
        None if reverse => ["", "", &*text],
        None => [&*text, "", ""],
    };
    Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
}

fn partition(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    partition_with(ctx, args, "partition", false)
}

fn rpartition(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    partition_with(ctx, args, "rpartition", true)
}

fn removeprefix(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "removeprefix")?;
    args.expect("removeprefix", 1, 1)?;
    let prefix = str_arg(ctx, "removeprefix", &args.positional[0])?;
    Ok(Value::str(text.strip_prefix(&*prefix).unwrap_or(&*text)))
}

fn removesuffix(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let text = str_self(ctx, &mut args, "removesuffix")?;
    args.expect("removesuffix", 1, 1)?;
    let suffix = str_arg(ctx, "removesuffix", &args.positional[0])?;
    Ok(Value::str(text.strip_suffix(&*suffix).unwrap_or(&*text)))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{rsplit_whitespace, split_whitespace};
    use crate::builtins::tests::{error, output};

    #[test]
    fn whitespace_splitting_keeps_the_remainder() {
        assert_eq!(split_whitespace("  a b  c ", None), ["a", "b", "c"]);
        assert_eq!(split_whitespace("  a b  c ", Some(1)), ["a", "b  c "]);
        assert_eq!(rsplit_whitespace("  a b  c ", Some(1)), ["  a b", "c"]);
        assert!(split_whitespace("   ", None).is_empty());
    }

    #[test]
    fn splitting_and_joining() {
        let source = indoc! {"
            print('a,b,,c'.split(','), 'a,b,c'.split(',', 1), 'a,b,c'.rsplit(',', 1))
            print('-'.join(['x', 'y', 'z']), 'one\\ntwo\\r\\n'.splitlines())
            print('k=v=w'.partition('='), 'k=v=w'.rpartition('='), 'kv'.partition('='))
        "};
        assert_eq!(
            output(source),
            concat!(
                "['a', 'b', '', 'c'] ['a', 'b,c'] ['a,b', 'c']\n",
                "x-y-z ['one', 'two']\n",
                "('k', '=', 'v=w') ('k=v', '=', 'w') ('kv', '', '')\n",
            )
        );
    }

    #[test]
    fn searching_counts_characters() {
        let source = indoc! {"
            s = 'héllo wörld'
            print(s.find('o'), s.rfind('l'), s.find('l', 5), s.find('z'), s.count('l'), s.index('w'))
            print(s.startswith(('x', 'hé')), s.endswith('wörld', 0, 11), 'abc'.count(''))
        "};
        assert_eq!(output(source), "4 9 9 -1 3 6\nTrue True 4\n");
    }

    #[test]
    fn case_and_padding() {
        let source = indoc! {"
            print('hello world'.title(), 'hELLO'.capitalize(), 'aB'.swapcase(), 'ABC'.lower())
            print(repr('ab'.center(5, '*')), repr('ab'.ljust(4)), repr('ab'.rjust(4, '0')), '-42'.zfill(5))
            print('  x  '.strip(), 'xxhixx'.strip('x'), 'prefix_name'.removeprefix('prefix_'))
            print('42'.isdigit(), 'ab1'.isalpha(), 'ABC'.isupper(), ''.islower())
        "};
        assert_eq!(
            output(source),
            concat!(
                "Hello World Hello Ab abc\n",
                "'**ab*' 'ab  ' '00ab' -0042\n",
                "x hi name\n",
                "True False True False\n",
            )
        );
    }

    #[test]
    fn replace_and_format() {
        let source = indoc! {"
            print('aaa'.replace('a', 'b', 2), '{} + {x}'.format(1, x=2), '{0:>4}'.format('z'))
        "};
        assert_eq!(output(source), "bba 1 + 2    z\n");
    }

    #[test]
    fn string_method_errors() {
        assert_eq!(error("'a'.index('b')"), "ValueError: substring not found");
        assert_eq!(
            error("','.join([1])"),
            "TypeError: sequence item 0: expected str instance, int found"
        );
        assert_eq!(error("'a'.split('')"), "ValueError: empty separator");
    }

    #[test]
    fn oversized_widths_raise_instead_of_allocating() {
        assert_eq!(
            error("'x'.center(9223372036854775807)"),
            "OverflowError: padded string is too long"
        );
        assert_eq!(
            error("'7'.zfill(1 << 40)"),
            "OverflowError: padded string is too long"
        );
        assert_eq!(
            error("f'{1:>999999999999}'"),
            "OverflowError: formatted string is too long"
        );
        assert_eq!(
            error("'%999999999999d' % 1"),
            "OverflowError: formatted string is too long"
        );
        let source = indoc! {"
            print('before')
            try:
                f'{1:>999999999999}'
            except OverflowError as error:
                print('caught', error)
        "};
        assert_eq!(output(source), "before\ncaught formatted string is too long\n");
    }
}
