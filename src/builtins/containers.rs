//! Methods of `list`, `tuple`, `dict` and `set`.
//!
//! Native containers are borrowed only while no Python code runs: items are
//! copied out before any comparison or hash that may call a dunder.

use crate::runtime::arith::less_than;
use crate::runtime::class::Types;
use crate::runtime::dict::{self, DictObject, SetObject};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::function::ClassMethodObject;
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{Args, CallContext, ObjectRef, downcast, downcast_mut, is_a, new_object};
use crate::runtime::protocol::{self, repr, values_equal};
use crate::runtime::value::Value;

use super::{add_methods, function, index_arg, take_self, wrong_self};

pub(super) fn install(types: &Types) {
    add_methods(
        &types.list,
        &[
            ("append", list_append),
            ("extend", list_extend),
            ("insert", list_insert),
            ("pop", list_pop),
            ("remove", list_remove),
            ("index", list_index),
            ("count", list_count),
            ("clear", list_clear),
            ("copy", list_copy),
            ("reverse", list_reverse),
            ("sort", list_sort),
        ],
    );
    add_methods(&types.tuple, &[("index", tuple_index), ("count", tuple_count)]);
    add_methods(
        &types.dict,
        &[
            ("keys", dict_keys),
            ("values", dict_values),
            ("items", dict_items),
            ("get", dict_get),
            ("pop", dict_pop),
            ("popitem", dict_popitem),
            ("setdefault", dict_setdefault),
            ("update", dict_update),
            ("clear", dict_clear),
            ("copy", dict_copy),
        ],
    );
    types.dict.insert(
        "fromkeys",
        Value::Object(new_object(ClassMethodObject {
            function: function("fromkeys", dict_fromkeys),
        })),
    );
    add_methods(
        &types.set,
        &[
            ("add", set_add),
            ("remove", set_remove),
            ("discard", set_discard),
            ("pop", set_pop),
            ("clear", set_clear),
            ("copy", set_copy),
            ("update", set_update),
            ("union", set_union),
            ("intersection", set_intersection),
            ("difference", set_difference),
            ("symmetric_difference", set_symmetric_difference),
            ("issubset", set_issubset),
            ("issuperset", set_issuperset),
            ("isdisjoint", set_isdisjoint),
        ],
    );
}

/// Stable sort by `key`, comparing with `<` only.
pub(super) fn sort_values(
    ctx: &mut dyn CallContext,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> RtResult<Vec<Value>> {
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let sort_key = match key {
            Some(key) => ctx.call(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        entries.push((sort_key, item));
    }
    // Reversing before and after keeps equal elements in their original order.
    if reverse {
        entries.reverse();
    }
    let mut sorted = merge_sort(ctx, entries)?;
    if reverse {
        sorted.reverse();
    }
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

fn merge_sort(ctx: &mut dyn CallContext, mut entries: Vec<(Value, Value)>) -> RtResult<Vec<(Value, Value)>> {
    if entries.len() <= 1 {
        return Ok(entries);
    }
    let right = entries.split_off(entries.len() / 2);
    let left = merge_sort(ctx, entries)?;
    let right = merge_sort(ctx, right)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(first), Some(second)) => less_than(ctx, &second.0, &first.0)?,
            _ => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

/// Fills `dict` from a mapping or an iterable of pairs.
pub(super) fn update_dict(ctx: &mut dyn CallContext, dict: &ObjectRef, source: &Value) -> RtResult<()> {
    if let Some(object) = source.as_object()
        && is_a::<DictObject>(object)
    {
        let pairs = dict::table(object).map(|table| table.items()).unwrap_or_default();
        for (key, value) in pairs {
            dict::dict_set(ctx, dict, key, value)?;
        }
        return Ok(());
    }
    if let Some(keys) = protocol::get_attr_opt(ctx, source, "keys")? {
        let keys = ctx.call(&keys, Args::default())?;
        for key in protocol::collect(ctx, &keys)? {
            let value = protocol::get_item(ctx, source, &key)?;
            dict::dict_set(ctx, dict, key, value)?;
        }
        return Ok(());
    }
    for (position, element) in protocol::collect(ctx, source)?.into_iter().enumerate() {
        let pair = match protocol::collect(ctx, &element) {
            Ok(pair) => pair,
            Err(error) if protocol::error_is(&ctx.types(), &error, ExceptionKind::TypeError) => {
                return Err(RuntimeError::type_error(format!(
                    "cannot convert dictionary update sequence element #{position} to a sequence"
                )));
            }
            Err(error) => return Err(error),
        };
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            RuntimeError::value_error(format!(
                "dictionary update sequence element #{position} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict::dict_set(ctx, dict, key, value)?;
    }
    Ok(())
}

// ---- list ----------------------------------------------------------------

fn list_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<ObjectRef> {
    let this = take_self(args, "list", name)?;
    match this.as_object() {
        Some(object) if is_a::<ListObject>(object) => Ok(object.clone()),
        _ => Err(wrong_self(ctx, "list", name, &this)),
    }
}

fn list_items(object: &ObjectRef) -> Vec<Value> {
    downcast::<ListObject>(object)
        .map(|list| list.items.clone())
        .unwrap_or_default()
}

fn with_list<R>(object: &ObjectRef, edit: impl FnOnce(&mut Vec<Value>) -> R) -> R {
    let mut list = downcast_mut::<ListObject>(object).expect("receiver checked to be a list");
    edit(&mut list.items)
}

fn list_append(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "append")?;
    args.expect("append", 1, 1)?;
    let item = args.positional.remove(0);
    with_list(&list, |items| items.push(item));
    Ok(Value::None)
}

fn list_extend(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "extend")?;
    args.expect("extend", 1, 1)?;
    let extra = protocol::collect(ctx, &args.positional[0])?;
    with_list(&list, |items| items.extend(extra));
    Ok(Value::None)
}

fn list_insert(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "insert")?;
    args.expect("insert", 2, 2)?;
    let index = index_arg(ctx, &args.positional[0])?;
    let item = args.positional.remove(1);
    with_list(&list, |items| {
        let len = items.len() as i64;
        let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
        items.insert(position as usize, item);
    });
    Ok(Value::None)
}

fn list_pop(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "pop")?;
    args.expect("pop", 0, 1)?;
    let index = match args.get(0) {
        Some(index) => index_arg(ctx, index)?,
        None => -1,
    };
    with_list(&list, |items| {
        if items.is_empty() {
            return Err(RuntimeError::index_error("pop from empty list"));
        }
        let position = crate::runtime::list::normalize_index(index, items.len())
            .ok_or_else(|| RuntimeError::index_error("pop index out of range"))?;
        Ok(items.remove(position))
    })
}

/// Position of the first item equal to `needle` within `start..stop`.
fn find(ctx: &mut dyn CallContext, items: &[Value], needle: &Value, start: usize, stop: usize) -> RtResult<Option<usize>> {
    for (position, item) in items.iter().enumerate().take(stop).skip(start) {
        if values_equal(ctx, item, needle)? {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

fn list_remove(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "remove")?;
    args.expect("remove", 1, 1)?;
    let items = list_items(&list);
    let Some(position) = find(ctx, &items, &args.positional[0], 0, items.len())? else {
        return Err(RuntimeError::value_error("list.remove(x): x not in list"));
    };
    with_list(&list, |items| {
        if position < items.len() {
            items.remove(position);
        }
    });
    Ok(Value::None)
}

/// `start` and `stop` of `index()`, clamped like slice bounds.
fn search_bounds(ctx: &mut dyn CallContext, args: &Args, len: usize) -> RtResult<(usize, usize)> {
    let clamp = |bound: i64| {
        if bound < 0 {
            (bound + len as i64).max(0) as usize
        } else {
            (bound as usize).min(len)
        }
    };
    let start = match args.get(1) {
        Some(start) => clamp(index_arg(ctx, start)?),
        None => 0,
    };
    let stop = match args.get(2) {
        Some(stop) => clamp(index_arg(ctx, stop)?),
        None => len,
    };
    Ok((start, stop))
}

fn list_index(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "index")?;
    args.expect("index", 1, 3)?;
    let items = list_items(&list);
    let (start, stop) = search_bounds(ctx, &args, items.len())?;
    match find(ctx, &items, &args.positional[0], start, stop)? {
        Some(position) => Ok(Value::Int(position as i64)),
        None => Err(RuntimeError::value_error(format!(
            "{} is not in list",
            repr(ctx, &args.positional[0])?
        ))),
    }
}

fn count_equal(ctx: &mut dyn CallContext, items: &[Value], needle: &Value) -> RtResult<Value> {
    let mut count = 0;
    for item in items {
        if values_equal(ctx, item, needle)? {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn list_count(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "count")?;
    args.expect("count", 1, 1)?;
    let items = list_items(&list);
    count_equal(ctx, &items, &args.positional[0])
}

fn list_clear(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "clear")?;
    args.expect("clear", 0, 0)?;
    with_list(&list, Vec::clear);
    Ok(Value::None)
}

fn list_copy(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "copy")?;
    args.expect("copy", 0, 0)?;
    Ok(Value::list(list_items(&list)))
}

fn list_reverse(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "reverse")?;
    args.expect("reverse", 0, 0)?;
    with_list(&list, |items| items.reverse());
    Ok(Value::None)
}

fn list_sort(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let list = list_self(ctx, &mut args, "sort")?;
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let reverse = match args.take_keyword("reverse") {
        Some(reverse) => protocol::truthy(ctx, &reverse)?,
        None => false,
    };
    args.finish_keywords("sort")?;
    if !args.positional.is_empty() {
        return Err(RuntimeError::type_error("sort() takes no positional arguments"));
    }
    // The list reads as empty while it is being sorted.
    let items = with_list(&list, std::mem::take);
    let result = sort_values(ctx, items.clone(), key.as_ref(), reverse);
    let modified = with_list(&list, |current| !current.is_empty());
    match result {
        Ok(sorted) => {
            with_list(&list, |current| *current = sorted);
            if modified {
                return Err(RuntimeError::value_error("list modified during sort"));
            }
            Ok(Value::None)
        }
        Err(error) => {
            with_list(&list, |current| *current = items);
            Err(error)
        }
    }
}

// ---- tuple ---------------------------------------------------------------

fn tuple_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<Vec<Value>> {
    let this = take_self(args, "tuple", name)?;
    match this.as_object() {
        Some(object) if is_a::<TupleObject>(object) => Ok(this.tuple_items().unwrap_or_default()),
        _ => Err(wrong_self(ctx, "tuple", name, &this)),
    }
}

fn tuple_index(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let items = tuple_self(ctx, &mut args, "index")?;
    args.expect("index", 1, 3)?;
    let (start, stop) = search_bounds(ctx, &args, items.len())?;
    match find(ctx, &items, &args.positional[0], start, stop)? {
        Some(position) => Ok(Value::Int(position as i64)),
        None => Err(RuntimeError::value_error("tuple.index(x): x not in tuple")),
    }
}

fn tuple_count(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let items = tuple_self(ctx, &mut args, "count")?;
    args.expect("count", 1, 1)?;
    count_equal(ctx, &items, &args.positional[0])
}

// ---- dict ----------------------------------------------------------------

fn dict_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<ObjectRef> {
    let this = take_self(args, "dict", name)?;
    match this.as_object() {
        Some(object) if is_a::<DictObject>(object) => Ok(object.clone()),
        _ => Err(wrong_self(ctx, "dict", name, &this)),
    }
}

fn pairs_of(dict: &ObjectRef) -> Vec<(Value, Value)> {
    dict::table(dict).map(|table| table.items()).unwrap_or_default()
}

fn dict_keys(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "keys")?;
    args.expect("keys", 0, 0)?;
    Ok(Value::list(pairs_of(&dict).into_iter().map(|(key, _)| key).collect()))
}

fn dict_values(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "values")?;
    args.expect("values", 0, 0)?;
    Ok(Value::list(pairs_of(&dict).into_iter().map(|(_, value)| value).collect()))
}

fn dict_items(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "items")?;
    args.expect("items", 0, 0)?;
    Ok(Value::list(
        pairs_of(&dict)
            .into_iter()
            .map(|(key, value)| Value::tuple(vec![key, value]))
            .collect(),
    ))
}

fn dict_get(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "get")?;
    args.expect("get", 1, 2)?;
    Ok(dict::dict_get(ctx, &dict, &args.positional[0])?.unwrap_or_else(|| args.arg(1)))
}

fn dict_pop(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "pop")?;
    args.expect("pop", 1, 2)?;
    match dict::dict_remove(ctx, &dict, &args.positional[0])? {
        Some(value) => Ok(value),
        None => match args.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(dict::key_error(ctx, args.positional.remove(0))),
        },
    }
}

fn dict_popitem(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "popitem")?;
    args.expect("popitem", 0, 0)?;
    let last = dict::table_mut(&dict).and_then(|mut table| table.pop_last());
    match last {
        Some((key, value)) => Ok(Value::tuple(vec![key, value])),
        None => Err(RuntimeError::new(
            ExceptionKind::KeyError,
            "popitem(): dictionary is empty",
        )),
    }
}

fn dict_setdefault(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "setdefault")?;
    args.expect("setdefault", 1, 2)?;
    let key = args.positional[0].clone();
    if let Some(value) = dict::dict_get(ctx, &dict, &key)? {
        return Ok(value);
    }
    let default = args.arg(1);
    dict::dict_set(ctx, &dict, key, default.clone())?;
    Ok(default)
}

fn dict_update(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "update")?;
    RuntimeError::expect_arity("update", 0, 1, args.len())?;
    let Args {
        positional,
        keywords,
    } = args;
    if let Some(source) = positional.first() {
        update_dict(ctx, &dict, source)?;
    }
    for (key, value) in keywords {
        dict::dict_set(ctx, &dict, Value::str(key), value)?;
    }
    Ok(Value::None)
}

fn dict_clear(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "clear")?;
    args.expect("clear", 0, 0)?;
    if let Some(mut table) = dict::table_mut(&dict) {
        table.clear();
    }
    Ok(Value::None)
}

fn dict_copy(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let dict = dict_self(ctx, &mut args, "copy")?;
    args.expect("copy", 0, 0)?;
    let copy = dict::table(&dict).map(|table| table.clone()).unwrap_or_default();
    Ok(Value::Object(new_object(copy)))
}

fn dict_fromkeys(ctx: &mut dyn CallContext, args: Args) -> RtResult<Value> {
    // The class arrives first through the classmethod binding.
    RuntimeError::expect_arity("fromkeys", 2, 3, args.len())?;
    args.no_keywords("fromkeys")?;
    let value = args.arg(2);
    let keys = protocol::collect(ctx, &args.positional[1])?;
    dict::dict_from_pairs(ctx, keys.into_iter().map(|key| (key, value.clone())))
}

// ---- set -----------------------------------------------------------------

fn set_self(ctx: &dyn CallContext, args: &mut Args, name: &str) -> RtResult<ObjectRef> {
    let this = take_self(args, "set", name)?;
    match this.as_object() {
        Some(object) if is_a::<SetObject>(object) => Ok(object.clone()),
        _ => Err(wrong_self(ctx, "set", name, &this)),
    }
}

fn members(set: &ObjectRef) -> Vec<Value> {
    dict::table(set).map(|table| table.keys()).unwrap_or_default()
}

/// Members of any iterable, hashed into a fresh set.
fn as_set(ctx: &mut dyn CallContext, iterable: &Value) -> RtResult<ObjectRef> {
    if let Some(object) = iterable.as_object()
        && is_a::<SetObject>(object)
    {
        return Ok(object.clone());
    }
    let items = protocol::collect(ctx, iterable)?;
    let set = dict::new_set();
    for item in items {
        dict::set_add(ctx, &set, item)?;
    }
    Ok(set)
}

fn copy_set(set: &ObjectRef) -> ObjectRef {
    let table = dict::table(set).map(|table| table.clone()).unwrap_or_default();
    new_object(SetObject { table })
}

fn set_add(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "add")?;
    args.expect("add", 1, 1)?;
    dict::set_add(ctx, &set, args.positional.remove(0))?;
    Ok(Value::None)
}

fn set_remove(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "remove")?;
    args.expect("remove", 1, 1)?;
    if dict::set_discard(ctx, &set, &args.positional[0])? {
        Ok(Value::None)
    } else {
        Err(dict::key_error(ctx, args.positional.remove(0)))
    }
}

fn set_discard(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "discard")?;
    args.expect("discard", 1, 1)?;
    dict::set_discard(ctx, &set, &args.positional[0])?;
    Ok(Value::None)
}

fn set_pop(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "pop")?;
    args.expect("pop", 0, 0)?;
    let first = dict::table_mut(&set).and_then(|mut table| table.pop_first());
    match first {
        Some((item, _)) => Ok(item),
        None => Err(RuntimeError::new(
            ExceptionKind::KeyError,
            "pop from an empty set",
        )),
    }
}

fn set_clear(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "clear")?;
    args.expect("clear", 0, 0)?;
    if let Some(mut table) = dict::table_mut(&set) {
        table.clear();
    }
    Ok(Value::None)
}

fn set_copy(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "copy")?;
    args.expect("copy", 0, 0)?;
    Ok(Value::Object(copy_set(&set)))
}

fn set_update(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "update")?;
    args.no_keywords("update")?;
    for other in &args.positional {
        for item in protocol::collect(ctx, other)? {
            dict::set_add(ctx, &set, item)?;
        }
    }
    Ok(Value::None)
}

fn set_union(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "union")?;
    args.no_keywords("union")?;
    let result = copy_set(&set);
    for other in &args.positional {
        for item in protocol::collect(ctx, other)? {
            dict::set_add(ctx, &result, item)?;
        }
    }
    Ok(Value::Object(result))
}

fn set_intersection(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "intersection")?;
    args.no_keywords("intersection")?;
    let mut current = copy_set(&set);
    for other in &args.positional {
        let other = as_set(ctx, other)?;
        let next = dict::new_set();
        for item in members(&current) {
            if dict::dict_contains(ctx, &other, &item)? {
                dict::set_add(ctx, &next, item)?;
            }
        }
        current = next;
    }
    Ok(Value::Object(current))
}

fn set_difference(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "difference")?;
    args.no_keywords("difference")?;
    let result = copy_set(&set);
    for other in &args.positional {
        for item in protocol::collect(ctx, other)? {
            dict::set_discard(ctx, &result, &item)?;
        }
    }
    Ok(Value::Object(result))
}

fn set_symmetric_difference(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "symmetric_difference")?;
    args.expect("symmetric_difference", 1, 1)?;
    let other = as_set(ctx, &args.positional[0])?;
    let result = dict::new_set();
    for item in members(&set) {
        if !dict::dict_contains(ctx, &other, &item)? {
            dict::set_add(ctx, &result, item)?;
        }
    }
    for item in members(&other) {
        if !dict::dict_contains(ctx, &set, &item)? {
            dict::set_add(ctx, &result, item)?;
        }
    }
    Ok(Value::Object(result))
}

/// Whether every member of `inner` is in `outer`.
fn contained(ctx: &mut dyn CallContext, inner: &ObjectRef, outer: &ObjectRef) -> RtResult<bool> {
    for item in members(inner) {
        if !dict::dict_contains(ctx, outer, &item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn set_issubset(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "issubset")?;
    args.expect("issubset", 1, 1)?;
    let other = as_set(ctx, &args.positional[0])?;
    contained(ctx, &set, &other).map(Value::Bool)
}

fn set_issuperset(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "issuperset")?;
    args.expect("issuperset", 1, 1)?;
    let other = as_set(ctx, &args.positional[0])?;
    contained(ctx, &other, &set).map(Value::Bool)
}

fn set_isdisjoint(ctx: &mut dyn CallContext, mut args: Args) -> RtResult<Value> {
    let set = set_self(ctx, &mut args, "isdisjoint")?;
    args.expect("isdisjoint", 1, 1)?;
    for item in protocol::collect(ctx, &args.positional[0])? {
        if dict::dict_contains(ctx, &set, &item)? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::builtins::tests::{error, output};

    #[test]
    fn list_methods_mutate_in_place() {
        let source = indoc! {"
            items = [3, 1, 2]
            items.append(4)
            items.extend((5, 6))
            items.insert(0, 0)
            items.insert(-100, -1)
            print(items, items.pop(), items.pop(0), items.index(2), items.count(1))
            items.remove(3)
            items.reverse()
            print(items)
        "};
        assert_eq!(
            output(source),
            "[0, 3, 1, 2, 4, 5] 6 -1 3 1\n[5, 4, 2, 1, 0]\n"
        );
    }

    #[test]
    fn sort_is_stable_and_honours_key_and_reverse() {
        let source = indoc! {"
            words = ['bb', 'a', 'ccc', 'dd', 'e']
            words.sort(key=len)
            print(words)
            words.sort(key=len, reverse=True)
            print(words)
            print(sorted([3, 1, 2]), sorted('cab', reverse=True))
        "};
        assert_eq!(
            output(source),
            "['a', 'e', 'bb', 'dd', 'ccc']\n['ccc', 'bb', 'dd', 'a', 'e']\n[1, 2, 3] ['c', 'b', 'a']\n"
        );
    }

    #[test]
    fn sorting_mixed_types_fails_and_keeps_the_list() {
        let source = indoc! {"
            items = [1, 'a']
            try:
                items.sort()
            except TypeError as exc:
                print(exc)
            print(items)
        "};
        assert_eq!(
            output(source),
            "'<' not supported between instances of 'str' and 'int'\n[1, 'a']\n"
        );
    }

    #[test]
    fn list_lookups_report_missing_items() {
        assert_eq!(error("[1].index(5)"), "ValueError: 5 is not in list");
        assert_eq!(error("[].pop()"), "IndexError: pop from empty list");
        assert_eq!(error("[1].remove(2)"), "ValueError: list.remove(x): x not in list");
    }

    #[test]
    fn dict_methods() {
        let source = indoc! {"
            d = {'a': 1}
            d.update({'b': 2}, c=3)
            d.update([('d', 4)])
            print(d.get('a'), d.get('z'), d.get('z', 0), d.setdefault('e', 5))
            print(d.pop('a'), d.pop('z', None), d.popitem())
            print(d.keys(), d.values(), d.items())
            print(dict.fromkeys('xy', 0), d.copy() == d)
        "};
        assert_eq!(
            output(source),
            concat!(
                "1 None 0 5\n",
                "1 None ('e', 5)\n",
                "['b', 'c', 'd'] [2, 3, 4] [('b', 2), ('c', 3), ('d', 4)]\n",
                "{'x': 0, 'y': 0} True\n",
            )
        );
    }

    #[test]
    fn dict_update_rejects_bad_pairs() {
        assert_eq!(
            error("{}.update([(1, 2, 3)])"),
            "ValueError: dictionary update sequence element #0 has length 3; 2 is required"
        );
        assert_eq!(error("{}.pop('k')"), "KeyError: 'k'");
    }

    #[test]
    fn set_algebra() {
        let source = indoc! {"
            a = {1, 2, 3}
            b = [2, 3, 4]
            print(a.union(b), a.intersection(b), a.difference(b), a.symmetric_difference(b))
            print(a.issubset([1, 2, 3, 4]), a.issuperset({1}), a.isdisjoint([9]))
            a.discard(9)
            a.remove(1)
            a.add(7)
            print(sorted(a), len(a.copy()))
        "};
        assert_eq!(
            output(source),
            "{1, 2, 3, 4} {2, 3} {1} {1, 4}\nTrue True True\n[2, 3, 7] 3\n"
        );
    }

    #[test]
    fn containers_are_unhashable() {
        assert_eq!(error("{[1]: 2}"), "TypeError: unhashable type: 'list'");
        assert_eq!(error("hash({})"), "TypeError: unhashable type: 'dict'");
    }
}
