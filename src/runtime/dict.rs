//! Hash tables behind `dict` and `set`.
//!
//! Storage preserves insertion order (`entries`) while `buckets` accelerates
//! lookup by hash. Bucket collisions are resolved by checking key equality,
//! which may call back into Python code, so lookups never hold a borrow of
//! the table while user `__eq__` runs.

use std::any::Any;
use std::cell::{Ref, RefMut};

use rustc_hash::FxHashMap;

use crate::runtime::class::{ClassRef, Types};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::object::{CallContext, ObjectRef, RuntimeObject, new_object};
use crate::runtime::protocol::{hash_value, native_eq, values_equal};
use crate::runtime::value::Value;

#[derive(Debug, Clone)]
struct DictEntry {
    hash: i64,
    key: Value,
    value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DictObject {
    entries: Vec<Option<DictEntry>>,
    buckets: FxHashMap<i64, Vec<usize>>,
    len: usize,
}

impl DictObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buckets.clear();
        self.len = 0;
    }

    fn bucket(&self, hash: i64) -> &[usize] {
        self.buckets.get(&hash).map(Vec::as_slice).unwrap_or_default()
    }

    fn key_at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index)?.as_ref().map(|entry| &entry.key)
    }

    pub fn value_at(&self, index: usize) -> Option<Value> {
        self.entries
            .get(index)?
            .as_ref()
            .map(|entry| entry.value.clone())
    }

    /// The first live key at or after entry slot `position`, with its slot.
    pub fn key_from(&self, position: usize) -> Option<(usize, Value)> {
        self.entries
            .iter()
            .enumerate()
            .skip(position)
            .find_map(|(slot, entry)| entry.as_ref().map(|entry| (slot, entry.key.clone())))
    }

    fn set_at(&mut self, index: usize, value: Value) {
        if let Some(Some(entry)) = self.entries.get_mut(index) {
            entry.value = value;
        }
    }

    fn push(&mut self, hash: i64, key: Value, value: Value) {
        let index = self.entries.len();
        self.entries.push(Some(DictEntry { hash, key, value }));
        self.buckets.entry(hash).or_default().push(index);
        self.len += 1;
    }

    fn remove_at(&mut self, index: usize) -> Option<(Value, Value)> {
        let entry = self.entries.get_mut(index)?.take()?;
        if let Some(bucket) = self.buckets.get_mut(&entry.hash) {
            bucket.retain(|candidate| *candidate != index);
            if bucket.is_empty() {
                self.buckets.remove(&entry.hash);
            }
        }
        self.len -= 1;
        if self.entries.len() > 16 && self.len * 2 < self.entries.len() {
            self.compact();
        }
        Some((entry.key, entry.value))
    }

    fn compact(&mut self) {
        let live: Vec<DictEntry> = self.entries.drain(..).flatten().collect();
        self.buckets.clear();
        self.len = 0;
        for entry in live {
            self.push(entry.hash, entry.key, entry.value);
        }
    }

    /// Removes the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let index = self.entries.iter().rposition(Option::is_some)?;
        self.remove_at(index)
    }

    /// Removes the oldest entry.
    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let index = self.entries.iter().position(Option::is_some)?;
        self.remove_at(index)
    }
}

impl RuntimeObject for DictObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn class(&self, types: &Types) -> ClassRef {
        types.dict.clone()
    }
}

/// A `set`: a hash table whose values are unused.
#[derive(Debug, Clone, Default)]
pub struct SetObject {
    pub table: DictObject,
}

impl RuntimeObject for SetObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn class(&self, types: &Types) -> ClassRef {
        types.set.clone()
    }
}

/// The hash table inside a dict or set object.
pub fn table(object: &ObjectRef) -> Option<Ref<'_, DictObject>> {
    Ref::filter_map(object.borrow(), |inner| {
        let any = inner.as_any();
        any.downcast_ref::<DictObject>()
            .or_else(|| any.downcast_ref::<SetObject>().map(|set| &set.table))
    })
    .ok()
}

pub fn table_mut(object: &ObjectRef) -> Option<RefMut<'_, DictObject>> {
    RefMut::filter_map(object.borrow_mut(), |inner| {
        let any = inner.as_any_mut();
        if any.is::<DictObject>() {
            any.downcast_mut::<DictObject>()
        } else {
            any.downcast_mut::<SetObject>().map(|set| &mut set.table)
        }
    })
    .ok()
}

fn expect_table(object: &ObjectRef) -> RtResult<Ref<'_, DictObject>> {
    table(object).ok_or_else(|| RuntimeError::type_error("expected a dict or set"))
}

fn expect_table_mut(object: &ObjectRef) -> RtResult<RefMut<'_, DictObject>> {
    table_mut(object).ok_or_else(|| RuntimeError::type_error("expected a dict or set"))
}

/// Hash of `key` and the index of its entry, if present.
fn lookup(
    ctx: &mut dyn CallContext,
    object: &ObjectRef,
    key: &Value,
) -> RtResult<(i64, Option<usize>)> {
    let hash = hash_value(ctx, key)?;
    let slow: Vec<(usize, Value)> = {
        let table = expect_table(object)?;
        let mut slow = Vec::new();
        for &index in table.bucket(hash) {
            let Some(candidate) = table.key_at(index) else {
                continue;
            };
            if candidate.is(key) {
                return Ok((hash, Some(index)));
            }
            match native_eq(candidate, key) {
                Some(true) => return Ok((hash, Some(index))),
                Some(false) => {}
                None => slow.push((index, candidate.clone())),
            }
        }
        slow
    };
    for (index, candidate) in slow {
        if values_equal(ctx, &candidate, key)? {
            return Ok((hash, Some(index)));
        }
    }
    Ok((hash, None))
}

pub fn new_dict() -> ObjectRef {
    new_object(DictObject::new())
}

pub fn new_set() -> ObjectRef {
    new_object(SetObject::default())
}

pub fn dict_from_pairs(
    ctx: &mut dyn CallContext,
    pairs: impl IntoIterator<Item = (Value, Value)>,
) -> RtResult<Value> {
    let dict = new_dict();
    for (key, value) in pairs {
        dict_set(ctx, &dict, key, value)?;
    }
    Ok(Value::Object(dict))
}

pub fn set_from_items(
    ctx: &mut dyn CallContext,
    items: impl IntoIterator<Item = Value>,
) -> RtResult<Value> {
    let set = new_set();
    for item in items {
        set_add(ctx, &set, item)?;
    }
    Ok(Value::Object(set))
}

pub fn dict_get(ctx: &mut dyn CallContext, dict: &ObjectRef, key: &Value) -> RtResult<Option<Value>> {
    let (_, index) = lookup(ctx, dict, key)?;
    Ok(index.and_then(|index| expect_table(dict).ok()?.value_at(index)))
}

pub fn dict_contains(ctx: &mut dyn CallContext, dict: &ObjectRef, key: &Value) -> RtResult<bool> {
    Ok(lookup(ctx, dict, key)?.1.is_some())
}

pub fn dict_set(ctx: &mut dyn CallContext, dict: &ObjectRef, key: Value, value: Value) -> RtResult<()> {
    let (hash, index) = lookup(ctx, dict, &key)?;
    let mut table = expect_table_mut(dict)?;
    match index {
        Some(index) => table.set_at(index, value),
        None => table.push(hash, key, value),
    }
    Ok(())
}

pub fn dict_remove(ctx: &mut dyn CallContext, dict: &ObjectRef, key: &Value) -> RtResult<Option<Value>> {
    let (_, index) = lookup(ctx, dict, key)?;
    let Some(index) = index else {
        return Ok(None);
    };
    Ok(expect_table_mut(dict)?.remove_at(index).map(|(_, value)| value))
}

pub fn set_add(ctx: &mut dyn CallContext, set: &ObjectRef, item: Value) -> RtResult<()> {
    let (hash, index) = lookup(ctx, set, &item)?;
    if index.is_none() {
        expect_table_mut(set)?.push(hash, item, Value::None);
    }
    Ok(())
}

/// Removes `item`; reports whether it was present.
pub fn set_discard(ctx: &mut dyn CallContext, set: &ObjectRef, item: &Value) -> RtResult<bool> {
    Ok(dict_remove(ctx, set, item)?.is_some())
}

pub fn key_error(ctx: &mut dyn CallContext, key: Value) -> RuntimeError {
    let error = RuntimeError::new(ExceptionKind::KeyError, String::new());
    let exception = ctx.materialize(error);
    crate::runtime::exception::set_args(&exception, vec![key]);
    RuntimeError::Object(exception)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_keeps_insertion_order_of_the_rest() {
        let mut table = DictObject::new();
        for (hash, key) in [(1, "a"), (2, "b"), (3, "c")] {
            table.push(hash, Value::str(key), Value::Int(hash));
        }
        let index = table.bucket(2)[0];
        table.remove_at(index);
        let keys: Vec<String> = table
            .keys()
            .iter()
            .map(|key| key.as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(keys, ["a", "c"]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn compaction_rebuilds_buckets() {
        let mut table = DictObject::new();
        for value in 0..40 {
            table.push(value, Value::Int(value), Value::Int(value * 10));
        }
        for value in 0..30 {
            let index = table.bucket(value)[0];
            table.remove_at(index);
        }
        assert_eq!(table.len(), 10);
        let index = table.bucket(35)[0];
        assert!(matches!(table.value_at(index), Some(Value::Int(350))));
    }

    #[test]
    fn key_from_skips_removed_slots() {
        let mut table = DictObject::new();
        for value in 0..3 {
            table.push(value, Value::Int(value), Value::None);
        }
        let index = table.bucket(1)[0];
        table.remove_at(index);
        assert!(matches!(table.key_from(1), Some((2, Value::Int(2)))));
        assert!(table.key_from(3).is_none());
    }

    #[test]
    fn pop_last_returns_newest_entry() {
        let mut table = DictObject::new();
        table.push(1, Value::Int(1), Value::Int(10));
        table.push(2, Value::Int(2), Value::Int(20));
        let (key, _) = table.pop_last().expect("entry");
        assert!(matches!(key, Value::Int(2)));
        assert_eq!(table.len(), 1);
    }
}
