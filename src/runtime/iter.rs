//! `range`, `slice` and the native iterator objects.

use crate::runtime::object::{ObjectRef, runtime_object};
use crate::runtime::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObject {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

runtime_object!(RangeObject, range);

impl RangeObject {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let count = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> i64 {
        self.start + self.step * index as i64
    }

    pub fn contains(&self, value: i64) -> bool {
        let inside = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        inside && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

#[derive(Debug, Clone)]
pub struct SliceObject {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

runtime_object!(SliceObject, slice);

/// Iterator over a live `list` or `tuple`: mutation during iteration is
/// visible, as in Python.
#[derive(Debug)]
pub struct SequenceIterator {
    pub source: Value,
    pub index: usize,
}

runtime_object!(SequenceIterator, iterator);

/// Iterator over the live keys of a `dict` or members of a `set`. A change in
/// the table's length between steps raises `RuntimeError`.
#[derive(Debug)]
pub struct TableIterator {
    pub source: ObjectRef,
    /// Next raw entry slot to inspect.
    pub position: usize,
    pub expected_len: usize,
}

runtime_object!(TableIterator, iterator);

/// Iterator over a fixed snapshot (string characters, reversed sequences).
#[derive(Debug)]
pub struct SnapshotIterator {
    pub items: Vec<Value>,
    pub index: usize,
}

runtime_object!(SnapshotIterator, iterator);

impl SnapshotIterator {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items, index: 0 }
    }
}

#[derive(Debug)]
pub struct RangeIterator {
    pub next: i64,
    pub remaining: usize,
    pub step: i64,
}

runtime_object!(RangeIterator, iterator);

#[derive(Debug)]
pub struct EnumerateIterator {
    pub inner: Value,
    pub count: i64,
}

runtime_object!(EnumerateIterator, iterator);

#[derive(Debug)]
pub struct ZipIterator {
    pub inners: Vec<Value>,
}

runtime_object!(ZipIterator, iterator);

#[derive(Debug)]
pub struct MapIterator {
    pub function: Value,
    pub inners: Vec<Value>,
}

runtime_object!(MapIterator, iterator);

#[derive(Debug)]
pub struct FilterIterator {
    /// `None` keeps truthy items.
    pub function: Value,
    pub inner: Value,
}

runtime_object!(FilterIterator, iterator);

/// `iter(callable, sentinel)`.
#[derive(Debug)]
pub struct CallableIterator {
    pub function: Value,
    pub sentinel: Value,
    pub done: bool,
}

runtime_object!(CallableIterator, iterator);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_length_rounds_toward_the_stop() {
        assert_eq!(RangeObject { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(RangeObject { start: 10, stop: 0, step: -3 }.len(), 4);
        assert_eq!(RangeObject { start: 5, stop: 5, step: 1 }.len(), 0);
        assert_eq!(RangeObject { start: 5, stop: 0, step: 1 }.len(), 0);
    }

    #[test]
    fn range_membership_respects_step() {
        let range = RangeObject { start: 1, stop: 10, step: 3 };
        assert!(range.contains(7));
        assert!(!range.contains(8));
        assert!(!range.contains(10));
        let down = RangeObject { start: 10, stop: 0, step: -2 };
        assert!(down.contains(2));
        assert!(!down.contains(0));
    }
}
