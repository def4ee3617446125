//! `list` and `tuple` storage plus the index and slice arithmetic shared by
//! every sequence type.

use std::any::Any;

use crate::runtime::class::{ClassRef, Types};
use crate::runtime::error::{RtResult, RuntimeError};
use crate::runtime::object::RuntimeObject;
use crate::runtime::value::Value;

#[derive(Debug, Clone, Default)]
pub struct ListObject {
    pub items: Vec<Value>,
}

impl ListObject {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl RuntimeObject for ListObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn class(&self, types: &Types) -> ClassRef {
        types.list.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TupleObject {
    pub items: Vec<Value>,
}

impl TupleObject {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl RuntimeObject for TupleObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn class(&self, types: &Types) -> ClassRef {
        types.tuple.clone()
    }
}

/// Resolves a possibly negative index against `len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

pub fn index_or_error(index: i64, len: usize, type_name: &str) -> RtResult<usize> {
    normalize_index(index, len)
        .ok_or_else(|| RuntimeError::index_error(format!("{type_name} index out of range")))
}

/// Concrete `(start, stop, step)` of a slice applied to a sequence of `len`
/// items, clamped the way Python clamps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceIndices {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl SliceIndices {
    pub fn resolve(start: Option<i64>, stop: Option<i64>, step: Option<i64>, len: usize) -> RtResult<Self> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(RuntimeError::value_error("slice step cannot be zero"));
        }
        let len = len as i64;
        let clamp = |value: Option<i64>, default: i64| -> i64 {
            match value {
                None => default,
                Some(value) if value < 0 => {
                    let value = value + len;
                    if value < 0 {
                        if step < 0 { -1 } else { 0 }
                    } else {
                        value
                    }
                }
                Some(value) if value >= len => {
                    if step < 0 { len - 1 } else { len }
                }
                Some(value) => value,
            }
        };
        let (start, stop) = if step > 0 {
            (clamp(start, 0), clamp(stop, len))
        } else {
            (clamp(start, len - 1), clamp(stop, -1))
        };
        Ok(Self { start, stop, step })
    }

    /// Positions selected by the slice, in order.
    pub fn positions(self) -> impl Iterator<Item = usize> {
        let Self { start, stop, step } = self;
        let mut current = start;
        std::iter::from_fn(move || {
            let inside = if step > 0 { current < stop } else { current > stop };
            if !inside {
                return None;
            }
            let position = current as usize;
            current += step;
            Some(position)
        })
    }

    pub fn count(self) -> usize {
        self.positions().count()
    }

    pub fn select<T: Clone>(self, items: &[T]) -> Vec<T> {
        self.positions().map(|position| items[position].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Vec<i32> {
        let items = [0, 1, 2, 3, 4, 5];
        SliceIndices::resolve(start, stop, step, items.len())
            .expect("valid slice")
            .select(&items)
    }

    #[test]
    fn slices_clamp_like_python() {
        assert_eq!(select(Some(1), Some(4), None), [1, 2, 3]);
        assert_eq!(select(Some(-2), None, None), [4, 5]);
        assert_eq!(select(None, None, Some(-1)), [5, 4, 3, 2, 1, 0]);
        assert_eq!(select(Some(10), None, None), Vec::<i32>::new());
        assert_eq!(select(None, Some(-10), Some(-2)), [5, 3, 1]);
        assert_eq!(select(Some(-100), Some(100), Some(2)), [0, 2, 4]);
    }

    #[test]
    fn zero_step_is_rejected() {
        assert!(SliceIndices::resolve(None, None, Some(0), 3).is_err());
    }

    #[test]
    fn negative_indices_wrap_once() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(3, 3), None);
    }
}
