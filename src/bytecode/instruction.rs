use std::fmt;

use crate::ast::{BinaryOperator, ComparisonOperator, UnaryOperator};

/// `MakeFunction` flag: a tuple of positional defaults is on the stack.
pub const MAKE_DEFAULTS: u32 = 0x01;
/// `MakeFunction` flag: a dict of keyword-only defaults is on the stack.
pub const MAKE_KWDEFAULTS: u32 = 0x02;
/// `MakeFunction` flag: a tuple of closure cells is on the stack.
pub const MAKE_CLOSURE: u32 = 0x08;

/// Conversion applied by `FormatValue` before formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    None,
    Str,
    Repr,
    Ascii,
}

impl Conversion {
    pub fn from_char(flag: Option<char>) -> Self {
        match flag {
            Some('s') => Self::Str,
            Some('r') => Self::Repr,
            Some('a') => Self::Ascii,
            _ => Self::None,
        }
    }
}

/// Storage slot addressed by the match-guard save/restore pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Fast(u32),
    Deref(u32),
    Global(u32),
    Name(u32),
}

/// One VM instruction. Operands are indices into the owning code object's
/// tables (constants, names, varnames, cells) or absolute jump targets.
///
/// Stack notation in the docs lists items bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    PopTop,
    /// Push a copy of the i-th item (1 = top).
    Copy(u32),
    /// Swap the top with the i-th item (2 = second).
    Swap(u32),

    LoadConst(u32),
    LoadFast(u32),
    StoreFast(u32),
    DeleteFast(u32),
    /// Cell operands index cellvars followed by freevars.
    LoadDeref(u32),
    StoreDeref(u32),
    DeleteDeref(u32),
    /// Class body read of a captured name: namespace first, then the cell.
    LoadClassDeref(u32),
    /// Push the cell object itself (for building closures).
    LoadClosure(u32),
    LoadGlobal(u32),
    StoreGlobal(u32),
    DeleteGlobal(u32),
    LoadName(u32),
    StoreName(u32),
    DeleteName(u32),
    /// Push the current value of a binding, or an unbound marker.
    SaveBinding(Slot),
    /// Pop a value pushed by `SaveBinding` and write it back (unbinding on the marker).
    RestoreBinding(Slot),

    LoadAttr(u32),
    /// [value, owner] -> []
    StoreAttr(u32),
    DeleteAttr(u32),
    BinarySubscr,
    /// [value, container, index] -> []
    StoreSubscr,
    DeleteSubscr,
    BuildSlice(u32),

    BinaryOp {
        op: BinaryOperator,
        inplace: bool,
    },
    UnaryOp(UnaryOperator),
    /// Rich comparison; never `is`/`in`.
    CompareOp(ComparisonOperator),
    /// `is` (false) or `is not` (true).
    IsOp(bool),
    /// `in` (false) or `not in` (true).
    ContainsOp(bool),

    BuildTuple(u32),
    BuildList(u32),
    BuildSet(u32),
    /// Pops `n` key/value pairs.
    BuildMap(u32),
    BuildString(u32),
    /// Pop a value and append it to the list at depth i (after the pop).
    ListAppend(u32),
    SetAdd(u32),
    /// Pop key and value and insert them into the dict at depth i.
    MapAdd(u32),
    ListExtend(u32),
    SetUpdate(u32),
    DictUpdate(u32),
    /// Like `DictUpdate` but rejects duplicate keys (call keyword arguments).
    DictMerge(u32),
    ListToTuple,
    FormatValue {
        conversion: Conversion,
        has_spec: bool,
    },

    UnpackSequence(u32),
    /// Unpack with one starred target: `before` items, a list, `after` items.
    UnpackEx {
        before: u32,
        after: u32,
    },

    Jump(u32),
    PopJumpIfFalse(u32),
    PopJumpIfTrue(u32),
    PopJumpIfNone(u32),
    PopJumpIfNotNone(u32),
    JumpIfFalseOrPop(u32),
    JumpIfTrueOrPop(u32),
    /// [iter] -> [iter, next]; on exhaustion pops the iterator and jumps.
    ForIter(u32),
    /// [iter, value] -> [iter, yielded]; on return -> [result] and jumps.
    Send(u32),

    GetIter,
    GetYieldFromIter,
    GetAwaitable,

    MakeFunction(u32),
    /// [callable, args...] -> [result]
    Call(u32),
    /// [callable, args..., kwvalues..., names] -> [result]
    CallKw(u32),
    /// [callable, args tuple, kwargs dict?] -> [result]
    CallEx {
        has_kwargs: bool,
    },
    ReturnValue,
    YieldValue,

    LoadBuildClass,
    LoadAssertionError,

    /// 0: re-raise the active exception, 1: raise TOS, 2: raise with cause.
    Raise(u32),
    Reraise,
    /// [exc] -> [previous active exception, exc]; makes exc active.
    PushExcInfo,
    /// Pop a saved exception and make it active again.
    PopExcept,
    /// [exc, type] -> [exc, matches]
    CheckExcMatch,
    /// [exc, type] -> [rest, match] (match is None when nothing matched)
    CheckEgMatch,
    /// [original, raised list] -> [exception to re-raise or None]
    PrepReraiseStar,
    /// [manager] -> [exit, enter result]
    BeforeWith,
    /// [exit, prev, exc] -> [exit, prev, exc, exit(type, exc, tb)]
    WithExceptStart,

    MatchSequence,
    MatchMapping,
    /// [subject, keys] -> [subject, keys, values or None]
    MatchKeys,
    /// [subject, class, kw names] -> [attributes or None]
    MatchClass(u32),
    GetLen,
    /// [subject, keys] -> [copy of subject without keys]
    CopyDictWithoutKeys,
}

impl Instruction {
    pub fn jump_target(self) -> Option<u32> {
        match self {
            Self::Jump(target)
            | Self::PopJumpIfFalse(target)
            | Self::PopJumpIfTrue(target)
            | Self::PopJumpIfNone(target)
            | Self::PopJumpIfNotNone(target)
            | Self::JumpIfFalseOrPop(target)
            | Self::JumpIfTrueOrPop(target)
            | Self::ForIter(target)
            | Self::Send(target) => Some(target),
            _ => None,
        }
    }

    /// Control never falls through to the next instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Self::Jump(_) | Self::ReturnValue | Self::Raise(_) | Self::Reraise
        )
    }

    /// Net stack effect when execution falls through (`jump == false`) or takes
    /// the branch (`jump == true`).
    pub fn stack_effect(self, jump: bool) -> i32 {
        match self {
            Self::Nop | Self::Swap(_) => 0,
            Self::PopTop => -1,
            Self::Copy(_) => 1,

            Self::LoadConst(_)
            | Self::LoadFast(_)
            | Self::LoadDeref(_)
            | Self::LoadClassDeref(_)
            | Self::LoadClosure(_)
            | Self::LoadGlobal(_)
            | Self::LoadName(_)
            | Self::SaveBinding(_)
            | Self::LoadBuildClass
            | Self::LoadAssertionError => 1,
            Self::StoreFast(_)
            | Self::StoreDeref(_)
            | Self::StoreGlobal(_)
            | Self::StoreName(_)
            | Self::RestoreBinding(_) => -1,
            Self::DeleteFast(_)
            | Self::DeleteDeref(_)
            | Self::DeleteGlobal(_)
            | Self::DeleteName(_) => 0,

            Self::LoadAttr(_) => 0,
            Self::StoreAttr(_) => -2,
            Self::DeleteAttr(_) => -1,
            Self::BinarySubscr => -1,
            Self::StoreSubscr => -3,
            Self::DeleteSubscr => -2,
            Self::BuildSlice(n) => 1 - n as i32,

            Self::BinaryOp { .. } => -1,
            Self::UnaryOp(_) => 0,
            Self::CompareOp(_) | Self::IsOp(_) | Self::ContainsOp(_) => -1,

            Self::BuildTuple(n) | Self::BuildList(n) | Self::BuildSet(n) | Self::BuildString(n) => {
                1 - n as i32
            }
            Self::BuildMap(n) => 1 - 2 * n as i32,
            Self::ListAppend(_)
            | Self::SetAdd(_)
            | Self::ListExtend(_)
            | Self::SetUpdate(_)
            | Self::DictUpdate(_)
            | Self::DictMerge(_) => -1,
            Self::MapAdd(_) => -2,
            Self::ListToTuple => 0,
            Self::FormatValue { has_spec, .. } => {
                if has_spec {
                    -1
                } else {
                    0
                }
            }

            Self::UnpackSequence(n) => n as i32 - 1,
            Self::UnpackEx { before, after } => (before + after) as i32,

            Self::Jump(_) => 0,
            Self::PopJumpIfFalse(_)
            | Self::PopJumpIfTrue(_)
            | Self::PopJumpIfNone(_)
            | Self::PopJumpIfNotNone(_) => -1,
            Self::JumpIfFalseOrPop(_) | Self::JumpIfTrueOrPop(_) => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            Self::ForIter(_) => {
                if jump {
                    -1
                } else {
                    1
                }
            }
            Self::Send(_) => {
                if jump {
                    -1
                } else {
                    0
                }
            }

            Self::GetIter | Self::GetYieldFromIter | Self::GetAwaitable => 0,

            Self::MakeFunction(flags) => {
                -([MAKE_DEFAULTS, MAKE_KWDEFAULTS, MAKE_CLOSURE]
                    .iter()
                    .filter(|flag| flags & **flag != 0)
                    .count() as i32)
            }
            Self::Call(n) => -(n as i32),
            Self::CallKw(n) => -(n as i32) - 1,
            Self::CallEx { has_kwargs } => {
                if has_kwargs {
                    -2
                } else {
                    -1
                }
            }
            Self::ReturnValue => -1,
            Self::YieldValue => 0,

            Self::Raise(n) => -(n as i32),
            Self::Reraise => -1,
            Self::PushExcInfo => 1,
            Self::PopExcept => -1,
            Self::CheckExcMatch | Self::CheckEgMatch => 0,
            Self::PrepReraiseStar => -1,
            Self::BeforeWith => 1,
            Self::WithExceptStart => 1,

            Self::MatchSequence | Self::MatchMapping | Self::MatchKeys | Self::GetLen => 1,
            Self::MatchClass(_) => -2,
            Self::CopyDictWithoutKeys => -1,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinaryOp { op, inplace } => {
                if *inplace {
                    write!(f, "BinaryOp {}=", op.symbol())
                } else {
                    write!(f, "BinaryOp {}", op.symbol())
                }
            }
            Self::CompareOp(op) => write!(f, "CompareOp {}", op.symbol()),
            Self::UnaryOp(op) => write!(f, "UnaryOp {op:?}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_effects_differ_for_conditional_pops() {
        assert_eq!(Instruction::ForIter(0).stack_effect(false), 1);
        assert_eq!(Instruction::ForIter(0).stack_effect(true), -1);
        assert_eq!(Instruction::JumpIfTrueOrPop(0).stack_effect(true), 0);
        assert_eq!(Instruction::JumpIfTrueOrPop(0).stack_effect(false), -1);
    }

    #[test]
    fn make_function_pops_one_item_per_flag() {
        let flags = MAKE_DEFAULTS | MAKE_CLOSURE;
        assert_eq!(Instruction::MakeFunction(flags).stack_effect(false), -2);
        assert_eq!(Instruction::MakeFunction(0).stack_effect(false), 0);
    }

    #[test]
    fn terminators_have_no_fallthrough() {
        assert!(Instruction::Reraise.is_terminator());
        assert!(Instruction::Jump(3).is_terminator());
        assert!(!Instruction::PopJumpIfFalse(3).is_terminator());
        assert_eq!(Instruction::Jump(7).jump_target(), Some(7));
    }
}
