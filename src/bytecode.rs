//! Code objects, the instruction set they carry, and the emitter that
//! serialises lowered IR into them.

mod code;
mod disasm;
mod emitter;
mod instruction;

pub(crate) use code::ConstKey;
pub use code::{CodeFlags, CodeObject, Constant, ExceptionTableEntry, ParamSpec};
pub use disasm::disassemble;
pub(crate) use emitter::emit;
pub use instruction::{
    Conversion, Instruction, MAKE_CLOSURE, MAKE_DEFAULTS, MAKE_KWDEFAULTS, Slot,
};
