use std::sync::Arc;

use super::Instruction;

/// Literal stored in a code object's constant pool.
#[derive(Debug, Clone)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ellipsis,
    Tuple(Vec<Constant>),
    Code(Arc<CodeObject>),
}

/// Hashable identity of a constant, used to deduplicate the pool. Floats
/// compare by bit pattern so `0.0` and `-0.0` stay distinct; code objects by
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Ellipsis,
    Tuple(Vec<ConstKey>),
    Code(usize),
}

impl Constant {
    pub(crate) fn key(&self) -> ConstKey {
        match self {
            Constant::None => ConstKey::None,
            Constant::Bool(value) => ConstKey::Bool(*value),
            Constant::Int(value) => ConstKey::Int(*value),
            Constant::Float(value) => ConstKey::Float(value.to_bits()),
            Constant::Str(value) => ConstKey::Str(value.clone()),
            Constant::Ellipsis => ConstKey::Ellipsis,
            Constant::Tuple(items) => ConstKey::Tuple(items.iter().map(Constant::key).collect()),
            Constant::Code(code) => ConstKey::Code(Arc::as_ptr(code) as usize),
        }
    }

    pub fn str(value: impl Into<String>) -> Self {
        Constant::Str(value.into())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeFlags {
    pub is_generator: bool,
    pub is_coroutine: bool,
    /// Class body: `LoadName`/`StoreName` go to the class namespace.
    pub is_class_body: bool,
}

/// Shape of a function's formal parameters. Slots follow `varnames` order:
/// positional, keyword-only, then `*args`, then `**kwargs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSpec {
    pub posonly_count: u32,
    pub positional_count: u32,
    pub kwonly_count: u32,
    pub has_varargs: bool,
    pub has_varkw: bool,
}

impl ParamSpec {
    /// Number of local slots filled by argument binding.
    pub fn slot_count(&self) -> usize {
        (self.positional_count + self.kwonly_count) as usize
            + usize::from(self.has_varargs)
            + usize::from(self.has_varkw)
    }
}

/// `[start, end)` instructions protected by the handler at `target`. When an
/// exception is raised inside the range the operand stack is cut back to
/// `depth` items, the exception is pushed and execution resumes at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start: u32,
    pub end: u32,
    pub target: u32,
    pub depth: u32,
}

/// Immutable compiled form of one lexical scope.
#[derive(Debug, Clone)]
pub struct CodeObject {
    pub name: String,
    pub qualname: String,
    pub flags: CodeFlags,
    pub params: ParamSpec,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    /// For each cellvar, the parameter slot that initialises it.
    pub cell2arg: Vec<Option<u32>>,
    /// Sorted, non-overlapping; innermost handler only.
    pub exception_table: Vec<ExceptionTableEntry>,
    /// `(first offset, line)` pairs with strictly increasing offsets.
    pub line_table: Vec<(u32, u32)>,
    pub first_line: u32,
    pub max_stack: u32,
}

impl CodeObject {
    /// Handler covering `offset`, if any.
    pub fn handler_for(&self, offset: usize) -> Option<&ExceptionTableEntry> {
        let offset = offset as u32;
        let index = self
            .exception_table
            .partition_point(|entry| entry.end <= offset);
        self.exception_table
            .get(index)
            .filter(|entry| entry.start <= offset)
    }

    /// Source line of the instruction at `offset`.
    pub fn line_for(&self, offset: usize) -> u32 {
        let offset = offset as u32;
        let index = self
            .line_table
            .partition_point(|(start, _)| *start <= offset);
        match index {
            0 => self.first_line,
            _ => self.line_table[index - 1].1,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cellvars.len() + self.freevars.len()
    }

    /// Name of the cell or free variable at `index` in the combined cell list.
    pub fn cell_name(&self, index: usize) -> &str {
        if index < self.cellvars.len() {
            &self.cellvars[index]
        } else {
            &self.freevars[index - self.cellvars.len()]
        }
    }

    /// Nested code objects in the constant pool.
    pub fn children(&self) -> impl Iterator<Item = &Arc<CodeObject>> {
        self.constants.iter().filter_map(|constant| match constant {
            Constant::Code(code) => Some(code),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_with_table(table: Vec<ExceptionTableEntry>) -> CodeObject {
        CodeObject {
            name: "f".to_string(),
            qualname: "f".to_string(),
            flags: CodeFlags::default(),
            params: ParamSpec::default(),
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            cell2arg: Vec::new(),
            exception_table: table,
            line_table: vec![(0, 1), (4, 2), (9, 5)],
            first_line: 1,
            max_stack: 0,
        }
    }

    #[test]
    fn handler_lookup_respects_range_bounds() {
        let code = code_with_table(vec![
            ExceptionTableEntry { start: 2, end: 5, target: 20, depth: 0 },
            ExceptionTableEntry { start: 5, end: 8, target: 30, depth: 1 },
        ]);
        assert_eq!(code.handler_for(1), None);
        assert_eq!(code.handler_for(2).map(|e| e.target), Some(20));
        assert_eq!(code.handler_for(5).map(|e| e.target), Some(30));
        assert_eq!(code.handler_for(8), None);
    }

    #[test]
    fn line_lookup_uses_last_entry_at_or_before_offset() {
        let code = code_with_table(Vec::new());
        assert_eq!(code.line_for(0), 1);
        assert_eq!(code.line_for(5), 2);
        assert_eq!(code.line_for(40), 5);
    }

    #[test]
    fn float_constants_keep_sign_of_zero_apart() {
        assert_ne!(Constant::Float(0.0).key(), Constant::Float(-0.0).key());
        assert_eq!(Constant::Int(3).key(), Constant::Int(3).key());
    }

    #[test]
    fn code_objects_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CodeObject>();
    }
}
