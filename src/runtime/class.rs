//! Classes, instances and the method resolution order.
//!
//! Builtin types are ordinary `ClassObject`s whose dictionaries hold native
//! methods, so `type()`, `isinstance` and attribute lookup go through the same
//! MRO walk for builtin and user-defined classes alike.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;

use crate::runtime::error::{ExceptionKind, MroError, RtResult, RuntimeError};
use crate::runtime::object::{NativeFn, RuntimeObject};
use crate::runtime::value::Value;

pub type ClassRef = Rc<ClassObject>;
pub type AttrMap = IndexMap<String, Value, FxBuildHasher>;

/// How instances of a class are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Plain instances with an attribute dictionary.
    Object,
    /// Instances carry exception state; the kind is the nearest builtin ancestor.
    Exception(ExceptionKind),
    /// A builtin type whose instances are native values. Cannot be subclassed.
    Builtin,
}

#[derive(Debug)]
pub struct ClassObject {
    pub name: String,
    pub qualname: String,
    pub bases: Vec<ClassRef>,
    /// Linearisation without the class itself.
    mro_tail: Vec<ClassRef>,
    pub dict: RefCell<AttrMap>,
    pub kind: ClassKind,
    /// Native constructor used when the class is called.
    pub constructor: Option<NativeFn>,
}

impl ClassObject {
    fn builtin(
        name: &str,
        base: Option<&ClassRef>,
        kind: ClassKind,
        constructor: Option<NativeFn>,
    ) -> ClassRef {
        Rc::new(ClassObject {
            name: name.to_string(),
            qualname: name.to_string(),
            bases: base.into_iter().cloned().collect(),
            mro_tail: base.map(mro).unwrap_or_default(),
            dict: RefCell::new(AttrMap::default()),
            kind,
            constructor,
        })
    }

    /// Creates a class from its bases and executed body namespace.
    pub fn create(
        name: &str,
        qualname: &str,
        bases: Vec<ClassRef>,
        dict: AttrMap,
    ) -> RtResult<ClassRef> {
        let mut kind = ClassKind::Object;
        for base in &bases {
            match base.kind {
                ClassKind::Builtin => {
                    return Err(RuntimeError::type_error(format!(
                        "type '{}' is not an acceptable base type",
                        base.name
                    )));
                }
                ClassKind::Exception(found) if kind == ClassKind::Object => {
                    kind = ClassKind::Exception(found);
                }
                _ => {}
            }
        }
        let mro_tail = linearize(&bases)?;
        let mut dict = dict;
        if dict.contains_key("__eq__") && !dict.contains_key("__hash__") {
            dict.insert("__hash__".to_string(), Value::None);
        }
        Ok(Rc::new(ClassObject {
            name: name.to_string(),
            qualname: qualname.to_string(),
            bases,
            mro_tail,
            dict: RefCell::new(dict),
            kind,
            constructor: None,
        }))
    }

    /// Finds `name` in this class or the first class of its MRO defining it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.dict.borrow().get(name) {
            return Some(value.clone());
        }
        self.mro_tail
            .iter()
            .find_map(|class| class.dict.borrow().get(name).cloned())
    }

    /// Like `lookup`, also reporting the class that supplied the attribute.
    pub fn lookup_with_owner(self: &Rc<Self>, name: &str) -> Option<(ClassRef, Value)> {
        mro(self).into_iter().find_map(|class| {
            let found = class.dict.borrow().get(name).cloned();
            found.map(|value| (class, value))
        })
    }

    pub fn mro_tail(&self) -> &[ClassRef] {
        &self.mro_tail
    }

    pub fn insert(&self, name: &str, value: Value) {
        self.dict.borrow_mut().insert(name.to_string(), value);
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.kind, ClassKind::Exception(_))
    }
}

/// The full MRO of `class`, starting with itself.
pub fn mro(class: &ClassRef) -> Vec<ClassRef> {
    let mut result = Vec::with_capacity(class.mro_tail.len() + 1);
    result.push(class.clone());
    result.extend(class.mro_tail.iter().cloned());
    result
}

pub fn is_subclass(class: &ClassRef, base: &ClassRef) -> bool {
    Rc::ptr_eq(class, base) || class.mro_tail.iter().any(|entry| Rc::ptr_eq(entry, base))
}

/// C3 linearisation of `bases`, excluding the class being created.
pub fn linearize(bases: &[ClassRef]) -> Result<Vec<ClassRef>, MroError> {
    for (index, base) in bases.iter().enumerate() {
        if bases[..index].iter().any(|earlier| Rc::ptr_eq(earlier, base)) {
            return Err(MroError {
                bases: vec![base.name.clone(), base.name.clone()],
            });
        }
    }
    let mut sequences: Vec<Vec<ClassRef>> = bases.iter().map(mro).collect();
    sequences.push(bases.to_vec());
    let mut result = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let candidate = sequences
            .iter()
            .map(|sequence| &sequence[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|sequence| sequence[1..].iter().any(|class| Rc::ptr_eq(class, head)))
            })
            .cloned();
        let Some(next) = candidate else {
            return Err(MroError {
                bases: bases.iter().map(|base| base.name.clone()).collect(),
            });
        };
        for sequence in &mut sequences {
            if Rc::ptr_eq(&sequence[0], &next) {
                sequence.remove(0);
            }
        }
        result.push(next);
    }
}

/// Location recorded for each frame an exception unwinds through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub name: String,
    pub line: u32,
}

/// Instance of a user-defined class (or of a builtin exception class).
#[derive(Debug)]
pub struct InstanceObject {
    pub class: ClassRef,
    pub dict: AttrMap,
    /// Frames unwound so far; only used by exception instances.
    pub trace: Vec<TraceEntry>,
}

impl InstanceObject {
    pub fn new(class: ClassRef) -> Self {
        Self {
            class,
            dict: AttrMap::default(),
            trace: Vec::new(),
        }
    }
}

impl RuntimeObject for InstanceObject {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn class(&self, _types: &Types) -> ClassRef {
        self.class.clone()
    }
}

/// Registry of builtin classes for one interpreter.
#[derive(Debug)]
pub struct Types {
    pub object: ClassRef,
    pub type_: ClassRef,
    pub int: ClassRef,
    pub bool: ClassRef,
    pub float: ClassRef,
    pub str: ClassRef,
    pub list: ClassRef,
    pub tuple: ClassRef,
    pub dict: ClassRef,
    pub set: ClassRef,
    pub range: ClassRef,
    pub slice: ClassRef,
    pub none_type: ClassRef,
    pub not_implemented_type: ClassRef,
    pub ellipsis_type: ClassRef,
    pub function: ClassRef,
    pub builtin_function: ClassRef,
    pub method: ClassRef,
    pub generator: ClassRef,
    pub coroutine: ClassRef,
    pub iterator: ClassRef,
    pub cell: ClassRef,
    pub code: ClassRef,
    pub property: ClassRef,
    pub staticmethod: ClassRef,
    pub classmethod: ClassRef,
    pub super_: ClassRef,
    exceptions: Vec<ClassRef>,
}

/// Constructors of builtin classes, supplied by the builtins module.
#[derive(Default)]
pub struct Constructors {
    pub object: Option<NativeFn>,
    pub type_: Option<NativeFn>,
    pub int: Option<NativeFn>,
    pub bool: Option<NativeFn>,
    pub float: Option<NativeFn>,
    pub str: Option<NativeFn>,
    pub list: Option<NativeFn>,
    pub tuple: Option<NativeFn>,
    pub dict: Option<NativeFn>,
    pub set: Option<NativeFn>,
    pub range: Option<NativeFn>,
    pub slice: Option<NativeFn>,
    pub property: Option<NativeFn>,
    pub staticmethod: Option<NativeFn>,
    pub classmethod: Option<NativeFn>,
    pub super_: Option<NativeFn>,
}

impl Types {
    pub fn new(constructors: Constructors) -> Self {
        use ClassKind::Builtin;
        let object = ClassObject::builtin("object", None, ClassKind::Object, constructors.object);
        let base = Some(&object);
        let int = ClassObject::builtin("int", base, Builtin, constructors.int);
        let bool = ClassObject::builtin("bool", Some(&int), Builtin, constructors.bool);

        let mut exceptions: Vec<ClassRef> = Vec::with_capacity(ExceptionKind::ALL.len());
        for kind in ExceptionKind::ALL {
            let parent = match kind.base() {
                Some(parent) => exceptions[parent as usize].clone(),
                None => object.clone(),
            };
            exceptions.push(ClassObject::builtin(
                kind.name(),
                Some(&parent),
                ClassKind::Exception(kind),
                None,
            ));
        }

        Self {
            type_: ClassObject::builtin("type", base, Builtin, constructors.type_),
            float: ClassObject::builtin("float", base, Builtin, constructors.float),
            str: ClassObject::builtin("str", base, Builtin, constructors.str),
            list: ClassObject::builtin("list", base, Builtin, constructors.list),
            tuple: ClassObject::builtin("tuple", base, Builtin, constructors.tuple),
            dict: ClassObject::builtin("dict", base, Builtin, constructors.dict),
            set: ClassObject::builtin("set", base, Builtin, constructors.set),
            range: ClassObject::builtin("range", base, Builtin, constructors.range),
            slice: ClassObject::builtin("slice", base, Builtin, constructors.slice),
            none_type: ClassObject::builtin("NoneType", base, Builtin, None),
            not_implemented_type: ClassObject::builtin("NotImplementedType", base, Builtin, None),
            ellipsis_type: ClassObject::builtin("ellipsis", base, Builtin, None),
            function: ClassObject::builtin("function", base, Builtin, None),
            builtin_function: ClassObject::builtin("builtin_function_or_method", base, Builtin, None),
            method: ClassObject::builtin("method", base, Builtin, None),
            generator: ClassObject::builtin("generator", base, Builtin, None),
            coroutine: ClassObject::builtin("coroutine", base, Builtin, None),
            iterator: ClassObject::builtin("iterator", base, Builtin, None),
            cell: ClassObject::builtin("cell", base, Builtin, None),
            code: ClassObject::builtin("code", base, Builtin, None),
            property: ClassObject::builtin("property", base, Builtin, constructors.property),
            staticmethod: ClassObject::builtin("staticmethod", base, Builtin, constructors.staticmethod),
            classmethod: ClassObject::builtin("classmethod", base, Builtin, constructors.classmethod),
            super_: ClassObject::builtin("super", base, Builtin, constructors.super_),
            int,
            bool,
            object,
            exceptions,
        }
    }

    pub fn exception(&self, kind: ExceptionKind) -> &ClassRef {
        &self.exceptions[kind as usize]
    }

    pub fn exception_classes(&self) -> &[ClassRef] {
        &self.exceptions
    }

    /// Every builtin class, for installing into the builtins namespace.
    pub fn named_classes(&self) -> Vec<&ClassRef> {
        let mut classes = vec![
            &self.object,
            &self.type_,
            &self.int,
            &self.bool,
            &self.float,
            &self.str,
            &self.list,
            &self.tuple,
            &self.dict,
            &self.set,
            &self.range,
            &self.slice,
            &self.property,
            &self.staticmethod,
            &self.classmethod,
            &self.super_,
        ];
        classes.extend(self.exceptions.iter());
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> Types {
        Types::new(Constructors::default())
    }

    fn class(name: &str, bases: &[&ClassRef]) -> ClassRef {
        ClassObject::create(
            name,
            name,
            bases.iter().map(|base| (*base).clone()).collect(),
            AttrMap::default(),
        )
        .expect("valid class")
    }

    fn names(class: &ClassRef) -> Vec<String> {
        mro(class).iter().map(|entry| entry.name.clone()).collect()
    }

    #[test]
    fn unrelated_bases_are_searched_left_to_right() {
        let types = types();
        let a = class("A", &[&types.object]);
        let b = class("B", &[&types.object]);
        let c = class("C", &[&a, &b]);
        assert_eq!(names(&c), ["C", "A", "B", "object"]);
    }

    #[test]
    fn diamond_visits_shared_base_last() {
        let types = types();
        let base = class("Base", &[&types.object]);
        let left = class("Left", &[&base]);
        let right = class("Right", &[&base]);
        let bottom = class("Bottom", &[&left, &right]);
        assert_eq!(names(&bottom), ["Bottom", "Left", "Right", "Base", "object"]);
    }

    #[test]
    fn contradictory_orders_have_no_linearisation() {
        let types = types();
        let a = class("A", &[&types.object]);
        let b = class("B", &[&a]);
        let error = ClassObject::create("C", "C", vec![a.clone(), b.clone()], AttrMap::default())
            .unwrap_err();
        assert!(error.to_string().contains("consistent method resolution order"));
    }

    #[test]
    fn lookup_follows_mro_and_first_match_wins() {
        let types = types();
        let a = class("A", &[&types.object]);
        let b = class("B", &[&types.object]);
        a.insert("x", Value::Int(1));
        b.insert("x", Value::Int(2));
        b.insert("y", Value::Int(3));
        let c = class("C", &[&a, &b]);
        assert!(matches!(c.lookup("x"), Some(Value::Int(1))));
        assert!(matches!(c.lookup("y"), Some(Value::Int(3))));
        assert!(c.lookup("z").is_none());
    }

    #[test]
    fn exception_classes_form_the_builtin_hierarchy() {
        let types = types();
        let zero = types.exception(ExceptionKind::ZeroDivisionError);
        assert!(is_subclass(zero, types.exception(ExceptionKind::ArithmeticError)));
        assert!(is_subclass(zero, types.exception(ExceptionKind::BaseException)));
        assert!(!is_subclass(zero, types.exception(ExceptionKind::LookupError)));
        let custom = class("Custom", &[types.exception(ExceptionKind::ValueError)]);
        assert_eq!(custom.kind, ClassKind::Exception(ExceptionKind::ValueError));
    }

    #[test]
    fn builtin_types_reject_subclassing() {
        let types = types();
        let error = ClassObject::create("L", "L", vec![types.list.clone()], AttrMap::default())
            .unwrap_err();
        assert!(error.to_string().contains("not an acceptable base type"));
    }

    #[test]
    fn defining_eq_without_hash_makes_instances_unhashable() {
        let types = types();
        let mut dict = AttrMap::default();
        dict.insert("__eq__".to_string(), Value::None);
        let class = ClassObject::create("K", "K", vec![types.object.clone()], dict).expect("class");
        assert!(matches!(class.lookup("__hash__"), Some(Value::None)));
    }
}
