//! The builtins namespace and the native methods of builtin classes.
//!
//! Builtin classes are ordinary `ClassObject`s: their constructors live in
//! `types`, and their methods are `NativeFunction`s installed in the class
//! dictionaries, so lookup on `[].append` walks the same MRO as lookup on a
//! user-defined class.

mod containers;
mod functions;
mod objects;
mod strings;
mod types;

use crate::runtime::class::{ClassRef, Constructors, Types};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::function::{Namespace, NativeFunction, new_namespace};
use crate::runtime::object::{Args, CallContext, NativeFn, new_object};
use crate::runtime::protocol::{self, type_name};
use crate::runtime::value::Value;

pub(crate) fn constructors() -> Constructors {
    types::constructors()
}

/// Fills the dictionaries of the builtin classes.
pub(crate) fn install_methods(types: &Types) {
    objects::install(types);
    types::install(types);
    strings::install(types);
    containers::install(types);
}

/// A fresh builtins namespace: every builtin class and function by name.
pub(crate) fn namespace(types: &Types) -> Namespace {
    let namespace = new_namespace();
    {
        let mut names = namespace.borrow_mut();
        for class in types.named_classes() {
            names.insert(class.name.clone(), Value::Class(class.clone()));
        }
        for &(name, func) in functions::FUNCTIONS {
            names.insert(name.to_string(), function(name, func));
        }
        names.insert("NotImplemented".to_string(), Value::NotImplemented);
        names.insert("Ellipsis".to_string(), Value::Ellipsis);
    }
    namespace
}

/// A builtin that never binds a receiver.
pub(crate) fn function(name: &'static str, func: NativeFn) -> Value {
    Value::Object(new_object(NativeFunction {
        name,
        func,
        binds: false,
    }))
}

fn method(name: &'static str, func: NativeFn) -> Value {
    Value::Object(new_object(NativeFunction {
        name,
        func,
        binds: true,
    }))
}

fn add_methods(class: &ClassRef, methods: &[(&'static str, NativeFn)]) {
    for &(name, func) in methods {
        class.insert(name, method(name, func));
    }
}

/// Removes the receiver of a method call.
fn take_self(args: &mut Args, class: &str, name: &str) -> RtResult<Value> {
    if args.positional.is_empty() {
        return Err(RuntimeError::type_error(format!(
            "unbound method {class}.{name}() needs an argument"
        )));
    }
    Ok(args.positional.remove(0))
}

fn wrong_self(ctx: &dyn CallContext, class: &str, name: &str, receiver: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "descriptor '{name}' for '{class}' objects doesn't apply to a '{}' object",
        type_name(ctx, receiver)
    ))
}

/// An integer argument; instances may convert through `__index__`.
fn index_arg(ctx: &mut dyn CallContext, value: &Value) -> RtResult<i64> {
    if let Some(number) = value.as_int() {
        return Ok(number);
    }
    if let Value::Object(_) = value
        && let Some(result) = protocol::call_special(ctx, value, "__index__", Vec::new())?
        && let Some(number) = result.as_int()
    {
        return Ok(number);
    }
    Err(RuntimeError::type_error(format!(
        "'{}' object cannot be interpreted as an integer",
        type_name(ctx, value)
    )))
}

/// `StopIteration` carrying a generator's return value.
fn stop_iteration(ctx: &mut dyn CallContext, value: Value) -> RuntimeError {
    let types = ctx.types();
    let args = if value.is_none() { Vec::new() } else { vec![value] };
    RuntimeError::Object(exception::new_exception(
        types.exception(ExceptionKind::StopIteration),
        args,
    ))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::vm::{Vm, VmConfig};

    pub(super) fn output(source: &str) -> String {
        let code = crate::compile_source(source, Default::default()).expect("compiles");
        let mut vm = Vm::new(VmConfig::default());
        if let Err(error) = vm.run_module(code) {
            panic!("uncaught: {}", error.report);
        }
        vm.take_stdout()
    }

    pub(super) fn error(source: &str) -> String {
        let code = crate::compile_source(source, Default::default()).expect("compiles");
        let mut vm = Vm::new(VmConfig::default());
        vm.run_module(code).expect_err("raises").report.summary()
    }

    #[test]
    fn builtin_classes_are_bound_by_name() {
        let source = indoc! {"
            print(int, list, ValueError)
            print(type(1) is int, type([]) is list, isinstance(True, int))
        "};
        assert_eq!(
            output(source),
            "<class 'int'> <class 'list'> <class 'ValueError'>\nTrue True True\n"
        );
    }

    #[test]
    fn builtin_methods_bind_like_functions() {
        let source = indoc! {"
            items = []
            push = items.append
            push(1)
            list.append(items, 2)
            print(items)
        "};
        assert_eq!(output(source), "[1, 2]\n");
    }

    #[test]
    fn builtin_types_cannot_be_subclassed() {
        assert_eq!(
            error("class MyList(list):\n    pass\n"),
            "TypeError: type 'list' is not an acceptable base type"
        );
    }
}
