//! Calling: functions, builtins, bound methods and classes, plus the
//! binding of call arguments to parameter slots.

use tracing::{trace, warn};

use crate::runtime::class::{ClassKind, ClassRef, InstanceObject};
use crate::runtime::dict;
use crate::runtime::error::{ArgumentBindingError, ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::function::{
    BoundMethod, FunctionObject, Namespace, NativeFunction, StaticMethodObject,
};
use crate::runtime::generator::GeneratorObject;
use crate::runtime::object::{Args, CallContext, ObjectRef, downcast, new_object};
use crate::runtime::protocol::{self, type_name};
use crate::runtime::value::{CellRef, Value};
use crate::vm::Vm;
use crate::vm::frame::{Frame, FrameExit, Resume};

impl Vm {
    pub(crate) fn call_value(&mut self, callee: &Value, args: Args) -> RtResult<Value> {
        match callee {
            Value::Class(class) => return self.instantiate(class, args),
            Value::Object(object) => {
                let native = downcast::<NativeFunction>(object).map(|native| native.func);
                if let Some(func) = native {
                    return func(self, args);
                }
                if downcast::<FunctionObject>(object).is_some() {
                    return self.call_function(object, args, None);
                }
                let bound = downcast::<BoundMethod>(object)
                    .map(|method| (method.receiver.clone(), method.function.clone()));
                if let Some((receiver, function)) = bound {
                    return self.call_value(&function, args.prepend(receiver));
                }
                let wrapped = downcast::<StaticMethodObject>(object).map(|method| method.function.clone());
                if let Some(function) = wrapped {
                    return self.call_value(&function, args);
                }
            }
            _ => {}
        }
        let class = callee.class(&self.types);
        if class.kind != ClassKind::Builtin
            && let Some(call) = class.lookup("__call__")
        {
            let bound = protocol::descriptor_get(self, call, Some(callee), &class)?;
            return self.call_value(&bound, args);
        }
        Err(RuntimeError::not_callable(&class.name))
    }

    /// Runs a Python function. Generator and coroutine functions return
    /// their suspended frame wrapped in a generator object instead.
    pub(crate) fn call_function(
        &mut self,
        function: &ObjectRef,
        args: Args,
        locals: Option<Namespace>,
    ) -> RtResult<Value> {
        let mut frame = {
            let function = downcast::<FunctionObject>(function).expect("checked function");
            let fast = bind_arguments(self, &function, args)?;
            let cells = make_cells(&function, &fast);
            Frame::new(
                function.code.clone(),
                function.constants.clone(),
                function.globals.clone(),
                fast,
                cells,
            )
        };
        frame.locals = locals;
        let flags = frame.code.flags;
        if flags.is_generator || flags.is_coroutine {
            let (name, qualname) = (frame.code.name.clone(), frame.code.qualname.clone());
            let generator = GeneratorObject::new(Box::new(frame), flags.is_coroutine, &name, &qualname);
            return Ok(Value::Object(new_object(generator)));
        }
        match self.enter_frame(&mut frame, Resume::Enter)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => unreachable!("plain functions never yield"),
        }
    }

    /// Pushes a frame on the Python call stack and runs it.
    pub(crate) fn enter_frame(&mut self, frame: &mut Frame, resume: Resume) -> RtResult<FrameExit> {
        if self.depth >= self.config.max_call_depth {
            warn!(depth = self.depth, code = %frame.code.qualname, "recursion limit reached");
            return Err(RuntimeError::new(
                ExceptionKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        trace!(code = %frame.code.qualname, depth = self.depth, "push frame");
        let result = self.run_frame(frame, resume);
        self.depth -= 1;
        trace!(code = %frame.code.qualname, depth = self.depth, "pop frame");
        result
    }

    fn instantiate(&mut self, class: &ClassRef, args: Args) -> RtResult<Value> {
        match class.kind {
            ClassKind::Builtin => {
                return match class.constructor {
                    Some(constructor) => constructor(self, args),
                    None => Err(RuntimeError::type_error(format!(
                        "cannot create '{}' instances",
                        class.name
                    ))),
                };
            }
            ClassKind::Object if std::rc::Rc::ptr_eq(class, &self.types.object) => {
                if let Some(constructor) = class.constructor {
                    return constructor(self, args);
                }
            }
            _ => {}
        }
        let instance = if class.is_exception() {
            exception::new_exception(class, args.positional.clone())
        } else {
            Value::Object(new_object(InstanceObject::new(class.clone())))
        };
        let init = class
            .lookup_with_owner("__init__")
            .filter(|(owner, _)| !std::rc::Rc::ptr_eq(owner, &self.types.object));
        let Some((owner, init)) = init else {
            if !args.is_empty() && !class.is_exception() {
                return Err(RuntimeError::type_error(format!("{}() takes no arguments", class.name)));
            }
            return Ok(instance);
        };
        let bound = protocol::descriptor_get(self, init, Some(&instance), &owner)?;
        let result = self.call_value(&bound, args)?;
        if !result.is_none() {
            return Err(RuntimeError::type_error(format!(
                "__init__() should return None, not '{}'",
                type_name(self, &result)
            )));
        }
        Ok(instance)
    }
}

/// Binds `args` to the parameter slots of `function`, filling defaults.
fn bind_arguments(
    ctx: &mut dyn CallContext,
    function: &FunctionObject,
    args: Args,
) -> RtResult<Vec<Option<Value>>> {
    let code = &function.code;
    let params = &code.params;
    let name = function.qualname.as_str();
    let posonly = params.posonly_count as usize;
    let positional = params.positional_count as usize;
    let kwonly = params.kwonly_count as usize;
    let mut slots: Vec<Option<Value>> = vec![None; code.varnames.len().max(params.slot_count())];
    let varargs_slot = positional + kwonly;
    let varkw_slot = varargs_slot + usize::from(params.has_varargs);

    let Args {
        positional: mut given,
        keywords,
    } = args;
    let given_count = given.len();
    if given_count > positional {
        if params.has_varargs {
            slots[varargs_slot] = Some(Value::tuple(given.split_off(positional)));
        } else {
            let required = positional - function.defaults.len().min(positional);
            let expected = if required == positional {
                positional.to_string()
            } else {
                format!("from {required} to {positional}")
            };
            return Err(ArgumentBindingError::TooManyPositional {
                function: name.to_string(),
                expected,
                given: given_count,
            }
            .into());
        }
    } else if params.has_varargs {
        slots[varargs_slot] = Some(Value::tuple(Vec::new()));
    }
    for (slot, value) in slots.iter_mut().zip(given) {
        *slot = Some(value);
    }

    let mut extra_keywords = Vec::new();
    for (keyword, value) in keywords {
        let index = code.varnames[posonly..positional + kwonly]
            .iter()
            .position(|candidate| *candidate == keyword)
            .map(|index| index + posonly);
        match index {
            Some(index) => {
                if slots[index].is_some() {
                    return Err(ArgumentBindingError::MultipleValues {
                        function: name.to_string(),
                        name: keyword,
                    }
                    .into());
                }
                slots[index] = Some(value);
            }
            None if params.has_varkw => extra_keywords.push((Value::str(keyword), value)),
            None if code.varnames[..posonly].contains(&keyword) => {
                return Err(ArgumentBindingError::PositionalOnlyAsKeyword {
                    function: name.to_string(),
                    name: keyword,
                }
                .into());
            }
            None => {
                return Err(ArgumentBindingError::UnexpectedKeyword {
                    function: name.to_string(),
                    name: keyword,
                }
                .into());
            }
        }
    }
    if params.has_varkw {
        slots[varkw_slot] = Some(dict::dict_from_pairs(ctx, extra_keywords)?);
    }

    let first_default = positional - function.defaults.len().min(positional);
    let mut missing = Vec::new();
    for index in 0..positional {
        if slots[index].is_some() {
            continue;
        }
        if index >= first_default {
            slots[index] = Some(function.defaults[index - first_default].clone());
        } else {
            missing.push(code.varnames[index].clone());
        }
    }
    if !missing.is_empty() {
        return Err(ArgumentBindingError::MissingPositional {
            function: name.to_string(),
            names: missing,
        }
        .into());
    }
    for index in positional..positional + kwonly {
        if slots[index].is_some() {
            continue;
        }
        let param = &code.varnames[index];
        match function.kwdefaults.iter().find(|(key, _)| key == param) {
            Some((_, value)) => slots[index] = Some(value.clone()),
            None => missing.push(param.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(ArgumentBindingError::MissingKeywordOnly {
            function: name.to_string(),
            names: missing,
        }
        .into());
    }
    Ok(slots)
}

/// Fresh cells for the cellvars, seeded from parameters where a parameter
/// is captured, followed by the function's closure.
fn make_cells(function: &FunctionObject, fast: &[Option<Value>]) -> Vec<CellRef> {
    let code = &function.code;
    let mut cells = Vec::with_capacity(code.cell_count());
    for (index, _) in code.cellvars.iter().enumerate() {
        let initial = code
            .cell2arg
            .get(index)
            .copied()
            .flatten()
            .and_then(|slot| fast[slot as usize].clone());
        cells.push(Value::new_cell(initial));
    }
    cells.extend(function.closure.iter().cloned());
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::is_a;

    fn function(source: &str) -> (Vm, Value) {
        let mut vm = Vm::new(Default::default());
        let code = crate::compile_source(source, Default::default()).expect("compiles");
        vm.run_module(code).expect("module runs");
        let value = vm.global("f").expect("f is defined");
        (vm, value)
    }

    fn bind(source: &str, args: Args) -> Result<Vec<Option<Value>>, String> {
        let (mut vm, value) = function(source);
        let object = value.as_object().expect("function object");
        assert!(is_a::<FunctionObject>(object));
        let function = downcast::<FunctionObject>(object).expect("function");
        bind_arguments(&mut vm, &function, args).map_err(|error| error.to_string())
    }

    #[test]
    fn defaults_fill_trailing_positional_slots() {
        let slots = bind("def f(a, b=2, c=3): pass", Args::new(vec![Value::Int(1), Value::Int(5)]))
            .expect("binds");
        let values: Vec<i64> = slots.iter().map(|slot| slot.as_ref().and_then(Value::as_int).expect("bound")).collect();
        assert_eq!(values, [1, 5, 3]);
    }

    #[test]
    fn too_many_positional_mentions_the_accepted_range() {
        let error = bind(
            "def f(a, b=2): pass",
            Args::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        )
        .unwrap_err();
        assert_eq!(
            error,
            "TypeError: f() takes from 1 to 2 positional arguments but 3 were given"
        );
    }

    #[test]
    fn keyword_errors() {
        let source = "def f(a, /, b, *, c): pass";
        let error = bind(
            source,
            Args::with_keywords(vec![Value::Int(1)], vec![("a".to_string(), Value::Int(1))]),
        )
        .unwrap_err();
        assert!(error.contains("positional-only arguments passed as keyword arguments: 'a'"));

        let error = bind(
            source,
            Args::with_keywords(
                vec![Value::Int(1), Value::Int(2)],
                vec![("b".to_string(), Value::Int(3))],
            ),
        )
        .unwrap_err();
        assert!(error.contains("got multiple values for argument 'b'"));

        let error = bind(source, Args::new(vec![Value::Int(1), Value::Int(2)])).unwrap_err();
        assert!(error.contains("missing 1 required keyword-only argument: 'c'"));
    }

    #[test]
    fn star_parameters_collect_the_rest() {
        let slots = bind(
            "def f(a, *rest, **extra): pass",
            Args::with_keywords(
                vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                vec![("k".to_string(), Value::Int(4))],
            ),
        )
        .expect("binds");
        let rest = slots[1].as_ref().and_then(Value::tuple_items).expect("tuple");
        assert_eq!(rest.len(), 2);
        assert!(slots[2].as_ref().and_then(Value::as_object).is_some());
    }
}
