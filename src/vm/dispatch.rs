//! The instruction loop and the unwinder.

use tracing::trace;

use crate::bytecode::{Conversion, Instruction, MAKE_CLOSURE, MAKE_DEFAULTS, MAKE_KWDEFAULTS, Slot};
use crate::runtime::arith;
use crate::runtime::class::{ClassKind, ClassRef, TraceEntry, is_subclass};
use crate::runtime::dict::{self, DictObject, table};
use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::format::{ascii_escape, format_value};
use crate::runtime::function::{CodeValue, FunctionObject, Namespace};
use crate::runtime::generator::GeneratorStep;
use crate::runtime::iter::{RangeObject, SliceObject};
use crate::runtime::list::{ListObject, TupleObject};
use crate::runtime::object::{Args, CallContext, downcast, downcast_mut, is_a, new_object};
use crate::runtime::protocol::{self, type_name};
use crate::runtime::value::Value;
use crate::vm::Vm;
use crate::vm::frame::{Frame, FrameExit, Resume};

impl Vm {
    /// Runs `frame` until it returns, yields or lets an exception escape.
    pub(crate) fn run_frame(&mut self, frame: &mut Frame, resume: Resume) -> RtResult<FrameExit> {
        // A throw records the yield point even though it is not chained.
        let mut thrown = matches!(resume, Resume::Throw(_));
        let mut pending = match resume {
            Resume::Enter => None,
            Resume::Send(value) => {
                frame.push(value);
                None
            }
            Resume::Throw(error) => {
                frame.reraising = true;
                Some(error)
            }
        };
        loop {
            let error = match pending.take() {
                Some(error) => error,
                None => match self.execute(frame) {
                    Ok(exit) => return Ok(exit),
                    Err(error) => error,
                },
            };
            let reraised = frame.reraising && !std::mem::take(&mut thrown);
            let exception = self.enter_exception(frame, error);
            let offset = frame.pc.saturating_sub(1);
            if !reraised {
                exception::push_trace(
                    &exception,
                    TraceEntry {
                        name: frame.code.name.clone(),
                        line: frame.code.line_for(offset),
                    },
                );
            }
            match frame.code.handler_for(offset).copied() {
                Some(entry) => {
                    trace!(code = %frame.code.qualname, offset, target = entry.target, "exception handled");
                    frame.stack.truncate(entry.depth as usize);
                    frame.push(exception);
                    frame.pc = entry.target as usize;
                    self.unwound = None;
                }
                None => {
                    trace!(code = %frame.code.qualname, offset, "unwinding frame");
                    self.unwound = Some(exception.clone());
                    return Err(RuntimeError::Object(exception));
                }
            }
        }
    }

    /// Materialises a raised error and records the exception being handled
    /// as its context, unless the error is already propagating.
    fn enter_exception(&mut self, frame: &mut Frame, error: RuntimeError) -> Value {
        let propagating = std::mem::take(&mut frame.reraising)
            || matches!((&error, &self.unwound), (RuntimeError::Object(value), Some(unwound)) if value.is(unwound));
        let exception = self.materialize(error);
        if !propagating && let Some(active) = &self.active_exception {
            exception::chain_context(&exception, active);
        }
        exception
    }

    fn execute(&mut self, frame: &mut Frame) -> RtResult<FrameExit> {
        loop {
            let instruction = frame.code.instructions[frame.pc];
            frame.pc += 1;
            self.tick()?;
            if let Some(exit) = self.step(frame, instruction)? {
                return Ok(exit);
            }
        }
    }

    fn tick(&mut self) -> RtResult<()> {
        self.steps += 1;
        match self.config.max_steps {
            Some(limit) if self.steps > limit => Err(RuntimeError::runtime_error(format!(
                "execution step limit exceeded ({limit})"
            ))),
            _ => Ok(()),
        }
    }

    fn step(&mut self, frame: &mut Frame, instruction: Instruction) -> RtResult<Option<FrameExit>> {
        use Instruction as I;
        match instruction {
            I::Nop => {}
            I::PopTop => {
                frame.pop();
            }
            I::Copy(depth) => {
                let value = frame.peek(depth as usize).clone();
                frame.push(value);
            }
            I::Swap(depth) => {
                let len = frame.stack.len();
                frame.stack.swap(len - 1, len - depth as usize);
            }

            I::LoadConst(index) => {
                let value = frame.constants[index as usize].clone();
                frame.push(value);
            }
            I::LoadFast(index) => match frame.fast[index as usize].clone() {
                Some(value) => frame.push(value),
                None => {
                    return Err(RuntimeError::unbound_local(&frame.code.varnames[index as usize]));
                }
            },
            I::StoreFast(index) => {
                let value = frame.pop();
                frame.fast[index as usize] = Some(value);
            }
            I::DeleteFast(index) => {
                if frame.fast[index as usize].take().is_none() {
                    return Err(RuntimeError::unbound_local(&frame.code.varnames[index as usize]));
                }
            }
            I::LoadDeref(index) => {
                let value = frame.cells[index as usize].borrow().clone();
                match value {
                    Some(value) => frame.push(value),
                    None => return Err(unbound_cell(frame, index as usize)),
                }
            }
            I::StoreDeref(index) => {
                let value = frame.pop();
                *frame.cells[index as usize].borrow_mut() = Some(value);
            }
            I::DeleteDeref(index) => {
                if frame.cells[index as usize].borrow_mut().take().is_none() {
                    return Err(unbound_cell(frame, index as usize));
                }
            }
            I::LoadClassDeref(index) => {
                let name = frame.code.cell_name(index as usize);
                let local = frame
                    .locals
                    .as_ref()
                    .and_then(|locals| locals.borrow().get(name).cloned());
                let value = match local {
                    Some(value) => Some(value),
                    None => frame.cells[index as usize].borrow().clone(),
                };
                match value {
                    Some(value) => frame.push(value),
                    None => return Err(unbound_cell(frame, index as usize)),
                }
            }
            I::LoadClosure(index) => {
                let cell = frame.cells[index as usize].clone();
                frame.push(Value::Cell(cell));
            }
            I::LoadGlobal(index) => {
                let value = self.load_global(&frame.globals, frame.name(index))?;
                frame.push(value);
            }
            I::StoreGlobal(index) => {
                let value = frame.pop();
                let name = frame.name(index).to_string();
                frame.globals.borrow_mut().insert(name, value);
            }
            I::DeleteGlobal(index) => {
                let name = frame.name(index);
                if frame.globals.borrow_mut().shift_remove(name).is_none() {
                    return Err(RuntimeError::name_error(name));
                }
            }
            I::LoadName(index) => {
                let name = frame.name(index);
                let local = frame
                    .locals
                    .as_ref()
                    .and_then(|locals| locals.borrow().get(name).cloned());
                let value = match local {
                    Some(value) => value,
                    None => self.load_global(&frame.globals, name)?,
                };
                frame.push(value);
            }
            I::StoreName(index) => {
                let value = frame.pop();
                let name = frame.name(index).to_string();
                namespace_of(frame).borrow_mut().insert(name, value);
            }
            I::DeleteName(index) => {
                let name = frame.name(index);
                if namespace_of(frame).borrow_mut().shift_remove(name).is_none() {
                    return Err(RuntimeError::name_error(name));
                }
            }
            I::SaveBinding(slot) => {
                let value = read_slot(frame, slot).unwrap_or(Value::Unbound);
                frame.push(value);
            }
            I::RestoreBinding(slot) => {
                let value = frame.pop();
                let value = (!matches!(value, Value::Unbound)).then_some(value);
                write_slot(frame, slot, value);
            }

            I::LoadAttr(index) => {
                let owner = frame.pop();
                let value = protocol::get_attr(self, &owner, frame.name(index))?;
                frame.push(value);
            }
            I::StoreAttr(index) => {
                let owner = frame.pop();
                let value = frame.pop();
                protocol::set_attr(self, &owner, frame.name(index), value)?;
            }
            I::DeleteAttr(index) => {
                let owner = frame.pop();
                protocol::del_attr(self, &owner, frame.name(index))?;
            }
            I::BinarySubscr => {
                let index = frame.pop();
                let container = frame.pop();
                let value = protocol::get_item(self, &container, &index)?;
                frame.push(value);
            }
            I::StoreSubscr => {
                let index = frame.pop();
                let container = frame.pop();
                let value = frame.pop();
                protocol::set_item(self, &container, &index, value)?;
            }
            I::DeleteSubscr => {
                let index = frame.pop();
                let container = frame.pop();
                protocol::del_item(self, &container, &index)?;
            }
            I::BuildSlice(count) => {
                let step = if count == 3 { frame.pop() } else { Value::None };
                let stop = frame.pop();
                let start = frame.pop();
                frame.push(Value::Object(new_object(SliceObject { start, stop, step })));
            }

            I::BinaryOp { op, inplace } => {
                let right = frame.pop();
                let left = frame.pop();
                let value = if inplace {
                    arith::inplace_op(self, op, &left, &right)?
                } else {
                    arith::binary_op(self, op, &left, &right)?
                };
                frame.push(value);
            }
            I::UnaryOp(op) => {
                let operand = frame.pop();
                let value = arith::unary_op(self, op, &operand)?;
                frame.push(value);
            }
            I::CompareOp(op) => {
                let right = frame.pop();
                let left = frame.pop();
                let value = arith::compare(self, op, &left, &right)?;
                frame.push(value);
            }
            I::IsOp(invert) => {
                let right = frame.pop();
                let left = frame.pop();
                frame.push(Value::Bool(left.is(&right) != invert));
            }
            I::ContainsOp(invert) => {
                let container = frame.pop();
                let item = frame.pop();
                let found = protocol::contains(self, &container, &item)?;
                frame.push(Value::Bool(found != invert));
            }

            I::BuildTuple(count) => {
                let items = frame.pop_n(count as usize);
                frame.push(Value::tuple(items));
            }
            I::BuildList(count) => {
                let items = frame.pop_n(count as usize);
                frame.push(Value::list(items));
            }
            I::BuildSet(count) => {
                let items = frame.pop_n(count as usize);
                let set = dict::set_from_items(self, items)?;
                frame.push(set);
            }
            I::BuildMap(count) => {
                let flat = frame.pop_n(2 * count as usize);
                let mut pairs = Vec::with_capacity(count as usize);
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    pairs.push((key, value));
                }
                let dict = dict::dict_from_pairs(self, pairs)?;
                frame.push(dict);
            }
            I::BuildString(count) => {
                let parts = frame.pop_n(count as usize);
                let mut text = String::new();
                for part in &parts {
                    text.push_str(part.as_str().expect("formatted pieces are strings"));
                }
                frame.push(Value::str(text));
            }
            I::ListAppend(depth) => {
                let value = frame.pop();
                let list = frame.peek(depth as usize).clone();
                list_of(&list).items.push(value);
            }
            I::SetAdd(depth) => {
                let value = frame.pop();
                let set = frame.peek(depth as usize).clone();
                let set = set.as_object().expect("set under construction");
                dict::set_add(self, set, value)?;
            }
            I::MapAdd(depth) => {
                let value = frame.pop();
                let key = frame.pop();
                let target = frame.peek(depth as usize).clone();
                let target = target.as_object().expect("dict under construction");
                dict::dict_set(self, target, key, value)?;
            }
            I::ListExtend(depth) => {
                let iterable = frame.pop();
                let iterator = match protocol::get_iter(self, &iterable) {
                    Ok(iterator) => iterator,
                    Err(error) if protocol::error_is(&self.types, &error, ExceptionKind::TypeError) => {
                        return Err(RuntimeError::type_error(format!(
                            "Value after * must be an iterable, not {}",
                            type_name(self, &iterable)
                        )));
                    }
                    Err(error) => return Err(error),
                };
                let items = protocol::collect(self, &iterator)?;
                let list = frame.peek(depth as usize).clone();
                list_of(&list).items.extend(items);
            }
            I::SetUpdate(depth) => {
                let iterable = frame.pop();
                let items = protocol::collect(self, &iterable)?;
                let set = frame.peek(depth as usize).clone();
                let set = set.as_object().expect("set under construction");
                for item in items {
                    dict::set_add(self, set, item)?;
                }
            }
            I::DictUpdate(depth) => {
                let mapping = frame.pop();
                let target = frame.peek(depth as usize).clone();
                if !self.is_mapping(&mapping) {
                    return Err(RuntimeError::type_error(format!(
                        "'{}' object is not a mapping",
                        type_name(self, &mapping)
                    )));
                }
                let pairs = self.mapping_items(&mapping)?;
                let target = target.as_object().expect("dict under construction");
                for (key, value) in pairs {
                    dict::dict_set(self, target, key, value)?;
                }
            }
            I::DictMerge(depth) => {
                let mapping = frame.pop();
                let target = frame.peek(depth as usize).clone();
                let callee = callable_name(self, frame.peek(depth as usize + 2));
                if !self.is_mapping(&mapping) {
                    return Err(RuntimeError::type_error(format!(
                        "{callee}() argument after ** must be a mapping, not {}",
                        type_name(self, &mapping)
                    )));
                }
                let pairs = self.mapping_items(&mapping)?;
                let target = target.as_object().expect("dict under construction");
                for (key, value) in pairs {
                    let Some(name) = key.as_str() else {
                        return Err(RuntimeError::type_error(format!("{callee}() keywords must be strings")));
                    };
                    if dict::dict_contains(self, target, &key)? {
                        return Err(RuntimeError::type_error(format!(
                            "{callee}() got multiple values for keyword argument '{name}'"
                        )));
                    }
                    dict::dict_set(self, target, key, value)?;
                }
            }
            I::ListToTuple => {
                let list = frame.pop();
                let items = list.list_items().expect("list under construction");
                frame.push(Value::tuple(items));
            }
            I::FormatValue { conversion, has_spec } => {
                let spec = if has_spec { Some(frame.pop()) } else { None };
                let value = frame.pop();
                let value = match conversion {
                    Conversion::None => value,
                    Conversion::Str => Value::str(protocol::str_of(self, &value)?),
                    Conversion::Repr => Value::str(protocol::repr(self, &value)?),
                    Conversion::Ascii => Value::str(ascii_escape(&protocol::repr(self, &value)?)),
                };
                let spec = spec.as_ref().and_then(Value::as_str).unwrap_or("");
                let text = match &value {
                    Value::Str(text) if spec.is_empty() => text.clone(),
                    _ => format_value(self, &value, spec)?.into(),
                };
                frame.push(Value::Str(text));
            }

            I::UnpackSequence(count) => {
                let value = frame.pop();
                let items = self.unpack(&value, count as usize, false)?;
                frame.stack.extend(items.into_iter().rev());
            }
            I::UnpackEx { before, after } => {
                let value = frame.pop();
                let (before, after) = (before as usize, after as usize);
                let mut items = self.unpack(&value, before + after, true)?;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(before);
                frame.stack.extend(tail.into_iter().rev());
                frame.push(Value::list(middle));
                frame.stack.extend(items.into_iter().rev());
            }

            I::Jump(target) => frame.pc = target as usize,
            I::PopJumpIfFalse(target) => {
                let value = frame.pop();
                if !protocol::truthy(self, &value)? {
                    frame.pc = target as usize;
                }
            }
            I::PopJumpIfTrue(target) => {
                let value = frame.pop();
                if protocol::truthy(self, &value)? {
                    frame.pc = target as usize;
                }
            }
            I::PopJumpIfNone(target) => {
                if frame.pop().is_none() {
                    frame.pc = target as usize;
                }
            }
            I::PopJumpIfNotNone(target) => {
                if !frame.pop().is_none() {
                    frame.pc = target as usize;
                }
            }
            I::JumpIfFalseOrPop(target) => {
                let value = frame.top().clone();
                if protocol::truthy(self, &value)? {
                    frame.pop();
                } else {
                    frame.pc = target as usize;
                }
            }
            I::JumpIfTrueOrPop(target) => {
                let value = frame.top().clone();
                if protocol::truthy(self, &value)? {
                    frame.pc = target as usize;
                } else {
                    frame.pop();
                }
            }
            I::ForIter(target) => {
                let iterator = frame.top().clone();
                match protocol::next_item(self, &iterator)? {
                    Some(value) => frame.push(value),
                    None => {
                        frame.pop();
                        frame.pc = target as usize;
                    }
                }
            }
            I::Send(target) => {
                let value = frame.pop();
                let receiver = frame.top().clone();
                match self.send_to(&receiver, value)? {
                    GeneratorStep::Yielded(value) => {
                        frame.yield_from = Some(receiver);
                        frame.push(value);
                    }
                    GeneratorStep::Returned(value) => {
                        frame.yield_from = None;
                        frame.pop();
                        frame.push(value);
                        frame.pc = target as usize;
                    }
                }
            }

            I::GetIter => {
                let value = frame.pop();
                let iterator = protocol::get_iter(self, &value)?;
                frame.push(iterator);
            }
            I::GetYieldFromIter => {
                let value = frame.pop();
                let iterator = self.yield_from_iter(frame, value)?;
                frame.push(iterator);
            }
            I::GetAwaitable => {
                let value = frame.pop();
                let awaitable = self.awaitable(value)?;
                frame.push(awaitable);
            }

            I::MakeFunction(flags) => {
                let function = self.make_function(frame, flags)?;
                frame.push(function);
            }
            I::Call(count) => {
                let args = frame.pop_n(count as usize);
                let callee = frame.pop();
                let result = self.call_value(&callee, Args::new(args))?;
                frame.push(result);
            }
            I::CallKw(count) => {
                let names = frame.pop().tuple_items().expect("keyword names tuple");
                let mut positional = frame.pop_n(count as usize);
                let callee = frame.pop();
                let values = positional.split_off(positional.len() - names.len());
                let keywords = names
                    .iter()
                    .map(|name| name.as_str().expect("keyword names are strings").to_string())
                    .zip(values)
                    .collect();
                let result = self.call_value(&callee, Args::with_keywords(positional, keywords))?;
                frame.push(result);
            }
            I::CallEx { has_kwargs } => {
                let kwargs = if has_kwargs { Some(frame.pop()) } else { None };
                let positional = frame.pop().tuple_items().expect("argument tuple");
                let callee = frame.pop();
                let mut keywords = Vec::new();
                if let Some(kwargs) = kwargs {
                    let object = kwargs.as_object().expect("keyword dict");
                    let items = table(object).map(|table| table.items()).unwrap_or_default();
                    for (key, value) in items {
                        let name = key.as_str().expect("merged keywords are strings");
                        keywords.push((name.to_string(), value));
                    }
                }
                let result = self.call_value(&callee, Args::with_keywords(positional, keywords))?;
                frame.push(result);
            }
            I::ReturnValue => return Ok(Some(FrameExit::Return(frame.pop()))),
            I::YieldValue => return Ok(Some(FrameExit::Yield(frame.pop()))),

            I::LoadBuildClass => {
                let build = self.builtins.borrow().get("__build_class__").cloned();
                let build = build.ok_or_else(|| RuntimeError::name_error("__build_class__"))?;
                frame.push(build);
            }
            I::LoadAssertionError => {
                let class = self.types.exception(ExceptionKind::AssertionError).clone();
                frame.push(Value::Class(class));
            }

            I::Raise(count) => return Err(self.raise(frame, count)?),
            I::Reraise => {
                let exception = frame.pop();
                frame.reraising = true;
                return Err(RuntimeError::Object(exception));
            }
            I::PushExcInfo => {
                let exception = frame.pop();
                let previous = self.active_exception.replace(exception.clone());
                frame.push(previous.unwrap_or(Value::None));
                frame.push(exception);
            }
            I::PopExcept => {
                let previous = frame.pop();
                self.active_exception = (!previous.is_none()).then_some(previous);
            }
            I::CheckExcMatch => {
                let spec = frame.pop();
                let exception = frame.top().clone();
                let matched = exception::matches(self, &exception, &spec)?;
                frame.push(Value::Bool(matched));
            }
            I::CheckEgMatch => {
                let spec = frame.pop();
                let exception = frame.pop();
                let (rest, matched) = exception::except_star_match(self, &exception, &spec)?;
                if !matched.is_none() {
                    self.active_exception = Some(matched.clone());
                }
                frame.push(rest);
                frame.push(matched);
            }
            I::PrepReraiseStar => {
                let raised = frame.pop().list_items().expect("raised list");
                frame.pop();
                let result = exception::prep_reraise_star(&self.types, raised);
                frame.push(result);
            }
            I::BeforeWith => {
                let manager = frame.pop();
                let (exit, entered) = self.enter_context(&manager)?;
                frame.push(exit);
                frame.push(entered);
            }
            I::WithExceptStart => {
                let exception = frame.top().clone();
                let exit = frame.peek(3).clone();
                let class = exception::class_of(&exception).map(Value::Class).unwrap_or(Value::None);
                let result = self.call_value(&exit, Args::new(vec![class, exception, Value::None]))?;
                frame.push(result);
            }

            I::MatchSequence => {
                let is_sequence = frame.top().as_object().is_some_and(|object| {
                    is_a::<ListObject>(object) || is_a::<TupleObject>(object) || is_a::<RangeObject>(object)
                });
                frame.push(Value::Bool(is_sequence));
            }
            I::MatchMapping => {
                let is_mapping = frame.top().as_object().is_some_and(is_a::<DictObject>);
                frame.push(Value::Bool(is_mapping));
            }
            I::MatchKeys => {
                let keys = frame.top().tuple_items().expect("key tuple");
                let subject = frame.peek(2).clone();
                let values = self.match_keys(&subject, &keys)?;
                frame.push(values);
            }
            I::MatchClass(count) => {
                let names = frame.pop().tuple_items().expect("attribute names tuple");
                let class = frame.pop();
                let subject = frame.pop();
                let attributes = self.match_class(&subject, &class, count as usize, &names)?;
                frame.push(attributes);
            }
            I::GetLen => {
                let value = frame.top().clone();
                let len = protocol::len(self, &value)?;
                frame.push(Value::Int(len as i64));
            }
            I::CopyDictWithoutKeys => {
                let keys = frame.pop().tuple_items().expect("key tuple");
                let subject = frame.pop();
                let pairs = self.mapping_items(&subject)?;
                let copy = dict::new_dict();
                for (key, value) in pairs {
                    dict::dict_set(self, &copy, key, value)?;
                }
                for key in &keys {
                    dict::dict_remove(self, &copy, key)?;
                }
                frame.push(Value::Object(copy));
            }
        }
        Ok(None)
    }

    fn load_global(&self, globals: &Namespace, name: &str) -> RtResult<Value> {
        if let Some(value) = globals.borrow().get(name) {
            return Ok(value.clone());
        }
        self.builtins
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::name_error(name))
    }

    /// Items to unpack; `at_least` allows extra items for a starred target.
    fn unpack(&mut self, value: &Value, expected: usize, at_least: bool) -> RtResult<Vec<Value>> {
        let items = match value.list_items().or_else(|| value.tuple_items()) {
            Some(items) => items,
            None => {
                let iterator = protocol::get_iter(self, value).map_err(|error| {
                    if protocol::error_is(&self.types, &error, ExceptionKind::TypeError) {
                        RuntimeError::type_error(format!(
                            "cannot unpack non-iterable {} object",
                            type_name(self, value)
                        ))
                    } else {
                        error
                    }
                })?;
                let mut items = Vec::with_capacity(expected);
                while at_least || items.len() <= expected {
                    match protocol::next_item(self, &iterator)? {
                        Some(item) => items.push(item),
                        None => break,
                    }
                }
                items
            }
        };
        if items.len() < expected {
            let at_least = if at_least { "at least " } else { "" };
            return Err(RuntimeError::value_error(format!(
                "not enough values to unpack (expected {at_least}{expected}, got {})",
                items.len()
            )));
        }
        if !at_least && items.len() > expected {
            return Err(RuntimeError::value_error(format!(
                "too many values to unpack (expected {expected})"
            )));
        }
        Ok(items)
    }

    /// Key/value pairs of a dict or of any object with `keys()` and
    /// `__getitem__`.
    pub(crate) fn mapping_items(&mut self, mapping: &Value) -> RtResult<Vec<(Value, Value)>> {
        if let Some(object) = mapping.as_object()
            && is_a::<DictObject>(object)
            && let Some(table) = table(object)
        {
            return Ok(table.items());
        }
        let keys = protocol::call_method(self, mapping, "keys", Vec::new())?;
        let keys = protocol::collect(self, &keys)?;
        let mut pairs = Vec::with_capacity(keys.len());
        for key in keys {
            let value = protocol::get_item(self, mapping, &key)?;
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    fn is_mapping(&self, value: &Value) -> bool {
        value.as_object().is_some_and(is_a::<DictObject>) || value.class(&self.types).lookup("keys").is_some()
    }

    fn make_function(&mut self, frame: &mut Frame, flags: u32) -> RtResult<Value> {
        let code = frame.pop();
        let code = code
            .as_object()
            .and_then(|object| downcast::<CodeValue>(object).map(|code| code.0.clone()))
            .expect("MakeFunction operand is a code object");
        let closure = if flags & MAKE_CLOSURE != 0 {
            let cells = frame.pop().tuple_items().expect("closure tuple");
            cells
                .into_iter()
                .map(|cell| match cell {
                    Value::Cell(cell) => cell,
                    _ => unreachable!("closure tuples hold cells"),
                })
                .collect()
        } else {
            Vec::new()
        };
        let kwdefaults = if flags & MAKE_KWDEFAULTS != 0 {
            let dict = frame.pop();
            let object = dict.as_object().expect("keyword default dict");
            let items = table(object).map(|table| table.items()).unwrap_or_default();
            items
                .into_iter()
                .map(|(key, value)| (key.as_str().unwrap_or_default().to_string(), value))
                .collect()
        } else {
            Vec::new()
        };
        let defaults = if flags & MAKE_DEFAULTS != 0 {
            frame.pop().tuple_items().expect("default tuple")
        } else {
            Vec::new()
        };
        let constants = self.constants_for(&code);
        Ok(Value::Object(new_object(FunctionObject {
            name: code.name.clone(),
            qualname: code.qualname.clone(),
            code,
            constants,
            globals: frame.globals.clone(),
            defaults,
            kwdefaults,
            closure,
            dict: Default::default(),
        })))
    }

    /// Operand of `Raise(count)`, turned into the error to propagate.
    fn raise(&mut self, frame: &mut Frame, count: u32) -> RtResult<RuntimeError> {
        if count == 0 {
            return match self.active_exception.clone() {
                Some(active) => {
                    frame.reraising = true;
                    Ok(RuntimeError::Object(active))
                }
                None => Err(RuntimeError::runtime_error("No active exception to reraise")),
            };
        }
        let cause = if count == 2 { Some(frame.pop()) } else { None };
        let exception = frame.pop();
        let exception = self.instantiate_exception(exception, "exceptions must derive from BaseException")?;
        if let Some(cause) = cause {
            let cause = if cause.is_none() {
                Value::None
            } else {
                self.instantiate_exception(cause, "exception causes must derive from BaseException")?
            };
            exception::set_cause(&exception, cause);
        }
        Ok(RuntimeError::Object(exception))
    }

    fn instantiate_exception(&mut self, value: Value, message: &str) -> RtResult<Value> {
        if exception::is_exception(&value) {
            return Ok(value);
        }
        if exception::is_exception_class(&value) {
            let instance = self.call_value(&value, Args::default())?;
            if exception::is_exception(&instance) {
                return Ok(instance);
            }
            return Err(RuntimeError::type_error(format!(
                "calling {} should have returned an instance of BaseException, not {}",
                protocol::repr(self, &value)?,
                type_name(self, &instance)
            )));
        }
        Err(RuntimeError::type_error(message))
    }

    /// `BeforeWith`: the bound `__exit__` and the result of `__enter__`.
    fn enter_context(&mut self, manager: &Value) -> RtResult<(Value, Value)> {
        let class = manager.class(&self.types);
        let (Some(enter), Some(exit)) = (class.lookup("__enter__"), class.lookup("__exit__")) else {
            return Err(RuntimeError::type_error(format!(
                "'{}' object does not support the context manager protocol",
                class.name
            )));
        };
        let exit = protocol::descriptor_get(self, exit, Some(manager), &class)?;
        let entered = protocol::call_found_special(self, manager, &class, enter, Vec::new())?;
        Ok((exit, entered))
    }

    fn match_keys(&mut self, subject: &Value, keys: &[Value]) -> RtResult<Value> {
        for (index, key) in keys.iter().enumerate() {
            for earlier in &keys[..index] {
                if protocol::values_equal(self, earlier, key)? {
                    return Err(RuntimeError::value_error(format!(
                        "mapping pattern checks duplicate key ({})",
                        protocol::repr(self, key)?
                    )));
                }
            }
        }
        let object = subject.as_object().expect("mapping subject");
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match dict::dict_get(self, object, key)? {
                Some(value) => values.push(value),
                None => return Ok(Value::None),
            }
        }
        Ok(Value::tuple(values))
    }

    fn match_class(&mut self, subject: &Value, class: &Value, count: usize, names: &[Value]) -> RtResult<Value> {
        let Value::Class(class) = class else {
            return Err(RuntimeError::type_error("called match pattern must be a class"));
        };
        if !is_subclass(&subject.class(&self.types), class) {
            return Ok(Value::None);
        }
        let mut attributes = Vec::with_capacity(count + names.len());
        let mut seen: Vec<String> = Vec::new();
        if count > 0 {
            match class.lookup("__match_args__") {
                None if self.matches_itself(class) => {
                    if count > 1 {
                        return Err(RuntimeError::type_error(format!(
                            "{}() accepts 1 positional sub-pattern ({count} given)",
                            class.name
                        )));
                    }
                    attributes.push(subject.clone());
                }
                None => {
                    return Err(RuntimeError::type_error(format!(
                        "{}() accepts 0 positional sub-patterns ({count} given)",
                        class.name
                    )));
                }
                Some(match_args) => {
                    let Some(match_args) = match_args.tuple_items() else {
                        return Err(RuntimeError::type_error(format!(
                            "{}.__match_args__ must be a tuple (got {})",
                            class.name,
                            type_name(self, &match_args)
                        )));
                    };
                    if count > match_args.len() {
                        let plural = if match_args.len() == 1 { "" } else { "s" };
                        return Err(RuntimeError::type_error(format!(
                            "{}() accepts {} positional sub-pattern{plural} ({count} given)",
                            class.name,
                            match_args.len()
                        )));
                    }
                    for name in &match_args[..count] {
                        let Some(name) = name.as_str() else {
                            return Err(RuntimeError::type_error(format!(
                                "__match_args__ elements must be strings (got {})",
                                type_name(self, name)
                            )));
                        };
                        match protocol::get_attr_opt(self, subject, name)? {
                            Some(value) => attributes.push(value),
                            None => return Ok(Value::None),
                        }
                        seen.push(name.to_string());
                    }
                }
            }
        }
        for name in names {
            let name = name.as_str().expect("keyword pattern names are strings");
            if seen.iter().any(|earlier| earlier == name) {
                return Err(RuntimeError::type_error(format!(
                    "{}() got multiple sub-patterns for attribute '{name}'",
                    class.name
                )));
            }
            match protocol::get_attr_opt(self, subject, name)? {
                Some(value) => attributes.push(value),
                None => return Ok(Value::None),
            }
            seen.push(name.to_string());
        }
        Ok(Value::tuple(attributes))
    }

    /// Builtin classes whose single positional sub-pattern matches the
    /// subject itself.
    fn matches_itself(&self, class: &ClassRef) -> bool {
        let types = &self.types;
        class.kind == ClassKind::Builtin
            && [&types.bool, &types.int, &types.float, &types.str, &types.list, &types.tuple, &types.dict, &types.set]
                .iter()
                .any(|builtin| std::rc::Rc::ptr_eq(builtin, class))
    }
}

fn namespace_of(frame: &Frame) -> &Namespace {
    frame.locals.as_ref().unwrap_or(&frame.globals)
}

fn unbound_cell(frame: &Frame, index: usize) -> RuntimeError {
    let name = frame.code.cell_name(index);
    if index < frame.code.cellvars.len() {
        RuntimeError::unbound_local(name)
    } else {
        RuntimeError::new(
            ExceptionKind::NameError,
            format!("cannot access free variable '{name}' where it is not associated with a value in enclosing scope"),
        )
    }
}

fn read_slot(frame: &Frame, slot: Slot) -> Option<Value> {
    match slot {
        Slot::Fast(index) => frame.fast[index as usize].clone(),
        Slot::Deref(index) => frame.cells[index as usize].borrow().clone(),
        Slot::Global(index) => frame.globals.borrow().get(frame.name(index)).cloned(),
        Slot::Name(index) => namespace_of(frame).borrow().get(frame.name(index)).cloned(),
    }
}

fn write_slot(frame: &mut Frame, slot: Slot, value: Option<Value>) {
    match slot {
        Slot::Fast(index) => frame.fast[index as usize] = value,
        Slot::Deref(index) => *frame.cells[index as usize].borrow_mut() = value,
        Slot::Global(index) | Slot::Name(index) => {
            let name = frame.name(index).to_string();
            let namespace = match slot {
                Slot::Global(_) => &frame.globals,
                _ => namespace_of(frame),
            };
            let mut namespace = namespace.borrow_mut();
            match value {
                Some(value) => {
                    namespace.insert(name, value);
                }
                None => {
                    namespace.shift_remove(&name);
                }
            }
        }
    }
}

fn list_of(value: &Value) -> std::cell::RefMut<'_, ListObject> {
    value
        .as_object()
        .and_then(downcast_mut::<ListObject>)
        .expect("list under construction")
}

/// Name used for a callable in argument errors.
pub(crate) fn callable_name(ctx: &dyn CallContext, callee: &Value) -> String {
    if let Value::Class(class) = callee {
        return class.name.clone();
    }
    if let Some(object) = callee.as_object() {
        let inner = object.borrow();
        let any = inner.as_any();
        if let Some(function) = any.downcast_ref::<FunctionObject>() {
            return function.qualname.clone();
        }
        if let Some(native) = any.downcast_ref::<crate::runtime::function::NativeFunction>() {
            return native.name.to_string();
        }
        if let Some(method) = any.downcast_ref::<crate::runtime::function::BoundMethod>() {
            let function = method.function.clone();
            drop(inner);
            return callable_name(ctx, &function);
        }
    }
    type_name(ctx, callee)
}
