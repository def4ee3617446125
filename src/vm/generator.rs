//! Resuming generators and coroutines, including delegation through
//! `yield from` and `await`.

use crate::runtime::error::{ExceptionKind, RtResult, RuntimeError};
use crate::runtime::exception;
use crate::runtime::generator::{GeneratorObject, GeneratorState, GeneratorStep, ResumeAction};
use crate::runtime::object::{Args, CallContext, ObjectRef, downcast, downcast_mut, is_a};
use crate::runtime::protocol::{self, error_is, stop_iteration_value, type_name};
use crate::runtime::value::Value;
use crate::vm::Vm;
use crate::vm::frame::{Frame, FrameExit, Resume};

/// What a throw into a delegating frame turned into.
enum Delegation {
    /// The sub-iterator yielded; the outer frame stays suspended.
    Yielded(Value),
    Resume(Resume),
}

impl Vm {
    pub(crate) fn resume_generator(&mut self, object: &ObjectRef, action: ResumeAction) -> RtResult<GeneratorStep> {
        let (state, kind, is_coroutine) = {
            let generator = downcast::<GeneratorObject>(object).expect("checked generator");
            (generator.state, generator.kind_name(), generator.is_coroutine)
        };
        match (state, &action) {
            (GeneratorState::Running, _) => {
                return Err(RuntimeError::value_error(format!("{kind} already executing")));
            }
            (GeneratorState::Finished, ResumeAction::Send(_)) if is_coroutine => {
                return Err(RuntimeError::runtime_error("cannot reuse already awaited coroutine"));
            }
            (GeneratorState::Finished, ResumeAction::Send(_) | ResumeAction::Close) => {
                return Ok(GeneratorStep::Returned(Value::None));
            }
            (GeneratorState::Finished, ResumeAction::Throw(exception)) => {
                return Err(RuntimeError::Object(exception.clone()));
            }
            (GeneratorState::Created, ResumeAction::Send(value)) if !value.is_none() => {
                return Err(RuntimeError::type_error(format!(
                    "can't send non-None value to a just-started {kind}"
                )));
            }
            (GeneratorState::Created, ResumeAction::Close) => {
                finish(object);
                return Ok(GeneratorStep::Returned(Value::None));
            }
            (GeneratorState::Created, ResumeAction::Throw(exception)) => {
                finish(object);
                return Err(RuntimeError::Object(exception.clone()));
            }
            _ => {}
        }

        let (mut frame, saved) = {
            let mut generator = downcast_mut::<GeneratorObject>(object).expect("checked generator");
            generator.state = GeneratorState::Running;
            let frame = generator.frame.take().expect("suspended generator owns its frame");
            (frame, generator.saved_exception.take())
        };
        let frame_ref = frame.downcast_mut::<Frame>().expect("generator frames are VM frames");
        let closing = matches!(action, ResumeAction::Close);

        // The body sees the caller's exception unless it saved its own.
        let outer = self.active_exception.clone();
        if saved.is_some() {
            self.active_exception = saved;
        }
        let resume = match action {
            ResumeAction::Send(_) if state == GeneratorState::Created => Ok(Resume::Enter),
            ResumeAction::Send(value) => Ok(Resume::Send(value)),
            ResumeAction::Throw(exception) => self.throw_into(frame_ref, exception, false),
            ResumeAction::Close => {
                let exit = self.new_builtin_exception(ExceptionKind::GeneratorExit);
                self.throw_into(frame_ref, exit, true)
            }
        };
        let result = match resume {
            Ok(resume) => self.enter_frame(frame_ref, resume),
            Err(value) => Ok(FrameExit::Yield(value)),
        };
        let inner = std::mem::replace(&mut self.active_exception, outer.clone())
            .filter(|inner| !outer.as_ref().is_some_and(|outer| outer.is(inner)));

        let mut generator = downcast_mut::<GeneratorObject>(object).expect("checked generator");
        match result {
            Ok(FrameExit::Yield(value)) => {
                generator.state = GeneratorState::Suspended;
                generator.frame = Some(frame);
                generator.saved_exception = inner;
                drop(generator);
                if closing {
                    return Err(RuntimeError::runtime_error(format!("{kind} ignored GeneratorExit")));
                }
                Ok(GeneratorStep::Yielded(value))
            }
            Ok(FrameExit::Return(value)) => {
                generator.state = GeneratorState::Finished;
                drop(generator);
                Ok(GeneratorStep::Returned(if closing { Value::None } else { value }))
            }
            Err(error) => {
                generator.state = GeneratorState::Finished;
                drop(generator);
                if closing
                    && (error_is(&self.types, &error, ExceptionKind::GeneratorExit)
                        || error_is(&self.types, &error, ExceptionKind::StopIteration))
                {
                    return Ok(GeneratorStep::Returned(Value::None));
                }
                if error_is(&self.types, &error, ExceptionKind::StopIteration) {
                    return Err(self.stop_iteration_escaped(error, kind));
                }
                Err(error)
            }
        }
    }

    /// Throws `exception` into a suspended frame, first offering it to the
    /// sub-iterator the frame is delegating to. `Err` carries a value the
    /// sub-iterator yielded instead of finishing.
    fn throw_into(&mut self, frame: &mut Frame, exception: Value, closing: bool) -> Result<Resume, Value> {
        let Some(delegate) = frame.yield_from.take() else {
            return Ok(Resume::Throw(RuntimeError::Object(exception)));
        };
        let outcome = if closing {
            match self.close_iterator(&delegate) {
                Ok(()) => return Ok(Resume::Throw(RuntimeError::Object(exception))),
                Err(error) => return Ok(Resume::Throw(error)),
            }
        } else {
            self.throw_to_delegate(&delegate, exception)
        };
        match outcome {
            Delegation::Yielded(value) => {
                frame.yield_from = Some(delegate);
                Err(value)
            }
            Delegation::Resume(resume) => {
                if let Resume::Send(value) = resume {
                    // The sub-iterator finished: leave the delegation loop
                    // with its return value in place of the receiver.
                    frame.pop();
                    frame.push(value);
                    frame.pc = delegation_exit(frame);
                    return Ok(Resume::Enter);
                }
                Ok(resume)
            }
        }
    }

    fn throw_to_delegate(&mut self, delegate: &Value, exception: Value) -> Delegation {
        let step = if let Some(object) = delegate.as_object().filter(|object| is_a::<GeneratorObject>(object)) {
            self.resume_generator(object, ResumeAction::Throw(exception))
        } else {
            match protocol::get_attr_opt(self, delegate, "throw") {
                Ok(Some(throw)) => match self.call_value(&throw, Args::new(vec![exception])) {
                    Ok(value) => Ok(GeneratorStep::Yielded(value)),
                    Err(error) if error_is(&self.types, &error, ExceptionKind::StopIteration) => {
                        Ok(GeneratorStep::Returned(stop_iteration_value(&error)))
                    }
                    Err(error) => Err(error),
                },
                Ok(None) => Err(RuntimeError::Object(exception)),
                Err(error) => Err(error),
            }
        };
        match step {
            Ok(GeneratorStep::Yielded(value)) => Delegation::Yielded(value),
            Ok(GeneratorStep::Returned(value)) => Delegation::Resume(Resume::Send(value)),
            Err(error) => Delegation::Resume(Resume::Throw(error)),
        }
    }

    /// `close()` on whatever a frame delegates to.
    pub(crate) fn close_iterator(&mut self, iterator: &Value) -> RtResult<()> {
        if let Some(object) = iterator.as_object().filter(|object| is_a::<GeneratorObject>(object)) {
            return self.resume_generator(object, ResumeAction::Close).map(|_| ());
        }
        if let Some(close) = protocol::get_attr_opt(self, iterator, "close")? {
            self.call_value(&close, Args::default())?;
        }
        Ok(())
    }

    /// `Send`: one step of `yield from` / `await` on `receiver`.
    pub(crate) fn send_to(&mut self, receiver: &Value, value: Value) -> RtResult<GeneratorStep> {
        if let Some(object) = receiver.as_object().filter(|object| is_a::<GeneratorObject>(object)) {
            return self.resume_generator(object, ResumeAction::Send(value));
        }
        let result = if value.is_none() {
            match protocol::call_special(self, receiver, "__next__", Vec::new()) {
                Ok(Some(item)) => Ok(item),
                Ok(None) => {
                    return match protocol::next_item(self, receiver)? {
                        Some(item) => Ok(GeneratorStep::Yielded(item)),
                        None => Ok(GeneratorStep::Returned(Value::None)),
                    };
                }
                Err(error) => Err(error),
            }
        } else {
            protocol::call_method(self, receiver, "send", vec![value])
        };
        match result {
            Ok(item) => Ok(GeneratorStep::Yielded(item)),
            Err(error) if error_is(&self.types, &error, ExceptionKind::StopIteration) => {
                Ok(GeneratorStep::Returned(stop_iteration_value(&error)))
            }
            Err(error) => Err(error),
        }
    }

    /// `GetYieldFromIter`.
    pub(crate) fn yield_from_iter(&mut self, frame: &Frame, value: Value) -> RtResult<Value> {
        if let Some(object) = value.as_object() {
            let is_coroutine = downcast::<GeneratorObject>(object).map(|generator| generator.is_coroutine);
            match is_coroutine {
                Some(true) if !frame.code.flags.is_coroutine => {
                    return Err(RuntimeError::type_error(
                        "cannot 'yield from' a coroutine object in a non-coroutine generator",
                    ));
                }
                Some(_) => return Ok(value),
                None => {}
            }
        }
        protocol::get_iter(self, &value)
    }

    /// `GetAwaitable`: coroutines directly, anything else via `__await__`.
    pub(crate) fn awaitable(&mut self, value: Value) -> RtResult<Value> {
        if let Some(object) = value.as_object() {
            let is_coroutine = downcast::<GeneratorObject>(object).map(|generator| generator.is_coroutine);
            if is_coroutine == Some(true) {
                return Ok(value);
            }
        }
        match protocol::call_special(self, &value, "__await__", Vec::new())? {
            Some(iterator) => {
                let is_coroutine = iterator
                    .as_object()
                    .and_then(|object| downcast::<GeneratorObject>(object).map(|generator| generator.is_coroutine));
                if is_coroutine == Some(true) {
                    return Err(RuntimeError::type_error("__await__() returned a coroutine"));
                }
                protocol::get_iter(self, &iterator).map_err(|_| {
                    RuntimeError::type_error(format!(
                        "__await__() returned non-iterator of type '{}'",
                        type_name(self, &iterator)
                    ))
                })
            }
            None => Err(RuntimeError::type_error(format!(
                "object {} can't be used in 'await' expression",
                type_name(self, &value)
            ))),
        }
    }

    /// A `StopIteration` leaving a generator body becomes a `RuntimeError`
    /// caused by it.
    fn stop_iteration_escaped(&mut self, error: RuntimeError, kind: &str) -> RuntimeError {
        let stop = self.materialize(error);
        let replacement = self.materialize(RuntimeError::runtime_error(format!("{kind} raised StopIteration")));
        exception::set_cause(&replacement, stop.clone());
        exception::set_attribute(&replacement, "__context__", stop);
        self.unwound = Some(replacement.clone());
        RuntimeError::Object(replacement)
    }

    fn new_builtin_exception(&mut self, kind: ExceptionKind) -> Value {
        self.materialize(RuntimeError::new(kind, String::new()))
    }
}

fn finish(object: &ObjectRef) {
    if let Some(mut generator) = downcast_mut::<GeneratorObject>(object) {
        generator.state = GeneratorState::Finished;
        generator.frame = None;
    }
}

/// Instruction after a delegation loop. A frame suspended inside the loop
/// sits on the `Jump` back to its `Send`, whose target is the loop exit.
fn delegation_exit(frame: &Frame) -> usize {
    use crate::bytecode::Instruction;
    let Instruction::Jump(start) = frame.code.instructions[frame.pc] else {
        unreachable!("yield from suspends before the jump back to Send");
    };
    match frame.code.instructions[start as usize] {
        Instruction::Send(exit) => exit as usize,
        other => unreachable!("delegation loop starts with Send, found {other}"),
    }
}
