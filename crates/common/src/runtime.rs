// XTrace - Execution Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The host-runtime execution driver.
//!
//! This module is the runtime side of the tracing contract. It owns the
//! per-thread frame stack and the per-thread hook slot, and it delivers one
//! [`TraceEvent`] per low-level execution step to whatever hook is
//! installed: a frame entry (`call`), each executed line (`line`), and the
//! frame's exit (`return`, preceded by `exception` when unwinding).
//!
//! Callables come in three kinds. Ordinary functions run to completion in
//! [`Call::invoke`]. Generator functions are [`Call::instantiate`]d into a
//! [`Coroutine`] that is driven step by step with [`Resume::resume`]; the
//! coroutine keeps its frame (identity and locals included) across
//! suspensions, and every resumption is delivered as a fresh `call` event
//! followed by a `return` event whose frame shows a yield-class last
//! instruction. Natively-asynchronous functions carry [`FnKind::Async`] and
//! refuse to run here; they exist so wrappers can reject them explicitly.
//!
//! Hooks are passive observers. They are invoked synchronously with the
//! frame stack borrowed read-only and must not re-enter the runtime
//! (install hooks or invoke callables) from inside `on_event`.

use std::{
    cell::{Cell, RefCell},
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};

use crate::types::{
    Bindings, CodeUnit, FnKind, Frame, FrameId, FrameStack, OpKind, RuntimeError, RuntimeResult,
    TraceEvent, Value,
};

/// A shared handle to an installed execution-event hook.
pub type HookRef = Arc<dyn TraceHook>;

/// An execution-event hook, called once per low-level runtime event.
///
/// The hook runs on the thread the event occurred on, with `stack` borrowed
/// for the duration of the call; the event's frame is `stack.top()`.
#[auto_impl(&, Arc)]
pub trait TraceHook: Send + Sync {
    /// Observe one event. Must never panic and must not re-enter the runtime.
    fn on_event(&self, stack: &FrameStack, event: &TraceEvent);
}

struct ThreadRuntime {
    stack: FrameStack,
    hook: Option<HookRef>,
}

thread_local! {
    static RUNTIME: RefCell<ThreadRuntime> =
        RefCell::new(ThreadRuntime { stack: FrameStack::default(), hook: None });
}

/// Install (or clear) the execution-event hook for the current thread,
/// returning the hook it displaced.
pub fn install_hook(hook: Option<HookRef>) -> Option<HookRef> {
    RUNTIME.with(|rt| std::mem::replace(&mut rt.borrow_mut().hook, hook))
}

/// The hook currently installed on this thread, if any.
pub fn installed_hook() -> Option<HookRef> {
    RUNTIME.with(|rt| rt.borrow().hook.clone())
}

/// Identity of the innermost live frame on this thread, if any.
pub fn current_frame_id() -> Option<FrameId> {
    RUNTIME.with(|rt| rt.borrow().stack.top().map(|f| f.id()))
}

/// Number of live frames on this thread.
pub fn call_depth() -> usize {
    RUNTIME.with(|rt| rt.borrow().stack.len())
}

static NEXT_THREAD_IDENT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_IDENT: Cell<Option<u64>> = const { Cell::new(None) };
}

/// A small, stable identifier for the current thread, assigned on first use.
pub fn thread_ident() -> u64 {
    THREAD_IDENT.with(|cell| match cell.get() {
        Some(ident) => ident,
        None => {
            let ident = NEXT_THREAD_IDENT.fetch_add(1, Ordering::Relaxed);
            cell.set(Some(ident));
            ident
        }
    })
}

fn dispatch(event: &TraceEvent) {
    let hook = RUNTIME.with(|rt| rt.borrow().hook.clone());
    if let Some(hook) = hook {
        RUNTIME.with(|rt| {
            let rt = rt.borrow();
            hook.on_event(&rt.stack, event);
        });
    }
}

fn push_frame(frame: Frame) {
    RUNTIME.with(|rt| rt.borrow_mut().stack.push(frame));
}

fn pop_frame() -> Option<Frame> {
    RUNTIME.with(|rt| rt.borrow_mut().stack.pop())
}

fn set_top_op(op: OpKind) {
    RUNTIME.with(|rt| {
        if let Some(frame) = rt.borrow_mut().stack.top_mut() {
            frame.last_op = op;
        }
    });
}

/// Pops the pushed frame even if the body panics, so a broken observed
/// program cannot corrupt the thread's stack for its siblings.
struct StackGuard {
    armed: bool,
}

impl StackGuard {
    fn new() -> Self {
        Self { armed: true }
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = pop_frame();
        }
    }
}

/// Execution context handed to a running body.
///
/// An activation is a capability, not data: its operations act on the
/// innermost frame of the current thread. It is deliberately `!Send` so a
/// body cannot carry it to another thread's stack.
pub struct Activation {
    _not_send: PhantomData<*const ()>,
}

impl Activation {
    fn new() -> Self {
        Self { _not_send: PhantomData }
    }

    /// Move execution to line `line` and deliver the `line` event. Call this
    /// before performing the line's effects, so the event observes the state
    /// the line starts from.
    pub fn line(&mut self, line: u32) {
        RUNTIME.with(|rt| {
            if let Some(frame) = rt.borrow_mut().stack.top_mut() {
                frame.line = line;
                frame.last_op = OpKind::Other;
            }
        });
        dispatch(&TraceEvent::Line);
    }

    /// Bind or rebind a local.
    pub fn set(&mut self, name: &str, value: Value) {
        RUNTIME.with(|rt| {
            if let Some(frame) = rt.borrow_mut().stack.top_mut() {
                frame.locals.set(name, value);
            }
        });
    }

    /// Read a name through the frame's full lookup chain
    /// (locals, enclosing scope, module globals).
    pub fn get(&self, name: &str) -> Option<Value> {
        RUNTIME.with(|rt| rt.borrow().stack.top().and_then(|f| f.lookup(name).cloned()))
    }

    /// Read a name, raising the runtime's name-resolution error when unbound.
    pub fn require(&self, name: &str) -> RuntimeResult<Value> {
        self.get(name).ok_or_else(|| RuntimeError::name_error(name))
    }

    /// Invoke another callable from inside this frame.
    pub fn call(&mut self, callee: &dyn Call, args: Vec<Value>) -> RuntimeResult<Value> {
        callee.invoke(args)
    }
}

/// Body of an ordinary function.
pub type PlainBody = Box<dyn Fn(&mut Activation) -> RuntimeResult<Value> + Send + Sync>;

/// One resumable step machine of a coroutine, created fresh per instantiation.
pub type StepFn =
    Box<dyn FnMut(&mut Activation, ResumeAction) -> RuntimeResult<CoroutineStep> + Send>;

/// Factory producing the step machine of a generator function.
pub type StepFactory = Box<dyn Fn() -> StepFn + Send + Sync>;

/// How a suspended coroutine is being resumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResumeAction {
    /// First resumption after instantiation
    Start,
    /// Resume with a value delivered to the suspension point
    Send(Value),
    /// Resume by injecting an error at the suspension point
    Throw(RuntimeError),
}

/// What a coroutine resumption produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoroutineStep {
    /// The coroutine suspended, producing a value
    Yielded(Value),
    /// The coroutine ran to completion, producing its final value
    Complete(Value),
}

/// A callable of the observed runtime.
#[auto_impl(&, Arc)]
pub trait Call: Send + Sync {
    /// The code unit behind this callable.
    fn code(&self) -> &Arc<CodeUnit>;

    /// Run an ordinary callable to completion.
    fn invoke(&self, args: Vec<Value>) -> RuntimeResult<Value>;

    /// Instantiate a generator callable into a resumable coroutine.
    fn instantiate(&self, args: Vec<Value>) -> RuntimeResult<Box<dyn Resume>>;
}

/// A suspended computation that can be driven forward.
pub trait Resume: Send {
    /// Perform one resumption.
    fn resume(&mut self, action: ResumeAction) -> RuntimeResult<CoroutineStep>;
}

enum FunctionBody {
    Plain(PlainBody),
    Generator(StepFactory),
    Async,
}

/// A function of the observed runtime: a code unit, its module globals, and
/// a body.
pub struct Function {
    code: Arc<CodeUnit>,
    globals: Arc<Bindings>,
    enclosing: Option<Arc<Bindings>>,
    body: FunctionBody,
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.code.name)
            .field("kind", &self.code.kind)
            .finish()
    }
}

impl Function {
    /// Define an ordinary function.
    pub fn new(mut code: CodeUnit, globals: Arc<Bindings>, body: PlainBody) -> Self {
        code.kind = FnKind::Plain;
        Self { code: Arc::new(code), globals, enclosing: None, body: FunctionBody::Plain(body) }
    }

    /// Define a generator function.
    pub fn generator(mut code: CodeUnit, globals: Arc<Bindings>, factory: StepFactory) -> Self {
        code.kind = FnKind::Generator;
        Self {
            code: Arc::new(code),
            globals,
            enclosing: None,
            body: FunctionBody::Generator(factory),
        }
    }

    /// Declare a natively-asynchronous function. It cannot be run by this
    /// driver; wrappers reject it at configuration time.
    pub fn asynchronous(mut code: CodeUnit, globals: Arc<Bindings>) -> Self {
        code.kind = FnKind::Async;
        Self { code: Arc::new(code), globals, enclosing: None, body: FunctionBody::Async }
    }

    /// Attach an enclosing scope, for closures.
    pub fn with_enclosing(mut self, enclosing: Arc<Bindings>) -> Self {
        self.enclosing = Some(enclosing);
        self
    }

    fn new_frame(&self, args: Vec<Value>) -> RuntimeResult<Frame> {
        let params = &self.code.params;
        if args.len() != params.len() {
            return Err(RuntimeError::type_error(format!(
                "{}() takes {} arguments but {} were given",
                self.code.name,
                params.len(),
                args.len()
            )));
        }
        let locals: Bindings = params.iter().cloned().zip(args).collect();
        let mut frame = Frame::new(self.code.clone(), self.globals.clone(), locals);
        if let Some(enclosing) = &self.enclosing {
            frame = frame.with_enclosing(enclosing.clone());
        }
        Ok(frame)
    }
}

impl Call for Function {
    fn code(&self) -> &Arc<CodeUnit> {
        &self.code
    }

    fn invoke(&self, args: Vec<Value>) -> RuntimeResult<Value> {
        let FunctionBody::Plain(body) = &self.body else {
            return Err(RuntimeError::type_error(format!(
                "{}() is not an ordinary callable",
                self.code.name
            )));
        };
        let frame = self.new_frame(args)?;
        push_frame(frame);
        let _guard = StackGuard::new();
        dispatch(&TraceEvent::Call);

        let mut cx = Activation::new();
        let result = body(&mut cx);
        match &result {
            Ok(value) => {
                set_top_op(OpKind::Return);
                dispatch(&TraceEvent::Return(value.clone()));
            }
            Err(error) => {
                set_top_op(OpKind::Other);
                dispatch(&TraceEvent::Exception(error.clone()));
                // The unwinding exit still produces a `return` event, with an
                // absent value and a non-return last instruction.
                dispatch(&TraceEvent::Return(Value::None));
            }
        }
        result
    }

    fn instantiate(&self, args: Vec<Value>) -> RuntimeResult<Box<dyn Resume>> {
        let FunctionBody::Generator(factory) = &self.body else {
            return Err(RuntimeError::type_error(format!(
                "{}() is not a generator",
                self.code.name
            )));
        };
        let frame = self.new_frame(args)?;
        Ok(Box::new(Coroutine { frame: Some(frame), step: factory(), finished: false }))
    }
}

/// A suspendable invocation of a generator function.
///
/// The frame persists across resumptions: locals keep their values and the
/// frame keeps its identity. While resuming, the frame is temporarily moved
/// onto the thread's stack.
pub struct Coroutine {
    frame: Option<Frame>,
    step: StepFn,
    finished: bool,
}

impl Coroutine {
    /// Whether the coroutine has run to completion (or died on an error).
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Resume for Coroutine {
    fn resume(&mut self, action: ResumeAction) -> RuntimeResult<CoroutineStep> {
        if self.finished {
            return Err(RuntimeError::new("StopIteration", "coroutine already finished"));
        }
        let frame = self
            .frame
            .take()
            .ok_or_else(|| RuntimeError::new("RuntimeError", "coroutine frame is unavailable"))?;
        push_frame(frame);
        let mut guard = StackGuard::new();
        dispatch(&TraceEvent::Call);

        let mut cx = Activation::new();
        let result = (self.step)(&mut cx, action);
        match &result {
            Ok(CoroutineStep::Yielded(value)) => {
                set_top_op(OpKind::Yield);
                dispatch(&TraceEvent::Return(value.clone()));
            }
            Ok(CoroutineStep::Complete(value)) => {
                self.finished = true;
                set_top_op(OpKind::Return);
                dispatch(&TraceEvent::Return(value.clone()));
            }
            Err(error) => {
                self.finished = true;
                // The frame may still carry the yield-class op of its last
                // suspension; this exit is an unwind, not a suspension.
                set_top_op(OpKind::Other);
                dispatch(&TraceEvent::Exception(error.clone()));
                dispatch(&TraceEvent::Return(Value::None));
            }
        }

        guard.armed = false;
        self.frame = pop_frame();
        result
    }
}

/// A class of the observed runtime: a named set of own methods and an
/// optional parent class.
#[derive(Clone)]
pub struct ClassDef {
    /// Class name
    pub name: String,
    parent: Option<Arc<ClassDef>>,
    methods: Vec<(String, Arc<dyn Call>)>,
}

impl std::fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.methods.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("ClassDef").field("name", &self.name).field("methods", &names).finish()
    }
}

impl ClassDef {
    /// Create a class with no methods.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parent: None, methods: Vec::new() }
    }

    /// Set the parent class.
    pub fn with_parent(mut self, parent: Arc<ClassDef>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Define an own method, builder style.
    pub fn with_method(mut self, name: impl Into<String>, method: Arc<dyn Call>) -> Self {
        self.methods.push((name.into(), method));
        self
    }

    /// The parent class, if any.
    pub fn parent(&self) -> Option<&Arc<ClassDef>> {
        self.parent.as_ref()
    }

    /// Own methods only, in definition order.
    pub fn own_methods(&self) -> impl Iterator<Item = (&str, &Arc<dyn Call>)> {
        self.methods.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Resolve a method, walking the parent chain.
    pub fn method(&self, name: &str) -> Option<Arc<dyn Call>> {
        self.methods
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.clone())
            .or_else(|| self.parent.as_ref().and_then(|p| p.method(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHook {
        events: Mutex<Vec<String>>,
    }

    impl TraceHook for RecordingHook {
        fn on_event(&self, stack: &FrameStack, event: &TraceEvent) {
            let name = stack.top().map(|f| f.code().name.clone()).unwrap_or_default();
            self.events.lock().unwrap().push(format!("{name}:{}", event.name()));
        }
    }

    fn identity_function() -> Function {
        let code = CodeUnit::new("identity", "test_runtime", "test_runtime.xt", 1)
            .with_params(["x"]);
        Function::new(
            code,
            Arc::new(Bindings::new()),
            Box::new(|cx| {
                cx.line(2);
                cx.require("x")
            }),
        )
    }

    #[test]
    fn test_invoke_dispatches_call_line_return() {
        let hook = Arc::new(RecordingHook::default());
        let previous = install_hook(Some(hook.clone()));

        let result = identity_function().invoke(vec![Value::Int(7)]);
        install_hook(previous);

        assert_eq!(result, Ok(Value::Int(7)));
        let events = hook.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["identity:call", "identity:line", "identity:return"]
        );
    }

    #[test]
    fn test_arity_mismatch_is_a_runtime_error() {
        let err = identity_function().invoke(vec![]).unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn test_exception_dispatches_exception_then_return() {
        let code = CodeUnit::new("boom", "test_runtime", "test_runtime.xt", 1);
        let f = Function::new(
            code,
            Arc::new(Bindings::new()),
            Box::new(|cx| {
                cx.line(2);
                Err(RuntimeError::new("ValueError", "nope"))
            }),
        );

        let hook = Arc::new(RecordingHook::default());
        let previous = install_hook(Some(hook.clone()));
        let result = f.invoke(vec![]);
        install_hook(previous);

        assert!(result.is_err());
        let events = hook.events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["boom:call", "boom:line", "boom:exception", "boom:return"]
        );
    }

    #[test]
    fn test_coroutine_keeps_locals_across_resumes() {
        let code = CodeUnit::new("ticker", "test_runtime", "test_runtime.xt", 1)
            .with_params(["start"])
            .with_var_order(["start", "current"]);
        let f = Function::generator(
            code,
            Arc::new(Bindings::new()),
            Box::new(|| {
                let step: StepFn = Box::new(|cx: &mut Activation, action: ResumeAction| {
                    if let ResumeAction::Throw(err) = action {
                        return Err(err);
                    }
                    cx.line(2);
                    let current = match cx.get("current") {
                        Some(Value::Int(i)) => i + 1,
                        _ => match cx.require("start")? {
                            Value::Int(i) => i,
                            other => {
                                return Err(RuntimeError::type_error(format!(
                                    "expected int, got {}",
                                    other.class_name()
                                )))
                            }
                        },
                    };
                    cx.set("current", Value::Int(current));
                    if current >= 12 {
                        Ok(CoroutineStep::Complete(Value::None))
                    } else {
                        Ok(CoroutineStep::Yielded(Value::Int(current)))
                    }
                });
                step
            }),
        );

        let mut coroutine = f.instantiate(vec![Value::Int(10)]).unwrap();
        assert_eq!(
            coroutine.resume(ResumeAction::Start).unwrap(),
            CoroutineStep::Yielded(Value::Int(10))
        );
        assert_eq!(
            coroutine.resume(ResumeAction::Send(Value::None)).unwrap(),
            CoroutineStep::Yielded(Value::Int(11))
        );
        assert_eq!(
            coroutine.resume(ResumeAction::Send(Value::None)).unwrap(),
            CoroutineStep::Complete(Value::None)
        );
        // Exhausted coroutines refuse further resumption.
        assert_eq!(
            coroutine.resume(ResumeAction::Start).unwrap_err().name,
            "StopIteration"
        );
    }

    #[test]
    fn test_stack_is_empty_between_invocations() {
        let f = identity_function();
        let _ = f.invoke(vec![Value::Int(1)]);
        assert_eq!(call_depth(), 0);
        assert!(current_frame_id().is_none());
    }

    #[test]
    fn test_method_resolution_walks_parents_but_own_methods_do_not() {
        let base = Arc::new(ClassDef::new("Base").with_method("inherited", {
            let f: Arc<dyn Call> = Arc::new(identity_function());
            f
        }));
        let derived = ClassDef::new("Derived").with_parent(base).with_method("own", {
            let f: Arc<dyn Call> = Arc::new(identity_function());
            f
        });

        assert!(derived.method("inherited").is_some());
        assert!(derived.method("own").is_some());
        let own: Vec<&str> = derived.own_methods().map(|(n, _)| n).collect();
        assert_eq!(own, vec!["own"]);
    }
}
