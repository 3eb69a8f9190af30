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

//! Wrapping callables into traced callables.
//!
//! A wrapped callable behaves identically to the original, except that the
//! session is active for the duration of each invocation. The wrap-time
//! dispatch follows the callable's kind:
//!
//! - ordinary callables get one activation per invocation;
//! - generator callables get one activation per *resumption* (start, each
//!   send, each injected error), because the frame is not executing between
//!   suspension points and suspension must not read as termination;
//! - natively-asynchronous callables are rejected outright, since their
//!   interleaving belongs to an external scheduler the engine cannot see.
//!
//! Class wrapping covers a class's own plain and generator methods and
//! silently skips asynchronous ones; inherited methods are never touched.

use std::sync::Arc;

use xtrace_common::{
    runtime::{Call, ClassDef, CoroutineStep, Resume, ResumeAction},
    types::{CodeUnit, FnKind, RuntimeResult, Value},
};

use crate::{config::ConfigError, tracer::Tracer};

/// A callable wrapped by a tracing session.
pub struct TracedFunction {
    tracer: Arc<Tracer>,
    inner: Arc<dyn Call>,
}

impl std::fmt::Debug for TracedFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedFunction").field("name", &self.inner.code().name).finish()
    }
}

impl TracedFunction {
    /// The callable this wrapper observes.
    pub fn inner(&self) -> &Arc<dyn Call> {
        &self.inner
    }
}

impl Call for TracedFunction {
    fn code(&self) -> &Arc<CodeUnit> {
        self.inner.code()
    }

    fn invoke(&self, args: Vec<Value>) -> RuntimeResult<Value> {
        if self.tracer.is_disabled() {
            return self.inner.invoke(args);
        }
        let _session = self.tracer.enter();
        self.inner.invoke(args)
    }

    fn instantiate(&self, args: Vec<Value>) -> RuntimeResult<Box<dyn Resume>> {
        // Instantiation runs no body code, so it is not bracketed; the
        // resumptions are.
        let coroutine = self.inner.instantiate(args)?;
        Ok(Box::new(TracedCoroutine { tracer: self.tracer.clone(), inner: coroutine }))
    }
}

/// A coroutine whose every resumption runs under its own activation.
pub struct TracedCoroutine {
    tracer: Arc<Tracer>,
    inner: Box<dyn Resume>,
}

impl Resume for TracedCoroutine {
    fn resume(&mut self, action: ResumeAction) -> RuntimeResult<CoroutineStep> {
        if self.tracer.is_disabled() {
            return self.inner.resume(action);
        }
        let session = self.tracer.enter();
        let result = self.inner.resume(action);
        // Close the bracket (and report its elapsed time) before handing
        // the step to the consumer.
        drop(session);
        result
    }
}

impl Tracer {
    fn wrap_unchecked(self: &Arc<Self>, callable: Arc<dyn Call>) -> TracedFunction {
        if !self.is_disabled() {
            self.add_target_code(callable.code().id());
        }
        TracedFunction { tracer: self.clone(), inner: callable }
    }

    /// Mark a callable as a trace target and return a wrapper with
    /// identical observable behavior that activates this session around
    /// each invocation (or each resumption, for generator callables).
    ///
    /// Wrapping a natively-asynchronous callable is a configuration error.
    pub fn wrap(self: &Arc<Self>, callable: Arc<dyn Call>) -> Result<TracedFunction, ConfigError> {
        match callable.code().kind {
            FnKind::Async => Err(ConfigError::AsyncNotSupported(callable.code().name.clone())),
            FnKind::Plain | FnKind::Generator => Ok(self.wrap_unchecked(callable)),
        }
    }

    /// Wrap every own plain and generator method of a class, skipping
    /// asynchronous methods and leaving inherited methods untouched.
    pub fn wrap_class(self: &Arc<Self>, class: &ClassDef) -> ClassDef {
        let mut wrapped = ClassDef::new(class.name.clone());
        if let Some(parent) = class.parent() {
            wrapped = wrapped.with_parent(parent.clone());
        }
        for (name, method) in class.own_methods() {
            let method: Arc<dyn Call> = match method.code().kind {
                FnKind::Async => method.clone(),
                FnKind::Plain | FnKind::Generator => Arc::new(self.wrap_unchecked(method.clone())),
            };
            wrapped = wrapped.with_method(name, method);
        }
        wrapped
    }
}
