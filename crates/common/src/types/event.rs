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

//! The trace-event vocabulary delivered to installed hooks, and the error
//! type of the observed program.

use serde::{Deserialize, Serialize};

use super::Value;

/// An error raised by the observed program.
///
/// The engine reports these; it never creates, swallows or alters them. The
/// `name`/`message` split mirrors how dynamic runtimes present errors
/// (`TypeError: ...`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RuntimeError {
    /// Error class name, e.g. `TypeError`
    pub name: String,
    /// Human-readable description
    pub message: String,
}

impl RuntimeError {
    /// Create an error with an explicit class name.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into() }
    }

    /// Shorthand for the runtime's type errors.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Shorthand for the runtime's name-resolution errors.
    pub fn name_error(name: &str) -> Self {
        Self::new("NameError", format!("name '{name}' is not defined"))
    }
}

/// Result type of observed-program execution.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// One low-level execution event, dispatched to the installed hook with the
/// frame stack it occurred on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A frame was entered (first execution or coroutine resumption)
    Call,
    /// The frame is about to execute a new line
    Line,
    /// The frame is exiting, yielding or unwinding; the payload is the
    /// outgoing value (`Value::None` when unwinding)
    Return(Value),
    /// An error was raised inside the frame and is propagating
    Exception(RuntimeError),
}

impl TraceEvent {
    /// The lower-case event name used in log output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Line => "line",
            Self::Return(_) => "return",
            Self::Exception(_) => "exception",
        }
    }
}
