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

//! Code units: the static description of a callable.
//!
//! A [`CodeUnit`] is what a frame executes. It carries the metadata the
//! engine needs to make per-event decisions without touching the live
//! frame: identity (for the target set), parameter and variable declaration
//! order (for stable output ordering), the definition site (for source
//! resolution) and the callable kind (for wrap-time dispatch).

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Unique identity of a code unit, allocated from a process-wide counter.
///
/// Code identity is what the target set stores; two wrappers around the same
/// function agree on it, and it survives the code unit being shared across
/// threads.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[display("code.{_0}")]
pub struct CodeId(u64);

static NEXT_CODE_ID: AtomicU64 = AtomicU64::new(0);

impl CodeId {
    fn next() -> Self {
        Self(NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The kind of a callable, used by wrap-time dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FnKind {
    /// An ordinary callable: runs to completion in one activation
    Plain,
    /// A suspendable callable: instantiated into a coroutine and resumed step by step
    Generator,
    /// A natively-asynchronous callable: exists to be rejected at wrap time
    Async,
}

/// Classification of the last executed instruction of a frame.
///
/// This is the only instruction-level detail the engine needs: a `return`
/// event whose frame did not just execute a return- or yield-class
/// instruction is an unwind, not a normal exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// A return-class instruction
    Return,
    /// A yield-class instruction (suspension point)
    Yield,
    /// Anything else
    Other,
}

/// Static description of one callable.
#[derive(Debug, Clone)]
pub struct CodeUnit {
    id: CodeId,
    /// Callable name as reported in diagnostics
    pub name: String,
    /// Owning module name; half of the source-cache key
    pub module: String,
    /// Source file path; the other half of the source-cache key
    pub file: PathBuf,
    /// Line of the definition site. May point at an annotation line above
    /// the definition itself; the engine corrects for that.
    pub first_line: u32,
    /// Declared parameter names, in order
    pub params: Vec<String>,
    /// All declared variable names (parameters first), in declaration order
    pub var_order: Vec<String>,
    /// Callable kind
    pub kind: FnKind,
    /// Source text supplied by the unit itself, preferred over reading
    /// `file` from disk (the analogue of loader-provided source)
    pub source: Option<Vec<String>>,
}

impl CodeUnit {
    /// Create a plain code unit with no parameters.
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        file: impl AsRef<Path>,
        first_line: u32,
    ) -> Self {
        Self {
            id: CodeId::next(),
            name: name.into(),
            module: module.into(),
            file: file.as_ref().to_path_buf(),
            first_line,
            params: Vec::new(),
            var_order: Vec::new(),
            kind: FnKind::Plain,
            source: None,
        }
    }

    /// Set the declared parameters. Parameters are prepended to the
    /// declaration order if not already listed.
    pub fn with_params<S: Into<String>>(mut self, params: impl IntoIterator<Item = S>) -> Self {
        self.params = params.into_iter().map(Into::into).collect();
        for (i, param) in self.params.iter().enumerate() {
            if !self.var_order.contains(param) {
                self.var_order.insert(i.min(self.var_order.len()), param.clone());
            }
        }
        self
    }

    /// Set the full declaration order of locals (parameters included).
    pub fn with_var_order<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.var_order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Set the callable kind.
    pub fn with_kind(mut self, kind: FnKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach in-memory source text.
    pub fn with_source<S: Into<String>>(mut self, lines: impl IntoIterator<Item = S>) -> Self {
        self.source = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// This unit's identity.
    pub fn id(&self) -> CodeId {
        self.id
    }

    /// Position of a name in the declaration order, if declared.
    pub fn declaration_index(&self, name: &str) -> Option<usize> {
        self.var_order.iter().position(|v| v == name)
    }
}
