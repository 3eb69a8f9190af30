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

//! Call frames and the per-thread frame stack.
//!
//! Frame identity is an arena-style handle ([`FrameId`]) allocated from a
//! process-wide counter, never a pointer into runtime memory: the engine
//! keys its per-frame bookkeeping by this handle, so the frame's own shape
//! stays owned by the runtime. A coroutine keeps its frame (and therefore
//! its id and locals) across suspensions; an ordinary call gets a fresh
//! frame per invocation.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use super::{CodeUnit, OpKind, Value};

/// Identity of one in-progress call, unique for the process lifetime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[display("frame.{_0}")]
pub struct FrameId(u64);

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(0);

impl FrameId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An insertion-ordered name → value table.
///
/// Used for frame locals, module globals and object attributes. Updating an
/// existing name keeps its position; new names append. Iteration order is
/// therefore binding order, which is what stabilizes the engine's output
/// across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Whether a name is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Bind or rebind a name. Rebinding keeps the original position.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Iterate bindings in binding order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Bound names in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut bindings = Self::new();
        for (name, value) in iter {
            bindings.set(name, value);
        }
        bindings
    }
}

/// One in-progress call of the observed runtime.
#[derive(Debug, Clone)]
pub struct Frame {
    id: FrameId,
    code: Arc<CodeUnit>,
    /// Current line number (1-based)
    pub line: u32,
    /// Classification of the last executed instruction
    pub last_op: OpKind,
    /// Local bindings, in binding order
    pub locals: Bindings,
    /// Bindings of the lexically enclosing scope, if any
    pub enclosing: Option<Arc<Bindings>>,
    /// Module-level bindings
    pub globals: Arc<Bindings>,
}

impl Frame {
    /// Create a frame positioned at the code unit's definition line.
    pub fn new(code: Arc<CodeUnit>, globals: Arc<Bindings>, locals: Bindings) -> Self {
        Self {
            id: FrameId::next(),
            line: code.first_line,
            last_op: OpKind::Other,
            code,
            locals,
            enclosing: None,
            globals,
        }
    }

    /// Attach an enclosing scope.
    pub fn with_enclosing(mut self, enclosing: Arc<Bindings>) -> Self {
        self.enclosing = Some(enclosing);
        self
    }

    /// This frame's identity.
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// The code unit this frame executes.
    pub fn code(&self) -> &Arc<CodeUnit> {
        &self.code
    }

    /// Resolve a name against locals, then the enclosing scope, then globals.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals
            .get(name)
            .or_else(|| self.enclosing.as_ref().and_then(|e| e.get(name)))
            .or_else(|| self.globals.get(name))
    }

    /// Locals in declaration order: names known to the code unit first (in
    /// its declared order), then late bindings in binding order.
    pub fn ordered_locals(&self) -> Vec<(&str, &Value)> {
        let declared = self.code.var_order.len();
        let mut items: Vec<(&str, &Value)> = self.locals.iter().collect();
        items.sort_by_key(|(name, _)| self.code.declaration_index(name).unwrap_or(declared));
        items
    }
}

/// The stack of live frames on one thread.
///
/// Events are delivered with the stack borrowed read-only; the event's frame
/// is the top and its callers are below it.
#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    /// The frame the current event belongs to.
    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Frames below the top, nearest caller first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev().skip(1)
    }

    /// All live frames, outermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Current stack depth.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is live.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub(crate) fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }
}
