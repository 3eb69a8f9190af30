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

//! Watch expressions and their structural expansion.
//!
//! A watch is a compiled expression plus an expansion policy: report just
//! the value, or additionally report its attributes, its mapping keys, or
//! its sequence indices as separate entries. The exploding policy picks
//! between those three by probing the value's shape at evaluation time, one
//! probe per watched value per event.
//!
//! Everything here is best effort: a watch whose expression fails to
//! evaluate contributes nothing, and a member whose access fails is
//! silently skipped. Only constructing a watch from unparsable text is an
//! error, and that happens at configuration time.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::trace;

use xtrace_common::{normalize_expression, types::Frame, types::Value};

use crate::{
    config::ConfigError,
    eval::{evaluate, parse_expression, Expr},
    render::RenderContext,
};

/// Expansion policy of a watch expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchKind {
    /// Report the value only
    Plain,
    /// Additionally report the value's attributes
    Attrs,
    /// Additionally report the value's mapping entries
    Keys,
    /// Additionally report the value's sequence items
    Indices,
    /// Probe the value's shape and pick keys, indices or attributes
    Explode,
}

/// A half-open index restriction over a sequence watch, with negative
/// endpoints counting from the end (so `last(3)` is `start = -3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IndexRange {
    /// First index reported; `None` means the beginning
    pub start: Option<i64>,
    /// First index *not* reported; `None` means the end
    pub end: Option<i64>,
}

impl IndexRange {
    /// Restrict to `[start, end)`.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Self {
        Self { start, end }
    }

    /// The last `n` items.
    pub fn last(n: usize) -> Self {
        Self { start: Some(-(n as i64)), end: None }
    }

    /// The first `n` items.
    pub fn first(n: usize) -> Self {
        Self { start: None, end: Some(n as i64) }
    }

    /// Resolve against a concrete length, clamping both endpoints.
    pub fn resolve(&self, len: usize) -> std::ops::Range<usize> {
        let clamp = |endpoint: i64| -> usize {
            if endpoint < 0 {
                (len as i64 + endpoint).max(0) as usize
            } else {
                (endpoint as usize).min(len)
            }
        };
        let start = self.start.map_or(0, clamp);
        let end = self.end.map_or(len, clamp);
        start..end.max(start)
    }
}

/// One configured watch expression.
///
/// Two watches are equal iff their (kind, normalized source, exclusions,
/// range) fingerprints match; the session deduplicates on that.
#[derive(Debug, Clone)]
pub struct Watch {
    kind: WatchKind,
    source: String,
    normalized: String,
    unambiguous: String,
    expr: Expr,
    exclude: Vec<String>,
    range: Option<IndexRange>,
}

impl PartialEq for Watch {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for Watch {}

impl std::hash::Hash for Watch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

impl Watch {
    fn build(kind: WatchKind, source: &str) -> Result<Self, ConfigError> {
        let source = source.trim().to_string();
        let expr = parse_expression(&source).map_err(|err| ConfigError::InvalidWatch {
            expr: source.clone(),
            reason: err.to_string(),
        })?;
        let unambiguous = if expr.is_postfix_chain() {
            source.clone()
        } else {
            format!("({source})")
        };
        let normalized = normalize_expression(&source);
        Ok(Self { kind, source, normalized, unambiguous, expr, exclude: Vec::new(), range: None })
    }

    /// A watch reporting only the expression's value.
    pub fn plain(source: &str) -> Result<Self, ConfigError> {
        Self::build(WatchKind::Plain, source)
    }

    /// A watch additionally reporting the value's attributes.
    pub fn attrs(source: &str) -> Result<Self, ConfigError> {
        Self::build(WatchKind::Attrs, source)
    }

    /// A watch additionally reporting the value's mapping entries.
    pub fn keys(source: &str) -> Result<Self, ConfigError> {
        Self::build(WatchKind::Keys, source)
    }

    /// A watch additionally reporting the value's sequence items.
    pub fn indices(source: &str) -> Result<Self, ConfigError> {
        Self::build(WatchKind::Indices, source)
    }

    /// A watch that probes the value's shape each event and expands
    /// accordingly.
    pub fn explode(source: &str) -> Result<Self, ConfigError> {
        Self::build(WatchKind::Explode, source)
    }

    /// Exclude members by name: attribute names for attribute expansion,
    /// the text of the key or index for key/index expansion.
    pub fn with_exclude<S: Into<String>>(mut self, exclude: impl IntoIterator<Item = S>) -> Self {
        self.exclude.extend(exclude.into_iter().map(Into::into));
        self
    }

    /// Restrict index expansion to a sub-range. Meaningful for
    /// [`WatchKind::Indices`] and sequence-shaped exploded values.
    pub fn with_range(mut self, range: IndexRange) -> Self {
        self.range = Some(range);
        self
    }

    /// The watch's source text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The watch's expansion policy.
    pub fn kind(&self) -> WatchKind {
        self.kind
    }

    pub(crate) fn fingerprint(&self) -> (WatchKind, &str, Vec<&str>, Option<IndexRange>) {
        let mut exclude: Vec<&str> = self.exclude.iter().map(String::as_str).collect();
        exclude.sort_unstable();
        (self.kind, self.normalized.as_str(), exclude, self.range)
    }

    fn is_excluded(&self, label: &str) -> bool {
        self.exclude.iter().any(|excluded| excluded == label)
    }

    fn is_excluded_key(&self, key: &Value) -> bool {
        match key {
            Value::Str(text) => self.is_excluded(text),
            other => self.is_excluded(&other.repr()),
        }
    }

    /// Evaluate against a frame and produce the `(label, rendered)` entries
    /// this watch contributes, sorted by label. An evaluation failure
    /// produces no entries.
    pub fn items(&self, frame: &Frame, ctx: &RenderContext<'_>) -> Vec<(String, String)> {
        let value = match evaluate(&self.expr, frame) {
            Ok(value) => value,
            Err(err) => {
                trace!(watch = %self.source, %err, "watch expression did not evaluate");
                return Vec::new();
            }
        };

        let mut entries = vec![(self.source.clone(), ctx.render(&value))];

        let policy = match self.kind {
            WatchKind::Explode => {
                if value.is_mapping() {
                    WatchKind::Keys
                } else if value.is_sequence() {
                    WatchKind::Indices
                } else {
                    WatchKind::Attrs
                }
            }
            fixed => fixed,
        };

        match policy {
            WatchKind::Plain | WatchKind::Explode => {}
            WatchKind::Attrs => {
                if let Value::Object(object) = &value {
                    for (name, attr) in object.attrs.iter() {
                        if self.is_excluded(name) {
                            continue;
                        }
                        entries.push((
                            format!("{}.{name}", self.unambiguous),
                            ctx.render(attr),
                        ));
                    }
                }
            }
            WatchKind::Keys => {
                if let Value::Map(pairs) = &value {
                    for (key, item) in pairs {
                        if self.is_excluded_key(key) {
                            continue;
                        }
                        entries.push((
                            format!("{}[{}]", self.unambiguous, ctx.render(key)),
                            ctx.render(item),
                        ));
                    }
                }
            }
            WatchKind::Indices => {
                if let Some(len) = value.len() {
                    let range = self.range.unwrap_or_default().resolve(len);
                    for i in range {
                        if self.is_excluded(&i.to_string()) {
                            continue;
                        }
                        let Some(item) = value.index(i as i64) else { continue };
                        entries.push((
                            format!("{}[{i}]", self.unambiguous),
                            ctx.render(&item),
                        ));
                    }
                }
            }
        }

        entries.into_iter().sorted().collect()
    }
}
