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

//! The dynamic value model of the observed runtime.
//!
//! Every local variable, watch-expression result, argument and return value
//! the engine reports is one of these. The model is deliberately small:
//! scalars, an insertion-ordered sequence and mapping, and an
//! attribute-bearing object with a stable identity address. The identity
//! address only exists so that the default rendering of an object is
//! non-deterministic across runs, which is exactly what normalized output
//! mode has to scrub.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::Bindings;

/// A value of the observed runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The absent value. Also what a body without an explicit result returns.
    None,
    /// Boolean scalar
    Bool(bool),
    /// Integer scalar
    Int(i64),
    /// Floating-point scalar
    Float(f64),
    /// Text
    Str(String),
    /// Insertion-ordered sequence
    Seq(Vec<Value>),
    /// Insertion-ordered mapping
    Map(Vec<(Value, Value)>),
    /// An instance with named attributes and an identity address
    Object(Object),
}

/// An attribute-bearing instance of the observed runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Class name, reported by [`Value::class_name`] and used by
    /// is-instance renderer rules
    pub class: String,
    /// Own attributes, in declaration order
    pub attrs: Bindings,
    /// Identity address baked into the default rendering
    pub addr: u64,
}

// Identity addresses only have to look like addresses and differ between
// instances. They are never dereferenced.
static NEXT_ADDR: AtomicU64 = AtomicU64::new(0x7f51_3000);

impl Object {
    /// Create an empty instance of the given class with a fresh identity address.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            attrs: Bindings::new(),
            addr: NEXT_ADDR.fetch_add(0x40, Ordering::Relaxed),
        }
    }

    /// Add an attribute, builder style.
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.set(name, value);
        self
    }
}

impl Value {
    /// Build an object value.
    pub fn object(object: Object) -> Self {
        Self::Object(object)
    }

    /// The class name of this value: the builtin type name for scalars and
    /// containers, the object's class for instances.
    pub fn class_name(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Seq(_) => "seq",
            Self::Map(_) => "map",
            Self::Object(object) => &object.class,
        }
    }

    /// Whether the value supports key iteration (mapping policy for
    /// structural expansion).
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Whether the value supports length and index access (sequence policy
    /// for structural expansion). Text counts: its items are its characters.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Seq(_) | Self::Str(_))
    }

    /// Sequence length, if [`Value::is_sequence`].
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Seq(items) => Some(items.len()),
            Self::Str(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    /// Whether this is a zero-length sequence.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|len| len == 0)
    }

    /// Index access with negative-index wrapping, if the value is a sequence.
    pub fn index(&self, index: i64) -> Option<Value> {
        let len = self.len()? as i64;
        let effective = if index < 0 { index + len } else { index };
        if !(0..len).contains(&effective) {
            return None;
        }
        match self {
            Self::Seq(items) => items.get(effective as usize).cloned(),
            Self::Str(text) => {
                text.chars().nth(effective as usize).map(|c| Self::Str(c.to_string()))
            }
            _ => None,
        }
    }

    /// Mapping lookup by structural key equality, if the value is a mapping.
    pub fn key(&self, key: &Value) -> Option<Value> {
        match self {
            Self::Map(entries) => {
                entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
            }
            _ => None,
        }
    }

    /// The runtime's default textual representation.
    ///
    /// This is the raw form the value renderer starts from; it contains the
    /// identity address for objects and is unbounded in length.
    pub fn repr(&self) -> String {
        match self {
            Self::None => "none".into(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format!("{f:?}"),
            Self::Str(s) => format!("{s:?}"),
            Self::Seq(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Map(entries) => {
                let inner: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).collect();
                format!("{{{}}}", inner.join(", "))
            }
            Self::Object(object) => format!("<{} at 0x{:x}>", object.class, object.addr),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}
