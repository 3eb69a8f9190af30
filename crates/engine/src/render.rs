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

//! Bounded, crash-proof value rendering.
//!
//! Rendering is the one place arbitrary user code (custom renderer rules)
//! meets arbitrary runtime values, so everything here is total: a rule that
//! panics degrades to a fixed failure marker, line breaks are stripped,
//! normalization scrubs identity addresses, and truncation is exact.
//!
//! Custom rules are an ordered list of (predicate, formatter) pairs,
//! evaluated top to bottom; the first matching rule wins and the runtime's
//! default representation is the fallback.

use std::{panic::AssertUnwindSafe, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;

use xtrace_common::{strip_line_breaks, types::Value};

/// Fixed marker substituted when rendering a value fails.
pub const REPR_FAILED: &str = "REPR FAILED";

/// Marker spliced into the middle of a truncated rendering.
const ELLIPSIS: &str = "...";

type FormatFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
enum RulePredicate {
    /// Is-instance match on [`Value::class_name`]
    Class(String),
    /// Arbitrary predicate
    Matches(PredicateFn),
}

/// One custom rendering rule: a predicate and the formatter applied when it
/// matches.
#[derive(Clone)]
pub struct RenderRule {
    predicate: RulePredicate,
    formatter: FormatFn,
}

impl std::fmt::Debug for RenderRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.predicate {
            RulePredicate::Class(class) => {
                f.debug_struct("RenderRule").field("class", class).finish_non_exhaustive()
            }
            RulePredicate::Matches(_) => f.debug_struct("RenderRule").finish_non_exhaustive(),
        }
    }
}

impl RenderRule {
    /// Rule matching every value whose class name equals `class`.
    pub fn for_class(
        class: impl Into<String>,
        formatter: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        Self { predicate: RulePredicate::Class(class.into()), formatter: Arc::new(formatter) }
    }

    /// Rule matching every value the predicate accepts.
    pub fn matching(
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
        formatter: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            predicate: RulePredicate::Matches(Arc::new(predicate)),
            formatter: Arc::new(formatter),
        }
    }

    fn applies(&self, value: &Value) -> bool {
        match &self.predicate {
            RulePredicate::Class(class) => value.class_name() == class,
            // A predicate that panics matches nothing.
            RulePredicate::Matches(predicate) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| predicate(value))).unwrap_or(false)
            }
        }
    }
}

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" at 0x[0-9a-fA-F]{4,}").expect("valid address pattern"));

/// Remove identity addresses from a default rendering, for reproducible
/// output.
pub fn normalize_repr(repr: &str) -> String {
    ADDRESS_RE.replace_all(repr, "").into_owned()
}

/// Truncate to exactly `max_length` characters, keeping a prefix and suffix
/// as equal as possible around an ellipsis. Renderings at or under the
/// limit pass through untouched.
pub fn truncate(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }
    let keep = max_length.saturating_sub(ELLIPSIS.len());
    let left = keep / 2;
    let right = keep - left;
    let mut result: String = chars[..left].iter().collect();
    result.push_str(ELLIPSIS);
    result.extend(&chars[chars.len() - right..]);
    // Degenerate limits (shorter than the ellipsis) still honor the bound.
    result.chars().take(max_length).collect()
}

/// Render a value: first matching custom rule, else the runtime's default
/// representation; then line-break stripping, optional address
/// normalization, and optional truncation. Never fails.
pub fn render(
    value: &Value,
    rules: &[RenderRule],
    max_length: Option<usize>,
    normalize: bool,
) -> String {
    let raw = match rules.iter().find(|rule| rule.applies(value)) {
        Some(rule) => {
            std::panic::catch_unwind(AssertUnwindSafe(|| (rule.formatter)(value)))
                .unwrap_or_else(|_| REPR_FAILED.to_string())
        }
        None => value.repr(),
    };

    let mut repr = strip_line_breaks(&raw);
    if normalize {
        repr = normalize_repr(&repr);
    }
    if let Some(max_length) = max_length {
        repr = truncate(&repr, max_length);
    }
    repr
}

/// The render settings of one session, bundled for passing around.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Custom rules, in priority order
    pub rules: &'a [RenderRule],
    /// Maximum rendered length; `None` never truncates
    pub max_length: Option<usize>,
    /// Whether to scrub identity addresses
    pub normalize: bool,
}

impl RenderContext<'_> {
    /// Render one value under these settings.
    pub fn render(&self, value: &Value) -> String {
        render(value, self.rules, self.max_length, self.normalize)
    }
}
