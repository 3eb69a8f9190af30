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

//! Best-effort source text resolution with process-lifetime caching.
//!
//! The engine wants the text of the line it is reporting. Resolution is
//! strictly best effort: source supplied by the code unit itself wins,
//! then the file on disk, and when neither works every line degrades to a
//! fixed placeholder rather than an error. Results are cached per
//! (module, file) key for the lifetime of the process.

use std::{fs, path::PathBuf, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use xtrace_common::types::CodeUnit;

/// Placeholder yielded for every line of unavailable source.
pub const UNAVAILABLE_SOURCE_LINE: &str = "SOURCE IS UNAVAILABLE";

/// Resolved source text of one (module, file) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceText {
    /// The source lines, in file order
    Lines(Vec<String>),
    /// Sentinel: indexed access always yields [`UNAVAILABLE_SOURCE_LINE`]
    Unavailable,
}

impl SourceText {
    /// Whether this is the unavailable sentinel.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// The text of a 1-based line. Total: out-of-range access and the
    /// unavailable sentinel both yield the placeholder.
    pub fn line(&self, line_no: u32) -> &str {
        self.get(line_no).unwrap_or(UNAVAILABLE_SOURCE_LINE)
    }

    /// The text of a 1-based line, or `None` when the line does not exist.
    /// Used where iteration has to terminate, e.g. scanning for a
    /// definition line.
    pub fn get(&self, line_no: u32) -> Option<&str> {
        match self {
            Self::Lines(lines) => {
                line_no.checked_sub(1).and_then(|i| lines.get(i as usize)).map(String::as_str)
            }
            Self::Unavailable => None,
        }
    }
}

static SOURCE_CACHE: Lazy<DashMap<(String, PathBuf), Arc<SourceText>>> = Lazy::new(DashMap::new);

/// Resolve the source text for a code unit, consulting the process-wide
/// cache first.
pub fn resolve_source(code: &CodeUnit) -> Arc<SourceText> {
    let key = (code.module.clone(), code.file.clone());
    if let Some(hit) = SOURCE_CACHE.get(&key) {
        return hit.clone();
    }
    let resolved = Arc::new(load_source(code));
    SOURCE_CACHE.insert(key, resolved.clone());
    resolved
}

fn load_source(code: &CodeUnit) -> SourceText {
    // Source carried by the unit itself wins over whatever is on disk; the
    // file may have changed since the unit was defined.
    if let Some(lines) = &code.source {
        if !lines.is_empty() {
            return SourceText::Lines(lines.clone());
        }
    }

    match fs::read(&code.file) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<String> =
                text.lines().map(|line| line.trim_end_matches('\r').to_string()).collect();
            if lines.is_empty() {
                // Empty is as useless as missing.
                SourceText::Unavailable
            } else {
                SourceText::Lines(lines)
            }
        }
        Err(err) => {
            debug!(file = %code.file.display(), %err, "source file unreadable");
            SourceText::Unavailable
        }
    }
}
