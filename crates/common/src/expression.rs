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

/// Normalize an expression by replacing any contiguous whitespace with a single space.
///
/// Two watch expressions that differ only in whitespace are the same
/// expression; this is the canonical form used when comparing them.
pub fn normalize_expression(expr: &str) -> String {
    expr.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip embedded line breaks from a rendered value.
///
/// Log output is line-oriented; a representation spanning lines would break
/// the reader's framing.
pub fn strip_line_breaks(repr: &str) -> String {
    repr.replace(['\r', '\n'], "")
}
