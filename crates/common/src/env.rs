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

//! Environment variable name constants for XTrace configuration.
//!
//! This module provides constant string names for all environment variables
//! used by XTrace. These constants ensure consistency across the codebase
//! and provide a single source of truth for environment variable names.

/// Environment variable for disabling tracing process-wide.
///
/// When set to any non-empty value, wrapping becomes a pass-through and
/// activation a no-op, so instrumentation calls can stay in place while the
/// tracer is globally off. The variable is read once per process, at the
/// first session build.
///
/// # Examples
///
/// ```bash
/// # Run with all tracing disabled
/// XTRACE_DISABLED=1 cargo run
/// ```
///
/// Sessions can override the switch programmatically; see the engine's
/// session builder.
pub const XTRACE_DISABLED: &str = "XTRACE_DISABLED";

/// Environment variable for overriding where the tracer's own diagnostic
/// logs are written.
///
/// This affects only the `tracing`-based telemetry configured by
/// [`crate::logging::init_logging`], never the trace output produced for
/// users.
///
/// # Default
///
/// When not set, logs go to `<temp>/xtrace-logs/<component>`.
pub const XTRACE_LOG_DIR: &str = "XTRACE_LOG_DIR";
