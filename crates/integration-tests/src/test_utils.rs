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

//! Test utilities for integration tests

use std::sync::Arc;

use xtrace_engine::{BufferSink, Output, TraceBuilder, Tracer};

/// Initialization utilities for tests
pub mod init {
    use tracing::debug;

    /// Set up the test environment: quiet, idempotent logging so helpers can
    /// use `tracing` freely.
    pub fn init_test_environment() {
        xtrace_common::logging::ensure_test_logging(None);
        debug!("test environment initialized");
    }
}

/// A buffer-backed session builder for output assertions: normalized output
/// (blank timestamps, no identity addresses) so expectations are exact.
pub fn buffered_session() -> (TraceBuilder, BufferSink) {
    let sink = BufferSink::new();
    let builder = Tracer::builder()
        .with_output(Output::Sink(Arc::new(sink.clone())))
        .with_normalize(true);
    (builder, sink)
}

/// The event lines (call/line/return/exception) of a normalized trace,
/// stripped of indentation and the blank timestamp column.
pub fn event_lines(sink: &BufferSink) -> Vec<String> {
    sink.lines()
        .into_iter()
        .filter_map(|line| {
            let trimmed = line.trim_start().to_string();
            let is_event = ["call ", "line ", "return ", "exception "]
                .iter()
                .any(|kind| trimmed.starts_with(kind));
            is_event.then_some(trimmed)
        })
        .collect()
}

/// The kinds (call/line/return/exception) of the trace's event lines, in
/// emission order.
pub fn event_kinds(sink: &BufferSink) -> Vec<String> {
    event_lines(sink)
        .into_iter()
        .filter_map(|line| line.split_whitespace().next().map(str::to_string))
        .collect()
}

/// Lines that report variables (starting/new/modified), trimmed.
pub fn variable_lines(sink: &BufferSink) -> Vec<String> {
    sink.lines()
        .into_iter()
        .filter_map(|line| {
            let trimmed = line.trim_start().to_string();
            (trimmed.starts_with("Starting var:")
                || trimmed.starts_with("New var:")
                || trimmed.starts_with("Modified var:"))
            .then_some(trimmed)
        })
        .collect()
}
