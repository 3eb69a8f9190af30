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

//! Output sinks for the trace log.
//!
//! The engine hands every sink a fully formatted, newline-terminated line.
//! Sinks never propagate failures back into the engine: a sink that cannot
//! write logs a warning through the tracer's own telemetry and drops the
//! line, because the observed program must not be disturbed by its
//! observer's I/O problems.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use auto_impl::auto_impl;
use parking_lot::Mutex;
use tracing::warn;

/// Destination of formatted trace output.
#[auto_impl(&, Box, Arc)]
pub trait LogSink: Send + Sync {
    /// Write one newline-terminated line.
    fn write_line(&self, line: &str);

    /// Whether [`LogSink::truncate`] does anything. Only file-backed sinks
    /// can honor overwrite semantics.
    fn supports_truncate(&self) -> bool {
        false
    }

    /// Drop previously written content. A no-op unless
    /// [`LogSink::supports_truncate`].
    fn truncate(&self) {}
}

/// Writes to standard error. The default sink.
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, line: &str) {
        eprint!("{line}");
    }
}

/// Appends to a file, opening it anew for every line so the log survives
/// the process dying mid-trace. With overwrite semantics the first write
/// truncates instead of appending.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    pending_overwrite: Mutex<bool>,
}

impl FileSink {
    /// Append-only file sink.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), pending_overwrite: Mutex::new(false) }
    }

    /// File sink that truncates on its first write.
    pub fn with_overwrite(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), pending_overwrite: Mutex::new(true) }
    }

    /// The file this sink writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write_line(&self, line: &str) {
        let mut pending = self.pending_overwrite.lock();
        let result = OpenOptions::new()
            .create(true)
            .append(!*pending)
            .write(true)
            .truncate(*pending)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        *pending = false;
        if let Err(err) = result {
            warn!(path = %self.path.display(), %err, "failed to write trace line");
        }
    }

    fn supports_truncate(&self) -> bool {
        true
    }

    fn truncate(&self) {
        if let Err(err) = std::fs::write(&self.path, b"") {
            warn!(path = %self.path.display(), %err, "failed to truncate trace file");
        }
    }
}

/// Forwards every line to a user callback.
pub struct CallbackSink {
    callback: Arc<dyn Fn(&str) + Send + Sync>,
}

impl CallbackSink {
    /// Create a sink around a callback.
    pub fn new(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self { callback: Arc::new(callback) }
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink").finish_non_exhaustive()
    }
}

impl LogSink for CallbackSink {
    fn write_line(&self, line: &str) {
        (self.callback)(line);
    }
}

/// Collects lines into a shared in-memory buffer. The workhorse of tests.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    buffer: Arc<Mutex<String>>,
}

impl BufferSink {
    /// Create an empty buffer sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    /// The written lines, without their terminators.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Drop everything written so far.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl LogSink for BufferSink {
    fn write_line(&self, line: &str) {
        self.buffer.lock().push_str(line);
    }

    fn supports_truncate(&self) -> bool {
        true
    }

    fn truncate(&self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_collects_lines() {
        let sink = BufferSink::new();
        sink.write_line("one\n");
        sink.write_line("two\n");
        assert_eq!(sink.lines(), vec!["one", "two"]);

        sink.truncate();
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_callback_sink_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        let sink = CallbackSink::new(move |line| inner.lock().push(line.to_string()));
        sink.write_line("hello\n");
        assert_eq!(*seen.lock(), vec!["hello\n"]);
        assert!(!sink.supports_truncate());
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.log");

        let sink = FileSink::new(&path);
        sink.write_line("a\n");
        sink.write_line("b\n");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "a\nb\n");
    }

    #[test]
    fn test_file_sink_overwrite_truncates_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.log");
        std::fs::write(&path, "stale\n").expect("seed file");

        let sink = FileSink::with_overwrite(&path);
        sink.write_line("fresh\n");
        sink.write_line("more\n");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "fresh\nmore\n");
    }
}
