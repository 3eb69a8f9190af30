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

//! Session configuration for the tracing engine.
//!
//! Configuration errors are fatal and reported at build time; nothing here
//! is deferred to the first traced event. Everything else about a session
//! is immutable once built.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use xtrace_common::env::XTRACE_DISABLED;

use crate::{
    render::RenderRule,
    sink::{CallbackSink, FileSink, LogSink, StderrSink},
    tracer::Tracer,
    watch::Watch,
};

/// Default maximum rendered-value length.
pub const DEFAULT_MAX_VARIABLE_LENGTH: usize = 100;

// Read once per process; sessions can override per builder.
static DISABLED: Lazy<bool> =
    Lazy::new(|| std::env::var(XTRACE_DISABLED).map(|v| !v.is_empty()).unwrap_or(false));

/// Whether the process-wide disable switch is set.
pub fn process_disabled() -> bool {
    *DISABLED
}

/// Where a session writes its trace log.
#[derive(Clone, Default)]
pub enum Output {
    /// Standard error (the default)
    #[default]
    Stderr,
    /// Append to a file (truncate first when overwrite is requested)
    File(PathBuf),
    /// Hand each line to a callback
    Callback(Arc<dyn Fn(&str) + Send + Sync>),
    /// A pre-built sink
    Sink(Arc<dyn LogSink>),
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stderr => write!(f, "Stderr"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Callback(_) => write!(f, "Callback(..)"),
            Self::Sink(_) => write!(f, "Sink(..)"),
        }
    }
}

/// How many call levels below a targeted frame stay in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDepth {
    /// Trace the target and `n - 1` levels of callees; must be at least 1
    Limited(usize),
    /// Trace the whole subtree below the target
    Unbounded,
}

impl Default for CallDepth {
    fn default() -> Self {
        Self::Limited(1)
    }
}

impl From<usize> for CallDepth {
    fn from(depth: usize) -> Self {
        Self::Limited(depth)
    }
}

/// Fatal configuration errors, raised at build or wrap time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Overwrite semantics require a truncatable (file-backed) sink
    #[error("`overwrite` can only be used when writing content to a file")]
    OverwriteRequiresFile,

    /// Natively-asynchronous callables cannot be traced
    #[error("cannot trace natively-asynchronous callable `{0}`")]
    AsyncNotSupported(String),

    /// The configured depth window is empty
    #[error("call depth must be at least 1")]
    InvalidDepth,

    /// Per-thread identification cannot be combined with normalized output
    #[error("per-thread identification is not supported with normalized output")]
    ThreadInfoWithNormalize,

    /// A watch expression failed to parse
    #[error("invalid watch expression `{expr}`: {reason}")]
    InvalidWatch {
        /// The expression text as configured
        expr: String,
        /// Why parsing rejected it
        reason: String,
    },
}

enum WatchInput {
    Raw { source: String, explode: bool },
    Built(Watch),
}

/// Builder for a tracing session.
///
/// ```ignore
/// let tracer = TraceBuilder::new()
///     .with_output(Output::File("/tmp/trace.log".into()))
///     .with_watch("counter")
///     .with_watch_explode("self")
///     .with_depth(2)
///     .with_prefix("ZZZ ")
///     .build()?;
/// ```
#[derive(Default)]
pub struct TraceBuilder {
    output: Output,
    watches: Vec<WatchInput>,
    depth: CallDepth,
    prefix: String,
    overwrite: bool,
    thread_info: bool,
    custom_repr: Vec<RenderRule>,
    max_variable_length: Option<Option<usize>>,
    normalize: bool,
    relative_time: bool,
    disabled: Option<bool>,
}

impl TraceBuilder {
    /// Start from defaults: stderr output, depth 1, rendered values capped
    /// at [`DEFAULT_MAX_VARIABLE_LENGTH`] characters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output destination.
    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    /// Shorthand for file output.
    pub fn with_output_path(mut self, path: impl AsRef<Path>) -> Self {
        self.output = Output::File(path.as_ref().to_path_buf());
        self
    }

    /// Add a plain watch expression.
    pub fn with_watch(mut self, source: impl Into<String>) -> Self {
        self.watches.push(WatchInput::Raw { source: source.into(), explode: false });
        self
    }

    /// Add an exploded watch expression.
    pub fn with_watch_explode(mut self, source: impl Into<String>) -> Self {
        self.watches.push(WatchInput::Raw { source: source.into(), explode: true });
        self
    }

    /// Add a pre-built watch.
    pub fn with_watch_spec(mut self, watch: Watch) -> Self {
        self.watches.push(WatchInput::Built(watch));
        self
    }

    /// Set the call-depth window.
    pub fn with_depth(mut self, depth: impl Into<CallDepth>) -> Self {
        self.depth = depth.into();
        self
    }

    /// Prefix every output line, e.g. to make the log easy to grep for.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Truncate the output file on the first write instead of appending.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Identify the emitting thread on every event line.
    pub fn with_thread_info(mut self, thread_info: bool) -> Self {
        self.thread_info = thread_info;
        self
    }

    /// Add a custom rendering rule. Rules apply in the order given.
    pub fn with_custom_repr(mut self, rule: RenderRule) -> Self {
        self.custom_repr.push(rule);
        self
    }

    /// Cap rendered values at `max_length` characters; `None` disables
    /// truncation entirely.
    pub fn with_max_variable_length(mut self, max_length: Option<usize>) -> Self {
        self.max_variable_length = Some(max_length);
        self
    }

    /// Scrub non-deterministic identity addresses and timestamps for
    /// reproducible output.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Stamp event lines with time elapsed since activation instead of wall
    /// clock time.
    pub fn with_relative_time(mut self, relative_time: bool) -> Self {
        self.relative_time = relative_time;
        self
    }

    /// Override the process-wide disable switch for this session.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Validate and build the session.
    pub fn build(self) -> Result<Arc<Tracer>, ConfigError> {
        if self.depth == CallDepth::Limited(0) {
            return Err(ConfigError::InvalidDepth);
        }
        if self.thread_info && self.normalize {
            return Err(ConfigError::ThreadInfoWithNormalize);
        }

        let sink: Arc<dyn LogSink> = match self.output {
            Output::File(path) => {
                if self.overwrite {
                    Arc::new(FileSink::with_overwrite(path))
                } else {
                    Arc::new(FileSink::new(path))
                }
            }
            Output::Sink(sink) => {
                if self.overwrite {
                    if !sink.supports_truncate() {
                        return Err(ConfigError::OverwriteRequiresFile);
                    }
                    sink.truncate();
                }
                sink
            }
            Output::Stderr => {
                if self.overwrite {
                    return Err(ConfigError::OverwriteRequiresFile);
                }
                Arc::new(StderrSink)
            }
            Output::Callback(callback) => {
                if self.overwrite {
                    return Err(ConfigError::OverwriteRequiresFile);
                }
                Arc::new(CallbackSink::new(move |line| callback(line)))
            }
        };

        let mut watch = Vec::new();
        for input in self.watches {
            let built = match input {
                WatchInput::Raw { source, explode } => {
                    if explode {
                        Watch::explode(&source)?
                    } else {
                        Watch::plain(&source)?
                    }
                }
                WatchInput::Built(watch) => watch,
            };
            // Dedup by fingerprint, keeping first-seen order.
            if !watch.contains(&built) {
                watch.push(built);
            }
        }

        Ok(Tracer::from_config(ResolvedConfig {
            depth: self.depth,
            watch,
            prefix: self.prefix,
            thread_info: self.thread_info,
            custom_repr: self.custom_repr,
            max_variable_length: self
                .max_variable_length
                .unwrap_or(Some(DEFAULT_MAX_VARIABLE_LENGTH)),
            normalize: self.normalize,
            relative_time: self.relative_time,
            disabled: self.disabled.unwrap_or_else(process_disabled),
            sink,
        }))
    }
}

/// A fully validated session configuration.
pub(crate) struct ResolvedConfig {
    pub depth: CallDepth,
    pub watch: Vec<Watch>,
    pub prefix: String,
    pub thread_info: bool,
    pub custom_repr: Vec<RenderRule>,
    pub max_variable_length: Option<usize>,
    pub normalize: bool,
    pub relative_time: bool,
    pub disabled: bool,
    pub sink: Arc<dyn LogSink>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::BufferSink;

    #[test]
    fn test_defaults_build() {
        let tracer = TraceBuilder::new().build().expect("defaults are valid");
        assert!(!tracer.is_disabled() || process_disabled());
    }

    #[test]
    fn test_zero_depth_is_rejected() {
        assert_eq!(TraceBuilder::new().with_depth(0).build().unwrap_err(), ConfigError::InvalidDepth);
    }

    #[test]
    fn test_overwrite_requires_truncatable_sink() {
        let err = TraceBuilder::new().with_overwrite(true).build().unwrap_err();
        assert_eq!(err, ConfigError::OverwriteRequiresFile);

        let err = TraceBuilder::new()
            .with_output(Output::Callback(Arc::new(|_| {})))
            .with_overwrite(true)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::OverwriteRequiresFile);

        // A truncatable sink is fine.
        let sink = BufferSink::new();
        sink.write_line("stale\n");
        let _tracer = TraceBuilder::new()
            .with_output(Output::Sink(Arc::new(sink.clone())))
            .with_overwrite(true)
            .build()
            .expect("truncatable sink accepts overwrite");
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_thread_info_with_normalize_is_rejected() {
        let err = TraceBuilder::new()
            .with_thread_info(true)
            .with_normalize(true)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ThreadInfoWithNormalize);
    }

    #[test]
    fn test_bad_watch_is_rejected_at_build_time() {
        let err = TraceBuilder::new().with_watch("a +").build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWatch { .. }));
    }

    #[test]
    fn test_duplicate_watches_are_deduplicated() {
        let tracer = TraceBuilder::new()
            .with_watch("x")
            .with_watch("x ")
            .with_watch_explode("x")
            .build()
            .expect("valid watches");
        assert_eq!(tracer.watch_count(), 2);
    }
}
