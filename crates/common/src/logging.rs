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

//! Logging configuration for XTrace components
//!
//! This is the tracer's *own* telemetry (the `tracing` ecosystem), entirely
//! separate from the trace log the engine writes for users. Provides:
//! - Console output with structured formatting
//! - Optional file logging to a temporary directory
//! - Environment variable support (RUST_LOG)
//! - A safe, idempotent initializer for tests

use std::{env, fs, path::PathBuf, sync::Once};

use eyre::Result;
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::env::XTRACE_LOG_DIR;

/// Initialize logging for an XTrace component.
///
/// Sets up console logging with timestamps, and, when `enable_file_logging`
/// is set, a daily-rotated file appender under the directory named by
/// `XTRACE_LOG_DIR` (default: `<temp>/xtrace-logs/<component>`). Respects
/// `RUST_LOG`, defaulting to INFO.
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "xtrace-engine")
/// * `enable_file_logging` - Whether to enable file logging
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("Failed to create environment filter");

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        // The guard flushes the appender on drop; keep it alive for the
        // process lifetime.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer.with_filter(EnvFilter::from_default_env()))
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {}", e))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
    }

    Ok(())
}

/// Create the log directory for a component, honoring `XTRACE_LOG_DIR`.
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let root = env::var_os(XTRACE_LOG_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| env::temp_dir().join("xtrace-logs"));
    let log_dir = root.join(component_name);

    fs::create_dir_all(&log_dir)?;

    Ok(log_dir)
}

/// Initialize simple logging (console only, compact formatting).
///
/// This is useful for tests or simple utilities that don't need the full
/// logging setup.
///
/// # Arguments
/// * `level` - The default log level to use
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .expect("Failed to create environment filter");

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {}", e))?;

    Ok(())
}

// Global test logging initialization - ensures logging is only set up once across all tests
static TEST_LOGGING_INIT: Once = Once::new();

/// Safe logging initialization for tests - can be called multiple times
/// without crashing.
///
/// Uses [`std::sync::Once`] so initialization happens at most once per test
/// process; errors (typically "a subscriber is already installed") are
/// ignored, which is fine for tests.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let default_level = default_level.unwrap_or(Level::INFO);
        let _ = init_simple_logging(default_level);
    });
}
