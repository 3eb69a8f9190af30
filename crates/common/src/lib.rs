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

//! XTrace Common - Shared functionality for XTrace components
//!
//! This crate provides the pieces shared by the tracing engine and its
//! embedders: the dynamic value model, code units and call frames, the
//! trace-event vocabulary, and the host-runtime execution driver that
//! delivers those events to an installed hook.

/// Common types used throughout the XTrace ecosystem including values, code units, frames and events
pub mod types;

/// Environment variable name constants for XTrace configuration
pub mod env;
/// Expression text utilities shared by the engine and its configuration surface
pub mod expression;
/// Logging setup and utilities for consistent logging across XTrace components
pub mod logging;
/// The host-runtime execution driver: hook registry, callables, activations and coroutines
pub mod runtime;
/// Fixture builders for tests across the workspace
pub mod test_utils;

pub use expression::*;
pub use logging::*;
pub use runtime::*;
