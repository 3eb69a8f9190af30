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

//! XTrace Engine - the tracing engine behind XTrace
//!
//! Wrap a callable of the observed runtime (or activate a session inside a
//! running frame) and every executed line, every new or modified local,
//! every watch-expression value and every call/return/exception boundary is
//! written to the configured sink. The observed program's behavior is never
//! altered: all engine-side failures degrade to placeholders.

pub mod config;
pub use config::*;

pub mod eval;
pub use eval::*;

pub mod render;
pub use render::*;

pub mod sink;
pub use sink::*;

pub mod source;
pub use source::*;

pub mod tracer;
pub use tracer::*;

pub mod watch;
pub use watch::*;

pub mod wrapper;
pub use wrapper::*;
