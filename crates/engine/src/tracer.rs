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

//! The tracing engine.
//!
//! A [`Tracer`] installs itself as the thread's execution-event hook while a
//! session is active and, for every event inside the depth window of a
//! targeted frame, reports new and modified variables, the executed source
//! line, return values and exceptions to its sink.
//!
//! Two kinds of state back this up. Per-thread state (the stack of
//! displaced hooks per session, and the nesting-depth counter shared by all
//! sessions on the thread) lives in thread locals and can never leak across
//! threads. The per-frame snapshots live in a concurrent map keyed by frame
//! identity; a frame only ever executes on the thread that created it, so
//! no key is contended.
//!
//! The per-event fast path matters: the hook runs on every executed
//! statement of every thread with an active session, so events outside the
//! target set are rejected before any allocation happens.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use xtrace_common::{
    runtime::{self, HookRef, TraceHook},
    types::{CodeId, Frame, FrameId, FrameStack, OpKind, TraceEvent, Value},
};

use crate::{
    config::{CallDepth, ResolvedConfig},
    render::{truncate, RenderContext, RenderRule},
    sink::LogSink,
    source::resolve_source,
    watch::Watch,
};

const INDENT_WIDTH: usize = 4;
/// Width of a wall-clock timestamp (`HH:MM:SS.ffffff`); normalized output
/// blanks exactly this many columns.
const TIMESTAMP_WIDTH: usize = 15;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

thread_local! {
    // Shared by every session on the thread; starts below zero so the first
    // `call` event lands at indentation level zero.
    static TRACE_DEPTH: Cell<isize> = const { Cell::new(-1) };

    // Hooks displaced by activation, per session serial. Strictly LIFO per
    // session and thread.
    static SAVED_HOOKS: RefCell<HashMap<u64, Vec<Option<HookRef>>>> =
        RefCell::new(HashMap::new());
}

/// An insertion-ordered label → rendered-value snapshot.
#[derive(Debug, Clone, Default)]
struct Reprs {
    entries: Vec<(String, String)>,
}

impl Reprs {
    fn get(&self, label: &str) -> Option<&str> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, r)| r.as_str())
    }

    fn insert(&mut self, label: String, repr: String) {
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some((_, slot)) => *slot = repr,
            None => self.entries.push((label, repr)),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(l, r)| (l.as_str(), r.as_str()))
    }
}

/// Per-frame bookkeeping: the previous snapshot for diffing and the entry
/// instant for relative timestamps. Lives exactly as long as the frame is
/// inside an observed call.
struct FrameRecord {
    snapshot: Reprs,
    entry: Instant,
}

impl FrameRecord {
    fn new() -> Self {
        Self { snapshot: Reprs::default(), entry: Instant::now() }
    }
}

/// Handle returned by [`Tracer::activate`], consumed by
/// [`Tracer::deactivate`]. Carries the activation's start instant and the
/// frame it targeted.
#[derive(Debug)]
pub struct ActivationHandle {
    start: Instant,
    target: Option<FrameId>,
    active: bool,
}

/// RAII wrapper around an activation: deactivates on drop, so a session
/// closes even when the observed call unwinds.
pub struct ActivationGuard {
    tracer: Arc<Tracer>,
    handle: Option<ActivationHandle>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.tracer.deactivate(handle);
        }
    }
}

/// One configured tracing session.
///
/// Built by [`crate::config::TraceBuilder`]; activated either through
/// [`Tracer::wrap`]ped callables or explicitly with
/// [`Tracer::enter`]/[`Tracer::activate`]. A session may be activated any
/// number of times, nested and recursively included.
pub struct Tracer {
    serial: u64,
    depth: CallDepth,
    watch: Vec<Watch>,
    prefix: String,
    thread_info: bool,
    custom_repr: Vec<RenderRule>,
    max_variable_length: Option<usize>,
    normalize: bool,
    relative_time: bool,
    disabled: bool,
    sink: Arc<dyn LogSink>,

    target_codes: DashSet<CodeId>,
    target_frames: DashSet<FrameId>,
    frame_records: DashMap<FrameId, FrameRecord>,
    thread_info_padding: AtomicUsize,
    last_source_path: Mutex<Option<String>>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("serial", &self.serial)
            .field("depth", &self.depth)
            .field("watch", &self.watch.len())
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// Start configuring a session.
    pub fn builder() -> crate::config::TraceBuilder {
        crate::config::TraceBuilder::new()
    }

    pub(crate) fn from_config(config: ResolvedConfig) -> Arc<Self> {
        Arc::new(Self {
            serial: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            depth: config.depth,
            watch: config.watch,
            prefix: config.prefix,
            thread_info: config.thread_info,
            custom_repr: config.custom_repr,
            max_variable_length: config.max_variable_length,
            normalize: config.normalize,
            relative_time: config.relative_time,
            disabled: config.disabled,
            sink: config.sink,
            target_codes: DashSet::new(),
            target_frames: DashSet::new(),
            frame_records: DashMap::new(),
            thread_info_padding: AtomicUsize::new(0),
            last_source_path: Mutex::new(None),
        })
    }

    /// Whether this session is a no-op (process switch or builder override).
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Number of configured watch expressions, after deduplication.
    pub fn watch_count(&self) -> usize {
        self.watch.len()
    }

    pub(crate) fn add_target_code(&self, code: CodeId) {
        self.target_codes.insert(code);
    }

    /// Install this session as the thread's hook and start its clock.
    ///
    /// If called from inside a running frame, that frame joins the target
    /// set for the lifetime of the activation (block-style tracing).
    /// Reentrant: the displaced hook is pushed onto a per-session,
    /// per-thread stack and restored by [`Tracer::deactivate`].
    pub fn activate(self: &Arc<Self>) -> ActivationHandle {
        if self.disabled {
            return ActivationHandle { start: Instant::now(), target: None, active: false };
        }

        let target = runtime::current_frame_id();
        if let Some(id) = target {
            self.target_frames.insert(id);
        }

        let previous = runtime::install_hook(Some(self.clone() as HookRef));
        SAVED_HOOKS.with(|saved| {
            saved.borrow_mut().entry(self.serial).or_default().push(previous);
        });

        ActivationHandle { start: Instant::now(), target, active: true }
    }

    /// Restore the previously installed hook, forget the activation's
    /// target frame, and report the elapsed time at the activation's
    /// nesting depth. Safe to call while the observed call is unwinding.
    pub fn deactivate(&self, handle: ActivationHandle) {
        if !handle.active {
            return;
        }

        let previous = SAVED_HOOKS
            .with(|saved| saved.borrow_mut().get_mut(&self.serial).and_then(Vec::pop))
            .flatten();
        runtime::install_hook(previous);

        if let Some(id) = handle.target {
            self.target_frames.remove(&id);
            self.frame_records.remove(&id);
        }

        let depth = TRACE_DEPTH.with(Cell::get);
        let indent = " ".repeat(INDENT_WIDTH * usize::try_from(depth + 1).unwrap_or(0));
        let elapsed = format_duration(handle.start.elapsed());
        self.write(&format!("{indent}Elapsed time: {elapsed}"));
    }

    /// Activate with RAII deactivation.
    pub fn enter(self: &Arc<Self>) -> ActivationGuard {
        ActivationGuard { tracer: self.clone(), handle: Some(self.activate()) }
    }

    pub(crate) fn render_ctx(&self) -> RenderContext<'_> {
        RenderContext {
            rules: &self.custom_repr,
            max_length: self.max_variable_length,
            normalize: self.normalize,
        }
    }

    fn write(&self, body: &str) {
        self.sink.write_line(&format!("{}{body}\n", self.prefix));
    }

    fn is_target(&self, frame: &Frame) -> bool {
        self.target_codes.contains(&frame.code().id()) || self.target_frames.contains(&frame.id())
    }

    /// The per-event scope decision. This is the hot path: for events
    /// outside the depth window of any target it returns without touching
    /// anything beyond the target sets.
    fn in_scope(&self, frame: &Frame, stack: &FrameStack) -> bool {
        if self.is_target(frame) {
            return true;
        }
        match self.depth {
            // The overwhelmingly common configuration gets the cheapest
            // rejection.
            CallDepth::Limited(1) => false,
            CallDepth::Limited(depth) => {
                stack.ancestors().take(depth - 1).any(|ancestor| self.is_target(ancestor))
            }
            CallDepth::Unbounded => stack.ancestors().any(|ancestor| self.is_target(ancestor)),
        }
    }

    fn timestamp_string(&self, frame: &Frame) -> String {
        if self.normalize {
            return " ".repeat(TIMESTAMP_WIDTH);
        }
        if self.relative_time {
            let entry = self
                .frame_records
                .entry(frame.id())
                .or_insert_with(FrameRecord::new)
                .entry;
            return format_duration(entry.elapsed());
        }
        chrono::Local::now().format("%H:%M:%S%.6f").to_string()
    }

    fn padded_thread_info(&self) -> String {
        let raw = if self.thread_info {
            let thread = std::thread::current();
            let name = thread.name().unwrap_or("unnamed");
            format!("{}-{name} ", runtime::thread_ident())
        } else {
            String::new()
        };
        let width = raw.chars().count();
        let previous = self.thread_info_padding.fetch_max(width, Ordering::Relaxed);
        format!("{:<pad$}", raw, pad = previous.max(width))
    }

    /// Render the frame's locals (declaration order) followed by every
    /// watch's entries.
    fn local_reprs(&self, frame: &Frame) -> Reprs {
        let ctx = self.render_ctx();
        let mut reprs = Reprs::default();
        for (name, value) in frame.ordered_locals() {
            reprs.insert(name.to_string(), ctx.render(value));
        }
        for watch in &self.watch {
            for (label, repr) in watch.items(frame, &ctx) {
                reprs.insert(label, repr);
            }
        }
        reprs
    }
}

impl TraceHook for Tracer {
    fn on_event(&self, stack: &FrameStack, event: &TraceEvent) {
        let Some(frame) = stack.top() else { return };
        if !self.in_scope(frame, stack) {
            return;
        }

        let is_call = matches!(event, TraceEvent::Call);
        if is_call {
            TRACE_DEPTH.with(|d| d.set(d.get() + 1));
        }
        let depth = TRACE_DEPTH.with(Cell::get).max(0) as usize;
        let indent = " ".repeat(INDENT_WIDTH * depth);

        let now_string = self.timestamp_string(frame);

        let source = resolve_source(frame.code());
        let path_display = if self.normalize {
            frame
                .code()
                .file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| frame.code().file.display().to_string())
        } else {
            frame.code().file.display().to_string()
        };
        {
            let mut last = self.last_source_path.lock();
            if last.as_deref() != Some(path_display.as_str()) {
                self.write(&format!("{indent}Source path:... {path_display}"));
                *last = Some(path_display);
            }
        }

        let thread_info = self.padded_thread_info();

        // Diff the rendered bindings against the frame's previous snapshot.
        // Comparison is on rendered text, not value identity, so a value
        // that re-renders identically does not count as modified.
        let old_snapshot = self
            .frame_records
            .get(&frame.id())
            .map(|record| record.snapshot.clone())
            .unwrap_or_default();
        let snapshot = self.local_reprs(frame);

        let newish_label = if is_call { "Starting var:.. " } else { "New var:....... " };
        for (label, repr) in snapshot.iter() {
            match old_snapshot.get(label) {
                None => self.write(&format!("{indent}{newish_label}{label} = {repr}")),
                Some(previous) if previous != repr => {
                    self.write(&format!("{indent}Modified var:.. {label} = {repr}"));
                }
                Some(_) => {}
            }
        }
        self.frame_records.entry(frame.id()).or_insert_with(FrameRecord::new).snapshot = snapshot;

        // A call event may report the line of an annotation above the
        // definition; scan forward to the definition line itself.
        let mut line_no = frame.line;
        let mut source_line = source.line(line_no).to_string();
        if is_call && source_line.trim_start().starts_with('@') {
            let mut candidate = line_no + 1;
            while let Some(text) = source.get(candidate) {
                if text.trim_start().starts_with("fn") {
                    line_no = candidate;
                    source_line = text.to_string();
                    break;
                }
                candidate += 1;
            }
        }

        // A `return` with an absent value is ambiguous: only a frame whose
        // last instruction was return- or yield-class exited normally.
        let ended_by_exception = matches!(event, TraceEvent::Return(Value::None))
            && !matches!(frame.last_op, OpKind::Return | OpKind::Yield);

        if ended_by_exception {
            self.write(&format!("{indent}Call ended by exception"));
        } else {
            self.write(&format!(
                "{indent}{now_string} {thread_info}{:<9} {line_no:>4} {source_line}",
                event.name()
            ));
        }

        match event {
            TraceEvent::Return(value) => {
                self.frame_records.remove(&frame.id());
                TRACE_DEPTH.with(|d| d.set(d.get() - 1));
                if !ended_by_exception {
                    let repr = self.render_ctx().render(value);
                    self.write(&format!("{indent}Return value:.. {repr}"));
                }
            }
            TraceEvent::Exception(error) => {
                let mut text = error.to_string();
                if let Some(max_length) = self.max_variable_length {
                    text = truncate(&text, max_length);
                }
                self.write(&format!("{indent}{text}"));
            }
            TraceEvent::Call | TraceEvent::Line => {}
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}.{:06}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        duration.subsec_micros()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Output, sink::BufferSink};
    use xtrace_common::{runtime::Call, test_utils};

    fn session_with_buffer() -> (Arc<Tracer>, BufferSink) {
        let sink = BufferSink::new();
        let tracer = Tracer::builder()
            .with_output(Output::Sink(Arc::new(sink.clone())))
            .with_normalize(true)
            .build()
            .expect("valid session");
        (tracer, sink)
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::new(0, 1_000)), "00:00:00.000001");
        assert_eq!(format_duration(Duration::new(3661, 0)), "01:01:01.000000");
    }

    #[test]
    fn test_reprs_update_keeps_order() {
        let mut reprs = Reprs::default();
        reprs.insert("a".into(), "1".into());
        reprs.insert("b".into(), "2".into());
        reprs.insert("a".into(), "3".into());
        let labels: Vec<&str> = reprs.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(reprs.get("a"), Some("3"));
    }

    #[test]
    fn test_wrapped_call_reports_starting_var_events_and_return() {
        let (tracer, sink) = session_with_buffer();
        let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");

        let result = traced.invoke(vec![Value::Int(5)]).expect("call succeeds");
        assert_eq!(result, Value::Int(6));

        let lines = sink.lines();
        let blank = " ".repeat(TIMESTAMP_WIDTH);
        assert_eq!(lines[0], "Source path:... add_one.xt");
        assert_eq!(lines[1], "Starting var:.. x = 5");
        assert_eq!(lines[2], format!("{blank} call         2 fn add_one(x):"));
        assert_eq!(lines[3], format!("{blank} line         3     y = x + 1"));
        assert_eq!(lines[4], "New var:....... y = 6");
        assert_eq!(lines[5], format!("{blank} line         4     return y"));
        assert_eq!(lines[6], format!("{blank} return       4     return y"));
        assert_eq!(lines[7], "Return value:.. 6");
        assert!(lines[8].starts_with("Elapsed time: "));
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn test_unobserved_events_are_rejected() {
        let (tracer, sink) = session_with_buffer();
        // Wrap registers the target; calling the *unwrapped* fixture under
        // an unrelated activation emits nothing for it.
        let _traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
        let other = test_utils::returns_none();

        let handle = tracer.activate();
        let _ = other.invoke(vec![]);
        tracer.deactivate(handle);

        let lines = sink.lines();
        assert!(
            lines.iter().all(|line| !line.contains("nothing")),
            "untargeted frame leaked into output: {lines:?}"
        );
    }

    #[test]
    fn test_disabled_session_emits_nothing() {
        let sink = BufferSink::new();
        let tracer = Tracer::builder()
            .with_output(Output::Sink(Arc::new(sink.clone())))
            .with_disabled(true)
            .build()
            .expect("valid session");

        let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
        let result = traced.invoke(vec![Value::Int(41)]).expect("call succeeds");
        assert_eq!(result, Value::Int(42));
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn test_annotation_line_corrected_to_definition() {
        let (tracer, sink) = session_with_buffer();
        let traced = tracer.wrap(test_utils::annotated_add_one()).expect("wrappable");
        let _ = traced.invoke(vec![Value::Int(1)]).expect("call succeeds");

        let call_line = sink
            .lines()
            .into_iter()
            .find(|line| line.contains(" call "))
            .expect("call event line");
        assert!(
            call_line.ends_with("fn add_one(x):"),
            "call reported the annotation line: {call_line}"
        );
    }

    #[test]
    fn test_exception_reports_abnormal_exit() {
        let (tracer, sink) = session_with_buffer();
        let traced = tracer.wrap(test_utils::failing_function()).expect("wrappable");

        let err = traced.invoke(vec![Value::Int(0)]).unwrap_err();
        assert_eq!(err.name, "ValueError");

        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.contains("ValueError: x is cursed")));
        assert!(lines.iter().any(|l| l.contains("Call ended by exception")));
        assert!(lines.iter().all(|l| !l.contains("Return value:")));
    }

    #[test]
    fn test_normal_none_return_still_reports_value() {
        let (tracer, sink) = session_with_buffer();
        let traced = tracer.wrap(test_utils::returns_none()).expect("wrappable");
        let _ = traced.invoke(vec![]).expect("call succeeds");

        let lines = sink.lines();
        assert!(lines.iter().any(|l| l.contains("Return value:.. none")));
        assert!(lines.iter().all(|l| !l.contains("Call ended by exception")));
    }
}
