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

//! End-to-end tests for the tracing engine
//!
//! These drive complete observed programs through wrapped callables and
//! assert on the emitted log text: event ordering, variable reporting,
//! depth windows, suspension brackets, and exception reporting.

use std::sync::Arc;

use serial_test::serial;
use xtrace_common::{
    runtime::{Call, CoroutineStep, Resume, ResumeAction},
    test_utils,
    types::Value,
};
use xtrace_engine::{CallDepth, Output, Tracer};
use xtrace_integration_tests::test_utils::{
    buffered_session, event_kinds, event_lines, init, variable_lines,
};

/// Scenario A: wrapping `f(x) = x + 1` called with `x = 5`.
#[test]
fn test_single_call_reports_argument_events_and_return_in_order() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");

    let result = traced.invoke(vec![Value::Int(5)]).expect("call succeeds");
    assert_eq!(result, Value::Int(6));

    let all = sink.lines();
    let position = |needle: &str| {
        all.iter().position(|line| line.contains(needle)).unwrap_or_else(|| {
            panic!("missing line containing {needle:?} in {all:#?}");
        })
    };

    let starting = position("Starting var:.. x = 5");
    let call = position(" call ");
    let ret = position(" return ");
    let ret_value = position("Return value:.. 6");
    assert!(starting < call, "argument reported before the call event");
    assert!(call < ret);
    assert!(ret < ret_value);

    assert_eq!(event_kinds(&sink), vec!["call", "line", "line", "return"]);
}

/// Scenario B: a call chain `f1 -> f2 -> f3 -> f4` traced with depth 3
/// reports events for the first three levels and none for the fourth.
#[test]
fn test_depth_window_cuts_off_deeper_frames() {
    init::init_test_environment();
    let chain = test_utils::call_chain("depth3", &["alpha", "bravo", "charlie", "delta"]);

    let (builder, sink) = buffered_session();
    let tracer = builder.with_depth(3).build().expect("valid session");
    let traced = tracer.wrap(chain[0].clone()).expect("wrappable");

    let result = traced.invoke(vec![Value::Int(0)]).expect("chain runs");
    assert_eq!(result, Value::Int(3));

    let events = event_lines(&sink);
    for name in ["fn alpha(n):", "fn bravo(n):", "fn charlie(n):"] {
        assert!(
            events.iter().any(|line| line.starts_with("call") && line.ends_with(name)),
            "missing call event for {name}: {events:#?}"
        );
    }
    assert!(
        events.iter().all(|line| !line.ends_with("fn delta(n):")),
        "delta is below the depth window: {events:#?}"
    );
    assert_eq!(events.iter().filter(|line| line.starts_with("call")).count(), 3);
    assert_eq!(events.iter().filter(|line| line.starts_with("return")).count(), 3);
}

/// With an unbounded depth the whole subtree is in scope.
#[test]
fn test_unbounded_depth_traces_the_whole_subtree() {
    init::init_test_environment();
    let chain = test_utils::call_chain("depth_inf", &["one", "two", "three", "four"]);

    let (builder, sink) = buffered_session();
    let tracer = builder.with_depth(CallDepth::Unbounded).build().expect("valid session");
    let traced = tracer.wrap(chain[0].clone()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(0)]).expect("chain runs");

    let events = event_lines(&sink);
    assert_eq!(events.iter().filter(|line| line.starts_with("call")).count(), 4);
    assert!(events.iter().any(|line| line.ends_with("fn four(n):")));
}

/// Nested calls of a traced function indent one level per call depth.
#[test]
fn test_recursion_indents_and_does_not_inherit_stale_state() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let traced = tracer.wrap(test_utils::factorial()).expect("wrappable");

    let result = traced.invoke(vec![Value::Int(3)]).expect("recursion runs");
    assert_eq!(result, Value::Int(6));

    let lines = sink.lines();
    // Innermost call (n = 1) sits two levels deep.
    assert!(
        lines.iter().any(|line| line.starts_with("        Starting var:.. n = 1")),
        "missing doubly indented frame: {lines:#?}"
    );
    // Each nesting level reports its own `n`; starting values never leak
    // between frames of the same code unit.
    for n in 1..=3 {
        assert!(lines.iter().any(|line| line.trim_start() == format!("Starting var:.. n = {n}")));
    }
}

/// Scenario C: a suspendable callable started, resumed twice and exhausted
/// produces three independent activation brackets.
#[test]
fn test_generator_brackets_per_resumption() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let traced = tracer.wrap(test_utils::count_up()).expect("wrappable");

    let mut coroutine = traced.instantiate(vec![Value::Int(2)]).expect("generator");
    let mut yielded = Vec::new();
    loop {
        match coroutine.resume(if yielded.is_empty() {
            ResumeAction::Start
        } else {
            ResumeAction::Send(Value::None)
        }) {
            Ok(CoroutineStep::Yielded(value)) => yielded.push(value),
            Ok(CoroutineStep::Complete(_)) => break,
            Err(err) => panic!("generator failed: {err}"),
        }
    }
    assert_eq!(yielded, vec![Value::Int(1), Value::Int(2)]);

    let lines = sink.lines();
    let elapsed = lines.iter().filter(|l| l.starts_with("Elapsed time: ")).count();
    assert_eq!(elapsed, 3, "one bracket per resumption: {lines:#?}");

    // Each resumption is a fresh call event on the same (persistent) frame.
    assert_eq!(event_kinds(&sink).iter().filter(|k| *k == "call").count(), 3);
    // The loop counter survives suspension and is reported as modified on
    // the later resumptions.
    assert!(lines.iter().any(|l| l.trim_start() == "Modified var:.. i = 2"));
}

/// Scenario D: an uncaught error reports an abnormal exit and suppresses
/// the return value; a normal absent-value return does not.
#[test]
fn test_exception_exit_versus_absent_return() {
    init::init_test_environment();

    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let traced = tracer.wrap(test_utils::failing_function()).expect("wrappable");
    let err = traced.invoke(vec![Value::Int(1)]).unwrap_err();
    assert_eq!(err.to_string(), "ValueError: x is cursed");

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.trim_start() == "ValueError: x is cursed"));
    assert!(lines.iter().any(|l| l.trim_start() == "Call ended by exception"));
    assert!(lines.iter().all(|l| !l.contains("Return value:")));

    // The contrast case: `return none` from a normal code path.
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let traced = tracer.wrap(test_utils::returns_none()).expect("wrappable");
    let _ = traced.invoke(vec![]).expect("call succeeds");

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.trim_start() == "Return value:.. none"));
    assert!(lines.iter().all(|l| !l.contains("Call ended by exception")));
}

/// Tracing a pure function twice produces identical output modulo
/// timestamps (which normalized output blanks) and elapsed-time reports.
#[test]
fn test_idempotent_traces_for_pure_functions() {
    init::init_test_environment();

    let run = || {
        let (builder, sink) = buffered_session();
        let tracer = builder.build().expect("valid session");
        let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
        let _ = traced.invoke(vec![Value::Int(7)]).expect("call succeeds");
        sink.lines()
            .into_iter()
            .filter(|line| !line.starts_with("Elapsed time: "))
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

/// The number of starting-variable entries equals bound parameters plus
/// successfully evaluated watch expressions.
#[test]
fn test_starting_variables_count_parameters_plus_watches() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder
        .with_watch("x * 2")
        .with_watch("ghost") // never evaluates; contributes nothing
        .build()
        .expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(4)]).expect("call succeeds");

    let starting: Vec<String> = variable_lines(&sink)
        .into_iter()
        .filter(|line| line.starts_with("Starting var:"))
        .collect();
    assert_eq!(
        starting,
        vec!["Starting var:.. x = 4".to_string(), "Starting var:.. x * 2 = 8".to_string()]
    );
}

/// The source-path line is emitted on change, not per event.
#[test]
fn test_source_path_reported_once_per_change() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let add_one = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let nothing = tracer.wrap(test_utils::returns_none()).expect("wrappable");

    let _ = add_one.invoke(vec![Value::Int(1)]).expect("first call");
    let _ = add_one.invoke(vec![Value::Int(2)]).expect("second call, same path");
    let _ = nothing.invoke(vec![]).expect("third call, new path");

    let paths: Vec<String> = sink
        .lines()
        .into_iter()
        .filter(|line| line.trim_start().starts_with("Source path:... "))
        .collect();
    assert_eq!(paths.len(), 2, "one line per path change: {paths:#?}");
    assert!(paths[0].ends_with("add_one.xt"));
    assert!(paths[1].ends_with("nothing.xt"));
}

/// Every line carries the configured prefix.
#[test]
fn test_prefix_on_every_line() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.with_prefix("ZZZ ").build().expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(1)]).expect("call succeeds");

    let lines = sink.lines();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|line| line.starts_with("ZZZ ")), "unprefixed line in {lines:#?}");
}

/// Relative timestamps count from the frame's first observed event.
#[test]
fn test_relative_timestamps_have_duration_shape() {
    init::init_test_environment();
    let sink = xtrace_engine::BufferSink::new();
    let tracer = Tracer::builder()
        .with_output(Output::Sink(Arc::new(sink.clone())))
        .with_relative_time(true)
        .build()
        .expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(1)]).expect("call succeeds");

    let event_line = sink
        .lines()
        .into_iter()
        .find(|line| line.contains(" call "))
        .expect("call event line");
    let stamp = event_line.trim_start().split(' ').next().expect("timestamp column").to_string();
    // 00:00:00.000123 and friends.
    assert_eq!(stamp.len(), 15, "unexpected stamp {stamp:?}");
    assert!(stamp.starts_with("00:00:0"), "relative stamp should be near zero: {stamp:?}");
}

/// Per-thread identification appears on event lines and pads to a stable
/// column width.
#[test]
#[serial]
fn test_thread_info_column() {
    init::init_test_environment();
    let sink = xtrace_engine::BufferSink::new();
    let tracer = Tracer::builder()
        .with_output(Output::Sink(Arc::new(sink.clone())))
        .with_thread_info(true)
        .build()
        .expect("valid session");
    let traced = Arc::new(tracer.wrap(test_utils::add_one()).expect("wrappable"));

    let worker = {
        let traced = traced.clone();
        std::thread::Builder::new()
            .name("traced-worker".into())
            .spawn(move || traced.invoke(vec![Value::Int(1)]))
            .expect("spawn worker")
    };
    worker.join().expect("worker join").expect("call succeeds");

    let lines = sink.lines();
    assert!(
        lines.iter().any(|line| line.contains("-traced-worker ")),
        "thread identity missing: {lines:#?}"
    );
}

/// Two threads tracing concurrently through one session do not disturb each
/// other's frames.
#[test]
#[serial]
fn test_concurrent_threads_share_a_session() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.build().expect("valid session");
    let add_one = Arc::new(tracer.wrap(test_utils::add_one()).expect("wrappable"));
    let fact = Arc::new(tracer.wrap(test_utils::factorial()).expect("wrappable"));

    let first = {
        let add_one = add_one.clone();
        std::thread::spawn(move || add_one.invoke(vec![Value::Int(10)]))
    };
    let second = {
        let fact = fact.clone();
        std::thread::spawn(move || fact.invoke(vec![Value::Int(4)]))
    };

    assert_eq!(first.join().expect("join"), Ok(Value::Int(11)));
    assert_eq!(second.join().expect("join"), Ok(Value::Int(24)));

    let lines = sink.lines();
    assert!(lines.iter().any(|l| l.trim_start() == "Starting var:.. x = 10"));
    assert!(lines.iter().any(|l| l.trim_start() == "Starting var:.. n = 4"));
    // Both calls closed their brackets.
    assert_eq!(lines.iter().filter(|l| l.starts_with("Elapsed time: ")).count(), 2);
}

/// A wrapped callable under a disabled session behaves identically and
/// produces no output.
#[test]
fn test_disabled_session_is_a_pass_through() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.with_disabled(true).build().expect("valid session");

    let traced = tracer.wrap(test_utils::count_up()).expect("wrap still works");
    let mut coroutine = traced.instantiate(vec![Value::Int(1)]).expect("generator");
    let step = coroutine.resume(ResumeAction::Start).expect("resumes");
    assert_eq!(step, CoroutineStep::Yielded(Value::Int(1)));

    assert!(sink.contents().is_empty());
}

/// Overwrite semantics: the file is truncated on the session's first write,
/// then appended to.
#[test]
fn test_file_output_with_overwrite() {
    init::init_test_environment();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("trace.log");
    std::fs::write(&path, "previous run\n").expect("seed");

    let tracer = Tracer::builder()
        .with_output_path(&path)
        .with_overwrite(true)
        .with_normalize(true)
        .build()
        .expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(5)]).expect("call succeeds");

    let contents = std::fs::read_to_string(&path).expect("read log");
    assert!(!contents.contains("previous run"));
    assert!(contents.contains("Starting var:.. x = 5"));
    assert!(contents.contains("Return value:.. 6"));
}
