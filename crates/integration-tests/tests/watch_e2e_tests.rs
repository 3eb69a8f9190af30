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

//! End-to-end tests for watch expressions and value rendering inside live
//! traces.

use xtrace_common::{runtime::Call, test_utils, types::Value};
use xtrace_engine::{IndexRange, RenderRule, Watch};
use xtrace_integration_tests::test_utils::{buffered_session, init, variable_lines};

/// A watch that never evaluates contributes nothing and breaks nothing.
#[test]
fn test_undefined_watch_is_silently_skipped() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.with_watch("no_such_name").build().expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");

    let result = traced.invoke(vec![Value::Int(1)]).expect("call succeeds");
    assert_eq!(result, Value::Int(2));
    assert!(variable_lines(&sink).iter().all(|line| !line.contains("no_such_name")));
}

/// An exploded watch over an attribute-bearing object reports each
/// attribute as its own entry.
#[test]
fn test_exploded_object_watch_reports_attributes() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.with_watch_explode("p").build().expect("valid session");
    let traced = tracer.wrap(test_utils::norm_squared()).expect("wrappable");

    let result = traced.invoke(vec![test_utils::point_object(3, 4)]).expect("call succeeds");
    assert_eq!(result, Value::Int(25));

    let starting: Vec<String> = variable_lines(&sink)
        .into_iter()
        .filter(|line| line.starts_with("Starting var:"))
        .collect();
    // Locals first (p itself), then the watch's entries sorted by label.
    // `p` the local and `p` the watch root render identically, so the watch
    // root does not produce a second entry.
    assert_eq!(starting.len(), 3, "p, p.x, p.y: {starting:#?}");
    assert_eq!(starting[1], "Starting var:.. p.x = 3");
    assert_eq!(starting[2], "Starting var:.. p.y = 4");
}

/// A prebuilt index watch with a range restriction only reports that
/// range.
#[test]
fn test_index_watch_with_range_restriction() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let watch = Watch::indices("xs").expect("valid watch").with_range(IndexRange::last(2));
    let tracer = builder.with_watch_spec(watch).build().expect("valid session");

    // A function binding `xs` to a five-element sequence.
    let f = {
        use std::sync::Arc;
        use xtrace_common::{
            runtime::Function,
            types::{Bindings, CodeUnit},
        };
        let code = CodeUnit::new("build_xs", "watch_fixtures", "watch_fixtures/build_xs.xt", 1)
            .with_var_order(["xs"])
            .with_source(["fn build_xs():", "    xs = [0, 1, 2, 3, 4]", "    return none"]);
        Arc::new(Function::new(
            code,
            Arc::new(Bindings::new()),
            Box::new(|cx| {
                cx.line(2);
                cx.set("xs", Value::Seq((0..5).map(Value::Int).collect()));
                cx.line(3);
                Ok(Value::None)
            }),
        ))
    };

    let traced = tracer.wrap(f).expect("wrappable");
    let _ = traced.invoke(vec![]).expect("call succeeds");

    let lines = variable_lines(&sink);
    assert!(lines.iter().any(|l| l.starts_with("New var:....... xs[3] = 3")));
    assert!(lines.iter().any(|l| l.starts_with("New var:....... xs[4] = 4")));
    assert!(lines.iter().all(|l| !l.contains("xs[0]") && !l.contains("xs[2]")));
}

/// Custom renderer rules apply inside traces, in configuration order.
#[test]
fn test_custom_repr_rule_applies_to_reported_values() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder
        .with_custom_repr(RenderRule::for_class("int", |v| format!("0x{:x}", int_of(v))))
        .build()
        .expect("valid session");
    let traced = tracer.wrap(test_utils::add_one()).expect("wrappable");
    let _ = traced.invoke(vec![Value::Int(255)]).expect("call succeeds");

    let lines = variable_lines(&sink);
    assert!(lines.iter().any(|l| l == "Starting var:.. x = 0xff"), "{lines:#?}");
    assert!(lines.iter().any(|l| l == "New var:....... y = 0x100"), "{lines:#?}");
}

fn int_of(value: &Value) -> i64 {
    match value {
        Value::Int(i) => *i,
        _ => 0,
    }
}

/// Rendered values respect the configured maximum length, exactly.
#[test]
fn test_max_variable_length_round_trip() {
    init::init_test_environment();
    let (builder, sink) = buffered_session();
    let tracer = builder.with_max_variable_length(Some(32)).build().expect("valid session");

    let f = {
        use std::sync::Arc;
        use xtrace_common::{
            runtime::Function,
            types::{Bindings, CodeUnit},
        };
        let code = CodeUnit::new("strings", "watch_fixtures", "watch_fixtures/strings.xt", 1)
            .with_var_order(["short", "long"])
            .with_source(["fn strings():", "    short = ...; long = ...", "    return none"]);
        Arc::new(Function::new(
            code,
            Arc::new(Bindings::new()),
            Box::new(|cx| {
                cx.line(2);
                cx.set("short", Value::Str("brief".into()));
                cx.set("long", Value::Str("z".repeat(100)));
                cx.line(3);
                Ok(Value::None)
            }),
        ))
    };
    let traced = tracer.wrap(f).expect("wrappable");
    let _ = traced.invoke(vec![]).expect("call succeeds");

    let lines = variable_lines(&sink);
    let value_of = |name: &str| {
        lines
            .iter()
            .find_map(|line| line.strip_prefix(&format!("New var:....... {name} = ")))
            .unwrap_or_else(|| panic!("missing entry for {name}: {lines:#?}"))
            .to_string()
    };

    // Under the limit: reproduced exactly.
    assert_eq!(value_of("short"), "\"brief\"");
    // Over the limit: exactly the limit, with a visible marker.
    let long = value_of("long");
    assert_eq!(long.chars().count(), 32);
    assert!(long.contains("..."));
}

/// Equal watches collapse into one; distinct kinds do not.
#[test]
fn test_watch_deduplication_end_to_end() {
    init::init_test_environment();
    let (builder, _sink) = buffered_session();
    let tracer = builder
        .with_watch("x")
        .with_watch(" x ")
        .with_watch_explode("x")
        .with_watch("x + 1")
        .build()
        .expect("valid session");
    assert_eq!(tracer.watch_count(), 3);
}
