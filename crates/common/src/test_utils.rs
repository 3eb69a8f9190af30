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

//! Observed-program fixtures for tests across the workspace.
//!
//! Each fixture is a small program of the modeled runtime with inline
//! source text, so tests get deterministic source lines without touching
//! the filesystem. Fixtures use one source file per function; the source
//! cache is keyed by (module, file) and would otherwise bleed between
//! fixtures.

use std::sync::Arc;

use crate::{
    runtime::{Activation, Call, CoroutineStep, Function, PlainBody, ResumeAction, StepFn},
    types::{Bindings, CodeUnit, Object, RuntimeError, RuntimeResult, Value},
};

/// Extract an integer or raise the runtime's type error.
pub fn expect_int(value: &Value) -> RuntimeResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::type_error(format!("expected int, got {}", other.class_name()))),
    }
}

/// `fn add_one(x): y = x + 1; return y`
///
/// The canonical single-function fixture: one parameter, one derived local,
/// an explicit return.
pub fn add_one() -> Arc<Function> {
    let code = CodeUnit::new("add_one", "fixtures", "fixtures/add_one.xt", 2)
        .with_params(["x"])
        .with_var_order(["x", "y"])
        .with_source(["@traced", "fn add_one(x):", "    y = x + 1", "    return y"]);
    Arc::new(Function::new(
        code,
        Arc::new(Bindings::new()),
        Box::new(|cx| {
            cx.line(3);
            let y = Value::Int(expect_int(&cx.require("x")?)? + 1);
            cx.set("y", y.clone());
            cx.line(4);
            Ok(y)
        }),
    ))
}

/// Same program as [`add_one`], but its reported definition line points at
/// the annotation above the definition, the way a multi-line wrapper chain
/// misreports it.
pub fn annotated_add_one() -> Arc<Function> {
    let code = CodeUnit::new("add_one", "fixtures", "fixtures/annotated_add_one.xt", 1)
        .with_params(["x"])
        .with_var_order(["x", "y"])
        .with_source(["@traced", "fn add_one(x):", "    y = x + 1", "    return y"]);
    Arc::new(Function::new(
        code,
        Arc::new(Bindings::new()),
        Box::new(|cx| {
            cx.line(3);
            let y = Value::Int(expect_int(&cx.require("x")?)? + 1);
            cx.set("y", y.clone());
            cx.line(4);
            Ok(y)
        }),
    ))
}

/// `fn explode(x): raise ValueError` — fails after one executed line.
pub fn failing_function() -> Arc<Function> {
    let code = CodeUnit::new("explode", "fixtures", "fixtures/explode.xt", 1)
        .with_params(["x"])
        .with_source(["fn explode(x):", "    raise ValueError(\"x is cursed\")"]);
    Arc::new(Function::new(
        code,
        Arc::new(Bindings::new()),
        Box::new(|cx| {
            cx.line(2);
            Err(RuntimeError::new("ValueError", "x is cursed"))
        }),
    ))
}

/// `fn nothing(): return none` — a normal code path returning the absent value.
pub fn returns_none() -> Arc<Function> {
    let code = CodeUnit::new("nothing", "fixtures", "fixtures/nothing.xt", 1)
        .with_source(["fn nothing():", "    return none"]);
    Arc::new(Function::new(
        code,
        Arc::new(Bindings::new()),
        Box::new(|cx| {
            cx.line(2);
            Ok(Value::None)
        }),
    ))
}

/// A chain of functions where each one calls the next with `n + 1` and the
/// last returns its argument. `names[0]` is the outermost callable.
pub fn call_chain(module: &str, names: &[&str]) -> Vec<Arc<Function>> {
    let globals = Arc::new(Bindings::new());
    let mut chain: Vec<Arc<Function>> = Vec::new();
    let mut next: Option<Arc<Function>> = None;

    for name in names.iter().rev() {
        let source_call = match &next {
            Some(callee) => format!("    r = {}(n + 1)", callee.code().name),
            None => "    r = n".to_string(),
        };
        let code = CodeUnit::new(*name, module, format!("{module}/{name}.xt"), 1)
            .with_params(["n"])
            .with_var_order(["n", "r"])
            .with_source([format!("fn {name}(n):"), source_call, "    return r".to_string()]);

        let callee = next.clone();
        let body: PlainBody = Box::new(move |cx| {
            cx.line(2);
            let n = expect_int(&cx.require("n")?)?;
            let r = match &callee {
                Some(f) => cx.call(&**f, vec![Value::Int(n + 1)])?,
                None => Value::Int(n),
            };
            cx.set("r", r.clone());
            cx.line(3);
            Ok(r)
        });

        let f = Arc::new(Function::new(code, globals.clone(), body));
        next = Some(f.clone());
        chain.push(f);
    }

    chain.reverse();
    chain
}

/// `fn count_up(limit)` — a generator yielding `1..=limit`, then completing
/// with the absent value. The loop counter lives in the coroutine's frame,
/// so it survives suspension.
pub fn count_up() -> Arc<Function> {
    let code = CodeUnit::new("count_up", "fixtures", "fixtures/count_up.xt", 1)
        .with_params(["limit"])
        .with_var_order(["limit", "i"])
        .with_source([
            "fn count_up(limit):",
            "    i = (i + 1) if i else 1",
            "    if i > limit: return",
            "    yield i",
        ]);
    Arc::new(Function::generator(
        code,
        Arc::new(Bindings::new()),
        Box::new(|| {
            let step: StepFn = Box::new(|cx: &mut Activation, action: ResumeAction| {
                if let ResumeAction::Throw(err) = action {
                    return Err(err);
                }
                cx.line(2);
                let next = match cx.get("i") {
                    Some(Value::Int(i)) => i + 1,
                    _ => 1,
                };
                let limit = expect_int(&cx.require("limit")?)?;
                if next > limit {
                    return Ok(CoroutineStep::Complete(Value::None));
                }
                cx.set("i", Value::Int(next));
                cx.line(4);
                Ok(CoroutineStep::Yielded(Value::Int(next)))
            });
            step
        }),
    ))
}

/// `fn fact(n)` — the classic recursive factorial. Recursion goes through
/// the function itself, so every nesting level gets its own frame of the
/// same code unit.
pub fn factorial() -> Arc<Function> {
    use std::sync::Weak;

    Arc::new_cyclic(|weak: &Weak<Function>| {
        let code = CodeUnit::new("fact", "fixtures", "fixtures/fact.xt", 1)
            .with_params(["n"])
            .with_var_order(["n", "r"])
            .with_source([
                "fn fact(n):",
                "    if n <= 1: return 1",
                "    r = n * fact(n - 1)",
                "    return r",
            ]);
        let recurse = weak.clone();
        Function::new(
            code,
            Arc::new(Bindings::new()),
            Box::new(move |cx| {
                cx.line(2);
                let n = expect_int(&cx.require("n")?)?;
                if n <= 1 {
                    return Ok(Value::Int(1));
                }
                cx.line(3);
                let f = recurse
                    .upgrade()
                    .ok_or_else(|| RuntimeError::new("RuntimeError", "function dropped"))?;
                let prev = expect_int(&cx.call(&*f, vec![Value::Int(n - 1)])?)?;
                let r = Value::Int(n * prev);
                cx.set("r", r.clone());
                cx.line(4);
                Ok(r)
            }),
        )
    })
}

/// An async-kind function, used to exercise wrap-time rejection.
pub fn async_fetch() -> Arc<Function> {
    let code = CodeUnit::new("fetch", "fixtures", "fixtures/fetch.xt", 1)
        .with_params(["url"])
        .with_source(["async fn fetch(url):", "    ..."]);
    Arc::new(Function::asynchronous(code, Arc::new(Bindings::new())))
}

/// A `Point` instance with integer `x`/`y` attributes.
pub fn point_object(x: i64, y: i64) -> Value {
    Value::object(
        Object::new("Point").with_attr("x", Value::Int(x)).with_attr("y", Value::Int(y)),
    )
}

/// `fn norm2(p): m = p.x * p.x + p.y * p.y; return m`
pub fn norm_squared() -> Arc<Function> {
    let code = CodeUnit::new("norm2", "fixtures", "fixtures/norm2.xt", 1)
        .with_params(["p"])
        .with_var_order(["p", "m"])
        .with_source(["fn norm2(p):", "    m = p.x * p.x + p.y * p.y", "    return m"]);
    Arc::new(Function::new(
        code,
        Arc::new(Bindings::new()),
        Box::new(|cx| {
            cx.line(2);
            let p = cx.require("p")?;
            let Value::Object(object) = &p else {
                return Err(RuntimeError::type_error("norm2() expects an object"));
            };
            let x = expect_int(
                object.attrs.get("x").ok_or_else(|| RuntimeError::name_error("x"))?,
            )?;
            let y = expect_int(
                object.attrs.get("y").ok_or_else(|| RuntimeError::name_error("y"))?,
            )?;
            let m = Value::Int(x * x + y * y);
            cx.set("m", m.clone());
            cx.line(3);
            Ok(m)
        }),
    ))
}

/// A class with one plain method, one generator method and one async
/// method, deriving from a parent with one method of its own. Exercises
/// the "own plain methods only" wrapping rule.
pub fn shape_class() -> crate::runtime::ClassDef {
    use crate::runtime::ClassDef;

    let parent = Arc::new(ClassDef::new("Base").with_method("describe", {
        let f: Arc<dyn Call> = returns_none();
        f
    }));

    ClassDef::new("Shape")
        .with_parent(parent)
        .with_method("area", {
            let f: Arc<dyn Call> = add_one();
            f
        })
        .with_method("vertices", {
            let f: Arc<dyn Call> = count_up();
            f
        })
        .with_method("load", {
            let f: Arc<dyn Call> = async_fetch();
            f
        })
}
