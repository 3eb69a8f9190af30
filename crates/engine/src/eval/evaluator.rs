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

//! Watch-expression evaluation against live frame bindings.
//!
//! Names resolve through the frame's lookup chain: locals, then the
//! enclosing scope, then module globals. Every failure is an error result,
//! never a panic; the watch layer treats any error as "skip".

use eyre::{bail, Result};

use xtrace_common::types::{Frame, Value};

use super::{BinaryOp, Expr, UnaryOp};

/// Evaluate a compiled expression against a frame.
pub fn evaluate(expr: &Expr, frame: &Frame) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => evaluate_name(name, frame),
        Expr::Member(base, name) => evaluate_member(base, name, frame),
        Expr::Index(base, index) => evaluate_index(base, index, frame),
        Expr::Paren(inner) => evaluate(inner, frame),
        Expr::Unary(op, operand) => evaluate_unary(*op, operand, frame),
        Expr::Binary(op, left, right) => match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                evaluate_arithmetic(*op, left, right, frame)
            }
            BinaryOp::Eq | BinaryOp::Ne => evaluate_equality(*op, left, right, frame),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                evaluate_ordering(*op, left, right, frame)
            }
            BinaryOp::And | BinaryOp::Or => evaluate_logical(*op, left, right, frame),
        },
    }
}

fn evaluate_name(name: &str, frame: &Frame) -> Result<Value> {
    match frame.lookup(name) {
        Some(value) => Ok(value.clone()),
        None => bail!("name '{name}' is not defined"),
    }
}

fn evaluate_member(base: &Expr, name: &str, frame: &Frame) -> Result<Value> {
    let value = evaluate(base, frame)?;
    match &value {
        Value::Object(object) => match object.attrs.get(name) {
            Some(attr) => Ok(attr.clone()),
            None => bail!("'{}' object has no attribute '{name}'", object.class),
        },
        other => bail!("'{}' value has no attribute '{name}'", other.class_name()),
    }
}

fn evaluate_index(base: &Expr, index: &Expr, frame: &Frame) -> Result<Value> {
    let value = evaluate(base, frame)?;
    let index = evaluate(index, frame)?;
    if value.is_mapping() {
        return match value.key(&index) {
            Some(item) => Ok(item),
            None => bail!("key {} not found", index.repr()),
        };
    }
    if value.is_sequence() {
        let Value::Int(i) = index else {
            bail!("sequence indices must be integers, got {}", index.class_name());
        };
        return match value.index(i) {
            Some(item) => Ok(item),
            None => bail!("index {i} out of range"),
        };
    }
    bail!("'{}' value is not subscriptable", value.class_name())
}

fn evaluate_unary(op: UnaryOp, operand: &Expr, frame: &Frame) -> Result<Value> {
    let value = evaluate(operand, frame)?;
    match (op, &value) {
        (UnaryOp::Neg, Value::Int(i)) => match i.checked_neg() {
            Some(negated) => Ok(Value::Int(negated)),
            None => bail!("integer overflow negating {i}"),
        },
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => bail!("cannot negate '{}' value", other.class_name()),
        (UnaryOp::Not, other) => bail!("'!' expects a bool, got '{}'", other.class_name()),
    }
}

fn evaluate_arithmetic(op: BinaryOp, left: &Expr, right: &Expr, frame: &Frame) -> Result<Value> {
    let left = evaluate(left, frame)?;
    let right = evaluate(right, frame)?;

    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        bail!("division by zero");
                    }
                    a.checked_div(b)
                }
                BinaryOp::Rem => {
                    if b == 0 {
                        bail!("division by zero");
                    }
                    a.checked_rem(b)
                }
                _ => unreachable!("non-arithmetic operator {op:?}"),
            };
            match result {
                Some(i) => Ok(Value::Int(i)),
                None => bail!("integer overflow"),
            }
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_float(&left);
            let b = as_float(&right);
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        bail!("division by zero");
                    }
                    a / b
                }
                BinaryOp::Rem => {
                    if b == 0.0 {
                        bail!("division by zero");
                    }
                    a % b
                }
                _ => unreachable!("non-arithmetic operator {op:?}"),
            };
            Ok(Value::Float(result))
        }
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            Ok(Value::Str(format!("{a}{b}")))
        }
        (Value::Seq(a), Value::Seq(b)) if op == BinaryOp::Add => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            Ok(Value::Seq(joined))
        }
        _ => bail!(
            "unsupported operand types for {op:?}: '{}' and '{}'",
            left.class_name(),
            right.class_name()
        ),
    }
}

fn evaluate_equality(op: BinaryOp, left: &Expr, right: &Expr, frame: &Frame) -> Result<Value> {
    let left = evaluate(left, frame)?;
    let right = evaluate(right, frame)?;
    let equal = left == right;
    Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
}

fn evaluate_ordering(op: BinaryOp, left: &Expr, right: &Expr, frame: &Frame) -> Result<Value> {
    let left = evaluate(left, frame)?;
    let right = evaluate(right, frame)?;

    let ordering = match (&left, &right) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            match as_float(&left).partial_cmp(&as_float(&right)) {
                Some(ordering) => ordering,
                None => bail!("values are not comparable"),
            }
        }
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => bail!(
            "cannot order '{}' and '{}' values",
            left.class_name(),
            right.class_name()
        ),
    };

    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("non-ordering operator {op:?}"),
    };
    Ok(Value::Bool(result))
}

fn evaluate_logical(op: BinaryOp, left: &Expr, right: &Expr, frame: &Frame) -> Result<Value> {
    let Value::Bool(left) = evaluate(left, frame)? else {
        bail!("logical operators expect bool operands");
    };
    // Short circuit before touching the right operand.
    match (op, left) {
        (BinaryOp::And, false) => return Ok(Value::Bool(false)),
        (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
        _ => {}
    }
    let Value::Bool(right) = evaluate(right, frame)? else {
        bail!("logical operators expect bool operands");
    };
    Ok(Value::Bool(right))
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => f64::NAN,
    }
}
