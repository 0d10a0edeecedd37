//! Operator semantics over values.

#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;

use kestrel_foundation::{Error, ErrorKind, Result, Type, Value};

use super::ast::{BinaryOp, UnaryOp};

fn mismatch(expected: Type, actual: &Value) -> Error {
    Error::type_mismatch(expected, actual.value_type())
}

// =============================================================================
// Unary
// =============================================================================

pub(crate) fn unary(op: UnaryOp, value: &Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
        UnaryOp::IsNil => Ok(Value::Bool(value.is_nil())),
        UnaryOp::Neg => match value {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Error::native("-", "integer overflow")),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => Err(mismatch(Type::Int, other)),
        },
        UnaryOp::Len => {
            let len = match value {
                Value::String(s) => s.chars().count(),
                Value::Vec(v) => v.len(),
                Value::Set(s) => s.len(),
                Value::Map(m) => m.len(),
                other => return Err(mismatch(Type::vec(Type::Any), other)),
            };
            Ok(Value::from(len))
        }
    }
}

// =============================================================================
// Binary (And/Or short-circuit in the compiler, not here)
// =============================================================================

pub(crate) fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt => ordered(lhs, rhs, Ordering::is_lt),
        BinaryOp::Le => ordered(lhs, rhs, Ordering::is_le),
        BinaryOp::Gt => ordered(lhs, rhs, Ordering::is_gt),
        BinaryOp::Ge => ordered(lhs, rhs, Ordering::is_ge),
        BinaryOp::And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => arithmetic(lhs, rhs, "-", i64::checked_sub, |a, b| a - b),
        BinaryOp::Mul => arithmetic(lhs, rhs, "*", i64::checked_mul, |a, b| a * b),
        BinaryOp::Div => {
            if rhs.as_number() == Some(0.0) {
                return Err(Error::new(ErrorKind::DivisionByZero));
            }
            arithmetic(lhs, rhs, "/", i64::checked_div, |a, b| a / b)
        }
        BinaryOp::Rem => {
            if rhs.as_number() == Some(0.0) {
                return Err(Error::new(ErrorKind::DivisionByZero));
            }
            arithmetic(lhs, rhs, "%", i64::checked_rem, |a, b| a % b)
        }
        BinaryOp::StartsWith => strings(lhs, rhs, |a, b| a.starts_with(b)),
        BinaryOp::EndsWith => strings(lhs, rhs, |a, b| a.ends_with(b)),
        BinaryOp::Contains => contains(lhs, rhs),
    }
}

/// Equality with ints and floats compared numerically.
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            lhs.compare(rhs) == Some(Ordering::Equal)
        }
        _ => lhs == rhs,
    }
}

fn ordered(lhs: &Value, rhs: &Value, test: fn(Ordering) -> bool) -> Result<Value> {
    match lhs.compare(rhs) {
        Some(ord) => Ok(Value::Bool(test(ord))),
        // NaN compares false against everything.
        None if lhs.as_float().is_some_and(f64::is_nan) || rhs.as_float().is_some_and(f64::is_nan) => {
            Ok(Value::Bool(false))
        }
        None => Err(mismatch(lhs.value_type(), rhs)),
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::from(format!("{a}{b}"))),
        _ => arithmetic(lhs, rhs, "+", i64::checked_add, |a, b| a + b),
    }
}

fn arithmetic(
    lhs: &Value,
    rhs: &Value,
    symbol: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| Error::native(symbol, "integer overflow")),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
                return Err(mismatch(Type::Float, lhs));
            };
            Ok(Value::Float(float_op(a, b)))
        }
        (Value::Int(_) | Value::Float(_), other) | (other, _) => Err(mismatch(Type::Float, other)),
    }
}

fn strings(lhs: &Value, rhs: &Value, test: fn(&str, &str) -> bool) -> Result<Value> {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => Ok(Value::Bool(test(a, b))),
        (Value::String(_), other) | (other, _) => Err(mismatch(Type::String, other)),
    }
}

fn contains(lhs: &Value, rhs: &Value) -> Result<Value> {
    let found = match lhs {
        Value::String(s) => match rhs {
            Value::String(needle) => s.contains(&**needle),
            other => return Err(mismatch(Type::String, other)),
        },
        Value::Vec(items) => items.iter().any(|v| values_equal(v, rhs)),
        Value::Set(items) => items.contains(rhs),
        Value::Map(entries) => entries.contains_key(rhs),
        other => return Err(mismatch(Type::vec(Type::Any), other)),
    };
    Ok(Value::Bool(found))
}
