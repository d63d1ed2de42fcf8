//! Numeric functions of the standard library.

use sluice_analysis::types::Type;

use super::CallContext;
use crate::error::RunResult;
use crate::value::Array;
use crate::value::Value;

/// Implements `floor(Float) -> Int`.
pub(super) fn floor(context: &CallContext<'_>) -> RunResult<Value> {
    Ok(Value::Int(context.float_arg(0)?.floor() as i64))
}

/// Implements `ceil(Float) -> Int`.
pub(super) fn ceil(context: &CallContext<'_>) -> RunResult<Value> {
    Ok(Value::Int(context.float_arg(0)?.ceil() as i64))
}

/// Implements `round(Float) -> Int`.
pub(super) fn round(context: &CallContext<'_>) -> RunResult<Value> {
    Ok(Value::Int(context.float_arg(0)?.round() as i64))
}

/// Implements `min` over `Int`/`Float` operands.
///
/// The result is an `Int` only when both operands are.
pub(super) fn min(context: &CallContext<'_>) -> RunResult<Value> {
    match (context.arg(0), context.arg(1)) {
        (Value::Int(l), Value::Int(r)) => Ok(Value::Int(*l.min(r))),
        _ => Ok(Value::float(
            context.float_arg(0)?.min(context.float_arg(1)?),
        )),
    }
}

/// Implements `max` over `Int`/`Float` operands.
pub(super) fn max(context: &CallContext<'_>) -> RunResult<Value> {
    match (context.arg(0), context.arg(1)) {
        (Value::Int(l), Value::Int(r)) => Ok(Value::Int(*l.max(r))),
        _ => Ok(Value::float(
            context.float_arg(0)?.max(context.float_arg(1)?),
        )),
    }
}

/// Implements `range(Int) -> Array[Int]`.
///
/// A negative count is an error.
pub(super) fn range(context: &CallContext<'_>) -> RunResult<Value> {
    let n = context.int_arg(0)?;
    if n < 0 {
        return Err(context.error(format!("cannot create a range of {n} elements")));
    }

    Ok(Value::Array(Array::new(
        Type::int(),
        (0..n).map(Value::Int).collect(),
    )))
}
