//! Array and map functions of the standard library.

use sluice_analysis::types::Type;

use super::CallContext;
use crate::error::RunResult;
use crate::eval::values_equal;
use crate::value::Array;
use crate::value::Map;
use crate::value::Pair;
use crate::value::Value;

/// Implements `length(Array[X]) -> Int`.
pub(super) fn length(context: &CallContext<'_>) -> RunResult<Value> {
    Ok(Value::Int(context.array_arg(0)?.len() as i64))
}

/// Implements `flatten(Array[Array[X]]) -> Array[X]`.
pub(super) fn flatten(context: &CallContext<'_>) -> RunResult<Value> {
    let outer = context.array_arg(0)?;
    let item_ty = match outer.item_ty() {
        Type::Array { item, .. } => (**item).clone(),
        _ => Type::any(),
    };

    let mut values = Vec::new();
    for inner in outer.as_slice() {
        let inner = inner
            .as_array()
            .ok_or_else(|| context.error("expected an array of arrays"))?;
        values.extend(inner.as_slice().iter().cloned());
    }

    Ok(Value::Array(Array::new(item_ty, values)))
}

/// Implements `select_first(Array[X?]) -> X`.
///
/// Fails when every item is null.
pub(super) fn select_first(context: &CallContext<'_>) -> RunResult<Value> {
    context
        .array_arg(0)?
        .as_slice()
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| context.error("the array contains no defined value"))
}

/// Implements `select_all(Array[X?]) -> Array[X]`.
pub(super) fn select_all(context: &CallContext<'_>) -> RunResult<Value> {
    let array = context.array_arg(0)?;
    Ok(Value::Array(Array::new(
        array.item_ty().clone().require(),
        array
            .as_slice()
            .iter()
            .filter(|v| !v.is_null())
            .cloned()
            .collect(),
    )))
}

/// Implements `defined(X?) -> Boolean`.
pub(super) fn defined(context: &CallContext<'_>) -> RunResult<Value> {
    Ok(Value::Boolean(!context.arg(0).is_null()))
}

/// Implements `zip(Array[X], Array[Y]) -> Array[Pair[X, Y]]`.
///
/// The arrays must have equal lengths.
pub(super) fn zip(context: &CallContext<'_>) -> RunResult<Value> {
    let left = context.array_arg(0)?;
    let right = context.array_arg(1)?;
    if left.len() != right.len() {
        return Err(context.error(format!(
            "arrays have mismatched lengths {l} and {r}",
            l = left.len(),
            r = right.len()
        )));
    }

    let values: Vec<Value> = left
        .as_slice()
        .iter()
        .zip(right.as_slice())
        .map(|(l, r)| Value::Pair(Pair::new(l.clone(), r.clone())))
        .collect();

    Ok(Value::Array(Array::new(
        Type::pair(left.item_ty().clone(), right.item_ty().clone()),
        values,
    )))
}

/// Implements `cross(Array[X], Array[Y]) -> Array[Pair[X, Y]]`.
///
/// Produces the cross product in row-major order.
pub(super) fn cross(context: &CallContext<'_>) -> RunResult<Value> {
    let left = context.array_arg(0)?;
    let right = context.array_arg(1)?;

    let mut values = Vec::with_capacity(left.len() * right.len());
    for l in left.as_slice() {
        for r in right.as_slice() {
            values.push(Value::Pair(Pair::new(l.clone(), r.clone())));
        }
    }

    Ok(Value::Array(Array::new(
        Type::pair(left.item_ty().clone(), right.item_ty().clone()),
        values,
    )))
}

/// Implements `unzip(Array[Pair[X, Y]]) -> Pair[Array[X], Array[Y]]`.
pub(super) fn unzip(context: &CallContext<'_>) -> RunResult<Value> {
    let array = context.array_arg(0)?;
    let (left_ty, right_ty) = match array.item_ty() {
        Type::Pair { left, right, .. } => ((**left).clone(), (**right).clone()),
        _ => (Type::any(), Type::any()),
    };

    let mut lefts = Vec::with_capacity(array.len());
    let mut rights = Vec::with_capacity(array.len());
    for item in array.as_slice() {
        let pair = item
            .as_pair()
            .ok_or_else(|| context.error("expected an array of pairs"))?;
        lefts.push(pair.left().clone());
        rights.push(pair.right().clone());
    }

    Ok(Value::Pair(Pair::new(
        Value::Array(Array::new(left_ty, lefts)),
        Value::Array(Array::new(right_ty, rights)),
    )))
}

/// Implements `transpose(Array[Array[X]]) -> Array[Array[X]]`.
///
/// The input must be rectangular.
pub(super) fn transpose(context: &CallContext<'_>) -> RunResult<Value> {
    let outer = context.array_arg(0)?;
    let rows: Vec<&Array> = outer
        .as_slice()
        .iter()
        .map(|v| {
            v.as_array()
                .ok_or_else(|| context.error("expected an array of arrays"))
        })
        .collect::<RunResult<_>>()?;

    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != width) {
        return Err(context.error("cannot transpose a ragged array"));
    }

    let item_ty = outer.item_ty().clone();
    let inner_ty = match &item_ty {
        Type::Array { item, .. } => (**item).clone(),
        _ => Type::any(),
    };

    let mut columns = Vec::with_capacity(width);
    for i in 0..width {
        let column: Vec<Value> = rows.iter().map(|r| r.as_slice()[i].clone()).collect();
        columns.push(Value::Array(Array::new(inner_ty.clone(), column)));
    }

    Ok(Value::Array(Array::new(
        Type::array(inner_ty),
        columns,
    )))
}

/// Implements `keys(Map[K, V]) -> Array[K]`.
pub(super) fn keys(context: &CallContext<'_>) -> RunResult<Value> {
    let map = context
        .arg(0)
        .as_map()
        .ok_or_else(|| context.error("expected a map argument"))?;

    Ok(Value::Array(Array::new(
        map.key_ty().clone(),
        map.entries().iter().map(|(k, _)| k.clone()).collect(),
    )))
}

/// Implements `as_map(Array[Pair[K, V]]) -> Map[K, V]`.
///
/// Duplicate keys are an error.
pub(super) fn as_map(context: &CallContext<'_>) -> RunResult<Value> {
    let array = context.array_arg(0)?;
    let (key_ty, value_ty) = match array.item_ty() {
        Type::Pair { left, right, .. } => ((**left).clone(), (**right).clone()),
        _ => (Type::any(), Type::any()),
    };

    let mut entries: Vec<(Value, Value)> = Vec::with_capacity(array.len());
    for item in array.as_slice() {
        let pair = item
            .as_pair()
            .ok_or_else(|| context.error("expected an array of pairs"))?;

        if entries.iter().any(|(k, _)| values_equal(k, pair.left())) {
            return Err(context.error(format!(
                "duplicate key {key} in map construction",
                key = pair.left()
            )));
        }

        entries.push((pair.left().clone(), pair.right().clone()));
    }

    Ok(Value::Map(Map::new(key_ty, value_ty, entries)))
}

/// Implements `as_pairs(Map[K, V]) -> Array[Pair[K, V]]`.
pub(super) fn as_pairs(context: &CallContext<'_>) -> RunResult<Value> {
    let map = context
        .arg(0)
        .as_map()
        .ok_or_else(|| context.error("expected a map argument"))?;

    Ok(Value::Array(Array::new(
        Type::pair(map.key_ty().clone(), map.value_ty().clone()),
        map.entries()
            .iter()
            .map(|(k, v)| Value::Pair(Pair::new(k.clone(), v.clone())))
            .collect(),
    )))
}
