//! String functions of the standard library.

use regex::Regex;
use sluice_analysis::types::Type;

use super::CallContext;
use crate::error::RunResult;
use crate::value::Array;
use crate::value::Value;

/// Implements `sub(String, String, String) -> String`.
///
/// The pattern is a regular expression; a malformed pattern is an error.
pub(super) fn sub(context: &CallContext<'_>) -> RunResult<Value> {
    let input = context.string_arg(0)?;
    let pattern = context.string_arg(1)?;
    let replacement = context.string_arg(2)?;

    let regex = Regex::new(&pattern)
        .map_err(|e| context.error(format!("invalid regular expression: {e}")))?;

    Ok(Value::string(
        regex.replace_all(&input, replacement.as_str()),
    ))
}

/// Implements `basename(String, String?) -> String`.
pub(super) fn basename(context: &CallContext<'_>) -> RunResult<Value> {
    let path = context.string_arg(0)?;
    let base = path.rsplit('/').next().unwrap_or(&path);

    let base = if context.args.len() == 2 {
        let suffix = context.string_arg(1)?;
        base.strip_suffix(&suffix).unwrap_or(base)
    } else {
        base
    };

    Ok(Value::string(base))
}

/// Implements `sep(String, Array[String]) -> String`.
pub(super) fn sep(context: &CallContext<'_>) -> RunResult<Value> {
    let separator = context.string_arg(0)?;
    let array = context
        .coerce_arg(1, &Type::array(Type::string()))?;
    let items: Vec<&str> = array
        .unwrap_array()
        .as_slice()
        .iter()
        .map(Value::unwrap_str)
        .collect();

    Ok(Value::string(items.join(&separator)))
}

/// Implements `prefix(String, Array[P]) -> Array[String]`.
pub(super) fn prefix(context: &CallContext<'_>) -> RunResult<Value> {
    affix(context, true)
}

/// Implements `suffix(String, Array[P]) -> Array[String]`.
pub(super) fn suffix(context: &CallContext<'_>) -> RunResult<Value> {
    affix(context, false)
}

/// Shared implementation of `prefix`/`suffix`.
fn affix(context: &CallContext<'_>, before: bool) -> RunResult<Value> {
    let affix = context.string_arg(0)?;
    let array = context.coerce_arg(1, &Type::array(Type::string()))?;

    let values: Vec<Value> = array
        .unwrap_array()
        .as_slice()
        .iter()
        .map(|v| {
            let s = v.unwrap_str();
            if before {
                Value::string(format!("{affix}{s}"))
            } else {
                Value::string(format!("{s}{affix}"))
            }
        })
        .collect();

    Ok(Value::Array(Array::new(Type::string(), values)))
}

/// Implements `quote(Array[P]) -> Array[String]`.
pub(super) fn quote(context: &CallContext<'_>) -> RunResult<Value> {
    enclose(context, '"')
}

/// Implements `squote(Array[P]) -> Array[String]`.
pub(super) fn squote(context: &CallContext<'_>) -> RunResult<Value> {
    enclose(context, '\'')
}

/// Shared implementation of `quote`/`squote`.
fn enclose(context: &CallContext<'_>, mark: char) -> RunResult<Value> {
    let array = context.coerce_arg(0, &Type::array(Type::string()))?;
    let values: Vec<Value> = array
        .unwrap_array()
        .as_slice()
        .iter()
        .map(|v| Value::string(format!("{mark}{s}{mark}", s = v.unwrap_str())))
        .collect();

    Ok(Value::Array(Array::new(Type::string(), values)))
}
