//! File reading and writing functions of the standard library.
//!
//! Read functions validate encoding and parse strictly; write functions
//! create files in the evaluation context's temp directory and return
//! `File` values.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use sluice_analysis::types::Type;

use super::CallContext;
use crate::error::RunResult;
use crate::value::Array;
use crate::value::Map;
use crate::value::Value;

/// Reads the file argument into a string.
fn read_file(context: &CallContext<'_>) -> RunResult<String> {
    let path = context.path_arg(0)?;
    fs::read_to_string(&path).map_err(|e| {
        context.error(format!(
            "failed to read `{path}`: {e}",
            path = path.display()
        ))
    })
}

/// Splits file contents into lines, dropping the trailing newline.
fn lines_of(contents: &str) -> Vec<&str> {
    let trimmed = contents.strip_suffix('\n').unwrap_or(contents);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('\n').collect()
    }
}

/// Implements `read_string(File) -> String`.
///
/// A single trailing newline is removed.
pub(super) fn read_string(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    Ok(Value::string(
        contents.strip_suffix('\n').unwrap_or(&contents),
    ))
}

/// Implements `read_int(File) -> Int`.
pub(super) fn read_int(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    contents
        .trim()
        .parse()
        .map(Value::Int)
        .map_err(|_| context.error(format!("file does not contain an integer: `{}`", contents.trim())))
}

/// Implements `read_float(File) -> Float`.
pub(super) fn read_float(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    contents
        .trim()
        .parse()
        .map(Value::float)
        .map_err(|_| context.error(format!("file does not contain a float: `{}`", contents.trim())))
}

/// Implements `read_boolean(File) -> Boolean`.
pub(super) fn read_boolean(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    match contents.trim() {
        "true" => Ok(Value::Boolean(true)),
        "false" => Ok(Value::Boolean(false)),
        other => Err(context.error(format!("file does not contain a boolean: `{other}`"))),
    }
}

/// Implements `read_lines(File) -> Array[String]`.
pub(super) fn read_lines(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    Ok(Value::Array(Array::new(
        Type::string(),
        lines_of(&contents).into_iter().map(Value::string).collect(),
    )))
}

/// Implements `read_tsv(File) -> Array[Array[String]]`.
pub(super) fn read_tsv(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    let rows: Vec<Value> = lines_of(&contents)
        .into_iter()
        .map(|line| {
            Value::Array(Array::new(
                Type::string(),
                line.split('\t').map(Value::string).collect(),
            ))
        })
        .collect();

    Ok(Value::Array(Array::new(
        Type::array(Type::string()),
        rows,
    )))
}

/// Implements `read_map(File) -> Map[String, String]`.
///
/// Each line must contain exactly one tab; duplicate keys are an error.
pub(super) fn read_map(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    let mut entries: Vec<(Value, Value)> = Vec::new();

    for (i, line) in lines_of(&contents).into_iter().enumerate() {
        let mut columns = line.split('\t');
        let key = columns.next().unwrap_or_default();
        let value = columns
            .next()
            .ok_or_else(|| context.error(format!("line {n} has fewer than 2 columns", n = i + 1)))?;
        if columns.next().is_some() {
            return Err(context.error(format!("line {n} has more than 2 columns", n = i + 1)));
        }

        if entries.iter().any(|(k, _)| k.as_str() == Some(key)) {
            return Err(context.error(format!("duplicate key `{key}`")));
        }

        entries.push((Value::string(key), Value::string(value)));
    }

    Ok(Value::Map(Map::new(
        Type::string(),
        Type::string(),
        entries,
    )))
}

/// Implements `read_json(File) -> Any`.
pub(super) fn read_json(context: &CallContext<'_>) -> RunResult<Value> {
    let contents = read_file(context)?;
    let json: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|e| context.error(format!("file does not contain valid JSON: {e}")))?;
    Ok(Value::from_json_untyped(&json))
}

/// Creates a new file in the temp directory with the given contents.
fn write_temp(context: &CallContext<'_>, contents: &str) -> RunResult<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(context.name)
        .suffix(".tmp")
        .tempfile_in(context.context.temp_dir())
        .map_err(|e| context.error(format!("failed to create a temporary file: {e}")))?;

    file.write_all(contents.as_bytes())
        .map_err(|e| context.error(format!("failed to write a temporary file: {e}")))?;

    file.into_temp_path()
        .keep()
        .map_err(|e| context.error(format!("failed to keep a temporary file: {e}")))
}

/// Converts a temp path into a `File` value.
fn file_value(context: &CallContext<'_>, path: PathBuf) -> RunResult<Value> {
    let path = path
        .into_os_string()
        .into_string()
        .map_err(|_| context.error("temporary file path is not valid UTF-8"))?;
    Ok(Value::file(path))
}

/// Implements `write_lines(Array[String]) -> File`.
pub(super) fn write_lines(context: &CallContext<'_>) -> RunResult<Value> {
    let array = context.coerce_arg(0, &Type::array(Type::string()))?;
    let mut contents = String::new();
    for line in array.unwrap_array().as_slice() {
        contents.push_str(line.unwrap_str());
        contents.push('\n');
    }

    let path = write_temp(context, &contents)?;
    file_value(context, path)
}

/// Implements `write_tsv(Array[Array[String]]) -> File`.
pub(super) fn write_tsv(context: &CallContext<'_>) -> RunResult<Value> {
    let rows = context.coerce_arg(0, &Type::array(Type::array(Type::string())))?;
    let mut contents = String::new();
    for row in rows.unwrap_array().as_slice() {
        let columns: Vec<&str> = row
            .unwrap_array()
            .as_slice()
            .iter()
            .map(Value::unwrap_str)
            .collect();
        contents.push_str(&columns.join("\t"));
        contents.push('\n');
    }

    let path = write_temp(context, &contents)?;
    file_value(context, path)
}

/// Implements `write_map(Map[String, String]) -> File`.
///
/// Keys and values must not contain tabs or newlines.
pub(super) fn write_map(context: &CallContext<'_>) -> RunResult<Value> {
    let map = context.coerce_arg(0, &Type::map(Type::string(), Type::string()))?;
    let mut contents = String::new();
    for (k, v) in map.as_map().expect("value was coerced to a map").entries() {
        let (k, v) = (k.unwrap_str(), v.unwrap_str());
        if [k, v].iter().any(|s| s.contains('\t') || s.contains('\n')) {
            return Err(context.error(
                "map keys and values must not contain tab or newline characters",
            ));
        }

        contents.push_str(k);
        contents.push('\t');
        contents.push_str(v);
        contents.push('\n');
    }

    let path = write_temp(context, &contents)?;
    file_value(context, path)
}

/// Implements `write_json(Any) -> File`.
pub(super) fn write_json(context: &CallContext<'_>) -> RunResult<Value> {
    let json = context.arg(0).to_json();
    let contents = serde_json::to_string_pretty(&json)
        .map_err(|e| context.error(format!("failed to serialize JSON: {e}")))?;

    let path = write_temp(context, &contents)?;
    file_value(context, path)
}
