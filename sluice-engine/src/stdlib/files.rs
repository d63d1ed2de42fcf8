//! File-oriented functions of the standard library.

use std::fs;
use std::path::Path;

use sluice_analysis::types::Type;

use super::CallContext;
use crate::error::RunResult;
use crate::units::StorageUnit;
use crate::value::Array;
use crate::value::Value;

/// Implements `stdout() -> File`.
///
/// Available only while evaluating a task's outputs.
pub(super) fn stdout(context: &CallContext<'_>) -> RunResult<Value> {
    context
        .context
        .stdout()
        .ok_or_else(|| context.error("`stdout` is only available in task outputs"))
}

/// Implements `stderr() -> File`.
///
/// Available only while evaluating a task's outputs.
pub(super) fn stderr(context: &CallContext<'_>) -> RunResult<Value> {
    context
        .context
        .stderr()
        .ok_or_else(|| context.error("`stderr` is only available in task outputs"))
}

/// Implements `glob(String) -> Array[File]`.
///
/// Matches are confined to the current task's working directory; patterns
/// that escape it are an error.
pub(super) fn glob(context: &CallContext<'_>) -> RunResult<Value> {
    let pattern = context.string_arg(0)?;
    let work_dir = context.context.work_dir();

    if Path::new(&pattern).is_absolute() || pattern.split('/').any(|part| part == "..") {
        return Err(context.error(format!(
            "glob pattern `{pattern}` escapes the task working directory"
        )));
    }

    let full = work_dir.join(&pattern);
    let full = full
        .to_str()
        .ok_or_else(|| context.error("glob pattern is not valid UTF-8"))?;

    let canonical_work_dir = work_dir
        .canonicalize()
        .map_err(|e| context.error(format!("cannot resolve working directory: {e}")))?;

    let mut files = Vec::new();
    let paths =
        glob::glob(full).map_err(|e| context.error(format!("invalid glob pattern: {e}")))?;
    for entry in paths {
        let path = entry.map_err(|e| context.error(format!("glob failed: {e}")))?;

        // Trace symlinks and require the target to stay inside the working
        // directory
        let resolved = path
            .canonicalize()
            .map_err(|e| context.error(format!("cannot resolve `{path}`: {e}", path = path.display())))?;
        if !resolved.starts_with(&canonical_work_dir) {
            return Err(context.error(format!(
                "glob match `{path}` escapes the task working directory",
                path = path.display()
            )));
        }

        if resolved.is_file() {
            files.push(Value::file(path.to_string_lossy()));
        }
    }

    files.sort_by(|a, b| a.unwrap_str().cmp(b.unwrap_str()));
    Ok(Value::Array(Array::new(Type::file(), files)))
}

/// Implements `size(..., String?) -> Float`.
///
/// Accepts a file, directory, or a compound value containing them; nulls
/// count as zero. The optional second argument selects the unit.
pub(super) fn size(context: &CallContext<'_>) -> RunResult<Value> {
    let unit = if context.args.len() == 2 {
        let text = context.string_arg(1)?;
        text.parse::<StorageUnit>().map_err(|()| {
            context.error(format!(
                "invalid storage unit `{text}`; supported units are `B`, `KB`, `MB`, `GB`, \
                 `KiB`, `MiB`, and `GiB`"
            ))
        })?
    } else {
        StorageUnit::default()
    };

    let bytes = value_size(context, context.arg(0))?;
    Ok(Value::float(unit.convert(bytes)))
}

/// Computes the total size in bytes of the files referenced by a value.
fn value_size(context: &CallContext<'_>, value: &Value) -> RunResult<u64> {
    match value {
        Value::Null => Ok(0),
        Value::File(path) | Value::String(path) => {
            file_size(context, &super::resolve_path(context.context, path))
        }
        Value::Directory(path) => {
            directory_size(context, &super::resolve_path(context.context, path))
        }
        Value::Array(array) => {
            let mut total = 0;
            for item in array.as_slice() {
                total += value_size(context, item)?;
            }

            Ok(total)
        }
        Value::Pair(pair) => {
            Ok(value_size(context, pair.left())? + value_size(context, pair.right())?)
        }
        Value::Map(map) => {
            let mut total = 0;
            for (k, v) in map.entries() {
                // Keys are names unless they are actually path-typed
                if matches!(k, Value::File(_) | Value::Directory(_)) {
                    total += value_size(context, k)?;
                }

                total += value_size(context, v)?;
            }

            Ok(total)
        }
        Value::Struct(s) => {
            let mut total = 0;
            for (_, v) in s.iter() {
                total += value_size(context, v)?;
            }

            Ok(total)
        }
        // A value that was never file-shaped has no size
        _ => Err(context.error(format!(
            "cannot compute the size of a value of type `{ty}`",
            ty = value.ty()
        ))),
    }
}

/// Gets the size of a single file.
fn file_size(context: &CallContext<'_>, path: &Path) -> RunResult<u64> {
    let metadata = fs::metadata(path).map_err(|e| {
        context.error(format!(
            "failed to read metadata for `{path}`: {e}",
            path = path.display()
        ))
    })?;

    if metadata.is_dir() {
        return directory_size(context, path);
    }

    Ok(metadata.len())
}

/// Gets the total size of the files under a directory.
fn directory_size(context: &CallContext<'_>, path: &Path) -> RunResult<u64> {
    let mut total = 0;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            context.error(format!(
                "failed to walk directory `{path}`: {e}",
                path = path.display()
            ))
        })?;

        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| {
                context.error(format!(
                    "failed to read metadata for `{path}`: {e}",
                    path = entry.path().display()
                ))
            })?;
            total += metadata.len();
        }
    }

    Ok(total)
}
