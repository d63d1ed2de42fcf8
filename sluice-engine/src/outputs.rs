//! Serialization of run outputs and failure records.

use std::fs;
use std::path::Path;

use serde_json::Value as JsonValue;
use serde_json::json;
use sluice_analysis::Bindings;

use crate::error::JobFailure;
use crate::value::Value;

/// Builds the outputs JSON object with names qualified by the given
/// prefix (the workflow or task name).
pub fn qualified_outputs_json(prefix: &str, outputs: &Bindings<Value>) -> JsonValue {
    let mut object = serde_json::Map::new();
    for binding in outputs.iter() {
        object.insert(
            format!("{prefix}.{name}", name = binding.name()),
            binding.value().to_json(),
        );
    }

    JsonValue::Object(object)
}

/// Writes the `outputs.json` run artifact with its envelope.
pub fn write_outputs_json(run_dir: &Path, outputs: &JsonValue) -> std::io::Result<()> {
    let envelope = json!({ "outputs": outputs });
    fs::write(
        run_dir.join("outputs.json"),
        serde_json::to_string_pretty(&envelope).unwrap_or_default(),
    )
}

/// Builds the `error.json` record for a failed run.
pub fn error_json(failure: &JobFailure) -> JsonValue {
    let mut cause = serde_json::Map::new();
    cause.insert("error".to_string(), json!(failure.error.kind()));
    cause.insert("message".to_string(), json!(failure.error.to_string()));

    if let Some(pos) = failure.error.pos() {
        cause.insert(
            "pos".to_string(),
            json!({
                "uri": pos.uri(),
                "abspath": pos.abspath(),
                "line": pos.line(),
                "column": pos.column(),
            }),
        );
    }

    if let Some(stderr) = failure.error.stderr_file() {
        cause.insert(
            "stderr_file".to_string(),
            json!(stderr.to_string_lossy()),
        );
    }

    json!({
        "cause": JsonValue::Object(cause),
        "job_id": failure.job_id,
    })
}

/// Writes the `error.json` run artifact.
pub fn write_error_json(run_dir: &Path, failure: &JobFailure) -> std::io::Result<()> {
    fs::write(
        run_dir.join("error.json"),
        serde_json::to_string_pretty(&error_json(failure)).unwrap_or_default(),
    )
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::RunError;

    #[test]
    fn qualified_outputs() {
        let outputs = Bindings::new()
            .bind("count", Value::Int(3))
            .bind("name", Value::string("x"));
        let json = qualified_outputs_json("w", &outputs);
        assert_eq!(json, serde_json::json!({ "w.count": 3, "w.name": "x" }));
    }

    #[test]
    fn error_record_shape() {
        let failure = JobFailure::new(
            "call-align",
            RunError::CommandFailed {
                exit_status: 2,
                stderr_file: "/runs/run_1/call-align/stderr.txt".into(),
            },
        );

        let json = error_json(&failure);
        assert_eq!(json["job_id"], "call-align");
        assert_eq!(json["cause"]["error"], "CommandFailed");
        assert_eq!(
            json["cause"]["stderr_file"],
            "/runs/run_1/call-align/stderr.txt"
        );
        assert!(json["cause"]["message"]
            .as_str()
            .unwrap()
            .contains("exit status 2"));
    }
}
