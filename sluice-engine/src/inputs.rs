//! Parsing and validation of run inputs.
//!
//! The inputs JSON is a flat object whose keys are dotted qualified names:
//! `workflow.input` binds a workflow input, and `workflow.call.input`
//! supplies (or overrides) an unbound input of a call, recursing through
//! sub-workflows. File values are resolved to absolute paths and recorded
//! in the run's allow-list.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sluice_analysis::Bindings;
use sluice_analysis::Document;
use sluice_analysis::types::Type;
use sluice_syntax::ast;

use crate::error::RunError;
use crate::error::RunResult;
use crate::stage::AllowList;
use crate::value::Value;

/// The parsed inputs of a run.
#[derive(Debug)]
pub struct ParsedInputs {
    /// The input environment (dotted names for call overrides).
    pub env: Bindings<Value>,
    /// The host paths the run may read.
    pub allow: AllowList,
}

/// Parses the inputs JSON for a workflow run.
pub fn parse_workflow_inputs(
    document: &Arc<Document>,
    workflow: &ast::Workflow,
    json: &JsonValue,
    base_dir: &Path,
) -> RunResult<ParsedInputs> {
    let object = json
        .as_object()
        .ok_or_else(|| RunError::input("run inputs must be a JSON object"))?;

    let mut env = Bindings::new();
    let mut allow = AllowList::new();

    for (key, value) in object {
        let path = key
            .strip_prefix(&format!("{name}.", name = workflow.name))
            .unwrap_or(key);
        let segments: Vec<&str> = path.split('.').collect();

        let ty = resolve_input_type(document, workflow, &segments)
            .ok_or_else(|| RunError::input(format!("unknown input `{key}`")))?;

        let parsed = Value::from_json(&ty, value).map_err(RunError::input)?;
        let parsed = localize(parsed, base_dir, &mut allow);
        env = env.bind(path.to_string(), parsed);
    }

    // Missing required workflow inputs fail up front; call-level required
    // inputs are validated when the call dispatches
    if let Some(signature) = document.workflow_signature() {
        for required in &signature.required {
            if !env.has_binding(required) {
                return Err(RunError::input(format!(
                    "missing required input `{workflow}.{required}`",
                    workflow = workflow.name
                )));
            }
        }
    }

    Ok(ParsedInputs { env, allow })
}

/// Parses the inputs JSON for a bare task run.
pub fn parse_task_inputs(
    document: &Arc<Document>,
    task: &ast::Task,
    json: &JsonValue,
    base_dir: &Path,
) -> RunResult<ParsedInputs> {
    let object = json
        .as_object()
        .ok_or_else(|| RunError::input("run inputs must be a JSON object"))?;

    let signature = document
        .task_signature(&task.name)
        .expect("task signature exists in a checked document");

    let mut env = Bindings::new();
    let mut allow = AllowList::new();

    for (key, value) in object {
        let name = key
            .strip_prefix(&format!("{task}.", task = task.name))
            .unwrap_or(key);

        let ty = signature
            .inputs
            .get(name)
            .ok_or_else(|| RunError::input(format!("unknown input `{key}`")))?;

        let parsed = Value::from_json(ty, value).map_err(RunError::input)?;
        let parsed = localize(parsed, base_dir, &mut allow);
        env = env.bind(name.to_string(), parsed);
    }

    for required in &signature.required {
        if !env.has_binding(required) {
            return Err(RunError::input(format!(
                "missing required input `{task}.{required}`",
                task = task.name
            )));
        }
    }

    Ok(ParsedInputs { env, allow })
}

/// Resolves the declared type of a dotted input path.
fn resolve_input_type(
    document: &Arc<Document>,
    workflow: &ast::Workflow,
    segments: &[&str],
) -> Option<Type> {
    match segments {
        [] => None,
        [input] => document
            .workflow_signature()
            .and_then(|s| s.inputs.get(*input).cloned()),
        [call_name, rest @ ..] => {
            let call = find_call(&workflow.body, call_name)?;
            let call_types = document.call_types(call.id);

            if rest.len() == 1 {
                return call_types.signature.inputs.get(rest[0]).cloned();
            }

            // Deeper paths address a call inside a sub-workflow
            if call_types.task {
                return None;
            }

            let mut target = document.clone();
            for namespace in &call_types.namespace {
                target = target.namespace(namespace)?.clone();
            }

            let target_ref = target.clone();
            let inner = target_ref.workflow()?;
            resolve_input_type(&target, inner, rest)
        }
    }
}

/// Finds a call statement by name, searching nested sections.
fn find_call<'a>(elements: &'a [ast::WorkflowElement], name: &str) -> Option<&'a ast::Call> {
    for element in elements {
        match element {
            ast::WorkflowElement::Call(call) if call.name() == name => return Some(call),
            ast::WorkflowElement::Scatter(scatter) => {
                if let Some(call) = find_call(&scatter.body, name) {
                    return Some(call);
                }
            }
            ast::WorkflowElement::Conditional(conditional) => {
                if let Some(call) = find_call(&conditional.body, name) {
                    return Some(call);
                }
            }
            _ => {}
        }
    }

    None
}

/// Resolves relative file paths against the base directory and records
/// every local path in the allow-list.
fn localize(value: Value, base_dir: &Path, allow: &mut AllowList) -> Value {
    value.rewrite_paths(&mut |path, _| {
        // Remote URIs are downloaded later, not read from the host
        if path.contains("://") {
            return None;
        }

        let p = Path::new(path);
        let absolute = if p.is_absolute() {
            p.to_path_buf()
        } else {
            base_dir.join(p)
        };

        allow.add(&absolute);
        Some(absolute.to_string_lossy().to_string())
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use sluice_analysis::analyze_source;

    use super::*;

    /// Analyzes a workflow source for input-parsing tests.
    fn analyze(source: &str) -> Arc<Document> {
        analyze_source(source, "test.wdl", "/test.wdl", true).expect("source should analyze")
    }

    #[test]
    fn workflow_inputs_parse_and_validate() {
        let doc = analyze(
            "version 1.0\nworkflow w {\n  input {\n    Int n\n    String tag = \"x\"\n  }\n}",
        );
        let workflow = doc.workflow().unwrap();

        let parsed = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({ "w.n": 3 }),
            Path::new("/base"),
        )
        .unwrap();
        assert_eq!(parsed.env.resolve("n"), Some(&Value::Int(3)));

        let err = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({}),
            Path::new("/base"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InputError");
        assert!(err.to_string().contains("missing required input"));

        let err = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({ "w.bogus": 1 }),
            Path::new("/base"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown input"));
    }

    #[test]
    fn type_mismatches_are_input_errors() {
        let doc = analyze("version 1.0\nworkflow w { input { Int n } }");
        let workflow = doc.workflow().unwrap();

        let err = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({ "w.n": "three" }),
            Path::new("/base"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InputError");
    }

    #[test]
    fn call_input_overrides() {
        let doc = analyze(
            "version 1.0\ntask t {\n  input { Int n }\n  command <<< >>>\n  output { Int out = n \
             }\n}\nworkflow w {\n  call t\n  output { Int x = t.out }\n}",
        );
        let workflow = doc.workflow().unwrap();

        let parsed = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({ "w.t.n": 7 }),
            Path::new("/base"),
        )
        .unwrap();
        assert_eq!(parsed.env.resolve("t.n"), Some(&Value::Int(7)));
    }

    #[test]
    fn file_inputs_are_localized_and_allowed() {
        let doc = analyze("version 1.0\nworkflow w { input { File f } }");
        let workflow = doc.workflow().unwrap();

        let parsed = parse_workflow_inputs(
            &doc,
            workflow,
            &serde_json::json!({ "w.f": "data/reads.txt" }),
            Path::new("/base"),
        )
        .unwrap();

        assert_eq!(
            parsed.env.resolve("f"),
            Some(&Value::file("/base/data/reads.txt"))
        );
        assert!(parsed.allow.permits(Path::new("/base/data/reads.txt")));
        assert!(!parsed.allow.permits(Path::new("/etc/passwd")));
    }
}
