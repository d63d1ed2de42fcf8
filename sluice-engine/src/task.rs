//! The task runtime.
//!
//! Executes a single task: stage inputs, render the command, run it through
//! the container backend, and collect outputs. Command failures retry
//! against the `maxRetries` budget and interruptions against the
//! `preemptible` budget; each retry receives a fresh working directory
//! (`work2`, `work3`, ...) preserving earlier attempts.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use sluice_analysis::Bindings;
use sluice_analysis::Document;
use sluice_syntax::ast;
use sluice_syntax::ast::StringPart;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Interrupted;
use crate::backend::TaskResources;
use crate::backend::TaskSpawnRequest;
use crate::engine::Engine;
use crate::error::RunError;
use crate::error::RunResult;
use crate::eval::EvalContext;
use crate::eval::ExprEvaluator;
use crate::eval::evaluate_decls;
use crate::stage::AllowList;
use crate::stage::stage_inputs;
use crate::units::parse_memory;
use crate::value::Value;

/// The retry budgets a task declares.
#[derive(Debug, Clone, Copy)]
struct Budgets {
    /// Retries permitted for command failures (`maxRetries`).
    max_retries: u32,
    /// Retries permitted for interruptions (`preemptible`).
    preemptible: u32,
}

/// An attempt failure paired with the budgets in effect, when known.
struct AttemptError {
    /// The failure.
    error: RunError,
    /// The budgets parsed from the runtime section, if evaluation got that
    /// far.
    budgets: Option<Budgets>,
}

impl AttemptError {
    /// Creates an attempt error without budget information.
    fn early(error: RunError) -> Self {
        Self {
            error,
            budgets: None,
        }
    }
}

/// Runs a task to completion, returning its outputs environment.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_task(
    engine: &Engine,
    document: &Arc<Document>,
    task: &ast::Task,
    provided: Bindings<Value>,
    call_dir: &Path,
    run_root: &Path,
    job_id: &str,
    allow: &AllowList,
    token: &CancellationToken,
) -> RunResult<Bindings<Value>> {
    fs::create_dir_all(call_dir).map_err(|e| {
        RunError::input(format!(
            "failed to create call directory `{path}`: {e}",
            path = call_dir.display()
        ))
    })?;

    let tmp_dir = call_dir.join("tmp");
    fs::create_dir_all(&tmp_dir)
        .map_err(|e| RunError::Other(anyhow::anyhow!("failed to create temp directory: {e}")))?;

    // Record the call's inputs
    let inputs_json = environment_json(&provided);
    fs::write(
        call_dir.join("inputs.json"),
        serde_json::to_string_pretty(&inputs_json).unwrap_or_default(),
    )
    .ok();

    // Lifecycle hooks observe the run
    let mut hook_states = Vec::new();
    for hook in engine.plugins().task_hooks() {
        let state = hook.prepare(&task.name, &inputs_json).map_err(RunError::Other)?;
        hook_states.push(state);
    }

    // Remote inputs go through the download plugins (and the cache); the
    // downloaded copies become permitted inputs
    let (provided, downloaded) =
        resolve_remote_inputs(engine, provided, call_dir, run_root).await?;
    let mut allow = allow.clone();
    for path in &downloaded {
        allow.add(path);
    }
    let allow = &allow;

    let mut command_failures = 0u32;
    let mut preemptions = 0u32;
    let mut attempt = 1u32;
    let mut budgets: Option<Budgets> = None;

    let result = loop {
        info!(job_id, attempt, "starting task attempt");
        match run_attempt(
            engine, document, task, &provided, call_dir, run_root, &tmp_dir, allow, token, attempt,
        )
        .await
        {
            Ok(outputs) => break Ok(outputs),
            Err(e) => {
                if budgets.is_none() {
                    budgets = e.budgets;
                }

                let effective = budgets.unwrap_or(Budgets {
                    max_retries: engine.config().task_runtime.default_max_retries,
                    preemptible: engine.config().task_runtime.default_preemptible,
                });

                // The two retry budgets are accounted separately
                let retry = match &e.error {
                    RunError::CommandFailed { .. }
                        if command_failures < effective.max_retries
                            && !token.is_cancelled() =>
                    {
                        command_failures += 1;
                        true
                    }
                    RunError::Interrupted { .. }
                        if preemptions < effective.preemptible && !token.is_cancelled() =>
                    {
                        preemptions += 1;
                        true
                    }
                    _ => false,
                };

                if retry {
                    attempt += 1;
                    continue;
                }

                break Err(e.error);
            }
        }
    };

    // Hooks receive the outcome; a hook may rewrite the outputs object, and
    // failures may be rewrapped but not suppressed
    match result {
        Ok(mut outputs) => {
            let mut outputs_json = environment_json(&outputs);
            let mut rewritten = false;
            for (hook, state) in engine.plugins().task_hooks().iter().zip(hook_states) {
                if let Some(updated) = hook
                    .finalize(state, Ok(outputs_json.clone()))
                    .map_err(RunError::Other)?
                {
                    outputs_json = updated;
                    rewritten = true;
                }
            }

            if rewritten {
                outputs = outputs_from_json(document, task, &outputs_json)?;
            }

            fs::write(
                call_dir.join("outputs.json"),
                serde_json::to_string_pretty(&outputs_json).unwrap_or_default(),
            )
            .ok();

            Ok(outputs)
        }
        Err(e) => {
            for (hook, state) in engine.plugins().task_hooks().iter().zip(hook_states) {
                hook.finalize(state, Err(&e)).ok();
            }

            Err(e)
        }
    }
}

/// Rebuilds a typed outputs environment from a hook-rewritten JSON object.
fn outputs_from_json(
    document: &Arc<Document>,
    task: &ast::Task,
    json: &serde_json::Value,
) -> RunResult<Bindings<Value>> {
    let object = json.as_object().ok_or_else(|| {
        RunError::output("rewritten task outputs must be a JSON object", None)
    })?;

    let mut outputs = Bindings::new();
    for decl in &task.outputs {
        let value = object
            .get(&decl.name)
            .ok_or_else(|| {
                RunError::output(
                    format!("rewritten task outputs are missing `{name}`", name = decl.name),
                    None,
                )
            })
            .and_then(|j| {
                Value::from_json(document.type_of(decl.id), j)
                    .map_err(|e| RunError::output(e, None))
            })?;

        outputs = outputs.bind(decl.name.clone(), value);
    }

    Ok(outputs)
}

/// Runs one attempt of the task.
#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    engine: &Engine,
    document: &Arc<Document>,
    task: &ast::Task,
    provided: &Bindings<Value>,
    call_dir: &Path,
    run_root: &Path,
    tmp_dir: &Path,
    allow: &AllowList,
    token: &CancellationToken,
    attempt: u32,
) -> Result<Bindings<Value>, AttemptError> {
    let work_dir = call_dir.join(work_dir_name(attempt));
    fs::create_dir_all(&work_dir).map_err(|e| {
        AttemptError::early(RunError::input(format!(
            "failed to create working directory `{path}`: {e}",
            path = work_dir.display()
        )))
    })?;

    // STAGED: materialize file inputs under the working directory
    let first = stage_inputs(provided, &work_dir, run_root, allow).map_err(AttemptError::early)?;

    // Evaluate input defaults and private declarations in dependency order
    let decls: Vec<&ast::Decl> = task
        .inputs
        .iter()
        .flatten()
        .chain(task.postinputs.iter())
        .collect();
    let env = evaluate_decls(&decls, document, first.env, &work_dir, tmp_dir, None, None)
        .map_err(AttemptError::early)?;

    // Defaults and private declarations may have introduced new file
    // references; a second staging pass sandboxes them too (already-staged
    // paths are left alone)
    let second = stage_inputs(&env, &work_dir, run_root, allow).map_err(AttemptError::early)?;
    let env = second.env;
    let mut mounts = first.mounts;
    mounts.extend(second.mounts);

    // Evaluate the runtime section into resources and retry budgets
    let (resources, budgets) =
        evaluate_runtime(engine, document, task, &env, &work_dir, tmp_dir)
            .map_err(AttemptError::early)?;
    let fail = |error: RunError| AttemptError {
        error,
        budgets: Some(budgets),
    };

    // RENDERED: interpolate the command template
    let command_text = render_command(engine, document, task, &env, &work_dir, tmp_dir)
        .map_err(fail)?;
    let command_path = call_dir.join("command");
    fs::write(&command_path, &command_text)
        .map_err(|e| fail(RunError::Other(anyhow::anyhow!("failed to write command: {e}"))))?;

    // Obtain the container image (inline dockerfiles build through the
    // shared image cache)
    let mut resources = resources;
    if let Some(dockerfile) = resources.inline_dockerfile.clone() {
        let tag = engine
            .inline_image(&dockerfile)
            .await
            .map_err(|e| {
                fail(RunError::ImageNotFound {
                    image: "<inline dockerfile>".to_string(),
                    message: format!("{e:#}"),
                })
            })?;
        resources.container = Some(tag);
    } else if let Some(image) = &resources.container {
        engine.backend().prepare_image(image).map_err(|e| {
            fail(RunError::ImageNotFound {
                image: image.clone(),
                message: format!("{e:#}"),
            })
        })?;
    }

    // RUNNING: hand the rendered command to the backend
    let stdout_path = call_dir.join("stdout.txt");
    let stderr_path = call_dir.join("stderr.txt");
    let request = TaskSpawnRequest {
        command: command_path,
        work_dir: work_dir.clone(),
        stdout: stdout_path.clone(),
        stderr: stderr_path.clone(),
        mounts,
        resources,
    };

    let (_spawned, completed) = engine
        .backend()
        .spawn(request, token.child_token())
        .map_err(|e| fail(RunError::Other(e)))?;

    let status = match completed.await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            if token.is_cancelled() {
                return Err(fail(RunError::Cancelled));
            }

            if let Some(interrupted) = e.downcast_ref::<Interrupted>() {
                return Err(fail(RunError::Interrupted {
                    message: interrupted.0.clone(),
                }));
            }

            return Err(fail(RunError::Other(e)));
        }
        Err(_) => {
            return Err(fail(RunError::Other(anyhow::anyhow!(
                "task execution backend dropped the completion channel"
            ))));
        }
    };

    if status != 0 {
        return Err(fail(RunError::CommandFailed {
            exit_status: status,
            stderr_file: stderr_path,
        }));
    }

    // COLLECTED: evaluate outputs with stdout/stderr available
    let outputs = collect_outputs(
        document,
        task,
        &env,
        call_dir,
        &work_dir,
        tmp_dir,
        &stdout_path,
        &stderr_path,
    )
    .map_err(fail)?;

    Ok(outputs)
}

/// Gets the working directory name for an attempt.
fn work_dir_name(attempt: u32) -> String {
    if attempt == 1 {
        "work".to_string()
    } else {
        format!("work{attempt}")
    }
}

/// Rewrites any URI-schemed inputs to locally downloaded files.
async fn resolve_remote_inputs(
    engine: &Engine,
    env: Bindings<Value>,
    call_dir: &Path,
    run_root: &Path,
) -> RunResult<(Bindings<Value>, Vec<PathBuf>)> {
    // Collect the distinct remote URIs first; rewriting is synchronous
    let mut uris = Vec::new();
    for binding in env.iter() {
        binding.value().visit_paths(&mut |path, _| {
            if is_remote(path) && !uris.iter().any(|u| u == path) {
                uris.push(path.to_string());
            }
        });
    }

    if uris.is_empty() {
        return Ok((env, Vec::new()));
    }

    let mut downloaded = HashMap::new();
    let mut paths = Vec::new();
    for uri in uris {
        let path = engine.download(&uri, call_dir, run_root).await?;
        downloaded.insert(uri, path.to_string_lossy().to_string());
        paths.push(path);
    }

    let mut rewritten = Bindings::new();
    for binding in env.iter() {
        let value = binding
            .value()
            .rewrite_paths(&mut |path, _| downloaded.get(path).cloned());
        rewritten = rewritten.bind(binding.name().to_string(), value);
    }

    Ok((rewritten, paths))
}

/// Determines if a path is a remote URI needing a download plugin.
fn is_remote(path: &str) -> bool {
    match path.split_once("://") {
        Some((scheme, _)) => scheme != "file",
        None => false,
    }
}

/// Evaluates the task's `runtime` section.
fn evaluate_runtime(
    engine: &Engine,
    document: &Arc<Document>,
    task: &ast::Task,
    env: &Bindings<Value>,
    work_dir: &Path,
    tmp_dir: &Path,
) -> RunResult<(TaskResources, Budgets)> {
    let context = EvalContext {
        document,
        env,
        work_dir,
        temp_dir: tmp_dir,
        stdout: None,
        stderr: None,
    };
    let evaluator = ExprEvaluator::new(&context);

    let mut resources = TaskResources {
        cpu: 1.0,
        ..Default::default()
    };
    let mut budgets = Budgets {
        max_retries: engine.config().task_runtime.default_max_retries,
        preemptible: engine.config().task_runtime.default_preemptible,
    };

    for (key, expr) in &task.runtime {
        let value = evaluator.evaluate(expr)?;
        match key.as_str() {
            "docker" | "container" => {
                let image = match &value {
                    Value::Array(array) => array.as_slice().first().cloned(),
                    other => Some(other.clone()),
                };
                resources.container = image
                    .and_then(|v| v.as_display_string())
                    .filter(|s| !s.is_empty());
            }
            "cpu" => {
                resources.cpu = match &value {
                    Value::Int(v) => *v as f64,
                    Value::Float(v) => v.0,
                    Value::String(s) => s.parse().map_err(|_| {
                        RunError::input(format!("invalid `cpu` runtime value `{s}`"))
                    })?,
                    other => {
                        return Err(RunError::input(format!(
                            "invalid `cpu` runtime value of type `{ty}`",
                            ty = other.ty()
                        )));
                    }
                };
            }
            "memory" => {
                resources.memory = match &value {
                    Value::Int(v) => *v,
                    Value::String(s) => parse_memory(s).ok_or_else(|| {
                        RunError::input(format!("invalid `memory` runtime value `{s}`"))
                    })?,
                    other => {
                        return Err(RunError::input(format!(
                            "invalid `memory` runtime value of type `{ty}`",
                            ty = other.ty()
                        )));
                    }
                };
            }
            "maxRetries" => {
                budgets.max_retries = runtime_count(&value, "maxRetries")?;
            }
            "preemptible" => {
                budgets.preemptible = runtime_count(&value, "preemptible")?;
            }
            "inlineDockerfile" => {
                resources.inline_dockerfile = match &value {
                    Value::Array(array) => {
                        let lines: Vec<&str> = array
                            .as_slice()
                            .iter()
                            .filter_map(Value::as_str)
                            .collect();
                        Some(lines.join("\n"))
                    }
                    other => other.as_display_string(),
                };
            }
            "env" => {
                if let Value::Map(map) = &value {
                    for (k, v) in map.entries() {
                        if let (Some(k), Some(v)) = (k.as_str(), v.as_display_string()) {
                            resources.env.insert(k.to_string(), v);
                        }
                    }
                }
            }
            // Unknown keys are ignored for forward compatibility
            _ => {}
        }
    }

    Ok((resources, budgets))
}

/// Parses a non-negative retry count from a runtime value.
fn runtime_count(value: &Value, key: &str) -> RunResult<u32> {
    match value {
        Value::Int(v) if *v >= 0 => Ok(*v as u32),
        _ => Err(RunError::input(format!(
            "invalid `{key}` runtime value; expected a non-negative integer"
        ))),
    }
}

/// Renders the command template, applying the placeholder filter.
fn render_command(
    engine: &Engine,
    document: &Arc<Document>,
    task: &ast::Task,
    env: &Bindings<Value>,
    work_dir: &Path,
    tmp_dir: &Path,
) -> RunResult<String> {
    let context = EvalContext {
        document,
        env,
        work_dir,
        temp_dir: tmp_dir,
        stdout: None,
        stderr: None,
    };
    let evaluator = ExprEvaluator::new(&context);

    let filter = match &engine.config().task_runtime.placeholder_regex {
        Some(pattern) => Some(Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            RunError::input(format!("invalid placeholder filter pattern: {e}"))
        })?),
        None => None,
    };

    let mut text = String::new();
    for part in &task.command.parts {
        match part {
            StringPart::Literal { text: t, .. } => text.push_str(t),
            StringPart::Placeholder(placeholder) => {
                let expansion = evaluator.placeholder_text(placeholder)?;
                if let Some(filter) = &filter {
                    if !filter.is_match(&expansion) {
                        return Err(RunError::input(format!(
                            "command placeholder expansion `{expansion}` does not match the \
                             configured placeholder filter"
                        )));
                    }
                }

                text.push_str(&expansion);
            }
        }
    }

    Ok(dedent(&text))
}

/// Strips the common leading whitespace of a command's lines.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let lines: Vec<&str> = text
        .lines()
        .map(|line| if line.len() >= indent { &line[indent..] } else { line.trim_start() })
        .collect();

    let joined = lines.join("\n");
    let body = joined.trim_start_matches('\n').trim_end();
    format!("{body}\n")
}

/// Evaluates and validates the task's outputs.
#[allow(clippy::too_many_arguments)]
fn collect_outputs(
    document: &Arc<Document>,
    task: &ast::Task,
    env: &Bindings<Value>,
    call_dir: &Path,
    work_dir: &Path,
    tmp_dir: &Path,
    stdout_path: &Path,
    stderr_path: &Path,
) -> RunResult<Bindings<Value>> {
    let decls: Vec<&ast::Decl> = task.outputs.iter().collect();
    let evaluated = evaluate_decls(
        &decls,
        document,
        env.clone(),
        work_dir,
        tmp_dir,
        Some(Value::file(stdout_path.to_string_lossy())),
        Some(Value::file(stderr_path.to_string_lossy())),
    )
    .map_err(|e| match e {
        // Evaluation failures in the output section surface as output
        // errors
        RunError::Eval { message, pos } => RunError::output(message, Some(&pos)),
        RunError::NullValue { pos } => {
            RunError::output("null value in a non-optional output", Some(&pos))
        }
        RunError::OutOfBounds { message, pos } => RunError::output(message, Some(&pos)),
        RunError::Input { message } => RunError::output(message, None),
        other => other,
    })?;

    let canonical_call_dir = call_dir.canonicalize().map_err(|e| {
        RunError::output(
            format!("cannot resolve the call directory: {e}"),
            None,
        )
    })?;

    // Validate file outputs: resolve each against the working directory,
    // trace symlinks, require containment, and de-duplicate identical paths
    let mut outputs = Bindings::new();
    let mut dedupe: HashMap<PathBuf, String> = HashMap::new();
    for decl in &task.outputs {
        let value = evaluated
            .resolve(&decl.name)
            .cloned()
            .expect("outputs were evaluated");

        let mut failure: Option<RunError> = None;
        let validated = value.rewrite_paths(&mut |path, is_dir| {
            if failure.is_some() {
                return None;
            }

            match validate_output_path(
                path,
                is_dir,
                work_dir,
                &canonical_call_dir,
                &mut dedupe,
            ) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }

        outputs = outputs.bind(decl.name.clone(), validated);
    }

    Ok(outputs)
}

/// Resolves and validates one output path.
fn validate_output_path(
    path: &str,
    is_dir: bool,
    work_dir: &Path,
    canonical_call_dir: &Path,
    dedupe: &mut HashMap<PathBuf, String>,
) -> RunResult<String> {
    let raw = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        work_dir.join(path)
    };

    let resolved = raw.canonicalize().map_err(|e| {
        RunError::output(
            format!("output file `{path}` was not produced by the task: {e}"),
            None,
        )
    })?;

    if !resolved.starts_with(canonical_call_dir) {
        return Err(RunError::output(
            format!("output file `{path}` is outside the task directory"),
            None,
        ));
    }

    if is_dir != resolved.is_dir() {
        return Err(RunError::output(
            format!(
                "output `{path}` is not a {kind}",
                kind = if is_dir { "directory" } else { "regular file" }
            ),
            None,
        ));
    }

    if let Some(existing) = dedupe.get(&resolved) {
        return Ok(existing.clone());
    }

    // Mark directory outputs for downstream identity
    if is_dir {
        if let (Some(parent), Some(name)) = (resolved.parent(), resolved.file_name()) {
            let marker = parent.join(format!(
                "{name}.WDL_Directory",
                name = name.to_string_lossy()
            ));
            fs::write(marker, "").ok();
        }
    }

    let text = raw.to_string_lossy().to_string();
    dedupe.insert(resolved, text.clone());
    Ok(text)
}

/// Serializes an environment to a JSON object.
pub(crate) fn environment_json(env: &Bindings<Value>) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for binding in env.iter() {
        object.insert(binding.name().to_string(), binding.value().to_json());
    }

    serde_json::Value::Object(object)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn work_dir_names() {
        assert_eq!(work_dir_name(1), "work");
        assert_eq!(work_dir_name(2), "work2");
        assert_eq!(work_dir_name(3), "work3");
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://example.com/a.txt"));
        assert!(is_remote("s3://bucket/key"));
        assert!(!is_remote("file:///tmp/a.txt"));
        assert!(!is_remote("/tmp/a.txt"));
        assert!(!is_remote("relative/path.txt"));
    }

    #[test]
    fn dedenting() {
        assert_eq!(dedent("\n    echo hi\n    echo bye\n  "), "echo hi\necho bye\n");
        assert_eq!(dedent("echo hi"), "echo hi\n");
        assert_eq!(
            dedent("\n  if true; then\n    echo x\n  fi\n"),
            "if true; then\n  echo x\nfi\n"
        );
    }
}
