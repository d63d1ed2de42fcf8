//! The workflow runtime.
//!
//! A workflow body is scheduled as a dependency graph of jobs: one per
//! declaration, call, scatter, and conditional, with a synthetic gather
//! publishing each section's bindings to the outer scope. Ready jobs run
//! concurrently; a fatal failure cancels the run, the scheduler drains, and
//! the first-observed cause is reported.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use sluice_analysis::Bindings;
use sluice_analysis::Document;
use sluice_analysis::deps::element_deps;
use sluice_analysis::deps::element_names;
use sluice_analysis::types::Type;
use sluice_syntax::ast;
use sluice_syntax::ast::WorkflowElement;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::engine::Engine;
use crate::error::JobFailure;
use crate::error::RunError;
use crate::eval::EvalContext;
use crate::eval::ExprEvaluator;
use crate::eval::evaluate_decls;
use crate::stage::AllowList;
use crate::task::environment_json;
use crate::task::run_task;
use crate::value::Array;
use crate::value::Value;

/// Shared state for one workflow invocation.
struct WorkflowContext<'a> {
    /// The engine.
    engine: &'a Engine,
    /// The document containing the workflow.
    document: &'a Arc<Document>,
    /// The root run directory (staging containment checks are relative to
    /// it).
    run_root: &'a Path,
    /// The temp directory for `write_*` files at workflow level.
    tmp_dir: PathBuf,
    /// The permitted host paths for task inputs.
    allow: &'a AllowList,
    /// The cancellation token for the run.
    token: CancellationToken,
}

/// Runs a workflow, returning its outputs environment.
///
/// `run_dir` is this invocation's directory (a child `call-<name>` dir for
/// sub-workflows); `run_root` is the top-level run directory.
#[allow(clippy::too_many_arguments)]
pub async fn run_workflow(
    engine: &Engine,
    document: &Arc<Document>,
    workflow: &ast::Workflow,
    provided: Bindings<Value>,
    run_dir: &Path,
    run_root: &Path,
    allow: &AllowList,
    token: CancellationToken,
) -> Result<Bindings<Value>, JobFailure> {
    fs::create_dir_all(run_dir).map_err(|e| {
        JobFailure::new(
            "inputs",
            RunError::input(format!(
                "failed to create run directory `{path}`: {e}",
                path = run_dir.display()
            )),
        )
    })?;

    let tmp_dir = run_dir.join("tmp");
    fs::create_dir_all(&tmp_dir).ok();

    fs::write(
        run_dir.join("inputs.json"),
        serde_json::to_string_pretty(&environment_json(&provided)).unwrap_or_default(),
    )
    .ok();

    info!(workflow = %workflow.name, dir = %run_dir.display(), "starting workflow");

    // Bind the input section: provided values, defaults, nulls for missing
    // optionals
    let input_env = match &workflow.inputs {
        Some(inputs) => {
            let decls: Vec<&ast::Decl> = inputs.iter().collect();
            evaluate_decls(&decls, document, provided, run_dir, &tmp_dir, None, None)
                .map_err(|e| JobFailure::new("inputs", e))?
        }
        None => provided,
    };

    let context = WorkflowContext {
        engine,
        document,
        run_root,
        tmp_dir: tmp_dir.clone(),
        allow,
        token,
    };

    let final_env = eval_body(
        &context,
        &workflow.body,
        input_env.clone(),
        run_dir.to_path_buf(),
        String::new(),
    )
    .await?;

    // Publish the workflow's outputs
    let outputs = match &workflow.outputs {
        Some(decls) => {
            let refs: Vec<&ast::Decl> = decls.iter().collect();
            let evaluated =
                evaluate_decls(&refs, document, final_env, run_dir, &tmp_dir, None, None)
                    .map_err(|e| JobFailure::new("outputs", e))?;

            let mut outputs = Bindings::new();
            for decl in decls {
                let value = evaluated
                    .resolve(&decl.name)
                    .cloned()
                    .expect("outputs were evaluated");
                outputs = outputs.bind(decl.name.clone(), value);
            }

            outputs
        }
        None => {
            // Without an output section, every name bound by the body is an
            // effective output
            final_env.subtract(&input_env)
        }
    };

    info!(workflow = %workflow.name, "workflow completed");
    Ok(outputs)
}

/// Schedules and evaluates the elements of one scope.
///
/// Jobs start when their dependencies complete and run concurrently; the
/// returned environment extends `env` with every binding the scope
/// produced.
fn eval_body<'a>(
    context: &'a WorkflowContext<'a>,
    elements: &'a [WorkflowElement],
    env: Bindings<Value>,
    dir: PathBuf,
    prefix: String,
) -> BoxFuture<'a, Result<Bindings<Value>, JobFailure>> {
    async move {
        // Map produced names to their producing element
        let mut produced: HashMap<String, usize> = HashMap::new();
        for (i, element) in elements.iter().enumerate() {
            for name in element_names(element) {
                produced.insert(name, i);
            }
        }

        // Unmet dependencies per element
        let mut blockers: Vec<HashSet<usize>> = vec![HashSet::new(); elements.len()];
        for (i, element) in elements.iter().enumerate() {
            for dep in element_deps(element) {
                let head = dep.split('.').next().unwrap_or(&dep);
                if let Some(&p) = produced.get(head) {
                    if p != i {
                        blockers[i].insert(p);
                    }
                }
            }
        }

        let mut env = env;
        let mut completed: HashSet<usize> = HashSet::new();
        let mut started: HashSet<usize> = HashSet::new();
        let mut failure: Option<JobFailure> = None;
        let mut running = FuturesUnordered::new();

        loop {
            // Dispatch every ready job (unless the run is failing)
            if failure.is_none() {
                for i in 0..elements.len() {
                    if !started.contains(&i)
                        && blockers[i].iter().all(|b| completed.contains(b))
                    {
                        started.insert(i);
                        let snapshot = env.clone();
                        let dir = dir.clone();
                        let prefix = prefix.clone();
                        let element = &elements[i];
                        running.push(async move {
                            (i, run_element(context, element, snapshot, dir, prefix).await)
                        });
                    }
                }
            }

            match running.next().await {
                None => break,
                Some((i, Ok(delta))) => {
                    for (name, value) in delta {
                        env = env.bind(name, value);
                    }

                    completed.insert(i);
                }
                Some((_, Err(e))) => {
                    // The first-observed fatal cause wins; cancel everything
                    // in flight and drain
                    if failure.is_none() {
                        debug!(job = %e.job_id, "job failed; cancelling workflow");
                        context.token.cancel();
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(env),
        }
    }
    .boxed()
}

/// Runs a single element, returning the bindings it adds to its scope.
async fn run_element(
    context: &WorkflowContext<'_>,
    element: &WorkflowElement,
    env: Bindings<Value>,
    dir: PathBuf,
    prefix: String,
) -> Result<Vec<(String, Value)>, JobFailure> {
    match element {
        WorkflowElement::Decl(decl) => {
            let job_id = format!("{prefix}decl-{name}", name = decl.name);

            // A draft-2 style input declaration may already be bound
            if let Some(value) = env.resolve(&decl.name) {
                return Ok(vec![(decl.name.clone(), value.clone())]);
            }

            let ty = context.document.type_of(decl.id);
            let value = match &decl.expr {
                Some(expr) => {
                    let eval_context = EvalContext {
                        document: context.document,
                        env: &env,
                        work_dir: &dir,
                        temp_dir: &context.tmp_dir,
                        stdout: None,
                        stderr: None,
                    };
                    ExprEvaluator::new(&eval_context)
                        .evaluate_coerced(expr, ty)
                        .map_err(|e| JobFailure::new(&job_id, e))?
                }
                None if ty.is_optional() => Value::Null,
                None => {
                    return Err(JobFailure::new(
                        &job_id,
                        RunError::input(format!(
                            "missing required input `{name}`",
                            name = decl.name
                        )),
                    ));
                }
            };

            Ok(vec![(decl.name.clone(), value)])
        }
        WorkflowElement::Call(call) => run_call(context, call, env, dir, prefix).await,
        WorkflowElement::Scatter(scatter) => {
            run_scatter(context, scatter, env, dir, prefix).await
        }
        WorkflowElement::Conditional(conditional) => {
            run_conditional(context, conditional, env, dir, prefix).await
        }
    }
}

/// Runs a call job, dispatching to the task runtime or recursing for a
/// sub-workflow.
async fn run_call(
    context: &WorkflowContext<'_>,
    call: &ast::Call,
    env: Bindings<Value>,
    dir: PathBuf,
    prefix: String,
) -> Result<Vec<(String, Value)>, JobFailure> {
    let name = call.name();
    let job_id = format!("{prefix}call-{name}");
    let call_types = context.document.call_types(call.id);

    // Resolve the target document through the import namespaces
    let mut target_doc = context.document.clone();
    for namespace in &call_types.namespace {
        target_doc = target_doc
            .namespace(namespace)
            .expect("namespace was resolved by the checker")
            .clone();
    }

    // Caller-supplied overrides for this call arrived as dotted bindings
    // (`<call>.<input>`) in the inputs environment; they pass through, and
    // deeper dotted names flow to nested sub-workflows
    let mut target_inputs = env.enter_namespace(name);

    // Explicitly bound inputs are evaluated in the caller's environment
    {
        let eval_context = EvalContext {
            document: context.document,
            env: &env,
            work_dir: &dir,
            temp_dir: &context.tmp_dir,
            stdout: None,
            stderr: None,
        };
        let evaluator = ExprEvaluator::new(&eval_context);
        for (input_name, expr) in &call.inputs {
            let ty = call_types
                .signature
                .inputs
                .get(input_name)
                .cloned()
                .unwrap_or_else(Type::any);
            let value = evaluator
                .evaluate_coerced(expr, &ty)
                .map_err(|e| JobFailure::new(&job_id, e))?;
            target_inputs = target_inputs.bind(input_name.clone(), value);
        }
    }

    let call_dir = dir.join(format!("call-{name}"));
    let target_name = call.target.last().expect("call target is never empty");

    let outputs = if call_types.task {
        let task = target_doc
            .task(target_name)
            .expect("task was resolved by the checker");

        // Calls hold a concurrency slot while their container runs
        let _permit = context
            .engine
            .task_slots()
            .acquire()
            .await
            .map_err(|e| JobFailure::new(&job_id, RunError::Other(anyhow::anyhow!(e))))?;

        run_task(
            context.engine,
            &target_doc,
            task,
            target_inputs,
            &call_dir,
            context.run_root,
            &job_id,
            context.allow,
            &context.token,
        )
        .await
        .map_err(|e| JobFailure::new(&job_id, e))?
    } else {
        let workflow = target_doc
            .workflow()
            .expect("workflow was resolved by the checker");

        let outputs = Box::pin(run_workflow(
            context.engine,
            &target_doc,
            workflow,
            target_inputs,
            &call_dir,
            context.run_root,
            context.allow,
            context.token.clone(),
        ))
        .await
        .map_err(|e| {
            // Qualify the inner job id with this call's path
            JobFailure::new(format!("{job_id}/{inner}", inner = e.job_id), e.error)
        })?;

        fs::write(
            call_dir.join("outputs.json"),
            serde_json::to_string_pretty(&environment_json(&outputs)).unwrap_or_default(),
        )
        .ok();

        outputs
    };

    Ok(outputs
        .iter()
        .map(|binding| {
            (
                format!("{name}.{output}", output = binding.name()),
                binding.value().clone(),
            )
        })
        .collect())
}

/// Runs a scatter section: one subgraph instance per element of the
/// iteratee, gathered into arrays preserving iteration order.
async fn run_scatter(
    context: &WorkflowContext<'_>,
    scatter: &ast::Scatter,
    env: Bindings<Value>,
    dir: PathBuf,
    prefix: String,
) -> Result<Vec<(String, Value)>, JobFailure> {
    let job_id = format!("{prefix}scatter-{var}", var = scatter.variable);

    let value = {
        let eval_context = EvalContext {
            document: context.document,
            env: &env,
            work_dir: &dir,
            temp_dir: &context.tmp_dir,
            stdout: None,
            stderr: None,
        };
        ExprEvaluator::new(&eval_context).evaluate(&scatter.expr)
    }
    .map_err(|e| JobFailure::new(&job_id, e))?;
    let items = match &value {
        Value::Array(array) => array.as_slice().to_vec(),
        Value::Null => {
            return Err(JobFailure::new(
                &job_id,
                RunError::NullValue {
                    pos: scatter.expr.pos.clone(),
                },
            ));
        }
        other => {
            return Err(JobFailure::new(
                &job_id,
                RunError::eval(
                    format!("cannot scatter over a value of type `{ty}`", ty = other.ty()),
                    &scatter.expr.pos,
                ),
            ));
        }
    };

    // Evaluate each iteration's subgraph concurrently; results are indexed
    // so the gather preserves iteratee order
    let mut iterations: Vec<Option<Bindings<Value>>> = vec![None; items.len()];
    let mut running = FuturesUnordered::new();
    for (index, item) in items.into_iter().enumerate() {
        let inner_env = env.bind(scatter.variable.clone(), item);
        let inner_dir = dir.join(format!(
            "scatter-{var}-{index}",
            var = scatter.variable
        ));
        let inner_prefix = format!(
            "{prefix}scatter-{var}-{index}-",
            var = scatter.variable
        );

        running.push(async move {
            (
                index,
                eval_body(context, &scatter.body, inner_env, inner_dir, inner_prefix).await,
            )
        });
    }

    let mut failure: Option<JobFailure> = None;
    while let Some((index, result)) = running.next().await {
        match result {
            Ok(bindings) => iterations[index] = Some(bindings),
            Err(e) => {
                if failure.is_none() {
                    context.token.cancel();
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    // Gather: each inner binding `x: T` becomes `x: Array[T]` outside
    let names = gather_names(context.document, &scatter.body);
    let mut deltas = Vec::with_capacity(names.len());
    for name in names {
        if name == scatter.variable {
            continue;
        }

        let values: Vec<Value> = iterations
            .iter()
            .map(|bindings| {
                bindings
                    .as_ref()
                    .and_then(|b| b.resolve(&name).cloned())
                    .unwrap_or(Value::Null)
            })
            .collect();

        let types: Vec<Type> = values.iter().map(Value::ty).collect();
        let item_ty = Type::unify(types.iter(), false).unwrap_or_else(Type::any);
        deltas.push((name, Value::Array(Array::new(item_ty, values))));
    }

    Ok(deltas)
}

/// Runs a conditional section: a false condition binds null for every name
/// the body would have produced.
async fn run_conditional(
    context: &WorkflowContext<'_>,
    conditional: &ast::Conditional,
    env: Bindings<Value>,
    dir: PathBuf,
    prefix: String,
) -> Result<Vec<(String, Value)>, JobFailure> {
    let job_id = format!("{prefix}if");

    let condition = {
        let eval_context = EvalContext {
            document: context.document,
            env: &env,
            work_dir: &dir,
            temp_dir: &context.tmp_dir,
            stdout: None,
            stderr: None,
        };
        ExprEvaluator::new(&eval_context).evaluate(&conditional.expr)
    }
    .map_err(|e| JobFailure::new(&job_id, e))?
    .as_boolean()
    .ok_or_else(|| {
        JobFailure::new(
            &job_id,
            RunError::eval("`if` condition must be a Boolean", &conditional.expr.pos),
        )
    })?;

    let names = gather_names(context.document, &conditional.body);

    if !condition {
        return Ok(names.into_iter().map(|n| (n, Value::Null)).collect());
    }

    let result = eval_body(context, &conditional.body, env.clone(), dir, prefix).await?;
    Ok(names
        .into_iter()
        .map(|name| {
            let value = result.resolve(&name).cloned().unwrap_or(Value::Null);
            (name, value)
        })
        .collect())
}

/// Gets the names a section body binds in its enclosing scope, with call
/// outputs expanded to their dotted names.
fn gather_names(document: &Document, elements: &[WorkflowElement]) -> Vec<String> {
    let mut names = Vec::new();
    for element in elements {
        match element {
            WorkflowElement::Decl(decl) => names.push(decl.name.clone()),
            WorkflowElement::Call(call) => {
                let call_types = document.call_types(call.id);
                for output in call_types.signature.outputs.keys() {
                    names.push(format!("{name}.{output}", name = call.name()));
                }
            }
            WorkflowElement::Scatter(scatter) => {
                names.extend(gather_names(document, &scatter.body));
            }
            WorkflowElement::Conditional(conditional) => {
                names.extend(gather_names(document, &conditional.body));
            }
        }
    }

    names
}
