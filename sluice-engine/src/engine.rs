//! The engine: configuration, backend, plugins, and run entry points.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use anyhow::Result;
use serde_json::Value as JsonValue;
use sluice_analysis::Bindings;
use sluice_analysis::Document;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

use crate::backend::TaskExecutionBackend;
use crate::cache::DownloadCache;
use crate::config::Config;
use crate::error::JobFailure;
use crate::error::RunError;
use crate::error::RunResult;
use crate::inputs::parse_task_inputs;
use crate::inputs::parse_workflow_inputs;
use crate::outputs::qualified_outputs_json;
use crate::outputs::write_error_json;
use crate::outputs::write_outputs_json;
use crate::plugin::PluginRegistry;
use crate::rundir::create_run_dir;
use crate::rundir::log_line;
use crate::stage::AllowList;
use crate::task::run_task;
use crate::value::Value;
use crate::workflow::run_workflow;

/// The outputs of a completed run.
#[derive(Debug)]
pub struct RunOutputs {
    /// The run directory.
    pub dir: PathBuf,
    /// The outputs object (dotted qualified names).
    pub outputs: JsonValue,
}

/// A failed run.
///
/// When `dir` is set, an `error.json` record was written there.
#[derive(Debug)]
pub struct RunFailed {
    /// The run directory, if one was created.
    pub dir: Option<PathBuf>,
    /// The failure.
    pub failure: JobFailure,
}

impl RunFailed {
    /// Creates a failure that happened before a run directory existed.
    fn setup(error: RunError) -> Self {
        Self {
            dir: None,
            failure: JobFailure::new("setup", error),
        }
    }
}

impl fmt::Display for RunFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.failure.fmt(f)
    }
}

impl std::error::Error for RunFailed {}

/// Counters for download activity within the engine's lifetime.
#[derive(Debug, Default)]
pub struct DownloadStats {
    /// The number of downloads performed.
    downloads: AtomicU64,
    /// The number of cache hits that avoided a download.
    cached: AtomicU64,
}

impl DownloadStats {
    /// Gets the number of downloads performed.
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Gets the number of cache hits.
    pub fn cached(&self) -> u64 {
        self.cached.load(Ordering::Relaxed)
    }
}

/// A shared cache of images built from inline dockerfiles.
///
/// Entries are keyed by a digest of the dockerfile text; a per-key cell
/// serializes concurrent builds of the same dockerfile.
#[derive(Default)]
struct ImageCache {
    /// Build cells by dockerfile digest.
    cells: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl ImageCache {
    /// Gets the image tag for a dockerfile, building it if needed.
    async fn get_or_build(
        &self,
        backend: &dyn TaskExecutionBackend,
        dockerfile: &str,
    ) -> Result<String> {
        let digest = blake3::hash(dockerfile.as_bytes()).to_hex().to_string();
        let cell = {
            let mut cells = self.cells.lock().await;
            cells.entry(digest.clone()).or_default().clone()
        };

        let tag = cell
            .get_or_try_init(|| async {
                let tag = format!("sluice-inline:{short}", short = &digest[..12]);
                backend.build_image(dockerfile, &tag)
            })
            .await?;

        Ok(tag.clone())
    }
}

/// The execution engine.
pub struct Engine {
    /// The engine configuration.
    config: Config,
    /// The task execution backend.
    backend: Arc<dyn TaskExecutionBackend>,
    /// The plugin registry (immutable after construction).
    plugins: PluginRegistry,
    /// The download cache.
    cache: DownloadCache,
    /// The concurrency bound on running task containers.
    task_slots: Semaphore,
    /// The inline-dockerfile image cache.
    images: ImageCache,
    /// Download counters.
    stats: DownloadStats,
    /// A counter for download task directories.
    download_counter: AtomicU64,
}

impl Engine {
    /// Creates a new engine.
    pub fn new(
        config: Config,
        backend: Arc<dyn TaskExecutionBackend>,
        plugins: PluginRegistry,
    ) -> Self {
        let slots = if config.scheduler.concurrency == 0 {
            backend.max_concurrency()
        } else {
            config.scheduler.concurrency
        };

        let cache = DownloadCache::new(config.download_cache.clone());
        Self {
            config,
            backend,
            plugins,
            cache,
            task_slots: Semaphore::new(slots.max(1)),
            images: ImageCache::default(),
            stats: DownloadStats::default(),
            download_counter: AtomicU64::new(0),
        }
    }

    /// Gets the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the task execution backend.
    pub fn backend(&self) -> &dyn TaskExecutionBackend {
        self.backend.as_ref()
    }

    /// Gets the plugin registry.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Gets the download counters.
    pub fn download_stats(&self) -> &DownloadStats {
        &self.stats
    }

    /// Gets the task concurrency semaphore.
    pub(crate) fn task_slots(&self) -> &Semaphore {
        &self.task_slots
    }

    /// Builds (or reuses) the image for an inline dockerfile.
    pub(crate) async fn inline_image(&self, dockerfile: &str) -> Result<String> {
        self.images.get_or_build(self.backend.as_ref(), dockerfile).await
    }

    /// Runs a document's workflow against an inputs JSON object.
    ///
    /// Creates a run directory under `run_root`, records `inputs.json`,
    /// and on completion writes `outputs.json` (success) or `error.json`
    /// (failure).
    pub async fn run_workflow(
        &self,
        document: &Arc<Document>,
        inputs: &JsonValue,
        run_root: &Path,
        base_dir: &Path,
    ) -> Result<RunOutputs, RunFailed> {
        let workflow = document
            .ast()
            .workflow
            .as_ref()
            .ok_or_else(|| RunFailed::setup(RunError::input("document has no workflow")))?;

        let parsed = parse_workflow_inputs(document, workflow, inputs, base_dir)
            .map_err(RunFailed::setup)?;

        let run_dir = create_run_dir(run_root, &workflow.name)
            .map_err(|e| RunFailed::setup(RunError::Other(e)))?;
        std::fs::write(
            run_dir.join("inputs.json"),
            serde_json::to_string_pretty(inputs).unwrap_or_default(),
        )
        .ok();
        log_line(&run_dir, &format!("run start: workflow {}", workflow.name));

        // Workflow lifecycle hooks observe the run
        let mut hook_states = Vec::new();
        for hook in self.plugins.workflow_hooks() {
            match hook.prepare(&workflow.name, inputs) {
                Ok(state) => hook_states.push(state),
                Err(e) => {
                    return Err(self.fail_run(run_dir, JobFailure::new("setup", e.into())));
                }
            }
        }

        let token = CancellationToken::new();
        let result = run_workflow(
            self,
            document,
            workflow,
            parsed.env,
            &run_dir,
            &run_dir,
            &parsed.allow,
            token,
        )
        .await;

        match result {
            Ok(outputs) => {
                let mut outputs_json = qualified_outputs_json(&workflow.name, &outputs);

                // Hooks may rewrite the outputs
                for (hook, state) in self.plugins.workflow_hooks().iter().zip(hook_states) {
                    match hook.finalize(state, Ok(outputs_json.clone())) {
                        Ok(Some(rewritten)) => outputs_json = rewritten,
                        Ok(None) => {}
                        Err(e) => {
                            return Err(
                                self.fail_run(run_dir, JobFailure::new("outputs", e.into()))
                            );
                        }
                    }
                }

                write_outputs_json(&run_dir, &outputs_json).ok();
                log_line(&run_dir, "run done");
                Ok(RunOutputs {
                    dir: run_dir,
                    outputs: outputs_json,
                })
            }
            Err(failure) => {
                for (hook, state) in self.plugins.workflow_hooks().iter().zip(hook_states) {
                    hook.finalize(state, Err(&failure.error)).ok();
                }

                Err(self.fail_run(run_dir, failure))
            }
        }
    }

    /// Runs a single task against an inputs JSON object.
    pub async fn run_task(
        &self,
        document: &Arc<Document>,
        task_name: &str,
        inputs: &JsonValue,
        run_root: &Path,
        base_dir: &Path,
    ) -> Result<RunOutputs, RunFailed> {
        let task = document.task(task_name).ok_or_else(|| {
            RunFailed::setup(RunError::input(format!(
                "document has no task named `{task_name}`"
            )))
        })?;

        let parsed =
            parse_task_inputs(document, task, inputs, base_dir).map_err(RunFailed::setup)?;

        let run_dir = create_run_dir(run_root, &task.name)
            .map_err(|e| RunFailed::setup(RunError::Other(e)))?;
        log_line(&run_dir, &format!("run start: task {}", task.name));

        let token = CancellationToken::new();
        let job_id = format!("call-{name}", name = task.name);
        let result = run_task(
            self,
            document,
            task,
            parsed.env,
            &run_dir,
            &run_dir,
            &job_id,
            &parsed.allow,
            &token,
        )
        .await;

        match result {
            Ok(outputs) => {
                let outputs_json = qualified_outputs_json(&task.name, &outputs);
                write_outputs_json(&run_dir, &outputs_json).ok();
                log_line(&run_dir, "run done");
                Ok(RunOutputs {
                    dir: run_dir,
                    outputs: outputs_json,
                })
            }
            Err(error) => Err(self.fail_run(run_dir, JobFailure::new(job_id, error))),
        }
    }

    /// Records a failed run: writes `error.json` and the log line.
    fn fail_run(&self, run_dir: PathBuf, failure: JobFailure) -> RunFailed {
        write_error_json(&run_dir, &failure).ok();
        log_line(
            &run_dir,
            &format!(
                "run failed: {kind} in {job}",
                kind = failure.error.kind(),
                job = failure.job_id
            ),
        );

        RunFailed {
            dir: Some(run_dir),
            failure,
        }
    }

    /// Downloads a URI via the registered plugins, consulting the cache.
    ///
    /// The plugin's prepared WDL task executes through the ordinary task
    /// runtime in a `download-<n>` directory under `call_dir`.
    pub(crate) async fn download(
        &self,
        uri: &str,
        call_dir: &Path,
        run_root: &Path,
    ) -> RunResult<PathBuf> {
        let url = Url::parse(uri).map_err(|e| RunError::Download {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        if let Some(cached) = self.cache.get(&url) {
            self.stats.cached.fetch_add(1, Ordering::Relaxed);
            info!(uri, "using cached download");
            return Ok(cached);
        }

        let plugin = self
            .plugins
            .download_plugin(url.scheme())
            .ok_or_else(|| RunError::Download {
                uri: uri.to_string(),
                message: format!(
                    "no download plugin is registered for scheme `{scheme}`",
                    scheme = url.scheme()
                ),
            })?;

        let job = plugin.prepare(&url).map_err(|e| RunError::Download {
            uri: uri.to_string(),
            message: format!("{e:#}"),
        })?;

        // The plugin's task source goes through the ordinary front end
        let document = sluice_analysis::analyze_source(
            &job.task_source,
            "<download task>",
            "/__sluice_download.wdl",
            self.config.check_quant.0,
        )
        .map_err(|e| RunError::Download {
            uri: uri.to_string(),
            message: format!("download task failed to analyze: {e}"),
        })?;

        let task = document.ast().tasks.first().ok_or_else(|| RunError::Download {
            uri: uri.to_string(),
            message: "download plugin produced no task".to_string(),
        })?;

        // Bind the plugin's inputs object
        let signature = document
            .task_signature(&task.name)
            .expect("task signature exists in a checked document");
        let mut env = Bindings::new();
        let mut allow = AllowList::new();
        if let Some(object) = job.inputs.as_object() {
            for (name, value) in object {
                let ty = signature.inputs.get(name).ok_or_else(|| RunError::Download {
                    uri: uri.to_string(),
                    message: format!("download task has no input `{name}`"),
                })?;

                let parsed = Value::from_json(ty, value).map_err(|e| RunError::Download {
                    uri: uri.to_string(),
                    message: e,
                })?;
                parsed.visit_paths(&mut |path, _| allow.add(path));
                env = env.bind(name.clone(), parsed);
            }
        }

        let n = self.download_counter.fetch_add(1, Ordering::Relaxed);
        let download_dir = call_dir.join(format!("download-{n}"));
        let token = CancellationToken::new();

        let result = Box::pin(run_task(
            self,
            &document,
            task,
            env,
            &download_dir,
            run_root,
            "download",
            &allow,
            &token,
        ))
        .await;

        match result {
            Ok(outputs) => {
                let outputs_json = crate::task::environment_json(&outputs);
                let finalized = plugin
                    .finalize(job.state, Ok(outputs_json))
                    .map_err(|e| RunError::Download {
                        uri: uri.to_string(),
                        message: format!("{e:#}"),
                    })?;

                let path = finalized
                    .get("file")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RunError::Download {
                        uri: uri.to_string(),
                        message: "download outputs did not contain a `file` entry".to_string(),
                    })?;

                self.stats.downloads.fetch_add(1, Ordering::Relaxed);
                info!(uri, path, "downloaded");

                // Prefer the immutable cached copy when the cache stores it
                match self.cache.put(&url, Path::new(path)) {
                    Ok(Some(cached)) => Ok(cached),
                    Ok(None) => Ok(PathBuf::from(path)),
                    Err(e) => Err(RunError::Other(e)),
                }
            }
            Err(e) => {
                // The plugin may rewrap the failure but cannot suppress it
                plugin.finalize(job.state, Err(&e)).ok();
                Err(RunError::Download {
                    uri: uri.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
