//! The plugin registry and hook contracts.
//!
//! Plugins come in three groups: `file_download` plugins keyed by URI
//! scheme, and task/workflow lifecycle hooks. A download plugin does not
//! perform I/O itself; it *prepares* a WDL task for the engine to execute
//! (reusing the engine's container machinery for the heavy lifting) and
//! then *finalizes* the task's outputs into the downloaded file.
//!
//! The registry is immutable once the engine is constructed.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value as JsonValue;
use url::Url;

use crate::error::RunError;

/// Opaque state carried from `prepare` to `finalize`.
pub type PluginState = Box<dyn Any + Send>;

/// A prepared download job.
pub struct DownloadJob {
    /// WDL source of the task that performs the download.
    pub task_source: String,
    /// The inputs object for the task.
    pub inputs: JsonValue,
    /// State handed back to the plugin on finalization.
    pub state: PluginState,
}

/// A plugin handling downloads for one or more URI schemes.
///
/// The task produced by [`prepare`](DownloadPlugin::prepare) must declare a
/// single `File file` output naming the downloaded file.
pub trait DownloadPlugin: Send + Sync {
    /// Gets the URI schemes the plugin handles (e.g. `["https", "http"]`).
    fn schemes(&self) -> &[&str];

    /// Prepares the WDL task that downloads the given URI.
    fn prepare(&self, uri: &Url) -> Result<DownloadJob>;

    /// Finalizes the download given the task's outputs or failure.
    ///
    /// On success, returns the (possibly rewritten) outputs object, which
    /// must contain a `file` entry. A failure may be rewrapped but not
    /// suppressed.
    fn finalize(
        &self,
        state: PluginState,
        outcome: Result<JsonValue, &RunError>,
    ) -> Result<JsonValue>;
}

/// A lifecycle hook observing task execution.
pub trait TaskHook: Send + Sync {
    /// Called before a task runs, with its name and inputs.
    ///
    /// Returns state handed back on completion. May rewrite nothing; hooks
    /// observe rather than alter inputs.
    fn prepare(&self, task_name: &str, inputs: &JsonValue) -> Result<PluginState>;

    /// Called after the task completes with its outputs or failure.
    ///
    /// On success the hook may rewrite the outputs object. A failure may be
    /// rewrapped but not suppressed.
    fn finalize(
        &self,
        state: PluginState,
        outcome: Result<JsonValue, &RunError>,
    ) -> Result<Option<JsonValue>>;
}

/// A lifecycle hook observing workflow execution.
pub trait WorkflowHook: Send + Sync {
    /// Called before a workflow runs, with its name and inputs.
    fn prepare(&self, workflow_name: &str, inputs: &JsonValue) -> Result<PluginState>;

    /// Called after the workflow completes with its outputs or failure.
    fn finalize(
        &self,
        state: PluginState,
        outcome: Result<JsonValue, &RunError>,
    ) -> Result<Option<JsonValue>>;
}

/// The process-wide plugin registry.
#[derive(Default)]
pub struct PluginRegistry {
    /// Download plugins by URI scheme.
    download: HashMap<String, Arc<dyn DownloadPlugin>>,
    /// Task lifecycle hooks, in registration order.
    task: Vec<Arc<dyn TaskHook>>,
    /// Workflow lifecycle hooks, in registration order.
    workflow: Vec<Arc<dyn WorkflowHook>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a download plugin for its schemes.
    ///
    /// A later registration for the same scheme wins.
    pub fn register_download(&mut self, plugin: Arc<dyn DownloadPlugin>) {
        for scheme in plugin.schemes() {
            self.download.insert(scheme.to_string(), plugin.clone());
        }
    }

    /// Registers a task lifecycle hook.
    pub fn register_task_hook(&mut self, hook: Arc<dyn TaskHook>) {
        self.task.push(hook);
    }

    /// Registers a workflow lifecycle hook.
    pub fn register_workflow_hook(&mut self, hook: Arc<dyn WorkflowHook>) {
        self.workflow.push(hook);
    }

    /// Gets the download plugin for a URI scheme.
    pub fn download_plugin(&self, scheme: &str) -> Option<&Arc<dyn DownloadPlugin>> {
        self.download.get(scheme)
    }

    /// Gets the task lifecycle hooks.
    pub fn task_hooks(&self) -> &[Arc<dyn TaskHook>] {
        &self.task
    }

    /// Gets the workflow lifecycle hooks.
    pub fn workflow_hooks(&self) -> &[Arc<dyn WorkflowHook>] {
        &self.workflow
    }
}
