//! Execution engine for Workflow Description Language (WDL) documents.
//!
//! The engine takes a type-checked [`sluice_analysis::Document`] plus a
//! JSON inputs object, executes the described workflow or task, and
//! produces a JSON outputs object (or a structured failure record)
//! together with a persistent per-run directory holding every artifact of
//! the run.
//!
//! Construct an [`Engine`] with a [`Config`], a
//! [`backend::TaskExecutionBackend`], and a [`PluginRegistry`], then call
//! [`Engine::run_workflow`] or [`Engine::run_task`].

pub mod backend;
mod cache;
mod config;
mod engine;
mod error;
mod eval;
mod inputs;
mod outputs;
mod plugin;
mod rundir;
mod stage;
mod stdlib;
mod task;
mod units;
mod value;
mod workflow;

pub use cache::DownloadCache;
pub use config::*;
pub use engine::DownloadStats;
pub use engine::Engine;
pub use engine::RunFailed;
pub use engine::RunOutputs;
pub use error::JobFailure;
pub use error::RunError;
pub use error::RunResult;
pub use eval::EvalContext;
pub use eval::EvaluationContext;
pub use eval::ExprEvaluator;
pub use eval::evaluate_decls;
pub use eval::values_equal;
pub use inputs::ParsedInputs;
pub use inputs::parse_task_inputs;
pub use inputs::parse_workflow_inputs;
pub use outputs::error_json;
pub use outputs::qualified_outputs_json;
pub use plugin::DownloadJob;
pub use plugin::DownloadPlugin;
pub use plugin::PluginRegistry;
pub use plugin::PluginState;
pub use plugin::TaskHook;
pub use plugin::WorkflowHook;
pub use rundir::create_run_dir;
pub use stage::AllowList;
pub use units::StorageUnit;
pub use value::Array;
pub use value::CoercionError;
pub use value::Map;
pub use value::Pair;
pub use value::StructValue;
pub use value::Value;
pub use workflow::run_workflow;
