//! Runtime error taxonomy for the execution engine.
//!
//! Static errors are reported as diagnostics by the analysis crate; this
//! module covers the evaluation and runtime layers. The `kind` strings are
//! stable and appear in `error.json`.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use sluice_syntax::SourcePosition;

/// A result over [`RunError`].
pub type RunResult<T> = Result<T, RunError>;

/// Represents an evaluation or runtime failure.
#[derive(Debug)]
pub enum RunError {
    /// An expression failed to evaluate (arithmetic fault, bad subscript
    /// target, malformed regex, failed stdlib call).
    Eval {
        /// The failure message.
        message: String,
        /// The position of the failing expression.
        pos: SourcePosition,
    },
    /// A null value reached a non-optional site.
    NullValue {
        /// The position of the failing expression.
        pos: SourcePosition,
    },
    /// A subscript was out of bounds.
    OutOfBounds {
        /// The failure message.
        message: String,
        /// The position of the failing expression.
        pos: SourcePosition,
    },
    /// The run inputs were invalid, or a task referenced a file outside its
    /// permitted inputs.
    Input {
        /// The failure message.
        message: String,
    },
    /// A task command exited with a nonzero status.
    CommandFailed {
        /// The exit status of the command.
        exit_status: i32,
        /// The path of the captured stderr.
        stderr_file: PathBuf,
    },
    /// A task output failed to evaluate or referenced a file outside the
    /// task's working directory.
    Output {
        /// The failure message.
        message: String,
        /// The position of the failing output, when known.
        pos: Option<SourcePosition>,
    },
    /// A remote input could not be downloaded.
    Download {
        /// The URI that failed to download.
        uri: String,
        /// The failure message.
        message: String,
    },
    /// A container image could not be found or pulled.
    ImageNotFound {
        /// The image reference.
        image: String,
        /// The failure message.
        message: String,
    },
    /// The container backend classified the failure as an interruption
    /// (e.g. a preempted instance).
    Interrupted {
        /// The failure message.
        message: String,
    },
    /// The job was cancelled.
    Cancelled,
    /// An internal error outside the defined taxonomy.
    Other(anyhow::Error),
}

impl RunError {
    /// Creates an evaluation error.
    pub fn eval(message: impl Into<String>, pos: &SourcePosition) -> Self {
        Self::Eval {
            message: message.into(),
            pos: pos.clone(),
        }
    }

    /// Creates an out-of-bounds error.
    pub fn out_of_bounds(message: impl Into<String>, pos: &SourcePosition) -> Self {
        Self::OutOfBounds {
            message: message.into(),
            pos: pos.clone(),
        }
    }

    /// Creates an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    /// Creates an output error.
    pub fn output(message: impl Into<String>, pos: Option<&SourcePosition>) -> Self {
        Self::Output {
            message: message.into(),
            pos: pos.cloned(),
        }
    }

    /// Gets the stable kind string of the error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Eval { .. } => "EvalError",
            Self::NullValue { .. } => "NullValue",
            Self::OutOfBounds { .. } => "OutOfBounds",
            Self::Input { .. } => "InputError",
            Self::CommandFailed { .. } => "CommandFailed",
            Self::Output { .. } => "OutputError",
            Self::Download { .. } => "DownloadFailed",
            Self::ImageNotFound { .. } => "ImageNotFound",
            Self::Interrupted { .. } => "Interrupted",
            Self::Cancelled => "Cancelled",
            Self::Other(_) => "RuntimeError",
        }
    }

    /// Gets the source position associated with the error, if any.
    pub fn pos(&self) -> Option<&SourcePosition> {
        match self {
            Self::Eval { pos, .. } | Self::NullValue { pos } | Self::OutOfBounds { pos, .. } => {
                Some(pos)
            }
            Self::Output { pos, .. } => pos.as_ref(),
            _ => None,
        }
    }

    /// Gets the stderr file associated with the error, if any.
    pub fn stderr_file(&self) -> Option<&Path> {
        match self {
            Self::CommandFailed { stderr_file, .. } => Some(stderr_file),
            _ => None,
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eval { message, pos } => write!(f, "evaluation failed at {pos}: {message}"),
            Self::NullValue { pos } => {
                write!(f, "null value used in a non-optional context at {pos}")
            }
            Self::OutOfBounds { message, pos } => write!(f, "{message} at {pos}"),
            Self::Input { message } => write!(f, "{message}"),
            Self::CommandFailed {
                exit_status,
                stderr_file,
            } => write!(
                f,
                "task command failed with exit status {exit_status}; see `{path}` for details",
                path = stderr_file.display()
            ),
            Self::Output { message, pos } => match pos {
                Some(pos) => write!(f, "{message} at {pos}"),
                None => write!(f, "{message}"),
            },
            Self::Download { uri, message } => {
                write!(f, "failed to download `{uri}`: {message}")
            }
            Self::ImageNotFound { image, message } => {
                write!(f, "container image `{image}` is unavailable: {message}")
            }
            Self::Interrupted { message } => write!(f, "task was interrupted: {message}"),
            Self::Cancelled => write!(f, "run was cancelled"),
            Self::Other(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<anyhow::Error> for RunError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value)
    }
}

/// A runtime failure attributed to a qualified job.
///
/// The job id is `decl-<name>`, `call-<name>`, etc., prefixed by any
/// enclosing scatter namespaces.
#[derive(Debug)]
pub struct JobFailure {
    /// The qualified id of the failed job.
    pub job_id: String,
    /// The underlying error.
    pub error: RunError,
}

impl JobFailure {
    /// Creates a new job failure.
    pub fn new(job_id: impl Into<String>, error: RunError) -> Self {
        Self {
            job_id: job_id.into(),
            error,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job `{id}` failed: {error}", id = self.job_id, error = self.error)
    }
}

impl std::error::Error for JobFailure {}
