//! A task execution backend running commands as local processes.
//!
//! Commands run under `bash` directly against host paths; no container is
//! involved, so this backend is only appropriate for trusted documents and
//! for tests.

use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use sysinfo::System;
use tokio::process::Command;
use tokio::select;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::TaskExecutionBackend;
use super::TaskSpawnRequest;

/// Host information sampled once at startup.
static SYSTEM: LazyLock<System> = LazyLock::new(System::new_all);

/// The default shell for task commands.
const DEFAULT_SHELL: &str = "bash";

/// A backend that runs task commands as local `bash` processes.
pub struct LocalBackend {
    /// The host CPU count.
    cpu: usize,
    /// The host memory in bytes.
    memory: u64,
    /// The shell used to run commands.
    shell: String,
}

impl LocalBackend {
    /// Creates a new local backend.
    pub fn new(shell: Option<&str>) -> Self {
        Self {
            cpu: SYSTEM.cpus().len().max(1),
            memory: SYSTEM.total_memory(),
            shell: shell.unwrap_or(DEFAULT_SHELL).to_string(),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TaskExecutionBackend for LocalBackend {
    fn max_concurrency(&self) -> usize {
        self.cpu
    }

    fn container_root(&self) -> Option<&Path> {
        // Tasks run directly against host paths
        None
    }

    fn prepare_image(&self, image: &str) -> Result<()> {
        info!(image, "local backend ignores the container image");
        Ok(())
    }

    fn build_image(&self, _dockerfile: &str, _tag: &str) -> Result<String> {
        bail!("the local backend cannot build container images")
    }

    fn spawn(
        &self,
        request: TaskSpawnRequest,
        token: CancellationToken,
    ) -> Result<(oneshot::Receiver<()>, oneshot::Receiver<Result<i32>>)> {
        let cpu = request.resources.cpu;
        if cpu > self.cpu as f64 {
            bail!(
                "task requires {cpu} CPUs, but the host only has {total}",
                total = self.cpu
            );
        }

        if request.resources.memory > 0 && request.resources.memory as u64 > self.memory {
            bail!(
                "task requires {memory} bytes of memory, but the host only has {total}",
                memory = request.resources.memory,
                total = self.memory
            );
        }

        let (spawned_tx, spawned_rx) = oneshot::channel();
        let (completed_tx, completed_rx) = oneshot::channel();

        let shell = self.shell.clone();
        tokio::spawn(async move {
            let result = run_process(&shell, &request, spawned_tx, token).await;
            completed_tx.send(result).ok();
        });

        Ok((spawned_rx, completed_rx))
    }
}

/// Runs the command process to completion or cancellation.
async fn run_process(
    shell: &str,
    request: &TaskSpawnRequest,
    spawned: oneshot::Sender<()>,
    token: CancellationToken,
) -> Result<i32> {
    let stdout = File::create(&request.stdout).with_context(|| {
        format!(
            "failed to create stdout file `{path}`",
            path = request.stdout.display()
        )
    })?;
    let stderr = File::create(&request.stderr).with_context(|| {
        format!(
            "failed to create stderr file `{path}`",
            path = request.stderr.display()
        )
    })?;

    let mut command = Command::new(shell);
    command
        .current_dir(&request.work_dir)
        .arg(&request.command)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .envs(&request.resources.env)
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn `{shell}`"))?;

    spawned.send(()).ok();

    let id = child.id().unwrap_or_default();
    info!(pid = id, "spawned local process for task command");

    select! {
        // Poll cancellation before the child future
        biased;

        _ = token.cancelled() => {
            child.kill().await.ok();
            bail!("task was cancelled");
        }
        status = child.wait() => {
            let status = status
                .with_context(|| format!("failed to wait for task process {id}"))?;

            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    warn!(pid = id, signal, "task process terminated by signal");
                    bail!("task process {id} was terminated by signal {signal}");
                }
            }

            let code = status.code().context("task process has no exit status")?;
            info!(pid = id, code, "task process exited");
            Ok(code)
        }
    }
}
