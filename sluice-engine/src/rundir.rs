//! Run directory creation and the run log.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;

/// Creates a fresh `run_<timestamp>_<name>` directory under the given root.
///
/// A numeric suffix disambiguates collisions within one second.
pub fn create_run_dir(root: &Path, name: &str) -> Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let base = format!("run_{timestamp}_{name}");

    for attempt in 0u32.. {
        let candidate = if attempt == 0 {
            root.join(&base)
        } else {
            root.join(format!("{base}_{n}", n = attempt + 1))
        };

        match fs::create_dir_all(candidate.parent().unwrap_or(root))
            .and_then(|()| fs::create_dir(&candidate))
        {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "failed to create run directory `{path}`",
                        path = candidate.display()
                    )
                });
            }
        }
    }

    unreachable!("run directory creation retries until an unused name is found")
}

/// Appends a timestamped line to the run's `workflow.log`.
pub fn log_line(run_dir: &Path, message: &str) {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    if let Ok(mut file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(run_dir.join("workflow.log"))
    {
        writeln!(file, "{timestamp} {message}").ok();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn collision_suffixes() {
        let root = tempfile::tempdir().unwrap();
        let first = create_run_dir(root.path(), "wf").unwrap();
        let second = create_run_dir(root.path(), "wf").unwrap();

        assert!(first.exists());
        assert!(second.exists());
        assert_ne!(first, second);
        assert!(
            second
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("run_")
        );
    }

    #[test]
    fn log_appends() {
        let root = tempfile::tempdir().unwrap();
        log_line(root.path(), "started");
        log_line(root.path(), "finished");
        let contents = fs::read_to_string(root.path().join("workflow.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("started"));
    }
}
