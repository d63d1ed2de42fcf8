//! Input staging and filesystem sandboxing.
//!
//! Before a task runs, every `File`/`Directory` input is materialized at a
//! content-addressed location under the working directory. Inputs outside
//! the allow-list built from the run's input JSON are rejected; files
//! already inside the run tree are referenced by symlink.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use path_clean::PathClean;
use sluice_analysis::Bindings;

use crate::backend::Mount;
use crate::error::RunError;
use crate::error::RunResult;
use crate::value::Value;

/// The directory under `work/` holding staged inputs.
const STAGED_INPUTS_DIR: &str = "_sluice_inputs";

/// The set of host paths a run's tasks may read.
///
/// The permitted roots are exactly the paths listed in the input JSON;
/// a listed directory also permits the files it contains.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    /// The permitted root paths.
    roots: Vec<PathBuf>,
}

impl AllowList {
    /// Creates an empty allow-list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a permitted root path.
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        self.roots.push(path.into().clean());
    }

    /// Determines if the given path is permitted.
    pub fn permits(&self, path: &Path) -> bool {
        let path = path.clean();
        self.roots
            .iter()
            .any(|root| path == *root || path.starts_with(root))
    }
}

/// The result of staging a task's inputs.
#[derive(Debug)]
pub struct StagedInputs {
    /// The input environment with paths rewritten to staged locations.
    pub env: Bindings<Value>,
    /// Read-only mounts of the staged input directories.
    pub mounts: Vec<Mount>,
}

/// Stages every file and directory input into the working directory.
///
/// Distinct inputs whose basenames collide receive distinct parent
/// directories, as the parent is derived from a digest of the original
/// path.
pub fn stage_inputs(
    env: &Bindings<Value>,
    work_dir: &Path,
    run_root: &Path,
    allow: &AllowList,
) -> RunResult<StagedInputs> {
    let inputs_dir = work_dir.join(STAGED_INPUTS_DIR);
    let run_root = run_root.clean();

    // Collect and validate the distinct paths first so failures happen
    // before anything is materialized
    let mut failures: Option<RunError> = None;
    let mut originals: Vec<(String, bool)> = Vec::new();
    for binding in env.iter() {
        binding.value().visit_paths(&mut |path, is_dir| {
            if failures.is_some() || originals.iter().any(|(p, _)| p == path) {
                return;
            }

            // Paths already inside this working directory (previously
            // staged, or written by `write_*` functions) stay as they are
            if Path::new(path).starts_with(work_dir) {
                return;
            }

            if let Err(e) = validate_input(Path::new(path), &run_root, allow) {
                failures = Some(e);
                return;
            }

            originals.push((path.to_string(), is_dir));
        });
    }

    if let Some(error) = failures {
        return Err(error);
    }

    // Materialize each input and record the rewrites
    let mut staged: HashMap<String, String> = HashMap::new();
    let mut mounts = Vec::new();
    for (original, _) in &originals {
        let source = Path::new(original).clean();
        let digest = blake3::hash(source.to_string_lossy().as_bytes());
        let parent = inputs_dir.join(&digest.to_hex().as_str()[..16]);
        fs::create_dir_all(&parent).map_err(|e| {
            RunError::input(format!(
                "failed to create staging directory `{path}`: {e}",
                path = parent.display()
            ))
        })?;

        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let target = parent.join(&basename);

        if !target.exists() {
            symlink(&source, &target)?;
        }

        mounts.push(Mount {
            host: parent.clone(),
            guest: parent.clone(),
            read_only: true,
        });

        staged.insert(original.clone(), target.to_string_lossy().to_string());
    }

    // Rewrite every path in the environment to its staged location
    let mut rewritten = Bindings::new();
    for binding in env.iter() {
        let value = binding
            .value()
            .rewrite_paths(&mut |path, _| staged.get(path).cloned());
        rewritten = rewritten.bind(binding.name().to_string(), value);
    }

    Ok(StagedInputs {
        env: rewritten,
        mounts,
    })
}

/// Validates that an input path exists and is permitted.
fn validate_input(path: &Path, run_root: &Path, allow: &AllowList) -> RunResult<()> {
    if !path.is_absolute() {
        return Err(RunError::input(format!(
            "input file `{path}` is not an absolute path",
            path = path.display()
        )));
    }

    // Files produced inside the run tree are always permitted; everything
    // else must appear in the allow-list built from the input JSON
    let cleaned = path.clean();
    if !cleaned.starts_with(run_root) && !allow.permits(&cleaned) {
        return Err(RunError::input(format!(
            "inputs use unknown file: {path}",
            path = path.display()
        )));
    }

    if !path.exists() {
        return Err(RunError::input(format!(
            "input file `{path}` does not exist",
            path = path.display()
        )));
    }

    Ok(())
}

/// Creates a symlink to an input.
#[cfg(unix)]
fn symlink(source: &Path, target: &Path) -> RunResult<()> {
    std::os::unix::fs::symlink(source, target).map_err(|e| {
        RunError::input(format!(
            "failed to link input `{source}`: {e}",
            source = source.display()
        ))
    })
}

/// Copies an input on platforms without symlinks.
#[cfg(not(unix))]
fn symlink(source: &Path, target: &Path) -> RunResult<()> {
    fs::copy(source, target).map(|_| ()).map_err(|e| {
        RunError::input(format!(
            "failed to copy input `{source}`: {e}",
            source = source.display()
        ))
    })
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn allow_list() {
        let mut allow = AllowList::new();
        allow.add("/data/inputs/sample.bam");
        allow.add("/data/reference");

        assert!(allow.permits(Path::new("/data/inputs/sample.bam")));
        assert!(allow.permits(Path::new("/data/reference/genome.fa")));
        assert!(!allow.permits(Path::new("/data/inputs/other.bam")));
        assert!(!allow.permits(Path::new("/etc/passwd")));
    }

    #[test]
    fn staging_rewrites_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reads.txt");
        fs::write(&input, "hello").unwrap();

        let mut allow = AllowList::new();
        allow.add(&input);

        let run_root = dir.path().join("run");
        let work = run_root.join("work");
        fs::create_dir_all(&work).unwrap();

        let env = Bindings::new().bind(
            "reads",
            Value::file(input.to_string_lossy()),
        );

        let staged = stage_inputs(&env, &work, &run_root, &allow).unwrap();
        let rewritten = staged.env.resolve("reads").unwrap();
        let path = Path::new(rewritten.unwrap_str());

        assert!(path.starts_with(&work));
        assert!(path.to_string_lossy().contains(STAGED_INPUTS_DIR));
        assert_eq!(fs::read_to_string(path).unwrap(), "hello");
        assert_eq!(staged.mounts.len(), 1);
        assert!(staged.mounts[0].read_only);
    }

    #[test]
    fn forbidden_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("secret.txt");
        fs::write(&outside, "shh").unwrap();

        let run_root = dir.path().join("run");
        let work = run_root.join("work");
        fs::create_dir_all(&work).unwrap();

        let env = Bindings::new().bind("f", Value::file(outside.to_string_lossy()));
        let error = stage_inputs(&env, &work, &run_root, &AllowList::new()).unwrap_err();
        assert_eq!(error.kind(), "InputError");
        assert!(error.to_string().contains("inputs use unknown file"));
    }

    #[test]
    fn basename_collisions_get_distinct_parents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a").join("data.txt");
        let b = dir.path().join("b").join("data.txt");
        fs::create_dir_all(a.parent().unwrap()).unwrap();
        fs::create_dir_all(b.parent().unwrap()).unwrap();
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let mut allow = AllowList::new();
        allow.add(&a);
        allow.add(&b);

        let run_root = dir.path().join("run");
        let work = run_root.join("work");
        fs::create_dir_all(&work).unwrap();

        let env = Bindings::new()
            .bind("a", Value::file(a.to_string_lossy()))
            .bind("b", Value::file(b.to_string_lossy()));

        let staged = stage_inputs(&env, &work, &run_root, &allow).unwrap();
        let a_path = staged.env.resolve("a").unwrap().unwrap_str().to_string();
        let b_path = staged.env.resolve("b").unwrap().unwrap_str().to_string();

        assert_ne!(a_path, b_path);
        assert_eq!(fs::read_to_string(&a_path).unwrap(), "a");
        assert_eq!(fs::read_to_string(&b_path).unwrap(), "b");
    }
}
