//! The content-addressed download cache.
//!
//! Entries are keyed by a digest of the canonical URI. Each entry is a
//! directory holding the downloaded payload plus a `meta.json` sidecar with
//! the original URI, size, and creation time; entries are immutable once
//! written. Concurrent writers for the same URI are serialized by an
//! advisory on-disk lock file.

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::CacheConfig;

/// The sidecar metadata stored beside each cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    /// The original URI of the entry.
    uri: String,
    /// The payload size in bytes.
    size: u64,
    /// The creation time as an RFC 3339 timestamp.
    created: String,
}

/// A content-addressed cache of downloaded URIs.
pub struct DownloadCache {
    /// The cache configuration.
    config: CacheConfig,
}

impl DownloadCache {
    /// Creates a new cache over the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Determines if the given URI is eligible for caching at all.
    ///
    /// A URI is ineligible when caching is disabled, when it matches no
    /// enabled pattern or any disabled pattern, or when it carries a query
    /// string and `ignore_query` is off.
    pub fn eligible(&self, uri: &Url) -> bool {
        if !self.config.put && !self.config.get {
            return false;
        }

        if uri.query().is_some() && !self.config.ignore_query {
            return false;
        }

        let text = uri.as_str();
        let matches = |patterns: &[String]| {
            patterns.iter().any(|p| {
                glob::Pattern::new(p)
                    .map(|p| p.matches(text))
                    .unwrap_or(false)
            })
        };

        matches(&self.config.enable_patterns) && !matches(&self.config.disable_patterns)
    }

    /// Gets the canonical form of a URI used for keying.
    fn canonical(&self, uri: &Url) -> String {
        let mut canonical = uri.clone();
        if self.config.ignore_query {
            canonical.set_query(None);
        }

        canonical.to_string()
    }

    /// Gets the entry directory for a URI.
    fn entry_dir(&self, uri: &Url) -> PathBuf {
        let digest = blake3::hash(self.canonical(uri).as_bytes());
        self.config.dir.join(digest.to_hex().as_str())
    }

    /// Looks up a cached file for the URI.
    ///
    /// Returns `None` when the cache is not consulted for this URI or the
    /// entry is absent.
    pub fn get(&self, uri: &Url) -> Option<PathBuf> {
        if !self.config.get || !self.eligible(uri) {
            return None;
        }

        let dir = self.entry_dir(uri);
        let metadata = fs::read_to_string(dir.join("meta.json")).ok()?;
        let metadata: EntryMetadata = serde_json::from_str(&metadata).ok()?;

        let payload = dir.join("payload").join(payload_name(&metadata.uri));
        if payload.exists() {
            debug!(uri = %uri, path = %payload.display(), "download cache hit");
            Some(payload)
        } else {
            None
        }
    }

    /// Stores a downloaded file into the cache, returning the cached path.
    ///
    /// Returns `None` when the cache does not store this URI; the caller
    /// keeps using its own copy.
    pub fn put(&self, uri: &Url, source: &Path) -> Result<Option<PathBuf>> {
        if !self.config.put || !self.eligible(uri) {
            return Ok(None);
        }

        let dir = self.entry_dir(uri);
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed to create cache directory `{dir}`", dir = dir.display())
        })?;

        let _lock = EntryLock::acquire(&dir)?;

        // Another writer may have completed while we waited on the lock
        if let Some(existing) = self.get(uri) {
            return Ok(Some(existing));
        }

        let payload_dir = dir.join("payload");
        fs::create_dir_all(&payload_dir).with_context(|| {
            format!(
                "failed to create cache payload directory `{dir}`",
                dir = payload_dir.display()
            )
        })?;

        let target = payload_dir.join(payload_name(uri.as_str()));
        fs::copy(source, &target).with_context(|| {
            format!(
                "failed to copy `{source}` into the download cache",
                source = source.display()
            )
        })?;

        let size = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        let metadata = EntryMetadata {
            uri: uri.to_string(),
            size,
            created: chrono::Utc::now().to_rfc3339(),
        };
        fs::write(
            dir.join("meta.json"),
            serde_json::to_string_pretty(&metadata)?,
        )
        .context("failed to write cache entry metadata")?;

        debug!(uri = %uri, path = %target.display(), "stored download in cache");
        Ok(Some(target))
    }
}

/// Gets the payload file name for a URI (its basename, or a default).
fn payload_name(uri: &str) -> String {
    let path = uri.split('?').next().unwrap_or(uri);
    let base = path.rsplit('/').next().unwrap_or("");
    if base.is_empty() {
        "download".to_string()
    } else {
        base.to_string()
    }
}

/// An advisory lock over a cache entry directory.
struct EntryLock {
    /// The lock file path.
    path: PathBuf,
}

impl EntryLock {
    /// Acquires the lock, waiting for other holders to release it.
    fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(".lock");
        let mut waited = Duration::ZERO;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if waited > Duration::from_secs(60) {
                        // A crashed writer may have leaked the lock
                        fs::remove_file(&path).ok();
                        continue;
                    }

                    let delay = Duration::from_millis(50);
                    std::thread::sleep(delay);
                    waited += delay;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("failed to create lock file `{path}`", path = path.display())
                    });
                }
            }
        }
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        fs::remove_file(&self.path).ok();
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Builds a cache in a temp directory with put/get enabled.
    fn cache(dir: &Path) -> DownloadCache {
        DownloadCache::new(CacheConfig {
            put: true,
            get: true,
            dir: dir.to_path_buf(),
            ..Default::default()
        })
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let uri = Url::parse("https://example.com/data/reads.fastq").unwrap();

        assert!(cache.get(&uri).is_none());

        let source = dir.path().join("reads.fastq");
        fs::write(&source, "ACGT").unwrap();
        let cached = cache.put(&uri, &source).unwrap().expect("should cache");
        assert_eq!(fs::read_to_string(&cached).unwrap(), "ACGT");

        let hit = cache.get(&uri).expect("entry should be cached");
        assert_eq!(hit, cached);
    }

    #[test]
    fn query_strings_bypass_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let uri = Url::parse("https://example.com/reads.fastq?signature=abc").unwrap();
        assert!(!cache.eligible(&uri));

        let mut config = CacheConfig {
            put: true,
            get: true,
            dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.ignore_query = true;
        let cache = DownloadCache::new(config);
        assert!(cache.eligible(&uri));

        // With ignore_query, both spellings share one entry
        let bare = Url::parse("https://example.com/reads.fastq").unwrap();
        assert_eq!(cache.entry_dir(&uri), cache.entry_dir(&bare));
    }

    #[test]
    fn patterns() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            put: true,
            get: true,
            dir: dir.path().to_path_buf(),
            enable_patterns: vec!["https://allowed.org/*".to_string()],
            disable_patterns: vec!["*/secret/*".to_string()],
            ..Default::default()
        };
        let cache = DownloadCache::new(config);

        assert!(cache.eligible(&Url::parse("https://allowed.org/a.txt").unwrap()));
        assert!(!cache.eligible(&Url::parse("https://other.org/a.txt").unwrap()));
        assert!(!cache.eligible(&Url::parse("https://allowed.org/secret/a.txt").unwrap()));
    }
}
