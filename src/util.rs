use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{PrelibError, Result};

/// An insertion-order-agnostic set of strings, exposing the handful of
/// operations the resolver needs (`needed`, `resolved`, `kept_defaultlibs`
/// are all one of these). Backed by a `BTreeSet` so `sorted_values` is free
/// and `values` is still deterministic, which keeps test fixtures stable.
#[derive(Debug, Default, Clone)]
pub struct StringSet {
    values: BTreeSet<String>,
}

impl StringSet {
    pub fn new() -> Self {
        StringSet::default()
    }

    pub fn put(&mut self, s: impl Into<String>) {
        self.values.insert(s.into());
    }

    pub fn has(&self, s: &str) -> bool {
        self.values.contains(s)
    }

    pub fn del(&mut self, s: &str) {
        self.values.remove(s);
    }

    pub fn values(&self) -> Vec<String> {
        self.values.iter().cloned().collect()
    }

    /// Values are already sorted by construction; kept as a distinct method
    /// so call sites can document that ordering is relied upon.
    pub fn sorted_values(&self) -> Vec<String> {
        self.values()
    }

    pub fn merge(&mut self, other: &StringSet) {
        self.values.extend(other.values.iter().cloned());
    }

    pub fn size(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// SHA-256 of a file's bytes, as lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

const RENAME_MAX_ATTEMPTS: u32 = 5;
const RENAME_INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Content-addressed rename: moves `path` to `<dir>/<sha256(path)><ext>`,
/// returning the new path.
///
/// Retries with exponential backoff to ride out transient filesystem races
/// between workers racing to rename distinct source files onto the same
/// content-addressed destination, bounded rather than unconditional so a
/// persistent failure surfaces a diagnostic error instead of hanging
/// indefinitely.
pub fn content_addressed_rename(path: &Path, ext: &str) -> Result<PathBuf> {
    let hash = sha256_file(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let dest = dir.join(format!("{hash}{ext}"));

    let mut backoff = RENAME_INITIAL_BACKOFF;
    let mut last_err = None;
    for attempt in 0..RENAME_MAX_ATTEMPTS {
        match std::fs::rename(path, &dest) {
            Ok(()) => return Ok(dest),
            Err(err) => {
                tracing::debug!(attempt, ?err, path = %path.display(), "retrying rename");
                last_err = Some(err);
                if attempt + 1 < RENAME_MAX_ATTEMPTS {
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }
    Err(PrelibError::Io(last_err.unwrap()))
}
