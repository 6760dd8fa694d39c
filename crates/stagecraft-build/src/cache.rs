//! Content-addressed stage cache.
//!
//! A stage's key is derived from its definition and the digests of everything
//! it copies in: context files and promoted artifacts. Where the stage sits in
//! the pipeline plays no part, so a changed lockfile always produces a new key
//! for the dependency stage and everything downstream of it.
//!
//! ```text
//! <cache>/<key>/entry.json   stage name, key, ownership ledger
//! <cache>/<key>/rootfs/      the stage root after execution
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stagecraft_core::Stage;

use crate::digest::ContentDigest;
use crate::ownership::OwnershipLedger;
use crate::stage::StageRoot;

const ENTRY_FILE: &str = "entry.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for `stage` given the digests of its inputs, in step order.
    pub fn compute(stage: &Stage, inputs: &[ContentDigest]) -> Result<Self, CacheError> {
        let definition =
            serde_json::to_string(stage).map_err(|e| CacheError::Serialize { source: e })?;
        let mut material = definition;
        for input in inputs {
            material.push('\n');
            material.push_str(input.as_str());
        }
        Ok(Self(ContentDigest::of_bytes(material.as_bytes()).hex().to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    stage: String,
    key: CacheKey,
    ledger: OwnershipLedger,
}

/// Stage roots stored by key on the local filesystem.
#[derive(Debug, Clone)]
pub struct StageCache {
    dir: PathBuf,
}

impl StageCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entry_dir(key).join(ENTRY_FILE).is_file()
    }

    /// Restores a cached root into `root`. Returns `false` on a miss.
    ///
    /// An unreadable entry is discarded and reported as a miss.
    pub fn restore(&self, key: &CacheKey, root: &mut StageRoot) -> Result<bool, CacheError> {
        if !self.contains(key) {
            return Ok(false);
        }
        let entry_dir = self.entry_dir(key);
        let entry_path = entry_dir.join(ENTRY_FILE);

        let content = std::fs::read_to_string(&entry_path).map_err(|e| CacheError::Read {
            path: entry_path.clone(),
            source: e,
        })?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    key = key.short(),
                    error = %e,
                    "discarding unreadable cache entry"
                );
                std::fs::remove_dir_all(&entry_dir).map_err(|e| CacheError::Write {
                    path: entry_dir.clone(),
                    source: e,
                })?;
                return Ok(false);
            }
        };

        crate::tree::copy_tree(&entry_dir.join("rootfs"), &root.rootfs()).map_err(|e| {
            CacheError::Read {
                path: entry_dir.join("rootfs"),
                source: e,
            }
        })?;
        root.ledger = entry.ledger;
        Ok(true)
    }

    /// Stores `root` under `key`. The entry becomes visible atomically.
    pub fn store(&self, key: &CacheKey, root: &StageRoot) -> Result<(), CacheError> {
        let final_dir = self.entry_dir(key);
        if self.contains(key) {
            return Ok(());
        }
        let temp_dir = self
            .dir
            .join(format!(".tmp-{}-{}", key.short(), std::process::id()));
        let write_error = |path: &Path, e: std::io::Error| CacheError::Write {
            path: path.to_path_buf(),
            source: e,
        };

        crate::tree::reset_dir(&temp_dir).map_err(|e| write_error(&temp_dir, e))?;
        crate::tree::copy_tree(&root.rootfs(), &temp_dir.join("rootfs"))
            .map_err(|e| write_error(&temp_dir, e))?;

        let entry = CacheEntry {
            stage: root.name().to_owned(),
            key: key.clone(),
            ledger: root.ledger().clone(),
        };
        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| CacheError::Serialize { source: e })?;
        let entry_path = temp_dir.join(ENTRY_FILE);
        std::fs::write(&entry_path, json).map_err(|e| write_error(&entry_path, e))?;

        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir).map_err(|e| write_error(&final_dir, e))?;
        }
        std::fs::rename(&temp_dir, &final_dir).map_err(|e| write_error(&final_dir, e))?;
        tracing::debug!(stage = root.name(), key = key.short(), "stored stage in cache");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read cache entry {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write cache entry {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize cache entry")]
    Serialize { source: serde_json::Error },
}
