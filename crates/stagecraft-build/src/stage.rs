use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ownership::OwnershipLedger;

/// On-disk state of one executed stage: an isolated root directory, a scratch
/// area for staging copies, and the ownership ledger for the root.
#[derive(Debug)]
pub struct StageRoot {
    name: String,
    dir: PathBuf,
    pub(crate) ledger: OwnershipLedger,
}

impl StageRoot {
    /// Creates a fresh, empty root under `work_dir/<name>`.
    pub(crate) fn create(work_dir: &Path, name: &str) -> std::io::Result<Self> {
        let dir = work_dir.join(name);
        crate::tree::reset_dir(&dir)?;
        std::fs::create_dir_all(dir.join("rootfs"))?;
        std::fs::create_dir_all(dir.join("scratch/home"))?;
        std::fs::create_dir_all(dir.join("scratch/tmp"))?;
        Ok(Self {
            name: name.to_owned(),
            dir,
            ledger: OwnershipLedger::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host directory holding the stage's filesystem.
    pub fn rootfs(&self) -> PathBuf {
        self.dir.join("rootfs")
    }

    pub(crate) fn scratch(&self) -> PathBuf {
        self.dir.join("scratch")
    }

    /// `HOME` and `TMPDIR` for the stage's commands. Package manager caches
    /// and global installs land here instead of the operator's home.
    pub(crate) fn sandbox_env(&self) -> BTreeMap<String, String> {
        let scratch = self.scratch();
        BTreeMap::from([
            ("HOME".to_owned(), scratch.join("home").display().to_string()),
            ("TMPDIR".to_owned(), scratch.join("tmp").display().to_string()),
        ])
    }

    /// Host path of a root-relative stage path.
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.rootfs().join(relative)
    }

    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }
}
