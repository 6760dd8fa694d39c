use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stagecraft_core::Identity;

/// Owner recorded for an entry in a stage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub user: String,
    pub uid: u32,
    pub group: String,
    pub gid: u32,
}

impl Ownership {
    pub fn root() -> Self {
        Self {
            user: "root".to_owned(),
            uid: 0,
            group: "root".to_owned(),
            gid: 0,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.uid == 0 || self.gid == 0
    }
}

impl From<&Identity> for Ownership {
    fn from(identity: &Identity) -> Self {
        Self {
            user: identity.user.clone(),
            uid: identity.uid,
            group: identity.group.clone(),
            gid: identity.gid,
        }
    }
}

/// Who owns what inside a stage root, keyed by root-relative path.
///
/// Entries are written by promotions (their declared owner) and by commands
/// (the effective identity at the time they ran). Ownership is never applied
/// to the host filesystem; it is carried into the exported image archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipLedger {
    entries: BTreeMap<PathBuf, Ownership>,
}

impl OwnershipLedger {
    pub fn record(&mut self, path: &Path, owner: &Ownership) {
        self.entries.insert(path.to_path_buf(), owner.clone());
    }

    /// Records `owner` for every path not already in the ledger.
    pub fn claim_unowned<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a PathBuf>,
        owner: &Ownership,
    ) {
        for path in paths {
            self.entries
                .entry(path.clone())
                .or_insert_with(|| owner.clone());
        }
    }

    pub fn owner_of(&self, path: &Path) -> Option<&Ownership> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Ownership)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
