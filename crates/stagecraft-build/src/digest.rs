//! SHA-256 content digests for files and directory trees.
//!
//! A tree digest covers relative paths, entry kinds, the executable bit, file
//! contents and symlink targets. Timestamps and ownership are not part of it,
//! so two trees with identical content hash identically wherever they live.

use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A `sha256:`-prefixed hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub const PREFIX: &'static str = "sha256:";

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{}{:x}", Self::PREFIX, hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the prefix.
    pub fn hex(&self) -> &str {
        match self.0.strip_prefix(Self::PREFIX) {
            Some(hex) => hex,
            None => &self.0,
        }
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of a single file's contents.
pub fn digest_file(path: &Path) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut file = std::fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentDigest::from_hasher(hasher))
}

/// Digest of a file, symlink, or directory tree rooted at `path`.
pub fn digest_tree(path: &Path) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(path)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = relative.to_string_lossy();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            write_record(&mut hasher, b'd', &name)?;
        } else if file_type.is_symlink() {
            write_record(&mut hasher, b'l', &name)?;
            let target = std::fs::read_link(entry.path())?;
            hasher.write_all(target.to_string_lossy().as_bytes())?;
            hasher.write_all(&[0])?;
        } else {
            let meta = entry.metadata()?;
            let kind = if is_executable(&meta) { b'x' } else { b'f' };
            write_record(&mut hasher, kind, &name)?;
            hasher.write_all(&meta.len().to_le_bytes())?;
            let mut file = std::fs::File::open(entry.path())?;
            io::copy(&mut file, &mut hasher)?;
        }
    }
    Ok(ContentDigest::from_hasher(hasher))
}

fn write_record(hasher: &mut Sha256, kind: u8, name: &str) -> io::Result<()> {
    hasher.write_all(&[kind])?;
    hasher.write_all(name.as_bytes())?;
    hasher.write_all(&[0])
}

#[cfg(unix)]
pub(crate) fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}
