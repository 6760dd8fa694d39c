//! Runtime image export.
//!
//! The terminal stage's root is written as a deterministic tar archive
//! (`image.tar`) plus a JSON description (`image.json`). Entries are sorted,
//! modes normalized to 0755/0644, mtimes pinned to `SOURCE_DATE_EPOCH` (or 0),
//! and ownership taken from the stage's ownership ledger. Paths the ledger
//! does not know about (implicit parent directories) belong to the runtime
//! identity. Any privileged owner aborts the export before a byte is written.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stagecraft_core::Stage;

use crate::digest::{ContentDigest, digest_file};
use crate::ownership::Ownership;
use crate::stage::StageRoot;

pub const ARCHIVE_FILE: &str = "image.tar";
pub const CONFIG_FILE: &str = "image.json";
/// Archive being written. Renamed to [`ARCHIVE_FILE`] only once the config is on disk.
const PARTIAL_ARCHIVE_FILE: &str = "image.tar.partial";

const DEFAULT_TIMESTAMP: u64 = 0;
const SOURCE_DATE_EPOCH_VAR: &str = "SOURCE_DATE_EPOCH";

/// Timestamp applied to every archive entry.
pub fn source_date_epoch() -> u64 {
    let Some(value) = std::env::var_os(SOURCE_DATE_EPOCH_VAR) else {
        return DEFAULT_TIMESTAMP;
    };
    let value = value.to_string_lossy();
    match value.trim().parse::<u64>() {
        Ok(timestamp) => timestamp,
        Err(e) => {
            tracing::warn!(value = %value, error = %e, "ignoring invalid SOURCE_DATE_EPOCH");
            DEFAULT_TIMESTAMP
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// One entry of the exported filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    /// Absolute path inside the image.
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub uid: u32,
    pub gid: u32,
}

/// Contents of `image.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub base: String,
    pub user: String,
    pub uid: u32,
    pub group: String,
    pub gid: u32,
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    pub entrypoint: Vec<String>,
    /// Always empty: port exposure is left to the deployment platform.
    pub exposed_ports: Vec<u16>,
    pub created: u64,
    pub archive: String,
    pub archive_digest: String,
    pub files: Vec<ImageFile>,
}

/// Paths of a written image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub archive: PathBuf,
    pub config: PathBuf,
    pub digest: ContentDigest,
    pub entries: usize,
}

/// Removes a previously exported image from `output_dir`, if any.
pub fn clear(output_dir: &Path) -> Result<(), ExportError> {
    for name in [ARCHIVE_FILE, PARTIAL_ARCHIVE_FILE, CONFIG_FILE] {
        let path = output_dir.join(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| ExportError::Io { path, source: e })?;
        }
    }
    Ok(())
}

struct PlannedEntry<'a> {
    relative: PathBuf,
    host: PathBuf,
    owner: &'a Ownership,
    meta: std::fs::Metadata,
}

/// Writes `root` as the runtime image for `stage` into `output_dir`.
pub fn export_image(
    stage: &Stage,
    root: &StageRoot,
    output_dir: &Path,
    timestamp: u64,
) -> Result<ImageArtifact, ExportError> {
    let identity = stage
        .final_user()
        .ok_or_else(|| ExportError::NoRuntimeUser {
            stage: stage.name.clone(),
        })?;
    let default_owner = Ownership::from(identity);
    let rootfs = root.rootfs();
    let io_error = |path: &Path, e: std::io::Error| ExportError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    let mut planned = Vec::new();
    for relative in crate::tree::list_entries(&rootfs).map_err(|e| io_error(&rootfs, e))? {
        let owner = match root.ledger().owner_of(&relative) {
            Some(owner) => owner,
            None => &default_owner,
        };
        if owner.is_privileged() {
            return Err(ExportError::PrivilegedEntry {
                path: format!("/{}", relative.display()),
                user: owner.user.clone(),
            });
        }
        let host = rootfs.join(&relative);
        let meta = std::fs::symlink_metadata(&host).map_err(|e| io_error(&host, e))?;
        planned.push(PlannedEntry {
            relative,
            host,
            owner,
            meta,
        });
    }

    std::fs::create_dir_all(output_dir).map_err(|e| io_error(output_dir, e))?;
    let archive_path = output_dir.join(ARCHIVE_FILE);
    let partial = output_dir.join(PARTIAL_ARCHIVE_FILE);

    let file = File::create(&partial).map_err(|e| io_error(&partial, e))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);

    let mut files = Vec::with_capacity(planned.len());
    for entry in &planned {
        files.push(append_entry(&mut builder, entry, timestamp).map_err(|e| io_error(&entry.host, e))?);
    }
    builder
        .into_inner()
        .and_then(|file| file.sync_all())
        .map_err(|e| io_error(&partial, e))?;

    let digest = digest_file(&partial).map_err(|e| io_error(&partial, e))?;
    let config = ImageConfig {
        base: stage.base.clone(),
        user: identity.user.clone(),
        uid: identity.uid,
        group: identity.group.clone(),
        gid: identity.gid,
        workdir: stage.workdir.clone(),
        env: stage.env.clone(),
        // arch-lint: allow(no-silent-result-drop) reason="Pipeline::validate rejects a terminal stage without an entrypoint"
        entrypoint: stage.entrypoint.clone().unwrap_or_default(),
        exposed_ports: Vec::new(),
        created: timestamp,
        archive: ARCHIVE_FILE.to_owned(),
        archive_digest: digest.to_string(),
        files,
    };
    let config_path = output_dir.join(CONFIG_FILE);
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ExportError::Serialize { source: e })?;
    std::fs::write(&config_path, json + "\n").map_err(|e| io_error(&config_path, e))?;

    if let Err(e) = std::fs::rename(&partial, &archive_path) {
        if let Err(cleanup) = std::fs::remove_file(&config_path) {
            tracing::warn!(
                path = %config_path.display(),
                error = %cleanup,
                "could not remove image config for unpublished archive"
            );
        }
        return Err(io_error(&archive_path, e));
    }

    tracing::info!(
        archive = %archive_path.display(),
        digest = %digest,
        entries = planned.len(),
        user = %identity.user,
        "exported runtime image"
    );

    Ok(ImageArtifact {
        archive: archive_path,
        config: config_path,
        digest,
        entries: planned.len(),
    })
}

fn append_entry(
    builder: &mut tar::Builder<File>,
    entry: &PlannedEntry<'_>,
    timestamp: u64,
) -> std::io::Result<ImageFile> {
    let image_path = format!("/{}", entry.relative.display());
    let file_type = entry.meta.file_type();

    if file_type.is_dir() {
        let mut header = header(tar::EntryType::Directory, 0, 0o755, entry.owner, timestamp)?;
        let tar_path = format!("{}/", entry.relative.display());
        builder.append_data(&mut header, tar_path, std::io::empty())?;
        Ok(record(image_path, EntryKind::Directory, 0o755, 0, None, None, entry.owner))
    } else if file_type.is_symlink() {
        let target = std::fs::read_link(&entry.host)?;
        let mut header = header(tar::EntryType::Symlink, 0, 0o777, entry.owner, timestamp)?;
        builder.append_link(&mut header, &entry.relative, &target)?;
        let target = Some(target.to_string_lossy().into_owned());
        Ok(record(image_path, EntryKind::Symlink, 0o777, 0, None, target, entry.owner))
    } else {
        let mode = if crate::digest::is_executable(&entry.meta) {
            0o755
        } else {
            0o644
        };
        let size = entry.meta.len();
        let sha256 = digest_file(&entry.host)?;
        let mut header = header(tar::EntryType::Regular, size, mode, entry.owner, timestamp)?;
        let file = File::open(&entry.host)?;
        builder.append_data(&mut header, &entry.relative, file)?;
        let sha256 = Some(sha256.hex().to_owned());
        Ok(record(image_path, EntryKind::File, mode, size, sha256, None, entry.owner))
    }
}

fn header(
    kind: tar::EntryType,
    size: u64,
    mode: u32,
    owner: &Ownership,
    timestamp: u64,
) -> std::io::Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(timestamp);
    header.set_uid(u64::from(owner.uid));
    header.set_gid(u64::from(owner.gid));
    header.set_username(&owner.user)?;
    header.set_groupname(&owner.group)?;
    header.set_device_major(0)?;
    header.set_device_minor(0)?;
    Ok(header)
}

fn record(
    path: String,
    kind: EntryKind,
    mode: u32,
    size: u64,
    sha256: Option<String>,
    target: Option<String>,
    owner: &Ownership,
) -> ImageFile {
    ImageFile {
        path,
        kind,
        mode,
        size,
        sha256,
        target,
        uid: owner.uid,
        gid: owner.gid,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("stage '{stage}' does not switch to a non-root user")]
    NoRuntimeUser { stage: String },

    #[error("refusing to export {path}: owned by privileged user '{user}'")]
    PrivilegedEntry { path: String, user: String },

    #[error("failed to write image entry {path}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize image config")]
    Serialize { source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecraft_core::{Identity, Step};
    use tempfile::TempDir;

    fn runtime_stage() -> Stage {
        let mut stage = Stage::new("runner", "node:20-alpine", "/app");
        stage.steps.push(Step::CreateIdentity(Identity {
            user: "app".to_owned(),
            uid: 1001,
            group: "app".to_owned(),
            gid: 1001,
        }));
        stage.steps.push(Step::SwitchUser {
            user: "app".to_owned(),
        });
        stage.entrypoint = Some(vec!["node".to_owned(), "server.js".to_owned()]);
        stage
    }

    fn populated_root(work: &Path) -> StageRoot {
        let root = StageRoot::create(work, "runner").unwrap();
        std::fs::create_dir_all(root.rootfs().join("app/public")).unwrap();
        std::fs::write(root.rootfs().join("app/server.js"), "listen()").unwrap();
        std::fs::write(root.rootfs().join("app/public/robots.txt"), "User-agent: *").unwrap();
        root
    }

    #[test]
    fn unrecorded_entries_belong_to_runtime_identity() {
        let tmp = TempDir::new().unwrap();
        let root = populated_root(&tmp.path().join("work"));
        let out = tmp.path().join("out");

        let artifact = export_image(&runtime_stage(), &root, &out, 0).unwrap();

        let mut archive = tar::Archive::new(File::open(&artifact.archive).unwrap());
        let mut paths = Vec::new();
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            assert_eq!(entry.header().uid().unwrap(), 1001);
            assert_eq!(entry.header().gid().unwrap(), 1001);
            assert_eq!(entry.header().mtime().unwrap(), 0);
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            paths.push(path.trim_end_matches('/').to_owned());
        }
        assert_eq!(
            paths,
            vec!["app", "app/public", "app/public/robots.txt", "app/server.js"]
        );
        assert_eq!(artifact.entries, 4);
    }

    #[test]
    fn privileged_ledger_entry_aborts_before_writing() {
        let tmp = TempDir::new().unwrap();
        let mut root = populated_root(&tmp.path().join("work"));
        root.ledger
            .record(Path::new("app/server.js"), &Ownership::root());
        let out = tmp.path().join("out");

        let err = export_image(&runtime_stage(), &root, &out, 0).unwrap_err();

        assert!(matches!(err, ExportError::PrivilegedEntry { ref path, .. } if path == "/app/server.js"));
        assert!(!out.join(ARCHIVE_FILE).exists());
    }

    #[test]
    fn config_describes_runtime() {
        let tmp = TempDir::new().unwrap();
        let root = populated_root(&tmp.path().join("work"));
        let out = tmp.path().join("out");

        let artifact = export_image(&runtime_stage(), &root, &out, 1_700_000_000).unwrap();
        let config: ImageConfig =
            serde_json::from_str(&std::fs::read_to_string(&artifact.config).unwrap()).unwrap();

        assert_eq!(config.user, "app");
        assert_eq!(config.uid, 1001);
        assert_eq!(config.entrypoint, vec!["node", "server.js"]);
        assert!(config.exposed_ports.is_empty());
        assert_eq!(config.created, 1_700_000_000);
        assert_eq!(config.archive_digest, artifact.digest.to_string());
        let server = config
            .files
            .iter()
            .find(|f| f.path == "/app/server.js")
            .unwrap();
        assert_eq!(server.kind, EntryKind::File);
        assert_eq!(server.size, 8);
        assert_eq!(server.mode, 0o644);
    }

    #[test]
    fn clear_removes_interrupted_export() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        for name in [ARCHIVE_FILE, PARTIAL_ARCHIVE_FILE, CONFIG_FILE] {
            std::fs::write(out.join(name), "stale").unwrap();
        }

        clear(&out).unwrap();

        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn failed_config_write_publishes_no_archive() {
        let tmp = TempDir::new().unwrap();
        let root = populated_root(&tmp.path().join("work"));
        let out = tmp.path().join("out");
        std::fs::create_dir_all(out.join(CONFIG_FILE)).unwrap();

        let err = export_image(&runtime_stage(), &root, &out, 0).unwrap_err();

        assert!(matches!(err, ExportError::Io { ref path, .. } if path.ends_with(CONFIG_FILE)));
        assert!(!out.join(ARCHIVE_FILE).exists());
    }

    #[test]
    fn export_without_runtime_user_fails() {
        let tmp = TempDir::new().unwrap();
        let root = populated_root(&tmp.path().join("work"));
        let stage = Stage::new("runner", "node:20-alpine", "/app");

        let err = export_image(&stage, &root, &tmp.path().join("out"), 0).unwrap_err();

        assert!(matches!(err, ExportError::NoRuntimeUser { .. }));
    }
}
