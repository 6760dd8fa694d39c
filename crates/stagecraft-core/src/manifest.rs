//! Dependency manifest and lockfile discovery.
//!
//! The lockfile table is evaluated top-down and the first variant whose file
//! is present wins. No variant present is fatal; there is no fallback to an
//! unlocked install.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::{LockfileVariant, StagecraftConfig};

/// A discovered manifest plus the lockfile variant that governs its install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Manifest file name relative to the project root
    pub file: String,
    /// `name` from the manifest, if declared
    pub name: Option<String>,
    /// `version` from the manifest, if declared
    pub version: Option<String>,
    pub lockfile: LockfileVariant,
}

#[derive(Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
}

impl Manifest {
    /// Reads the manifest and selects the lockfile variant for `project_dir`.
    pub fn discover(project_dir: &Path, config: &StagecraftConfig) -> crate::Result<Self> {
        let manifest_path = project_dir.join(&config.project.manifest);
        if !manifest_path.is_file() {
            return Err(crate::Error::ManifestNotFound {
                path: manifest_path,
            });
        }

        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| crate::Error::ManifestRead {
                path: manifest_path.clone(),
                source: e,
            })?;
        let parsed: PackageJson =
            serde_json::from_str(&content).map_err(|e| crate::Error::ManifestParse {
                path: manifest_path.clone(),
                source: e,
            })?;

        let lockfile = detect_lockfile(project_dir, &config.deps.lockfiles)?.clone();
        tracing::debug!(
            variant = %lockfile.name,
            file = %lockfile.file,
            "lockfile detected"
        );

        Ok(Self {
            file: config.project.manifest.clone(),
            name: parsed.name,
            version: parsed.version,
            lockfile,
        })
    }

    /// Name for the built image: `[project].name`, else the manifest's
    /// `name`, else the project directory's name.
    pub fn image_name(&self, config: &StagecraftConfig, project_dir: &Path) -> String {
        if let Some(name) = config.project.name.as_ref().or(self.name.as_ref()) {
            return name.clone();
        }
        let dir = match project_dir.canonicalize() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::debug!(error = %e, "could not resolve project directory");
                project_dir.to_path_buf()
            }
        };
        match dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => "app".to_owned(),
        }
    }

    /// Files the dependency stage needs from the build context.
    pub fn inputs(&self) -> Vec<String> {
        vec![self.file.clone(), self.lockfile.file.clone()]
    }
}

/// Returns the first variant whose lockfile exists in `dir`.
pub fn detect_lockfile<'a>(
    dir: &Path,
    variants: &'a [LockfileVariant],
) -> crate::Result<&'a LockfileVariant> {
    variants
        .iter()
        .find(|variant| dir.join(&variant.file).is_file())
        .ok_or_else(|| crate::Error::ManifestMissing {
            dir: PathBuf::from(dir),
            expected: variants.iter().map(|v| v.file.clone()).collect(),
        })
}
