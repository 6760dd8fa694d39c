use std::path::{Path, PathBuf};

use crate::digest::{ContentDigest, digest_tree};

/// Paths stagecraft always excludes from the build context,
/// regardless of .stagecraftignore content.
const STAGECRAFT_EXCLUDES: &[&str] = &[".stagecraft", ".git"];

/// Optional gitignore-syntax file listing further context exclusions.
pub const IGNORE_FILE: &str = ".stagecraftignore";

/// The project source tree as stages see it.
///
/// Every stage that needs source files copies them from here; nothing reads
/// the project directory directly.
#[derive(Debug, Clone)]
pub struct BuildContext {
    root: PathBuf,
    excludes: Vec<PathBuf>,
}

impl BuildContext {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            excludes: STAGECRAFT_EXCLUDES.iter().map(PathBuf::from).collect(),
        }
    }

    /// Excludes an additional root-relative path (e.g. a configured cache dir).
    pub fn exclude(mut self, relative: &str) -> Self {
        self.excludes.push(PathBuf::from(relative));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All files in the context, relative to its root, sorted.
    pub fn files(&self) -> Result<Vec<PathBuf>, ContextError> {
        let excluded: Vec<PathBuf> = self.excludes.iter().map(|e| self.root.join(e)).collect();

        let walker = ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| !excluded.iter().any(|ex| entry.path().starts_with(ex)))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| ContextError::Walk {
                root: self.root.clone(),
                source: e,
            })?;
            let is_file = entry
                .file_type()
                .is_some_and(|t| t.is_file() || t.is_symlink());
            if !is_file {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| ContextError::OutsideRoot {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
            files.push(relative.to_path_buf());
        }
        Ok(files)
    }

    /// Files selected by `paths`; an empty selection means the whole context.
    /// Directories select every context file beneath them.
    pub fn select(&self, paths: &[String]) -> Result<Vec<PathBuf>, ContextError> {
        let files = self.files()?;
        if paths.is_empty() {
            return Ok(files);
        }

        let mut selected = Vec::new();
        for path in paths {
            let wanted = stagecraft_core::pipeline::relative_path(path)?;
            if !self.root.join(&wanted).exists() {
                return Err(ContextError::MissingPath {
                    path: self.root.join(&wanted),
                });
            }
            selected.extend(files.iter().filter(|f| f.starts_with(&wanted)).cloned());
        }
        selected.sort();
        selected.dedup();
        Ok(selected)
    }

    /// Copies the selected files into `dest`, returning the paths written.
    pub fn copy_into(&self, paths: &[String], dest: &Path) -> Result<Vec<PathBuf>, ContextError> {
        let mut written = Vec::new();
        for relative in self.select(paths)? {
            let src = self.root.join(&relative);
            let dst = dest.join(&relative);
            written.extend(
                crate::tree::copy_tree(&src, &dst)
                    .map_err(|e| ContextError::CopyFile { path: src, source: e })?,
            );
        }
        Ok(written)
    }

    /// Content digest over the selected files' paths and contents.
    pub fn digest(&self, paths: &[String]) -> Result<ContentDigest, ContextError> {
        let mut material = String::new();
        for relative in self.select(paths)? {
            let path = self.root.join(&relative);
            let digest =
                digest_tree(&path).map_err(|e| ContextError::Read { path, source: e })?;
            material.push_str(&relative.to_string_lossy());
            material.push('\0');
            material.push_str(digest.as_str());
            material.push('\n');
        }
        Ok(ContentDigest::of_bytes(material.as_bytes()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to walk build context {root}")]
    Walk {
        root: PathBuf,
        source: ignore::Error,
    },
    #[error("context path {path} escapes the context root")]
    OutsideRoot {
        path: PathBuf,
        source: std::path::StripPrefixError,
    },
    #[error("context path {path} does not exist")]
    MissingPath { path: PathBuf },
    #[error(transparent)]
    InvalidPath(#[from] stagecraft_core::Error),
    #[error("failed to copy context file {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read context file {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}
