//! Directory-tree helpers shared by context snapshots, promotion, and the
//! stage cache. Walks are sorted by file name so every traversal order is
//! reproducible.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Removes `dir` if present and recreates it empty.
pub(crate) fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)
}

/// Copies `src` to `dst`.
///
/// A directory source has its contents merged into `dst`; a file or symlink
/// source is written at `dst`. Symlinks are copied as links, never followed.
/// Returns every destination path written, in walk order.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    if !std::fs::symlink_metadata(src)?.is_dir() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copy_entry(src, dst)?;
        written.push(dst.to_path_buf());
        return Ok(written);
    }

    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            copy_entry(entry.path(), &target)?;
        }
        written.push(target);
    }
    Ok(written)
}

/// Moves everything under `staging` into `dst`, merging directories and
/// replacing files. Each top-level move is a rename.
pub(crate) fn merge_move(staging: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut entries = std::fs::read_dir(staging)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let from_is_dir = entry.file_type()?.is_dir();
        let to_meta = std::fs::symlink_metadata(&to);

        match to_meta {
            Ok(meta) if meta.is_dir() && from_is_dir => merge_move(&from, &to)?,
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(&to)?;
                std::fs::rename(&from, &to)?;
            }
            Ok(_) => {
                std::fs::remove_file(&to)?;
                std::fs::rename(&from, &to)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => std::fs::rename(&from, &to)?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Root-relative paths of every entry under `root`, sorted.
pub(crate) fn list_entries(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        out.push(relative.to_path_buf());
    }
    Ok(out)
}

fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = std::fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        if std::fs::symlink_metadata(dst).is_ok() {
            std::fs::remove_file(dst)?;
        }
        copy_symlink(src, dst)
    } else {
        std::fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_tree_merges_directory_contents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("a.txt"), "a").unwrap();
        std::fs::write(src.join("nested/b.txt"), "b").unwrap();
        let dst = tmp.path().join("dst");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("existing.txt"), "keep").unwrap();

        let written = copy_tree(&src, &dst).unwrap();

        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "a");
        assert_eq!(std::fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
        assert_eq!(std::fs::read_to_string(dst.join("existing.txt")).unwrap(), "keep");
        assert_eq!(
            written,
            vec![dst.join("a.txt"), dst.join("nested"), dst.join("nested/b.txt")]
        );
    }

    #[test]
    fn copy_tree_single_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f"), "x").unwrap();
        let dst = tmp.path().join("deep/er/f");

        copy_tree(&tmp.path().join("f"), &dst).unwrap();

        assert_eq!(std::fs::read_to_string(dst).unwrap(), "x");
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_keeps_directory_symlink_as_link() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret"), "s").unwrap();
        let link = tmp.path().join("project/shared");
        std::fs::create_dir_all(link.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(&outside, &link).unwrap();
        let dst = tmp.path().join("dst/shared");

        let written = copy_tree(&link, &dst).unwrap();

        assert_eq!(written, vec![dst.clone()]);
        assert!(std::fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&dst).unwrap(), outside);
    }

    #[test]
    fn merge_move_replaces_files_and_merges_dirs() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        let dst = tmp.path().join("dst");
        std::fs::create_dir_all(staging.join("dir")).unwrap();
        std::fs::create_dir_all(dst.join("dir")).unwrap();
        std::fs::write(staging.join("dir/new"), "new").unwrap();
        std::fs::write(staging.join("file"), "v2").unwrap();
        std::fs::write(dst.join("dir/old"), "old").unwrap();
        std::fs::write(dst.join("file"), "v1").unwrap();

        merge_move(&staging, &dst).unwrap();

        assert_eq!(std::fs::read_to_string(dst.join("file")).unwrap(), "v2");
        assert!(dst.join("dir/old").exists());
        assert!(dst.join("dir/new").exists());
    }

    #[test]
    fn list_entries_is_sorted_and_relative() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("b")).unwrap();
        std::fs::write(tmp.path().join("b/z"), "").unwrap();
        std::fs::write(tmp.path().join("a"), "").unwrap();

        let entries = list_entries(tmp.path()).unwrap();

        assert_eq!(
            entries,
            vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("b/z")]
        );
    }
}
