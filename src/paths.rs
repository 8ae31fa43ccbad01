//! Path handling for collection staging.
//!
//! Archive listings and install instructions use Windows-style paths with
//! backslashes and are case-insensitive. This module handles:
//! - Converting `\` to `/` and back into archive-relative strings
//! - Case-insensitive lookups keyed by normalized paths
//! - File-name sanitisation for generated folder names
//! - Whole-tree copy and size accounting for bundled mods

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Convert Windows path separators to Linux
/// `Data\Textures\armor.dds` -> `Data/Textures/armor.dds`
pub fn to_linux_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for lookups and comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Render a relative filesystem path the way archives and manifests store it
pub fn to_archive_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a base path with a Windows-style relative path
pub fn join_windows_path(base: &Path, relative: &str) -> PathBuf {
    base.join(to_linux_path(relative))
}

/// Make a string safe to use as a single path component.
///
/// Characters that are invalid on Windows are replaced with `_`, trailing
/// dots and spaces are dropped.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    replaced.trim_end_matches(['.', ' ']).to_string()
}

/// Create parent directories for a path if they don't exist
pub fn ensure_parent_dirs(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// All regular files below `root`, as (archive-style relative path, absolute path).
///
/// Sorted by relative path so results are stable across runs.
pub fn list_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        files.push((to_archive_path(rel), entry.path().to_path_buf()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

/// Copy the contents of `src` into `dst` recursively. Returns the bytes copied.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut total = 0u64;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            ensure_parent_dirs(&target)?;
            total += fs::copy(entry.path(), &target)?;
        }
    }

    Ok(total)
}

/// Summed size of all regular files below `root`. A missing directory counts as empty.
pub fn tree_size(root: &Path) -> io::Result<u64> {
    if !root.exists() {
        return Ok(0);
    }
    let mut total = 0u64;
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(total)
}

/// Remove a directory tree, treating "not found" as success
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_to_linux_path() {
        assert_eq!(to_linux_path("Data\\Textures\\armor.dds"), "Data/Textures/armor.dds");
        assert_eq!(to_linux_path("mixed\\path/style"), "mixed/path/style");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_for_lookup("Data\\Textures\\Armor.dds"), "data/textures/armor.dds");
        assert_eq!(normalize_for_lookup("/MESHES/Actor/"), "meshes/actor");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Cool Mod: Remastered v1.0"), "Cool Mod_ Remastered v1.0");
        assert_eq!(sanitize_filename("a/b\\c?"), "a_b_c_");
        assert_eq!(sanitize_filename("trailing. "), "trailing");
    }

    #[test]
    fn test_copy_tree_and_size() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("meshes")).unwrap();
        fs::write(src.join("plugin.esp"), vec![0u8; 100]).unwrap();
        fs::write(src.join("meshes").join("a.nif"), vec![1u8; 23]).unwrap();

        let dst = tmp.path().join("dst");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 123);
        assert_eq!(tree_size(&dst).unwrap(), 123);
        assert_eq!(tree_size(&tmp.path().join("missing")).unwrap(), 0);

        let files: Vec<String> = list_files(&dst).unwrap().into_iter().map(|f| f.0).collect();
        assert_eq!(files, vec!["meshes/a.nif", "plugin.esp"]);
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let tmp = TempDir::new().unwrap();
        assert!(remove_dir_if_exists(&tmp.path().join("nope")).is_ok());
    }
}
