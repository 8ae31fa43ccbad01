//! Checksum verification of installed mods against their archives.
//!
//! Replicate installs ship a list of file hashes instead of any content,
//! which only works if every installed file is byte-identical to a file
//! in the original archive.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::host::ArchiveLister;
use super::types::FileHash;
use crate::archive::ArchiveEntry;
use crate::error::{CollectionError, Result};
use crate::hash::{compute_file_crc, compute_file_md5};
use crate::paths::list_files;

/// Outcome of comparing a mod folder against its archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Number of local files checked
    pub checked: usize,
    /// Local files whose CRC isn't in the archive
    pub mismatched: Vec<String>,
}

impl ChecksumReport {
    pub fn is_valid(&self) -> bool {
        self.mismatched.is_empty()
    }

    pub fn error_message(&self) -> Option<String> {
        if self.is_valid() {
            return None;
        }
        Some(format!(
            "{} of {} files differ from the archive",
            self.mismatched.len(),
            self.checked
        ))
    }
}

/// CRCs of all file entries of an archive listing
pub fn archive_checksums(entries: &[ArchiveEntry]) -> HashSet<String> {
    entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| e.crc.as_ref().map(|c| c.to_uppercase()))
        .collect()
}

/// CRC of every file below `mod_path`, as (relative path, crc)
pub fn local_checksums(mod_path: &Path) -> Result<Vec<(String, String)>> {
    if !mod_path.is_dir() {
        return Err(CollectionError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("mod folder not found: {}", mod_path.display()),
        )));
    }

    let files = list_files(mod_path)?;
    let checksums = files
        .par_iter()
        .map(|(rel, path)| compute_file_crc(path).map(|crc| (rel.clone(), crc)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(checksums)
}

/// Compare local checksums against the archive's
pub fn compare_checksums(archive: &HashSet<String>, local: &[(String, String)]) -> ChecksumReport {
    let mismatched = local
        .iter()
        .filter(|(_, crc)| !archive.contains(crc))
        .map(|(rel, _)| rel.clone())
        .collect();
    ChecksumReport {
        checked: local.len(),
        mismatched,
    }
}

/// Verify that every installed file of a mod exists unmodified in its archive.
///
/// Fails with [`CollectionError::ReplicateHashMismatch`] otherwise.
pub fn match_checksums(
    lister: &dyn ArchiveLister,
    archive_path: &Path,
    mod_path: &Path,
    mod_name: &str,
) -> Result<()> {
    let entries = lister.list(archive_path)?;
    let archive = archive_checksums(&entries);
    let local = local_checksums(mod_path)?;

    let report = compare_checksums(&archive, &local);
    if let Some(message) = report.error_message() {
        warn!("{}: {}", mod_name, message);
        for file in &report.mismatched {
            debug!("modified: {}", file);
        }
        return Err(CollectionError::ReplicateHashMismatch {
            mod_name: mod_name.to_string(),
            files: report.mismatched,
        });
    }

    info!("{}: all {} files match the archive", mod_name, report.checked);
    Ok(())
}

/// MD5 of every installed file, for the replicate file list
pub fn file_hashes(mod_path: &Path) -> Result<Vec<FileHash>> {
    let files = list_files(mod_path)?;
    let hashes = files
        .par_iter()
        .map(|(rel, path)| {
            compute_file_md5(path).map(|md5| FileHash {
                path: rel.clone(),
                md5,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::crc_from_buf;
    use std::fs;
    use tempfile::TempDir;

    struct FixedLister(Vec<ArchiveEntry>);

    impl ArchiveLister for FixedLister {
        fn list(&self, _archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
            Ok(self.0.clone())
        }
    }

    fn entry(path: &str, content: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            path: path.to_string(),
            size: content.len() as u64,
            is_dir: false,
            crc: Some(crc_from_buf(content)),
        }
    }

    fn mod_dir() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("meshes")).unwrap();
        fs::write(tmp.path().join("plugin.esp"), b"plugin").unwrap();
        fs::write(tmp.path().join("meshes").join("a.nif"), b"mesh").unwrap();
        tmp
    }

    #[test]
    fn test_matching_archive() {
        let tmp = mod_dir();
        let lister = FixedLister(vec![
            entry("plugin.esp", b"plugin"),
            entry("meshes/a.nif", b"mesh"),
            ArchiveEntry {
                path: "meshes".into(),
                size: 0,
                is_dir: true,
                crc: None,
            },
        ]);
        match_checksums(&lister, Path::new("x.7z"), tmp.path(), "Foo").unwrap();

        // hashing twice gives the same result
        assert_eq!(local_checksums(tmp.path()).unwrap(), local_checksums(tmp.path()).unwrap());
    }

    #[test]
    fn test_modified_file_is_a_mismatch() {
        let tmp = mod_dir();
        let lister = FixedLister(vec![entry("plugin.esp", b"plugin"), entry("meshes/a.nif", b"original mesh")]);
        let err = match_checksums(&lister, Path::new("x.7z"), tmp.path(), "Foo").unwrap_err();
        match err {
            CollectionError::ReplicateHashMismatch { mod_name, files } => {
                assert_eq!(mod_name, "Foo");
                assert_eq!(files, vec!["meshes/a.nif".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_missing_mod_folder() {
        let tmp = TempDir::new().unwrap();
        let err = local_checksums(&tmp.path().join("gone")).unwrap_err();
        assert!(matches!(err, CollectionError::Io(_)));
    }

    #[test]
    fn test_file_hashes() {
        let tmp = mod_dir();
        let hashes = file_hashes(tmp.path()).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].path, "meshes/a.nif");
        assert_eq!(hashes[1].md5, format!("{:x}", md5::compute(b"plugin")));
    }
}
