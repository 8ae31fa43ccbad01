//! Delta codec using zstd dictionary compression
//!
//! The original file is used as a raw-content dictionary while compressing
//! the modified file. Small edits compress to little more than the frame
//! overhead, unrelated content compresses like any zstd stream.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Default zstd compression level
const COMPRESSION_LEVEL: i32 = 19;

/// Fixed per-patch overhead not counted against the size ratio
pub const PATCH_OVERHEAD: u64 = 130;

/// Largest accepted patch as a percentage of the modified file's size
pub const MAX_PATCH_PERCENT: u64 = 20;

/// Sizes involved in producing one patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchMetrics {
    pub original_size: u64,
    pub modified_size: u64,
    pub patch_size: u64,
}

impl PatchMetrics {
    /// Whether the patch is small enough to ship
    pub fn within_limit(&self) -> bool {
        patch_within_limit(self.patch_size, self.modified_size)
    }
}

/// Accept iff `patch_size - 130 <= modified_size * 0.2`.
///
/// Evaluated in integers so the boundary case is exact.
pub fn patch_within_limit(patch_size: u64, modified_size: u64) -> bool {
    let payload = patch_size.saturating_sub(PATCH_OVERHEAD) as u128;
    payload * 100 <= modified_size as u128 * MAX_PATCH_PERCENT as u128
}

/// Produce a delta that turns `original` into `modified`
pub fn diff_bytes(original: &[u8], modified: &[u8]) -> io::Result<Vec<u8>> {
    let dict = zstd::dict::EncoderDictionary::copy(original, COMPRESSION_LEVEL);
    let mut encoder = zstd::Encoder::with_prepared_dictionary(Vec::new(), &dict)?;
    encoder.write_all(modified)?;
    encoder.finish()
}

/// Reconstruct the modified content from `original` and a delta
pub fn apply_bytes(original: &[u8], patch: &[u8]) -> io::Result<Vec<u8>> {
    let dict = zstd::dict::DecoderDictionary::copy(original);
    let mut decoder = zstd::Decoder::with_prepared_dictionary(patch, &dict)?;
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Diff two files, writing the delta to `patch_path`
pub fn diff_files(original: &Path, modified: &Path, patch_path: &Path) -> Result<PatchMetrics> {
    let old_content =
        fs::read(original).with_context(|| format!("Failed to read {}", original.display()))?;
    let new_content =
        fs::read(modified).with_context(|| format!("Failed to read {}", modified.display()))?;

    let delta = diff_bytes(&old_content, &new_content)
        .with_context(|| format!("Failed to diff {}", modified.display()))?;

    crate::paths::ensure_parent_dirs(patch_path)?;
    let mut file = File::create(patch_path)
        .with_context(|| format!("Failed to create patch file {}", patch_path.display()))?;
    file.write_all(&delta)?;

    let metrics = PatchMetrics {
        original_size: old_content.len() as u64,
        modified_size: new_content.len() as u64,
        patch_size: delta.len() as u64,
    };

    debug!(
        "patch {}: {} bytes for {} -> {} bytes",
        patch_path.display(),
        metrics.patch_size,
        metrics.original_size,
        metrics.modified_size
    );

    Ok(metrics)
}

/// Apply `patch_path` to `original`, writing the result to `output`
pub fn apply_file(original: &Path, patch_path: &Path, output: &Path) -> Result<()> {
    let old_content =
        fs::read(original).with_context(|| format!("Failed to read {}", original.display()))?;
    let delta =
        fs::read(patch_path).with_context(|| format!("Failed to read {}", patch_path.display()))?;

    let new_content = apply_bytes(&old_content, &delta)
        .with_context(|| format!("Failed to apply {}", patch_path.display()))?;

    fs::write(output, &new_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_ini() -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..400 {
            out.extend_from_slice(format!("[Section{}]\nfValue{}=1.0000\nbEnabled=1\n", i, i).as_bytes());
        }
        out
    }

    #[test]
    fn test_size_guard_boundary() {
        // 1000 * 0.2 = 200, so 330 is the largest accepted patch
        assert!(patch_within_limit(330, 1000));
        assert!(!patch_within_limit(331, 1000));
        assert!(patch_within_limit(0, 0));
        assert!(patch_within_limit(130, 0));
        assert!(!patch_within_limit(131, 0));
    }

    #[test]
    fn test_small_edit_round_trip() {
        let original = sample_ini();
        let mut modified = original.clone();
        let pos = modified.len() / 2;
        modified[pos..pos + 6].copy_from_slice(b"9.9999");

        let patch = diff_bytes(&original, &modified).unwrap();
        let metrics = PatchMetrics {
            original_size: original.len() as u64,
            modified_size: modified.len() as u64,
            patch_size: patch.len() as u64,
        };
        assert!(metrics.within_limit());
        assert_eq!(apply_bytes(&original, &patch).unwrap(), modified);
    }

    #[test]
    fn test_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("orig.ini");
        let modified = tmp.path().join("mod.ini");
        let patch = tmp.path().join("patches").join("mod.ini.diff");
        let output = tmp.path().join("out.ini");

        let content = sample_ini();
        let mut edited = content.clone();
        edited.extend_from_slice(b"[Extra]\nbNew=1\n");
        fs::write(&original, &content).unwrap();
        fs::write(&modified, &edited).unwrap();

        let metrics = diff_files(&original, &modified, &patch).unwrap();
        assert_eq!(metrics.modified_size, edited.len() as u64);
        assert!(patch.exists());

        apply_file(&original, &patch, &output).unwrap();
        assert_eq!(fs::read(&output).unwrap(), edited);
    }
}
