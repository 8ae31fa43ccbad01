//! Edit detection and patch application for installed mods.
//!
//! Creation side: compare every file a fresh install would produce against
//! what's on disk, and store a delta for each file that differs. The map
//! returned records, per destination path, the CRC of the unmodified file
//! so the delta is only ever applied to that exact baseline.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::delta::{apply_file, diff_files, PatchMetrics};
use crate::collection::host::InstallInstruction;
use crate::error::{CollectionError, Result};
use crate::hash::compute_file_crc;
use crate::paths::{join_windows_path, normalize_for_lookup, remove_dir_if_exists};

/// Extension appended to the destination path of each stored patch
pub const PATCH_EXTENSION: &str = ".diff";

/// What to do with a patch that exceeded the size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchDecision {
    /// Drop this file's edits and carry on
    Skip,
    /// Abort saving edits for the whole operation
    Abort,
}

/// Inputs for one mod's edit scan
pub struct DiffScan<'a> {
    /// Copy instructions of a simulated fresh install
    pub instructions: &'a [InstallInstruction],
    /// Where the simulated install extracted the original files
    pub simulated_root: &'a Path,
    /// Per-entry CRCs from the archive listing, keyed by normalized path
    pub source_crcs: &'a HashMap<String, String>,
    /// The mod's installed files
    pub mod_path: &'a Path,
    /// Output directory for `.diff` files
    pub dest_path: &'a Path,
}

/// Location of the patch for `destination` below `patches_dir`
pub fn patch_path_for(patches_dir: &Path, destination: &str) -> PathBuf {
    let mut path = join_windows_path(patches_dir, destination).into_os_string();
    path.push(PATCH_EXTENSION);
    PathBuf::from(path)
}

/// Build a CRC lookup table from archive listing entries
pub fn crc_table(entries: &[crate::archive::ArchiveEntry]) -> HashMap<String, String> {
    entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| e.crc.as_ref().map(|crc| (normalize_for_lookup(&e.path), crc.clone())))
        .collect()
}

/// Scan a mod for local edits and write a delta for each modified file.
///
/// `decide` is consulted whenever a delta is too large; the oversized patch
/// file is removed before asking. Choosing [`PatchDecision::Abort`] fails
/// with [`CollectionError::PatchTooLarge`].
pub fn scan_for_diffs(
    scan: &DiffScan<'_>,
    mut decide: impl FnMut(&str, &PatchMetrics) -> PatchDecision,
    mut on_progress: impl FnMut(&str),
) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();

    for file in scan.instructions {
        let installed = join_windows_path(scan.mod_path, &file.destination);
        if !installed.is_file() {
            debug!("skipping {}, no longer installed", file.destination);
            continue;
        }

        let original = join_windows_path(scan.simulated_root, &file.source);
        let src_crc = match scan.source_crcs.get(&normalize_for_lookup(&file.source)) {
            Some(crc) => crc.clone(),
            None => compute_file_crc(&original)?,
        };
        let dst_crc = compute_file_crc(&installed)?;

        if src_crc == dst_crc {
            continue;
        }

        on_progress(&file.source);
        debug!(
            "found modified file {} (source {}, local {})",
            file.source, src_crc, dst_crc
        );

        let patch_path = patch_path_for(scan.dest_path, &file.destination);
        let metrics = diff_files(&original, &installed, &patch_path)?;

        if metrics.within_limit() {
            debug!("patch created at {}", patch_path.display());
            result.insert(crate::paths::to_linux_path(&file.destination), src_crc);
            continue;
        }

        fs::remove_file(&patch_path)?;
        match decide(&file.source, &metrics) {
            PatchDecision::Skip => {
                info!("not saving edits of {}, patch too large", file.source);
            }
            PatchDecision::Abort => {
                return Err(CollectionError::PatchTooLarge {
                    file: file.source.clone(),
                    patch_size: metrics.patch_size,
                    file_size: metrics.modified_size,
                });
            }
        }
    }

    Ok(result)
}

/// Outcome of applying a mod's patch set
#[derive(Debug, Default)]
pub struct PatchReport {
    pub applied: Vec<String>,
    /// Files whose current CRC didn't match the recorded baseline
    pub skipped: Vec<String>,
    pub failed: Vec<(String, CollectionError)>,
}

impl PatchReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Apply stored patches to an installed mod.
///
/// Each file is only patched if its current CRC equals the recorded one.
/// Failures are collected per file, the remaining patches are still tried.
pub fn apply_patches(
    mod_path: &Path,
    patches_dir: &Path,
    patches: &BTreeMap<String, String>,
) -> PatchReport {
    let mut report = PatchReport::default();

    for (file_path, expected_crc) in patches {
        match apply_one(mod_path, patches_dir, file_path, expected_crc) {
            Ok(true) => {
                info!("patched {}", file_path);
                report.applied.push(file_path.clone());
            }
            Ok(false) => report.skipped.push(file_path.clone()),
            Err(e) => {
                warn!("failed to patch {}: {}", file_path, e);
                report.failed.push((file_path.clone(), e));
            }
        }
    }

    report
}

fn apply_one(mod_path: &Path, patches_dir: &Path, file_path: &str, expected_crc: &str) -> Result<bool> {
    let src_path = join_windows_path(mod_path, file_path);
    let diff_path = patch_path_for(patches_dir, file_path);

    if !diff_path.is_file() {
        return Err(CollectionError::MissingPatch(diff_path));
    }

    let src_crc = compute_file_crc(&src_path)?;
    if !src_crc.eq_ignore_ascii_case(expected_crc) {
        warn!(
            "patch not applied to {} because reference CRC differs ({} != {})",
            file_path, src_crc, expected_crc
        );
        return Ok(false);
    }

    let mut patched = src_path.clone().into_os_string();
    patched.push(".patched");
    let patched = PathBuf::from(patched);

    if let Err(e) = apply_file(&src_path, &diff_path, &patched) {
        let _ = fs::remove_file(&patched);
        return Err(e.into());
    }
    fs::remove_file(&src_path)?;
    fs::rename(&patched, &src_path)?;
    Ok(true)
}

/// Reset the patches folder of one mod before a new scan
pub fn clear_patch_dir(dest_path: &Path) -> Result<()> {
    remove_dir_if_exists(dest_path)?;
    fs::create_dir_all(dest_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        simulated: PathBuf,
        installed: PathBuf,
        patches: PathBuf,
        instructions: Vec<InstallInstruction>,
    }

    fn fixture(edited: &[u8]) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let simulated = tmp.path().join("sim");
        let installed = tmp.path().join("mod");
        let patches = tmp.path().join("patches");
        fs::create_dir_all(simulated.join("SKSE")).unwrap();
        fs::create_dir_all(installed.join("SKSE")).unwrap();

        fs::write(simulated.join("SKSE").join("plugin.ini"), original_ini()).unwrap();
        fs::write(installed.join("SKSE").join("plugin.ini"), edited).unwrap();
        fs::write(simulated.join("readme.txt"), b"same").unwrap();
        fs::write(installed.join("readme.txt"), b"same").unwrap();

        Fixture {
            _tmp: tmp,
            simulated,
            installed,
            patches,
            instructions: vec![
                InstallInstruction::copy("SKSE\\plugin.ini", "SKSE\\plugin.ini"),
                InstallInstruction::copy("readme.txt", "readme.txt"),
            ],
        }
    }

    fn original_ini() -> Vec<u8> {
        (0..4000u32).flat_map(|i| format!("line {}\n", i).into_bytes()).collect()
    }

    #[test]
    fn test_scan_then_apply_restores_edit() {
        let mut edited = original_ini();
        edited.extend_from_slice(b"bMyTweak=1\n");
        let fx = fixture(&edited);
        let crcs = HashMap::new();

        let scan = DiffScan {
            instructions: &fx.instructions,
            simulated_root: &fx.simulated,
            source_crcs: &crcs,
            mod_path: &fx.installed,
            dest_path: &fx.patches,
        };
        let patches = scan_for_diffs(&scan, |_, _| PatchDecision::Abort, |_| {}).unwrap();

        assert_eq!(patches.len(), 1);
        let baseline = crate::hash::crc_from_buf(&original_ini());
        assert_eq!(patches.get("SKSE/plugin.ini"), Some(&baseline));
        assert!(patch_path_for(&fx.patches, "SKSE/plugin.ini").is_file());

        // a fresh install puts the original back, then the patch is replayed
        let target = fx.installed.join("SKSE").join("plugin.ini");
        fs::write(&target, original_ini()).unwrap();
        let report = apply_patches(&fx.installed, &fx.patches, &patches);
        assert!(report.is_clean());
        assert_eq!(fs::read(&target).unwrap(), edited);
    }

    #[test]
    fn test_oversized_patch_skip_and_abort() {
        // xorshift noise doesn't compress, with or without the dictionary
        let mut state = 0x2545_f491_u32;
        let unrelated: Vec<u8> = (0..20000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        let fx = fixture(&unrelated);
        let crcs = HashMap::new();
        let scan = DiffScan {
            instructions: &fx.instructions,
            simulated_root: &fx.simulated,
            source_crcs: &crcs,
            mod_path: &fx.installed,
            dest_path: &fx.patches,
        };

        let mut asked = 0;
        let skipped = scan_for_diffs(
            &scan,
            |_, _| {
                asked += 1;
                PatchDecision::Skip
            },
            |_| {},
        )
        .unwrap();
        assert_eq!(asked, 1);
        assert!(skipped.is_empty());
        assert!(!patch_path_for(&fx.patches, "SKSE/plugin.ini").exists());

        let err = scan_for_diffs(&scan, |_, _| PatchDecision::Abort, |_| {}).unwrap_err();
        assert!(matches!(err, CollectionError::PatchTooLarge { .. }));
        assert!(!err.may_ignore());
    }

    #[test]
    fn test_apply_skips_wrong_baseline_and_reports_missing_patch() {
        let tmp = TempDir::new().unwrap();
        let mod_path = tmp.path().join("mod");
        let patches_dir = tmp.path().join("patches");
        fs::create_dir_all(&mod_path).unwrap();
        fs::create_dir_all(&patches_dir).unwrap();
        fs::write(mod_path.join("a.ini"), b"updated upstream").unwrap();
        fs::write(mod_path.join("b.ini"), b"whatever").unwrap();
        fs::write(patch_path_for(&patches_dir, "a.ini"), b"not used").unwrap();

        let mut patches = BTreeMap::new();
        patches.insert("a.ini".to_string(), "DEADBEEF".to_string());
        patches.insert("b.ini".to_string(), crate::hash::crc_from_buf(b"whatever"));

        let report = apply_patches(&mod_path, &patches_dir, &patches);
        assert_eq!(report.skipped, vec!["a.ini".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, CollectionError::MissingPatch(_)));
        assert_eq!(fs::read(mod_path.join("a.ini")).unwrap(), b"updated upstream");
    }
}
