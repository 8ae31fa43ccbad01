//! Binary patches for locally edited mod files.
//!
//! - [`delta`]: zstd-dictionary delta codec and the patch size guard
//! - [`scan`]: detect edits against a simulated fresh install, apply stored patches

pub mod delta;
pub mod scan;

pub use delta::{
    apply_bytes, apply_file, diff_bytes, diff_files, patch_within_limit, PatchMetrics,
    MAX_PATCH_PERCENT, PATCH_OVERHEAD,
};
pub use scan::{
    apply_patches, clear_patch_dir, crc_table, patch_path_for, scan_for_diffs, DiffScan,
    PatchDecision, PatchReport, PATCH_EXTENSION,
};
