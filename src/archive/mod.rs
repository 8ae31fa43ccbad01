//! Archive handling utilities.
//!
//! Listing (with per-entry CRC), extraction and packing. ZIP is handled
//! natively by the zip crate, other formats by the 7z binary.

pub mod sevenzip;

pub use sevenzip::{
    compress_dir, detect_archive_type, extract_all, get_7z_path, list_archive, ArchiveEntry,
    ArchiveType,
};
