//! Hash utilities for collection packaging.
//!
//! Two checksums are in play:
//! - CRC32, formatted as 8 uppercase hex digits, compared against the
//!   per-entry CRC reported by archive listings. Used to detect local
//!   edits relative to the original archive.
//! - MD5 (lowercase hex), used as the content-addressable identity of
//!   archives and for replicate-mode file lists.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const READ_CHUNK: usize = 1024 * 1024;

/// Format a CRC32 value the way archive listings report it.
///
/// `0x1a2b` -> `"00001A2B"`
pub fn format_crc(crc: u32) -> String {
    format!("{:08X}", crc)
}

/// Compute the CRC32 of a buffer.
pub fn crc_from_buf(data: &[u8]) -> String {
    format_crc(crc32fast::hash(data))
}

/// Compute the CRC32 of a file.
///
/// Uses streaming to handle large files without loading into memory.
pub fn compute_file_crc(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut hasher = crc32fast::Hasher::new();

    loop {
        let bytes_read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buf[..bytes_read]);
    }

    Ok(format_crc(hasher.finalize()))
}

/// Compute the MD5 of a file as lowercase hex.
pub fn compute_file_md5(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(READ_CHUNK, file);
    let mut context = md5::Context::new();

    let mut buffer = [0u8; 65536];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// MD5 of a string, used to derive stable keys from free text.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}
