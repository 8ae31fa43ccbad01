//! Archive listing, extraction and packing.
//!
//! ZIP archives are handled natively through the `zip` crate (its central
//! directory carries a CRC32 per entry). Everything else goes through the
//! 7z binary, whose technical listing also reports per-entry CRCs.
//!
//! # 7z Commands Reference
//!
//! - List files: `7zz l -slt -ba archive.7z`
//!   - `-slt`: Technical listing (key=value format, includes `CRC = XXXXXXXX`)
//!   - `-ba`: Bare output (no headers)
//!
//! - Extract all to directory: `7zz x -y -aoa -o/output/dir archive.7z`
//!
//! - Pack a directory: `7zz a -y archive.7z dir/*`

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

/// Archive type detected by magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// ZIP archive (PK signature)
    Zip,
    /// 7z archive (7z signature)
    SevenZ,
    /// RAR archive (Rar! signature)
    Rar,
    /// Unknown/unsupported format
    Unknown,
}

/// Detect archive type by reading magic bytes.
///
/// Uses magic bytes rather than the file extension so mislabeled
/// archives (e.g. a `.zip` that's actually a RAR file) still work.
pub fn detect_archive_type(path: &Path) -> Result<ArchiveType> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut magic = [0u8; 8];
    let bytes_read = file.read(&mut magic).unwrap_or(0);

    if bytes_read < 4 {
        return Ok(ArchiveType::Unknown);
    }

    if magic[0..2] == [0x50, 0x4B] {
        return Ok(ArchiveType::Zip);
    }

    if magic[0..4] == [0x52, 0x61, 0x72, 0x21] {
        return Ok(ArchiveType::Rar);
    }

    if bytes_read >= 6 && magic[0..6] == [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C] {
        return Ok(ArchiveType::SevenZ);
    }

    Ok(ArchiveType::Unknown)
}

/// Information about an entry in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path within the archive (forward slashes, case-preserved)
    pub path: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// Whether this is a directory
    pub is_dir: bool,
    /// CRC32 as 8 uppercase hex digits, if the format records one
    pub crc: Option<String>,
}

/// Get the path to the 7z binary.
///
/// Looks next to the executable first (`bin/7zz`, `bin/7z.exe`), then on PATH.
pub fn get_7z_path() -> Result<PathBuf> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            for candidate in ["bin/7zz", "bin/7z.exe", "7zz"] {
                let bin_path = exe_dir.join(candidate);
                if bin_path.exists() {
                    return Ok(bin_path);
                }
            }
        }
    }

    for name in ["7zz", "7z"] {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    bail!("7z binary not found. Please install p7zip or place 7zz in the bin/ directory.")
}

/// List all entries of an archive, including directories.
pub fn list_archive(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    if detect_archive_type(archive_path)? == ArchiveType::Zip {
        return list_zip(archive_path);
    }

    let sz_path = get_7z_path()?;

    let output = Command::new(&sz_path)
        .arg("l")
        .arg("-slt")
        .arg("-ba")
        .arg("-scsUTF-8")
        .arg(archive_path)
        .output()
        .with_context(|| format!("Failed to run 7z list on {}", archive_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("7z list failed: {}", stderr);
    }

    parse_7z_list(&output.stdout)
}

/// List a ZIP archive natively.
pub fn list_zip(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read zip {}", archive_path.display()))?;

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let is_dir = entry.is_dir();
        entries.push(ArchiveEntry {
            path: entry.name().trim_end_matches('/').to_string(),
            size: entry.size(),
            is_dir,
            crc: if is_dir {
                None
            } else {
                Some(crate::hash::format_crc(entry.crc32()))
            },
        });
    }

    Ok(entries)
}

/// Parse 7z technical listing output into ArchiveEntry structs.
fn parse_7z_list(output: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    for line in BufReader::new(output).lines() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            if let Some(entry) = entry_from_fields(&current) {
                entries.push(entry);
            }
            current.clear();
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        } else if let Some(key) = line.strip_suffix(" =") {
            current.insert(key.to_string(), String::new());
        }
    }

    // Handle last entry if no trailing newline
    if let Some(entry) = entry_from_fields(&current) {
        entries.push(entry);
    }

    Ok(entries)
}

fn entry_from_fields(fields: &HashMap<String, String>) -> Option<ArchiveEntry> {
    let path = fields.get("Path").filter(|p| !p.is_empty())?;
    let is_dir = fields.get("Folder").map(|v| v == "+").unwrap_or(false)
        || fields
            .get("Attributes")
            .map(|a| a.starts_with('D'))
            .unwrap_or(false);
    let size = fields
        .get("Size")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let crc = fields
        .get("CRC")
        .filter(|c| !c.is_empty())
        .map(|c| c.to_uppercase());

    Some(ArchiveEntry {
        path: path.replace('\\', "/"),
        size,
        is_dir,
        crc,
    })
}

/// Extract all files from an archive to a directory.
///
/// Returns the number of files extracted.
pub fn extract_all(archive_path: &Path, output_dir: &Path) -> Result<usize> {
    fs::create_dir_all(output_dir)?;

    if detect_archive_type(archive_path)? == ArchiveType::Zip {
        let file = File::open(archive_path)
            .with_context(|| format!("Failed to open {}", archive_path.display()))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
        zip.extract(output_dir)
            .with_context(|| format!("Failed to extract {}", archive_path.display()))?;
    } else {
        let sz_path = get_7z_path()?;
        let output = Command::new(&sz_path)
            .arg("x")
            .arg("-y")
            .arg("-aoa")
            .arg("-scsUTF-8")
            .arg(format!("-o{}", output_dir.display()))
            .arg(archive_path)
            .output()
            .with_context(|| format!("Failed to extract {}", archive_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "7z extract all failed for {}: {}",
                archive_path.display(),
                stderr
            );
        }
    }

    let count = walkdir::WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();

    Ok(count)
}

/// Pack the contents of `source_dir` (not the directory itself) into an archive.
///
/// The format follows the extension of `archive_path`: `.zip` is written
/// natively, anything else is handed to the 7z binary.
pub fn compress_dir(source_dir: &Path, archive_path: &Path) -> Result<()> {
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let is_zip = archive_path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);

    if is_zip {
        return zip_dir(source_dir, archive_path);
    }

    let sz_path = get_7z_path()?;
    let mut cmd = Command::new(&sz_path);
    cmd.arg("a").arg("-y").arg("-scsUTF-8").arg(archive_path);
    for entry in fs::read_dir(source_dir)
        .with_context(|| format!("Failed to read {}", source_dir.display()))?
    {
        cmd.arg(entry?.path());
    }

    let output = cmd
        .output()
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("7z add failed for {}: {}", archive_path.display(), stderr);
    }

    Ok(())
}

fn zip_dir(source_dir: &Path, archive_path: &Path) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in walkdir::WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .context("walked outside of source directory")?;
        let name = crate::paths::to_archive_path(rel);

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else {
            writer.start_file(name, options)?;
            let data = fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            writer.write_all(&data)?;
        }
    }

    writer.finish()?;
    debug!("packed {} into {}", source_dir.display(), archive_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_7z_list_with_crc() {
        let listing = b"Path = textures\nFolder = +\nSize = 0\n\n\
Path = textures\\armor.dds\nFolder = -\nSize = 1024\nCRC = 1a2b3c4d\n\n\
Path = readme.txt\nFolder = -\nSize = 12\nCRC = 0000ABCD\n";

        let entries = parse_7z_list(listing).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].crc, None);
        assert_eq!(entries[1].path, "textures/armor.dds");
        assert_eq!(entries[1].crc.as_deref(), Some("1A2B3C4D"));
        assert_eq!(entries[2].size, 12);
    }

    #[test]
    fn test_zip_pack_list_extract() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("sub").join("b.txt"), b"beta").unwrap();

        let archive = tmp.path().join("out.zip");
        compress_dir(&src, &archive).unwrap();
        assert_eq!(detect_archive_type(&archive).unwrap(), ArchiveType::Zip);

        let entries = list_archive(&archive).unwrap();
        let file = entries.iter().find(|e| e.path == "sub/b.txt").unwrap();
        assert_eq!(file.crc.as_deref(), Some(crate::hash::crc_from_buf(b"beta").as_str()));
        assert!(entries.iter().any(|e| e.path == "sub" && e.is_dir));

        let out = tmp.path().join("extracted");
        assert_eq!(extract_all(&archive, &out).unwrap(), 2);
        assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"alpha");
    }
}
