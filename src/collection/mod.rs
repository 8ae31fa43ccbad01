//! Collection export pipeline.
//!
//! A collection is a container mod whose `requires`/`recommends` rules name
//! its members. Exporting turns the container and the local state of its
//! members into a portable `collection.json` plus bundled files and binary
//! patches, packed into a single archive:
//!
//! - [`packager`] turns one member into a manifest entry
//! - [`rules`] translates rules between local and portable references
//! - [`assembler`] drives export, update, upload, clone and import
//!
//! # Example
//!
//! ```no_run
//! use collpack::collection::load_manifest;
//!
//! let manifest = load_manifest(std::path::Path::new("collection.json")).unwrap();
//! println!("Collection: {}", manifest.info.name);
//! println!("Mods: {}", manifest.mod_count());
//! ```

pub mod assembler;
pub mod diagnostics;
pub mod extension;
pub mod host;
pub mod model;
pub mod packager;
pub mod progress;
pub mod remote;
pub mod rules;
pub mod source;
pub mod store;
pub mod table;
pub mod types;
pub mod verify;
pub mod version;

#[cfg(test)]
pub mod test_support;

pub use assembler::{Assembler, ExportOutcome, ExportPhase, Identity};
pub use host::{AutoPrompter, CloneChoice, Prompter, Services};
pub use model::{InstallMode, Mod, ModReference, Rule, RuleType};
pub use progress::{CancelToken, ProgressFn, ProgressUpdate};
pub use store::{ModStore, Profile};
pub use table::ModTable;
pub use types::{CollectionInfo, CollectionMod, Manifest, SourceType, UpdatePolicy};

use anyhow::{Context, Result};
use std::path::Path;

/// Loads a manifest from a `collection.json` file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read collection file: {}", path.display()))?;

    Manifest::from_json(&content)
        .with_context(|| format!("Failed to parse collection JSON: {}", path.display()))
}

/// Loads the manifest inside an exported collection archive.
pub fn load_manifest_from_archive(archive_path: &Path) -> Result<Manifest> {
    let temp = tempfile::TempDir::new().context("Failed to create temp directory")?;
    crate::archive::extract_all(archive_path, temp.path())
        .with_context(|| format!("Failed to extract {}", archive_path.display()))?;
    load_manifest(&temp.path().join(types::MANIFEST_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("collection.json");
        std::fs::write(
            &path,
            r#"{"info":{"name":"Test","domainName":"skyrimspecialedition"},"mods":[],"plugins":[]}"#,
        )
        .unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.info.name, "Test");
        assert_eq!(manifest.mod_count(), 0);
        assert!(manifest.extras.contains_key("plugins"));
    }

    #[test]
    fn test_load_manifest_errors_name_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing.json");
        let err = load_manifest(&path).unwrap_err();
        assert!(format!("{}", err).contains("missing.json"));
    }
}
