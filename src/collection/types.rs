//! Type definitions for the portable collection manifest.
//!
//! These types map to the `collection.json` file stored at the root of an
//! exported collection archive. Everything in here is keyed by portable
//! references, never by local mod ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{ModReference, RuleType};

/// Name of the manifest inside a collection archive
pub const MANIFEST_FILE: &str = "collection.json";
/// Folder holding bundled mods
pub const BUNDLED_PATH: &str = "bundled";
/// Folder holding binary patches, one subfolder per mod
pub const PATCHES_PATH: &str = "patches";
/// Folder holding INI tweaks
pub const INI_TWEAKS_PATH: &str = "INI Tweaks";
/// Mod type marking a collection container
pub const COLLECTION_MOD_TYPE: &str = "collection";

/// How a consumer re-acquires a mod's archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Download from the Nexus Mods repository by mod/file id
    #[default]
    Nexus,
    /// Open a website, user downloads manually
    Browse,
    /// Direct download from a URL
    Direct,
    /// Shipped inside the collection archive
    Bundle,
    /// User acquires the file by following instructions
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Nexus => "nexus",
            SourceType::Browse => "browse",
            SourceType::Direct => "direct",
            SourceType::Bundle => "bundle",
            SourceType::Manual => "manual",
        }
    }

    /// Types that require a URL
    pub fn needs_url(&self) -> bool {
        matches!(self, SourceType::Browse | SourceType::Direct)
    }

    /// Types that are turned into a download hint on import
    pub fn is_download_hint(&self) -> bool {
        matches!(self, SourceType::Browse | SourceType::Direct | SourceType::Manual)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which versions of a mod a consumer accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePolicy {
    /// Only the exact file
    Exact,
    /// The exact file if still available, newer otherwise
    Prefer,
    /// Always the newest
    Latest,
}

/// Source descriptor of one collection member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    #[serde(rename = "type", default)]
    pub source_type: SourceType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// MD5 of the original archive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_filename: Option<String>,

    /// Fallback pattern matched against file names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_expression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

    /// Correlation tag linking rules to this entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adult_content: Option<bool>,
}

impl SourceInfo {
    pub fn of_type(source_type: SourceType) -> Self {
        Self {
            source_type,
            ..Self::default()
        }
    }
}

/// A (relative path, md5) pair recorded for replicate installs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub path: String,
    pub md5: String,
}

/// Mod details/metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mod_type: Option<String>,
}

/// A mod entry in a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMod {
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub domain_name: String,

    pub source: SourceInfo,

    /// Replicate install: every installed file with its md5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Vec<FileHash>>,

    /// Installer choices to replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Value>,

    /// Saved edits: destination path -> CRC of the unmodified file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patches: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ModDetails>,

    /// Installation phase, lower phases are installed first
    #[serde(default)]
    pub phase: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_overrides: Option<Vec<String>>,
}

/// Collection info/metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    #[serde(default)]
    pub author: String,

    #[serde(rename = "authorUrl", default)]
    pub author_url: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub install_instructions: String,

    /// The Nexus Mods domain for this game (e.g., "skyrimspecialedition").
    #[serde(default)]
    pub domain_name: String,

    #[serde(default)]
    pub game_versions: Vec<String>,
}

/// A rule between two members, both sides given as portable references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionModRule {
    pub source: ModReference,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    pub reference: ModReference,
}

/// Per-member settings, keyed by portable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModSettings {
    pub reference: ModReference,
    pub install_mode: super::model::InstallMode,
    pub save_edits: bool,
    pub source_type: SourceType,
    pub phase: u32,
}

/// Collection-wide configuration stored with the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    #[serde(default)]
    pub recommend_new_profile: bool,

    #[serde(default)]
    pub mod_settings: Vec<ModSettings>,

    /// Ids of rules the curator switched off
    #[serde(default)]
    pub disabled_rules: Vec<String>,
}

/// The portable collection manifest.
///
/// Game- and extension-specific payloads land as additional top-level keys
/// between `modRules` and `collectionConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub info: CollectionInfo,

    #[serde(default)]
    pub mods: Vec<CollectionMod>,

    #[serde(default)]
    pub mod_rules: Vec<CollectionModRule>,

    #[serde(flatten)]
    pub extras: serde_json::Map<String, Value>,

    #[serde(default)]
    pub collection_config: CollectionConfig,
}

impl Manifest {
    /// Parses a manifest from JSON bytes.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Serialize as 2-space indented JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns the number of mods in the collection.
    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }

    /// Plugins contributed by the game extension, if any
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.extras
            .get("plugins")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Plugin (ESP/ESM/ESL) entry contributed by the Gamebryo extension.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PluginInfo {
    /// Plugin filename (e.g., "MyMod.esp").
    pub name: String,

    /// Whether the plugin is enabled.
    #[serde(default)]
    pub enabled: bool,
}
