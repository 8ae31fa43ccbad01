//! Local mod state: mods, their attributes, rules and references.
//!
//! Mods are keyed by local ids that mean nothing on another machine.
//! Rules point at other mods through a [`ModReference`], a weak descriptor
//! that is resolved against the local mod table at use time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{FileHash, SourceInfo, SourceType, COLLECTION_MOD_TYPE};

/// Relation expressed by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Requires,
    Recommends,
    Before,
    After,
    Conflicts,
    Provides,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Requires => "requires",
            RuleType::Recommends => "recommends",
            RuleType::Before => "before",
            RuleType::After => "after",
            RuleType::Conflicts => "conflicts",
            RuleType::Provides => "provides",
        }
    }

    /// `requires`/`recommends` express membership, not ordering
    pub fn is_dependency(&self) -> bool {
        matches!(self, RuleType::Requires | RuleType::Recommends)
    }
}

/// How a member is installed on the consumer's system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Run the installer normally
    #[default]
    Fresh,
    /// Replay the curator's installer choices
    Choices,
    /// Replicate the curator's exact file list
    Clone,
}

/// Repository coordinates of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoInfo {
    pub repository: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,

    pub mod_id: String,

    pub file_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<String>,
}

/// Weak, content-addressable pointer to a mod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModReference {
    /// Local mod id, only meaningful on this machine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_hint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,

    #[serde(rename = "fileMD5", skip_serializing_if = "Option::is_none")]
    pub file_md5: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_file_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_expression: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_match: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoInfo>,

    /// Checksum of the file the curator used, for fuzzy references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5_hint: Option<String>,
}

/// One way of identifying a mod, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCriteria<'a> {
    Checksum(&'a str),
    LogicalName(&'a str),
    Expression(&'a str),
    Repository { mod_id: &'a str, file_id: &'a str },
    Tag(&'a str),
}

impl ModReference {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Cross-system criteria this reference carries, highest priority first
    pub fn criteria(&self) -> Vec<MatchCriteria<'_>> {
        let mut out = Vec::new();
        if let Some(md5) = self.file_md5.as_deref() {
            out.push(MatchCriteria::Checksum(md5));
        }
        if let Some(name) = self.logical_file_name.as_deref() {
            out.push(MatchCriteria::LogicalName(name));
        }
        if let Some(expr) = self.file_expression.as_deref() {
            out.push(MatchCriteria::Expression(expr));
        }
        if let Some(repo) = &self.repo {
            out.push(MatchCriteria::Repository {
                mod_id: &repo.mod_id,
                file_id: &repo.file_id,
            });
        }
        if let Some(tag) = self.tag.as_deref() {
            out.push(MatchCriteria::Tag(tag));
        }
        out
    }

    /// Whether any of checksum, logical name, expression or repository id is set.
    ///
    /// References without one of these can't be matched on another system.
    pub fn is_usable(&self) -> bool {
        self.criteria()
            .iter()
            .any(|c| !matches!(c, MatchCriteria::Tag(_)))
    }

    /// Whether checksum, logical name and expression are all absent
    pub fn lacks_content_markers(&self) -> bool {
        self.file_md5.is_none() && self.logical_file_name.is_none() && self.file_expression.is_none()
    }

    /// Copy without the local-only fields
    pub fn portable(&self) -> Self {
        Self {
            id: None,
            id_hint: None,
            archive_id: None,
            ..self.clone()
        }
    }
}

/// Download hint attached to imported rules of non-repository mods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    pub mode: SourceType,
}

/// Extra data carried by a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleExtra {
    /// Rule was added by importing a collection, not by the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patches: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_overrides: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mod_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Path of a bundled mod inside the collection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

/// A directed edge from a mod to a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,

    pub reference: ModReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_list: Option<Vec<FileHash>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_choices: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_hint: Option<DownloadHint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<RuleExtra>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignored: bool,
}

impl Rule {
    pub fn new(rule_type: RuleType, reference: ModReference) -> Self {
        Self {
            rule_type,
            reference,
            file_list: None,
            installer_choices: None,
            download_hint: None,
            extra: None,
            comment: None,
            ignored: false,
        }
    }

    /// Rule was introduced by a collection import
    pub fn is_automatic(&self) -> bool {
        self.extra
            .as_ref()
            .and_then(|e| e.automatic)
            .unwrap_or(false)
    }

    /// Install phase recorded on the rule, 0 if none
    pub fn phase(&self) -> u32 {
        self.extra.as_ref().and_then(|e| e.phase).unwrap_or(0)
    }
}

/// A numeric id stored either as number or as string.
///
/// Anything that isn't a positive integer counts as missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    pub fn as_u64(&self) -> Option<u64> {
        let value = match self {
            RawId::Number(n) => u64::try_from(*n).ok()?,
            RawId::Text(s) => s.trim().parse::<u64>().ok()?,
        };
        (value != 0).then_some(value)
    }
}

impl From<u64> for RawId {
    fn from(value: u64) -> Self {
        RawId::Number(value as i64)
    }
}

/// Per-member configuration of a collection container, keyed by local mod id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionAttributes {
    #[serde(default)]
    pub install_mode: BTreeMap<String, InstallMode>,

    #[serde(default)]
    pub instructions: BTreeMap<String, String>,

    #[serde(default)]
    pub source: BTreeMap<String, SourceInfo>,

    #[serde(default)]
    pub save_edits: BTreeMap<String, bool>,

    #[serde(default)]
    pub file_overrides: BTreeMap<String, bool>,

    /// Rule id -> enabled
    #[serde(default)]
    pub rule: BTreeMap<String, bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_instructions: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommend_new_profile: Option<bool>,
}

impl CollectionAttributes {
    pub fn install_mode_of(&self, mod_id: &str) -> InstallMode {
        self.install_mode.get(mod_id).copied().unwrap_or_default()
    }

    pub fn source_type_of(&self, mod_id: &str) -> SourceType {
        self.source
            .get(mod_id)
            .map(|s| s.source_type)
            .unwrap_or_default()
    }

    pub fn is_bundled(&self, mod_id: &str) -> bool {
        self.source_type_of(mod_id) == SourceType::Bundle
    }

    pub fn saves_edits(&self, mod_id: &str) -> bool {
        self.save_edits.get(mod_id).copied().unwrap_or(false)
    }

    pub fn overrides_files(&self, mod_id: &str) -> bool {
        self.file_overrides.get(mod_id).copied().unwrap_or(false)
    }

    /// Instructions for a member, empty strings count as none
    pub fn instructions_of(&self, mod_id: &str) -> Option<String> {
        self.instructions
            .get(mod_id)
            .filter(|s| !s.is_empty())
            .cloned()
    }

    pub fn rule_enabled(&self, rule_id: &str) -> bool {
        self.rule.get(rule_id).copied().unwrap_or(true)
    }
}

/// Attributes of a mod. Every field is optional, defaults live in the accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_file_name: Option<String>,

    /// Name of the archive the mod was installed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(rename = "fileMD5", default, skip_serializing_if = "Option::is_none")]
    pub file_md5: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Where the mod came from ("nexus", "user-generated", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mod_id: Option<RawId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<RawId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<RawId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<RawId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_number: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_slug: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_choices: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader_id: Option<u64>,

    /// Remote permission keys granted to the current user
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,

    #[serde(rename = "authorURL", default, skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,

    /// Game the download belongs to, if not the managed game
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_game: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<CollectionAttributes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_time: Option<String>,

    /// Produced by a tool on the user's machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<bool>,

    /// Correlation tag assigned when installed from a collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommend_new_profile: Option<bool>,
}

/// Permission key allowing edits of a remote collection
pub const EDIT_PERMISSION: &str = "collection:edit";

impl ModAttributes {
    /// Version, "1.0.0" when unknown
    pub fn version_or_default(&self) -> String {
        self.version.clone().unwrap_or_else(|| "1.0.0".to_string())
    }

    pub fn is_nexus_sourced(&self) -> bool {
        self.source.as_deref() == Some("nexus")
    }

    pub fn is_generated(&self) -> bool {
        self.generated.unwrap_or(false)
    }

    pub fn is_editable(&self) -> bool {
        self.editable.unwrap_or(false)
    }

    pub fn has_edit_permission(&self) -> bool {
        self.permissions.iter().any(|p| p == EDIT_PERMISSION)
    }

    /// Uploader, falling back to author
    pub fn uploader_or_author(&self) -> Option<&str> {
        self.uploader.as_deref().or(self.author.as_deref())
    }

    /// Collection config block, empty when never configured
    pub fn collection_or_default(&self) -> CollectionAttributes {
        self.collection.clone().unwrap_or_default()
    }

    pub fn recommend_new_profile(&self) -> bool {
        self.recommend_new_profile.unwrap_or(false)
    }
}

/// A locally installed mod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mod {
    pub id: String,

    #[serde(rename = "type", default)]
    pub mod_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_id: Option<String>,

    /// Folder below the staging directory
    #[serde(default)]
    pub installation_path: String,

    #[serde(default)]
    pub attributes: ModAttributes,

    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_overrides: Vec<String>,

    #[serde(rename = "enabledINITweaks", default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_ini_tweaks: Vec<String>,
}

impl Mod {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            installation_path: id.clone(),
            id,
            ..Self::default()
        }
    }

    /// Whether this mod is a collection container
    pub fn is_collection(&self) -> bool {
        self.mod_type == COLLECTION_MOD_TYPE
    }

    /// Repository mod id; containers track a collection id instead
    pub fn repo_mod_id(&self) -> Option<u64> {
        let raw = if self.is_collection() {
            &self.attributes.collection_id
        } else {
            &self.attributes.mod_id
        };
        raw.as_ref().and_then(RawId::as_u64)
    }

    /// Repository file id; containers track a revision id instead
    pub fn repo_file_id(&self) -> Option<u64> {
        let raw = if self.is_collection() {
            &self.attributes.revision_id
        } else {
            &self.attributes.file_id
        };
        raw.as_ref().and_then(RawId::as_u64)
    }

    /// Display name: custom name, logical name, name, then id
    pub fn display_name(&self) -> &str {
        let a = &self.attributes;
        a.custom_file_name
            .as_deref()
            .or(a.logical_file_name.as_deref())
            .or(a.name.as_deref())
            .unwrap_or(&self.id)
    }

    /// Display name with the version appended, if known
    pub fn display_name_with_version(&self) -> String {
        match self.attributes.version.as_deref() {
            Some(v) if !v.is_empty() => format!("{} (v{})", self.display_name(), v),
            _ => self.display_name().to_string(),
        }
    }
}
