//! In-memory view of one game's installed mods and downloaded archives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::model::{MatchCriteria, Mod, ModReference};
use super::version::version_matches;

/// A downloaded archive a mod was installed from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub id: String,
    /// Path relative to the game's downloads directory
    pub local_path: String,
    pub game: String,
    pub file_md5: Option<String>,
    pub size: Option<u64>,
}

/// Mods and archives of a single game
#[derive(Debug, Clone, Default)]
pub struct ModTable {
    pub game_id: String,
    pub mods: BTreeMap<String, Mod>,
    pub archives: BTreeMap<String, ArchiveInfo>,
}

impl ModTable {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, m: Mod) {
        self.mods.insert(m.id.clone(), m);
    }

    pub fn insert_archive(&mut self, archive: ArchiveInfo) {
        self.archives.insert(archive.id.clone(), archive);
    }

    pub fn get(&self, mod_id: &str) -> Option<&Mod> {
        self.mods.get(mod_id)
    }

    pub fn get_mut(&mut self, mod_id: &str) -> Option<&mut Mod> {
        self.mods.get_mut(mod_id)
    }

    /// Resolve a reference to an installed mod.
    ///
    /// A local id wins. Otherwise each criterion is tried in priority order
    /// (checksum, logical name, expression, repository id, tag) and the
    /// first mod matching it is returned.
    pub fn find_by_reference(&self, reference: &ModReference) -> Option<&Mod> {
        if let Some(id) = reference.id.as_deref() {
            return self.mods.get(id);
        }

        if let Some(hint) = reference.id_hint.as_deref() {
            if let Some(m) = self.mods.get(hint) {
                if reference_matches(m, reference) {
                    return Some(m);
                }
            }
        }

        reference.criteria().into_iter().find_map(|criteria| {
            self.mods
                .values()
                .find(|m| criteria_match(m, criteria, reference.version_match.as_deref()))
        })
    }

    pub fn archive_of(&self, m: &Mod) -> Option<&ArchiveInfo> {
        m.archive_id.as_deref().and_then(|id| self.archives.get(id))
    }

    /// Absolute path of the archive a mod was installed from
    pub fn archive_path(&self, m: &Mod, downloads_dir: &Path) -> Option<PathBuf> {
        self.archive_of(m)
            .filter(|a| !a.local_path.is_empty())
            .map(|a| downloads_dir.join(&a.local_path))
    }

    /// Human readable name of whatever a reference points at
    pub fn render_reference(&self, reference: &ModReference) -> String {
        if let Some(m) = self.find_by_reference(reference) {
            return m.display_name_with_version();
        }
        reference
            .description
            .clone()
            .or_else(|| reference.logical_file_name.clone())
            .or_else(|| reference.file_expression.clone())
            .or_else(|| reference.id.clone())
            .or_else(|| reference.file_md5.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Whether `m` is a mod `reference` could point at
pub fn reference_matches(m: &Mod, reference: &ModReference) -> bool {
    if let Some(id) = reference.id.as_deref() {
        return m.id == id;
    }
    reference
        .criteria()
        .into_iter()
        .any(|c| criteria_match(m, c, reference.version_match.as_deref()))
}

fn criteria_match(m: &Mod, criteria: MatchCriteria<'_>, version_match: Option<&str>) -> bool {
    let a = &m.attributes;
    let hit = match criteria {
        MatchCriteria::Checksum(md5) => {
            return a
                .file_md5
                .as_deref()
                .is_some_and(|own| own.eq_ignore_ascii_case(md5));
        }
        MatchCriteria::LogicalName(name) => a.logical_file_name.as_deref() == Some(name),
        MatchCriteria::Expression(expr) => expression_matches(m, expr),
        MatchCriteria::Repository { mod_id, file_id } => {
            let own_mod = m.repo_mod_id().map(|id| id.to_string());
            let own_file = m.repo_file_id().map(|id| id.to_string());
            own_mod.as_deref() == Some(mod_id) && own_file.as_deref() == Some(file_id)
        }
        MatchCriteria::Tag(tag) => a.reference_tag.as_deref() == Some(tag),
    };

    // the checksum pins an exact file, everything else needs the version check
    hit && match (version_match, a.version.as_deref()) {
        (Some(vm), Some(version)) => version_matches(vm, version),
        _ => true,
    }
}

fn expression_matches(m: &Mod, expr: &str) -> bool {
    let Some(re) = glob_to_regex(expr) else {
        return false;
    };
    let a = &m.attributes;
    let file_stem = a
        .file_name
        .as_deref()
        .map(|f| Path::new(f).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());

    let candidates = [
        file_stem.as_deref(),
        a.file_name.as_deref(),
        a.logical_file_name.as_deref(),
        a.name.as_deref(),
        Some(m.installation_path.as_str()),
    ];
    let found = candidates.into_iter().flatten().any(|candidate| re.is_match(candidate));
    found
}

/// Case-insensitive, anchored regex for a `*`/`?` glob
fn glob_to_regex(expr: &str) -> Option<regex::Regex> {
    let mut pattern = String::from("(?i)^");
    for ch in expr.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    regex::Regex::new(&pattern).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::model::{RawId, RepoInfo};

    fn table() -> ModTable {
        let mut t = ModTable::new("skyrimse");

        let mut a = Mod::new("a");
        a.attributes.file_md5 = Some("AAAA".into());
        a.attributes.logical_file_name = Some("SkyUI".into());
        a.attributes.version = Some("5.2".into());
        a.attributes.mod_id = Some(RawId::Number(12604));
        a.attributes.file_id = Some(RawId::Number(35407));
        a.archive_id = Some("arch-a".into());
        t.insert(a);

        let mut b = Mod::new("b");
        b.attributes.file_name = Some("Super Mod v2.7z".into());
        b.attributes.version = Some("2.0".into());
        b.attributes.reference_tag = Some("tag-b".into());
        t.insert(b);

        t.insert_archive(ArchiveInfo {
            id: "arch-a".into(),
            local_path: "SkyUI_5_2.7z".into(),
            game: "skyrimse".into(),
            ..ArchiveInfo::default()
        });
        t
    }

    #[test]
    fn test_resolution_priority() {
        let t = table();

        let by_md5 = ModReference {
            file_md5: Some("aaaa".into()),
            logical_file_name: Some("nonexistent".into()),
            ..ModReference::default()
        };
        assert_eq!(t.find_by_reference(&by_md5).map(|m| m.id.as_str()), Some("a"));

        let by_expr = ModReference {
            file_expression: Some("super mod*".into()),
            ..ModReference::default()
        };
        assert_eq!(t.find_by_reference(&by_expr).map(|m| m.id.as_str()), Some("b"));

        let by_repo = ModReference {
            repo: Some(RepoInfo {
                repository: "nexus".into(),
                mod_id: "12604".into(),
                file_id: "35407".into(),
                ..RepoInfo::default()
            }),
            ..ModReference::default()
        };
        assert_eq!(t.find_by_reference(&by_repo).map(|m| m.id.as_str()), Some("a"));

        let by_tag = ModReference {
            tag: Some("tag-b".into()),
            ..ModReference::default()
        };
        assert_eq!(t.find_by_reference(&by_tag).map(|m| m.id.as_str()), Some("b"));
    }

    #[test]
    fn test_version_mismatch_doesnt_resolve() {
        let t = table();
        let reference = ModReference {
            logical_file_name: Some("SkyUI".into()),
            version_match: Some("6.0.0".into()),
            ..ModReference::default()
        };
        assert!(t.find_by_reference(&reference).is_none());

        let fuzzy = ModReference {
            version_match: Some("*".into()),
            ..reference
        };
        assert!(t.find_by_reference(&fuzzy).is_some());
    }

    #[test]
    fn test_local_id_and_archive_path() {
        let t = table();
        assert!(t.find_by_reference(&ModReference::by_id("missing")).is_none());
        let a = t.find_by_reference(&ModReference::by_id("a")).unwrap();
        assert_eq!(
            t.archive_path(a, Path::new("/dl")),
            Some(PathBuf::from("/dl/SkyUI_5_2.7z"))
        );
        assert_eq!(t.render_reference(&ModReference::by_id("a")), "SkyUI (v5.2)");
    }

    #[test]
    fn test_expression_matches_file_stem() {
        let t = table();
        let stem = ModReference {
            file_expression: Some("Super Mod v?".into()),
            ..ModReference::default()
        };
        assert_eq!(t.find_by_reference(&stem).map(|m| m.id.as_str()), Some("b"));

        let miss = ModReference {
            file_expression: Some("Other*".into()),
            ..ModReference::default()
        };
        assert!(t.find_by_reference(&miss).is_none());
    }
}
