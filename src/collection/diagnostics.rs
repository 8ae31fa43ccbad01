//! Validation of per-member settings.
//!
//! Findings are informational: they are reported alongside the export but
//! never stop it. The one fatal case (replicate with modified files) is
//! detected by the packager itself.

use serde::Serialize;
use serde_json::Value;

use super::model::{CollectionAttributes, InstallMode, Mod, Rule};
use super::rules::ResolvedMember;
use super::types::SourceType;
use super::version::{is_loose, PREFER_SUFFIX};
use crate::error::{PackagingError, PackagingErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    InvalidIds,
    ReplicateFuzzyVersion,
    ChoicesFuzzyVersion,
    BundledFuzzyVersion,
    WebFuzzyVersion,
    WebUrlMissing,
    BundleCopyright,
    DirectDownload,
    InstallerChoicesNotSaved,
    NoVersionSet,
    LocalEditsFuzzyVersion,
    LocalEditsBundle,
    ReplicateVsBinpatch,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidIds => "invalid-ids",
            DiagnosticKind::ReplicateFuzzyVersion => "replicate-fuzzy-version",
            DiagnosticKind::ChoicesFuzzyVersion => "choices-fuzzy-version",
            DiagnosticKind::BundledFuzzyVersion => "bundled-fuzzy-version",
            DiagnosticKind::WebFuzzyVersion => "web-fuzzy-version",
            DiagnosticKind::WebUrlMissing => "web-url-missing",
            DiagnosticKind::BundleCopyright => "bundle-copyright",
            DiagnosticKind::DirectDownload => "direct-download",
            DiagnosticKind::InstallerChoicesNotSaved => "installer-choices-not-saved",
            DiagnosticKind::NoVersionSet => "no-version-set",
            DiagnosticKind::LocalEditsFuzzyVersion => "local-edits-fuzzy-version",
            DiagnosticKind::LocalEditsBundle => "local-edits-bundle",
            DiagnosticKind::ReplicateVsBinpatch => "replicate-vs-binpatch",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidIds => "Missing file identifiers",
            DiagnosticKind::ReplicateFuzzyVersion => "\"Replicate\" requires an exact version",
            DiagnosticKind::ChoicesFuzzyVersion => "Installer choices shouldn't be used with the latest version",
            DiagnosticKind::BundledFuzzyVersion => "Version choice has no effect on a bundled mod",
            DiagnosticKind::WebFuzzyVersion => "Version choice has no effect on generic downloads",
            DiagnosticKind::WebUrlMissing => "No URL set",
            DiagnosticKind::BundleCopyright => "Only bundle mods you have the right to distribute",
            DiagnosticKind::DirectDownload => "Verify the site allows direct downloads",
            DiagnosticKind::InstallerChoicesNotSaved => "No installer options saved for this mod",
            DiagnosticKind::NoVersionSet => "No version set for this mod",
            DiagnosticKind::LocalEditsFuzzyVersion => "Version choice incompatible with saving local edits",
            DiagnosticKind::LocalEditsBundle => "Saving edits of a bundled mod is pointless",
            DiagnosticKind::ReplicateVsBinpatch => "\"Replicate\" can't be combined with saving edits",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DiagnosticKind::InvalidIds => {
                "With Nexus Mods as the source both the mod id and the file id have to be known. \
                 They may be missing if the mod wasn't downloaded through the mod manager."
            }
            DiagnosticKind::ReplicateFuzzyVersion => {
                "A replicate install only works for one specific version of a mod and will \
                 break as soon as the mod gets updated."
            }
            DiagnosticKind::ChoicesFuzzyVersion => {
                "Replaying installer choices may break once the mod gets updated, preferring \
                 the exact version is safer."
            }
            DiagnosticKind::BundledFuzzyVersion => {
                "Users get exactly the bundled version of the mod, the version selection is \
                 ignored."
            }
            DiagnosticKind::WebFuzzyVersion => {
                "Preferring the exact version only works with sources that support updates. \
                 Other sources get either the exact version or whatever the user downloads."
            }
            DiagnosticKind::WebUrlMissing => {
                "Browse and direct download sources need a URL to download from."
            }
            DiagnosticKind::BundleCopyright => {
                "Mods are protected by copyright. Only bundle generated content or mods you \
                 authored yourself."
            }
            DiagnosticKind::DirectDownload => {
                "Most websites don't allow direct downloads, make sure the linked site does."
            }
            DiagnosticKind::InstallerChoicesNotSaved => {
                "The installer choices for this mod haven't been recorded. The mod may have \
                 to be reinstalled."
            }
            DiagnosticKind::NoVersionSet => {
                "The mod has no version number. The file id identifies the exact file but \
                 users won't see which version they get."
            }
            DiagnosticKind::LocalEditsFuzzyVersion => {
                "Local edits can only be applied to the exact files they were made against, \
                 so users need the exact same version of the mod."
            }
            DiagnosticKind::LocalEditsBundle => {
                "Bundling already ships the edited files, separate patches can't and don't \
                 have to be applied."
            }
            DiagnosticKind::ReplicateVsBinpatch => {
                "Replicate depends on files being unchanged from the archive. Saving edits \
                 implies they were modified, so replicate will fail."
            }
        }
    }
}

/// One finding for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub mod_id: String,
    pub mod_name: String,
}

impl Diagnostic {
    fn new(kind: DiagnosticKind, m: &Mod) -> Self {
        Self {
            kind,
            mod_id: m.id.clone(),
            mod_name: m.display_name().to_string(),
        }
    }

    pub fn summary(&self) -> &'static str {
        self.kind.summary()
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}

impl From<&Diagnostic> for PackagingError {
    fn from(d: &Diagnostic) -> Self {
        PackagingError::new(
            PackagingErrorKind::Diagnostic,
            d.mod_name.clone(),
            format!("{}: {}", d.summary(), d.message()),
        )
        .with_mod_id(d.mod_id.clone())
    }
}

fn choices_recorded(choices: Option<&Value>) -> bool {
    choices
        .and_then(|c| c.get("options"))
        .and_then(Value::as_array)
        .is_some_and(|options| !options.is_empty())
}

/// Check one member's settings
pub fn check_member(m: &Mod, rule: &Rule, attrs: &CollectionAttributes) -> Vec<Diagnostic> {
    let mut res = Vec::new();
    let mut push = |kind| res.push(Diagnostic::new(kind, m));

    let source = attrs.source.get(&m.id);
    let source_type = attrs.source_type_of(&m.id);
    let install_mode = attrs.install_mode_of(&m.id);
    let save_edits = attrs.saves_edits(&m.id);
    let version_match = rule.reference.version_match.as_deref();
    let loose = is_loose(version_match);

    if source_type == SourceType::Nexus && (m.repo_mod_id().is_none() || m.repo_file_id().is_none()) {
        push(DiagnosticKind::InvalidIds);
    }

    if loose && install_mode == InstallMode::Clone {
        push(DiagnosticKind::ReplicateFuzzyVersion);
    }
    if version_match == Some("*") && install_mode == InstallMode::Choices {
        push(DiagnosticKind::ChoicesFuzzyVersion);
    }

    if source_type == SourceType::Bundle && loose {
        push(DiagnosticKind::BundledFuzzyVersion);
    } else if source_type.needs_url() {
        if version_match.is_some_and(|v| v.ends_with(PREFER_SUFFIX)) {
            push(DiagnosticKind::WebFuzzyVersion);
        }
        if source.and_then(|s| s.url.as_deref()).is_none_or(str::is_empty) {
            push(DiagnosticKind::WebUrlMissing);
        }
    }

    if save_edits {
        if loose {
            push(DiagnosticKind::LocalEditsFuzzyVersion);
        }
        if source_type == SourceType::Bundle {
            push(DiagnosticKind::LocalEditsBundle);
        }
        if install_mode == InstallMode::Clone {
            push(DiagnosticKind::ReplicateVsBinpatch);
        }
    }

    match source_type {
        SourceType::Bundle => push(DiagnosticKind::BundleCopyright),
        SourceType::Direct => push(DiagnosticKind::DirectDownload),
        _ => {}
    }

    if install_mode == InstallMode::Choices && !choices_recorded(m.attributes.installer_choices.as_ref()) {
        push(DiagnosticKind::InstallerChoicesNotSaved);
    }

    if version_match == Some("") {
        push(DiagnosticKind::NoVersionSet);
    }

    res
}

/// Check every member of a collection
pub fn check_collection(members: &[ResolvedMember], attrs: &CollectionAttributes) -> Vec<Diagnostic> {
    members
        .iter()
        .flat_map(|r| check_member(&r.member, &r.rule, attrs))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::model::{ModReference, RawId, RuleType};
    use crate::collection::types::SourceInfo;
    use serde_json::json;

    fn member(version_match: Option<&str>) -> (Mod, Rule) {
        let mut m = Mod::new("m");
        m.attributes.mod_id = Some(RawId::Number(1));
        m.attributes.file_id = Some(RawId::Number(2));
        let rule = Rule::new(
            RuleType::Requires,
            ModReference {
                id: Some("m".into()),
                version_match: version_match.map(str::to_string),
                ..ModReference::default()
            },
        );
        (m, rule)
    }

    fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diags.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_replicate_with_latest_version() {
        let (m, rule) = member(Some("*"));
        let mut attrs = CollectionAttributes::default();
        attrs.install_mode.insert("m".into(), InstallMode::Clone);

        let diags = check_member(&m, &rule, &attrs);
        assert_eq!(kinds(&diags), vec![DiagnosticKind::ReplicateFuzzyVersion]);
        assert_eq!(diags[0].kind.as_str(), "replicate-fuzzy-version");
    }

    #[test]
    fn test_clean_member_has_no_findings() {
        let (m, rule) = member(Some("1.0.0"));
        assert!(check_member(&m, &rule, &CollectionAttributes::default()).is_empty());
    }

    #[test]
    fn test_contradicting_edit_settings() {
        let (mut m, rule) = member(Some(">=1.0.0+prefer"));
        m.attributes.mod_id = None;
        let mut attrs = CollectionAttributes::default();
        attrs.install_mode.insert("m".into(), InstallMode::Clone);
        attrs.save_edits.insert("m".into(), true);

        let diags = kinds(&check_member(&m, &rule, &attrs));
        assert!(diags.contains(&DiagnosticKind::InvalidIds));
        assert!(diags.contains(&DiagnosticKind::ReplicateFuzzyVersion));
        assert!(diags.contains(&DiagnosticKind::LocalEditsFuzzyVersion));
        assert!(diags.contains(&DiagnosticKind::ReplicateVsBinpatch));
    }

    #[test]
    fn test_web_sources() {
        let (m, rule) = member(Some(">=1.0.0+prefer"));
        let mut attrs = CollectionAttributes::default();
        attrs.source.insert("m".into(), SourceInfo::of_type(SourceType::Direct));

        let diags = kinds(&check_member(&m, &rule, &attrs));
        assert_eq!(
            diags,
            vec![
                DiagnosticKind::WebFuzzyVersion,
                DiagnosticKind::WebUrlMissing,
                DiagnosticKind::DirectDownload
            ]
        );
    }

    #[test]
    fn test_bundle_and_choices() {
        let (mut m, rule) = member(Some(""));
        let mut attrs = CollectionAttributes::default();
        attrs.source.insert("m".into(), SourceInfo::of_type(SourceType::Bundle));
        attrs.install_mode.insert("m".into(), InstallMode::Choices);
        attrs.save_edits.insert("m".into(), true);

        let diags = kinds(&check_member(&m, &rule, &attrs));
        assert!(diags.contains(&DiagnosticKind::LocalEditsBundle));
        assert!(diags.contains(&DiagnosticKind::BundleCopyright));
        assert!(diags.contains(&DiagnosticKind::InstallerChoicesNotSaved));
        assert!(diags.contains(&DiagnosticKind::NoVersionSet));

        m.attributes.installer_choices = Some(json!({"type": "fomod", "options": [{"name": "Main"}]}));
        let diags = kinds(&check_member(&m, &rule, &attrs));
        assert!(!diags.contains(&DiagnosticKind::InstallerChoicesNotSaved));
    }

    #[test]
    fn test_diagnostic_as_packaging_error() {
        let (m, rule) = member(Some("*"));
        let mut attrs = CollectionAttributes::default();
        attrs.install_mode.insert("m".into(), InstallMode::Clone);
        let diags = check_member(&m, &rule, &attrs);
        let err = PackagingError::from(&diags[0]);
        assert_eq!(err.kind, PackagingErrorKind::Diagnostic);
        assert!(err.may_ignore);
        assert_eq!(err.mod_id.as_deref(), Some("m"));
    }
}
