//! Translation between the local rule graph and the portable one.
//!
//! Locally, rules reference mods by whatever the mod manager knew at the
//! time, often just a local id. In a manifest both ends of every rule have
//! to be content-addressable so they can be matched on another machine.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use super::model::{
    CollectionAttributes, DownloadHint, InstallMode, Mod, ModReference, RepoInfo, Rule, RuleExtra,
    RuleType,
};
use super::packager::bundled_folder_name;
use super::source::sanitize_expression;
use super::store::Profile;
use super::table::{reference_matches, ModTable};
use super::types::{
    CollectionMod, CollectionModRule, SourceInfo, SourceType, UpdatePolicy, BUNDLED_PATH,
};
use super::version::{coerce_to_semver, is_fuzzy, prefer_match};
use crate::error::{CollectionError, Result};
use crate::games::game_id_for_domain;
use crate::hash::md5_hex;

/// A member rule of a container together with the mod it resolved to
#[derive(Debug, Clone)]
pub struct ResolvedMember {
    pub member: Mod,
    pub rule: Rule,
}

/// Build a reference from a mod's own attributes
pub fn make_mod_reference(m: &Mod) -> ModReference {
    let a = &m.attributes;
    let file_expression = match (&a.file_md5, &a.logical_file_name, &a.file_name) {
        (None, None, Some(file_name)) => Some(sanitize_expression(file_name)),
        _ => None,
    };
    let repo = match (a.is_nexus_sourced(), m.repo_mod_id(), m.repo_file_id()) {
        (true, Some(mod_id), Some(file_id)) => Some(RepoInfo {
            repository: "nexus".to_string(),
            game_id: a.download_game.clone(),
            mod_id: mod_id.to_string(),
            file_id: file_id.to_string(),
            campaign: None,
        }),
        _ => None,
    };

    ModReference {
        id: Some(m.id.clone()),
        id_hint: Some(m.id.clone()),
        archive_id: m.archive_id.clone(),
        file_md5: a.file_md5.clone(),
        file_size: a.file_size,
        logical_file_name: a.logical_file_name.clone(),
        file_expression,
        version_match: a.version.clone(),
        game_id: a.download_game.clone(),
        repo,
        ..ModReference::default()
    }
}

/// Stable identifier of a rule for the enabled/disabled toggles
pub fn rule_id(source_name: &str, rule_type: RuleType, reference_name: &str) -> String {
    md5_hex(&format!("{}-{}-{}", source_name, rule_type.as_str(), reference_name))
}

/// The container's own membership rule on `m`, if any
fn membership_rule<'a>(collection: &'a Mod, m: &Mod) -> Option<&'a Rule> {
    collection
        .rules
        .iter()
        .find(|r| reference_matches(m, &r.reference))
}

/// Whether the container accepts updates of `m`
fn member_is_fuzzy(collection: &Mod, m: &Mod) -> bool {
    membership_rule(collection, m).is_some_and(|r| is_fuzzy(r.reference.version_match.as_deref()))
}

/// Rewrite a rule so its reference can be matched on another system.
///
/// References without checksum, logical name or expression are replaced
/// by a reference built from the mod they currently resolve to. Returns
/// `None` when that isn't possible.
pub fn make_transferrable(table: &ModTable, collection: &Mod, rule: &Rule) -> Option<Rule> {
    let mut new_ref = rule.reference.clone();
    let target = table.find_by_reference(&rule.reference);

    if rule.reference.lacks_content_markers() {
        if rule.reference.id.is_none() {
            warn!("invalid rule couldn't be included in the collection: {:?}", rule);
            return None;
        }
        let Some(target) = target else {
            warn!("mod enabled in collection isn't installed: {:?}", rule.reference);
            return None;
        };
        new_ref = make_mod_reference(target);
    }

    // if the referenced mod may get updated the rule has to apply to newer versions too
    if let Some(target) = target {
        if member_is_fuzzy(collection, target) {
            new_ref.version_match = Some("*".to_string());
        }
    }

    Some(Rule {
        rule_type: rule.rule_type,
        reference: new_ref,
        file_list: rule.file_list.clone(),
        comment: rule.comment.clone(),
        ..Rule::new(rule.rule_type, ModReference::default())
    })
}

fn apply_bundle_identity(reference: &mut ModReference, m: &Mod, tag: Option<&String>) {
    reference.file_md5 = None;
    reference.tag = tag.cloned();
    if reference.logical_file_name.is_none() && reference.file_expression.is_none() {
        reference.file_expression = Some(bundled_folder_name(m));
    }
}

/// Collect the portable rules between members.
///
/// `requires`/`recommends` are implied by membership and rules added by a
/// previous import are left out. Rules the curator disabled, rules whose
/// target can't be identified and rules that end up unusable are dropped.
pub fn extract_mod_rules(
    members: &[ResolvedMember],
    collection: &Mod,
    table: &ModTable,
    attrs: &CollectionAttributes,
    bundle_tags: &HashMap<String, String>,
) -> Vec<CollectionModRule> {
    let mut out = Vec::new();

    for ResolvedMember { member, .. } in members {
        let mut source = make_mod_reference(member);
        let source_orig = source.clone();

        if member_is_fuzzy(collection, member) {
            source.version_match = Some("*".to_string());
        }
        if attrs.is_bundled(&member.id) {
            apply_bundle_identity(&mut source, member, bundle_tags.get(&member.id));
        }
        let source = source.portable();

        for input in &member.rules {
            if input.rule_type.is_dependency() || input.is_automatic() {
                continue;
            }

            let target_mod = table.find_by_reference(&input.reference);
            let Some(mut target_rule) = make_transferrable(table, collection, input) else {
                continue;
            };

            if let Some(target) = target_mod {
                if attrs.is_bundled(&target.id) {
                    apply_bundle_identity(&mut target_rule.reference, target, bundle_tags.get(&target.id));
                }
            }

            // enabled state is keyed by the names as they render locally
            let id = rule_id(
                &table.render_reference(&source_orig),
                target_rule.rule_type,
                &table.render_reference(&target_rule.reference),
            );
            if !attrs.rule_enabled(&id) {
                debug!("rule {} disabled by curator", id);
                continue;
            }

            let reference = target_rule.reference.portable();
            if !reference.is_usable() || !source.is_usable() {
                warn!(
                    "dropping {} rule of \"{}\", reference can't be matched elsewhere",
                    target_rule.rule_type.as_str(),
                    member.display_name()
                );
                continue;
            }

            out.push(CollectionModRule {
                source: source.clone(),
                rule_type: target_rule.rule_type,
                reference,
            });
        }
    }

    out
}

/// Convert a manifest entry into a local `requires`/`recommends` rule
pub fn collection_mod_to_rule(cm: &CollectionMod) -> Result<Rule> {
    let source = &cm.source;
    let coerced = coerce_to_semver(&cm.version);

    let version_match = match source.update_policy {
        _ if source.source_type == SourceType::Bundle || cm.hashes.is_some() => coerced,
        Some(UpdatePolicy::Exact) => coerced,
        Some(UpdatePolicy::Latest) => Some("*".to_string()),
        _ => prefer_match(&cm.version),
    };

    let download_hint = source.source_type.is_download_hint().then(|| DownloadHint {
        url: source.url.clone(),
        instructions: source.instructions.clone(),
        mode: source.source_type,
    });

    let exact = source.update_policy == Some(UpdatePolicy::Exact);
    let mut reference = ModReference {
        description: Some(cm.name.clone()),
        // bundled archives are recompressed on install, the hash won't match
        file_md5: (source.source_type != SourceType::Bundle)
            .then(|| source.md5.clone())
            .flatten(),
        game_id: Some(game_id_for_domain(&cm.domain_name)),
        file_size: source.file_size,
        version_match,
        logical_file_name: source.logical_filename.clone(),
        file_expression: (exact || source.logical_filename.is_none())
            .then(|| source.file_expression.clone())
            .flatten(),
        tag: Some(
            source
                .tag
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        ),
        ..ModReference::default()
    };

    if matches!(source.update_policy, Some(UpdatePolicy::Latest | UpdatePolicy::Prefer)) {
        reference.md5_hint = source.md5.clone();
    }

    if source.source_type == SourceType::Nexus {
        let (Some(mod_id), Some(file_id)) = (
            source.mod_id.filter(|id| *id != 0),
            source.file_id.filter(|id| *id != 0),
        ) else {
            return Err(CollectionError::DataInvalid(format!(
                "invalid nexus repo specification for \"{}\"",
                cm.name
            )));
        };
        reference.repo = Some(RepoInfo {
            repository: "nexus".to_string(),
            game_id: Some(cm.domain_name.clone()),
            mod_id: mod_id.to_string(),
            file_id: file_id.to_string(),
            campaign: Some("collection".to_string()),
        });
    }

    let extra = RuleExtra {
        author: cm.author.clone(),
        mod_type: cm.details.as_ref().and_then(|d| d.mod_type.clone()),
        category: cm.details.as_ref().and_then(|d| d.category.clone()),
        version: Some(cm.version.clone()),
        url: source.url.clone(),
        name: Some(cm.name.clone()),
        instructions: cm.instructions.clone().filter(|s| !s.is_empty()),
        phase: Some(cm.phase),
        patches: cm.patches.clone(),
        file_overrides: cm.file_overrides.clone(),
        local_path: (source.source_type == SourceType::Bundle).then(|| {
            format!(
                "{}/{}",
                BUNDLED_PATH,
                source.file_expression.clone().unwrap_or_default()
            )
        }),
        ..RuleExtra::default()
    };

    let rule_type = if cm.optional {
        RuleType::Recommends
    } else {
        RuleType::Requires
    };

    Ok(Rule {
        file_list: cm.hashes.clone(),
        installer_choices: cm.choices.clone(),
        download_hint,
        extra: Some(extra),
        ..Rule::new(rule_type, reference)
    })
}

/// A manifest rule after resolution against the local mod table
#[derive(Debug, Clone)]
pub struct ImportedRule {
    /// Local mod the rule belongs to, once installed
    pub source_mod: Option<String>,
    /// Local mod the reference points at, once installed
    pub target_mod: Option<String>,
    pub rule: Rule,
}

impl ImportedRule {
    pub fn is_resolved(&self) -> bool {
        self.source_mod.is_some() && self.target_mod.is_some()
    }
}

/// Resolve manifest rules against the local mods.
///
/// Nothing fails here: rules whose ends aren't installed yet are returned
/// unresolved and start matching once the mod shows up. Imported rules are
/// marked automatic so they're not exported again.
pub fn import_mod_rules(rules: &[CollectionModRule], table: &ModTable) -> Vec<ImportedRule> {
    rules
        .iter()
        .map(|r| {
            let source_mod = table.find_by_reference(&r.source).map(|m| m.id.clone());
            let target_mod = table.find_by_reference(&r.reference).map(|m| m.id.clone());
            if target_mod.is_none() {
                debug!("rule target not installed yet: {:?}", r.reference);
            }
            let rule = Rule {
                extra: Some(RuleExtra {
                    automatic: Some(true),
                    ..RuleExtra::default()
                }),
                ..Rule::new(r.rule_type, r.reference.clone())
            };
            ImportedRule {
                source_mod,
                target_mod,
                rule,
            }
        })
        .collect()
}

/// Reconstruct per-member settings from the rules of a container
pub fn deduce_collection_attributes(container: &Mod, table: &ModTable) -> CollectionAttributes {
    let mut res = CollectionAttributes::default();

    for rule in &container.rules {
        let Some(m) = table.find_by_reference(&rule.reference) else {
            continue;
        };
        let id = m.id.clone();

        let mode = if rule.installer_choices.is_some() {
            InstallMode::Choices
        } else if rule.file_list.is_some() {
            InstallMode::Clone
        } else {
            InstallMode::Fresh
        };
        res.install_mode.insert(id.clone(), mode);

        if let Some(instructions) = rule.extra.as_ref().and_then(|e| e.instructions.clone()) {
            res.instructions.insert(id.clone(), instructions);
        }

        let source_type = match &rule.download_hint {
            Some(hint) => hint.mode,
            None if rule
                .reference
                .repo
                .as_ref()
                .is_some_and(|r| r.repository == "nexus") =>
            {
                SourceType::Nexus
            }
            None => SourceType::Bundle,
        };
        res.source.insert(
            id.clone(),
            SourceInfo {
                url: rule.download_hint.as_ref().and_then(|h| h.url.clone()),
                instructions: rule.download_hint.as_ref().and_then(|h| h.instructions.clone()),
                ..SourceInfo::of_type(source_type)
            },
        );

        let saves_edits = rule.extra.as_ref().is_some_and(|e| e.patches.is_some());
        res.save_edits.insert(id, saves_edits);
    }

    res
}

/// Membership rules for the mods enabled in a profile.
///
/// Containers, the container itself and mods rejected by `filter` are left
/// out. A `*` version match on an existing rule survives, any other
/// existing match is pinned to the installed version. Quick collections
/// always pin.
pub fn rules_from_profile(
    profile: &Profile,
    table: &ModTable,
    existing_rules: &[Rule],
    existing_id: Option<&str>,
    filter: impl Fn(&Mod) -> bool,
    quick: bool,
) -> Vec<Rule> {
    profile
        .mod_state
        .iter()
        .filter(|(_, enabled)| **enabled)
        .filter_map(|(mod_id, _)| table.get(mod_id))
        .filter(|m| Some(m.id.as_str()) != existing_id && !m.is_collection() && filter(m))
        .map(|m| {
            let old = existing_rules
                .iter()
                .find(|r| reference_matches(m, &r.reference));
            let mut version_match = match old.and_then(|r| r.reference.version_match.as_deref()) {
                Some("*") => Some("*".to_string()),
                Some(_) => m.attributes.version.clone(),
                None => None,
            };
            if quick {
                version_match = m.attributes.version.clone();
            }

            Rule::new(
                RuleType::Requires,
                ModReference {
                    id: Some(m.id.clone()),
                    archive_id: m.archive_id.clone(),
                    version_match,
                    ..ModReference::default()
                },
            )
        })
        .collect()
}

/// Split a rule update into (removed, added)
pub fn diff_rules(old: &[Rule], new: &[Rule]) -> (Vec<Rule>, Vec<Rule>) {
    let removed = old.iter().filter(|r| !new.contains(r)).cloned().collect();
    let added = new.iter().filter(|r| !old.contains(r)).cloned().collect();
    (removed, added)
}

/// Reduce a rule to the referenced mod's local identity, for cloning.
///
/// Ignored rules and rules pointing at mods that aren't installed are dropped.
pub fn simplify_for_clone(rule: &Rule, table: &ModTable) -> Option<Rule> {
    if rule.ignored {
        return None;
    }
    let m = table.find_by_reference(&rule.reference)?;
    Some(Rule {
        reference: ModReference {
            id: Some(m.id.clone()),
            id_hint: Some(m.id.clone()),
            archive_id: m.archive_id.clone(),
            version_match: rule.reference.version_match.clone(),
            ..ModReference::default()
        },
        ..rule.clone()
    })
}
