//! Per-member packaging.
//!
//! For each member of a collection this decides what the manifest entry
//! carries besides the source descriptor:
//! - fresh: nothing
//! - choices: the recorded installer choices
//! - clone (replicate): md5 of every installed file, after verifying the
//!   files are unmodified
//! - save edits: binary patches against a simulated fresh install
//! - bundle source: the installed files themselves

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use super::host::{MetaQuery, Services};
use super::model::{CollectionAttributes, InstallMode, Mod, RuleType};
use super::progress::{spawn_aggregator, PackEvent, ProgressFn};
use super::rules::ResolvedMember;
use super::source::deduce_source;
use super::table::ModTable;
use super::types::{CollectionMod, ModDetails, BUNDLED_PATH, PATCHES_PATH};
use super::verify::{file_hashes, match_checksums};
use crate::error::{CollectionError, PackagingError, PackagingErrorKind, Result};
use crate::games::nexus_domain_for;
use crate::patch::{clear_patch_dir, crc_table, scan_for_diffs, DiffScan};
use crate::paths::{copy_tree, remove_dir_if_exists, sanitize_filename, tree_size};

/// Prefix of the folder a bundled mod is copied to
pub const BUNDLED_PREFIX: &str = "Bundled - ";

/// Folder name a bundled mod gets inside `bundled/`
pub fn bundled_folder_name(m: &Mod) -> String {
    format!(
        "{}{}",
        BUNDLED_PREFIX,
        sanitize_filename(&m.display_name_with_version())
    )
}

/// Shared inputs for packaging the members of one collection
pub struct PackContext {
    pub game_id: String,
    pub staging_dir: PathBuf,
    pub downloads_dir: PathBuf,
    /// Receives `bundled/` and `patches/`
    pub output_dir: PathBuf,
    pub table: Arc<ModTable>,
    pub attrs: CollectionAttributes,
    pub bundle_tags: HashMap<String, String>,
    pub services: Services,
    pub concurrency: usize,
    /// Install simulations run one at a time
    pub simulate_lock: Mutex<()>,
}

impl PackContext {
    fn mod_path(&self, m: &Mod) -> PathBuf {
        self.staging_dir.join(&m.installation_path)
    }

    fn archive_path(&self, m: &Mod) -> Result<PathBuf> {
        self.table
            .archive_path(m, &self.downloads_dir)
            .filter(|p| p.is_file())
            .ok_or_else(|| {
                CollectionError::ProcessCanceled(format!(
                    "archive for \"{}\" not found",
                    m.display_name()
                ))
            })
    }
}

/// What packaging produced
#[derive(Debug, Default)]
pub struct PackOutcome {
    /// Manifest entries, in member order
    pub mods: Vec<CollectionMod>,
    /// Local ids of `mods`, same order
    pub packed: Vec<String>,
    pub errors: Vec<PackagingError>,
}

/// Package every member with bounded concurrency.
///
/// Failures don't stop the batch, they are returned as [`PackagingError`]s.
pub async fn pack_members(
    ctx: Arc<PackContext>,
    members: Vec<ResolvedMember>,
    on_progress: Option<ProgressFn>,
) -> PackOutcome {
    let (tx, rx) = mpsc::unbounded_channel();
    let aggregator = spawn_aggregator(rx, members.len(), on_progress);

    let concurrency = ctx.concurrency.max(1);
    let mut results: Vec<(usize, String, std::result::Result<CollectionMod, PackagingError>)> =
        stream::iter(members.into_iter().enumerate())
            .map(|(index, member)| {
                let ctx = Arc::clone(&ctx);
                let tx = tx.clone();
                async move {
                    let name = member.member.display_name().to_string();
                    let id = member.member.id.clone();
                    let task_id = id.clone();
                    let joined = tokio::task::spawn_blocking(move || {
                        pack_member_reporting(&ctx, &member, &tx)
                    })
                    .await;
                    let result = joined.unwrap_or_else(|e| {
                        Err(PackagingError::new(
                            PackagingErrorKind::Failed,
                            name,
                            format!("packaging task failed: {}", e),
                        )
                        .with_mod_id(task_id))
                    });
                    (index, id, result)
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
    drop(tx);

    if let Err(e) = aggregator.await {
        warn!("progress aggregator failed: {}", e);
    }

    results.sort_by_key(|(index, _, _)| *index);
    let mut outcome = PackOutcome::default();
    for (_, id, result) in results {
        match result {
            Ok(entry) => {
                outcome.mods.push(entry);
                outcome.packed.push(id);
            }
            Err(e) => outcome.errors.push(e),
        }
    }
    outcome
}

fn pack_member_reporting(
    ctx: &PackContext,
    member: &ResolvedMember,
    events: &UnboundedSender<PackEvent>,
) -> std::result::Result<CollectionMod, PackagingError> {
    let m = &member.member;
    pack_member(ctx, member, events).map_err(|e| {
        let _ = events.send(PackEvent::Skipped {
            mod_name: m.display_name().to_string(),
        });
        warn!("failed to pack \"{}\": {}", m.display_name(), e);
        PackagingError::from_error(m.display_name(), &e).with_mod_id(m.id.clone())
    })
}

/// Build the manifest entry of one member, producing its artifacts on disk
pub fn pack_member(
    ctx: &PackContext,
    member: &ResolvedMember,
    events: &UnboundedSender<PackEvent>,
) -> Result<CollectionMod> {
    let ResolvedMember { member: m, rule } = member;
    let attrs = &ctx.attrs;
    let mod_name = m.display_name().to_string();
    let bundled = attrs.is_bundled(&m.id);

    let archive = ctx.table.archive_of(m);
    let archive_path = ctx.table.archive_path(m, &ctx.downloads_dir);
    let meta = ctx.services.meta.lookup(&MetaQuery {
        file_name: archive.map(|a| a.local_path.clone()),
        file_path: archive_path.clone(),
        file_md5: if bundled { None } else { m.attributes.file_md5.clone() },
        file_size: m.attributes.file_size,
        game_id: ctx.game_id.clone(),
    });

    // deducing the source fails most often, do it before any hashing
    let mut source = deduce_source(
        m,
        attrs.source.get(&m.id),
        rule.reference.version_match.as_deref(),
        &meta,
        ctx.bundle_tags.get(&m.id).map(String::as_str),
    )?;

    let mod_path = ctx.mod_path(m);
    let mut hashes = None;
    let mut choices = None;

    match attrs.install_mode_of(&m.id) {
        InstallMode::Clone => {
            let archive_path = ctx.archive_path(m)?;
            match_checksums(ctx.services.lister.as_ref(), &archive_path, &mod_path, &mod_name)?;
            hashes = Some(file_hashes(&mod_path)?);
        }
        InstallMode::Choices => {
            choices = m.attributes.installer_choices.clone();
        }
        InstallMode::Fresh => {}
    }

    let patches = if attrs.saves_edits(&m.id) {
        Some(save_edits(ctx, m, &mod_name, &mod_path, events)?)
    } else {
        None
    };

    if bundled {
        let generated = bundled_folder_name(m);
        let dest = ctx.output_dir.join(BUNDLED_PATH).join(&generated);
        remove_dir_if_exists(&dest)?;
        copy_tree(&mod_path, &dest)?;

        // point the descriptor at the bundled copy
        source.file_expression = Some(generated);
        source.file_size = Some(tree_size(&dest)?);
        info!("bundled \"{}\" ({} bytes)", mod_name, source.file_size.unwrap_or(0));
    }

    // one event per member, sent once nothing else can fail
    let counted = if hashes.is_some() {
        PackEvent::Finished {
            mod_name: mod_name.clone(),
        }
    } else {
        PackEvent::Skipped {
            mod_name: mod_name.clone(),
        }
    };
    let _ = events.send(counted);

    let domain_name = match m.attributes.download_game.as_deref() {
        Some(game) => nexus_domain_for(game),
        None => nexus_domain_for(&ctx.game_id),
    };

    Ok(CollectionMod {
        name: mod_name,
        version: m.attributes.version_or_default(),
        optional: rule.rule_type == RuleType::Recommends,
        domain_name,
        source,
        hashes,
        choices,
        patches,
        instructions: attrs.instructions_of(&m.id),
        author: m.attributes.author.clone(),
        details: Some(ModDetails {
            category: m.attributes.category.clone(),
            mod_type: Some(m.mod_type.clone()).filter(|t| !t.is_empty()),
        }),
        phase: rule.phase(),
        file_overrides: attrs
            .overrides_files(&m.id)
            .then(|| m.file_overrides.clone()),
    })
}

fn save_edits(
    ctx: &PackContext,
    m: &Mod,
    mod_name: &str,
    mod_path: &Path,
    events: &UnboundedSender<PackEvent>,
) -> Result<std::collections::BTreeMap<String, String>> {
    let dest = ctx
        .output_dir
        .join(PATCHES_PATH)
        .join(sanitize_filename(mod_name));
    clear_patch_dir(&dest)?;

    let archive_path = ctx.archive_path(m)?;

    let _guard = ctx
        .simulate_lock
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    debug!("simulating install of {}", archive_path.display());

    let simulated = ctx
        .services
        .simulator
        .simulate(&archive_path, m.attributes.installer_choices.as_ref())?;
    let entries = ctx.services.lister.list(&archive_path)?;
    let crcs = crc_table(&entries);

    let scan = DiffScan {
        instructions: &simulated.instructions,
        simulated_root: simulated.root(),
        source_crcs: &crcs,
        mod_path,
        dest_path: &dest,
    };
    let prompter = &ctx.services.prompter;
    let patches = scan_for_diffs(
        &scan,
        |file, metrics| prompter.patch_too_large(file, metrics),
        |file| {
            let _ = events.send(PackEvent::Step {
                text: format!("{}: {}", mod_name, file),
            });
        },
    )?;

    info!("saved {} edited file(s) of \"{}\"", patches.len(), mod_name);
    Ok(patches)
}
