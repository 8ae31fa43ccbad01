//! Collection-level operations.
//!
//! Export runs as a sequence of phases:
//!
//! ```text
//! Idle -> GatheringMembers -> ResolvingRules -> PackagingMods
//!      -> WritingManifest -> Archiving -> Done
//! ```
//!
//! Any phase can end in `Failed`. Cancellation is checked on every
//! transition; packaging jobs already running are allowed to finish.
//! Update, upload, clone, create and import build on the same pieces.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::diagnostics::{check_collection, Diagnostic};
use super::extension::ExtensionRegistry;
use super::host::{CloneChoice, Prompter, Services};
use super::model::{
    CollectionAttributes, Mod, ModReference, Rule, RuleExtra, RuleType,
};
use super::packager::{pack_members, PackContext};
use super::progress::{CancelToken, ProgressFn};
use super::remote::{filter_info, map_upload_error, reusable_collection_id, UploadResult, Uploader};
use super::rules::{
    collection_mod_to_rule, deduce_collection_attributes, diff_rules, extract_mod_rules,
    import_mod_rules, make_mod_reference, rules_from_profile, simplify_for_clone, ImportedRule,
    ResolvedMember,
};
use super::store::ModStore;
use super::table::ModTable;
use super::types::{
    CollectionConfig, CollectionInfo, Manifest, ModSettings, BUNDLED_PATH, COLLECTION_MOD_TYPE,
    INI_TWEAKS_PATH, MANIFEST_FILE, PATCHES_PATH,
};
use super::version::is_fuzzy;
use crate::archive;
use crate::config::{ExportConfig, Settings};
use crate::error::{CollectionError, PackagingError, PackagingErrorKind, Result};
use crate::games::nexus_domain_for;
use crate::paths::{copy_tree, ensure_parent_dirs, remove_dir_if_exists};

pub const MIN_COLLECTION_NAME_LENGTH: usize = 3;
pub const MAX_COLLECTION_NAME_LENGTH: usize = 36;

const ANONYMOUS: &str = "Anonymous";

/// Check the length limits of a collection name
pub fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if (MIN_COLLECTION_NAME_LENGTH..=MAX_COLLECTION_NAME_LENGTH).contains(&len) {
        return Ok(());
    }
    Err(CollectionError::DataInvalid(format!(
        "Name must be between {}-{} characters long",
        MIN_COLLECTION_NAME_LENGTH, MAX_COLLECTION_NAME_LENGTH
    )))
}

/// Local id of a collection generated from `base`
pub fn make_collection_id(base: &str) -> String {
    format!("collection_{}", base)
}

/// Bytes to download for the required, non-ignored members
pub fn calculate_collection_size(container: &Mod, table: &ModTable) -> u64 {
    container
        .rules
        .iter()
        .filter(|r| r.rule_type == RuleType::Requires && !r.ignored)
        .map(|r| {
            table
                .find_by_reference(&r.reference)
                .and_then(|m| m.attributes.file_size)
                .or(r.reference.file_size)
                .unwrap_or(0)
        })
        .sum()
}

/// Resolve the membership rules of a container.
///
/// Members that aren't installed become `NotInstalled` errors, other
/// collections are never members.
pub fn gather_members(container: &Mod, table: &ModTable) -> (Vec<ResolvedMember>, Vec<PackagingError>) {
    let mut members = Vec::new();
    let mut errors = Vec::new();

    for rule in container.rules.iter().filter(|r| r.rule_type.is_dependency()) {
        match table.find_by_reference(&rule.reference) {
            None => {
                let name = table.render_reference(&rule.reference);
                warn!("not packaging mod that isn't installed: \"{}\"", name);
                let mut err = PackagingError::new(
                    PackagingErrorKind::NotInstalled,
                    name.clone(),
                    format!("Not packaging mod that isn't installed: \"{}\"", name),
                );
                err.mod_id = rule.reference.id.clone();
                errors.push(err);
            }
            Some(m) if m.is_collection() => {
                debug!("skipping nested collection {}", m.id);
            }
            Some(m) => members.push(ResolvedMember {
                member: m.clone(),
                rule: rule.clone(),
            }),
        }
    }

    (members, errors)
}

/// Decide whether an operation may go on after packaging errors.
///
/// Any error that can't be ignored cancels, otherwise the prompter decides.
pub fn check_errors(errors: &[PackagingError], prompter: &dyn Prompter) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    for e in errors {
        warn!("{}", e);
    }
    if errors.iter().any(|e| !e.may_ignore) || !prompter.continue_despite_errors(errors) {
        return Err(CollectionError::UserCanceled);
    }
    Ok(())
}

/// Drop the bundled files and patches written into a collection folder
fn remove_packaging_output(collection_path: &Path) -> io::Result<()> {
    remove_dir_if_exists(&collection_path.join(BUNDLED_PATH))?;
    remove_dir_if_exists(&collection_path.join(PATCHES_PATH))
}

/// Where the export pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    GatheringMembers,
    ResolvingRules,
    PackagingMods,
    WritingManifest,
    Archiving,
    Done,
    Failed,
}

/// Who is acting: recorded as author/uploader and used for ownership checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub user_id: Option<u64>,
}

impl Identity {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            name: settings.uploader_or_anonymous(),
            user_id: settings.uploader_id,
        }
    }

    fn name_or_anonymous(&self) -> String {
        if self.name.is_empty() {
            ANONYMOUS.to_string()
        } else {
            self.name.clone()
        }
    }
}

/// A manifest generated from local state, not yet written anywhere
#[derive(Debug)]
pub struct Generated {
    pub manifest: Manifest,
    pub members: Vec<ResolvedMember>,
    /// Local ids of the packaged members, in manifest order
    pub packed: Vec<String>,
    pub errors: Vec<PackagingError>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct ExportOutcome {
    pub archive_path: PathBuf,
    pub manifest: Manifest,
    /// Errors the user chose to continue past
    pub errors: Vec<PackagingError>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
pub struct UpdateOutcome {
    pub manifest: Manifest,
    pub removed: Vec<Rule>,
    pub added: Vec<Rule>,
    pub errors: Vec<PackagingError>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCollection {
    pub id: String,
    pub name: String,
    /// An existing collection was updated instead of created
    pub updated: bool,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub container: Mod,
    pub mod_rules: Vec<ImportedRule>,
    /// Entries that couldn't be turned into rules
    pub errors: Vec<PackagingError>,
}

/// Runs collection operations for one game
pub struct Assembler {
    config: ExportConfig,
    services: Services,
    extensions: ExtensionRegistry,
    identity: Identity,
    cancel: CancelToken,
    on_progress: Option<ProgressFn>,
    phase: ExportPhase,
    /// Collection folder packaging has started writing into
    packaging_into: Option<PathBuf>,
}

impl Assembler {
    pub fn new(config: ExportConfig, services: Services, identity: Identity) -> Self {
        Self {
            config,
            services,
            extensions: ExtensionRegistry::with_builtin(),
            identity,
            cancel: CancelToken::new(),
            on_progress: None,
            phase: ExportPhase::Idle,
            packaging_into: None,
        }
    }

    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn phase(&self) -> ExportPhase {
        self.phase
    }

    fn game_id(&self) -> &str {
        &self.config.game_id
    }

    fn enter(&mut self, phase: ExportPhase) -> Result<()> {
        if let Err(e) = self.cancel.check() {
            info!("canceled during {:?}", self.phase);
            self.phase = ExportPhase::Failed;
            return Err(e);
        }
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        Ok(())
    }

    fn collection_path(&self, container: &Mod) -> PathBuf {
        self.config.staging_dir.join(&container.installation_path)
    }

    fn load_container(&self, store: &ModStore, container_id: &str) -> Result<(ModTable, Mod)> {
        let table = store.load_game(self.game_id())?;
        let container = table
            .get(container_id)
            .filter(|m| m.is_collection())
            .cloned()
            .ok_or_else(|| {
                CollectionError::ProcessCanceled(format!("collection not found: {}", container_id))
            })?;
        Ok((table, container))
    }

    /// Build the manifest of `container` from the current local state.
    ///
    /// Member artifacts (bundled copies, patches) are written to the
    /// container's own folder.
    pub async fn generate(&mut self, container: &Mod, table: &ModTable) -> Result<Generated> {
        self.enter(ExportPhase::GatheringMembers)?;
        let (members, mut errors) = gather_members(container, table);
        let attrs = container.attributes.collection_or_default();
        info!(
            "{} member(s) of \"{}\" resolved",
            members.len(),
            container.display_name()
        );

        // bundled mods have neither server metadata nor a usable md5, rules
        // find them by tag
        let bundle_tags: HashMap<String, String> = members
            .iter()
            .map(|r| (r.member.id.clone(), Uuid::new_v4().simple().to_string()))
            .collect();

        self.enter(ExportPhase::ResolvingRules)?;
        let mod_rules = extract_mod_rules(&members, container, table, &attrs, &bundle_tags);
        let diagnostics = check_collection(&members, &attrs);
        for d in &diagnostics {
            warn!("{}: {}", d.mod_name, d.summary());
        }

        let collection_path = self.collection_path(container);
        let member_mods: Vec<&Mod> = members.iter().map(|r| &r.member).collect();
        let extras = self.extensions.generate(
            self.game_id(),
            &member_mods,
            &self.config.staging_dir,
            container,
        )?;

        self.enter(ExportPhase::PackagingMods)?;
        remove_packaging_output(&collection_path)?;
        self.packaging_into = Some(collection_path.clone());

        let ctx = Arc::new(PackContext {
            game_id: self.game_id().to_string(),
            staging_dir: self.config.staging_dir.clone(),
            downloads_dir: self.config.downloads_dir.clone(),
            output_dir: collection_path,
            table: Arc::new(table.clone()),
            attrs: attrs.clone(),
            bundle_tags,
            services: self.services.clone(),
            concurrency: self.config.concurrency,
            simulate_lock: Mutex::new(()),
        });
        let outcome = pack_members(ctx, members.clone(), self.on_progress.clone()).await;
        errors.extend(outcome.errors);

        let info = CollectionInfo {
            author: container
                .attributes
                .uploader
                .clone()
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            author_url: container.attributes.author_url.clone().unwrap_or_default(),
            name: container.display_name().to_string(),
            description: container
                .attributes
                .short_description
                .clone()
                .unwrap_or_default(),
            install_instructions: attrs.install_instructions.clone().unwrap_or_default(),
            domain_name: nexus_domain_for(self.game_id()),
            game_versions: self.config.game_version.iter().cloned().collect(),
        };

        let collection_config = CollectionConfig {
            recommend_new_profile: attrs
                .recommend_new_profile
                .unwrap_or_else(|| container.attributes.recommend_new_profile()),
            mod_settings: members
                .iter()
                .filter(|r| outcome.packed.contains(&r.member.id))
                .map(|r| ModSettings {
                    reference: make_mod_reference(&r.member).portable(),
                    install_mode: attrs.install_mode_of(&r.member.id),
                    save_edits: attrs.saves_edits(&r.member.id),
                    source_type: attrs.source_type_of(&r.member.id),
                    phase: r.rule.phase(),
                })
                .collect(),
            disabled_rules: attrs
                .rule
                .iter()
                .filter(|(_, enabled)| !**enabled)
                .map(|(id, _)| id.clone())
                .collect(),
        };

        Ok(Generated {
            manifest: Manifest {
                info,
                mods: outcome.mods,
                mod_rules,
                extras,
                collection_config,
            },
            members,
            packed: outcome.packed,
            errors,
            diagnostics,
        })
    }

    /// Export a collection into a single archive
    pub async fn export(&mut self, store: &ModStore, container_id: &str) -> Result<ExportOutcome> {
        self.phase = ExportPhase::Idle;
        self.packaging_into = None;
        let res = self.export_inner(store, container_id).await;
        self.finish(res)
    }

    fn finish<T>(&mut self, res: Result<T>) -> Result<T> {
        let packaged = self.packaging_into.take();
        self.phase = if res.is_ok() {
            ExportPhase::Done
        } else {
            ExportPhase::Failed
        };
        if let (Err(_), Some(path)) = (&res, packaged) {
            debug!("discarding partial output in {}", path.display());
            if let Err(e) = remove_packaging_output(&path) {
                warn!("failed to clean up {}: {}", path.display(), e);
            }
        }
        res
    }

    async fn export_inner(&mut self, store: &ModStore, container_id: &str) -> Result<ExportOutcome> {
        let (table, container) = self.load_container(store, container_id)?;
        let generated = self.generate(&container, &table).await?;
        check_errors(&generated.errors, self.services.prompter.as_ref())?;

        self.enter(ExportPhase::WritingManifest)?;
        let staging = TempDir::new()?;
        let collection_path = self.collection_path(&container);
        write_collection_dir(&generated.manifest, &container, &collection_path, staging.path())?;

        self.enter(ExportPhase::Archiving)?;
        let archive_path = self.archive_path_for(&container);
        if archive_path.exists() {
            fs::remove_file(&archive_path)?;
        }
        self.services
            .archiver
            .compress(staging.path(), &archive_path)?;
        if let Err(e) = staging.close() {
            warn!("failed to clean up staging directory: {}", e);
        }
        info!("collection exported to {}", archive_path.display());

        Ok(ExportOutcome {
            archive_path,
            manifest: generated.manifest,
            errors: generated.errors,
            diagnostics: generated.diagnostics,
        })
    }

    fn archive_path_for(&self, container: &Mod) -> PathBuf {
        let dir = self
            .config
            .export_dir
            .clone()
            .unwrap_or_else(|| self.collection_path(container).join("export"));
        dir.join(format!(
            "collection_{}.{}",
            container.attributes.version.as_deref().unwrap_or("0"),
            self.config.archive_format.extension()
        ))
    }

    /// Re-derive a collection from the current local state and store the
    /// result as the container's rules and configuration.
    pub async fn update(&mut self, store: &mut ModStore, container_id: &str) -> Result<UpdateOutcome> {
        self.phase = ExportPhase::Idle;
        self.packaging_into = None;
        let res = self.update_inner(store, container_id).await;
        self.finish(res)
    }

    async fn update_inner(&mut self, store: &mut ModStore, container_id: &str) -> Result<UpdateOutcome> {
        let (table, container) = self.load_container(store, container_id)?;
        let generated = self.generate(&container, &table).await?;
        check_errors(&generated.errors, self.services.prompter.as_ref())?;

        self.enter(ExportPhase::WritingManifest)?;
        let entries: HashMap<&str, &super::types::CollectionMod> = generated
            .packed
            .iter()
            .map(String::as_str)
            .zip(generated.manifest.mods.iter())
            .collect();

        let new_rules: Vec<Rule> = container
            .rules
            .iter()
            .map(|rule| {
                let member = generated
                    .members
                    .iter()
                    .find(|r| &r.rule == rule)
                    .map(|r| &r.member);
                match member.and_then(|m| entries.get(m.id.as_str()).map(|e| (m, *e))) {
                    Some((m, entry)) => refresh_rule(rule, m, entry),
                    None => rule.clone(),
                }
            })
            .collect();
        let (removed, added) = diff_rules(&container.rules, &new_rules);

        let game_id = self.game_id().to_string();
        store.set_mod_rules(&game_id, container_id, new_rules)?;

        // forget settings of mods that are no longer members
        let mut attrs = container.attributes.collection_or_default();
        let member_ids: Vec<&str> = generated.members.iter().map(|r| r.member.id.as_str()).collect();
        prune_attributes(&mut attrs, &member_ids);
        store.set_mod_attribute(&game_id, container_id, "collection", serde_json::to_value(&attrs)?)?;
        store.set_mod_attribute(&game_id, container_id, "editable", Value::Bool(true))?;

        let collection_path = self.collection_path(&container);
        fs::create_dir_all(&collection_path)?;
        fs::write(
            collection_path.join(MANIFEST_FILE),
            generated.manifest.to_json_pretty()?,
        )?;
        info!(
            "updated \"{}\": {} rule(s) removed, {} added",
            container.display_name(),
            removed.len(),
            added.len()
        );

        Ok(UpdateOutcome {
            manifest: generated.manifest,
            removed,
            added,
            errors: generated.errors,
            diagnostics: generated.diagnostics,
        })
    }

    /// Export and submit a collection, recording the remote identity
    pub async fn upload(
        &mut self,
        store: &mut ModStore,
        container_id: &str,
        uploader: Arc<dyn Uploader>,
    ) -> Result<UploadResult> {
        let exported = self.export(store, container_id).await?;
        let (table, container) = self.load_container(store, container_id)?;

        let collection_id = reusable_collection_id(&container, &self.identity.name);
        let filtered = filter_info(&exported.manifest)?;
        let archive_path = exported.archive_path.clone();
        let submitted = tokio::task::spawn_blocking(move || {
            uploader.submit(&filtered, &archive_path, collection_id)
        })
        .await
        .map_err(|e| CollectionError::Other(anyhow::anyhow!("upload task failed: {}", e)))?;
        let result = submitted.map_err(|e| map_upload_error(e, &exported.manifest, &table))?;

        let game_id = self.game_id().to_string();
        let updates = [
            ("collectionId", Value::from(result.collection_id)),
            ("collectionSlug", Value::from(result.collection_slug.clone())),
            ("source", Value::from("nexus")),
            ("revisionId", result.revision_id.map(Value::from).unwrap_or(Value::Null)),
            (
                "revisionNumber",
                result.revision_number.map(Value::from).unwrap_or(Value::Null),
            ),
            (
                "version",
                Value::from((result.revision_number.unwrap_or(0) + 1).to_string()),
            ),
        ];
        for (key, value) in updates {
            store.set_mod_attribute(&game_id, container_id, key, value)?;
        }

        info!(
            "uploaded \"{}\" as {} revision {:?}",
            container.display_name(),
            result.collection_slug,
            result.revision_number
        );
        Ok(result)
    }

    /// Create an empty (or seeded) collection
    pub fn create_collection(&self, store: &ModStore, id: &str, name: &str, rules: Vec<Rule>) -> Result<Mod> {
        validate_name(name)?;

        let mut container = Mod::new(id);
        container.mod_type = COLLECTION_MOD_TYPE.to_string();
        container.rules = rules;
        let attrs = &mut container.attributes;
        attrs.name = Some(name.to_string());
        attrs.version = Some("0".to_string());
        attrs.install_time = Some(Utc::now().to_rfc3339());
        attrs.author = Some(self.identity.name_or_anonymous());
        attrs.uploader = Some(self.identity.name_or_anonymous());
        attrs.uploader_id = self.identity.user_id;
        attrs.editable = Some(true);
        attrs.source = Some("user-generated".to_string());
        attrs.recommend_new_profile = Some(false);

        store.save_mod(self.game_id(), &container)?;
        fs::create_dir_all(self.collection_path(&container))?;
        info!("created collection \"{}\" ({})", name, id);
        Ok(container)
    }

    /// Create or update a collection holding the mods enabled in a profile.
    ///
    /// With `quick_name` a quick collection is created: Nexus-sourced mods
    /// only, versions pinned, a fresh id every time.
    pub fn create_from_profile(
        &self,
        store: &mut ModStore,
        profile_id: &str,
        quick_name: Option<&str>,
    ) -> Result<ProfileCollection> {
        let profile = store
            .get_profile(profile_id)?
            .ok_or_else(|| CollectionError::ProcessCanceled(format!("no profile {}", profile_id)))?;
        let table = store.load_game(&profile.game_id)?;

        let quick = quick_name.is_some();
        let id = if quick {
            make_collection_id(&format!("{}_{}", profile_id, Uuid::new_v4().simple()))
        } else {
            make_collection_id(profile_id)
        };
        let existing = table.get(&id).cloned();

        let filter = |m: &Mod| !quick || (m.attributes.is_nexus_sourced() && !m.attributes.is_generated());
        let rules = rules_from_profile(
            &profile,
            &table,
            existing.as_ref().map(|m| m.rules.as_slice()).unwrap_or(&[]),
            existing.as_ref().map(|m| m.id.as_str()),
            filter,
            quick,
        );

        if quick && rules.is_empty() {
            return Err(CollectionError::ProcessCanceled("collection is empty".to_string()));
        }

        match existing {
            None => {
                let name = quick_name.unwrap_or(&profile.name).to_string();
                self.create_collection(store, &id, &name, rules)?;
                Ok(ProfileCollection {
                    id,
                    name,
                    updated: false,
                })
            }
            Some(container) => {
                let (removed, added) = diff_rules(&container.rules, &rules);
                store.set_mod_attribute(&profile.game_id, &id, "editable", Value::Bool(true))?;
                for rule in &removed {
                    store.remove_mod_rule(&profile.game_id, &id, rule)?;
                }
                for rule in added {
                    store.add_mod_rule(&profile.game_id, &id, rule)?;
                }
                info!("updated collection {} from profile {}", id, profile_id);
                Ok(ProfileCollection {
                    id,
                    name: container.display_name().to_string(),
                    updated: true,
                })
            }
        }
    }

    /// Duplicate a collection under a new id.
    ///
    /// Rules are reduced to the local identity of the mods they point at.
    /// When the user may edit but doesn't own the source, the prompter
    /// decides between a fresh clone and contributing to the original.
    pub fn clone_collection(&self, store: &ModStore, source_id: &str, new_id: &str) -> Result<Mod> {
        let (table, source) = self.load_container(store, source_id)?;
        let source_path = self.collection_path(&source);
        let manifest_path = source_path.join(MANIFEST_FILE);
        let data = fs::read(&manifest_path).map_err(|e| {
            CollectionError::ProcessCanceled(format!(
                "failed to read {}: {}",
                manifest_path.display(),
                e
            ))
        })?;
        // only validated, the clone is built from local state
        Manifest::from_json(&data)?;

        let src = &source.attributes;
        let edit_permission = src.has_edit_permission();
        let mut own = self.identity.user_id.is_some() && src.uploader_id == self.identity.user_id;
        let mut cloning = false;
        let mut contributing = false;
        if edit_permission && !own {
            match self.services.prompter.clone_or_contribute(source.display_name()) {
                CloneChoice::Clone => {
                    own = true;
                    cloning = true;
                }
                CloneChoice::Contribute => contributing = true,
            }
        }
        let copy_identity = !cloning && (own || contributing);

        let mut container = Mod::new(new_id);
        container.mod_type = COLLECTION_MOD_TYPE.to_string();
        container.rules = source
            .rules
            .iter()
            .filter_map(|r| simplify_for_clone(r, &table))
            .collect();

        let attrs = &mut container.attributes;
        let me = self.identity.name_or_anonymous();
        attrs.install_time = Some(Utc::now().to_rfc3339());
        attrs.author = Some(me.clone());
        attrs.uploader = Some(me.clone());
        attrs.uploader_id = self.identity.user_id;
        attrs.editable = Some(true);
        attrs.collection = Some(deduce_collection_attributes(&source, &table));

        if copy_identity {
            attrs.custom_file_name = src.custom_file_name.clone();
            attrs.name = src.name.clone();
            attrs.version = src.version.clone();
            attrs.collection_id = src.collection_id.clone();
            attrs.revision_id = src.revision_id.clone();
            attrs.collection_slug = src.collection_slug.clone();
            attrs.revision_number = src.revision_number.map(|n| n + 1);
            attrs.uploader = Some(src.uploader.clone().unwrap_or_else(|| me.clone()));
            attrs.author = Some(src.author.clone().unwrap_or(me));
            attrs.uploader_id = src.uploader_id.or(self.identity.user_id);
            attrs.permissions = src.permissions.clone();
        } else {
            attrs.custom_file_name = Some(format!("Copy of {}", source.display_name()));
            attrs.version = Some("0".to_string());
        }

        store.save_mod(self.game_id(), &container)?;
        copy_tree(&source_path, &self.collection_path(&container))?;
        info!(
            "cloned \"{}\" into {} ({})",
            source.display_name(),
            new_id,
            if copy_identity { "keeping identity" } else { "new identity" }
        );
        Ok(container)
    }

    /// Install a collection manifest or archive as a new local container.
    ///
    /// Rules between members are attached to the mods they belong to once
    /// both ends are installed; the rest are returned unresolved.
    pub fn import_collection(&self, store: &mut ModStore, path: &Path, new_id: &str) -> Result<ImportOutcome> {
        let game_id = self.game_id().to_string();
        let collection_path = self.config.staging_dir.join(new_id);
        fs::create_dir_all(&collection_path)?;

        let is_manifest = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_manifest {
            fs::copy(path, collection_path.join(MANIFEST_FILE))?;
        } else {
            archive::extract_all(path, &collection_path)?;
        }
        let manifest = Manifest::from_json(&fs::read(collection_path.join(MANIFEST_FILE))?)?;

        let mut errors = Vec::new();
        let mut rules = Vec::with_capacity(manifest.mods.len());
        for cm in &manifest.mods {
            match collection_mod_to_rule(cm) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    warn!("can't import \"{}\": {}", cm.name, e);
                    errors.push(PackagingError::from_error(&cm.name, &e));
                }
            }
        }

        let mut container = Mod::new(new_id);
        container.mod_type = COLLECTION_MOD_TYPE.to_string();
        container.rules = rules;
        let info = &manifest.info;
        let attrs = &mut container.attributes;
        attrs.name = Some(info.name.clone());
        attrs.author = Some(info.author.clone()).filter(|s| !s.is_empty());
        attrs.uploader = attrs.author.clone();
        attrs.author_url = Some(info.author_url.clone()).filter(|s| !s.is_empty());
        attrs.short_description = Some(info.description.clone()).filter(|s| !s.is_empty());
        attrs.install_time = Some(Utc::now().to_rfc3339());
        attrs.recommend_new_profile = Some(manifest.collection_config.recommend_new_profile);

        let mut table = store.load_game(&game_id)?;
        let mut collection = deduce_collection_attributes(&container, &table);
        collection.install_instructions = Some(info.install_instructions.clone()).filter(|s| !s.is_empty());
        container.attributes.collection = Some(collection);

        store.save_mod(&game_id, &container)?;
        table.insert(container.clone());

        let mod_rules = import_mod_rules(&manifest.mod_rules, &table);
        for imported in mod_rules.iter().filter(|r| r.is_resolved()) {
            if let Some(source) = imported.source_mod.as_deref() {
                store.add_mod_rule(&game_id, source, imported.rule.clone())?;
            }
        }
        info!(
            "imported \"{}\": {} member(s), {} of {} mod rule(s) resolved",
            info.name,
            container.rules.len(),
            mod_rules.iter().filter(|r| r.is_resolved()).count(),
            mod_rules.len()
        );

        Ok(ImportOutcome {
            container,
            mod_rules,
            errors,
        })
    }
}

/// A membership rule updated to what was just packaged
fn refresh_rule(rule: &Rule, m: &Mod, entry: &super::types::CollectionMod) -> Rule {
    let version_match = if is_fuzzy(rule.reference.version_match.as_deref())
        && rule.reference.version_match.is_some()
    {
        rule.reference.version_match.clone()
    } else {
        m.attributes.version.clone()
    };
    let extra = RuleExtra {
        patches: entry.patches.clone(),
        instructions: entry.instructions.clone(),
        file_overrides: entry.file_overrides.clone(),
        ..rule.extra.clone().unwrap_or_default()
    };
    Rule {
        reference: ModReference {
            id: Some(m.id.clone()),
            archive_id: m.archive_id.clone(),
            version_match,
            ..ModReference::default()
        },
        installer_choices: entry.choices.clone(),
        file_list: entry.hashes.clone(),
        extra: Some(extra),
        ..rule.clone()
    }
}

fn prune_attributes(attrs: &mut CollectionAttributes, member_ids: &[&str]) {
    fn keep<V>(map: &mut BTreeMap<String, V>, ids: &[&str]) {
        map.retain(|id, _| ids.contains(&id.as_str()));
    }
    keep(&mut attrs.install_mode, member_ids);
    keep(&mut attrs.instructions, member_ids);
    keep(&mut attrs.source, member_ids);
    keep(&mut attrs.save_edits, member_ids);
    keep(&mut attrs.file_overrides, member_ids);
}

/// Lay out the contents of a collection archive in `out`
fn write_collection_dir(manifest: &Manifest, container: &Mod, collection_path: &Path, out: &Path) -> Result<()> {
    fs::write(out.join(MANIFEST_FILE), manifest.to_json_pretty()?)?;

    for tweak in &container.enabled_ini_tweaks {
        let src = collection_path.join(INI_TWEAKS_PATH).join(tweak);
        let dst = out.join(INI_TWEAKS_PATH).join(tweak);
        ensure_parent_dirs(&dst)?;
        match fs::copy(&src, &dst) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("ini tweak {} not found", tweak);
            }
            Err(e) => return Err(e.into()),
        }
    }

    for dir in [BUNDLED_PATH, PATCHES_PATH] {
        let src = collection_path.join(dir);
        if src.is_dir() {
            copy_tree(&src, &out.join(dir))?;
        }
    }
    Ok(())
}
