//! Capabilities the collection pipeline consumes from its host.
//!
//! Archive listing, install simulation, metadata lookup and user prompts are
//! all behind traits so the pipeline can run against the real tools, a
//! remote service, or test doubles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;
use tracing::{debug, info};

use crate::archive::{self, ArchiveEntry};
use crate::error::{PackagingError, Result};
use crate::patch::{PatchDecision, PatchMetrics};
use crate::paths::list_files;

/// One file a simulated install would place: archive path -> mod path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallInstruction {
    pub source: String,
    pub destination: String,
}

impl InstallInstruction {
    pub fn copy(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Lists archive entries with their CRCs
pub trait ArchiveLister: Send + Sync {
    fn list(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>>;
}

/// Lister backed by the zip crate and the 7z binary
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolLister;

impl ArchiveLister for ToolLister {
    fn list(&self, archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(archive::list_archive(archive_path)?)
    }
}

/// Packs a staging directory into a single archive
pub trait Archiver: Send + Sync {
    fn compress(&self, source_dir: &Path, archive_path: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolArchiver;

impl Archiver for ToolArchiver {
    fn compress(&self, source_dir: &Path, archive_path: &Path) -> Result<()> {
        Ok(archive::compress_dir(source_dir, archive_path)?)
    }
}

/// Result of a simulated fresh install.
///
/// The extracted originals live in a temporary directory that is removed
/// when this value is dropped.
pub struct SimulatedInstall {
    pub instructions: Vec<InstallInstruction>,
    temp: TempDir,
}

impl SimulatedInstall {
    pub fn new(instructions: Vec<InstallInstruction>, temp: TempDir) -> Self {
        Self { instructions, temp }
    }

    /// Directory the instruction sources are relative to
    pub fn root(&self) -> &Path {
        self.temp.path()
    }
}

/// Determines which archive file ends up where on a fresh install
pub trait InstallSimulator: Send + Sync {
    fn simulate(&self, archive_path: &Path, choices: Option<&Value>) -> Result<SimulatedInstall>;
}

/// Simulator for archives without an installer script.
///
/// Extracts everything and maps each file 1:1 into the mod folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractingSimulator;

impl InstallSimulator for ExtractingSimulator {
    fn simulate(&self, archive_path: &Path, choices: Option<&Value>) -> Result<SimulatedInstall> {
        if choices.is_some() {
            debug!(
                "installer choices ignored when simulating {}",
                archive_path.display()
            );
        }

        let temp = TempDir::new()?;
        let count = archive::extract_all(archive_path, temp.path())?;
        info!("extracted {} files from {}", count, archive_path.display());

        let instructions = list_files(temp.path())?
            .into_iter()
            .map(|(rel, _)| InstallInstruction::copy(rel.clone(), rel))
            .collect();

        Ok(SimulatedInstall::new(instructions, temp))
    }
}

/// Query sent to the metadata service
#[derive(Debug, Clone, Default)]
pub struct MetaQuery {
    pub file_name: Option<String>,
    pub file_path: Option<PathBuf>,
    pub file_md5: Option<String>,
    pub file_size: Option<u64>,
    pub game_id: String,
}

/// What the metadata service knows about a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaInfo {
    #[serde(default)]
    pub logical_file_name: Option<String>,
    #[serde(default)]
    pub file_version: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
}

/// Best-effort metadata lookup. Failures yield an empty list.
pub trait MetaLookup: Send + Sync {
    fn lookup(&self, query: &MetaQuery) -> Vec<MetaInfo>;
}

/// Lookup that never knows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetaLookup;

impl MetaLookup for NoMetaLookup {
    fn lookup(&self, _query: &MetaQuery) -> Vec<MetaInfo> {
        Vec::new()
    }
}

/// Answer to "you may edit this collection but don't own it"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneChoice {
    /// Fresh, unpublished copy
    Clone,
    /// Keep the upload identity and contribute revisions
    Contribute,
}

/// Decisions the pipeline delegates to the user
pub trait Prompter: Send + Sync {
    fn patch_too_large(&self, file: &str, metrics: &PatchMetrics) -> PatchDecision;

    /// Whether to go on after ignorable packaging errors
    fn continue_despite_errors(&self, errors: &[PackagingError]) -> bool;

    fn clone_or_contribute(&self, collection_name: &str) -> CloneChoice;
}

/// Non-interactive prompter: skips oversized patches, clones, and continues
/// past errors only when `assume_yes` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoPrompter {
    pub assume_yes: bool,
}

impl Prompter for AutoPrompter {
    fn patch_too_large(&self, file: &str, metrics: &PatchMetrics) -> PatchDecision {
        info!(
            "skipping edits of {} ({} byte patch)",
            file, metrics.patch_size
        );
        PatchDecision::Skip
    }

    fn continue_despite_errors(&self, _errors: &[PackagingError]) -> bool {
        self.assume_yes
    }

    fn clone_or_contribute(&self, _collection_name: &str) -> CloneChoice {
        CloneChoice::Clone
    }
}

/// Everything an operation needs from the outside world
#[derive(Clone)]
pub struct Services {
    pub lister: Arc<dyn ArchiveLister>,
    pub simulator: Arc<dyn InstallSimulator>,
    pub meta: Arc<dyn MetaLookup>,
    pub prompter: Arc<dyn Prompter>,
    pub archiver: Arc<dyn Archiver>,
}

impl Services {
    /// Local tools only, no metadata service
    pub fn local(assume_yes: bool) -> Self {
        Self {
            lister: Arc::new(ToolLister),
            simulator: Arc::new(ExtractingSimulator),
            meta: Arc::new(NoMetaLookup),
            prompter: Arc::new(AutoPrompter { assume_yes }),
            archiver: Arc::new(ToolArchiver),
        }
    }

    pub fn with_meta(mut self, meta: Arc<dyn MetaLookup>) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }
}
