//! Test doubles shared by the collection tests.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use super::host::{
    ArchiveLister, CloneChoice, InstallInstruction, InstallSimulator, NoMetaLookup, Prompter,
    Services, SimulatedInstall, ToolArchiver,
};
use super::model::{Mod, RawId};
use super::table::{ArchiveInfo, ModTable};
use crate::archive::ArchiveEntry;
use crate::error::{PackagingError, Result};
use crate::hash::crc_from_buf;
use crate::patch::{PatchDecision, PatchMetrics};

/// Lister returning a fixed set of entries for every archive
#[derive(Debug, Clone, Default)]
pub struct FakeLister {
    pub entries: Vec<ArchiveEntry>,
}

impl FakeLister {
    pub fn from_files(files: &[(&str, &[u8])]) -> Self {
        Self {
            entries: files
                .iter()
                .map(|(path, content)| ArchiveEntry {
                    path: path.to_string(),
                    size: content.len() as u64,
                    is_dir: false,
                    crc: Some(crc_from_buf(content)),
                })
                .collect(),
        }
    }
}

impl ArchiveLister for FakeLister {
    fn list(&self, _archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(self.entries.clone())
    }
}

/// Simulator that "installs" a fixed set of files 1:1
#[derive(Debug, Clone, Default)]
pub struct FakeSimulator {
    pub files: Vec<(String, Vec<u8>)>,
}

impl FakeSimulator {
    pub fn from_files(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_vec()))
                .collect(),
        }
    }
}

impl InstallSimulator for FakeSimulator {
    fn simulate(&self, _archive_path: &Path, _choices: Option<&Value>) -> Result<SimulatedInstall> {
        let temp = TempDir::new()?;
        let mut instructions = Vec::new();
        for (path, content) in &self.files {
            let target = temp.path().join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
            instructions.push(InstallInstruction::copy(path.clone(), path.clone()));
        }
        Ok(SimulatedInstall::new(instructions, temp))
    }
}

/// Prompter with canned answers that records what it was asked
pub struct ScriptedPrompter {
    pub patch_decision: PatchDecision,
    pub continue_on_errors: bool,
    pub clone_choice: CloneChoice,
    pub error_prompts: Mutex<Vec<usize>>,
}

impl ScriptedPrompter {
    pub fn new(continue_on_errors: bool) -> Self {
        Self {
            patch_decision: PatchDecision::Skip,
            continue_on_errors,
            clone_choice: CloneChoice::Clone,
            error_prompts: Mutex::new(Vec::new()),
        }
    }

    /// Number of errors shown on each "continue?" prompt
    pub fn error_prompts(&self) -> Vec<usize> {
        self.error_prompts.lock().unwrap().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn patch_too_large(&self, _file: &str, _metrics: &PatchMetrics) -> PatchDecision {
        self.patch_decision
    }

    fn continue_despite_errors(&self, errors: &[PackagingError]) -> bool {
        self.error_prompts.lock().unwrap().push(errors.len());
        self.continue_on_errors
    }

    fn clone_or_contribute(&self, _collection_name: &str) -> CloneChoice {
        self.clone_choice
    }
}

pub fn services(lister: FakeLister, simulator: FakeSimulator) -> Services {
    Services {
        lister: Arc::new(lister),
        simulator: Arc::new(simulator),
        meta: Arc::new(NoMetaLookup),
        prompter: Arc::new(ScriptedPrompter::new(true)),
        archiver: Arc::new(ToolArchiver),
    }
}

/// Nexus-sourced mod "m" named "Test Mod" v1.0.0, installed with `files`,
/// plus a table holding it and its (dummy) archive
pub fn mod_fixture(staging: &Path, downloads: &Path, files: &[(&str, &[u8])]) -> (Mod, ModTable) {
    let mut m = Mod::new("m");
    m.mod_type = String::new();
    m.archive_id = Some("a-m".into());
    m.attributes.name = Some("Test Mod".into());
    m.attributes.version = Some("1.0.0".into());
    m.attributes.source = Some("nexus".into());
    m.attributes.mod_id = Some(RawId::Number(1));
    m.attributes.file_id = Some(RawId::Number(2));
    m.attributes.file_md5 = Some("0123456789abcdef0123456789abcdef".into());
    m.attributes.file_size = Some(1024);
    m.attributes.file_name = Some("Test Mod-1-1-0.zip".into());

    let mod_dir = staging.join(&m.installation_path);
    for (path, content) in files {
        let target = mod_dir.join(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }
    fs::write(downloads.join("Test Mod-1-1-0.zip"), b"archive").unwrap();

    let mut table = ModTable::new("skyrimse");
    table.insert_archive(ArchiveInfo {
        id: "a-m".into(),
        local_path: "Test Mod-1-1-0.zip".into(),
        game: "skyrimse".into(),
        file_md5: m.attributes.file_md5.clone(),
        size: Some(7),
    });
    table.insert(m.clone());
    (m, table)
}
