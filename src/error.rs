//! Error taxonomy for collection operations.
//!
//! Collection building is a batch operation: most problems are collected
//! per mod as [`PackagingError`] values and presented together, while a
//! handful of conditions abort the whole operation immediately.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single entry of a structured rejection returned by the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphErrorDetail {
    /// Error class reported by the server (e.g. "LOCATE_ERROR")
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Name of the offending attribute (e.g. "modId", "fileId")
    #[serde(default)]
    pub attribute: String,
    /// The offending value as sent
    #[serde(default)]
    pub value: String,
    /// Human readable message
    #[serde(default)]
    pub message: String,
}

/// Errors raised by the collection pipeline
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// The user declined a prompt
    #[error("canceled by user")]
    UserCanceled,

    /// The operation was abandoned for a structural reason
    #[error("operation canceled: {0}")]
    ProcessCanceled(String),

    /// Malformed or incomplete identity data
    #[error("invalid data: {0}")]
    DataInvalid(String),

    /// Local files of a mod don't match the files in its archive
    #[error("\"{mod_name}\" cannot be exported using the replicate install mode, {} file(s) differ from the archive", .files.len())]
    ReplicateHashMismatch { mod_name: String, files: Vec<String> },

    /// A binary patch exceeded the allowed size ratio
    #[error("patch for \"{file}\" too large ({patch_size} bytes for a {file_size} byte file)")]
    PatchTooLarge {
        file: String,
        patch_size: u64,
        file_size: u64,
    },

    /// A patch expected inside the collection wasn't there
    #[error("patch file missing: {}", .0.display())]
    MissingPatch(PathBuf),

    /// The remote service couldn't find one of the referenced files
    #[error("the server can't find a file in the collection: {name}")]
    ModFileNotFound { file_id: u64, name: String },

    /// The remote service rejected the collection
    #[error("the server rejected this collection: {message}")]
    Rejected {
        message: String,
        details: Vec<String>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollectionError {
    pub fn is_user_canceled(&self) -> bool {
        matches!(self, CollectionError::UserCanceled)
    }

    /// Whether the error should be treated as a bug report candidate
    pub fn allow_report(&self) -> bool {
        matches!(
            self,
            CollectionError::Io(_) | CollectionError::Json(_) | CollectionError::Other(_)
        )
    }

    /// Whether the rest of a batch may proceed after this error
    pub fn may_ignore(&self) -> bool {
        !matches!(
            self,
            CollectionError::UserCanceled | CollectionError::PatchTooLarge { .. }
        )
    }
}

pub type Result<T, E = CollectionError> = std::result::Result<T, E>;

/// What went wrong while packaging one mod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackagingErrorKind {
    /// A member rule points at a mod that isn't installed
    NotInstalled,
    /// Source descriptor couldn't be deduced
    InvalidSource,
    /// Replicate mode requested but files were modified
    ReplicateHashMismatch,
    /// Saving edits was aborted
    PatchTooLarge,
    /// The user stopped the operation
    Canceled,
    /// A non-fatal validation finding
    Diagnostic,
    /// Anything else (I/O and the like)
    Failed,
}

/// Per-mod packaging problem, collected and presented at the end of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingError {
    pub kind: PackagingErrorKind,
    pub mod_id: Option<String>,
    pub mod_name: String,
    pub message: String,
    /// False if the export must not continue even with user consent
    pub may_ignore: bool,
}

impl PackagingError {
    pub fn new(kind: PackagingErrorKind, mod_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            mod_id: None,
            mod_name: mod_name.into(),
            message: message.into(),
            may_ignore: true,
        }
    }

    pub fn with_mod_id(mut self, mod_id: impl Into<String>) -> Self {
        self.mod_id = Some(mod_id.into());
        self
    }

    /// Classify a pipeline error raised while packaging `mod_name`
    pub fn from_error(mod_name: &str, err: &CollectionError) -> Self {
        let kind = match err {
            CollectionError::ReplicateHashMismatch { .. } => PackagingErrorKind::ReplicateHashMismatch,
            CollectionError::PatchTooLarge { .. } => PackagingErrorKind::PatchTooLarge,
            CollectionError::UserCanceled => PackagingErrorKind::Canceled,
            CollectionError::DataInvalid(_) => PackagingErrorKind::InvalidSource,
            _ => PackagingErrorKind::Failed,
        };
        Self {
            kind,
            mod_id: None,
            mod_name: mod_name.to_string(),
            message: format!("failed to pack \"{}\": {}", mod_name, err),
            may_ignore: err.may_ignore(),
        }
    }
}

impl std::fmt::Display for PackagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
