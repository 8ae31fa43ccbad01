//! Talking to the collection service: upload and metadata lookup.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::host::{MetaInfo, MetaLookup, MetaQuery};
use super::model::Mod;
use super::table::ModTable;
use super::types::Manifest;
use crate::error::{CollectionError, GraphErrorDetail, Result};

const API_KEY_HEADER: &str = "apikey";
const LOCATE_ERROR: &str = "LOCATE_ERROR";

/// Keys the service doesn't accept, removed before upload
const INFO_OMIT: &[&str] = &["installInstructions"];
const MOD_OMIT: &[&str] = &[
    "hashes",
    "choices",
    "patches",
    "details",
    "instructions",
    "phase",
    "fileOverrides",
];
const SOURCE_OMIT: &[&str] = &["instructions", "fileSize", "tag"];

/// What the service returns for an accepted submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub collection_id: u64,
    pub collection_slug: String,
    #[serde(default)]
    pub revision_id: Option<u64>,
    #[serde(default)]
    pub revision_number: Option<u32>,
}

/// Ways the service can refuse a submission
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("file {file_id} not found on the server")]
    ModFileNotFound { file_id: u64 },

    #[error("{0}")]
    ParameterInvalid(String),

    #[error("{message}")]
    Graph {
        message: String,
        details: Vec<GraphErrorDetail>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Submits a collection to the remote service
pub trait Uploader: Send + Sync {
    /// Upload `manifest` together with the packed archive.
    ///
    /// With a `collection_id` a new revision of that collection is created.
    fn submit(
        &self,
        manifest: &Value,
        archive_path: &Path,
        collection_id: Option<u64>,
    ) -> std::result::Result<UploadResult, UploadError>;
}

fn omit(value: &mut Value, keys: &[&str]) {
    if let Some(obj) = value.as_object_mut() {
        for key in keys {
            obj.remove(*key);
        }
    }
}

/// The subset of a manifest that is sent alongside the archive
pub fn filter_info(manifest: &Manifest) -> Result<Value> {
    let mut info = serde_json::to_value(&manifest.info)?;
    omit(&mut info, INFO_OMIT);

    let mut mods = Vec::with_capacity(manifest.mods.len());
    for m in &manifest.mods {
        let mut value = serde_json::to_value(m)?;
        omit(&mut value, MOD_OMIT);
        if let Some(source) = value.get_mut("source") {
            omit(source, SOURCE_OMIT);
        }
        mods.push(value);
    }

    Ok(serde_json::json!({ "info": info, "mods": mods }))
}

/// Remote id to submit a revision to, if the actor may revise it.
///
/// The service doesn't distinguish uploader and author, so either field
/// identifies the owner.
pub fn reusable_collection_id(container: &Mod, uploader_name: &str) -> Option<u64> {
    let id = container.attributes.collection_id.as_ref()?.as_u64()?;
    let attrs = &container.attributes;
    if attrs.uploader_or_author() != Some(uploader_name) && !attrs.has_edit_permission() {
        info!("user doesn't match original author, creating new collection");
        return None;
    }
    Some(id)
}

fn find_by_attribute<'a>(table: &'a ModTable, value: &str, get: impl Fn(&Mod) -> Option<u64>) -> Option<&'a Mod> {
    table
        .mods
        .values()
        .find(|m| get(m).is_some_and(|id| id.to_string() == value))
}

/// Human readable form of one rejection detail
pub fn render_graph_detail(table: &ModTable, message: &str, det: &GraphErrorDetail) -> String {
    if det.error_type != LOCATE_ERROR || det.value.is_empty() {
        return if det.message.is_empty() {
            message.to_string()
        } else {
            det.message.clone()
        };
    }

    match det.attribute.as_str() {
        "modId" => match find_by_attribute(table, &det.value, Mod::repo_mod_id) {
            Some(m) => format!(
                "Mod not found on the server: {} (modId: {}), it may have been removed.",
                m.display_name(),
                det.value
            ),
            None => format!("Mod with id {} not found", det.value),
        },
        "fileId" => match find_by_attribute(table, &det.value, Mod::repo_file_id) {
            Some(m) => format!(
                "Mod not found on the server: {} (modId: {}, fileId: {}), it may have been removed.",
                m.display_name_with_version(),
                m.repo_mod_id()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "Unknown".to_string()),
                det.value
            ),
            None => format!("Mod with file id {} not found", det.value),
        },
        _ => det.message.clone(),
    }
}

/// Translate a refused submission into a pipeline error
pub fn map_upload_error(err: UploadError, manifest: &Manifest, table: &ModTable) -> CollectionError {
    match err {
        UploadError::ModFileNotFound { file_id } => {
            let name = manifest
                .mods
                .iter()
                .find(|m| m.source.file_id == Some(file_id))
                .map(|m| m.name.clone())
                .unwrap_or_else(|| format!("id: {}", file_id));
            CollectionError::ModFileNotFound { file_id, name }
        }
        UploadError::ParameterInvalid(message) => CollectionError::Rejected {
            message: if message.is_empty() {
                "<No reason given>".to_string()
            } else {
                message
            },
            details: Vec::new(),
        },
        UploadError::Graph { message, details } => {
            let rendered = details
                .iter()
                .map(|det| render_graph_detail(table, &message, det))
                .collect();
            CollectionError::Rejected {
                message,
                details: rendered,
            }
        }
        UploadError::Other(e) => CollectionError::Other(e),
    }
}

fn client(api_key: Option<&str>, timeout: Duration) -> anyhow::Result<Client> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(key).context("Invalid API key format")?,
        );
    }
    Client::builder()
        .default_headers(headers)
        .user_agent(concat!("collpack/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Metadata lookup against a server keyed by archive md5
pub struct HttpMetaLookup {
    client: Client,
    server: String,
}

impl HttpMetaLookup {
    pub fn new(server: &str, api_key: Option<&str>) -> anyhow::Result<Self> {
        Ok(Self {
            client: client(api_key, Duration::from_secs(15))?,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn fetch(&self, md5: &str) -> anyhow::Result<Vec<MetaInfo>> {
        let url = format!("{}/by_key/{}", self.server, md5);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("Failed to query {}", url))?;
        if !response.status().is_success() {
            anyhow::bail!("metadata server returned {}", response.status());
        }
        response.json().context("Failed to parse metadata")
    }
}

impl MetaLookup for HttpMetaLookup {
    fn lookup(&self, query: &MetaQuery) -> Vec<MetaInfo> {
        let Some(md5) = query.file_md5.as_deref() else {
            return Vec::new();
        };
        match self.fetch(md5) {
            Ok(found) => {
                debug!("{} metadata entries for {}", found.len(), md5);
                found
            }
            Err(e) => {
                warn!("metadata lookup failed for {}: {:#}", md5, e);
                Vec::new()
            }
        }
    }
}

/// Error body returned by the collection service
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceError {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    file_id: Option<u64>,
    #[serde(default)]
    details: Vec<GraphErrorDetail>,
}

impl From<ServiceError> for UploadError {
    fn from(err: ServiceError) -> Self {
        match err.name.as_str() {
            "ModFileNotFound" => UploadError::ModFileNotFound {
                file_id: err.file_id.unwrap_or(0),
            },
            "ParameterInvalid" => UploadError::ParameterInvalid(err.message),
            "GraphError" => UploadError::Graph {
                message: err.message,
                details: err.details,
            },
            _ => UploadError::Other(anyhow::anyhow!("upload failed: {} {}", err.name, err.message)),
        }
    }
}

/// Uploader speaking JSON to a collection service.
///
/// The manifest is posted to `<server>/collections` (or
/// `<server>/collections/<id>/revisions`), the archive is then put to the
/// returned revision.
pub struct HttpUploader {
    client: Client,
    server: String,
}

impl HttpUploader {
    pub fn new(server: &str, api_key: Option<&str>) -> anyhow::Result<Self> {
        Ok(Self {
            client: client(api_key, Duration::from_secs(600))?,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn check(response: reqwest::blocking::Response) -> std::result::Result<reqwest::blocking::Response, UploadError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().unwrap_or_default();
        match serde_json::from_str::<ServiceError>(&body) {
            Ok(err) if !err.name.is_empty() => Err(err.into()),
            _ => Err(UploadError::Other(anyhow::anyhow!(
                "collection service error {}: {}",
                status,
                body
            ))),
        }
    }
}

impl Uploader for HttpUploader {
    fn submit(
        &self,
        manifest: &Value,
        archive_path: &Path,
        collection_id: Option<u64>,
    ) -> std::result::Result<UploadResult, UploadError> {
        let url = match collection_id {
            Some(id) => format!("{}/collections/{}/revisions", self.server, id),
            None => format!("{}/collections", self.server),
        };
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "collectionData": manifest }))
            .send()
            .with_context(|| format!("Failed to submit collection to {}", url))?;
        let result: UploadResult = Self::check(response)?
            .json()
            .context("Failed to parse submission result")?;

        let archive = std::fs::read(archive_path)
            .with_context(|| format!("Failed to read {}", archive_path.display()))?;
        let revision = result
            .revision_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "latest".to_string());
        let url = format!(
            "{}/collections/{}/revisions/{}/archive",
            self.server, result.collection_id, revision
        );
        let response = self
            .client
            .put(&url)
            .body(archive)
            .send()
            .with_context(|| format!("Failed to upload archive to {}", url))?;
        Self::check(response)?;

        info!(
            "uploaded collection {} ({})",
            result.collection_id, result.collection_slug
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::model::RawId;
    use crate::collection::types::{CollectionInfo, CollectionMod, FileHash, SourceInfo};

    fn manifest() -> Manifest {
        let mut source = SourceInfo::default();
        source.file_id = Some(42);
        source.file_size = Some(10);
        source.tag = Some("t".into());
        Manifest {
            info: CollectionInfo {
                name: "My Collection".into(),
                install_instructions: "read me".into(),
                ..CollectionInfo::default()
            },
            mods: vec![CollectionMod {
                name: "Foo".into(),
                source,
                hashes: Some(vec![FileHash {
                    path: "a".into(),
                    md5: "b".into(),
                }]),
                phase: 2,
                ..CollectionMod::default()
            }],
            ..Manifest::default()
        }
    }

    #[test]
    fn test_filter_info() {
        let filtered = filter_info(&manifest()).unwrap();
        assert!(filtered["info"].get("installInstructions").is_none());
        assert_eq!(filtered["info"]["name"], "My Collection");
        let m = &filtered["mods"][0];
        assert!(m.get("hashes").is_none());
        assert!(m.get("phase").is_none());
        assert!(m["source"].get("fileSize").is_none());
        assert!(m["source"].get("tag").is_none());
        assert_eq!(m["source"]["fileId"], 42);
        assert!(filtered.get("modRules").is_none());
    }

    #[test]
    fn test_reusable_collection_id() {
        let mut container = Mod::new("c");
        assert_eq!(reusable_collection_id(&container, "alice"), None);

        container.attributes.collection_id = Some(RawId::Number(7));
        container.attributes.author = Some("alice".into());
        assert_eq!(reusable_collection_id(&container, "alice"), Some(7));
        assert_eq!(reusable_collection_id(&container, "bob"), None);

        container.attributes.permissions = vec!["collection:edit".into()];
        assert_eq!(reusable_collection_id(&container, "bob"), Some(7));
    }

    #[test]
    fn test_map_upload_errors() {
        let table = ModTable::new("skyrimse");
        let err = map_upload_error(UploadError::ModFileNotFound { file_id: 42 }, &manifest(), &table);
        assert!(matches!(err, CollectionError::ModFileNotFound { ref name, .. } if name == "Foo"));

        let err = map_upload_error(UploadError::ModFileNotFound { file_id: 1 }, &manifest(), &table);
        assert!(matches!(err, CollectionError::ModFileNotFound { ref name, .. } if name == "id: 1"));

        let err = map_upload_error(UploadError::ParameterInvalid(String::new()), &manifest(), &table);
        assert!(matches!(err, CollectionError::Rejected { ref message, .. } if message == "<No reason given>"));
        assert!(!err.allow_report());
    }

    #[test]
    fn test_graph_error_hints() {
        let mut table = ModTable::new("skyrimse");
        let mut m = Mod::new("m");
        m.attributes.name = Some("Foo".into());
        m.attributes.version = Some("1.2".into());
        m.attributes.mod_id = Some(RawId::Number(5));
        m.attributes.file_id = Some(RawId::Text("9".into()));
        table.insert(m);

        let detail = |attribute: &str, value: &str| GraphErrorDetail {
            error_type: LOCATE_ERROR.into(),
            attribute: attribute.into(),
            value: value.into(),
            message: "raw".into(),
        };
        let err = UploadError::Graph {
            message: "invalid".into(),
            details: vec![
                detail("modId", "5"),
                detail("fileId", "9"),
                detail("fileId", "10"),
                GraphErrorDetail {
                    error_type: "OTHER".into(),
                    ..GraphErrorDetail::default()
                },
            ],
        };
        match map_upload_error(err, &manifest(), &table) {
            CollectionError::Rejected { message, details } => {
                assert_eq!(message, "invalid");
                assert_eq!(
                    details,
                    vec![
                        "Mod not found on the server: Foo (modId: 5), it may have been removed.".to_string(),
                        "Mod not found on the server: Foo (v1.2) (modId: 5, fileId: 9), it may have been removed."
                            .to_string(),
                        "Mod with file id 10 not found".to_string(),
                        "invalid".to_string(),
                    ]
                );
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_service_error_names() {
        let err: UploadError = ServiceError {
            name: "ModFileNotFound".into(),
            file_id: Some(3),
            ..ServiceError::default()
        }
        .into();
        assert!(matches!(err, UploadError::ModFileNotFound { file_id: 3 }));

        let err: UploadError = ServiceError {
            name: "Unexpected".into(),
            ..ServiceError::default()
        }
        .into();
        assert!(matches!(err, UploadError::Other(_)));
    }

    #[test]
    fn test_meta_lookup_without_md5_is_empty() {
        let lookup = HttpMetaLookup::new("http://127.0.0.1:9", None).unwrap();
        assert!(lookup.lookup(&MetaQuery::default()).is_empty());
    }
}
