//! Deduce how a consumer re-acquires a collection member.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::host::MetaInfo;
use super::model::Mod;
use super::types::{SourceInfo, SourceType, UpdatePolicy};
use crate::error::{CollectionError, Result};

fn duplicate_markers() -> Option<&'static (Regex, Regex)> {
    static RE: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    RE.get_or_init(|| Some((Regex::new(r"\.\d+$").ok()?, Regex::new(r" \(\d+\)$").ok()?)))
        .as_ref()
}

/// Turn a download's file name into a matching expression.
///
/// Drops the extension and a trailing `.N` or ` (N)`, the markers left by
/// duplicate downloads.
pub fn sanitize_expression(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match duplicate_markers() {
        Some((dotted, paren)) => {
            let stem = dotted.replace(&stem, "");
            paren.replace(&stem, "").into_owned()
        }
        None => stem,
    }
}

/// Update policy implied by a member rule's version match
pub fn policy_for_version_match(version_match: Option<&str>) -> UpdatePolicy {
    match version_match {
        Some("*") => UpdatePolicy::Latest,
        None => UpdatePolicy::Prefer,
        Some(v) if v.ends_with(super::version::PREFER_SUFFIX) => UpdatePolicy::Prefer,
        Some(_) => UpdatePolicy::Exact,
    }
}

/// Build the complete source descriptor of a member.
///
/// `override_info` is what the curator configured, `version_match` comes
/// from the container's rule on the mod, `meta` from the metadata service.
/// Fields already present in the override are never replaced.
pub fn deduce_source(
    m: &Mod,
    override_info: Option<&SourceInfo>,
    version_match: Option<&str>,
    meta: &[MetaInfo],
    tag: Option<&str>,
) -> Result<SourceInfo> {
    let mut res = override_info
        .cloned()
        .unwrap_or_else(|| SourceInfo::of_type(SourceType::Nexus));
    let attrs = &m.attributes;

    if res.source_type == SourceType::Nexus {
        if !attrs.is_nexus_sourced() {
            return Err(CollectionError::DataInvalid(format!(
                "\"{}\" doesn't have Nexus as its source",
                m.display_name()
            )));
        }
        match (m.repo_mod_id(), m.repo_file_id()) {
            (Some(mod_id), Some(file_id)) => {
                res.mod_id = Some(mod_id);
                res.file_id = Some(file_id);
            }
            _ => {
                return Err(CollectionError::DataInvalid(format!(
                    "\"{}\" is missing mod id or file id",
                    m.id
                )));
            }
        }
    }

    if res.source_type.needs_url() && res.url.as_deref().is_none_or(str::is_empty) {
        return Err(CollectionError::DataInvalid(format!("\"{}\" has no URL set", m.id)));
    }

    // bundled content is stored uncompressed, the archive hash won't apply
    if res.source_type != SourceType::Bundle && res.md5.is_none() {
        res.md5 = attrs.file_md5.clone();
    }
    if res.file_size.is_none() {
        res.file_size = attrs.file_size;
    }
    if res.logical_filename.is_none() {
        // the file may have been renamed before installation
        res.logical_filename = meta
            .first()
            .and_then(|info| info.logical_file_name.clone())
            .or_else(|| attrs.logical_file_name.clone());
    }

    if res.update_policy.is_none() {
        res.update_policy = Some(if res.source_type == SourceType::Bundle {
            UpdatePolicy::Exact
        } else {
            policy_for_version_match(version_match)
        });
    }

    if res.md5.is_none() && res.logical_filename.is_none() && res.file_expression.is_none() {
        if let Some(file_name) = attrs.file_name.as_deref() {
            res.file_expression = Some(sanitize_expression(file_name));
        }
    }

    if res.tag.is_none() {
        res.tag = tag.map(str::to_string);
    }

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::model::RawId;
    use crate::collection::types::COLLECTION_MOD_TYPE;

    fn nexus_mod() -> Mod {
        let mut m = Mod::new("m1");
        m.attributes.source = Some("nexus".into());
        m.attributes.mod_id = Some(RawId::Number(100));
        m.attributes.file_id = Some(RawId::Text("200".into()));
        m.attributes.file_md5 = Some("abcdef".into());
        m.attributes.file_size = Some(4096);
        m.attributes.logical_file_name = Some("Local Name".into());
        m
    }

    #[test]
    fn test_sanitize_expression() {
        assert_eq!(sanitize_expression("Super Mod v2 (1).zip"), "Super Mod v2");
        assert_eq!(sanitize_expression("Other-1-2.7z.1"), "Other-1-2.7z");
        assert_eq!(sanitize_expression("Plain.rar"), "Plain");
        assert_eq!(sanitize_expression("file.2.zip"), "file");
    }

    #[test]
    fn test_nexus_source() {
        let m = nexus_mod();
        let meta = vec![MetaInfo {
            logical_file_name: Some("Remote Name".into()),
            ..MetaInfo::default()
        }];
        let src = deduce_source(&m, None, Some("*"), &meta, Some("tag1")).unwrap();
        assert_eq!(src.source_type, SourceType::Nexus);
        assert_eq!((src.mod_id, src.file_id), (Some(100), Some(200)));
        assert_eq!(src.md5.as_deref(), Some("abcdef"));
        assert_eq!(src.file_size, Some(4096));
        assert_eq!(src.logical_filename.as_deref(), Some("Remote Name"));
        assert_eq!(src.update_policy, Some(UpdatePolicy::Latest));
        assert_eq!(src.tag.as_deref(), Some("tag1"));

        // same inputs, same result
        assert_eq!(deduce_source(&m, None, Some("*"), &meta, Some("tag1")).unwrap(), src);
    }

    #[test]
    fn test_nexus_requires_valid_ids() {
        let mut m = nexus_mod();
        m.attributes.file_id = Some(RawId::Number(0));
        let err = deduce_source(&m, None, None, &[], None).unwrap_err();
        assert!(matches!(err, CollectionError::DataInvalid(_)));

        m.attributes.file_id = Some(RawId::Text("abc".into()));
        assert!(deduce_source(&m, None, None, &[], None).is_err());

        let mut local = nexus_mod();
        local.attributes.source = None;
        assert!(deduce_source(&local, None, None, &[], None).is_err());
    }

    #[test]
    fn test_container_uses_collection_ids() {
        let mut m = nexus_mod();
        m.mod_type = COLLECTION_MOD_TYPE.into();
        m.attributes.collection_id = Some(RawId::Number(5));
        m.attributes.revision_id = Some(RawId::Number(6));
        let src = deduce_source(&m, None, None, &[], None).unwrap();
        assert_eq!((src.mod_id, src.file_id), (Some(5), Some(6)));
    }

    #[test]
    fn test_browse_requires_url() {
        let m = Mod::new("m2");
        let browse = SourceInfo::of_type(SourceType::Browse);
        assert!(deduce_source(&m, Some(&browse), None, &[], None).is_err());

        let browse = SourceInfo {
            url: Some("https://example.org/mod".into()),
            ..browse
        };
        let src = deduce_source(&m, Some(&browse), Some("1.0.0"), &[], None).unwrap();
        assert_eq!(src.update_policy, Some(UpdatePolicy::Exact));
    }

    #[test]
    fn test_bundle_skips_md5_and_pins_version() {
        let m = nexus_mod();
        let bundle = SourceInfo::of_type(SourceType::Bundle);
        let src = deduce_source(&m, Some(&bundle), Some("*"), &[], Some("t")).unwrap();
        assert!(src.md5.is_none());
        assert_eq!(src.update_policy, Some(UpdatePolicy::Exact));
        assert!(src.mod_id.is_none());
    }

    #[test]
    fn test_policy_from_version_match() {
        assert_eq!(policy_for_version_match(None), UpdatePolicy::Prefer);
        assert_eq!(policy_for_version_match(Some(">=1.0.0+prefer")), UpdatePolicy::Prefer);
        assert_eq!(policy_for_version_match(Some("*")), UpdatePolicy::Latest);
        assert_eq!(policy_for_version_match(Some(">=1.0.0")), UpdatePolicy::Exact);
    }

    #[test]
    fn test_file_name_fallback() {
        let mut m = Mod::new("m3");
        m.attributes.file_name = Some("Super Mod v2 (1).zip".into());
        let manual = SourceInfo::of_type(SourceType::Manual);
        let src = deduce_source(&m, Some(&manual), None, &[], None).unwrap();
        assert_eq!(src.file_expression.as_deref(), Some("Super Mod v2"));
    }
}
