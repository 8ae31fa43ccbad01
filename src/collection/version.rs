//! Version-match expressions used by rule references.
//!
//! A version match is one of:
//! - `*`: any version
//! - a semver range (`>=1.2.0`, `^2`), optionally suffixed with `+prefer`
//! - anything else: an exact version, compared after coercion

use std::sync::OnceLock;

use regex::Regex;
use semver::{Version, VersionReq};

/// Suffix marking "this version if available, newer otherwise"
pub const PREFER_SUFFIX: &str = "+prefer";

fn version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok())
        .as_ref()
}

/// Coerce a free-form version string to `major.minor.patch`.
///
/// `"v2.1 beta"` becomes `"2.1.0"`. Returns `None` if there is no number at all.
pub fn coerce_to_semver(version: &str) -> Option<String> {
    let caps = version_regex()?.captures(version)?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(format!("{}.{}.{}", part(1), part(2), part(3)))
}

/// Whether `version` satisfies `version_match`
pub fn version_matches(version_match: &str, version: &str) -> bool {
    if version_match == "*" {
        return true;
    }

    let expr = version_match
        .strip_suffix(PREFER_SUFFIX)
        .unwrap_or(version_match)
        .trim();

    let is_range = expr.starts_with(['>', '<', '=', '~', '^']);
    if is_range {
        let req = VersionReq::parse(expr);
        let ver = coerce_to_semver(version).and_then(|v| Version::parse(&v).ok());
        if let (Ok(req), Some(ver)) = (req, ver) {
            return req.matches(&ver);
        }
        return false;
    }

    if expr == version {
        return true;
    }
    match (coerce_to_semver(expr), coerce_to_semver(version)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether a member rule accepts versions other than the installed one.
///
/// Undefined, `*` and `>=` lower bounds are all fuzzy.
pub fn is_fuzzy(version_match: Option<&str>) -> bool {
    match version_match {
        None => true,
        Some(v) => v == "*" || v.starts_with(">="),
    }
}

/// Whether a version match is `*` or a `+prefer` range
pub fn is_loose(version_match: Option<&str>) -> bool {
    matches!(version_match, Some(v) if v == "*" || v.ends_with(PREFER_SUFFIX))
}

/// Version match for a member that prefers `version` but accepts newer ones
pub fn prefer_match(version: &str) -> Option<String> {
    coerce_to_semver(version).map(|v| format!(">={}{}", v, PREFER_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce() {
        assert_eq!(coerce_to_semver("1.2.3").as_deref(), Some("1.2.3"));
        assert_eq!(coerce_to_semver("v2.1 beta").as_deref(), Some("2.1.0"));
        assert_eq!(coerce_to_semver("7").as_deref(), Some("7.0.0"));
        assert_eq!(coerce_to_semver("unknown"), None);
    }

    #[test]
    fn test_version_matches() {
        assert!(version_matches("*", "anything"));
        assert!(version_matches("1.2", "1.2.0"));
        assert!(!version_matches("1.2", "1.3"));
        assert!(version_matches(">=1.2.0+prefer", "1.4"));
        assert!(!version_matches(">=1.2.0+prefer", "1.1.9"));
        assert!(version_matches("^2", "2.7.1"));
        assert!(!version_matches(">=x", "1.0.0"));
    }

    #[test]
    fn test_fuzziness() {
        assert!(is_fuzzy(None));
        assert!(is_fuzzy(Some("*")));
        assert!(is_fuzzy(Some(">=1.0.0+prefer")));
        assert!(!is_fuzzy(Some("1.0.0")));

        assert!(!is_loose(None));
        assert!(is_loose(Some("*")));
        assert!(is_loose(Some(">=1.0.0+prefer")));
        assert!(!is_loose(Some(">=1.0.0")));
    }

    #[test]
    fn test_prefer_match() {
        assert_eq!(prefer_match("1.5").as_deref(), Some(">=1.5.0+prefer"));
        assert_eq!(prefer_match(""), None);
    }
}
