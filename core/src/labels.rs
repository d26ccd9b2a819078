//! Image label convention for packages layers.
//!
//! A built packages layer image carries one label per baked-in package plus
//! a mandatory generator version label. Layer matching relies on both.
//!
//! # Label Schema
//!
//! - `fingerprint.<fp>` - a package with fingerprint `<fp>` is present in the image
//! - `version.generator.layerpack=<version>` - tool version that built the image
//!
//! # Example
//!
//! ```dockerfile
//! LABEL fingerprint.7f3a9c="ruby"
//! LABEL version.generator.layerpack=1.2.3
//! ```

/// Prefix of per-package labels.
pub const FINGERPRINT_LABEL_PREFIX: &str = "fingerprint";

/// Key of the generator version label.
pub const VERSION_LABEL_KEY: &str = "version.generator.layerpack";

/// Label string marking that a package with `fingerprint` is in the image.
pub fn fingerprint_label(fingerprint: &str) -> String {
    format!("{}.{}", FINGERPRINT_LABEL_PREFIX, fingerprint)
}

/// Extract the fingerprint from a `fingerprint.<fp>` label.
///
/// Returns `None` for any label of another shape, including `key=value`
/// identity labels.
pub fn parse_fingerprint_label(label: &str) -> Option<&str> {
    let mut parts = label.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(FINGERPRINT_LABEL_PREFIX), Some(fp), None) if !fp.is_empty() => Some(fp),
        _ => None,
    }
}

/// Mandatory identity label for images built by `tool_version`.
///
/// `+` is not valid in the compared label value and is replaced by `_`.
pub fn version_label(tool_version: &str) -> String {
    format!("{}={}", VERSION_LABEL_KEY, tool_version.replace('+', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_label() {
        assert_eq!(fingerprint_label("abc"), "fingerprint.abc");
    }

    #[test]
    fn test_parse_fingerprint_label() {
        assert_eq!(parse_fingerprint_label("fingerprint.abc"), Some("abc"));
        assert_eq!(parse_fingerprint_label("fingerprint."), None);
        assert_eq!(parse_fingerprint_label("fingerprint.a.b"), None);
        assert_eq!(parse_fingerprint_label("other.abc"), None);
        assert_eq!(
            parse_fingerprint_label("version.generator.layerpack=1.0"),
            None
        );
    }

    #[test]
    fn test_version_label_replaces_plus() {
        assert_eq!(
            version_label("1.2.3+45.gabcdef"),
            "version.generator.layerpack=1.2.3_45.gabcdef"
        );
    }
}
