//! Content-derived names for packages layer images.
//!
//! The tag is a SHA-256 over the tool version, the base image identity, and
//! every distinct package (sorted by fingerprint), so equal inputs always
//! give the same reference and any package change gives a new one.

use std::collections::BTreeMap;
use std::fmt;

use layerpack_core::model::{Package, Role};
use sha2::{Digest, Sha256};

/// An image `name:tag` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub name: String,
    pub tag: String,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Distinct packages across all roles, ordered by fingerprint.
pub fn sorted_packages(roles: &[Role]) -> Vec<&Package> {
    let mut by_fingerprint: BTreeMap<&str, &Package> = BTreeMap::new();
    for pkg in roles.iter().flat_map(|role| role.packages()) {
        by_fingerprint.entry(pkg.fingerprint.as_str()).or_insert(pkg);
    }
    by_fingerprint.into_values().collect()
}

/// Hex digest identifying a package set built by `tool_version` on
/// `base_identity`. Packages must already be sorted and distinct.
pub fn packages_digest(tool_version: &str, base_identity: &str, packages: &[&Package]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", tool_version, base_identity).as_bytes());
    for pkg in packages {
        for field in [&pkg.fingerprint, &pkg.name, &pkg.sha1] {
            hasher.update([0u8]);
            hasher.update(field.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Reference of the packages layer image for `roles`.
pub fn packages_layer_reference(
    repository: &str,
    tool_version: &str,
    base_identity: &str,
    roles: &[Role],
) -> ImageReference {
    let packages = sorted_packages(roles);
    let digest = packages_digest(tool_version, base_identity, &packages);

    ImageReference {
        name: sanitize_docker_name(&format!("{}-role-packages", repository)),
        tag: sanitize_docker_name(&digest),
    }
}

/// Make a string usable as an image name or tag component.
///
/// Lowercases, and replaces anything outside `[a-z0-9._-]` with `-`.
pub fn sanitize_docker_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
