//! Image catalog capability.
//!
//! The catalog answers one question for layer matching: which existing
//! image, built on top of a given base image, already carries the most of a
//! requested set of labels. Each backend gets its own adapter; all of them
//! share [`select_best_image`] so the matching rule cannot drift between
//! backends.

mod local;
mod memory;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use layerpack_core::error::{LayerError, Result};
use layerpack_core::labels::parse_fingerprint_label;
use serde::{Deserialize, Serialize};

pub use local::LocalImageCatalog;
pub use memory::MemoryCatalog;

/// An image known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogImage {
    /// Image reference (e.g., "acme-role-packages:3f2a…")
    pub reference: String,
    /// Image ID (e.g., "sha256:abc123…")
    pub id: String,
    /// ID of the image this one was built from
    #[serde(default)]
    pub parent: Option<String>,
    /// Image labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// When the image was recorded
    pub created_at: DateTime<Utc>,
}

impl CatalogImage {
    pub fn new(reference: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            id: id.into(),
            parent: None,
            labels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the parent image ID.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Add a label; `key=value` sets a value, a bare key gets an empty one.
    pub fn with_label(mut self, label: &str) -> Self {
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether a label string is present.
    ///
    /// `key` matches when the label key exists, `key=value` when it also
    /// has that value.
    pub fn has_label(&self, label: &str) -> bool {
        match label.split_once('=') {
            Some((key, value)) => self.labels.get(key).map(String::as_str) == Some(value),
            None => self.labels.contains_key(label),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        self.reference == name
            || self.id == name
            || self.id.strip_prefix("sha256:") == Some(name)
    }
}

/// Result of a best-image lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestImage {
    /// Image to build from
    pub image: String,
    /// Candidate and mandatory labels the image carries
    pub matched_labels: BTreeSet<String>,
}

/// Catalog of existing images and their labels.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Resolve an image by reference or ID.
    async fn find_image(&self, name: &str) -> Result<CatalogImage>;

    /// Find the image derived from `base_name` that carries every mandatory
    /// label and the most candidate labels.
    async fn find_best_image(
        &self,
        base_name: &str,
        candidate_labels: &[String],
        mandatory_labels: &[String],
    ) -> Result<BestImage>;
}

/// Look up an image by reference or ID in a list of records.
pub fn find_in(images: &[CatalogImage], name: &str) -> Result<CatalogImage> {
    images
        .iter()
        .find(|img| img.matches_name(name))
        .cloned()
        .ok_or_else(|| LayerError::Dependency(format!("Image not found: {}", name)))
}

/// Pick the best image for a packages layer.
///
/// An image qualifies when it descends from the base image, carries every
/// mandatory label, and carries no fingerprint label outside the candidate
/// set. The qualifying image with the most candidate labels wins; ties go to
/// the smallest reference. Without any match the base image itself is
/// returned with no matched labels.
pub fn select_best_image(
    images: &[CatalogImage],
    base_name: &str,
    candidate_labels: &[String],
    mandatory_labels: &[String],
) -> Result<BestImage> {
    let base = find_in(images, base_name)?;
    let by_id: HashMap<&str, &CatalogImage> =
        images.iter().map(|img| (img.id.as_str(), img)).collect();
    let candidates: BTreeSet<&str> = candidate_labels.iter().map(String::as_str).collect();

    let mut best: Option<(&CatalogImage, BTreeSet<String>)> = None;

    for image in images {
        if !descends_from(image, &base.id, &by_id) {
            continue;
        }
        if !mandatory_labels.iter().all(|label| image.has_label(label)) {
            continue;
        }
        let foreign_package = image.labels.keys().any(|key| {
            parse_fingerprint_label(key).is_some() && !candidates.contains(key.as_str())
        });
        if foreign_package {
            continue;
        }

        let matched: BTreeSet<String> = candidate_labels
            .iter()
            .filter(|label| image.has_label(label))
            .cloned()
            .collect();
        if matched.is_empty() {
            continue;
        }

        let better = match &best {
            None => true,
            Some((current, current_matched)) => {
                matched.len() > current_matched.len()
                    || (matched.len() == current_matched.len()
                        && image.reference < current.reference)
            }
        };
        if better {
            best = Some((image, matched));
        }
    }

    match best {
        Some((image, mut matched_labels)) => {
            matched_labels.extend(mandatory_labels.iter().cloned());
            Ok(BestImage {
                image: image.reference.clone(),
                matched_labels,
            })
        }
        None => Ok(BestImage {
            image: base_name.to_string(),
            matched_labels: BTreeSet::new(),
        }),
    }
}

/// Whether `image` is `base_id` or has it somewhere in its parent chain.
fn descends_from(image: &CatalogImage, base_id: &str, by_id: &HashMap<&str, &CatalogImage>) -> bool {
    let mut current = Some(image);
    // Bounded walk; a malformed catalog may contain parent cycles
    for _ in 0..=by_id.len() {
        match current {
            Some(img) if img.id == base_id => return true,
            Some(img) => current = img.parent.as_deref().and_then(|p| by_id.get(p).copied()),
            None => return false,
        }
    }
    false
}
