//! Disk-backed image catalog.
//!
//! Keeps a record of every image the external build step produced, with its
//! parent and labels, in a persistent `index.json` file. The in-memory index
//! is loaded once at construction and written back on every change.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use layerpack_core::error::{LayerError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{find_in, select_best_image, BestImage, CatalogImage, ImageCatalog};

const INDEX_FILE: &str = "index.json";

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogIndex {
    images: Vec<CatalogImage>,
}

/// Image catalog persisted in a directory.
pub struct LocalImageCatalog {
    /// Root directory holding the index
    catalog_dir: PathBuf,
    /// In-memory index, in registration order
    images: RwLock<Vec<CatalogImage>>,
}

impl LocalImageCatalog {
    /// Open (or create) a catalog rooted at `catalog_dir`.
    pub fn open(catalog_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(catalog_dir).map_err(|e| {
            LayerError::Dependency(format!(
                "Failed to create image catalog directory {}: {}",
                catalog_dir.display(),
                e
            ))
        })?;

        let images = load_index(&catalog_dir.join(INDEX_FILE))?;
        tracing::debug!(
            dir = %catalog_dir.display(),
            images = images.len(),
            "Opened local image catalog"
        );

        Ok(Self {
            catalog_dir: catalog_dir.to_path_buf(),
            images: RwLock::new(images),
        })
    }

    /// Record an image, replacing any previous record with the same reference.
    pub fn register(&self, image: CatalogImage) -> Result<()> {
        let mut images = self.images.write();
        images.retain(|img| img.reference != image.reference);
        tracing::info!(reference = %image.reference, id = %image.id, "Registered image");
        images.push(image);
        self.save_index(&images)
    }

    /// Forget an image by reference.
    pub fn remove(&self, reference: &str) -> Result<()> {
        let mut images = self.images.write();
        let before = images.len();
        images.retain(|img| img.reference != reference);
        if images.len() == before {
            return Err(LayerError::Dependency(format!(
                "Image not found: {}",
                reference
            )));
        }
        self.save_index(&images)
    }

    /// List all recorded images.
    pub fn list(&self) -> Vec<CatalogImage> {
        self.images.read().clone()
    }

    fn save_index(&self, images: &[CatalogImage]) -> Result<()> {
        let index = CatalogIndex {
            images: images.to_vec(),
        };
        let data = serde_json::to_string_pretty(&index)?;

        let index_path = self.catalog_dir.join(INDEX_FILE);
        let tmp_path = self.catalog_dir.join(format!("{}.tmp", INDEX_FILE));
        std::fs::write(&tmp_path, data)
            .and_then(|_| std::fs::rename(&tmp_path, &index_path))
            .map_err(|e| {
                LayerError::Dependency(format!(
                    "Failed to write image catalog index {}: {}",
                    index_path.display(),
                    e
                ))
            })
    }
}

fn load_index(index_path: &Path) -> Result<Vec<CatalogImage>> {
    if !index_path.exists() {
        return Ok(Vec::new());
    }

    let data = std::fs::read_to_string(index_path).map_err(|e| {
        LayerError::Dependency(format!(
            "Failed to read image catalog index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    let index: CatalogIndex = serde_json::from_str(&data).map_err(|e| {
        LayerError::Dependency(format!("Failed to parse image catalog index: {}", e))
    })?;

    Ok(index.images)
}

#[async_trait]
impl ImageCatalog for LocalImageCatalog {
    async fn find_image(&self, name: &str) -> Result<CatalogImage> {
        find_in(&self.images.read(), name)
    }

    async fn find_best_image(
        &self,
        base_name: &str,
        candidate_labels: &[String],
        mandatory_labels: &[String],
    ) -> Result<BestImage> {
        let images = self.list();
        select_best_image(&images, base_name, candidate_labels, mandatory_labels)
    }
}
