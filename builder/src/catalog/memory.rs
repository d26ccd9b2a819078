//! In-memory image catalog.

use async_trait::async_trait;
use layerpack_core::error::Result;
use parking_lot::RwLock;

use super::{find_in, select_best_image, BestImage, CatalogImage, ImageCatalog};

/// Image catalog held entirely in memory, for embedding and tests.
#[derive(Default)]
pub struct MemoryCatalog {
    images: RwLock<Vec<CatalogImage>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a fixed set of images.
    pub fn with_images(images: Vec<CatalogImage>) -> Self {
        Self {
            images: RwLock::new(images),
        }
    }

    /// Add an image, replacing any previous record with the same reference.
    pub fn insert(&self, image: CatalogImage) {
        let mut images = self.images.write();
        images.retain(|img| img.reference != image.reference);
        images.push(image);
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }
}

#[async_trait]
impl ImageCatalog for MemoryCatalog {
    async fn find_image(&self, name: &str) -> Result<CatalogImage> {
        find_in(&self.images.read(), name)
    }

    async fn find_best_image(
        &self,
        base_name: &str,
        candidate_labels: &[String],
        mandatory_labels: &[String],
    ) -> Result<BestImage> {
        let images = self.images.read().clone();
        select_best_image(&images, base_name, candidate_labels, mandatory_labels)
    }
}
