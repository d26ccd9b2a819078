//! Layer matching.
//!
//! Finds the most specific existing packages layer that already carries part
//! of the requested package set, so only the remaining packages have to be
//! copied into the new build context.

use std::collections::HashSet;

use layerpack_core::error::{LayerError, Result};
use layerpack_core::labels::{fingerprint_label, parse_fingerprint_label};
use layerpack_core::model::Package;

use crate::catalog::ImageCatalog;

/// Outcome of layer matching.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMatch {
    /// Image the new layer is built `FROM`
    pub base_image: String,
    /// Packages the base image does not carry yet, in request order
    pub residual: Vec<Package>,
}

/// Matches a package set against the images in a catalog.
pub struct LayerMatcher<'a> {
    catalog: &'a dyn ImageCatalog,
    base_image: &'a str,
    mandatory_labels: Vec<String>,
}

impl<'a> LayerMatcher<'a> {
    /// `base_image` is the image every candidate must descend from; an
    /// image qualifies only when it carries all `mandatory_labels`.
    pub fn new(
        catalog: &'a dyn ImageCatalog,
        base_image: &'a str,
        mandatory_labels: Vec<String>,
    ) -> Self {
        Self {
            catalog,
            base_image,
            mandatory_labels,
        }
    }

    /// Determine the image to build from and the packages still missing.
    ///
    /// Catalog failures are returned as [`LayerError::Dependency`]; there is
    /// no fallback to a full build.
    pub async fn determine_base_image(&self, packages: Vec<Package>) -> Result<LayerMatch> {
        if packages.is_empty() {
            return Ok(LayerMatch {
                base_image: self.base_image.to_string(),
                residual: packages,
            });
        }

        let candidate_labels: Vec<String> = packages
            .iter()
            .map(|pkg| fingerprint_label(&pkg.fingerprint))
            .collect();

        let best = self
            .catalog
            .find_best_image(self.base_image, &candidate_labels, &self.mandatory_labels)
            .await
            .map_err(|e| match e {
                LayerError::Dependency(_) => e,
                other => LayerError::Dependency(format!("image catalog lookup failed: {}", other)),
            })?;

        // Identity labels also come back as matched; only fingerprints count
        let covered: HashSet<&str> = best
            .matched_labels
            .iter()
            .filter_map(|label| parse_fingerprint_label(label))
            .collect();

        let requested = packages.len();
        let residual: Vec<Package> = packages
            .into_iter()
            .filter(|pkg| !covered.contains(pkg.fingerprint.as_str()))
            .collect();

        tracing::info!(
            base_image = %best.image,
            requested,
            reused = requested - residual.len(),
            residual = residual.len(),
            "Matched packages layer base image"
        );

        Ok(LayerMatch {
            base_image: best.image,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BestImage, CatalogImage, MemoryCatalog};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    const VERSION: &str = "version.generator.layerpack=1.0";

    fn packages() -> Vec<Package> {
        vec![
            Package::new("f1", "ruby", "h1"),
            Package::new("f2", "golang", "h2"),
            Package::new("f3", "java", "h3"),
        ]
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::with_images(vec![
            CatalogImage::new("stemcell:42", "sha256:base"),
            CatalogImage::new("layer:one", "sha256:one")
                .with_parent("sha256:base")
                .with_label("fingerprint.f1=ruby")
                .with_label("fingerprint.f3=java")
                .with_label(VERSION),
        ])
    }

    /// Catalog that returns a canned answer, for shaping matched labels.
    struct FixedCatalog(BestImage);

    #[async_trait]
    impl ImageCatalog for FixedCatalog {
        async fn find_image(&self, name: &str) -> Result<CatalogImage> {
            Ok(CatalogImage::new(name, "id"))
        }

        async fn find_best_image(&self, _: &str, _: &[String], _: &[String]) -> Result<BestImage> {
            Ok(self.0.clone())
        }
    }

    struct UnreachableCatalog;

    #[async_trait]
    impl ImageCatalog for UnreachableCatalog {
        async fn find_image(&self, _: &str) -> Result<CatalogImage> {
            Err(LayerError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "daemon down",
            )))
        }

        async fn find_best_image(&self, _: &str, _: &[String], _: &[String]) -> Result<BestImage> {
            Err(LayerError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "daemon down",
            )))
        }
    }

    #[tokio::test]
    async fn test_residual_excludes_matched_packages() {
        let catalog = catalog();
        let matcher = LayerMatcher::new(&catalog, "stemcell:42", vec![VERSION.to_string()]);

        let result = matcher.determine_base_image(packages()).await.unwrap();
        assert_eq!(result.base_image, "layer:one");
        assert_eq!(result.residual, vec![Package::new("f2", "golang", "h2")]);
    }

    #[tokio::test]
    async fn test_no_packages_returns_base() {
        let matcher = LayerMatcher::new(&UnreachableCatalog, "stemcell:42", vec![]);
        let result = matcher.determine_base_image(Vec::new()).await.unwrap();
        assert_eq!(result.base_image, "stemcell:42");
        assert!(result.residual.is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_keeps_all_packages() {
        let catalog = catalog();
        let matcher = LayerMatcher::new(
            &catalog,
            "stemcell:42",
            vec!["version.generator.layerpack=2.0".to_string()],
        );
        let result = matcher.determine_base_image(packages()).await.unwrap();
        assert_eq!(result.base_image, "stemcell:42");
        assert_eq!(result.residual, packages());
    }

    #[tokio::test]
    async fn test_non_fingerprint_labels_are_ignored() {
        let matched: BTreeSet<String> = [
            "fingerprint.f2",
            VERSION,
            "fingerprint.f1.extra",
            "fingerprint",
            "f3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let catalog = FixedCatalog(BestImage {
            image: "layer:x".to_string(),
            matched_labels: matched,
        });
        let matcher = LayerMatcher::new(&catalog, "stemcell:42", vec![VERSION.to_string()]);

        let result = matcher.determine_base_image(packages()).await.unwrap();
        assert_eq!(result.base_image, "layer:x");
        let fingerprints: Vec<&str> = result
            .residual
            .iter()
            .map(|p| p.fingerprint.as_str())
            .collect();
        assert_eq!(fingerprints, vec!["f1", "f3"]);
    }

    #[tokio::test]
    async fn test_residual_never_grows() {
        // A catalog claiming labels for packages nobody asked for
        let matched: BTreeSet<String> = ["fingerprint.zz", "fingerprint.f1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let catalog = FixedCatalog(BestImage {
            image: "layer:x".to_string(),
            matched_labels: matched.clone(),
        });
        let matcher = LayerMatcher::new(&catalog, "stemcell:42", vec![]);

        let input = packages();
        let result = matcher.determine_base_image(input.clone()).await.unwrap();
        assert!(result.residual.len() <= input.len());
        for pkg in &result.residual {
            assert!(input.contains(pkg));
            assert!(!matched.contains(&fingerprint_label(&pkg.fingerprint)));
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_is_fatal() {
        let matcher = LayerMatcher::new(&UnreachableCatalog, "stemcell:42", vec![]);
        let err = matcher.determine_base_image(packages()).await.unwrap_err();
        assert!(matches!(err, LayerError::Dependency(_)));
        assert!(err.to_string().contains("daemon down"));
    }
}
