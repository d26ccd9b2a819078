//! Build context assembly for the packages layer image.
//!
//! The context is a tar stream holding, in order:
//!
//! ```text
//! Dockerfile                      rendered build script
//! packages-src/                   always present, possibly empty
//! packages-src/<fingerprint>/...  one tree per residual package
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use layerpack_core::error::{LayerError, Result};
use layerpack_core::model::{Package, Role};

use crate::archive::{append_dir_tree, append_empty_dir, append_file_bytes};
use crate::catalog::ImageCatalog;
use crate::matcher::LayerMatcher;
use crate::template::{DockerfileTemplate, TemplateContext};

/// Name of the build script inside the context.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Directory inside the context holding package payloads.
pub const PAYLOAD_ROOT: &str = "packages-src";

/// What went into a populated build context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSummary {
    /// Image the Dockerfile builds `FROM`
    pub base_image: String,
    /// Distinct packages required by the roles
    pub total_packages: usize,
    /// Fingerprints of the packages copied into the context
    pub added: Vec<String>,
    /// Rendered Dockerfile
    pub dockerfile: String,
}

/// Distinct packages across all roles and jobs; the first occurrence of a
/// fingerprint wins.
pub fn collect_packages(roles: &[Role]) -> Vec<Package> {
    let mut seen = HashSet::new();
    roles
        .iter()
        .flat_map(|role| role.packages())
        .filter(|pkg| seen.insert(pkg.fingerprint.clone()))
        .cloned()
        .collect()
}

/// Writes the packages layer build context into a tar stream.
pub struct ContextPopulator<'a> {
    pub catalog: &'a dyn ImageCatalog,
    pub template: &'a DockerfileTemplate,
    /// Stemcell image used for full builds
    pub stemcell_image: &'a str,
    /// Image layer matching starts from
    pub matching_base_image: &'a str,
    pub compiled_packages_path: &'a Path,
    pub version_label: String,
}

impl ContextPopulator<'_> {
    /// Populate `builder` with the build context for `roles`.
    ///
    /// With `force_build_all`, layer matching is skipped and every package is
    /// added on top of the stemcell. Nothing is written when `roles` is empty.
    /// Any error leaves the stream unusable.
    pub async fn populate<W: Write>(
        &self,
        roles: &[Role],
        force_build_all: bool,
        builder: &mut tar::Builder<W>,
    ) -> Result<ContextSummary> {
        if roles.is_empty() {
            return Err(LayerError::Usage("No roles to build".to_string()));
        }

        let packages = collect_packages(roles);
        let total_packages = packages.len();
        tracing::debug!(
            roles = roles.len(),
            packages = total_packages,
            "Collected packages for packages layer"
        );

        let (base_image, residual) = if force_build_all {
            tracing::info!(
                base_image = self.stemcell_image,
                packages = total_packages,
                "Forcing full packages layer build"
            );
            (self.stemcell_image.to_string(), packages)
        } else {
            let matcher = LayerMatcher::new(
                self.catalog,
                self.matching_base_image,
                vec![self.version_label.clone()],
            );
            let matched = matcher.determine_base_image(packages).await?;
            (matched.base_image, matched.residual)
        };

        let dockerfile = self.template.render(&TemplateContext {
            base_image: &base_image,
            packages: &residual,
            version_label: &self.version_label,
        })?;
        append_file_bytes(builder, DOCKERFILE_NAME, dockerfile.as_bytes(), 0o644)?;

        // The Dockerfile adds this directory even when nothing is in it
        append_empty_dir(builder, PAYLOAD_ROOT, 0o755)?;

        for pkg in &residual {
            let src = pkg.compiled_dir(self.compiled_packages_path);
            let prefix = PathBuf::from(PAYLOAD_ROOT).join(&pkg.fingerprint);
            let entries = append_dir_tree(builder, &src, &prefix)?;
            tracing::debug!(
                package = %pkg.name,
                fingerprint = %pkg.fingerprint,
                entries,
                "Added package to build context"
            );
        }

        Ok(ContextSummary {
            base_image,
            total_packages,
            added: residual.into_iter().map(|pkg| pkg.fingerprint).collect(),
            dockerfile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogImage, MemoryCatalog};
    use layerpack_core::config::TemplateSource;
    use layerpack_core::labels::version_label;
    use layerpack_core::model::RoleJob;
    use std::fs;
    use tempfile::TempDir;

    fn role(name: &str, packages: Vec<Package>) -> Role {
        Role {
            name: name.to_string(),
            jobs: vec![RoleJob {
                name: format!("{}-job", name),
                packages,
            }],
        }
    }

    fn write_package(root: &Path, pkg: &Package) {
        let dir = pkg.compiled_dir(root);
        fs::create_dir_all(dir.join("bin")).unwrap();
        fs::write(dir.join("bin").join(&pkg.name), pkg.sha1.as_bytes()).unwrap();
    }

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect()
    }

    struct Fixture {
        _tmp: TempDir,
        compiled: PathBuf,
        catalog: MemoryCatalog,
        template: DockerfileTemplate,
    }

    impl Fixture {
        fn new(packages: &[Package]) -> Self {
            let tmp = TempDir::new().unwrap();
            let compiled = tmp.path().join("compiled");
            for pkg in packages {
                write_package(&compiled, pkg);
            }
            let catalog = MemoryCatalog::with_images(vec![
                CatalogImage::new("stemcell:42", "sha256:base"),
                CatalogImage::new("layer:one", "sha256:one")
                    .with_parent("sha256:base")
                    .with_label("fingerprint.f1=ruby")
                    .with_label(&version_label("1.0")),
            ]);
            Self {
                _tmp: tmp,
                compiled,
                catalog,
                template: DockerfileTemplate::from_source(&TemplateSource::Builtin).unwrap(),
            }
        }

        fn populator(&self) -> ContextPopulator<'_> {
            ContextPopulator {
                catalog: &self.catalog,
                template: &self.template,
                stemcell_image: "stemcell:42",
                matching_base_image: "stemcell:42",
                compiled_packages_path: &self.compiled,
                version_label: version_label("1.0"),
            }
        }
    }

    #[test]
    fn test_collect_packages_first_occurrence_wins() {
        let roles = vec![
            role("one", vec![Package::new("f1", "ruby", "h1"), Package::new("f2", "go", "h2")]),
            role("two", vec![Package::new("f1", "ruby-dup", "h1"), Package::new("f3", "java", "h3")]),
        ];
        let packages = collect_packages(&roles);
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["ruby", "go", "java"]);
    }

    #[tokio::test]
    async fn test_populate_no_roles_is_usage_error() {
        let fixture = Fixture::new(&[]);
        let mut builder = tar::Builder::new(Vec::new());

        let err = fixture
            .populator()
            .populate(&[], false, &mut builder)
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Usage(_)));
        assert!(builder.get_ref().is_empty());
    }

    #[tokio::test]
    async fn test_populate_reuses_matching_layer() {
        let ruby = Package::new("f1", "ruby", "h1");
        let golang = Package::new("f2", "golang", "h2");
        let fixture = Fixture::new(&[ruby.clone(), golang.clone()]);
        let roles = vec![role("api", vec![ruby.clone(), golang.clone()]), role("web", vec![ruby])];

        let mut builder = tar::Builder::new(Vec::new());
        let summary = fixture
            .populator()
            .populate(&roles, false, &mut builder)
            .await
            .unwrap();

        assert_eq!(summary.base_image, "layer:one");
        assert_eq!(summary.total_packages, 2);
        assert_eq!(summary.added, vec!["f2".to_string()]);
        assert!(summary.dockerfile.starts_with("FROM layer:one\n"));
        assert!(summary.dockerfile.contains("LABEL fingerprint.f2=\"golang\""));
        assert!(!summary.dockerfile.contains("fingerprint.f1"));

        let names = entry_names(&builder.into_inner().unwrap());
        assert_eq!(names[0], DOCKERFILE_NAME);
        assert_eq!(names[1], PAYLOAD_ROOT);
        assert!(names.contains(&"packages-src/f2/bin/golang".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("packages-src/f1")));
    }

    #[tokio::test]
    async fn test_populate_force_build_all() {
        let ruby = Package::new("f1", "ruby", "h1");
        let golang = Package::new("f2", "golang", "h2");
        let fixture = Fixture::new(&[ruby.clone(), golang.clone()]);
        let roles = vec![role("api", vec![ruby, golang])];

        let mut builder = tar::Builder::new(Vec::new());
        let summary = fixture
            .populator()
            .populate(&roles, true, &mut builder)
            .await
            .unwrap();

        assert_eq!(summary.base_image, "stemcell:42");
        assert_eq!(summary.added, vec!["f1".to_string(), "f2".to_string()]);

        let names = entry_names(&builder.into_inner().unwrap());
        assert!(names.contains(&"packages-src/f1/bin/ruby".to_string()));
        assert!(names.contains(&"packages-src/f2/bin/golang".to_string()));
    }

    #[tokio::test]
    async fn test_populate_empty_residual_still_has_payload_root() {
        let ruby = Package::new("f1", "ruby", "h1");
        let fixture = Fixture::new(&[ruby.clone()]);
        let roles = vec![role("api", vec![ruby])];

        let mut builder = tar::Builder::new(Vec::new());
        let summary = fixture
            .populator()
            .populate(&roles, false, &mut builder)
            .await
            .unwrap();

        assert_eq!(summary.base_image, "layer:one");
        assert!(summary.added.is_empty());
        let names = entry_names(&builder.into_inner().unwrap());
        assert_eq!(names, vec![DOCKERFILE_NAME.to_string(), PAYLOAD_ROOT.to_string()]);
    }

    #[tokio::test]
    async fn test_populate_missing_package_dir_is_fatal() {
        let fixture = Fixture::new(&[]);
        let roles = vec![role("api", vec![Package::new("f9", "ghost", "h9")])];

        let mut builder = tar::Builder::new(Vec::new());
        let err = fixture
            .populator()
            .populate(&roles, true, &mut builder)
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Filesystem { .. }));
    }

    #[tokio::test]
    async fn test_populate_unknown_base_is_dependency_error() {
        let ruby = Package::new("f1", "ruby", "h1");
        let fixture = Fixture::new(&[ruby.clone()]);
        let mut populator = fixture.populator();
        populator.matching_base_image = "missing:1";

        let mut builder = tar::Builder::new(Vec::new());
        let err = populator
            .populate(&[role("api", vec![ruby])], false, &mut builder)
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Dependency(_)));
        assert!(builder.get_ref().is_empty());
    }
}
