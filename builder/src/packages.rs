//! Builder of the shared packages layer image.
//!
//! Ties configuration, the image catalog and the Dockerfile template
//! together: resolves the stemcell identity once, then produces build
//! contexts and image references for sets of roles.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use layerpack_core::config::BuilderConfig;
use layerpack_core::error::{LayerError, Result};
use layerpack_core::labels::version_label;
use layerpack_core::model::{Package, Role};

use crate::catalog::ImageCatalog;
use crate::context::{ContextPopulator, ContextSummary};
use crate::matcher::{LayerMatch, LayerMatcher};
use crate::naming::{packages_layer_reference, ImageReference};
use crate::template::{DockerfileTemplate, TemplateContext};

/// Builds the packages layer shared by all role images.
pub struct PackagesImageBuilder {
    config: BuilderConfig,
    stemcell_image_id: String,
    catalog: Arc<dyn ImageCatalog>,
    template: DockerfileTemplate,
}

impl std::fmt::Debug for PackagesImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagesImageBuilder")
            .field("repository", &self.config.repository)
            .field("stemcell_image_name", &self.config.stemcell_image_name)
            .field("stemcell_image_id", &self.stemcell_image_id)
            .finish_non_exhaustive()
    }
}

impl PackagesImageBuilder {
    /// Create a builder.
    ///
    /// Creates the target directory and, when the configuration does not
    /// name a stemcell image ID, looks it up in the catalog.
    pub async fn new(config: BuilderConfig, catalog: Arc<dyn ImageCatalog>) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.target_path)
            .map_err(|e| LayerError::filesystem(&config.target_path, e))?;

        let stemcell_image_id = match &config.stemcell_image_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let image = catalog
                    .find_image(&config.stemcell_image_name)
                    .await
                    .map_err(|e| match e {
                        LayerError::Dependency(_) => e,
                        other => LayerError::Dependency(format!(
                            "failed to resolve stemcell image {}: {}",
                            config.stemcell_image_name, other
                        )),
                    })?;
                tracing::debug!(
                    stemcell = %config.stemcell_image_name,
                    id = %image.id,
                    "Resolved stemcell image"
                );
                image.id
            }
        };

        let template = DockerfileTemplate::from_source(&config.template)?;

        Ok(Self {
            config,
            stemcell_image_id,
            catalog,
            template,
        })
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Identity of the stemcell image, part of every image reference.
    pub fn stemcell_image_id(&self) -> &str {
        &self.stemcell_image_id
    }

    /// Mandatory label identifying images built by this tool version.
    pub fn version_label(&self) -> String {
        version_label(&self.config.tool_version)
    }

    /// Find the best existing layer to build on for `packages`.
    pub async fn determine_base_image(&self, packages: Vec<Package>) -> Result<LayerMatch> {
        LayerMatcher::new(
            self.catalog.as_ref(),
            self.config.matching_base_image(),
            vec![self.version_label()],
        )
        .determine_base_image(packages)
        .await
    }

    /// Render the Dockerfile adding `packages` on top of `base_image`.
    pub fn render_dockerfile(&self, base_image: &str, packages: &[Package]) -> Result<String> {
        let version_label = self.version_label();
        self.template.render(&TemplateContext {
            base_image,
            packages,
            version_label: &version_label,
        })
    }

    /// Write the build context for `roles` into `builder`.
    pub async fn populate<W: Write>(
        &self,
        roles: &[Role],
        force_build_all: bool,
        builder: &mut tar::Builder<W>,
    ) -> Result<ContextSummary> {
        self.populator()
            .populate(roles, force_build_all, builder)
            .await
    }

    /// Write the build context for `roles` to a tar file in the target
    /// directory and return its path.
    ///
    /// The context is written to a temporary file and renamed into place, so
    /// a failed write leaves any earlier context at that path untouched.
    pub async fn write_context(&self, roles: &[Role], force_build_all: bool) -> Result<PathBuf> {
        let reference = self.image_name(roles);
        let file_name = format!("{}-{}.tar", reference.name, reference.tag);
        let path = self.config.target_path.join(&file_name);
        let tmp_path = self.config.target_path.join(format!("{}.tmp", file_name));

        let result = match self.write_context_to(&tmp_path, roles, force_build_all).await {
            Ok(()) => {
                std::fs::rename(&tmp_path, &path).map_err(|e| LayerError::filesystem(&path, e))
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        tracing::info!(
            context = %path.display(),
            image = %reference,
            "Wrote packages layer build context"
        );
        Ok(path)
    }

    async fn write_context_to(
        &self,
        path: &std::path::Path,
        roles: &[Role],
        force_build_all: bool,
    ) -> Result<()> {
        let file = File::create(path).map_err(|e| LayerError::filesystem(path, e))?;
        let mut builder = tar::Builder::new(BufWriter::new(file));

        self.populate(roles, force_build_all, &mut builder).await?;

        let mut writer = builder
            .into_inner()
            .map_err(|e| LayerError::Stream(format!("Failed to finish build context: {}", e)))?;
        writer
            .flush()
            .map_err(|e| LayerError::Stream(format!("Failed to flush build context: {}", e)))
    }

    /// Image reference for the packages layer carrying every package of `roles`.
    pub fn image_name(&self, roles: &[Role]) -> ImageReference {
        packages_layer_reference(
            &self.config.repository,
            &self.config.tool_version,
            &self.stemcell_image_id,
            roles,
        )
    }

    fn populator(&self) -> ContextPopulator<'_> {
        ContextPopulator {
            catalog: self.catalog.as_ref(),
            template: &self.template,
            stemcell_image: &self.config.stemcell_image_name,
            matching_base_image: self.config.matching_base_image(),
            compiled_packages_path: &self.config.compiled_packages_path,
            version_label: self.version_label(),
        }
    }
}
