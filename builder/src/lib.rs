//! Layerpack Builder - Shared Packages Layer
//!
//! Builds the image layer holding the compiled packages of a set of roles.
//! An existing image that already carries part of the package set is
//! reused as the base, so only the missing packages go into the new
//! build context.

pub mod archive;
pub mod catalog;
pub mod context;
pub mod dockerfile;
pub mod matcher;
pub mod naming;
pub mod packages;
pub mod template;

// Re-export commonly used types
pub use catalog::{BestImage, CatalogImage, ImageCatalog, LocalImageCatalog, MemoryCatalog};
pub use context::{ContextPopulator, ContextSummary, DOCKERFILE_NAME, PAYLOAD_ROOT};
pub use matcher::{LayerMatch, LayerMatcher};
pub use naming::{packages_layer_reference, ImageReference};
pub use packages::PackagesImageBuilder;
pub use template::{DockerfileTemplate, TemplateContext};

/// Builder version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
