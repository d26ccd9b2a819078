//! Layerpack Core - Foundational Types and Abstractions
//!
//! This module provides the error taxonomy, configuration, logging setup and
//! package/role data model shared by the packages layer builder.

pub mod config;
pub mod error;
pub mod labels;
pub mod log;
pub mod model;

// Re-export commonly used types
pub use config::{BuilderConfig, LogLevel, TemplateSource};
pub use error::{LayerError, Result};
pub use labels::{fingerprint_label, parse_fingerprint_label, version_label};
pub use model::{Package, Role, RoleJob};

/// Layerpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
