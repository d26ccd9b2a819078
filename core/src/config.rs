use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LayerError, Result};

/// Packages layer builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Repository prefix for the generated image name
    pub repository: String,

    /// Stemcell (base OS) image name
    pub stemcell_image_name: String,

    /// Stemcell image ID; looked up in the image catalog when absent
    pub stemcell_image_id: Option<String>,

    /// Root directory of compiled packages
    pub compiled_packages_path: PathBuf,

    /// Directory for generated build contexts
    pub target_path: PathBuf,

    /// Version of the tool producing the images
    pub tool_version: String,

    /// Base image name used for layer matching instead of the stemcell name
    pub base_image_override: Option<String>,

    /// Source of the Dockerfile template
    pub template: TemplateSource,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            repository: "layerpack".to_string(),
            stemcell_image_name: String::new(),
            stemcell_image_id: None,
            compiled_packages_path: PathBuf::from("./compiled"),
            target_path: PathBuf::from("./target/packages-layer"),
            tool_version: crate::VERSION.to_string(),
            base_image_override: None,
            template: TemplateSource::Builtin,
            log_level: LogLevel::Info,
        }
    }
}

impl BuilderConfig {
    /// Parse configuration from YAML text and validate it.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: BuilderConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LayerError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Check required fields are set.
    pub fn validate(&self) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(LayerError::Config("repository must not be empty".to_string()));
        }
        if self.stemcell_image_name.trim().is_empty() {
            return Err(LayerError::Config(
                "stemcell_image_name must not be empty".to_string(),
            ));
        }
        if self.tool_version.trim().is_empty() {
            return Err(LayerError::Config("tool_version must not be empty".to_string()));
        }
        Ok(())
    }

    /// Image name used as the starting point for layer matching.
    pub fn matching_base_image(&self) -> &str {
        self.base_image_override
            .as_deref()
            .unwrap_or(&self.stemcell_image_name)
    }
}

/// Where the Dockerfile template comes from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TemplateSource {
    /// Template compiled into the builder
    #[default]
    Builtin,
    /// Template read from a file
    File { path: PathBuf },
    /// Template given inline
    Inline { content: String },
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
