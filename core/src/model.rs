//! Package and role entities.
//!
//! These are produced by the release/role manifest loader; the packages layer
//! builder only reads them to derive the set of packages a layer must carry.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A compiled software package.
///
/// Two packages with the same fingerprint are interchangeable; the loader
/// that produces them is responsible for that guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Content hash of the package's build inputs
    pub fingerprint: String,
    /// Package name
    pub name: String,
    /// Content hash of the compiled artifact
    pub sha1: String,
}

impl Package {
    pub fn new(
        fingerprint: impl Into<String>,
        name: impl Into<String>,
        sha1: impl Into<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            name: name.into(),
            sha1: sha1.into(),
        }
    }

    /// Directory holding this package's compiled artifacts.
    pub fn compiled_dir(&self, compiled_packages_path: &Path) -> PathBuf {
        compiled_packages_path
            .join(&self.name)
            .join(&self.fingerprint)
            .join("compiled")
    }
}

/// A job within a role, with the packages it needs at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleJob {
    pub name: String,
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// A deployable unit made of jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<RoleJob>,
}

impl Role {
    /// Iterate over every package referenced by every job, duplicates included.
    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.jobs.iter().flat_map(|job| job.packages.iter())
    }
}
