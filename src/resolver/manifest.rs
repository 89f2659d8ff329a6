//! Sandbox package manifest model.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// File name of the package descriptor inside a sandbox.
pub const MANIFEST_FILE: &str = "package.json";

/// Dependency manifest persisted as the sandbox's package descriptor.
///
/// Read before resolving any dependency, rewritten after every
/// successful install. Fields this service does not model are carried
/// through untouched so installer-written metadata survives a rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Package name; defaults to the session token.
    pub name: String,
    /// Optional package version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Dependency name to version-constraint mapping.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Unmodeled manifest fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    /// The default manifest for a sandbox that has none: `{"name": token}`.
    #[must_use]
    pub fn stub(token: &str) -> Self {
        Self {
            name: token.to_owned(),
            ..Self::default()
        }
    }

    /// Read and parse the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Io(format!("invalid manifest {}: {err}", path.display())))
    }

    /// Read the manifest at `path`, falling back to [`Manifest::stub`]
    /// when the file is missing or unreadable.
    #[must_use]
    pub fn load_or_stub(path: &Path, token: &str) -> Self {
        Self::load(path).unwrap_or_else(|_| Self::stub(token))
    }

    /// Serialize and write the manifest to `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on serialization or write failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| AppError::Io(format!("failed to serialize manifest: {err}")))?;
        std::fs::write(path, raw + "\n")?;
        Ok(())
    }
}
