//! Root-level history of repositories that have been baselined.
//!
//! Without this record a deleted ledger is indistinguishable from a
//! repository that was never tracked. Entries are added only after a forced
//! run saved the repository's ledger.

use crate::util::atomic::{AtomicWriteError, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILENAME: &str = ".borg-ledger-registry.toml";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML parse error in registry: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Unsupported registry file version: {0}")]
    UnsupportedVersion(u32),
}

impl RegistryError {
    fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            RegistryError::PermissionDenied(path.to_path_buf())
        } else {
            RegistryError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }
}

impl From<AtomicWriteError> for RegistryError {
    fn from(e: AtomicWriteError) -> Self {
        RegistryError::from_io(&e.path, e.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    version: u32,
}

#[derive(Debug, Deserialize)]
struct MetadataOnly {
    metadata: VersionOnly,
}

#[derive(Debug, Deserialize)]
struct VersionOnly {
    version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackedRepository {
    pub baselined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Registry {
    metadata: Metadata,
    #[serde(default)]
    pub repositories: BTreeMap<String, TrackedRepository>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            metadata: Metadata {
                version: Self::SUPPORTED_VERSION,
            },
            repositories: BTreeMap::new(),
        }
    }
}

impl Registry {
    const SUPPORTED_VERSION: u32 = 1;

    pub fn path_in(root: &Path) -> PathBuf {
        root.join(REGISTRY_FILENAME)
    }

    pub fn is_tracked(&self, repository_name: &str) -> bool {
        self.repositories.contains_key(repository_name)
    }

    pub fn track(&mut self, repository_name: &str, baselined_at: DateTime<Utc>) {
        self.repositories.insert(
            repository_name.to_string(),
            TrackedRepository { baselined_at },
        );
    }

    pub fn untrack(&mut self, repository_name: &str) -> bool {
        self.repositories.remove(repository_name).is_some()
    }

    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        let metadata_only: MetadataOnly = toml::from_str(content)?;
        if metadata_only.metadata.version != Self::SUPPORTED_VERSION {
            return Err(RegistryError::UnsupportedVersion(
                metadata_only.metadata.version,
            ));
        }
        Ok(toml::from_str(content)?)
    }

    /// Load the registry under `root`; a missing file is an empty registry.
    pub fn load(root: &Path) -> Result<Self, RegistryError> {
        let path = Self::path_in(root);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Registry::default()),
            Err(e) => Err(RegistryError::from_io(&path, e)),
        }
    }

    pub fn save(&self, root: &Path) -> Result<(), RegistryError> {
        let content = toml::to_string_pretty(self)?;
        write_atomic(&Self::path_in(root), content.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-18T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_missing_registry_is_empty() {
        let temp = TempDir::new().unwrap();
        let registry = Registry::load(temp.path()).unwrap();
        assert!(registry.repositories.is_empty());
    }

    #[test]
    fn test_track_save_load() {
        let temp = TempDir::new().unwrap();
        let mut registry = Registry::default();
        registry.track("host-b", now());
        registry.track("host-a", now());
        registry.save(temp.path()).unwrap();

        let loaded = Registry::load(temp.path()).unwrap();
        assert!(loaded.is_tracked("host-a"));
        assert!(loaded.is_tracked("host-b"));
        assert!(!loaded.is_tracked("host-c"));
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_untrack() {
        let mut registry = Registry::default();
        registry.track("host-a", now());
        assert!(registry.untrack("host-a"));
        assert!(!registry.untrack("host-a"));
        assert!(!registry.is_tracked("host-a"));
    }

    #[test]
    fn test_unsupported_version() {
        let content = r#"
[metadata]
version = 2
"#;
        assert!(matches!(
            Registry::from_toml(content),
            Err(RegistryError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = r#"
[metadata]
version = 1

[repositories.host-a]
baselined_at = "2026-10-18T08:30:00Z"
note = "unexpected"
"#;
        assert!(matches!(
            Registry::from_toml(content),
            Err(RegistryError::TomlParse(_))
        ));
    }
}
