//! Per-repository ledger files: the trusted record of archive names and ids.
//!
//! A ledger lives next to its repository as `.<repository>.ledger.toml` under
//! the scanned root. Reading goes through [`LedgerStore`]; the only way to
//! write one is a [`LedgerWriter`], which the force path creates and the
//! verify path never sees.

use crate::archive::{ArchiveRecord, ArchiveSet, DuplicateArchive};
use crate::util::atomic::{AtomicWriteError, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Unsupported ledger file version: {0}")]
    UnsupportedVersion(u32),
    #[error("Ledger violates name uniqueness: {0}")]
    Duplicate(#[from] DuplicateArchive),
}

impl LedgerError {
    fn from_io(path: &Path, e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            LedgerError::PermissionDenied(path.to_path_buf())
        } else {
            LedgerError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    }
}

impl From<AtomicWriteError> for LedgerError {
    fn from(e: AtomicWriteError) -> Self {
        LedgerError::from_io(&e.path, e.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Metadata {
    version: u32,
    repository: PathBuf,
    last_verified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct VersionOnly {
    version: u32,
}

/// Extracts only the version so that files written by a newer release are
/// reported as such rather than as parse errors. Unknown content is ignored.
#[derive(Debug, Deserialize)]
struct MetadataOnly {
    metadata: VersionOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LedgerFile {
    metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    archives: Vec<ArchiveRecord>,
}

/// Trusted archive identities of one repository as of its last forced run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    pub repository: PathBuf,
    pub last_verified_at: DateTime<Utc>,
    pub archives: ArchiveSet,
}

impl Ledger {
    const SUPPORTED_VERSION: u32 = 1;

    pub fn new(repository: PathBuf, last_verified_at: DateTime<Utc>, archives: ArchiveSet) -> Self {
        Ledger {
            repository,
            last_verified_at,
            archives,
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, LedgerError> {
        let metadata_only: MetadataOnly = toml::from_str(content)?;
        if metadata_only.metadata.version != Self::SUPPORTED_VERSION {
            return Err(LedgerError::UnsupportedVersion(
                metadata_only.metadata.version,
            ));
        }

        let file: LedgerFile = toml::from_str(content)?;
        Ok(Ledger {
            repository: file.metadata.repository,
            last_verified_at: file.metadata.last_verified_at,
            archives: ArchiveSet::from_records(file.archives)?,
        })
    }

    /// Whether this ledger was written for the repository directory
    /// `repository_name`. Only the last path component is compared, so a
    /// moved root keeps its ledgers valid.
    pub fn belongs_to(&self, repository_name: &str) -> bool {
        self.repository
            .file_name()
            .is_some_and(|name| name == repository_name)
    }

    pub fn to_toml(&self) -> Result<String, LedgerError> {
        let file = LedgerFile {
            metadata: Metadata {
                version: Self::SUPPORTED_VERSION,
                repository: self.repository.clone(),
                last_verified_at: self.last_verified_at,
            },
            archives: self.archives.records().to_vec(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }
}

/// Read-only access to the ledgers under a root directory.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LedgerStore { root: root.into() }
    }

    /// Location of the ledger for the repository directory `repository_name`.
    pub fn ledger_path(&self, repository_name: &str) -> PathBuf {
        self.root.join(format!(".{repository_name}.ledger.toml"))
    }

    /// Load a repository's ledger.
    ///
    /// `Ok(None)` means no ledger file exists, which is distinct from a
    /// ledger that exists and records zero archives.
    pub fn load(&self, repository_name: &str) -> Result<Option<Ledger>, LedgerError> {
        let path = self.ledger_path(repository_name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LedgerError::from_io(&path, e)),
        };

        debug!("Loaded ledger {}", path.display());
        Ledger::from_toml(&content).map(Some)
    }
}

/// The only mutation path for ledger files.
#[derive(Debug)]
pub struct LedgerWriter {
    store: LedgerStore,
}

impl LedgerWriter {
    pub fn new(store: LedgerStore) -> Self {
        LedgerWriter { store }
    }

    /// Atomically replace the ledger of `repository_name` with `ledger`.
    ///
    /// On error the previously stored ledger, if any, is left as it was.
    pub fn save(&self, repository_name: &str, ledger: &Ledger) -> Result<PathBuf, LedgerError> {
        let path = self.store.ledger_path(repository_name);
        let content = ledger.to_toml()?;
        write_atomic(&path, content.as_bytes())?;
        debug!(
            "Wrote ledger {} with {} archives",
            path.display(),
            ledger.archives.len()
        );
        Ok(path)
    }
}
