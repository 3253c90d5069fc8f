//! Archive identities as reported by the backup tool and recorded in ledgers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single archive within a repository.
///
/// `id` is assigned by the backup tool when the archive is created and never
/// changes for an unmodified archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveRecord {
    pub name: String,
    pub id: String,
}

impl ArchiveRecord {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        ArchiveRecord {
            name: name.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Duplicate archive name: {0}")]
pub struct DuplicateArchive(pub String);

/// An ordered set of archive records with unique names.
///
/// Order is the order in which the records were supplied (for borg, creation
/// order). Lookups by name go through an index built alongside.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSet {
    records: Vec<ArchiveRecord>,
    index: HashMap<String, usize>,
}

impl ArchiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from records, rejecting repeated names.
    pub fn from_records(
        records: impl IntoIterator<Item = ArchiveRecord>,
    ) -> Result<Self, DuplicateArchive> {
        let mut set = ArchiveSet::new();
        for record in records {
            set.push(record)?;
        }
        Ok(set)
    }

    pub fn push(&mut self, record: ArchiveRecord) -> Result<(), DuplicateArchive> {
        if self.index.contains_key(&record.name) {
            return Err(DuplicateArchive(record.name));
        }
        self.index.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.records[i].id.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchiveRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ArchiveRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PartialEq for ArchiveSet {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl Eq for ArchiveSet {}
