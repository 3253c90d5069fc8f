//! Classification of live archives against the trusted ledger.
//!
//! Append-only repositories can legitimately only gain archives. An archive
//! that vanished or whose id changed was altered outside the sanctioned write
//! path, so the classification is deliberately asymmetric: new archives are
//! informational, everything else that differs is a violation.
//!
//! Nothing in this module has access to a ledger writer.

use crate::archive::ArchiveSet;
use crate::ledger::Ledger;
use crate::util::hashing::{hash_field, hash_optional_field};
use base64::Engine;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Present in both with the same id.
    Match,
    /// Present in both with different ids.
    IdMismatch,
    /// Recorded in the ledger but no longer in the repository.
    MissingArchive,
    /// In the repository but not yet recorded. Expected append-only growth.
    NewArchive,
}

impl Classification {
    pub fn is_violation(self) -> bool {
        matches!(
            self,
            Classification::IdMismatch | Classification::MissingArchive
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::Match => "MATCH",
            Classification::IdMismatch => "ID_MISMATCH",
            Classification::MissingArchive => "MISSING_ARCHIVE",
            Classification::NewArchive => "NEW_ARCHIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub name: String,
    pub classification: Classification,
    pub ledger_id: Option<String>,
    pub live_id: Option<String>,
}

/// What the live listing was compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// A ledger was loaded.
    Ledger,
    /// No ledger, and the repository was never baselined before.
    FirstSighting { allowed: bool },
    /// No ledger, although a forced run baselined this repository earlier.
    LedgerMissing,
    /// A ledger file exists but could not be read or parsed.
    LedgerCorrupt(String),
}

impl Baseline {
    pub fn is_violation(&self) -> bool {
        match self {
            Baseline::Ledger => false,
            Baseline::FirstSighting { allowed } => !allowed,
            Baseline::LedgerMissing | Baseline::LedgerCorrupt(_) => true,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Baseline::Ledger => "LEDGER",
            Baseline::FirstSighting { .. } => "FIRST_SIGHTING",
            Baseline::LedgerMissing => "LEDGER_MISSING",
            Baseline::LedgerCorrupt(_) => "LEDGER_CORRUPT",
        }
    }
}

/// Policy for a repository that has no ledger and was never baselined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstSightingPolicy {
    /// Report a violation until a forced run establishes the baseline.
    #[default]
    Fail,
    /// Accept the repository; all its archives are reported as new.
    Allow,
}

/// Ledger state as found on disk, before classification.
#[derive(Debug, Clone, Copy)]
pub enum BaselineInput<'a> {
    Present(&'a Ledger),
    Absent { previously_tracked: bool },
    Corrupt(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    Clean,
    ViolationsFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub baseline: Baseline,
    pub findings: Vec<Finding>,
}

impl Verdict {
    pub fn status(&self) -> VerdictStatus {
        if self.baseline.is_violation()
            || self
                .findings
                .iter()
                .any(|f| f.classification.is_violation())
        {
            VerdictStatus::ViolationsFound
        } else {
            VerdictStatus::Clean
        }
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.findings
            .iter()
            .filter(|f| f.classification == classification)
            .count()
    }

    /// Findings other than `Match`.
    pub fn changes(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.classification != Classification::Match)
    }
}

/// Classify every archive name in `ledger ∪ live`.
///
/// Findings for ledger archives come first in ledger order, followed by new
/// archives in live order.
pub fn classify(ledger: &ArchiveSet, live: &ArchiveSet) -> Vec<Finding> {
    let mut findings = Vec::with_capacity(ledger.len().max(live.len()));

    for record in ledger.iter() {
        let live_id = live.id_of(&record.name);
        let classification = match live_id {
            Some(id) if id == record.id => Classification::Match,
            Some(_) => Classification::IdMismatch,
            None => Classification::MissingArchive,
        };
        findings.push(Finding {
            name: record.name.clone(),
            classification,
            ledger_id: Some(record.id.clone()),
            live_id: live_id.map(str::to_string),
        });
    }

    for record in live.iter().filter(|r| !ledger.contains(&r.name)) {
        findings.push(Finding {
            name: record.name.clone(),
            classification: Classification::NewArchive,
            ledger_id: None,
            live_id: Some(record.id.clone()),
        });
    }

    findings
}

/// Compare a live listing against whatever baseline exists for it.
pub fn verify(
    baseline: BaselineInput<'_>,
    live: &ArchiveSet,
    policy: FirstSightingPolicy,
) -> Verdict {
    let empty = ArchiveSet::new();
    let (baseline, recorded) = match baseline {
        BaselineInput::Present(ledger) => (Baseline::Ledger, &ledger.archives),
        BaselineInput::Absent {
            previously_tracked: true,
        } => (Baseline::LedgerMissing, &empty),
        BaselineInput::Absent {
            previously_tracked: false,
        } => (
            Baseline::FirstSighting {
                allowed: policy == FirstSightingPolicy::Allow,
            },
            &empty,
        ),
        BaselineInput::Corrupt(reason) => (Baseline::LedgerCorrupt(reason.to_string()), &empty),
    };

    Verdict {
        baseline,
        findings: classify(recorded, live),
    }
}

/// Per-repository input to [`change_fingerprint`]. `None` marks a repository
/// whose live state could not be read.
pub type FingerprintInput<'a> = (&'a str, Option<&'a Verdict>);

/// A compact identifier for the complete set of differences in a run.
///
/// An operator reviews a verify run and passes its fingerprint to the forced
/// run; the forced run refuses to save if anything changed in between.
/// `Match` findings do not contribute. Currently a Base64-encoded SHA-256.
pub fn change_fingerprint<'a>(
    repositories: impl IntoIterator<Item = FingerprintInput<'a>>,
) -> String {
    let mut hasher = Sha256::new();

    for (name, verdict) in repositories {
        hash_field(&mut hasher, name.as_bytes());
        let Some(verdict) = verdict else {
            hash_field(&mut hasher, b"UNREADABLE");
            continue;
        };

        hash_field(&mut hasher, verdict.baseline.label().as_bytes());
        for finding in verdict.changes() {
            hash_field(&mut hasher, finding.name.as_bytes());
            hash_field(&mut hasher, finding.classification.label().as_bytes());
            hash_optional_field(&mut hasher, finding.ledger_id.as_deref());
            hash_optional_field(&mut hasher, finding.live_id.as_deref());
        }
    }

    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
