//! Two-phase handling of a single repository: inspect, then (only when
//! forced) re-baseline the ledger to the live state.

use crate::archive::ArchiveSet;
use crate::ledger::{Ledger, LedgerStore, LedgerWriter};
use crate::orchestrator::Repository;
use crate::snapshot::ArchiveSource;
use crate::verify::{BaselineInput, FirstSightingPolicy, Verdict, VerdictStatus, verify};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Report only. Ledgers are never written.
    Verify,
    /// Report, then replace each readable repository's ledger with its live
    /// listing regardless of the verdict.
    Force { dry_run: bool },
}

/// Result of the read-only phase for one repository.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub repository: Repository,
    pub outcome: InspectionOutcome,
}

#[derive(Debug, Clone)]
pub enum InspectionOutcome {
    Verified { verdict: Verdict, live: ArchiveSet },
    /// The live listing could not be obtained, so integrity cannot be
    /// established and nothing may be saved.
    Unreadable { reason: String },
}

impl Inspection {
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.outcome {
            InspectionOutcome::Verified { verdict, .. } => Some(verdict),
            InspectionOutcome::Unreadable { .. } => None,
        }
    }
}

/// Read-only phase: load the ledger, list the live archives, classify.
pub fn inspect(
    repository: &Repository,
    store: &LedgerStore,
    source: &dyn ArchiveSource,
    policy: FirstSightingPolicy,
    previously_tracked: bool,
) -> Inspection {
    info!("Checking borg repository {}", repository.path.display());

    let loaded = store.load(&repository.name);

    let live = match source.list_archives(&repository.path) {
        Ok(live) => live,
        Err(e) => {
            error!("{}: {e}", repository.path.display());
            return Inspection {
                repository: repository.clone(),
                outcome: InspectionOutcome::Unreadable {
                    reason: e.to_string(),
                },
            };
        }
    };

    let corrupt_reason;
    let baseline = match &loaded {
        Ok(Some(ledger)) if !ledger.belongs_to(&repository.name) => {
            corrupt_reason = format!("ledger was written for {}", ledger.repository.display());
            BaselineInput::Corrupt(&corrupt_reason)
        }
        Ok(Some(ledger)) => BaselineInput::Present(ledger),
        Ok(None) => BaselineInput::Absent { previously_tracked },
        Err(e) => {
            corrupt_reason = e.to_string();
            BaselineInput::Corrupt(&corrupt_reason)
        }
    };

    let verdict = verify(baseline, &live, policy);
    debug!(
        "{}: {} archives live, verdict {:?}",
        repository.name,
        live.len(),
        verdict.status()
    );

    Inspection {
        repository: repository.clone(),
        outcome: InspectionOutcome::Verified { verdict, live },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Verify mode.
    NotRequested,
    Saved(PathBuf),
    /// Force mode with dry run: would have been saved.
    DryRun,
    /// The repository was unreadable, so there was nothing trustworthy to save.
    Refused,
    /// Saving was withheld for the whole run (fingerprint mismatch).
    Withheld,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepositoryStatus {
    Clean,
    Violations,
    Error,
}

#[derive(Debug, Clone)]
pub struct RepositoryReport {
    pub inspection: Inspection,
    pub update: UpdateOutcome,
}

impl RepositoryReport {
    pub fn name(&self) -> &str {
        &self.inspection.repository.name
    }

    pub fn status(&self) -> RepositoryStatus {
        match (&self.inspection.outcome, &self.update) {
            (InspectionOutcome::Unreadable { .. }, _) => RepositoryStatus::Error,
            (_, UpdateOutcome::Failed(_) | UpdateOutcome::Withheld) => RepositoryStatus::Error,
            (InspectionOutcome::Verified { verdict, .. }, _) => match verdict.status() {
                VerdictStatus::Clean => RepositoryStatus::Clean,
                VerdictStatus::ViolationsFound => RepositoryStatus::Violations,
            },
        }
    }
}

/// Second phase. Holds the ledger writer, which exists only for a forced
/// run that is not a dry run.
#[derive(Debug)]
pub struct Controller {
    mode: Mode,
    writer: Option<LedgerWriter>,
    withheld: bool,
}

impl Controller {
    pub fn new(mode: Mode, store: &LedgerStore) -> Self {
        let writer = match mode {
            Mode::Force { dry_run: false } => Some(LedgerWriter::new(store.clone())),
            Mode::Force { dry_run: true } | Mode::Verify => None,
        };
        Controller {
            mode,
            writer,
            withheld: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Refuse every save from here on.
    pub fn withhold(&mut self) {
        self.withheld = true;
        self.writer = None;
    }

    pub fn finish(&self, inspection: Inspection, now: DateTime<Utc>) -> RepositoryReport {
        let update = self.update(&inspection, now);
        RepositoryReport { inspection, update }
    }

    fn update(&self, inspection: &Inspection, now: DateTime<Utc>) -> UpdateOutcome {
        let Mode::Force { dry_run } = self.mode else {
            return UpdateOutcome::NotRequested;
        };

        let repository = &inspection.repository;
        let (verdict, live) = match &inspection.outcome {
            InspectionOutcome::Verified { verdict, live } => (verdict, live),
            InspectionOutcome::Unreadable { .. } => {
                error!(
                    "Not updating ledger for {}: repository could not be read",
                    repository.path.display()
                );
                return UpdateOutcome::Refused;
            }
        };

        if self.withheld {
            return UpdateOutcome::Withheld;
        }

        if verdict.status() == VerdictStatus::ViolationsFound {
            warn!(
                "Verification of {} failed but --force given, still updating ledger",
                repository.path.display()
            );
        }

        if dry_run {
            info!(
                "Skipping ledger update for {} due to --dry-run",
                repository.name
            );
            return UpdateOutcome::DryRun;
        }

        let Some(writer) = &self.writer else {
            return UpdateOutcome::Withheld;
        };

        let ledger = Ledger::new(repository.path.clone(), now, live.clone());
        match writer.save(&repository.name, &ledger) {
            Ok(path) => {
                info!(
                    "Updated ledger {} ({} archives)",
                    path.display(),
                    live.len()
                );
                UpdateOutcome::Saved(path)
            }
            Err(e) => {
                error!(
                    "Failed to write ledger for {}: {e}",
                    repository.path.display()
                );
                UpdateOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveRecord;
    use crate::snapshot::SnapshotError;
    use crate::verify::{Baseline, Classification};
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    /// Archive source serving fixed listings; unknown repositories fail.
    struct FakeSource(HashMap<PathBuf, Vec<(&'static str, &'static str)>>);

    impl ArchiveSource for FakeSource {
        fn list_archives(&self, repository: &Path) -> Result<ArchiveSet, SnapshotError> {
            let pairs = self
                .0
                .get(repository)
                .ok_or_else(|| SnapshotError::TimedOut(std::time::Duration::from_secs(1)))?;
            Ok(ArchiveSet::from_records(
                pairs.iter().map(|(n, id)| ArchiveRecord::new(*n, *id)),
            )?)
        }
    }

    struct Fixture {
        temp: TempDir,
        store: LedgerStore,
        repository: Repository,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let store = LedgerStore::new(temp.path());
            let repository = Repository {
                name: "host-a".to_string(),
                path: temp.path().join("host-a"),
            };
            Fixture {
                temp,
                store,
                repository,
            }
        }

        fn source(&self, pairs: Vec<(&'static str, &'static str)>) -> FakeSource {
            FakeSource(HashMap::from([(self.repository.path.clone(), pairs)]))
        }

        fn inspect(&self, source: &FakeSource, tracked: bool) -> Inspection {
            inspect(
                &self.repository,
                &self.store,
                source,
                FirstSightingPolicy::Fail,
                tracked,
            )
        }

        fn ledger_bytes(&self) -> Option<Vec<u8>> {
            std::fs::read(self.store.ledger_path(&self.repository.name)).ok()
        }
    }

    #[test]
    fn test_verify_never_writes() {
        let fx = Fixture::new();
        let controller = Controller::new(Mode::Verify, &fx.store);
        let source = fx.source(vec![("a", "1")]);

        let report = controller.finish(fx.inspect(&source, false), Utc::now());

        assert_eq!(report.update, UpdateOutcome::NotRequested);
        assert_eq!(report.status(), RepositoryStatus::Violations);
        assert!(fx.ledger_bytes().is_none());
    }

    #[test]
    fn test_force_then_verify_is_clean() {
        let fx = Fixture::new();
        let source = fx.source(vec![("a", "1"), ("b", "2")]);

        let forced = Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&source, false), Utc::now());
        assert!(matches!(forced.update, UpdateOutcome::Saved(_)));

        let saved = fx.store.load("host-a").unwrap().unwrap();
        assert_eq!(saved.archives, source.list_archives(&fx.repository.path).unwrap());
        assert_eq!(saved.repository, fx.repository.path);

        let verified = Controller::new(Mode::Verify, &fx.store)
            .finish(fx.inspect(&source, true), Utc::now());
        assert_eq!(verified.status(), RepositoryStatus::Clean);
        assert_eq!(verified.inspection.verdict().unwrap().baseline, Baseline::Ledger);
    }

    #[test]
    fn test_repeated_verify_is_idempotent() {
        let fx = Fixture::new();
        let baseline = fx.source(vec![("a", "1"), ("b", "2")]);
        Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&baseline, false), Utc::now());
        let before = fx.ledger_bytes().unwrap();

        let tampered = fx.source(vec![("a", "1"), ("b", "X"), ("c", "3")]);
        let controller = Controller::new(Mode::Verify, &fx.store);
        let first = controller.finish(fx.inspect(&tampered, true), Utc::now());
        let second = controller.finish(fx.inspect(&tampered, true), Utc::now());

        assert_eq!(first.inspection.verdict(), second.inspection.verdict());
        assert_eq!(first.status(), RepositoryStatus::Violations);
        assert_eq!(fx.ledger_bytes().unwrap(), before);
    }

    #[test]
    fn test_force_saves_despite_violations() {
        let fx = Fixture::new();
        let initial = fx.source(vec![("a", "1"), ("b", "2")]);
        Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&initial, false), Utc::now());

        let pruned = fx.source(vec![("b", "2")]);
        let report = Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&pruned, true), Utc::now());

        let verdict = report.inspection.verdict().unwrap();
        assert_eq!(verdict.findings[0].classification, Classification::MissingArchive);
        assert!(matches!(report.update, UpdateOutcome::Saved(_)));
        let saved = fx.store.load("host-a").unwrap().unwrap();
        assert_eq!(saved.archives.len(), 1);
        assert_eq!(saved.archives.id_of("b"), Some("2"));
    }

    #[test]
    fn test_force_refuses_unreadable_repository() {
        let fx = Fixture::new();
        Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&fx.source(vec![("a", "1")]), false), Utc::now());
        let before = fx.ledger_bytes().unwrap();

        let broken = FakeSource(HashMap::new());
        let report = Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&broken, true), Utc::now());

        assert_eq!(report.update, UpdateOutcome::Refused);
        assert_eq!(report.status(), RepositoryStatus::Error);
        assert!(matches!(
            report.inspection.outcome,
            InspectionOutcome::Unreadable { .. }
        ));
        assert_eq!(fx.ledger_bytes().unwrap(), before);
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let fx = Fixture::new();
        let report = Controller::new(Mode::Force { dry_run: true }, &fx.store)
            .finish(fx.inspect(&fx.source(vec![("a", "1")]), false), Utc::now());

        assert_eq!(report.update, UpdateOutcome::DryRun);
        assert!(fx.ledger_bytes().is_none());
    }

    #[test]
    fn test_withheld_controller_does_not_write() {
        let fx = Fixture::new();
        let mut controller = Controller::new(Mode::Force { dry_run: false }, &fx.store);
        controller.withhold();

        let report = controller.finish(fx.inspect(&fx.source(vec![("a", "1")]), false), Utc::now());

        assert_eq!(report.update, UpdateOutcome::Withheld);
        assert_eq!(report.status(), RepositoryStatus::Error);
        assert!(fx.ledger_bytes().is_none());
    }

    #[test]
    fn test_corrupt_ledger_reported_and_replaced_by_force() {
        let fx = Fixture::new();
        std::fs::write(fx.store.ledger_path("host-a"), "garbage = [").unwrap();
        let source = fx.source(vec![("a", "1")]);

        let verified = Controller::new(Mode::Verify, &fx.store)
            .finish(fx.inspect(&source, true), Utc::now());
        assert!(matches!(
            verified.inspection.verdict().unwrap().baseline,
            Baseline::LedgerCorrupt(_)
        ));
        assert_eq!(verified.status(), RepositoryStatus::Violations);

        let forced = Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&source, true), Utc::now());
        assert!(matches!(forced.update, UpdateOutcome::Saved(_)));
        assert!(fx.store.load("host-a").unwrap().is_some());
    }

    #[test]
    fn test_ledger_copied_from_sibling_is_corrupt() {
        let fx = Fixture::new();
        let sibling = Ledger::new(
            fx.temp.path().join("host-b"),
            Utc::now(),
            ArchiveSet::from_records([ArchiveRecord::new("a", "1")]).unwrap(),
        );
        LedgerWriter::new(fx.store.clone())
            .save("host-a", &sibling)
            .unwrap();
        let source = fx.source(vec![("a", "1")]);

        let verified = Controller::new(Mode::Verify, &fx.store)
            .finish(fx.inspect(&source, true), Utc::now());

        match &verified.inspection.verdict().unwrap().baseline {
            Baseline::LedgerCorrupt(reason) => assert!(reason.contains("host-b")),
            other => panic!("Expected LedgerCorrupt, got {other:?}"),
        }
        assert_eq!(verified.status(), RepositoryStatus::Violations);

        Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&source, true), Utc::now());
        assert!(fx.store.load("host-a").unwrap().unwrap().belongs_to("host-a"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        let source = fx.source(vec![("a", "1")]);
        std::fs::set_permissions(fx.temp.path(), std::fs::Permissions::from_mode(0o555)).unwrap();

        let report = Controller::new(Mode::Force { dry_run: false }, &fx.store)
            .finish(fx.inspect(&source, false), Utc::now());

        std::fs::set_permissions(fx.temp.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions; only check when the save failed.
        if let UpdateOutcome::Failed(_) = report.update {
            assert_eq!(report.status(), RepositoryStatus::Error);
            assert!(fx.ledger_bytes().is_none());
        }
    }
}
