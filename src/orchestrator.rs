//! Runs the per-repository check over every repository under a root and
//! merges the independent results into one summary.

use crate::control::{
    Controller, Inspection, Mode, RepositoryReport, RepositoryStatus, UpdateOutcome, inspect,
};
use crate::ledger::LedgerStore;
use crate::registry::Registry;
use crate::snapshot::ArchiveSource;
use crate::verify::{FirstSightingPolicy, change_fingerprint};
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Repository root does not exist: {0}")]
    RootNotFound(PathBuf),
    #[error("Repository root is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl OrchestratorError {
    fn from_io(path: &Path, e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => OrchestratorError::RootNotFound(path.to_path_buf()),
            ErrorKind::PermissionDenied => OrchestratorError::PermissionDenied(path.to_path_buf()),
            _ => OrchestratorError::Io(e),
        }
    }
}

/// A repository directory directly below the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Directory name; also keys the ledger and registry entry.
    pub name: String,
    pub path: PathBuf,
}

/// List the repository directories directly under `root`, sorted by name.
///
/// Hidden entries are skipped: ledgers and the registry live beside the
/// repositories as dotfiles.
pub fn discover_repositories(root: &Path) -> Result<Vec<Repository>, OrchestratorError> {
    let metadata = std::fs::metadata(root).map_err(|e| OrchestratorError::from_io(root, e))?;
    if !metadata.is_dir() {
        return Err(OrchestratorError::RootNotDirectory(root.to_path_buf()));
    }

    let read_dir = std::fs::read_dir(root).map_err(|e| OrchestratorError::from_io(root, e))?;

    let mut repositories = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(OrchestratorError::Io)?;
        let path = entry.path();

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non UTF-8 directory name {:?}", raw);
                continue;
            }
        };
        if name.starts_with('.') {
            continue;
        }
        // Follows symlinks, so a linked repository is still checked.
        if !path.is_dir() {
            debug!("Skipping non-directory {}", path.display());
            continue;
        }

        repositories.push(Repository { name, path });
    }

    repositories.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(repositories)
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: Mode,
    pub first_sighting: FirstSightingPolicy,
    /// Number of repositories inspected concurrently. 1 means sequential.
    pub jobs: usize,
    /// With `Mode::Force`, only save if the run's fingerprint equals this.
    pub expected_fingerprint: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            mode: Mode::Verify,
            first_sighting: FirstSightingPolicy::default(),
            jobs: 1,
            expected_fingerprint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    ViolationsFound,
    /// Some repository could not be checked or its ledger could not be
    /// updated.
    OperationalError,
}

#[derive(Debug)]
pub struct RunSummary {
    pub mode: Mode,
    /// One report per discovered repository, in name order.
    pub reports: Vec<RepositoryReport>,
    /// Previously baselined repositories whose directory is gone.
    pub vanished: Vec<String>,
    pub fingerprint: String,
    /// Actual fingerprint when it differed from the expected one.
    pub fingerprint_mismatch: Option<String>,
    pub registry_error: Option<String>,
}

impl RunSummary {
    pub fn count(&self, status: RepositoryStatus) -> usize {
        self.reports.iter().filter(|r| r.status() == status).count()
    }

    pub fn has_changes(&self) -> bool {
        !self.vanished.is_empty()
            || self.reports.iter().any(|r| match r.inspection.verdict() {
                Some(verdict) => {
                    verdict.baseline.is_violation() || verdict.changes().next().is_some()
                }
                None => true,
            })
    }

    pub fn status(&self) -> RunStatus {
        if self.fingerprint_mismatch.is_some()
            || self.registry_error.is_some()
            || self.count(RepositoryStatus::Error) > 0
        {
            return RunStatus::OperationalError;
        }

        // A forced run accepts whatever it found; only operational failures
        // count against it.
        let violations = self.count(RepositoryStatus::Violations) > 0 || !self.vanished.is_empty();
        if violations && self.mode == Mode::Verify {
            RunStatus::ViolationsFound
        } else {
            RunStatus::Clean
        }
    }
}

/// Check every repository under `root`.
///
/// Per-repository failures are recorded in the returned summary and never
/// stop the run. Only problems with the root itself are returned as errors.
pub fn run(
    root: &Path,
    source: &dyn ArchiveSource,
    options: &RunOptions,
) -> Result<RunSummary, OrchestratorError> {
    let repositories = discover_repositories(root)?;
    info!(
        "Found {} repositories under {}",
        repositories.len(),
        root.display()
    );

    let mut registry_error = None;
    // Without a readable registry every repository counts as baselined, so a
    // deleted ledger still shows up as missing.
    let mut assume_tracked = false;
    let mut registry = match Registry::load(root) {
        Ok(registry) => registry,
        Err(e) if matches!(options.mode, Mode::Force { .. }) => {
            warn!("Ignoring unreadable registry, it will be rebuilt: {e}");
            Registry::default()
        }
        Err(e) => {
            error!("Cannot read registry, treating every repository as baselined: {e}");
            registry_error = Some(e.to_string());
            assume_tracked = true;
            Registry::default()
        }
    };

    let store = LedgerStore::new(root);
    let inspections = inspect_all(&repositories, options.jobs, |repository| {
        inspect(
            repository,
            &store,
            source,
            options.first_sighting,
            assume_tracked || registry.is_tracked(&repository.name),
        )
    });

    let vanished: Vec<String> = registry
        .repositories
        .keys()
        .filter(|name| !repositories.iter().any(|r| &r.name == *name))
        .cloned()
        .collect();
    for name in &vanished {
        warn!("Previously baselined repository {name} no longer exists");
    }

    let fingerprint = change_fingerprint(
        inspections
            .iter()
            .map(|i| (i.repository.name.as_str(), i.verdict()))
            .chain(vanished.iter().map(|name| (name.as_str(), None))),
    );

    let mut controller = Controller::new(options.mode, &store);
    let mut fingerprint_mismatch = None;
    if let (Mode::Force { .. }, Some(expected)) = (options.mode, &options.expected_fingerprint)
        && expected != &fingerprint
    {
        error!(
            "Fingerprint mismatch: expected {expected}, got {fingerprint}. Not updating any ledger"
        );
        controller.withhold();
        fingerprint_mismatch = Some(fingerprint.clone());
    }

    let now = Utc::now();
    let reports: Vec<RepositoryReport> = inspections
        .into_iter()
        .map(|inspection| controller.finish(inspection, now))
        .collect();

    if controller.mode() == (Mode::Force { dry_run: false }) && fingerprint_mismatch.is_none() {
        for report in &reports {
            if let UpdateOutcome::Saved(_) = report.update {
                registry.track(report.name(), now);
            }
        }
        for name in &vanished {
            registry.untrack(name);
        }
        if let Err(e) = registry.save(root) {
            error!("Failed to write registry: {e}");
            registry_error = Some(e.to_string());
        }
    }

    Ok(RunSummary {
        mode: options.mode,
        reports,
        vanished,
        fingerprint,
        fingerprint_mismatch,
        registry_error,
    })
}

/// Inspect repositories with up to `jobs` workers.
///
/// Each worker returns its own results; they are merged back into the input
/// order once all workers are done.
fn inspect_all<F>(repositories: &[Repository], jobs: usize, check: F) -> Vec<Inspection>
where
    F: Fn(&Repository) -> Inspection + Sync,
{
    let jobs = jobs.clamp(1, repositories.len().max(1));
    if jobs == 1 {
        return repositories.iter().map(&check).collect();
    }

    let next = AtomicUsize::new(0);
    let mut indexed: Vec<(usize, Inspection)> = thread::scope(|scope| {
        let workers: Vec<_> = (0..jobs)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(repository) = repositories.get(i) else {
                            break;
                        };
                        done.push((i, check(repository)));
                    }
                    done
                })
            })
            .collect();

        workers
            .into_iter()
            .flat_map(|worker| match worker.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, inspection)| inspection).collect()
}
