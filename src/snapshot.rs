//! Live archive listings, read from the repository through the backup tool.
//!
//! What comes back from here is evidence of what currently exists in a
//! repository. It is never a statement of what is authorized.

use crate::archive::{ArchiveRecord, ArchiveSet, DuplicateArchive};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Number of stderr lines from a failed tool run kept for the report.
const STDERR_EXCERPT_LINES: usize = 5;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Could not run {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error while waiting for the backup tool: {0}")]
    Io(std::io::Error),
    #[error("Backup tool exited with {status}{}", format_excerpt(.stderr))]
    Failed { status: String, stderr: String },
    #[error("Backup tool did not finish within {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("Backup tool produced unparseable output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
    #[error("Backup tool listed an archive twice: {0}")]
    Duplicate(#[from] DuplicateArchive),
}

fn format_excerpt(stderr: &str) -> String {
    let excerpt: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(STDERR_EXCERPT_LINES)
        .collect();
    if excerpt.is_empty() {
        String::new()
    } else {
        format!(": {}", excerpt.join(" / "))
    }
}

/// Capability to enumerate the archives currently present in a repository.
pub trait ArchiveSource: Send + Sync {
    fn list_archives(&self, repository: &Path) -> Result<ArchiveSet, SnapshotError>;
}

/// Shape of `borg list --json`. Only the fields used here are declared.
#[derive(Debug, Deserialize)]
struct BorgListing {
    archives: Vec<BorgArchive>,
}

/// Borg reports the archive name as both `name` and `archive`; older
/// releases only have `archive`.
#[derive(Debug, Deserialize)]
struct BorgArchive {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    archive: Option<String>,
    id: String,
}

pub(crate) fn parse_borg_listing(stdout: &[u8]) -> Result<ArchiveSet, SnapshotError> {
    let listing: BorgListing = serde_json::from_slice(stdout)?;
    let mut set = ArchiveSet::new();
    for archive in listing.archives {
        let name = archive.name.or(archive.archive).ok_or_else(|| {
            SnapshotError::InvalidOutput(serde::de::Error::missing_field("name"))
        })?;
        set.push(ArchiveRecord::new(name, archive.id))?;
    }
    Ok(set)
}

/// Reads archive listings by running `borg list --json <repository>`.
#[derive(Debug, Clone)]
pub struct BorgCli {
    binary: PathBuf,
    timeout: Duration,
}

impl BorgCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        BorgCli {
            binary: binary.into(),
            timeout,
        }
    }
}

impl ArchiveSource for BorgCli {
    fn list_archives(&self, repository: &Path) -> Result<ArchiveSet, SnapshotError> {
        debug!(
            "Running {} list --json {}",
            self.binary.display(),
            repository.display()
        );

        let mut child = Command::new(&self.binary)
            .arg("list")
            .arg("--json")
            .arg(repository)
            // Never let the tool block on an interactive passphrase prompt.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapshotError::Spawn {
                binary: self.binary.clone(),
                source: e,
            })?;

        // Drain both pipes concurrently so a chatty child cannot fill a pipe
        // buffer and stall before it exits. A reader that outlives the
        // deadline is left behind; its send then fails silently.
        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(Pipe::Stdout, pipe, tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(Pipe::Stderr, pipe, tx.clone());
            pending += 1;
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(SnapshotError::Io)? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SnapshotError::TimedOut(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // The tool may have exited while something it started still holds
        // the pipes open, so draining shares the same deadline.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for _ in 0..pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (pipe, output) = match rx.recv_timeout(remaining) {
                Ok(received) => received,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SnapshotError::TimedOut(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SnapshotError::Io(std::io::Error::other(
                        "pipe reader exited without output",
                    )));
                }
            };
            let output = output.map_err(SnapshotError::Io)?;
            match pipe {
                Pipe::Stdout => stdout = output,
                Pipe::Stderr => stderr = output,
            }
        }

        if !status.success() {
            return Err(SnapshotError::Failed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        let archives = parse_borg_listing(&stdout)?;
        debug!(
            "{} lists {} archives",
            repository.display(),
            archives.len()
        );
        Ok(archives)
    }
}

#[derive(Debug, Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

type PipeOutput = (Pipe, std::io::Result<Vec<u8>>);

fn spawn_reader<R>(pipe: Pipe, mut reader: R, tx: mpsc::Sender<PipeOutput>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = reader.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send((pipe, result));
    });
}
