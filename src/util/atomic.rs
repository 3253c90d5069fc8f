//! Crash-safe file replacement shared by the ledger and registry writers.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Failure while atomically replacing a file, tagged with the path involved.
#[derive(Debug)]
pub(crate) struct AtomicWriteError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

/// Replace `path` with `content`.
///
/// Writes to a temporary file in the same directory, fsyncs it, then renames
/// it over `path`. Either the old or the new content is visible afterwards,
/// never a partial write. The temporary file is removed on any failure.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<(), AtomicWriteError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(|e| AtomicWriteError {
        path: parent.to_path_buf(),
        source: e,
    })?;

    let to_err = |e: std::io::Error| AtomicWriteError {
        path: path.to_path_buf(),
        source: e,
    };

    temp_file.write_all(content).map_err(to_err)?;
    temp_file.as_file().sync_all().map_err(to_err)?;
    temp_file.persist(path).map_err(|e| to_err(e.error))?;

    Ok(())
}
