use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use tempfile::TempDir;

/// Stand-in for `borg list --json <repo>`: prints `<repo>/archives.json`,
/// or fails the way borg does when the repository cannot be opened.
const FAKE_BORG: &str = r#"#!/bin/sh
[ "$1" = list ] && [ "$2" = --json ] || { echo "unexpected arguments: $*" >&2; exit 64; }
if [ -f "$3/archives.json" ]; then
    cat "$3/archives.json"
else
    echo "Repository $3 does not exist." >&2
    exit 2
fi
"#;

/// A root directory of fake borg repositories plus the fake borg binary
/// that serves them.
pub struct BorgRoot {
    root: TempDir,
    _tools: TempDir,
    borg: PathBuf,
}

// Not every test crate uses every helper.
#[allow(dead_code)]
impl BorgRoot {
    pub fn new() -> Self {
        let tools = TempDir::new().unwrap();
        let borg = tools.path().join("borg");
        fs::write(&borg, FAKE_BORG).unwrap();
        fs::set_permissions(&borg, fs::Permissions::from_mode(0o755)).unwrap();

        BorgRoot {
            root: TempDir::new().unwrap(),
            _tools: tools,
            borg,
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Create or replace a repository's live archive list.
    pub fn set_archives(&self, repository: &str, archives: &[(&str, &str)]) {
        let dir = self.root.path().join(repository);
        fs::create_dir_all(&dir).unwrap();
        let listing = serde_json::json!({
            "archives": archives
                .iter()
                .map(|(name, id)| serde_json::json!({"archive": name, "name": name, "id": id}))
                .collect::<Vec<_>>(),
            "repository": {"location": dir.display().to_string()},
        });
        fs::write(dir.join("archives.json"), listing.to_string()).unwrap();
    }

    /// Make the repository fail to list.
    pub fn break_repository(&self, repository: &str) {
        let _ = fs::remove_file(self.root.path().join(repository).join("archives.json"));
    }

    pub fn ledger_path(&self, repository: &str) -> PathBuf {
        self.root.path().join(format!(".{repository}.ledger.toml"))
    }

    pub fn ledger_bytes(&self, repository: &str) -> Vec<u8> {
        fs::read(self.ledger_path(repository)).unwrap()
    }

    /// The binary, pointed at the fake borg. Root and flags are added by the caller.
    pub fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("borg-ledger");
        cmd.env_remove("RUST_LOG").arg("--borg-binary").arg(&self.borg);
        cmd
    }

    pub fn verify(&self) -> Output {
        self.cmd().arg(self.path()).output().unwrap()
    }

    pub fn force(&self) -> Output {
        self.cmd().arg("--force").arg(self.path()).output().unwrap()
    }
}

// Each integration test file is compiled as its own crate, and not all of
// them parse fingerprints.
#[allow(dead_code)]
pub fn extract_fingerprint(stdout: &[u8]) -> String {
    let output = std::str::from_utf8(stdout).expect("stdout should be UTF-8");
    output
        .lines()
        .find_map(|line| line.strip_prefix("Fingerprint: "))
        .expect("fingerprint not found in output")
        .to_string()
}
