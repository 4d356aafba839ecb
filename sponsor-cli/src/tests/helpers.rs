//! Test helpers for preparing register files and decoding command output.

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

pub(super) const REGISTER_HEADER: &str = "Organisation Name,Town/City,County,Type & Rating,Route\n";

/// Temporary directory holding a register CSV and a database path.
#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn register(&self) -> Utf8PathBuf {
        self.root.join("register.csv")
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.root.join("sponsors.db")
    }

    /// Replace the register with the given data rows.
    pub(super) fn write_register(&self, rows: &[&str]) {
        let mut contents = REGISTER_HEADER.to_owned();
        for row in rows {
            contents.push_str(row);
            contents.push('\n');
        }
        write_utf8(&self.register(), contents.as_bytes());
    }
}

pub(super) fn write_utf8(path: &Utf8Path, contents: &[u8]) {
    fs::write(path, contents).expect("write file");
}

pub(super) fn decode(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("command output is JSON")
}

pub(super) fn names(snapshot: &Value) -> Vec<String> {
    snapshot["organisations"]
        .as_array()
        .expect("organisations array")
        .iter()
        .map(|organisation| {
            organisation["name"]
                .as_str()
                .expect("organisation name")
                .to_owned()
        })
        .collect()
}
