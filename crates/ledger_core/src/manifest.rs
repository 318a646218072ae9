//! The decode manifest: a small JSON sidecar recording where the most
//! recent decode came from and where its output went, so downstream ledger
//! runs can pick up the freshest document without rescanning.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE_NAME: &str = "_manifest_recent.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub source_path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_mtime: Option<DateTime<Utc>>,
    pub out_json: String,
    /// Fingerprint of the decoded content, see the ledger module.
    pub content_hash: String,
}

impl Manifest {
    pub fn read_from(path: &Path) -> io::Result<Manifest> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        let mut text = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        text.push('\n');
        fs::write(path, text)
    }
}
