//! Append-only delivery ledger, independent of the queue store.
//!
//! The ledger is best-effort by contract: a failed write falls back to a
//! date-stamped secondary file in the same directory, and a failed fallback
//! is logged and swallowed. Nothing here may block or fail message
//! processing.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tracing::warn;

const HEADER: &str = "Timestamp,Recipient,Message,Status";

#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one outcome row. Never fails the caller.
    pub fn append(&self, recipient: &str, body_or_label: &str, status: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let row = format!(
            "{timestamp},{},{},{}",
            escape(recipient),
            escape(body_or_label),
            escape(status)
        );

        if let Err(primary_err) = write_row(&self.path, &row) {
            let fallback = self.fallback_path();
            match write_row(&fallback, &row) {
                Ok(()) => warn!(
                    primary = %self.path.display(),
                    fallback = %fallback.display(),
                    %primary_err,
                    "audit ledger busy, wrote fallback file"
                ),
                Err(fallback_err) => warn!(
                    primary = %self.path.display(),
                    %primary_err,
                    %fallback_err,
                    "audit row dropped"
                ),
            }
        }
    }

    /// Secondary ledger next to the primary, stamped with the current date.
    pub fn fallback_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "deliveries".to_owned());
        let date = chrono::Local::now().format("%Y-%m-%d");

        self.path
            .with_file_name(format!("{stem}-{date}.csv"))
    }
}

fn write_row(path: &Path, row: &str) -> std::io::Result<()> {
    let new_file = !path.exists();

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    if new_file {
        writeln!(file, "{HEADER}")?;
    }

    writeln!(file, "{row}")
}

/// Minimal CSV quoting: fields containing a delimiter, quote or newline are
/// wrapped in quotes with embedded quotes doubled.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}
