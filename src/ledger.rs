//! Append-only accession ledgers that make interrupted runs resumable.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::RefsketchError;

/// Line-delimited set of accessions.
///
/// The file is read once when opened. Every `record` writes and flushes the
/// line before returning, so callers may rely on the entry being durable when
/// they move on to the next step.
#[derive(Debug)]
pub struct Ledger {
    path: Utf8PathBuf,
    inner: Mutex<LedgerState>,
}

#[derive(Debug)]
struct LedgerState {
    entries: HashSet<String>,
    file: File,
}

impl Ledger {
    pub fn open(path: &Utf8Path) -> Result<Self, RefsketchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| RefsketchError::Filesystem(format!("create {parent}: {err}")))?;
        }

        let mut entries = HashSet::new();
        if path.as_std_path().exists() {
            let file = File::open(path.as_std_path())
                .map_err(|err| RefsketchError::Filesystem(format!("open {path}: {err}")))?;
            for line in BufReader::new(file).lines() {
                let line = line
                    .map_err(|err| RefsketchError::Filesystem(format!("read {path}: {err}")))?;
                let line = line.trim();
                if !line.is_empty() {
                    entries.insert(line.to_string());
                }
            }
        }
        debug!(ledger = %path, entries = entries.len(), "loaded ledger");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| RefsketchError::Filesystem(format!("open {path}: {err}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LedgerState { entries, file }),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn contains(&self, accession: &str) -> bool {
        self.lock().entries.contains(accession)
    }

    /// Appends `accession` unless already present. Returns whether a line was
    /// written.
    pub fn record(&self, accession: &str) -> Result<bool, RefsketchError> {
        let mut state = self.lock();
        if state.entries.contains(accession) {
            return Ok(false);
        }
        writeln!(state.file, "{accession}")
            .and_then(|_| state.file.flush())
            .map_err(|err| RefsketchError::Filesystem(format!("append {}: {err}", self.path)))?;
        state.entries.insert(accession.to_string());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        // A panic while holding the lock cannot leave a half-written set entry.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
