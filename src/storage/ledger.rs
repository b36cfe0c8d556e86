//! Durable per-record download outcomes.
//!
//! Two JSON documents live in the state directory:
//!
//! * `downloaded_files.json` maps record id to its terminal [`LedgerEntry`].
//! * `download_errors.json` maps record id to the last failure, for the operator.
//!
//! Every mutation goes through [`LedgerHandle`], which holds the only copy of
//! both documents behind one mutex and rewrites them atomically before
//! returning. A record is therefore either absent, `succeeded` or `failed` on
//! disk at any instant.
//!
//! A `failed` entry is only honoured while the error log still lists it.
//! Removing the error log (or an entry in it) makes the record eligible again
//! on the next run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use memget_core::models::record::DownloadRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{read_json, write_json_atomic};

pub const LEDGER_FILE: &str = "downloaded_files.json";
pub const ERROR_LOG_FILE: &str = "download_errors.json";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub status: EntryStatus,
    /// Primary file relative to the output directory.
    pub local_path: Option<String>,
    /// Every file the record produced (more than one for archives).
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    pub attempted_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

impl LedgerEntry {
    pub fn succeeded(files: Vec<String>, content_type: Option<String>, bytes: u64) -> Self {
        Self {
            status: EntryStatus::Succeeded,
            local_path: files.first().cloned(),
            files,
            content_type,
            bytes,
            attempted_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: EntryStatus::Failed,
            local_path: None,
            files: Vec::new(),
            content_type: None,
            bytes: 0,
            attempted_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorLogEntry {
    pub url: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub index: usize,
    pub error: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub logged_at: DateTime<Utc>,
}

/// Read-only view handed to downstream stages.
#[derive(Debug, Clone, Default)]
pub struct ProgressLedger {
    entries: BTreeMap<String, LedgerEntry>,
}

impl ProgressLedger {
    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub fn is_succeeded(&self, id: &str) -> bool {
        self.get(id)
            .is_some_and(|e| e.status == EntryStatus::Succeeded)
    }

    /// True when a run must not touch the record.
    pub fn is_terminal(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, status: EntryStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&str, &LedgerEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.status == EntryStatus::Succeeded)
            .map(|(id, e)| (id.as_str(), e))
    }

    /// File names (relative to the output directory) of all completed records.
    pub fn completed_files(&self) -> HashSet<String> {
        self.succeeded()
            .flat_map(|(_, e)| e.files.iter().cloned())
            .collect()
    }
}

struct LedgerState {
    ledger: ProgressLedger,
    errors: BTreeMap<String, ErrorLogEntry>,
    ledger_path: PathBuf,
    error_path: PathBuf,
}

/// Single serialization point for ledger and error log writes.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<Mutex<LedgerState>>,
}

impl LedgerHandle {
    pub async fn open(state_dir: &Path) -> Result<Self, LedgerError> {
        let ledger_path = state_dir.join(LEDGER_FILE);
        let error_path = state_dir.join(ERROR_LOG_FILE);

        let mut entries: BTreeMap<String, LedgerEntry> = read_json(&ledger_path)
            .await
            .map_err(|source| LedgerError::Read {
                path: ledger_path.clone(),
                source,
            })?
            .unwrap_or_default();
        let errors: BTreeMap<String, ErrorLogEntry> = read_json(&error_path)
            .await
            .map_err(|source| LedgerError::Read {
                path: error_path.clone(),
                source,
            })?
            .unwrap_or_default();

        let before = entries.len();
        entries.retain(|id, e| e.status == EntryStatus::Succeeded || errors.contains_key(id));
        let cleared = before - entries.len();
        if cleared > 0 {
            tracing::info!(
                "[ledger] {} failed record(s) no longer in the error log will be retried",
                cleared
            );
        }

        tracing::debug!(
            "[ledger] loaded {} entries and {} errors from {}",
            entries.len(),
            errors.len(),
            state_dir.display()
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(LedgerState {
                ledger: ProgressLedger { entries },
                errors,
                ledger_path,
                error_path,
            })),
        })
    }

    pub async fn snapshot(&self) -> ProgressLedger {
        self.inner.lock().await.ledger.clone()
    }

    pub async fn error_count(&self) -> usize {
        self.inner.lock().await.errors.len()
    }

    pub async fn record_success(&self, id: &str, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut state = self.inner.lock().await;

        let mut next = state.ledger.entries.clone();
        next.insert(id.to_string(), entry);
        write_json_atomic(&state.ledger_path, &next)
            .await
            .map_err(|source| LedgerError::Write {
                path: state.ledger_path.clone(),
                source,
            })?;
        state.ledger.entries = next;

        // A stale error entry would only mislead the operator.
        if state.errors.contains_key(id) {
            let mut errors = state.errors.clone();
            errors.remove(id);
            write_json_atomic(&state.error_path, &errors)
                .await
                .map_err(|source| LedgerError::Write {
                    path: state.error_path.clone(),
                    source,
                })?;
            state.errors = errors;
        }
        Ok(())
    }

    /// Writes the error log first so that a `failed` ledger entry always has
    /// its error-log counterpart; a crash in between leaves the record absent.
    pub async fn record_failure(
        &self,
        record: &DownloadRecord,
        error: &str,
        kind: FailureKind,
        attempts: u32,
    ) -> Result<(), LedgerError> {
        let mut state = self.inner.lock().await;

        let mut errors = state.errors.clone();
        errors.insert(
            record.id.clone(),
            ErrorLogEntry {
                url: record.url.clone(),
                timestamp: record.timestamp,
                index: record.index,
                error: error.to_string(),
                kind,
                attempts,
                logged_at: Utc::now(),
            },
        );
        write_json_atomic(&state.error_path, &errors)
            .await
            .map_err(|source| LedgerError::Write {
                path: state.error_path.clone(),
                source,
            })?;
        state.errors = errors;

        let mut next = state.ledger.entries.clone();
        next.insert(record.id.clone(), LedgerEntry::failed(error));
        write_json_atomic(&state.ledger_path, &next)
            .await
            .map_err(|source| LedgerError::Write {
                path: state.ledger_path.clone(),
                source,
            })?;
        state.ledger.entries = next;
        Ok(())
    }
}

/// Removes the error log, returning how many failures it listed.
pub async fn clear_error_log(state_dir: &Path) -> Result<usize, LedgerError> {
    let path = state_dir.join(ERROR_LOG_FILE);
    let errors: BTreeMap<String, ErrorLogEntry> = read_json(&path)
        .await
        .map_err(|source| LedgerError::Read {
            path: path.clone(),
            source,
        })?
        .unwrap_or_default();
    if errors.is_empty() {
        return Ok(0);
    }
    tokio::fs::remove_file(&path)
        .await
        .map_err(|source| LedgerError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(errors.len())
}
