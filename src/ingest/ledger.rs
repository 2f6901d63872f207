//! JSONL ledger of submitted audio files.
//!
//! Append-only: every submission and deletion is a JSON line, and the
//! current view is derived by replay. Keyed by a content hash of the audio
//! so submitting the same recording twice can be detected before upload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::MemoId;

/// Errors that can occur with the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An entry in the ledger log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,

    pub event_type: LedgerEventType,

    pub memo_id: MemoId,

    /// Audio content hash (set on submissions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_hash: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    Submitted,
    Deleted,
}

/// A submission with current state (derived from replaying events)
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub audio_hash: String,
    pub memo_id: MemoId,
    pub file_name: String,
    pub submitted_at: DateTime<Utc>,
    pub deleted: bool,
}

/// JSONL-backed submission ledger
pub struct SubmissionLedger {
    path: PathBuf,
}

impl SubmissionLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Open the ledger in the default location (~/.dealmemo/submissions.jsonl)
    pub async fn open_default() -> Result<Self> {
        let path = crate::config::paths::submissions_ledger()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, event: &LedgerEvent) -> Result<(), LedgerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events, keyed by audio hash
    pub async fn replay(&self) -> Result<HashMap<String, SubmissionRecord>, LedgerError> {
        let mut records: HashMap<String, SubmissionRecord> = HashMap::new();

        if !self.path.exists() {
            return Ok(records);
        }

        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: LedgerEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut records, event);
        }

        Ok(records)
    }

    fn apply_event(records: &mut HashMap<String, SubmissionRecord>, event: LedgerEvent) {
        match event.event_type {
            LedgerEventType::Submitted => {
                if let Some(hash) = event.audio_hash {
                    records.insert(
                        hash.clone(),
                        SubmissionRecord {
                            audio_hash: hash,
                            memo_id: event.memo_id,
                            file_name: event.file_name.unwrap_or_default(),
                            submitted_at: event.timestamp,
                            deleted: false,
                        },
                    );
                }
            }
            LedgerEventType::Deleted => {
                for record in records.values_mut() {
                    if record.memo_id == event.memo_id {
                        record.deleted = true;
                    }
                }
            }
        }
    }

    /// Live (not deleted) submission of this audio, if any
    pub async fn lookup(&self, audio_hash: &str) -> Result<Option<SubmissionRecord>, LedgerError> {
        let records = self.replay().await?;
        Ok(records.get(audio_hash).filter(|r| !r.deleted).cloned())
    }

    pub async fn record_submission(
        &self,
        audio_hash: &str,
        memo_id: &MemoId,
        file_name: &str,
    ) -> Result<(), LedgerError> {
        self.append(&LedgerEvent {
            timestamp: Utc::now(),
            event_type: LedgerEventType::Submitted,
            memo_id: memo_id.clone(),
            audio_hash: Some(audio_hash.to_string()),
            file_name: Some(file_name.to_string()),
        })
        .await
    }

    pub async fn record_deletion(&self, memo_id: &MemoId) -> Result<(), LedgerError> {
        self.append(&LedgerEvent {
            timestamp: Utc::now(),
            event_type: LedgerEventType::Deleted,
            memo_id: memo_id.clone(),
            audio_hash: None,
            file_name: None,
        })
        .await
    }

    /// Most recent live submissions, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<SubmissionRecord>, LedgerError> {
        let mut records: Vec<SubmissionRecord> = self
            .replay()
            .await?
            .into_values()
            .filter(|r| !r.deleted)
            .collect();
        records.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// SHA256 of the audio bytes (first 16 hex chars)
pub fn audio_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
