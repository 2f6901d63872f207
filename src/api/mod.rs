//! Backend interface.
//!
//! `Backend` has one method per endpoint the dashboard consumes. The HTTP
//! implementation is a thin pass-through; the in-memory implementation
//! simulates the remote pipeline for offline runs and tests.

pub mod http;
pub mod memory;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AuthorizationUrl, ConnectionTestResult, CrmConnection, CrmProvider, DealSchema,
    ExtractionUpdate, Memo, MemoId, MemoStatus, User, UserSettingsUpdate,
};
use crate::error::ApiError;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

/// Audio accepted for upload
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    /// Build an upload from in-memory bytes
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ApiError> {
        let file_name = file_name.into();
        let mime_type = mime_for(&file_name)?;

        if bytes.is_empty() {
            return Err(ApiError::Validation(format!(
                "Audio file '{}' is empty",
                file_name
            )));
        }

        Ok(Self {
            file_name,
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    /// Read an audio file from disk
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::Validation(format!("Cannot read {}: {}", path.display(), e))
        })?;

        Self::new(file_name, bytes)
    }
}

/// Content type by file extension; anything else is rejected before upload.
fn mime_for(file_name: &str) -> Result<&'static str, ApiError> {
    let extension = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "m4a" | "mp4" => Ok("audio/mp4"),
        "mp3" => Ok("audio/mpeg"),
        "wav" => Ok("audio/wav"),
        "webm" => Ok("audio/webm"),
        "ogg" | "oga" => Ok("audio/ogg"),
        _ => Err(ApiError::Validation(format!(
            "Unsupported audio format: '{}'",
            file_name
        ))),
    }
}

/// Response of `POST /memos`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub id: MemoId,
    pub status: MemoStatus,
    pub status_url: String,
}

/// Query parameters of `GET /memos`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MemoFilter {
    pub status: Option<MemoStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl MemoFilter {
    pub fn with_status(mut self, status: MemoStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query string pairs, omitting unset parameters
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(status) = self.status {
            pairs.push(("status", status.to_string()));
        }
        if let Some(start) = self.start_date {
            pairs.push(("startDate", start.to_rfc3339()));
        }
        if let Some(end) = self.end_date {
            pairs.push(("endDate", end.to_rfc3339()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        pairs
    }

    /// Apply the filter locally (newest first, then offset/limit)
    pub fn apply(&self, memos: impl IntoIterator<Item = Memo>) -> Vec<Memo> {
        let mut selected: Vec<Memo> = memos
            .into_iter()
            .filter(|m| self.status.map_or(true, |s| m.status == s))
            .filter(|m| self.start_date.map_or(true, |start| m.created_at >= start))
            .filter(|m| self.end_date.map_or(true, |end| m.created_at <= end))
            .collect();

        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = self.offset.unwrap_or(0) as usize;
        let limit = self.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        selected.into_iter().skip(offset).take(limit).collect()
    }
}

/// The remote API consumed by the dashboard
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// `POST /memos`
    async fn upload_memo(&self, upload: AudioUpload) -> Result<SubmitReceipt, ApiError>;

    /// `GET /memos/{id}`
    async fn get_memo(&self, id: &MemoId) -> Result<Memo, ApiError>;

    /// `GET /memos`
    async fn list_memos(&self, filter: &MemoFilter) -> Result<Vec<Memo>, ApiError>;

    /// `POST /memos/{id}/approve`
    async fn approve_memo(
        &self,
        id: &MemoId,
        edits: Option<&ExtractionUpdate>,
    ) -> Result<Memo, ApiError>;

    /// `POST /memos/{id}/reject`
    async fn reject_memo(&self, id: &MemoId) -> Result<Memo, ApiError>;

    /// `POST /memos/{id}/re-extract`
    async fn re_extract_memo(&self, id: &MemoId) -> Result<Memo, ApiError>;

    /// `DELETE /memos/{id}`; succeeds for unknown ids
    async fn delete_memo(&self, id: &MemoId) -> Result<(), ApiError>;

    /// `GET /crm/connections`
    async fn list_connections(&self) -> Result<Vec<CrmConnection>, ApiError>;

    /// `GET /crm/{provider}/connection`
    async fn get_connection(&self, provider: CrmProvider)
        -> Result<Option<CrmConnection>, ApiError>;

    /// `GET /crm/{provider}/authorize`
    async fn authorize_url(&self, provider: CrmProvider) -> Result<AuthorizationUrl, ApiError>;

    /// `POST /crm/{provider}/disconnect`; succeeds when not connected
    async fn disconnect(&self, provider: CrmProvider) -> Result<(), ApiError>;

    /// `POST /crm/{provider}/test`
    async fn test_connection(&self, provider: CrmProvider)
        -> Result<ConnectionTestResult, ApiError>;

    /// `GET /crm/{provider}/schema`
    async fn deal_schema(&self, provider: CrmProvider) -> Result<DealSchema, ApiError>;

    /// `GET /users/me`
    async fn current_user(&self) -> Result<User, ApiError>;

    /// `PATCH /users/me`
    async fn update_user(&self, update: &UserSettingsUpdate) -> Result<User, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_rejects_empty_and_unknown_formats() {
        assert!(matches!(
            AudioUpload::new("memo.m4a", vec![]),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            AudioUpload::new("notes.txt", vec![1, 2, 3]),
            Err(ApiError::Validation(_))
        ));

        let upload = AudioUpload::new("Call with Acme.M4A", vec![0; 16]).unwrap();
        assert_eq!(upload.mime_type, "audio/mp4");
    }

    #[test]
    fn test_filter_query_pairs_skip_unset() {
        let filter = MemoFilter::default()
            .with_status(MemoStatus::PendingReview)
            .with_limit(10);

        assert_eq!(
            filter.query_pairs(),
            vec![
                ("status", "pending_review".to_string()),
                ("limit", "10".to_string())
            ]
        );
        assert!(MemoFilter::default().query_pairs().is_empty());
    }
}
