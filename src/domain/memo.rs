//! Memo state and the processing lifecycle.
//!
//! A memo moves forward through
//! `uploading → transcribing → extracting → pending_review → approved | rejected`,
//! with `failed` reachable from every non-terminal status. Reviewers can send a
//! memo back to `extracting` from `pending_review`, `rejected` or `failed`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Opaque memo identifier assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoId(String);

impl MemoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a memo sits in its pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoStatus {
    /// Audio is being uploaded to storage
    Uploading,

    /// Speech-to-text is running
    Transcribing,

    /// Structured fields are being extracted from the transcript
    Extracting,

    /// Waiting for a human to approve or reject
    PendingReview,

    /// Approved and pushed to the CRM
    Approved,

    /// Rejected by the reviewer
    Rejected,

    /// Processing failed
    Failed,
}

impl MemoStatus {
    pub const ALL: [MemoStatus; 7] = [
        MemoStatus::Uploading,
        MemoStatus::Transcribing,
        MemoStatus::Extracting,
        MemoStatus::PendingReview,
        MemoStatus::Approved,
        MemoStatus::Rejected,
        MemoStatus::Failed,
    ];

    /// No user action is possible; the memo should be polled.
    pub fn is_processing(self) -> bool {
        matches!(
            self,
            MemoStatus::Uploading | MemoStatus::Transcribing | MemoStatus::Extracting
        )
    }

    /// No further automatic transitions will happen.
    pub fn is_final_state(self) -> bool {
        matches!(
            self,
            MemoStatus::Approved | MemoStatus::Rejected | MemoStatus::Failed
        )
    }

    /// Whether a user-initiated action is valid from this status
    pub fn permits(self, action: MemoAction) -> bool {
        match action {
            MemoAction::Approve | MemoAction::Reject => self == MemoStatus::PendingReview,
            MemoAction::ReExtract => matches!(
                self,
                MemoStatus::PendingReview | MemoStatus::Rejected | MemoStatus::Failed
            ),
            MemoAction::Delete => true,
        }
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(self, next: MemoStatus) -> bool {
        use MemoStatus::*;

        match (self, next) {
            (Uploading, Transcribing) | (Transcribing, Extracting) | (Extracting, PendingReview) => {
                true
            }
            (PendingReview, Approved) | (PendingReview, Rejected) => true,
            (PendingReview | Rejected | Failed, Extracting) => true,
            (from, Failed) => !from.is_final_state(),
            _ => false,
        }
    }

    /// Status a user action moves the memo into (None for delete)
    pub fn after(action: MemoAction) -> Option<MemoStatus> {
        match action {
            MemoAction::Approve => Some(MemoStatus::Approved),
            MemoAction::Reject => Some(MemoStatus::Rejected),
            MemoAction::ReExtract => Some(MemoStatus::Extracting),
            MemoAction::Delete => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoStatus::Uploading => "uploading",
            MemoStatus::Transcribing => "transcribing",
            MemoStatus::Extracting => "extracting",
            MemoStatus::PendingReview => "pending_review",
            MemoStatus::Approved => "approved",
            MemoStatus::Rejected => "rejected",
            MemoStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MemoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        MemoStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ApiError::Validation(format!("Unknown memo status: {}", s)))
    }
}

/// User-initiated operations on a memo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoAction {
    Approve,
    Reject,
    ReExtract,
    Delete,
}

impl std::fmt::Display for MemoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoAction::Approve => write!(f, "approve"),
            MemoAction::Reject => write!(f, "reject"),
            MemoAction::ReExtract => write!(f, "re-extract"),
            MemoAction::Delete => write!(f, "delete"),
        }
    }
}

/// One audio submission and everything derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memo {
    pub id: MemoId,

    pub user_id: String,

    pub status: MemoStatus,

    /// Opaque storage URL of the uploaded audio
    pub audio_url: String,

    #[serde(default)]
    pub audio_duration_seconds: f64,

    pub transcript: Option<String>,

    /// Speech-to-text confidence in [0, 1]
    pub transcript_confidence: Option<f64>,

    pub extraction: Option<Extraction>,

    /// Set only while status is `failed`
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    /// When transcription and extraction completed
    pub processed_at: Option<DateTime<Utc>>,

    pub approved_at: Option<DateTime<Utc>>,
}

impl Memo {
    /// First data-model invariant this memo breaks, if any
    pub fn invariant_violation(&self) -> Option<&'static str> {
        let has_error = self.error_message.is_some();
        if has_error != (self.status == MemoStatus::Failed) {
            return Some("errorMessage must be set iff status is failed");
        }

        if self.transcript.is_some()
            && matches!(self.status, MemoStatus::Uploading | MemoStatus::Transcribing)
        {
            return Some("transcript present before transcription finished");
        }

        if self.extraction.is_some() && self.transcript.is_none() {
            return Some("extraction present without a transcript");
        }

        if self.status == MemoStatus::PendingReview && self.extraction.is_none() {
            return Some("pending_review memo has no extraction");
        }

        if self.approved_at.is_some() != (self.status == MemoStatus::Approved) {
            return Some("approvedAt must be set iff status is approved");
        }

        if let Some(confidence) = self.transcript_confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Some("transcript confidence outside [0, 1]");
            }
        }

        None
    }
}

/// Structured CRM fields extracted from a transcript
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub company_name: Option<String>,
    pub deal_amount: Option<f64>,
    pub deal_currency: Option<String>,
    pub deal_stage: Option<String>,
    pub close_date: Option<NaiveDate>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_title: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub competitors: Vec<String>,
    #[serde(default)]
    pub objections: Vec<String>,
    #[serde(default)]
    pub decision_makers: Vec<String>,
    /// Per-field confidence in [0, 1], keyed by camelCase field name
    #[serde(default)]
    pub confidence_scores: BTreeMap<String, f64>,
}

impl Extraction {
    /// Overlay reviewer edits; fields absent from `update` are kept.
    pub fn merge(&mut self, update: &ExtractionUpdate) {
        fn overlay<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        fn overlay_field<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *target = value.clone();
            }
        }

        overlay_field(&mut self.company_name, &update.company_name);
        overlay_field(&mut self.deal_amount, &update.deal_amount);
        overlay_field(&mut self.deal_currency, &update.deal_currency);
        overlay_field(&mut self.deal_stage, &update.deal_stage);
        overlay_field(&mut self.close_date, &update.close_date);
        overlay_field(&mut self.contact_name, &update.contact_name);
        overlay_field(&mut self.contact_email, &update.contact_email);
        overlay_field(&mut self.contact_phone, &update.contact_phone);
        overlay_field(&mut self.contact_title, &update.contact_title);
        overlay_field(&mut self.summary, &update.summary);

        overlay(&mut self.pain_points, &update.pain_points);
        overlay(&mut self.next_steps, &update.next_steps);
        overlay(&mut self.competitors, &update.competitors);
        overlay(&mut self.objections, &update.objections);
        overlay(&mut self.decision_makers, &update.decision_makers);
    }
}

/// Partial extraction sent with an approval; only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pain_points: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub competitors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_makers: Option<Vec<String>>,
}

impl ExtractionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Set one field from its textual form, as typed on the command line.
    ///
    /// Accepts camelCase or snake_case field names. List fields take a
    /// `;`-separated value.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), ApiError> {
        let value = value.trim();
        let text = || Some(value.to_string());
        let list = || {
            Some(
                value
                    .split(';')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            )
        };

        match normalize_field(field).as_str() {
            "companyname" => self.company_name = text(),
            "dealamount" => {
                let amount: f64 = value.parse().map_err(|_| {
                    ApiError::Validation(format!("dealAmount must be a number, got '{}'", value))
                })?;
                if !amount.is_finite() || amount < 0.0 {
                    return Err(ApiError::Validation(format!(
                        "dealAmount must be a non-negative number, got '{}'",
                        value
                    )));
                }
                self.deal_amount = Some(amount);
            }
            "dealcurrency" => self.deal_currency = Some(value.to_uppercase()),
            "dealstage" => self.deal_stage = text(),
            "closedate" => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                    ApiError::Validation(format!("closeDate must be YYYY-MM-DD, got '{}'", value))
                })?;
                self.close_date = Some(date);
            }
            "contactname" => self.contact_name = text(),
            "contactemail" => {
                if !value.contains('@') {
                    return Err(ApiError::Validation(format!(
                        "contactEmail is not an email address: '{}'",
                        value
                    )));
                }
                self.contact_email = text();
            }
            "contactphone" => self.contact_phone = text(),
            "contacttitle" => self.contact_title = text(),
            "summary" => self.summary = text(),
            "painpoints" => self.pain_points = list(),
            "nextsteps" => self.next_steps = list(),
            "competitors" => self.competitors = list(),
            "objections" => self.objections = list(),
            "decisionmakers" => self.decision_makers = list(),
            _ => {
                return Err(ApiError::Validation(format!(
                    "Unknown extraction field: {}",
                    field
                )))
            }
        }

        Ok(())
    }
}

fn normalize_field(field: &str) -> String {
    field
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
