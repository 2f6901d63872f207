//! In-process backend that simulates the remote memo pipeline.
//!
//! Enforces the same transition rules as the real backend and produces
//! canned transcripts and extractions. With auto-advance enabled every
//! `get_memo` on a processing memo moves it one stage forward, which is
//! what `--simulate` runs and the polling tests rely on.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{AudioUpload, Backend, MemoFilter, SubmitReceipt};
use crate::domain::{
    AuthorizationUrl, ConnectionStatus, ConnectionTestResult, CrmConnection, CrmProvider,
    DealSchema, Extraction, ExtractionUpdate, Memo, MemoAction, MemoId, MemoStatus,
    PipelineStage, PropertyOption, SchemaProperty, User, UserSettingsUpdate,
};
use crate::error::ApiError;

/// Redirect target the simulated OAuth server sends the browser back to
pub const SIMULATED_REDIRECT: &str = "http://localhost:3000/dashboard/integrations";

#[derive(Debug, Default)]
struct State {
    memos: HashMap<MemoId, Memo>,
    connections: HashMap<CrmProvider, CrmConnection>,
    /// `state` parameters handed out by `authorize_url`
    pending_oauth: HashMap<String, CrmProvider>,
    user: Option<User>,
    /// `get_memo` calls per memo id
    fetches: HashMap<MemoId, u32>,
}

/// Simulated backend
pub struct MemoryBackend {
    state: Mutex<State>,
    auto_advance: AtomicBool,
    /// Number of upcoming requests that fail with a network error
    failures_remaining: AtomicU32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend; memos only move when [`advance`](Self::advance) is called
    pub fn new() -> Self {
        let user = User {
            id: "user_demo".to_string(),
            email: "demo@dealmemo.app".to_string(),
            display_name: Some("Demo User".to_string()),
            company: Some("Dealmemo".to_string()),
            avatar_url: None,
            phone: None,
            allow_create_records: false,
        };

        Self {
            state: Mutex::new(State {
                user: Some(user),
                ..Default::default()
            }),
            auto_advance: AtomicBool::new(false),
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Backend whose memos progress by one stage on every fetch
    pub fn simulated() -> Self {
        let backend = Self::new();
        backend.set_auto_advance(true);
        backend
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.auto_advance.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `count` requests fail with [`ApiError::Network`]
    pub fn fail_next_requests(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// How many times `get_memo` was called for `id`
    pub async fn fetch_count(&self, id: &MemoId) -> u32 {
        self.state.lock().await.fetches.get(id).copied().unwrap_or(0)
    }

    /// Move a processing memo one stage forward, as the external pipeline would
    pub async fn advance(&self, id: &MemoId) -> Result<MemoStatus, ApiError> {
        let mut state = self.state.lock().await;
        let memo = state
            .memos
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Memo {}", id)))?;
        advance_memo(memo);
        Ok(memo.status)
    }

    /// Simulate a pipeline failure
    pub async fn fail_processing(&self, id: &MemoId, message: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let memo = state
            .memos
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Memo {}", id)))?;

        if !memo.status.can_transition_to(MemoStatus::Failed) {
            return Err(ApiError::Validation(format!(
                "Memo {} is {} and cannot fail",
                id, memo.status
            )));
        }

        memo.status = MemoStatus::Failed;
        memo.error_message = Some(message.to_string());
        Ok(())
    }

    /// Insert a memo as-is (test fixtures)
    pub async fn insert_memo(&self, memo: Memo) {
        self.state.lock().await.memos.insert(memo.id.clone(), memo);
    }

    /// Insert a connection as-is (test fixtures)
    pub async fn insert_connection(&self, connection: CrmConnection) {
        self.state
            .lock()
            .await
            .connections
            .insert(connection.provider, connection);
    }

    /// Play the provider's side of OAuth: the user granted access on the
    /// page behind `authorization_url`. Returns the redirect URL the
    /// browser lands on.
    pub async fn grant_authorization(&self, authorization_url: &str) -> Result<String, ApiError> {
        let oauth_state = reqwest::Url::parse(authorization_url)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == "state")
                    .map(|(_, v)| v.into_owned())
            })
            .ok_or_else(|| ApiError::Validation("Authorization URL has no state".to_string()))?;

        let mut state = self.state.lock().await;
        let provider = state.pending_oauth.remove(&oauth_state).ok_or_else(|| {
            ApiError::Provider {
                provider: "OAuth".to_string(),
                message: "Unknown or already used authorization state".to_string(),
            }
        })?;

        let user_id = state.user.as_ref().map(|u| u.id.clone()).unwrap_or_default();
        let now = Utc::now();
        state.connections.insert(
            provider,
            CrmConnection {
                id: format!("conn_{}", &Uuid::new_v4().simple().to_string()[..8]),
                user_id,
                provider,
                status: ConnectionStatus::Connected,
                portal_id: Some("20240917".to_string()),
                account_email: Some("sales@acme.example".to_string()),
                account_name: Some("Acme Sales".to_string()),
                token_expires_at: Some(now + Duration::hours(6)),
                last_synced_at: None,
                connected_at: Some(now),
            },
        );

        Ok(format!("{}?connected={}", SIMULATED_REDIRECT, provider))
    }

    fn take_injected_failure(&self) -> Result<(), ApiError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected {
            Err(ApiError::Network("simulated connection reset".to_string()))
        } else {
            Ok(())
        }
    }

    async fn transition(
        &self,
        id: &MemoId,
        action: MemoAction,
        edits: Option<&ExtractionUpdate>,
    ) -> Result<Memo, ApiError> {
        self.take_injected_failure()?;

        let mut state = self.state.lock().await;
        let memo = state
            .memos
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Memo {}", id)))?;

        if !memo.status.permits(action) {
            return Err(ApiError::InvalidTransition {
                action,
                from: Some(memo.status),
            });
        }

        match action {
            MemoAction::Approve => {
                let extraction = memo.extraction.get_or_insert_with(Extraction::default);
                if let Some(update) = edits {
                    extraction.merge(update);
                }
                memo.status = MemoStatus::Approved;
                memo.approved_at = Some(Utc::now());
            }
            MemoAction::Reject => {
                memo.status = MemoStatus::Rejected;
            }
            MemoAction::ReExtract => {
                if memo.transcript.is_none() {
                    return Err(ApiError::Validation(format!(
                        "Memo {} has no transcript to extract from",
                        id
                    )));
                }
                if let Some(extraction) = memo.extraction.as_mut() {
                    extraction.confidence_scores.clear();
                }
                memo.status = MemoStatus::Extracting;
                memo.error_message = None;
            }
            MemoAction::Delete => {
                return Err(ApiError::Validation(
                    "Delete is not a status transition".to_string(),
                ))
            }
        }

        debug!(memo_id = %id, status = %memo.status, "Simulated transition");
        Ok(memo.clone())
    }
}

fn advance_memo(memo: &mut Memo) {
    match memo.status {
        MemoStatus::Uploading => memo.status = MemoStatus::Transcribing,
        MemoStatus::Transcribing => {
            memo.transcript = Some(sample_transcript());
            memo.transcript_confidence = Some(0.93);
            memo.status = MemoStatus::Extracting;
        }
        MemoStatus::Extracting => {
            memo.extraction = Some(sample_extraction());
            memo.processed_at = Some(Utc::now());
            memo.status = MemoStatus::PendingReview;
        }
        _ => {}
    }
}

fn sample_transcript() -> String {
    "Just got off the call with Dana Whitfield at Acme Corp. They want the team plan \
     for about twelve thousand a year, decision by end of quarter. Main pain is manual \
     CRM entry after calls. They're also looking at Gong. Next step is a security review \
     and a demo for their VP of Sales."
        .to_string()
}

fn sample_extraction() -> Extraction {
    let confidence_scores: BTreeMap<String, f64> = [
        ("companyName", 0.97),
        ("dealAmount", 0.81),
        ("contactName", 0.92),
        ("closeDate", 0.64),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    Extraction {
        company_name: Some("Acme Corp".to_string()),
        deal_amount: Some(12000.0),
        deal_currency: Some("USD".to_string()),
        deal_stage: Some("qualifiedtobuy".to_string()),
        close_date: NaiveDate::from_ymd_opt(2026, 12, 31),
        contact_name: Some("Dana Whitfield".to_string()),
        contact_email: None,
        contact_phone: None,
        contact_title: Some("Head of Revenue Operations".to_string()),
        summary: Some("Acme wants the team plan; decision by end of quarter.".to_string()),
        pain_points: vec!["Manual CRM entry after calls".to_string()],
        next_steps: vec![
            "Security review".to_string(),
            "Demo for VP of Sales".to_string(),
        ],
        competitors: vec!["Gong".to_string()],
        objections: vec![],
        decision_makers: vec!["VP of Sales".to_string()],
        confidence_scores,
    }
}

fn hubspot_schema() -> DealSchema {
    let stages = [
        ("appointmentscheduled", "Appointment Scheduled"),
        ("qualifiedtobuy", "Qualified To Buy"),
        ("presentationscheduled", "Presentation Scheduled"),
        ("decisionmakerboughtin", "Decision Maker Bought-In"),
        ("contractsent", "Contract Sent"),
        ("closedwon", "Closed Won"),
        ("closedlost", "Closed Lost"),
    ];

    DealSchema {
        properties: vec![
            SchemaProperty {
                name: "dealname".to_string(),
                label: "Deal Name".to_string(),
                field_type: "string".to_string(),
                options: vec![],
            },
            SchemaProperty {
                name: "amount".to_string(),
                label: "Amount".to_string(),
                field_type: "number".to_string(),
                options: vec![],
            },
            SchemaProperty {
                name: "closedate".to_string(),
                label: "Close Date".to_string(),
                field_type: "datetime".to_string(),
                options: vec![],
            },
            SchemaProperty {
                name: "dealstage".to_string(),
                label: "Deal Stage".to_string(),
                field_type: "enumeration".to_string(),
                options: stages
                    .iter()
                    .map(|(id, label)| PropertyOption {
                        label: label.to_string(),
                        value: id.to_string(),
                    })
                    .collect(),
            },
        ],
        stages: stages
            .iter()
            .enumerate()
            .map(|(order, (id, label))| PipelineStage {
                id: id.to_string(),
                label: label.to_string(),
                display_order: order as i32,
            })
            .collect(),
        pipeline_id: "default".to_string(),
        pipeline_name: "Sales Pipeline".to_string(),
    }
}

fn unsupported(provider: CrmProvider) -> ApiError {
    ApiError::Provider {
        provider: provider.display_name().to_string(),
        message: "This integration is not available yet".to_string(),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upload_memo(&self, upload: AudioUpload) -> Result<SubmitReceipt, ApiError> {
        self.take_injected_failure()?;

        let id = MemoId::new(format!("memo_{}", Uuid::new_v4().simple()));
        let mut state = self.state.lock().await;
        let user_id = state.user.as_ref().map(|u| u.id.clone()).unwrap_or_default();

        let memo = Memo {
            id: id.clone(),
            user_id,
            status: MemoStatus::Uploading,
            audio_url: format!("memory://audio/{}/{}", id, upload.file_name),
            // Rough estimate for compressed speech at 16 KB/s
            audio_duration_seconds: upload.bytes.len() as f64 / 16_000.0,
            transcript: None,
            transcript_confidence: None,
            extraction: None,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
            approved_at: None,
        };
        state.memos.insert(id.clone(), memo);

        Ok(SubmitReceipt {
            status_url: format!("/memos/{}", id),
            id,
            status: MemoStatus::Uploading,
        })
    }

    async fn get_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.take_injected_failure()?;

        let auto_advance = self.auto_advance.load(Ordering::SeqCst);
        let mut state = self.state.lock().await;
        *state.fetches.entry(id.clone()).or_insert(0) += 1;

        let memo = state
            .memos
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("Memo {}", id)))?;

        let snapshot = memo.clone();
        if auto_advance {
            advance_memo(memo);
        }
        Ok(snapshot)
    }

    async fn list_memos(&self, filter: &MemoFilter) -> Result<Vec<Memo>, ApiError> {
        self.take_injected_failure()?;

        let state = self.state.lock().await;
        Ok(filter.apply(state.memos.values().cloned()))
    }

    async fn approve_memo(
        &self,
        id: &MemoId,
        edits: Option<&ExtractionUpdate>,
    ) -> Result<Memo, ApiError> {
        self.transition(id, MemoAction::Approve, edits).await
    }

    async fn reject_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.transition(id, MemoAction::Reject, None).await
    }

    async fn re_extract_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.transition(id, MemoAction::ReExtract, None).await
    }

    async fn delete_memo(&self, id: &MemoId) -> Result<(), ApiError> {
        self.take_injected_failure()?;

        self.state.lock().await.memos.remove(id);
        Ok(())
    }

    async fn list_connections(&self) -> Result<Vec<CrmConnection>, ApiError> {
        self.take_injected_failure()?;

        let state = self.state.lock().await;
        let mut connections: Vec<CrmConnection> = state.connections.values().cloned().collect();
        connections.sort_by_key(|c| c.provider);
        Ok(connections)
    }

    async fn get_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<Option<CrmConnection>, ApiError> {
        self.take_injected_failure()?;

        Ok(self.state.lock().await.connections.get(&provider).cloned())
    }

    async fn authorize_url(&self, provider: CrmProvider) -> Result<AuthorizationUrl, ApiError> {
        self.take_injected_failure()?;

        if !provider.is_supported() {
            return Err(unsupported(provider));
        }

        let oauth_state = Uuid::new_v4().simple().to_string();
        self.state
            .lock()
            .await
            .pending_oauth
            .insert(oauth_state.clone(), provider);

        Ok(AuthorizationUrl {
            authorization_url: format!(
                "https://app.hubspot.com/oauth/authorize?client_id=simulated&scope=crm.objects.deals.write&state={}",
                oauth_state
            ),
        })
    }

    async fn disconnect(&self, provider: CrmProvider) -> Result<(), ApiError> {
        self.take_injected_failure()?;

        self.state.lock().await.connections.remove(&provider);
        Ok(())
    }

    async fn test_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<ConnectionTestResult, ApiError> {
        self.take_injected_failure()?;

        let state = self.state.lock().await;
        let result = match state.connections.get(&provider) {
            Some(conn) if conn.status == ConnectionStatus::Connected => {
                let mut details = serde_json::Map::new();
                if let Some(portal) = &conn.portal_id {
                    details.insert("portalId".to_string(), portal.clone().into());
                }
                if let Some(name) = &conn.account_name {
                    details.insert("accountName".to_string(), name.clone().into());
                }
                ConnectionTestResult {
                    success: true,
                    error: None,
                    details: Some(details),
                }
            }
            Some(conn) => ConnectionTestResult {
                success: false,
                error: Some(format!("Connection is {}", conn.status)),
                details: None,
            },
            None => ConnectionTestResult {
                success: false,
                error: Some(format!("{} is not connected", provider.display_name())),
                details: None,
            },
        };

        Ok(result)
    }

    async fn deal_schema(&self, provider: CrmProvider) -> Result<DealSchema, ApiError> {
        self.take_injected_failure()?;

        if !provider.is_supported() {
            return Err(unsupported(provider));
        }

        let state = self.state.lock().await;
        match state.connections.get(&provider) {
            Some(conn) if conn.status == ConnectionStatus::Connected => Ok(hubspot_schema()),
            _ => Err(ApiError::Provider {
                provider: provider.display_name().to_string(),
                message: "Connect your account before loading the deal schema".to_string(),
            }),
        }
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.take_injected_failure()?;

        self.state
            .lock()
            .await
            .user
            .clone()
            .ok_or_else(|| ApiError::NotFound("Current user".to_string()))
    }

    async fn update_user(&self, update: &UserSettingsUpdate) -> Result<User, ApiError> {
        self.take_injected_failure()?;

        let mut state = self.state.lock().await;
        let user = state
            .user
            .as_mut()
            .ok_or_else(|| ApiError::NotFound("Current user".to_string()))?;

        if let Some(allow) = update.allow_create_records {
            user.allow_create_records = allow;
        }
        Ok(user.clone())
    }
}
