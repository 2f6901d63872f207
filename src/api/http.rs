//! HTTP implementation of [`Backend`] over the dashboard's REST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AudioUpload, Backend, MemoFilter, SubmitReceipt};
use crate::domain::{
    AuthorizationUrl, ConnectionTestResult, CrmConnection, CrmProvider, DealSchema,
    ExtractionUpdate, Memo, MemoAction, MemoId, MemoStatus, User, UserSettingsUpdate,
};
use crate::error::ApiError;

/// REST client for the memo backend
pub struct HttpBackend {
    /// API root, without trailing slash (e.g. `https://api.example.com/api`)
    base_url: String,
    /// Bearer token for the signed-in user
    token: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

/// Error body the backend sends with non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    /// Current memo status, included with 409 responses
    status: Option<String>,
}

/// What a request was about, used to classify error responses
#[derive(Debug, Clone)]
enum RequestContext {
    Memo {
        id: MemoId,
        action: Option<MemoAction>,
    },
    Crm(CrmProvider),
    General(&'static str),
}

impl RequestContext {
    fn error_for(&self, status: StatusCode, body: &str) -> ApiError {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let message = parsed
            .message
            .clone()
            .or_else(|| parsed.error.clone())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });

        match (status.as_u16(), self) {
            (404, RequestContext::Memo { id, .. }) => ApiError::NotFound(format!("Memo {}", id)),
            (404, RequestContext::Crm(provider)) => {
                ApiError::NotFound(format!("{} connection", provider.display_name()))
            }
            (404, RequestContext::General(what)) => ApiError::NotFound(what.to_string()),
            (409, RequestContext::Memo {
                action: Some(action),
                ..
            }) => ApiError::InvalidTransition {
                action: *action,
                from: parsed
                    .status
                    .as_deref()
                    .and_then(|s| s.parse::<MemoStatus>().ok()),
            },
            (400 | 401 | 403 | 422 | 502, RequestContext::Crm(provider)) => ApiError::Provider {
                provider: provider.display_name().to_string(),
                message,
            },
            (400 | 401 | 403 | 409 | 422, _) => ApiError::Validation(message),
            (code, _) if code >= 500 => {
                ApiError::Network(format!("Server returned {}: {}", status, message))
            }
            _ => ApiError::Decode(format!("Unexpected status {}: {}", status, message)),
        }
    }
}

impl HttpBackend {
    /// Create a client for `base_url` with an optional bearer token
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let parsed = reqwest::Url::parse(base_url)
            .map_err(|e| ApiError::Validation(format!("Invalid API URL '{}': {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Validation(format!(
                "API URL must be http(s): {}",
                base_url
            )));
        }

        if let Some(t) = &token {
            if t.trim().is_empty() {
                return Err(ApiError::Validation("API token is empty".to_string()));
            }
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    /// Create from resolved configuration
    pub fn from_config(config: &crate::config::ResolvedConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.api.base_url,
            config.api.token.clone(),
            Some(Duration::from_secs(config.api.timeout_seconds)),
        )
    }

    /// Build endpoint URL
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and turn non-2xx responses into typed errors
    async fn send(
        &self,
        request: RequestBuilder,
        context: RequestContext,
    ) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(url = %response.url(), %status, "Backend response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = context.error_for(status, &body);
        warn!(%status, error = %err, "Backend request failed");
        Err(err)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn memo_context(id: &MemoId, action: Option<MemoAction>) -> RequestContext {
        RequestContext::Memo {
            id: id.clone(),
            action,
        }
    }

    async fn memo_action(
        &self,
        id: &MemoId,
        action: MemoAction,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Memo, ApiError> {
        let mut request = self.request(Method::POST, &format!("memos/{}/{}", id, path));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = self
            .send(request, Self::memo_context(id, Some(action)))
            .await?;
        Self::json(response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload_memo(&self, upload: AudioUpload) -> Result<SubmitReceipt, ApiError> {
        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)?;
        let form = Form::new().part("audio", part);

        let response = self
            .send(
                self.request(Method::POST, "memos").multipart(form),
                RequestContext::General("Upload endpoint"),
            )
            .await?;
        Self::json(response).await
    }

    async fn get_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, &format!("memos/{}", id)),
                Self::memo_context(id, None),
            )
            .await?;
        Self::json(response).await
    }

    async fn list_memos(&self, filter: &MemoFilter) -> Result<Vec<Memo>, ApiError> {
        let request = self
            .request(Method::GET, "memos")
            .query(&filter.query_pairs());
        let response = self
            .send(request, RequestContext::General("Memo list"))
            .await?;
        Self::json(response).await
    }

    async fn approve_memo(
        &self,
        id: &MemoId,
        edits: Option<&ExtractionUpdate>,
    ) -> Result<Memo, ApiError> {
        let body = match edits {
            Some(update) if !update.is_empty() => serde_json::json!({ "extraction": update }),
            _ => serde_json::json!({}),
        };
        self.memo_action(id, MemoAction::Approve, "approve", Some(body))
            .await
    }

    async fn reject_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.memo_action(id, MemoAction::Reject, "reject", None).await
    }

    async fn re_extract_memo(&self, id: &MemoId) -> Result<Memo, ApiError> {
        self.memo_action(id, MemoAction::ReExtract, "re-extract", None)
            .await
    }

    async fn delete_memo(&self, id: &MemoId) -> Result<(), ApiError> {
        let result = self
            .send(
                self.request(Method::DELETE, &format!("memos/{}", id)),
                Self::memo_context(id, Some(MemoAction::Delete)),
            )
            .await;

        match result {
            Ok(_) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_connections(&self) -> Result<Vec<CrmConnection>, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, "crm/connections"),
                RequestContext::General("Connection list"),
            )
            .await?;
        Self::json(response).await
    }

    async fn get_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<Option<CrmConnection>, ApiError> {
        let result = self
            .send(
                self.request(Method::GET, &format!("crm/{}/connection", provider)),
                RequestContext::Crm(provider),
            )
            .await;

        match result {
            Ok(response) => Self::json(response).await,
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn authorize_url(&self, provider: CrmProvider) -> Result<AuthorizationUrl, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, &format!("crm/{}/authorize", provider)),
                RequestContext::Crm(provider),
            )
            .await?;
        Self::json(response).await
    }

    async fn disconnect(&self, provider: CrmProvider) -> Result<(), ApiError> {
        let result = self
            .send(
                self.request(Method::POST, &format!("crm/{}/disconnect", provider)),
                RequestContext::Crm(provider),
            )
            .await;

        match result {
            Ok(_) | Err(ApiError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn test_connection(
        &self,
        provider: CrmProvider,
    ) -> Result<ConnectionTestResult, ApiError> {
        let response = self
            .send(
                self.request(Method::POST, &format!("crm/{}/test", provider)),
                RequestContext::Crm(provider),
            )
            .await?;
        Self::json(response).await
    }

    async fn deal_schema(&self, provider: CrmProvider) -> Result<DealSchema, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, &format!("crm/{}/schema", provider)),
                RequestContext::Crm(provider),
            )
            .await?;
        Self::json(response).await
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        let response = self
            .send(
                self.request(Method::GET, "users/me"),
                RequestContext::General("Current user"),
            )
            .await?;
        Self::json(response).await
    }

    async fn update_user(&self, update: &UserSettingsUpdate) -> Result<User, ApiError> {
        let response = self
            .send(
                self.request(Method::PATCH, "users/me").json(update),
                RequestContext::General("Current user"),
            )
            .await?;
        Self::json(response).await
    }
}
