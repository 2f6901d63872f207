//! CRM connections, deal schemas, and the OAuth callback.

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Tokens expiring within this window are due for refresh
pub const REFRESH_WINDOW_MINUTES: i64 = 5;

/// External CRM products a user can connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmProvider {
    Hubspot,
    Salesforce,
    Pipedrive,
}

impl CrmProvider {
    pub const ALL: [CrmProvider; 3] = [
        CrmProvider::Hubspot,
        CrmProvider::Salesforce,
        CrmProvider::Pipedrive,
    ];

    /// Only HubSpot has a backend integration today
    pub fn is_supported(self) -> bool {
        self == CrmProvider::Hubspot
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CrmProvider::Hubspot => "hubspot",
            CrmProvider::Salesforce => "salesforce",
            CrmProvider::Pipedrive => "pipedrive",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CrmProvider::Hubspot => "HubSpot",
            CrmProvider::Salesforce => "Salesforce",
            CrmProvider::Pipedrive => "Pipedrive",
        }
    }
}

impl std::fmt::Display for CrmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrmProvider {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hubspot" => Ok(CrmProvider::Hubspot),
            "salesforce" => Ok(CrmProvider::Salesforce),
            "pipedrive" => Ok(CrmProvider::Pipedrive),
            _ => Err(ApiError::Validation(format!("Unknown CRM provider: {}", s))),
        }
    }
}

/// Health of a stored connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Expired,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Expired => write!(f, "expired"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// A user's token relationship with one CRM provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConnection {
    pub id: String,
    pub user_id: String,
    pub provider: CrmProvider,
    pub status: ConnectionStatus,

    /// HubSpot portal (account) id
    pub portal_id: Option<String>,
    pub account_email: Option<String>,
    pub account_name: Option<String>,

    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CrmConnection {
    /// True when the token expires in less than five minutes from `now`.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            Some(expires_at) => expires_at - now < Duration::minutes(REFRESH_WINDOW_MINUTES),
            None => false,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }
}

/// First phase of the OAuth flow: where to send the user's browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationUrl {
    pub authorization_url: String,
}

/// Second phase of the OAuth flow, read from the redirect back to the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthCallback {
    /// `?connected=<provider>`
    Connected(CrmProvider),

    /// `?error=<code>&error_description=<text>`
    Denied {
        code: String,
        description: Option<String>,
    },
}

impl OAuthCallback {
    /// Parse the URL the provider redirected back to.
    pub fn from_url(callback_url: &str) -> Result<Self, ApiError> {
        let url = Url::parse(callback_url).map_err(|e| {
            ApiError::Validation(format!("Invalid callback URL '{}': {}", callback_url, e))
        })?;

        let mut connected = None;
        let mut error = None;
        let mut description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "connected" => connected = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(code) = error {
            return Ok(OAuthCallback::Denied { code, description });
        }

        match connected {
            Some(provider) => Ok(OAuthCallback::Connected(provider.parse()?)),
            None => Err(ApiError::Validation(
                "Callback URL carries neither 'connected' nor 'error'".to_string(),
            )),
        }
    }
}

/// Result of probing an existing connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub error: Option<String>,
    /// Provider account details, shape varies per provider
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Field set and pipeline stages of the connected CRM's deal object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealSchema {
    #[serde(default)]
    pub properties: Vec<SchemaProperty>,
    #[serde(default)]
    pub stages: Vec<PipelineStage>,
    pub pipeline_id: String,
    pub pipeline_name: String,
}

impl DealSchema {
    /// Stages in pipeline order
    pub fn ordered_stages(&self) -> Vec<&PipelineStage> {
        let mut stages: Vec<&PipelineStage> = self.stages.iter().collect();
        stages.sort_by_key(|s| s.display_order);
        stages
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProperty {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub options: Vec<PropertyOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub display_order: i32,
}
