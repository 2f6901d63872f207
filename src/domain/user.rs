//! The signed-in user and their CRM write preferences.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub company: Option<String>,
    pub avatar_url: Option<String>,
    pub phone: Option<String>,

    /// Approving a memo may create new contacts/companies in the CRM.
    /// When false, approval only updates existing deals.
    #[serde(default)]
    pub allow_create_records: bool,
}

impl User {
    /// Name to show in listings
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Body of `PATCH /users/me`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_create_records: Option<bool>,
}
