//! Domain types for the dealmemo client.
//!
//! This module contains the data model shared with the backend:
//! - Memo: a voice memo and its lifecycle status
//! - CRM: connections, deal schemas, OAuth callbacks
//! - User: account profile and CRM write preferences

pub mod crm;
pub mod memo;
pub mod user;

// Re-export commonly used types
pub use crm::{
    AuthorizationUrl, ConnectionStatus, ConnectionTestResult, CrmConnection, CrmProvider,
    DealSchema, OAuthCallback, PipelineStage, PropertyOption, SchemaProperty,
};
pub use memo::{Extraction, ExtractionUpdate, Memo, MemoAction, MemoId, MemoStatus};
pub use user::{User, UserSettingsUpdate};
