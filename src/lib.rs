//! dealmemo - voice memos to CRM deals
//!
//! Client for the dealmemo backend: sales reps upload recorded call notes,
//! the backend transcribes them and extracts deal fields, and the rep
//! reviews the result before it is written to their CRM.
//!
//! # Architecture
//!
//! The server is the source of truth; this crate keeps a cache of what it
//! last said:
//! - Reads go through a query cache keyed by request identity
//! - Mutations invalidate the affected queries instead of editing them
//! - Memos still processing are polled until they settle
//!
//! # Modules
//!
//! - `api`: Backend trait with HTTP and in-memory implementations
//! - `core`: Services (memos, polling, CRM connections, usage)
//! - `domain`: Data structures (Memo, CrmConnection, User)
//! - `store`: Query cache with invalidation events
//! - `ingest`: Local ledger of submitted recordings
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Upload a recording and follow it to review
//! dealmemo memo submit call.m4a --watch
//!
//! # Approve with a correction
//! dealmemo memo approve <memo-id> --set dealAmount=5000
//!
//! # Try everything offline
//! dealmemo --simulate memo submit call.m4a --watch
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod store;

// Re-export main types at crate root for convenience
pub use api::{AudioUpload, Backend, HttpBackend, MemoFilter, MemoryBackend, SubmitReceipt};
pub use self::core::{Client, ConnectionManager, MemoService, PollHandle, PollSnapshot, UsageReport};
pub use domain::{
    CrmConnection, CrmProvider, Extraction, ExtractionUpdate, Memo, MemoAction, MemoId, MemoStatus,
    User,
};
pub use error::{ApiError, Notification, NotificationLevel};
pub use store::{CacheEvent, Mutation, QueryCache, QueryKey};
