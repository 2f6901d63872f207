//! Client services.
//!
//! This module contains:
//! - MemoService: memo lifecycle operations (submit, approve, reject, re-extract, delete)
//! - MemoPoller: re-fetches processing memos until they settle
//! - ConnectionManager: CRM connections and the two-phase OAuth flow
//! - UsageReport: dashboard usage summary
//! - Client: all of the above over one backend and cache

pub mod client;
pub mod connections;
pub mod memos;
pub mod poller;
pub mod usage;

// Re-export commonly used types
pub use client::Client;
pub use connections::ConnectionManager;
pub use memos::{MemoService, Submission};
pub use poller::{next_poll_delay, MemoPoller, PollHandle, PollSnapshot, POLL_INTERVAL};
pub use usage::UsageReport;
