//! Local bookkeeping for audio submissions.
//!
//! The ledger remembers which recordings were already uploaded so the CLI
//! can refuse accidental duplicates before spending an upload on them.
//!
//! ```text
//! audio file → hash → ledger lookup → upload → ledger append
//!                                         ↓
//!                               submissions.jsonl
//! ```

pub mod ledger;

// Re-export key types
pub use ledger::{audio_hash, LedgerError, SubmissionLedger, SubmissionRecord};
