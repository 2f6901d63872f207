//! Canonical local paths for dealmemo.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dealmemo::config::paths;
//!
//! let ledger = paths::submissions_ledger()?;
//! ```

use std::path::PathBuf;

use anyhow::Result;

/// Get the dealmemo home directory (~/.dealmemo)
pub fn dealmemo_home() -> Result<PathBuf> {
    crate::config::dealmemo_home()
}

/// Get the submission ledger path (~/.dealmemo/submissions.jsonl)
pub fn submissions_ledger() -> Result<PathBuf> {
    Ok(dealmemo_home()?.join(SUBMISSIONS_FILE))
}

/// File name of the submission ledger inside the home directory
pub const SUBMISSIONS_FILE: &str = "submissions.jsonl";
