//! Command-line interface for dealmemo.
//!
//! Provides commands for submitting and reviewing memos, managing CRM
//! connections, and inspecting the account and configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::api::{MemoFilter, MemoryBackend};
use crate::core::{Client, UsageReport};
use crate::error::{ApiError, Notification};
use crate::ingest::SubmissionLedger;

pub mod crm;
pub mod memo;

/// dealmemo - voice memos to CRM deals
#[derive(Parser, Debug)]
#[command(name = "dealmemo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run against an in-process simulated backend
    #[arg(long, global = true, env = "DEALMEMO_SIMULATE")]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit, review and manage memos
    Memo {
        #[command(subcommand)]
        command: memo::MemoCommands,
    },

    /// Manage CRM connections
    Crm {
        #[command(subcommand)]
        command: crm::CrmCommands,
    },

    /// Show the signed-in user, optionally changing CRM write settings
    Me {
        /// Allow approvals to create new contacts and companies
        #[arg(long)]
        allow_create_records: Option<bool>,
    },

    /// Summarize memo activity
    Usage {
        /// Only count memos created on or after this date
        #[arg(long, value_parser = parse_date)]
        since: Option<DateTime<Utc>>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Everything a command needs: the client and, for real runs, the ledger
pub struct Session {
    pub client: Client,

    /// Plays the remote pipeline and the OAuth provider in simulated runs
    pub simulator: Option<Arc<MemoryBackend>>,

    /// Submission ledger; simulated runs leave it untouched
    pub ledger: Option<SubmissionLedger>,
}

impl Session {
    pub async fn open(simulate: bool) -> Result<Self> {
        let cfg = crate::config::config()?;

        if simulate {
            let backend = Arc::new(MemoryBackend::simulated());
            let mut client = Client::new(backend.clone());
            client.memos = client
                .memos
                .with_poll_interval(Duration::from_millis(cfg.polling.interval_ms));

            return Ok(Self {
                client,
                simulator: Some(backend),
                ledger: None,
            });
        }

        let client = Client::from_config(cfg).context("Failed to set up the API client")?;
        let ledger = SubmissionLedger::open_default().await?;

        Ok(Self {
            client,
            simulator: None,
            ledger: Some(ledger),
        })
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        if let Commands::Config = self.command {
            return show_config();
        }

        let session = Session::open(self.simulate).await?;
        tracing::debug!(backend = session.client.backend_name(), "Session opened");

        match self.command {
            Commands::Memo { command } => memo::execute(&session, command).await,
            Commands::Crm { command } => crm::execute(&session, command).await,
            Commands::Me {
                allow_create_records,
            } => show_me(&session, allow_create_records).await,
            Commands::Usage { since } => show_usage(&session, since).await,
            Commands::Config => show_config(),
        }
    }
}

/// Render a command failure for the terminal.
///
/// Client errors become the same notification the dashboard would show;
/// anything else (config, IO) is printed with its context chain.
pub fn render_error(err: &anyhow::Error) -> Notification {
    match err.downcast_ref::<ApiError>() {
        Some(api_error) => api_error.to_notification(),
        None => Notification::error(format!("{:#}", err)),
    }
}

/// Accept `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp
pub fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("expected YYYY-MM-DD or RFC 3339, got '{}'", value))
}

async fn show_me(session: &Session, allow_create_records: Option<bool>) -> Result<()> {
    let client = &session.client;

    let user = match allow_create_records {
        Some(allow) => {
            let user = client.set_allow_create_records(allow).await?;
            println!("{}", Notification::info("Settings saved"));
            user
        }
        None => client.current_user().await?,
    };

    println!();
    println!("{}", user.label());
    println!("══════════════════════════════════════════════════════════════");
    println!("Email:    {}", user.email);
    if let Some(company) = &user.company {
        println!("Company:  {}", company);
    }
    if let Some(phone) = &user.phone {
        println!("Phone:    {}", phone);
    }
    println!();
    println!(
        "CRM writes: {}",
        if user.allow_create_records {
            "update deals and create new contacts/companies"
        } else {
            "update existing records only"
        }
    );

    Ok(())
}

async fn show_usage(session: &Session, since: Option<DateTime<Utc>>) -> Result<()> {
    let filter = MemoFilter {
        start_date: since,
        ..Default::default()
    };
    let memos = session.client.memos.list(&filter).await?;
    let report = UsageReport::from_memos(&memos);

    println!();
    match since {
        Some(since) => println!("Usage since {}", since.format("%Y-%m-%d")),
        None => println!("Usage"),
    }
    println!("══════════════════════════════════════════════════════════════");
    println!("Memos:            {}", report.total);
    println!("  Processing:     {}", report.processing);
    println!("  Awaiting review:{:>2}", report.awaiting_review);
    for (status, count) in &report.by_status {
        println!("  {:<16}{}", format!("{}:", status), count);
    }
    println!();
    println!("Audio:            {:.1} min", report.audio_minutes);
    match report.approval_rate {
        Some(rate) => println!("Approval rate:    {:.0}%", rate * 100.0),
        None => println!("Approval rate:    (no reviewed memos)"),
    }
    if let Some(confidence) = report.average_transcript_confidence {
        println!("Avg. transcript confidence: {:.0}%", confidence * 100.0);
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = crate::config::config()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  dealmemo Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!(
        "  Ledger:   {}",
        cfg.home.join(crate::config::paths::SUBMISSIONS_FILE).display()
    );
    println!();
    println!("API:");
    println!("  Base URL: {}", cfg.api.base_url);
    println!("  Timeout:  {}s", cfg.api.timeout_seconds);
    println!(
        "  Token:    {}",
        if cfg.api.token.is_some() {
            "set (DEALMEMO_TOKEN)"
        } else {
            "not set"
        }
    );
    println!();
    println!("Polling:");
    println!("  Interval: {}ms", cfg.polling.interval_ms);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_forms() {
        let day = parse_date("2024-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let ts = parse_date("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:30:00+00:00");

        assert!(parse_date("last tuesday").is_err());
    }

    #[test]
    fn test_api_errors_render_as_notifications() {
        let err: anyhow::Error = ApiError::Network("timeout".to_string()).into();
        let rendered = render_error(&err);
        assert_eq!(rendered, ApiError::Network("timeout".to_string()).to_notification());

        let err = anyhow::anyhow!("disk full").context("Failed to write ledger");
        let rendered = render_error(&err);
        assert!(rendered.message.contains("Failed to write ledger"));
        assert!(rendered.message.contains("disk full"));
    }

    #[test]
    fn test_cli_parses_global_simulate() {
        let cli = Cli::try_parse_from(["dealmemo", "memo", "list", "--simulate"]).unwrap();
        assert!(cli.simulate);
        assert!(matches!(cli.command, Commands::Memo { .. }));

        let cli = Cli::try_parse_from(["dealmemo", "me", "--allow-create-records", "true"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Me {
                allow_create_records: Some(true)
            }
        ));
    }
}
