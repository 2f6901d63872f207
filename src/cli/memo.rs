//! Memo commands.
//!
//! - `dealmemo memo submit <file>` - Upload a recording
//! - `dealmemo memo watch <id>` - Follow processing until review
//! - `dealmemo memo list --local` - Recordings submitted from this machine
//! - `dealmemo memo approve <id> --set field=value` - Approve with edits

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;

use super::{parse_date, Session};
use crate::api::{AudioUpload, MemoFilter};
use crate::core::PollHandle;
use crate::domain::{Extraction, ExtractionUpdate, Memo, MemoId, MemoStatus};
use crate::error::Notification;
use crate::ingest::audio_hash;

/// Memo subcommands
#[derive(Subcommand, Debug)]
pub enum MemoCommands {
    /// Upload an audio recording
    Submit {
        /// Audio file (m4a, mp3, wav, webm, ogg)
        file: PathBuf,

        /// Follow processing until the memo is ready for review
        #[arg(short, long)]
        watch: bool,

        /// Upload even if this recording was submitted before
        #[arg(long)]
        force: bool,
    },

    /// Show one memo
    Show {
        id: String,
    },

    /// List memos
    List {
        /// Filter by status (e.g. pending_review)
        #[arg(short, long)]
        status: Option<MemoStatus>,

        /// Created on or after
        #[arg(long, value_parser = parse_date)]
        since: Option<DateTime<Utc>>,

        /// Created on or before
        #[arg(long, value_parser = parse_date)]
        until: Option<DateTime<Utc>>,

        #[arg(short, long, default_value = "20")]
        limit: u32,

        #[arg(long)]
        offset: Option<u32>,

        /// Show recordings submitted from this machine instead
        #[arg(long)]
        local: bool,
    },

    /// Poll a memo until it leaves processing
    Watch {
        id: String,
    },

    /// Approve a memo and push it to the CRM
    Approve {
        id: String,

        /// Correct an extracted field, e.g. --set dealAmount=5000
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_assignment)]
        edits: Vec<(String, String)>,
    },

    /// Reject a memo
    Reject {
        id: String,
    },

    /// Run extraction again on the existing transcript
    ReExtract {
        id: String,

        /// Follow the new extraction run
        #[arg(short, long)]
        watch: bool,
    },

    /// Delete a memo
    Delete {
        id: String,
    },
}

/// Execute a memo command
pub async fn execute(session: &Session, command: MemoCommands) -> Result<()> {
    match command {
        MemoCommands::Submit { file, watch, force } => {
            execute_submit(session, file, watch, force).await
        }
        MemoCommands::Show { id } => execute_show(session, &MemoId::new(id)).await,
        MemoCommands::List {
            status,
            since,
            until,
            limit,
            offset,
            local,
        } => {
            if local {
                return execute_list_local(session, limit as usize).await;
            }
            let filter = MemoFilter {
                status,
                start_date: since,
                end_date: until,
                limit: Some(limit),
                offset,
            };
            execute_list(session, &filter).await
        }
        MemoCommands::Watch { id } => {
            let poll = session.client.memos.watch(&MemoId::new(id));
            follow(poll).await
        }
        MemoCommands::Approve { id, edits } => {
            execute_approve(session, &MemoId::new(id), &edits).await
        }
        MemoCommands::Reject { id } => {
            let memo = session.client.memos.reject(&MemoId::new(id)).await?;
            println!("{}", Notification::info(format!("Memo {} rejected", memo.id)));
            Ok(())
        }
        MemoCommands::ReExtract { id, watch } => {
            let id = MemoId::new(id);
            let memo = session.client.memos.re_extract(&id).await?;
            println!(
                "{}",
                Notification::info(format!("Memo {} sent back to {}", memo.id, memo.status))
            );
            if watch {
                follow(session.client.memos.watch(&id)).await?;
            }
            Ok(())
        }
        MemoCommands::Delete { id } => execute_delete(session, &MemoId::new(id)).await,
    }
}

/// Split `field=value`
fn parse_assignment(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((field, v)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), v.to_string()))
        }
        _ => Err(format!("expected FIELD=VALUE, got '{}'", value)),
    }
}

/// Collect `--set` pairs into a partial extraction
fn build_update(edits: &[(String, String)]) -> Result<ExtractionUpdate> {
    let mut update = ExtractionUpdate::default();
    for (field, value) in edits {
        update.set_field(field, value)?;
    }
    Ok(update)
}

async fn execute_submit(session: &Session, file: PathBuf, watch: bool, force: bool) -> Result<()> {
    let upload = AudioUpload::from_path(&file).await?;
    let hash = audio_hash(&upload.bytes);

    if let Some(ledger) = &session.ledger {
        let previous = ledger
            .lookup(&hash)
            .await
            .context("Failed to read submission ledger")?;
        if let Some(previous) = previous {
            if !force {
                anyhow::bail!(
                    "{} was already submitted as memo {} on {} (use --force to upload again)",
                    upload.file_name,
                    previous.memo_id,
                    previous.submitted_at.format("%Y-%m-%d %H:%M")
                );
            }
            tracing::warn!(memo_id = %previous.memo_id, "Re-submitting audio");
        }
    }

    let file_name = upload.file_name.clone();
    let size = upload.bytes.len();
    let submission = session.client.memos.submit(upload).await?;
    let receipt = &submission.receipt;

    if let Some(ledger) = &session.ledger {
        ledger
            .record_submission(&hash, &receipt.id, &file_name)
            .await
            .context("Failed to record submission")?;
    }

    println!("📤 Uploaded {} ({} KB)", file_name, size / 1024);
    println!("   Memo:   {}", receipt.id);
    println!("   Status: {}", receipt.status);

    if watch {
        follow(submission.poll).await?;
    } else {
        println!();
        println!("Follow progress with: dealmemo memo watch {}", receipt.id);
    }

    Ok(())
}

async fn execute_show(session: &Session, id: &MemoId) -> Result<()> {
    let memo = session.client.memos.get(id).await?;
    print_memo(&memo);
    Ok(())
}

async fn execute_list(session: &Session, filter: &MemoFilter) -> Result<()> {
    let memos = session.client.memos.list(filter).await?;

    if memos.is_empty() {
        println!("No memos found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<15} {:<20} {}",
        "ID", "STATUS", "CREATED", "COMPANY"
    );
    println!("{}", "─".repeat(90));
    for memo in &memos {
        let company = memo
            .extraction
            .as_ref()
            .and_then(|e| e.company_name.as_deref())
            .unwrap_or("-");
        println!(
            "{:<38} {:<15} {:<20} {}",
            memo.id,
            memo.status,
            memo.created_at.format("%Y-%m-%d %H:%M"),
            company
        );
    }
    println!();
    println!("{} memo(s)", memos.len());

    Ok(())
}

async fn execute_list_local(session: &Session, limit: usize) -> Result<()> {
    let Some(ledger) = &session.ledger else {
        println!("{}", Notification::info("Simulated runs keep no submission ledger"));
        return Ok(());
    };

    let records = ledger
        .recent(limit)
        .await
        .context("Failed to read submission ledger")?;

    println!("Ledger: {}", ledger.path().display());
    println!();
    if records.is_empty() {
        println!("No recordings submitted from this machine.");
        return Ok(());
    }

    println!("{:<38} {:<20} {}", "ID", "SUBMITTED", "FILE");
    println!("{}", "─".repeat(90));
    for record in &records {
        println!(
            "{:<38} {:<20} {}",
            record.memo_id,
            record.submitted_at.format("%Y-%m-%d %H:%M"),
            record.file_name
        );
    }

    Ok(())
}

async fn execute_approve(session: &Session, id: &MemoId, edits: &[(String, String)]) -> Result<()> {
    let update = build_update(edits)?;
    let memo = session.client.memos.approve(id, Some(update)).await?;

    println!("{}", Notification::info("Memo approved and synced to CRM"));
    print_memo(&memo);
    Ok(())
}

async fn execute_delete(session: &Session, id: &MemoId) -> Result<()> {
    session.client.memos.delete(id).await?;

    if let Some(ledger) = &session.ledger {
        ledger
            .record_deletion(id)
            .await
            .context("Failed to record deletion")?;
    }

    println!("{}", Notification::info(format!("Memo {} deleted", id)));
    Ok(())
}

/// Print each status change until polling stops
async fn follow(mut poll: PollHandle) -> Result<()> {
    println!();
    println!("⏳ Watching memo {} (Ctrl+C to stop)", poll.id());

    let mut last_status = None;
    loop {
        tokio::select! {
            snapshot = poll.next() => {
                let Some(snapshot) = snapshot else { break };

                if let Some(err) = &snapshot.last_error {
                    println!("   ⚠️  {} (retrying)", err);
                }
                if let Some(status) = snapshot.status() {
                    if last_status != Some(status) {
                        println!("   → {}", status);
                        last_status = Some(status);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopped watching.");
                return Ok(());
            }
        }
    }

    let memo = poll.settled().await?;
    println!();
    print_memo(&memo);
    Ok(())
}

fn print_memo(memo: &Memo) {
    println!();
    println!("Memo {}", memo.id);
    println!("══════════════════════════════════════════════════════════════");
    println!("Status:    {}", memo.status);
    println!("Created:   {}", memo.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Duration:  {:.0}s", memo.audio_duration_seconds);
    if let Some(processed) = memo.processed_at {
        println!("Processed: {}", processed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(approved) = memo.approved_at {
        println!("Approved:  {}", approved.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = &memo.error_message {
        println!("Error:     {}", error);
    }

    if let Some(transcript) = &memo.transcript {
        println!();
        match memo.transcript_confidence {
            Some(c) => println!("Transcript ({:.0}% confidence):", c * 100.0),
            None => println!("Transcript:"),
        }
        for line in transcript.lines() {
            println!("  {}", line);
        }
    }

    if let Some(extraction) = &memo.extraction {
        println!();
        println!("Extraction:");
        print_extraction(extraction);
    }
}

fn print_extraction(extraction: &Extraction) {
    let field = |label: &str, key: &str, value: Option<String>| {
        if let Some(value) = value {
            match extraction.confidence_scores.get(key) {
                Some(c) => println!("  {:<16}{}  ({:.0}%)", label, value, c * 100.0),
                None => println!("  {:<16}{}", label, value),
            }
        }
    };

    field("Company", "companyName", extraction.company_name.clone());
    field(
        "Amount",
        "dealAmount",
        extraction.deal_amount.map(|a| {
            format!(
                "{:.2} {}",
                a,
                extraction.deal_currency.as_deref().unwrap_or("")
            )
        }),
    );
    field("Stage", "dealStage", extraction.deal_stage.clone());
    field("Close date", "closeDate", extraction.close_date.map(|d| d.to_string()));
    field("Contact", "contactName", extraction.contact_name.clone());
    field("Email", "contactEmail", extraction.contact_email.clone());
    field("Phone", "contactPhone", extraction.contact_phone.clone());
    field("Title", "contactTitle", extraction.contact_title.clone());
    field("Summary", "summary", extraction.summary.clone());

    let lists = [
        ("Pain points", &extraction.pain_points),
        ("Next steps", &extraction.next_steps),
        ("Competitors", &extraction.competitors),
        ("Objections", &extraction.objections),
        ("Decision makers", &extraction.decision_makers),
    ];
    for (label, items) in lists {
        if !items.is_empty() {
            println!("  {}:", label);
            for item in items {
                println!("    - {}", item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("dealAmount=5000").unwrap(),
            ("dealAmount".to_string(), "5000".to_string())
        );
        // Only the first '=' splits
        assert_eq!(
            parse_assignment("summary=a=b").unwrap().1,
            "a=b".to_string()
        );
        assert!(parse_assignment("dealAmount").is_err());
        assert!(parse_assignment("=5").is_err());
    }

    #[test]
    fn test_list_local_flag() {
        use clap::Parser;

        let cli = crate::cli::Cli::try_parse_from(["dealmemo", "memo", "list", "--local", "-l", "5"])
            .unwrap();
        match cli.command {
            crate::cli::Commands::Memo {
                command: MemoCommands::List { local, limit, .. },
            } => {
                assert!(local);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_update() {
        let edits = vec![
            ("dealAmount".to_string(), "5000".to_string()),
            ("next_steps".to_string(), "Send proposal; Book demo".to_string()),
        ];
        let update = build_update(&edits).unwrap();
        assert_eq!(update.deal_amount, Some(5000.0));
        assert_eq!(
            update.next_steps,
            Some(vec!["Send proposal".to_string(), "Book demo".to_string()])
        );

        let bad = vec![("dealAmount".to_string(), "lots".to_string())];
        assert!(build_update(&bad).is_err());
    }
}
