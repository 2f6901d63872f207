//! CRM connection commands.
//!
//! Connecting is two steps: `dealmemo crm connect hubspot` prints the
//! authorization URL, and once the browser lands back on the app,
//! `dealmemo crm callback <url>` finishes the flow. In simulated runs the
//! provider grants access immediately and both steps happen in one command.

use anyhow::Result;
use clap::Subcommand;

use super::Session;
use crate::domain::{CrmConnection, CrmProvider};
use crate::error::Notification;

/// CRM subcommands
#[derive(Subcommand, Debug)]
pub enum CrmCommands {
    /// List connections
    List,

    /// Show one provider's connection
    Show {
        provider: CrmProvider,
    },

    /// Start connecting a CRM account
    Connect {
        provider: CrmProvider,
    },

    /// Finish connecting from the URL the provider redirected to
    Callback {
        url: String,
    },

    /// Remove a connection
    Disconnect {
        provider: CrmProvider,
    },

    /// Check that a connection still works
    Test {
        provider: CrmProvider,
    },

    /// Show the deal fields and pipeline stages of a connected CRM
    Schema {
        provider: CrmProvider,
    },
}

/// Execute a CRM command
pub async fn execute(session: &Session, command: CrmCommands) -> Result<()> {
    match command {
        CrmCommands::List => execute_list(session).await,
        CrmCommands::Show { provider } => execute_show(session, provider).await,
        CrmCommands::Connect { provider } => execute_connect(session, provider).await,
        CrmCommands::Callback { url } => {
            let connection = session.client.connections.complete_oauth(&url).await?;
            print_connected(&connection);
            Ok(())
        }
        CrmCommands::Disconnect { provider } => {
            session.client.connections.disconnect(provider).await?;
            println!(
                "{}",
                Notification::info(format!("{} disconnected", provider.display_name()))
            );
            Ok(())
        }
        CrmCommands::Test { provider } => execute_test(session, provider).await,
        CrmCommands::Schema { provider } => execute_schema(session, provider).await,
    }
}

async fn execute_list(session: &Session) -> Result<()> {
    let connections = session.client.connections.list().await?;

    println!();
    println!("CRM Connections");
    println!("══════════════════════════════════════════════════════════════");
    for provider in CrmProvider::ALL {
        let line = match connections.iter().find(|c| c.provider == provider) {
            Some(connection) => format!(
                "{}{}",
                connection.status,
                connection
                    .account_name
                    .as_deref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default()
            ),
            None if provider.is_supported() => "not connected".to_string(),
            None => "coming soon".to_string(),
        };
        println!("  {:<12}{}", provider.display_name(), line);
    }

    let stale: Vec<&CrmConnection> = connections.iter().filter(|c| c.needs_refresh()).collect();
    if !stale.is_empty() {
        println!();
        for connection in stale {
            println!(
                "⚠️  {} token expires soon; it will be refreshed on next use",
                connection.provider.display_name()
            );
        }
    }

    Ok(())
}

async fn execute_show(session: &Session, provider: CrmProvider) -> Result<()> {
    match session.client.connections.get(provider).await? {
        Some(connection) => print_connection(&connection),
        None => println!("{} is not connected.", provider.display_name()),
    }
    Ok(())
}

async fn execute_connect(session: &Session, provider: CrmProvider) -> Result<()> {
    let connections = &session.client.connections;
    let url = connections.initiate_oauth(provider).await?;

    if let Some(simulator) = &session.simulator {
        println!("🔐 Simulated authorization at {}", url);
        let redirect = simulator.grant_authorization(url.as_str()).await?;
        let connection = connections.complete_oauth(&redirect).await?;
        print_connected(&connection);
        return Ok(());
    }

    println!("🔐 Open this URL to authorize {}:", provider.display_name());
    println!();
    println!("   {}", url);
    println!();
    println!("When the browser returns to dealmemo, run:");
    println!("   dealmemo crm callback '<redirect url>'");

    Ok(())
}

async fn execute_test(session: &Session, provider: CrmProvider) -> Result<()> {
    let result = session.client.connections.test(provider).await?;

    if result.success {
        println!(
            "{}",
            Notification::info(format!("{} connection is working", provider.display_name()))
        );
        if let Some(details) = &result.details {
            for (key, value) in details {
                println!("  {}: {}", key, value);
            }
        }
    } else {
        println!(
            "{}",
            Notification::warning(format!(
                "{} connection failed: {}",
                provider.display_name(),
                result.error.as_deref().unwrap_or("unknown error")
            ))
        );
    }

    Ok(())
}

async fn execute_schema(session: &Session, provider: CrmProvider) -> Result<()> {
    let schema = session.client.connections.schema(provider).await?;

    println!();
    println!("{} deal schema", provider.display_name());
    println!("══════════════════════════════════════════════════════════════");
    println!("Pipeline: {} ({})", schema.pipeline_name, schema.pipeline_id);
    println!();
    println!("Stages:");
    for stage in schema.ordered_stages() {
        println!("  {:>2}. {} [{}]", stage.display_order, stage.label, stage.id);
    }
    println!();
    println!("Properties:");
    for property in &schema.properties {
        println!("  {:<24}{:<12}{}", property.name, property.field_type, property.label);
        if !property.options.is_empty() {
            let options: Vec<&str> = property.options.iter().map(|o| o.label.as_str()).collect();
            println!("  {:<24}options: {}", "", options.join(", "));
        }
    }

    Ok(())
}

fn print_connected(connection: &CrmConnection) {
    println!(
        "{}",
        Notification::info(format!("{} connected", connection.provider.display_name()))
    );
    print_connection(connection);
}

fn print_connection(connection: &CrmConnection) {
    println!();
    println!("{}", connection.provider.display_name());
    println!("══════════════════════════════════════════════════════════════");
    println!("Status:        {}", connection.status);
    if let Some(name) = &connection.account_name {
        println!("Account:       {}", name);
    }
    if let Some(email) = &connection.account_email {
        println!("Account email: {}", email);
    }
    if let Some(portal) = &connection.portal_id {
        println!("Portal:        {}", portal);
    }
    if let Some(connected) = connection.connected_at {
        println!("Connected:     {}", connected.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(synced) = connection.last_synced_at {
        println!("Last sync:     {}", synced.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(expires) = connection.token_expires_at {
        let marker = if connection.needs_refresh() { "  (refresh due)" } else { "" };
        println!(
            "Token expires: {}{}",
            expires.format("%Y-%m-%d %H:%M UTC"),
            marker
        );
    }
}
