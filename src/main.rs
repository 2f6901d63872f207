//! dealmemo CLI entrypoint

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dealmemo::cli::{render_error, Cli};

#[tokio::main]
async fn main() {
    // Initialize tracing (stderr, so command output stays clean)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Parse and execute CLI
    let cli = Cli::parse();
    if let Err(err) = cli.execute().await {
        tracing::debug!(error = ?err, "Command failed");
        eprintln!("{}", render_error(&err));
        std::process::exit(1);
    }
}
