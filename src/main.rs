//
// main.rs
// Dicom-Hanging-rs
//
// Tokio entry point: parses arguments, installs the log subscriber and hands off to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use clap::Parser;
use dicom_hanging::cli::{self, Cli};
use tracing::Level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON written to stdout stays pipeable.
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::io::stderr)
            .finish(),
    )
    .unwrap_or_else(|e| eprintln!("Could not set up global logger: {}", e));

    cli::run(cli).await
}
