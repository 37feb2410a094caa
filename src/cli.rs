//
// cli.rs
// Dicom-Hanging-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding modules.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::{metadata, protocol, service, web};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicom-hanging")]
#[command(about = "Hanging protocol engine for DICOM studies", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hang the studies found in a directory and print the viewport assignment as JSON
    Hang {
        directory: PathBuf,
        /// Protocol JSON file or directory of protocol files
        #[arg(short, long)]
        protocols: PathBuf,
        /// Use this protocol instead of auto-selecting one
        #[arg(long)]
        protocol: Option<String>,
        /// Stage to advance to after hanging
        #[arg(long, default_value_t = 0)]
        stage: usize,
    },
    /// List the protocols found at a path after validation
    Protocols { path: PathBuf },
    /// Print the studies and display sets derived from a directory as JSON
    Inspect { directory: PathBuf },
    /// Start the web server
    Web {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
        #[arg(short, long)]
        protocols: PathBuf,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSummary {
    pub id: String,
    pub name: String,
    pub stages: usize,
    pub matching_rules: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_load_strategy: Option<String>,
}

impl From<&protocol::Protocol> for ProtocolSummary {
    fn from(protocol: &protocol::Protocol) -> Self {
        Self {
            id: protocol.id.clone(),
            name: protocol.name.clone(),
            stages: protocol.stages.len(),
            matching_rules: protocol.protocol_matching_rules.len(),
            image_load_strategy: protocol.image_load_strategy.clone(),
        }
    }
}

/// Load and validate protocols, refusing an empty set.
pub fn load_protocols(path: &Path) -> anyhow::Result<Vec<protocol::Protocol>> {
    let protocols: Vec<_> = protocol::load_protocols(path)
        .with_context(|| format!("Failed to load protocols from {:?}", path))?
        .into_iter()
        .map(protocol::validate_protocol)
        .collect();
    if protocols.is_empty() {
        bail!("No hanging protocols found in {:?}", path);
    }
    Ok(protocols)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Hang {
            directory,
            protocols,
            protocol,
            stage,
        } => {
            let protocols = load_protocols(&protocols)?;
            let data = metadata::load_directory(&directory)?;
            if data.studies.is_empty() {
                bail!("No DICOM studies found in {:?}", directory);
            }
            let report = service::hang(&protocols, data, protocol.as_deref(), stage)
                .context("Failed to hang studies")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Protocols { path } => {
            let protocols = load_protocols(&path)?;
            let summaries: Vec<ProtocolSummary> = protocols.iter().map(Into::into).collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Inspect { directory } => {
            let data = metadata::load_directory(&directory)?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Commands::Web {
            host,
            port,
            protocols,
        } => {
            let protocols = load_protocols(&protocols)?;
            web::start_server(&host, port, protocols).await?
        }
    }

    Ok(())
}
