//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use cardswap_core::{ExchangeConfig, IdentityKeyStore, LocalIdentity};
use cardswap_crypto::SigningKeyPair;

use crate::file_store::FileSecureStore;
use crate::loopback::{run_loopback, LoopbackPlan};

/// cardswap demo - signed identity card exchange
#[derive(Parser, Debug)]
#[command(name = "cardswap-demo")]
#[command(version, about = "cardswap demo - signed identity card exchange")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (TOML). Without it, CARDSWAP_* environment
    /// variables override the defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the local identity
    #[arg(long, global = true, env = "CARDSWAP_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the local identity, creating it on first use
    Identity,

    /// Exchange cards with simulated peers and print the ledger as JSON
    Exchange {
        /// Number of simulated peers
        #[arg(long, default_value_t = 2)]
        peers: usize,

        /// Also connect a peer that sends a forged card
        #[arg(long)]
        forged: bool,

        /// Seconds to wait for each outcome
        #[arg(long, default_value_t = 10)]
        wait_secs: u64,
    },
}

#[derive(Serialize)]
struct IdentitySummary<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    #[serde(rename = "pubKeyFingerprint")]
    fingerprint: String,
    #[serde(rename = "storeDir")]
    store_dir: String,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> anyhow::Result<()> {
        let config = self.load_config()?;
        let store_dir = self.resolve_store_dir()?;
        let (identity, keys) = bootstrap_identity(&store_dir)?;

        match self.command {
            Commands::Identity => {
                let summary = IdentitySummary {
                    user_id: identity.as_str(),
                    fingerprint: keys.fingerprint(),
                    store_dir: store_dir.display().to_string(),
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Commands::Exchange {
                peers,
                forged,
                wait_secs,
            } => {
                let plan = LoopbackPlan {
                    peers,
                    forged,
                    wait: Duration::from_secs(wait_secs),
                };
                let report = run_loopback(&config, identity, keys, &plan).await?;
                info!(
                    recorded = report.ledger.len(),
                    rejected = report.rejected,
                    unanswered = report.unanswered,
                    "loopback exchange finished"
                );
                println!("{}", serde_json::to_string_pretty(&report.ledger)?);
            }
        }
        Ok(())
    }

    pub fn load_config(&self) -> anyhow::Result<ExchangeConfig> {
        let config = match &self.config {
            Some(path) => ExchangeConfig::load_from_file(path)?,
            None => ExchangeConfig::load_from_env()?,
        };
        Ok(config)
    }

    fn resolve_store_dir(&self) -> anyhow::Result<PathBuf> {
        self.store_dir
            .clone()
            .or_else(FileSecureStore::default_root)
            .context("no data directory available; pass --store-dir")
    }

    /// Filter directive covering every cardswap crate at `log_level`.
    pub fn log_directive(&self) -> String {
        ["cardswap_demo", "cardswap_core", "cardswap_crypto", "cardswap_transport"]
            .iter()
            .map(|krate| format!("{krate}={}", self.log_level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Load or create the persistent identity. Failure here is fatal.
pub fn bootstrap_identity(
    store_dir: &std::path::Path,
) -> anyhow::Result<(LocalIdentity, SigningKeyPair)> {
    let store = Arc::new(FileSecureStore::new(store_dir));
    IdentityKeyStore::new(store)
        .load_or_create()
        .with_context(|| format!("identity bootstrap failed ({})", store_dir.display()))
}
