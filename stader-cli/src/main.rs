//! Command-line client for Stader permissionless node operators.
//!
//! ## Usage
//! ```sh
//! stader-operator --stader-config-address 0x... --node-address 0x... status
//! stader-operator --stader-config-address 0x... exporter --metrics-bind 0.0.0.0:9102
//! stader-operator --stader-config-address 0x... --key-file .eth sd deposit --amount 400
//! ```
//!
//! Every option can also be given through the `STADER_*` environment variable shown in
//! `--help`.
use clap::Parser;
use log::info;
use snafu::Snafu;
use stader_core::collaborators::CallError;
use stader_core::reward_cycles::RepairError;
use stader_core::state_cache::CacheError;
use stader_core::tx_orchestrator::{OrchestratorError, PlanError};

mod args;
mod commands;
mod prompt;
mod setup;

use args::{Cli, Commands, RewardsCommand, SdCommand};

/// Errors surfaced by the operator commands.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    /// Neither a node address nor a key file was given.
    #[snafu(display("no node address: pass --node-address or --key-file"))]
    NoNodeAddress,

    /// A transaction command was run without a key file.
    #[snafu(display("{command} submits transactions and needs --key-file"))]
    NoKeyFile {
        /// The command that needs the key.
        command: &'static str,
    },

    /// The key file could not be read.
    #[snafu(display("failed to read Ethereum key from file '{path}': {source}"))]
    KeyFileRead {
        /// Path of the key file.
        path: String,
        /// Source error
        source: std::io::Error,
    },

    /// The key file is not hex.
    #[snafu(display("failed to parse Ethereum key as hex: {source}"))]
    KeyParse {
        /// Source error
        source: hex::FromHexError,
    },

    /// The key bytes are not a valid secp256k1 secret key.
    #[snafu(display("invalid Ethereum key: {source}"))]
    Signer {
        /// Source error
        source: alloy::signers::local::LocalSignerError,
    },

    /// Contract addresses could not be read from the Stader config contract.
    #[snafu(display("failed to resolve Stader contracts: {source}"))]
    ResolveContracts {
        /// Source error
        source: CallError,
    },

    /// A one-off chain read failed.
    #[snafu(display("failed to read {read}: {source}"))]
    ChainRead {
        /// Name of the read.
        read: &'static str,
        /// Source error
        source: CallError,
    },

    /// The snapshot could not be assembled.
    #[snafu(display("failed to load operator state: {source}"))]
    Snapshot {
        /// Source error
        source: CacheError,
    },

    /// The snapshot could not be printed.
    #[snafu(display("failed to serialize operator state: {source}"))]
    Json {
        /// Source error
        source: serde_json::Error,
    },

    /// Scanning or downloading reward proofs failed.
    #[snafu(display("reward proof repair failed: {source}"))]
    Repair {
        /// Source error
        source: RepairError,
    },

    /// The transaction plan is malformed.
    #[snafu(display("invalid transaction plan: {source}"))]
    Plan {
        /// Source error
        source: PlanError,
    },

    /// Running the transaction plan failed.
    #[snafu(display("{source}"))]
    Transaction {
        /// Source error
        source: OrchestratorError,
    },

    /// The metrics exporter stopped.
    #[snafu(display("exporter failed: {source}"))]
    Exporter {
        /// Source error
        source: stader_exporter::Error,
    },
}

/// Type alias for returning results with [`CliError`]
pub type Result<T, E = CliError> = std::result::Result<T, E>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("🚀 Starting stader-operator against {}", cli.node.eth_rpc_url);

    match cli.command {
        Commands::Status => commands::status(&cli.node).await,
        Commands::Exporter(exporter) => commands::exporter(&cli.node, &exporter).await,
        Commands::Rewards { command } => match command {
            RewardsCommand::Scan(rewards) => commands::rewards_scan(&cli.node, &rewards).await,
            RewardsCommand::Download(rewards) => {
                commands::rewards_download(&cli.node, &rewards).await
            }
        },
        Commands::Sd { command } => match command {
            SdCommand::Deposit { amount, tx } => {
                commands::sd_deposit(&cli.node, &tx, amount).await
            }
            SdCommand::RepayExcess { tx } => commands::sd_repay_excess(&cli.node, &tx).await,
        },
        Commands::ClaimRewards(tx) => commands::claim_rewards(&cli.node, &tx).await,
    }
}
