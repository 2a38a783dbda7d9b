//! Command-line arguments.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::utils::parse_ether;
use alloy::primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use url::Url;

/// Stader permissionless node operator client
#[derive(Debug, Parser)]
#[command(
    name = "stader-operator",
    version,
    about = "Inspects and manages a Stader permissionless node operator"
)]
pub struct Cli {
    /// Connection and account settings shared by every command
    #[command(flatten)]
    pub node: NodeArgs,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every command.
#[derive(Debug, Args)]
pub struct NodeArgs {
    /// HTTP URL of the execution-layer node
    #[arg(long, env = "STADER_ETH_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub eth_rpc_url: Url,

    /// Base URL of the beacon node REST API
    #[arg(long, env = "STADER_BEACON_URL", default_value = "http://127.0.0.1:5052")]
    pub beacon_url: Url,

    /// Address of the StaderConfig contract; every other Stader contract is looked up there
    #[arg(long, env = "STADER_CONFIG_ADDRESS")]
    pub stader_config_address: Address,

    /// Node account to inspect. Defaults to the address of --key-file
    #[arg(long, env = "STADER_NODE_ADDRESS")]
    pub node_address: Option<Address>,

    /// File holding the hex-encoded private key of the node account
    #[arg(long, env = "STADER_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Directory holding downloaded reward merkle proofs
    #[arg(long, env = "STADER_PROOF_DIR", default_value = "rewards")]
    pub proof_dir: PathBuf,
}

/// Operator commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the operator state as JSON
    Status,

    /// Serve operator metrics for prometheus
    Exporter(ExporterArgs),

    /// Socializing-pool reward proofs
    Rewards {
        /// Rewards subcommand
        #[command(subcommand)]
        command: RewardsCommand,
    },

    /// SD collateral
    Sd {
        /// SD subcommand
        #[command(subcommand)]
        command: SdCommand,
    },

    /// Claim the operator rewards accumulated in the rewards collector
    ClaimRewards(TxArgs),
}

/// `rewards` subcommands.
#[derive(Debug, Subcommand)]
pub enum RewardsCommand {
    /// List published reward cycles that have no local proof
    Scan(RewardsArgs),

    /// Download the proofs of every cycle missing locally
    Download(RewardsArgs),
}

/// `sd` subcommands.
#[derive(Debug, Subcommand)]
pub enum SdCommand {
    /// Approve (when needed) and deposit SD as collateral
    Deposit {
        /// Amount of SD, in whole tokens (e.g. 400 or 12.5)
        #[arg(long, value_parser = parse_sd_amount)]
        amount: U256,

        /// Transaction settings
        #[command(flatten)]
        tx: TxArgs,
    },

    /// Repay utilized SD out of collateral above the maximum the validators need
    RepayExcess {
        /// Transaction settings
        #[command(flatten)]
        tx: TxArgs,
    },
}

/// Metrics exporter settings.
#[derive(Debug, Args)]
pub struct ExporterArgs {
    /// Bind address for prometheus metrics
    #[arg(long, env = "STADER_METRICS_BIND", default_value = "0.0.0.0:9102")]
    pub metrics_bind: SocketAddr,

    /// Seconds between snapshot refreshes
    #[arg(long, env = "STADER_REFRESH_INTERVAL_SECS", default_value_t = 60)]
    pub refresh_interval_secs: u64,
}

impl ExporterArgs {
    /// Interval between snapshot refreshes.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

/// Reward proof settings.
#[derive(Debug, Args)]
pub struct RewardsArgs {
    /// Proof URL with `{cycle}` and `{operator}` placeholders
    #[arg(long, env = "STADER_PROOF_URL")]
    pub proof_url: String,
}

/// Settings of a transaction command.
#[derive(Debug, Args)]
pub struct TxArgs {
    /// Nonce of the first transaction; later transactions of the command use the next ones
    #[arg(long)]
    pub nonce: Option<u64>,

    /// Submit without asking for confirmation
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Seconds to wait for each transaction to be mined
    #[arg(long, env = "STADER_CONFIRMATION_TIMEOUT_SECS", default_value_t = 300)]
    pub confirmation_timeout_secs: u64,

    /// Seconds between receipt polls
    #[arg(long, env = "STADER_POLL_INTERVAL_SECS", default_value_t = 4)]
    pub poll_interval_secs: u64,
}

impl TxArgs {
    /// Longest wait for one transaction.
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Delay between receipt polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Parses a whole-token SD amount into wei.
fn parse_sd_amount(value: &str) -> Result<U256, String> {
    let amount = parse_ether(value.trim()).map_err(|e| format!("invalid SD amount: {e}"))?;
    if amount.is_zero() {
        return Err("SD amount must be greater than zero".to_string());
    }
    Ok(amount)
}
