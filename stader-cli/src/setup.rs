//! Wiring of the chain collaborators into the core services.

use std::path::Path;
use std::sync::Arc;

use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::signers::local::PrivateKeySigner;
use hex::FromHex;
use log::{info, warn};
use snafu::ResultExt;
use stader_chain::beacon::HttpBeaconReader;
use stader_chain::proofs::{FsProofStore, HttpProofService};
use stader_chain::reader::{AlloyChainReader, ContractAddresses};
use stader_chain::wallet::{AlloyGasEstimator, AlloySubmitter, ReceiptPoller};
use stader_core::assembler::{AssemblerConfig, Collaborators, SnapshotAssembler};
use stader_core::collaborators::{ChainReader, ProofStore};
use stader_core::reward_cycles::RewardCycleScanner;
use stader_core::tx_orchestrator::{OrchestratorConfig, TxOrchestrator};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::args::{NodeArgs, TxArgs};
use crate::{
    KeyFileReadSnafu,
    KeyParseSnafu,
    NoKeyFileSnafu,
    NoNodeAddressSnafu,
    ResolveContractsSnafu,
    Result,
    SignerSnafu,
};

/// Reads a hex-encoded secp256k1 private key, with or without a `0x` prefix.
pub async fn load_signer(path: &Path) -> Result<PrivateKeySigner> {
    let mut file = File::open(path).await.context(KeyFileReadSnafu {
        path: path.display().to_string(),
    })?;
    let mut hex_string = String::new();
    file.read_to_string(&mut hex_string)
        .await
        .context(KeyFileReadSnafu {
            path: path.display().to_string(),
        })?;

    let trimmed = hex_string.trim();
    let key_bytes =
        Vec::from_hex(trimmed.strip_prefix("0x").unwrap_or(trimmed)).context(KeyParseSnafu)?;
    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(alloy::signers::local::LocalSignerError::from)
        .context(SignerSnafu)
}

/// Node account from `--node-address`, falling back to the key file's address.
pub async fn node_address(args: &NodeArgs) -> Result<Address> {
    if let Some(address) = args.node_address {
        return Ok(address);
    }
    match &args.key_file {
        Some(path) => Ok(load_signer(path).await?.address()),
        None => NoNodeAddressSnafu.fail(),
    }
}

/// Execution-layer reads shared by the read-only commands.
pub struct ChainContext<P> {
    /// RPC provider.
    pub provider: P,
    /// Resolved Stader contracts.
    pub contracts: ContractAddresses,
    /// Pinned contract reads.
    pub reader: Arc<dyn ChainReader>,
}

/// Resolves the Stader contracts over `provider`.
pub async fn connect<P>(provider: P, args: &NodeArgs) -> Result<ChainContext<P>>
where
    P: Provider + Clone + 'static,
{
    let contracts = ContractAddresses::resolve(&provider, args.stader_config_address)
        .await
        .context(ResolveContractsSnafu)?;
    let reader: Arc<dyn ChainReader> = Arc::new(AlloyChainReader::new(provider.clone(), contracts));
    Ok(ChainContext {
        provider,
        contracts,
        reader,
    })
}

/// Local reward proof files.
pub fn proof_store(args: &NodeArgs) -> Arc<FsProofStore> {
    Arc::new(FsProofStore::new(args.proof_dir.clone()))
}

/// Snapshot assembler for `node` over `chain`.
pub fn assembler<P>(chain: &ChainContext<P>, args: &NodeArgs, node: Address) -> SnapshotAssembler {
    let beacon = HttpBeaconReader::new(reqwest::Client::new(), args.beacon_url.clone());
    let proofs: Arc<dyn ProofStore> = proof_store(args);
    SnapshotAssembler::new(
        Collaborators {
            chain: chain.reader.clone(),
            beacon: Arc::new(beacon),
            proofs,
        },
        AssemblerConfig { node_address: node },
    )
}

/// Reward proof scanner for `node`.
pub fn scanner(args: &NodeArgs, proof_url: &str, node: Address) -> RewardCycleScanner {
    let service = HttpProofService::new(reqwest::Client::new(), proof_url);
    RewardCycleScanner::new(proof_store(args), Arc::new(service), node)
}

/// Signing key of a transaction command. Transactions are always sent from its account.
pub async fn wallet_signer(args: &NodeArgs, command: &'static str) -> Result<PrivateKeySigner> {
    let Some(path) = &args.key_file else {
        return NoKeyFileSnafu { command }.fail();
    };
    let signer = load_signer(path).await?;
    let from = signer.address();
    if let Some(node) = args.node_address {
        if node != from {
            warn!("⚠️ --node-address {node} differs from the key file account {from}, sending from {from}");
        }
    }
    info!("🔑 Loaded signing key for {from}");
    Ok(signer)
}

/// Orchestrator sending from `from` through the wallet provider of `chain`.
pub fn orchestrator<P>(chain: &ChainContext<P>, from: Address, tx: &TxArgs) -> TxOrchestrator
where
    P: Provider + Clone + 'static,
{
    let provider = chain.provider.clone();
    TxOrchestrator::new(
        Arc::new(AlloyGasEstimator::new(provider.clone(), from)),
        Arc::new(AlloySubmitter::new(provider.clone(), from)),
        Arc::new(ReceiptPoller::new(provider, tx.poll_interval())),
        OrchestratorConfig {
            confirmation_timeout: tx.confirmation_timeout(),
        },
    )
}
