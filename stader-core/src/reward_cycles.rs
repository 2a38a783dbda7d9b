//! Reward-cycle proof scanning and repair.
//!
//! Reward cycles are numbered from 1. For each published cycle the operator needs a local
//! merkle proof file to claim its socializing-pool rewards. [`scan`] finds the cycles whose
//! proof is missing and [`RewardCycleScanner::repair`] downloads them one by one, stopping
//! at the first cycle that cannot be fetched or written.

use std::collections::BTreeSet;
use std::sync::Arc;

use alloy::primitives::Address;
use log::{error, info};
use snafu::{ResultExt, Snafu};

use crate::collaborators::{CallError, ChainReader, ProofService, ProofStore};

/// Errors raised while checking or repairing reward-cycle proofs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RepairError {
    /// Reading the operator id or the current cycle index failed.
    #[snafu(display("failed to read {read} from chain: {source}"))]
    ChainRead {
        /// Name of the failed read.
        read: &'static str,
        /// The collaborator error.
        source: CallError,
    },

    /// The proof service could not deliver the proof of a cycle.
    #[snafu(display("failed to fetch merkle proof for reward cycle {cycle}: {source}"))]
    ProofFetch {
        /// Cycle that failed.
        cycle: u64,
        /// The collaborator error.
        source: CallError,
    },

    /// A fetched proof could not be persisted.
    #[snafu(display("failed to store merkle proof for reward cycle {cycle}: {source}"))]
    ProofWrite {
        /// Cycle that failed.
        cycle: u64,
        /// The storage error.
        source: CallError,
    },

    /// The proof service answered with a proof for another cycle.
    #[snafu(display("proof service returned a proof for cycle {got} when cycle {cycle} was requested"))]
    ProofMismatch {
        /// Requested cycle.
        cycle: u64,
        /// Cycle in the response.
        got: u64,
    },
}

/// Result alias for reward-cycle operations.
pub type Result<T, E = RepairError> = std::result::Result<T, E>;

/// Published cycles and those missing a local proof. Computed fresh on every scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewardCycleSet {
    /// Latest published cycle.
    pub current_index: u64,
    /// Cycles with no local proof, ascending.
    pub missing: BTreeSet<u64>,
}

/// Whether the node can download missing proofs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepairCheck {
    /// The node address has no operator id.
    NotRegistered,
    /// Every published cycle has a local proof.
    NoMissingCycles {
        /// Latest published cycle.
        current_index: u64,
    },
    /// Some cycles are missing.
    Missing(RewardCycleSet),
}

/// Returns every cycle in `1..=current_index` for which `has_local_proof` is false, ascending.
pub fn scan(current_index: u64, has_local_proof: impl Fn(u64) -> bool) -> Vec<u64> {
    (1..=current_index)
        .filter(|cycle| !has_local_proof(*cycle))
        .collect()
}

/// Scans local proof storage and repairs it from the proof service.
#[derive(Clone)]
pub struct RewardCycleScanner {
    /// Local proof files.
    store: Arc<dyn ProofStore>,
    /// Remote proof source.
    service: Arc<dyn ProofService>,
    /// Node address proofs are requested for.
    node_address: Address,
}

impl RewardCycleScanner {
    /// Creates a scanner for `node_address`.
    pub fn new(
        store: Arc<dyn ProofStore>,
        service: Arc<dyn ProofService>,
        node_address: Address,
    ) -> Self {
        Self {
            store,
            service,
            node_address,
        }
    }

    /// Scans the local store for cycles `1..=current_index`.
    pub fn scan(&self, current_index: u64) -> RewardCycleSet {
        RewardCycleSet {
            current_index,
            missing: scan(current_index, |cycle| self.store.exists(cycle))
                .into_iter()
                .collect(),
        }
    }

    /// Reads the operator registration and current cycle index at the latest block and
    /// reports which proofs are missing.
    pub async fn can_repair(&self, chain: &dyn ChainReader) -> Result<RepairCheck> {
        let at = chain
            .block_number()
            .await
            .context(ChainReadSnafu { read: "block number" })?;
        let operator_id = chain
            .operator_id(self.node_address, at)
            .await
            .context(ChainReadSnafu { read: "operator id" })?;
        if operator_id.is_zero() {
            return Ok(RepairCheck::NotRegistered);
        }
        let current_index = chain
            .reward_cycle_index(at)
            .await
            .context(ChainReadSnafu {
                read: "reward cycle index",
            })?;

        let set = self.scan(current_index);
        if set.missing.is_empty() {
            return Ok(RepairCheck::NoMissingCycles { current_index });
        }
        Ok(RepairCheck::Missing(set))
    }

    /// Fetches and persists the proof of every cycle in `missing`, in order.
    ///
    /// Stops at the first failure; cycles repaired before it stay persisted. Returns the
    /// number of proofs written.
    pub async fn repair(&self, missing: &[u64]) -> Result<usize> {
        let mut written = 0;
        for &cycle in missing {
            let proof = match self.service.fetch(cycle, self.node_address).await {
                Ok(proof) => proof,
                Err(source) => {
                    error!("❌ Failed to download merkle proof for cycle {cycle}: {source}");
                    return Err(RepairError::ProofFetch { cycle, source });
                }
            };
            snafu::ensure!(
                proof.cycle == cycle,
                ProofMismatchSnafu {
                    cycle,
                    got: proof.cycle
                }
            );
            self.store
                .write(&proof)
                .context(ProofWriteSnafu { cycle })?;
            info!("📥 Stored merkle proof for reward cycle {cycle}");
            written += 1;
        }
        Ok(written)
    }
}
