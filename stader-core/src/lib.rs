//! # Stader Operator Core
//!
//! Chain-agnostic core of the operator client: it aggregates on-chain and beacon-chain
//! reads into one coherent [`snapshot::Snapshot`], caches it for concurrent readers, and
//! drives multi-step transaction plans that can be resumed after any failed step.
//!
//! ## Modules
//! - [`collaborators`]: the capability traits the core consumes (chain, beacon, gas, wallet,
//!   proof storage) and the error those collaborators report.
//! - [`snapshot`] / [`status`]: the immutable point-in-time data model.
//! - [`assembler`]: issues the full read sequence for one snapshot, all-or-nothing.
//! - [`state_cache`]: single-flight refresh, wait-free reads.
//! - [`tx_orchestrator`] / [`plans`]: ordered transaction plans with nonce overrides.
//! - [`preflight`]: chain checks that decide whether a plan has anything to submit.
//! - [`reward_cycles`]: detection and repair of missing reward-cycle proofs.

/// Capability traits for every external collaborator consumed by the core.
pub mod collaborators;

/// Immutable snapshot data model shared by the status view and the metrics exporter.
pub mod snapshot;

/// On-chain, beacon and display validator statuses.
pub mod status;

/// Builds one coherent snapshot from the collaborator read sequence.
pub mod assembler;

/// Concurrency-safe holder of the most recent snapshot.
pub mod state_cache;

/// Ordered execution of approve / wait / execute transaction plans.
pub mod tx_orchestrator;

/// Constructors for the named transaction plans used by the operator commands.
pub mod plans;

/// Collateral, utilization and reward checks run before planning a transaction.
pub mod preflight;

/// Reward-cycle proof scanning and repair.
pub mod reward_cycles;

/// Wei conversion helpers.
pub mod units;

#[cfg(test)]
mod mock;
