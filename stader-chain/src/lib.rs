//! # Stader Chain Collaborators
//!
//! Concrete implementations of the collaborator traits consumed by `stader-core`:
//!
//! - [`reader::AlloyChainReader`]: pinned execution-layer reads over an alloy provider.
//! - [`wallet`]: gas estimation, signing and receipt polling.
//! - [`beacon::HttpBeaconReader`]: beacon node REST API.
//! - [`proofs`]: reward proof download and the on-disk proof store.
//! - [`calls`]: encoders for the transactions the operator commands submit.

/// Solidity interfaces of the Stader contracts.
pub mod contracts;

/// Execution-layer reads.
pub mod reader;

/// Gas estimation, submission and confirmation.
pub mod wallet;

/// Beacon node client.
pub mod beacon;

/// Reward proof service and store.
pub mod proofs;

/// Contract call encoders.
pub mod calls;

#[cfg(test)]
mod http_stub;
