//! The point-in-time operator view.
//!
//! A [`Snapshot`] is built by one assembly pass and never mutated afterwards. Newer data
//! always arrives as a whole new snapshot.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::collaborators::{BlockNumber, ValidatorPubkey};
use crate::status::{BeaconStatus, DisplayStatus, ValidatorStatus};

/// Aggregated on-chain and beacon-chain state of one node operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Execution-layer block every read of this snapshot was pinned to.
    pub captured_at_block: BlockNumber,
    /// Wallet balances of the node account.
    pub account: AccountView,
    /// Operator registration, `None` when the node address is not registered.
    pub operator: Option<OperatorView>,
    /// Every validator key registered by the operator, in registry order.
    pub validators: Vec<ValidatorView>,
    /// SD collateral position.
    pub collateral: CollateralView,
    /// Socializing-pool reward cycles.
    pub reward_cycle: RewardCycleView,
}

impl Snapshot {
    /// Number of validators per display status.
    pub fn validators_by_status(&self) -> BTreeMap<DisplayStatus, usize> {
        let mut counts = BTreeMap::new();
        for validator in &self.validators {
            *counts.entry(validator.status_display).or_insert(0) += 1;
        }
        counts
    }

    /// Whether the node address has a registered operator.
    pub fn is_registered(&self) -> bool {
        self.operator.is_some()
    }
}

/// Node account balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    /// Node account address.
    pub address: Address,
    /// ETH balance in wei.
    pub eth_balance: U256,
    /// SD balance in wei.
    pub token_balance: U256,
}

/// Registered operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorView {
    /// Operator id in the permissionless node registry.
    pub id: U256,
    /// Display name.
    pub name: String,
    /// Whether the operator is active.
    pub active: bool,
    /// Address that registered the operator.
    pub operator_address: Address,
    /// Address receiving operator rewards.
    pub reward_address: Address,
    /// ETH balance of the reward address in wei.
    pub reward_address_balance: U256,
    /// Whether the operator opted into the socializing pool.
    pub opted_into_socializing_pool: bool,
    /// Operator's own execution-layer reward vault.
    pub el_reward_vault: Address,
    /// Operator share of the EL reward vault balance in wei.
    pub el_rewards_owed: U256,
    /// Socializing pool of the permissionless pool.
    pub socializing_pool_address: Address,
    /// Validator keys not yet in a terminal state.
    pub non_terminal_validators: u64,
}

/// One registered validator key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorView {
    /// Validator id in the node registry.
    pub validator_id: U256,
    /// BLS public key.
    pub pubkey: ValidatorPubkey,
    /// Registry status.
    pub status_raw: ValidatorStatus,
    /// Beacon status at assembly time.
    pub beacon_status: BeaconStatus,
    /// Beacon validator index, once assigned.
    pub beacon_index: Option<u64>,
    /// Status shown to the operator, see [`DisplayStatus::derive`].
    pub status_display: DisplayStatus,
    /// Vault receiving this validator's withdrawals.
    pub withdraw_vault_address: Address,
    /// Operator share of skimmed rewards in the vault, in wei.
    pub reward_share_owed: U256,
    /// Operator share of the vault once the validator has exited, in wei.
    pub withdrawable_share_owed: U256,
    /// Whether the vault balance is above the configured rewards threshold.
    pub crossed_reward_threshold: bool,
    /// Block of the full deposit.
    pub deposit_block: u64,
    /// Block the validator was marked withdrawn.
    pub withdrawn_block: Option<u64>,
}

/// SD collateral position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollateralView {
    /// SD deposited as collateral, in wei.
    pub deposited: U256,
    /// Validators the deposited collateral can back.
    pub max_spawnable_validators: U256,
    /// SD requested for withdrawal, in wei.
    pub withdraw_requested: U256,
    /// Unix time at which the requested SD unlocks.
    pub withdraw_unlock_time: U256,
}

/// Socializing-pool reward cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardCycleView {
    /// Latest published cycle, 0 when none has been published yet.
    pub current_index: u64,
    /// Cycles in `1..=current_index` with no local proof file.
    pub missing_local_cycles: BTreeSet<u64>,
}
