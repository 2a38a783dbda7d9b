//! Capability-bearing collaborators consumed by the core.
//!
//! Every read or write the core performs against the execution layer, the beacon chain,
//! the operator wallet or local proof storage goes through one of the traits below. The
//! concrete implementations live outside this crate; tests use in-memory fakes.
//!
//! Each call is independent and may fail with a [`CallError`]. The core never retries a
//! failed call on its own: a failure is fatal to the assembly pass or plan step in progress.

use alloy::primitives::{Address, Bytes, FixedBytes, TxHash, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::status::{BeaconStatus, ValidatorStatus};

/// Execution-layer block number used to pin every read of one assembly pass.
pub type BlockNumber = u64;

/// BLS public key of a beacon-chain validator.
pub type ValidatorPubkey = FixedBytes<48>;

/// Boxed error carried by transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by any collaborator call.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CallError {
    /// The underlying transport (RPC, HTTP, filesystem) failed.
    #[snafu(display("transport error: {source}"))]
    Transport {
        /// The transport error.
        source: BoxError,
    },

    /// The requested object does not exist.
    #[snafu(display("not found: {what}"))]
    NotFound {
        /// Description of the missing object.
        what: String,
    },
}

impl CallError {
    /// Wraps any error as a transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        CallError::Transport { source: err.into() }
    }
}

/// Registry entry of a node operator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperatorInfo {
    /// Whether the operator is active in the permissionless pool.
    pub active: bool,
    /// Whether the operator opted into the socializing pool.
    pub opted_for_socializing_pool: bool,
    /// Display name chosen at onboarding. Empty for unregistered ids.
    pub name: String,
    /// Address that receives the operator's rewards.
    pub reward_address: Address,
    /// Address that registered the operator.
    pub operator_address: Address,
}

/// Registry entry of a single validator key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Lifecycle status tracked by the node registry contract.
    pub status: ValidatorStatus,
    /// Validator BLS public key.
    pub pubkey: ValidatorPubkey,
    /// Vault collecting this validator's withdrawals and skimmed rewards.
    pub withdraw_vault: Address,
    /// Owning operator.
    pub operator_id: U256,
    /// Block of the 31 ETH deposit, zero if not yet deposited.
    pub deposit_block: u64,
    /// Block at which the validator was marked withdrawn, zero if never.
    pub withdrawn_block: u64,
}

/// Pending SD collateral withdrawal request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WithdrawRequest {
    /// Total SD requested for withdrawal.
    pub total_requested: U256,
    /// Unix timestamp of the latest request.
    pub last_request_timestamp: U256,
}

/// SD a node address borrowed from the SD utility pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdUtilization {
    /// SD principal utilized.
    pub principal: U256,
    /// Principal plus the fees accrued up to the read block.
    pub latest_balance: U256,
}

impl SdUtilization {
    /// Whether the node address has an open utilization position.
    pub fn is_open(&self) -> bool {
        !self.latest_balance.is_zero()
    }

    /// Fees accrued on top of the principal.
    pub fn accrued_fee(&self) -> U256 {
        self.latest_balance.saturating_sub(self.principal)
    }
}

/// Operator rewards held by the operator rewards collector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorRewards {
    /// ETH credited to the operator.
    pub balance: U256,
    /// Part of `balance` the current health factor lets the operator withdraw.
    pub withdrawable: U256,
}

/// Point-in-time reads against the execution layer.
///
/// Every method except [`ChainReader::block_number`] takes the block the read is pinned to,
/// so that one assembly pass observes a single chain state.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<BlockNumber, CallError>;

    /// ETH balance of any account.
    async fn eth_balance(&self, account: Address, at: BlockNumber) -> Result<U256, CallError>;

    /// SD token balance of any account.
    async fn sd_balance(&self, account: Address, at: BlockNumber) -> Result<U256, CallError>;

    /// Operator id registered for a node address; zero when unregistered.
    async fn operator_id(&self, node: Address, at: BlockNumber) -> Result<U256, CallError>;

    /// Registry entry for an operator id.
    async fn operator_info(
        &self,
        operator_id: U256,
        at: BlockNumber,
    ) -> Result<OperatorInfo, CallError>;

    /// Execution-layer reward vault of an operator that did not opt into socializing.
    async fn el_reward_vault(&self, operator_id: U256, at: BlockNumber)
        -> Result<Address, CallError>;

    /// Operator's share of a reward amount held by one of its vaults.
    async fn operator_reward_share(&self, total: U256, at: BlockNumber)
        -> Result<U256, CallError>;

    /// Operator's share of a withdraw vault's balance once the validator has exited.
    async fn withdraw_vault_operator_share(
        &self,
        vault: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError>;

    /// SD collateral deposited by a node address.
    async fn sd_collateral(&self, node: Address, at: BlockNumber) -> Result<U256, CallError>;

    /// Number of validators the given amount of SD collateral can back.
    async fn max_validators_spawnable(
        &self,
        sd_amount: U256,
        at: BlockNumber,
    ) -> Result<U256, CallError>;

    /// Pending SD withdrawal request of a node address.
    async fn withdraw_request(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<WithdrawRequest, CallError>;

    /// Delay in seconds between an SD withdraw request and its unlock.
    async fn withdraw_delay(&self, at: BlockNumber) -> Result<U256, CallError>;

    /// Number of validator keys ever registered by an operator.
    async fn total_validator_keys(&self, operator_id: U256, at: BlockNumber)
        -> Result<u64, CallError>;

    /// Number of validator keys not yet in a terminal state.
    async fn total_non_terminal_validator_keys(
        &self,
        node: Address,
        total_keys: u64,
        at: BlockNumber,
    ) -> Result<u64, CallError>;

    /// Validator id of the operator's `index`-th key.
    async fn validator_id_by_operator(
        &self,
        operator_id: U256,
        index: u64,
        at: BlockNumber,
    ) -> Result<U256, CallError>;

    /// Registry entry of a validator id.
    async fn validator_info(
        &self,
        validator_id: U256,
        at: BlockNumber,
    ) -> Result<ValidatorInfo, CallError>;

    /// Vault balance above which a validator is expected to have exited.
    async fn rewards_threshold(&self, at: BlockNumber) -> Result<U256, CallError>;

    /// Socializing pool of the permissionless pool.
    async fn socializing_pool(&self, at: BlockNumber) -> Result<Address, CallError>;

    /// Index of the latest published socializing-pool reward cycle.
    async fn reward_cycle_index(&self, at: BlockNumber) -> Result<u64, CallError>;

    /// SD allowance the node address granted to the collateral contract.
    async fn sd_collateral_allowance(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError>;

    /// SD the node address utilized from the SD utility pool.
    async fn sd_utilization(&self, node: Address, at: BlockNumber)
        -> Result<SdUtilization, CallError>;

    /// SD collateral above which `validator_count` validators count as fully bonded.
    async fn max_sd_collateral(&self, validator_count: u64, at: BlockNumber)
        -> Result<U256, CallError>;

    /// Rewards the operator rewards collector holds for a node address.
    async fn operator_rewards(&self, node: Address, at: BlockNumber)
        -> Result<OperatorRewards, CallError>;
}

/// Validator as seen by the beacon chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeaconValidator {
    /// Beacon status, [`BeaconStatus::Unknown`] when the beacon node has no record.
    pub status: BeaconStatus,
    /// Beacon validator index once assigned.
    pub index: Option<u64>,
    /// Activation epoch once scheduled.
    pub activation_epoch: Option<u64>,
}

impl BeaconValidator {
    /// A validator the beacon node does not know about yet.
    pub fn unknown() -> Self {
        Self {
            status: BeaconStatus::Unknown,
            index: None,
            activation_epoch: None,
        }
    }
}

/// Reads against a beacon-chain node.
#[async_trait]
pub trait BeaconReader: Send + Sync {
    /// Current status of a validator.
    async fn validator_status(&self, pubkey: &ValidatorPubkey)
        -> Result<BeaconValidator, CallError>;
}

/// A state-mutating contract call, ready to be estimated and submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractCall {
    /// Short human-readable description used in logs and prompts.
    pub label: String,
    /// Target contract.
    pub to: Address,
    /// ABI-encoded calldata.
    pub input: Bytes,
    /// ETH attached to the call.
    pub value: U256,
}

/// Gas limit and fee estimate for a pending call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasEstimate {
    /// Estimated gas limit.
    pub gas_limit: u64,
    /// Max fee per gas in wei.
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas in wei.
    pub max_priority_fee_per_gas: u128,
}

/// Estimates gas for pending calls.
#[async_trait]
pub trait GasEstimator: Send + Sync {
    /// Estimates gas limit and fees for `call`.
    async fn estimate(&self, call: &ContractCall) -> Result<GasEstimate, CallError>;
}

/// Parameters a call is signed and submitted with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxParams {
    /// Gas limit of the transaction.
    pub gas_limit: u64,
    /// Max fee per gas in wei.
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas in wei.
    pub max_priority_fee_per_gas: u128,
    /// Explicit nonce, or `None` to let the wallet pick the next pending nonce.
    pub nonce: Option<u64>,
}

impl TxParams {
    /// Submission parameters that use `estimate` as is.
    pub fn from_estimate(estimate: &GasEstimate, nonce: Option<u64>) -> Self {
        Self {
            gas_limit: estimate.gas_limit,
            max_fee_per_gas: estimate.max_fee_per_gas,
            max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
            nonce,
        }
    }
}

/// Signs and broadcasts transactions from the node wallet.
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Signs `call` with `params`, broadcasts it and returns its hash.
    async fn submit(&self, call: &ContractCall, params: &TxParams) -> Result<TxHash, CallError>;
}

/// Outcome of a mined transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Transaction hash.
    pub hash: TxHash,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
    /// Whether execution succeeded.
    pub success: bool,
}

/// Waits for submitted transactions to be mined.
#[async_trait]
pub trait ConfirmationWatcher: Send + Sync {
    /// Resolves once `hash` is mined. May wait indefinitely; callers bound it with a timeout.
    async fn wait_mined(&self, hash: TxHash) -> Result<TxReceipt, CallError>;
}

/// Merkle proof of an operator's claimable rewards for one reward cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMerkleProof {
    /// Reward cycle number, starting at 1.
    pub cycle: u64,
    /// Node address the proof was generated for.
    pub operator: Address,
    /// Claimable ETH in wei.
    pub eth: U256,
    /// Claimable SD in wei.
    pub sd: U256,
    /// Sibling hashes from the leaf up to the published root.
    pub proof: Vec<B256>,
}

/// Remote service publishing per-cycle reward proofs.
#[async_trait]
pub trait ProofService: Send + Sync {
    /// Fetches the proof of `operator` for `cycle`.
    async fn fetch(&self, cycle: u64, operator: Address) -> Result<CycleMerkleProof, CallError>;
}

/// Local storage of downloaded reward proofs. Path layout is owned by the implementation.
pub trait ProofStore: Send + Sync {
    /// Whether a proof for `cycle` is materialised locally.
    fn exists(&self, cycle: u64) -> bool;

    /// Persists `proof` under its cycle number, replacing any existing file.
    fn write(&self, proof: &CycleMerkleProof) -> Result<(), CallError>;
}
