//! Snapshot assembly.
//!
//! One assembly pass pins itself to the latest block number and then performs every read
//! sequentially against that block: account balances, operator registration, collateral,
//! reward cycle index, and the per-validator reads for every registered key. Any failed
//! read aborts the pass; there is no partial snapshot.

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::{Address, U256};
use log::{debug, info};
use snafu::{ResultExt, Snafu};

use crate::collaborators::{
    BeaconReader,
    BlockNumber,
    CallError,
    ChainReader,
    ProofStore,
    ValidatorPubkey,
};
use crate::reward_cycles;
use crate::snapshot::{
    AccountView,
    CollateralView,
    OperatorView,
    RewardCycleView,
    Snapshot,
    ValidatorView,
};
use crate::status::DisplayStatus;

/// Seconds added on top of the collateral withdraw delay before requested SD is claimable.
pub const WITHDRAW_UNLOCK_GRACE_SECS: u64 = 20;

/// Upper bound on the validator list allocated up front from the on-chain key count.
const PREALLOCATED_VALIDATORS: u64 = 1024;

/// A collaborator read failed during assembly.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AssembleError {
    /// The latest block number could not be read.
    #[snafu(display("failed to read latest block number: {source}"))]
    BlockNumber {
        /// The collaborator error.
        source: CallError,
    },

    /// A pinned execution-layer read failed.
    #[snafu(display("failed to read {read} at block {block}: {source}"))]
    ChainRead {
        /// Name of the failed read.
        read: &'static str,
        /// Block the read was pinned to.
        block: BlockNumber,
        /// The collaborator error.
        source: CallError,
    },

    /// A beacon status read failed.
    #[snafu(display("failed to read beacon status of validator {pubkey}: {source}"))]
    BeaconRead {
        /// Validator whose status could not be read.
        pubkey: ValidatorPubkey,
        /// The collaborator error.
        source: CallError,
    },
}

/// Result alias for assembly.
pub type Result<T, E = AssembleError> = std::result::Result<T, E>;

/// Static inputs of an assembly pass.
#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    /// Node account whose operator is being viewed.
    pub node_address: Address,
}

/// The collaborators an assembly pass reads from.
#[derive(Clone)]
pub struct Collaborators {
    /// Execution-layer reads.
    pub chain: Arc<dyn ChainReader>,
    /// Beacon-chain reads.
    pub beacon: Arc<dyn BeaconReader>,
    /// Local reward proof storage.
    pub proofs: Arc<dyn ProofStore>,
}

/// Builds [`Snapshot`]s from the collaborator read sequence.
#[derive(Clone)]
pub struct SnapshotAssembler {
    /// Read capabilities.
    collaborators: Collaborators,
    /// Static inputs.
    config: AssemblerConfig,
}

impl SnapshotAssembler {
    /// Creates an assembler.
    pub fn new(collaborators: Collaborators, config: AssemblerConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    /// Node address this assembler views.
    pub fn node_address(&self) -> Address {
        self.config.node_address
    }

    /// Runs one full assembly pass.
    pub async fn assemble(&self) -> Result<Snapshot> {
        let started = Instant::now();
        let chain = self.collaborators.chain.as_ref();
        let node = self.config.node_address;

        let at = chain.block_number().await.context(BlockNumberSnafu)?;
        debug!("Assembling snapshot for {node} at block {at}");

        let account = AccountView {
            address: node,
            eth_balance: read(chain.eth_balance(node, at), "node ETH balance", at).await?,
            token_balance: read(chain.sd_balance(node, at), "node SD balance", at).await?,
        };

        let operator_id = read(chain.operator_id(node, at), "operator id", at).await?;
        let info = read(chain.operator_info(operator_id, at), "operator info", at).await?;

        // Unregistered addresses resolve to id 0 and an empty registry entry.
        let (operator, validators, collateral) = if operator_id.is_zero() || info.name.is_empty()
        {
            (None, Vec::new(), CollateralView::default())
        } else {
            let el_reward_vault =
                read(chain.el_reward_vault(operator_id, at), "EL reward vault", at).await?;
            let el_vault_balance = read(
                chain.eth_balance(el_reward_vault, at),
                "EL reward vault balance",
                at,
            )
            .await?;
            let el_rewards_owed = read(
                chain.operator_reward_share(el_vault_balance, at),
                "EL reward share",
                at,
            )
            .await?;
            let reward_address_balance = read(
                chain.eth_balance(info.reward_address, at),
                "reward address balance",
                at,
            )
            .await?;

            let socializing_pool_address =
                read(chain.socializing_pool(at), "socializing pool", at).await?;
            let collateral = self.collateral(node, at).await?;

            let total_keys = read(
                chain.total_validator_keys(operator_id, at),
                "total validator keys",
                at,
            )
            .await?;
            let non_terminal_validators = read(
                chain.total_non_terminal_validator_keys(node, total_keys, at),
                "non-terminal validator keys",
                at,
            )
            .await?;
            let validators = self.validators(operator_id, total_keys, at).await?;

            let operator = OperatorView {
                id: operator_id,
                name: info.name,
                active: info.active,
                operator_address: info.operator_address,
                reward_address: info.reward_address,
                reward_address_balance,
                opted_into_socializing_pool: info.opted_for_socializing_pool,
                el_reward_vault,
                el_rewards_owed,
                socializing_pool_address,
                non_terminal_validators,
            };
            (Some(operator), validators, collateral)
        };

        let current_index =
            read(chain.reward_cycle_index(at), "reward cycle index", at).await?;
        let proofs = self.collaborators.proofs.as_ref();
        let reward_cycle = RewardCycleView {
            current_index,
            missing_local_cycles: reward_cycles::scan(current_index, |cycle| proofs.exists(cycle))
                .into_iter()
                .collect(),
        };

        info!(
            "📸 Assembled snapshot at block {} with {} validator(s) in {:?}",
            at,
            validators.len(),
            started.elapsed()
        );

        Ok(Snapshot {
            captured_at_block: at,
            account,
            operator,
            validators,
            collateral,
            reward_cycle,
        })
    }

    /// Reads the SD collateral position of `node`.
    async fn collateral(&self, node: Address, at: BlockNumber) -> Result<CollateralView> {
        let chain = self.collaborators.chain.as_ref();

        let deposited = read(chain.sd_collateral(node, at), "SD collateral", at).await?;
        let max_spawnable_validators = read(
            chain.max_validators_spawnable(deposited, at),
            "max spawnable validators",
            at,
        )
        .await?;
        let request = read(chain.withdraw_request(node, at), "SD withdraw request", at).await?;
        let delay = read(chain.withdraw_delay(at), "SD withdraw delay", at).await?;

        Ok(CollateralView {
            deposited,
            max_spawnable_validators,
            withdraw_unlock_time: request
                .last_request_timestamp
                .saturating_add(delay)
                .saturating_add(U256::from(WITHDRAW_UNLOCK_GRACE_SECS)),
            withdraw_requested: request.total_requested,
        })
    }

    /// Reads every validator key of `operator_id`.
    async fn validators(
        &self,
        operator_id: U256,
        total_keys: u64,
        at: BlockNumber,
    ) -> Result<Vec<ValidatorView>> {
        let chain = self.collaborators.chain.as_ref();
        let beacon = self.collaborators.beacon.as_ref();

        if total_keys == 0 {
            return Ok(Vec::new());
        }
        let threshold = read(chain.rewards_threshold(at), "rewards threshold", at).await?;

        let mut validators = Vec::with_capacity(total_keys.min(PREALLOCATED_VALIDATORS) as usize);
        for index in 0..total_keys {
            let validator_id = read(
                chain.validator_id_by_operator(operator_id, index, at),
                "validator id",
                at,
            )
            .await?;
            let info = read(chain.validator_info(validator_id, at), "validator info", at).await?;
            let vault_balance = read(
                chain.eth_balance(info.withdraw_vault, at),
                "withdraw vault balance",
                at,
            )
            .await?;
            let reward_share_owed = read(
                chain.operator_reward_share(vault_balance, at),
                "withdraw vault reward share",
                at,
            )
            .await?;
            let withdrawable_share_owed = read(
                chain.withdraw_vault_operator_share(info.withdraw_vault, at),
                "withdraw vault withdraw share",
                at,
            )
            .await?;
            let on_beacon = beacon
                .validator_status(&info.pubkey)
                .await
                .context(BeaconReadSnafu {
                    pubkey: info.pubkey,
                })?;

            validators.push(ValidatorView {
                validator_id,
                pubkey: info.pubkey,
                status_raw: info.status,
                beacon_status: on_beacon.status,
                beacon_index: on_beacon.index,
                status_display: DisplayStatus::derive(info.status, on_beacon.status),
                withdraw_vault_address: info.withdraw_vault,
                reward_share_owed,
                withdrawable_share_owed,
                crossed_reward_threshold: vault_balance > threshold,
                deposit_block: info.deposit_block,
                withdrawn_block: (info.withdrawn_block != 0).then_some(info.withdrawn_block),
            });
        }
        Ok(validators)
    }
}

/// Awaits a pinned chain read and labels its failure.
async fn read<T>(
    call: impl std::future::Future<Output = std::result::Result<T, CallError>>,
    what: &'static str,
    block: BlockNumber,
) -> Result<T> {
    call.await.context(ChainReadSnafu { read: what, block })
}
