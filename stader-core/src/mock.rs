//! In-memory collaborators for unit tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{address, Address, FixedBytes, TxHash, B256, U256};
use async_trait::async_trait;

use crate::collaborators::{
    BeaconReader,
    BeaconValidator,
    BlockNumber,
    CallError,
    ChainReader,
    ConfirmationWatcher,
    ContractCall,
    CycleMerkleProof,
    GasEstimate,
    GasEstimator,
    OperatorInfo,
    OperatorRewards,
    ProofService,
    ProofStore,
    SdUtilization,
    TxParams,
    TxReceipt,
    TxSubmitter,
    ValidatorInfo,
    ValidatorPubkey,
    WithdrawRequest,
};
use crate::status::{BeaconStatus, ValidatorStatus};
use crate::tx_orchestrator::ConfirmPrompt;

/// First block handed out by [`FakeChain`].
const FIRST_BLOCK: u64 = 100;

fn unavailable(what: &str) -> CallError {
    CallError::transport(format!("{what} unavailable"))
}

#[derive(Clone)]
struct FakeValidator {
    status: ValidatorStatus,
    vault_balance: U256,
}

struct ChainState {
    registered: bool,
    validators: Vec<FakeValidator>,
    rewards_threshold: U256,
    withdraw: WithdrawRequest,
    withdraw_delay: U256,
    reward_cycle_index: u64,
    allowance: U256,
    reported_keys: Option<u64>,
    utilization: SdUtilization,
    max_collateral_per_validator: U256,
    rewards: OperatorRewards,
    failing: Option<&'static str>,
    reads: Vec<BlockNumber>,
}

/// Execution layer whose block advances on every `block_number` call.
///
/// Account balances are derived from the block they are read at so that tests can tell
/// which block a snapshot field came from.
pub struct FakeChain {
    state: Mutex<ChainState>,
    next_block: AtomicU64,
    assemblies: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeChain {
    /// Node address of the fake operator.
    pub const NODE: Address = address!("00000000000000000000000000000000000000a1");
    /// Reward address of the fake operator.
    pub const REWARD_ADDRESS: Address = address!("00000000000000000000000000000000000000b2");
    /// EL reward vault of the fake operator.
    pub const EL_VAULT: Address = address!("00000000000000000000000000000000000000c3");
    /// Socializing pool of the permissionless pool.
    pub const SOCIALIZING_POOL: Address = address!("00000000000000000000000000000000000000d4");

    fn build(registered: bool, validators: usize) -> Self {
        Self {
            state: Mutex::new(ChainState {
                registered,
                validators: vec![
                    FakeValidator {
                        status: ValidatorStatus::Deposited,
                        vault_balance: U256::ZERO,
                    };
                    validators
                ],
                rewards_threshold: U256::from(8_000u64),
                withdraw: WithdrawRequest::default(),
                withdraw_delay: U256::ZERO,
                reward_cycle_index: 0,
                allowance: U256::ZERO,
                reported_keys: None,
                utilization: SdUtilization::default(),
                max_collateral_per_validator: U256::from(1_200u64),
                rewards: OperatorRewards::default(),
                failing: None,
                reads: Vec::new(),
            }),
            next_block: AtomicU64::new(FIRST_BLOCK),
            assemblies: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// A registered operator with `n` deposited validators.
    pub fn with_validators(n: usize) -> Self {
        Self::build(true, n)
    }

    /// A node address with no operator.
    pub fn unregistered() -> Self {
        Self::build(false, 0)
    }

    /// Node ETH balance at `block`.
    pub fn eth_at(block: BlockNumber) -> U256 {
        U256::from(block) * U256::from(1_000u64)
    }

    /// Node SD balance at `block`.
    pub fn sd_at(block: BlockNumber) -> U256 {
        U256::from(block) * U256::from(7u64)
    }

    /// Public key of the `i`-th validator.
    pub fn pubkey(i: usize) -> ValidatorPubkey {
        FixedBytes::<48>::with_last_byte(i as u8 + 1)
    }

    /// Withdraw vault of the `i`-th validator.
    pub fn vault(i: usize) -> Address {
        Address::with_last_byte(0x80 + i as u8)
    }

    /// Fails every read carrying `label` until cleared.
    pub fn fail_on(&self, label: &'static str) {
        self.state.lock().unwrap().failing = Some(label);
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().failing = None;
    }

    /// Delays every `block_number` call, and so every assembly.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_validator_status(&self, i: usize, status: ValidatorStatus) {
        self.state.lock().unwrap().validators[i].status = status;
    }

    pub fn set_vault_balance(&self, i: usize, balance: U256) {
        self.state.lock().unwrap().validators[i].vault_balance = balance;
    }

    pub fn set_rewards_threshold(&self, threshold: U256) {
        self.state.lock().unwrap().rewards_threshold = threshold;
    }

    pub fn set_withdraw_request(&self, total: U256, timestamp: U256, delay: U256) {
        let mut state = self.state.lock().unwrap();
        state.withdraw = WithdrawRequest {
            total_requested: total,
            last_request_timestamp: timestamp,
        };
        state.withdraw_delay = delay;
    }

    pub fn set_reward_cycle_index(&self, index: u64) {
        self.state.lock().unwrap().reward_cycle_index = index;
    }

    pub fn set_allowance(&self, allowance: U256) {
        self.state.lock().unwrap().allowance = allowance;
    }

    /// Reports `keys` as the operator's key count regardless of the validators held.
    pub fn report_total_keys(&self, keys: u64) {
        self.state.lock().unwrap().reported_keys = Some(keys);
    }

    pub fn set_utilization(&self, principal: U256, latest_balance: U256) {
        self.state.lock().unwrap().utilization = SdUtilization {
            principal,
            latest_balance,
        };
    }

    /// Max SD collateral per non-terminal validator. Collateral is fixed at 3000 SD.
    pub fn set_max_collateral_per_validator(&self, amount: U256) {
        self.state.lock().unwrap().max_collateral_per_validator = amount;
    }

    pub fn set_rewards(&self, balance: U256, withdrawable: U256) {
        self.state.lock().unwrap().rewards = OperatorRewards {
            balance,
            withdrawable,
        };
    }

    /// Number of `block_number` calls, one per assembly pass.
    pub fn assemblies_started(&self) -> usize {
        self.assemblies.load(Ordering::SeqCst)
    }

    /// Reads pinned to any block other than `block`.
    pub fn reads_not_pinned_to(&self, block: BlockNumber) -> usize {
        let state = self.state.lock().unwrap();
        state.reads.iter().filter(|at| **at != block).count()
    }

    /// Records a pinned read and applies the configured failure.
    fn read<T>(
        &self,
        label: &'static str,
        at: BlockNumber,
        value: impl FnOnce(&ChainState) -> Result<T, CallError>,
    ) -> Result<T, CallError> {
        let mut state = self.state.lock().unwrap();
        state.reads.push(at);
        if state.failing == Some(label) {
            return Err(unavailable(label));
        }
        value(&state)
    }

    fn validator_index(state: &ChainState, validator_id: U256) -> Result<usize, CallError> {
        let index = usize::try_from(validator_id).unwrap_or(0);
        if index == 0 || index > state.validators.len() {
            return Err(CallError::NotFound {
                what: format!("validator {validator_id}"),
            });
        }
        Ok(index - 1)
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn block_number(&self) -> Result<BlockNumber, CallError> {
        self.assemblies.fetch_add(1, Ordering::SeqCst);
        let block = self.next_block.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().unwrap().failing == Some("block number") {
            return Err(unavailable("block number"));
        }
        Ok(block)
    }

    async fn eth_balance(&self, account: Address, at: BlockNumber) -> Result<U256, CallError> {
        let label = if account == Self::NODE {
            "node ETH balance"
        } else if account == Self::EL_VAULT {
            "EL reward vault balance"
        } else if account == Self::REWARD_ADDRESS {
            "reward address balance"
        } else {
            "withdraw vault balance"
        };
        self.read(label, at, |state| {
            if account == Self::NODE {
                return Ok(Self::eth_at(at));
            }
            if account == Self::EL_VAULT {
                return Ok(U256::from(3_000u64));
            }
            if account == Self::REWARD_ADDRESS {
                return Ok(U256::from(42u64));
            }
            Ok(state
                .validators
                .iter()
                .enumerate()
                .find(|(i, _)| Self::vault(*i) == account)
                .map(|(_, v)| v.vault_balance)
                .unwrap_or_default())
        })
    }

    async fn sd_balance(&self, _account: Address, at: BlockNumber) -> Result<U256, CallError> {
        self.read("node SD balance", at, |_| Ok(Self::sd_at(at)))
    }

    async fn operator_id(&self, _node: Address, at: BlockNumber) -> Result<U256, CallError> {
        self.read("operator id", at, |state| {
            Ok(if state.registered { U256::from(1u64) } else { U256::ZERO })
        })
    }

    async fn operator_info(
        &self,
        operator_id: U256,
        at: BlockNumber,
    ) -> Result<OperatorInfo, CallError> {
        self.read("operator info", at, |state| {
            if !state.registered || operator_id != U256::from(1u64) {
                return Ok(OperatorInfo::default());
            }
            Ok(OperatorInfo {
                active: true,
                opted_for_socializing_pool: false,
                name: "fake-operator".to_string(),
                reward_address: Self::REWARD_ADDRESS,
                operator_address: Self::NODE,
            })
        })
    }

    async fn el_reward_vault(
        &self,
        _operator_id: U256,
        at: BlockNumber,
    ) -> Result<Address, CallError> {
        self.read("EL reward vault", at, |_| Ok(Self::EL_VAULT))
    }

    async fn operator_reward_share(
        &self,
        total: U256,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("operator reward share", at, |_| Ok(total / U256::from(10u64)))
    }

    async fn withdraw_vault_operator_share(
        &self,
        _vault: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("withdraw vault withdraw share", at, |_| Ok(U256::from(1u64)))
    }

    async fn sd_collateral(&self, _node: Address, at: BlockNumber) -> Result<U256, CallError> {
        self.read("SD collateral", at, |_| Ok(U256::from(3_000u64)))
    }

    async fn max_validators_spawnable(
        &self,
        sd_amount: U256,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("max spawnable validators", at, |_| {
            Ok(sd_amount / U256::from(1_000u64))
        })
    }

    async fn withdraw_request(
        &self,
        _node: Address,
        at: BlockNumber,
    ) -> Result<WithdrawRequest, CallError> {
        self.read("SD withdraw request", at, |state| Ok(state.withdraw.clone()))
    }

    async fn withdraw_delay(&self, at: BlockNumber) -> Result<U256, CallError> {
        self.read("SD withdraw delay", at, |state| Ok(state.withdraw_delay))
    }

    async fn total_validator_keys(
        &self,
        _operator_id: U256,
        at: BlockNumber,
    ) -> Result<u64, CallError> {
        self.read("total validator keys", at, |state| {
            Ok(state
                .reported_keys
                .unwrap_or(state.validators.len() as u64))
        })
    }

    async fn total_non_terminal_validator_keys(
        &self,
        _node: Address,
        _total_keys: u64,
        at: BlockNumber,
    ) -> Result<u64, CallError> {
        self.read("non-terminal validator keys", at, |state| {
            Ok(state
                .validators
                .iter()
                .filter(|v| v.status != ValidatorStatus::Withdrawn)
                .count() as u64)
        })
    }

    async fn validator_id_by_operator(
        &self,
        _operator_id: U256,
        index: u64,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("validator id", at, |_| Ok(U256::from(index + 1)))
    }

    async fn validator_info(
        &self,
        validator_id: U256,
        at: BlockNumber,
    ) -> Result<ValidatorInfo, CallError> {
        self.read("validator info", at, |state| {
            let i = Self::validator_index(state, validator_id)?;
            let status = state.validators[i].status;
            Ok(ValidatorInfo {
                status,
                pubkey: Self::pubkey(i),
                withdraw_vault: Self::vault(i),
                operator_id: U256::from(1u64),
                deposit_block: at,
                withdrawn_block: if status == ValidatorStatus::Withdrawn { at } else { 0 },
            })
        })
    }

    async fn rewards_threshold(&self, at: BlockNumber) -> Result<U256, CallError> {
        self.read("rewards threshold", at, |state| Ok(state.rewards_threshold))
    }

    async fn socializing_pool(&self, at: BlockNumber) -> Result<Address, CallError> {
        self.read("socializing pool", at, |_| Ok(Self::SOCIALIZING_POOL))
    }

    async fn reward_cycle_index(&self, at: BlockNumber) -> Result<u64, CallError> {
        self.read("reward cycle index", at, |state| Ok(state.reward_cycle_index))
    }

    async fn sd_collateral_allowance(
        &self,
        _node: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("SD allowance", at, |state| Ok(state.allowance))
    }

    async fn sd_utilization(
        &self,
        _node: Address,
        at: BlockNumber,
    ) -> Result<SdUtilization, CallError> {
        self.read("SD utilization", at, |state| Ok(state.utilization))
    }

    async fn max_sd_collateral(
        &self,
        validator_count: u64,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        self.read("max SD collateral", at, |state| {
            Ok(state.max_collateral_per_validator * U256::from(validator_count))
        })
    }

    async fn operator_rewards(
        &self,
        _node: Address,
        at: BlockNumber,
    ) -> Result<OperatorRewards, CallError> {
        self.read("operator rewards", at, |state| Ok(state.rewards))
    }
}

/// Beacon node reporting `active_ongoing` for every key unless told otherwise.
#[derive(Default)]
pub struct FakeBeacon {
    statuses: Mutex<HashMap<ValidatorPubkey, BeaconStatus>>,
    failing: AtomicBool,
}

impl FakeBeacon {
    pub fn set_status(&self, pubkey: ValidatorPubkey, status: BeaconStatus) {
        self.statuses.lock().unwrap().insert(pubkey, status);
    }

    /// Fails every subsequent status read.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BeaconReader for FakeBeacon {
    async fn validator_status(
        &self,
        pubkey: &ValidatorPubkey,
    ) -> Result<BeaconValidator, CallError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("beacon node"));
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(pubkey)
            .copied()
            .unwrap_or(BeaconStatus::ActiveOngoing);
        Ok(BeaconValidator {
            status,
            index: Some(u64::from(pubkey[47])),
            activation_epoch: Some(10),
        })
    }
}

/// Proof files held in memory.
#[derive(Default)]
pub struct MemoryProofStore {
    cycles: Mutex<BTreeSet<u64>>,
    failing_writes: Mutex<BTreeSet<u64>>,
}

impl MemoryProofStore {
    pub fn with_cycles(cycles: impl IntoIterator<Item = u64>) -> Self {
        Self {
            cycles: Mutex::new(cycles.into_iter().collect()),
            failing_writes: Mutex::default(),
        }
    }

    pub fn fail_writes_for(&self, cycle: u64) {
        self.failing_writes.lock().unwrap().insert(cycle);
    }
}

impl ProofStore for MemoryProofStore {
    fn exists(&self, cycle: u64) -> bool {
        self.cycles.lock().unwrap().contains(&cycle)
    }

    fn write(&self, proof: &CycleMerkleProof) -> Result<(), CallError> {
        if self.failing_writes.lock().unwrap().contains(&proof.cycle) {
            return Err(unavailable("proof storage"));
        }
        self.cycles.lock().unwrap().insert(proof.cycle);
        Ok(())
    }
}

/// Proof service that serves every cycle except the configured ones.
#[derive(Default)]
pub struct FakeProofService {
    failing: BTreeSet<u64>,
    mislabelled: HashMap<u64, u64>,
    fetched: Mutex<Vec<u64>>,
}

impl FakeProofService {
    pub fn failing_on(cycles: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing: cycles.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Answers a request for `cycle` with the proof of `served`.
    pub fn mislabelling(cycle: u64, served: u64) -> Self {
        Self {
            mislabelled: HashMap::from([(cycle, served)]),
            ..Self::default()
        }
    }

    /// Every requested cycle, in request order.
    pub fn fetched(&self) -> Vec<u64> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofService for FakeProofService {
    async fn fetch(&self, cycle: u64, operator: Address) -> Result<CycleMerkleProof, CallError> {
        self.fetched.lock().unwrap().push(cycle);
        if self.failing.contains(&cycle) {
            return Err(CallError::NotFound {
                what: format!("proof for cycle {cycle}"),
            });
        }
        let cycle = self.mislabelled.get(&cycle).copied().unwrap_or(cycle);
        Ok(CycleMerkleProof {
            cycle,
            operator,
            eth: U256::from(cycle),
            sd: U256::from(cycle * 10),
            proof: vec![B256::with_last_byte(cycle as u8)],
        })
    }
}

/// Gas estimator returning a fixed estimate per call.
#[derive(Default)]
pub struct FakeGas {
    failing: Mutex<Option<String>>,
    estimates: AtomicUsize,
}

impl FakeGas {
    /// Gas limit reported for every call.
    pub const GAS_LIMIT: u64 = 60_000;

    pub fn fail_on(&self, label: &str) {
        *self.failing.lock().unwrap() = Some(label.to_string());
    }

    pub fn estimates(&self) -> usize {
        self.estimates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GasEstimator for FakeGas {
    async fn estimate(&self, call: &ContractCall) -> Result<GasEstimate, CallError> {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().as_deref() == Some(call.label.as_str()) {
            return Err(unavailable("gas estimate"));
        }
        Ok(GasEstimate {
            gas_limit: Self::GAS_LIMIT,
            max_fee_per_gas: 30_000_000_000,
            max_priority_fee_per_gas: 1_000_000_000,
        })
    }
}

/// A transaction seen by [`FakeSubmitter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submitted {
    pub label: String,
    pub params: TxParams,
    pub hash: TxHash,
}

/// Wallet that records submissions and hands out sequential hashes.
#[derive(Default)]
pub struct FakeSubmitter {
    failing: Mutex<Option<String>>,
    submitted: Mutex<Vec<Submitted>>,
}

impl FakeSubmitter {
    /// Hash of the `n`-th submission, counting from 1.
    pub fn hash(n: usize) -> TxHash {
        B256::with_last_byte(n as u8)
    }

    pub fn fail_on(&self, label: &str) {
        *self.failing.lock().unwrap() = Some(label.to_string());
    }

    pub fn clear_failure(&self) {
        *self.failing.lock().unwrap() = None;
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submitted.lock().unwrap().clone()
    }

    /// Labels of the submitted calls, in order.
    pub fn labels(&self) -> Vec<String> {
        self.submitted().into_iter().map(|s| s.label).collect()
    }

    /// Nonces the calls were submitted with, in order.
    pub fn nonces(&self) -> Vec<Option<u64>> {
        self.submitted().into_iter().map(|s| s.params.nonce).collect()
    }
}

#[async_trait]
impl TxSubmitter for FakeSubmitter {
    async fn submit(&self, call: &ContractCall, params: &TxParams) -> Result<TxHash, CallError> {
        if self.failing.lock().unwrap().as_deref() == Some(call.label.as_str()) {
            return Err(unavailable("wallet"));
        }
        let mut submitted = self.submitted.lock().unwrap();
        let hash = Self::hash(submitted.len() + 1);
        submitted.push(Submitted {
            label: call.label.clone(),
            params: *params,
            hash,
        });
        Ok(hash)
    }
}

/// How [`FakeWatcher`] resolves confirmations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WatchMode {
    /// Mined successfully right away.
    #[default]
    Mined,
    /// Mined but reverted.
    Reverted,
    /// Never mined.
    Pending,
    /// The node errors.
    Failing,
}

/// Confirmation watcher with a switchable outcome.
#[derive(Default)]
pub struct FakeWatcher {
    mode: Mutex<WatchMode>,
    waited: Mutex<Vec<TxHash>>,
}

impl FakeWatcher {
    pub fn set_mode(&self, mode: WatchMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Hashes waited on, in order.
    pub fn waited(&self) -> Vec<TxHash> {
        self.waited.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfirmationWatcher for FakeWatcher {
    async fn wait_mined(&self, hash: TxHash) -> Result<TxReceipt, CallError> {
        self.waited.lock().unwrap().push(hash);
        let mode = *self.mode.lock().unwrap();
        match mode {
            WatchMode::Mined | WatchMode::Reverted => Ok(TxReceipt {
                hash,
                block_number: Some(FIRST_BLOCK),
                success: mode == WatchMode::Mined,
            }),
            WatchMode::Pending => std::future::pending().await,
            WatchMode::Failing => Err(unavailable("receipt")),
        }
    }
}

/// Prompt with a canned answer.
pub struct FakePrompt {
    answer: bool,
    asked: AtomicUsize,
}

impl FakePrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmPrompt for FakePrompt {
    async fn confirm(&self, _plan: &str, _index: usize, _call: &ContractCall, _gas: &GasEstimate) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}
