//! Command implementations.

use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use log::{info, warn};
use snafu::ResultExt;
use stader_chain::calls;
use stader_chain::reader::ContractAddresses;
use stader_core::collaborators::{BlockNumber, ChainReader};
use stader_core::plans;
use stader_core::preflight::{ClaimCheck, ClaimStatus, RepayExcessCheck, SdStatus};
use stader_core::reward_cycles::RepairCheck;
use stader_core::state_cache::StateCache;
use stader_core::tx_orchestrator::{Approval, PlanOutcome, TxOrchestrator, TxPlanState};

use crate::args::{ExporterArgs, NodeArgs, RewardsArgs, TxArgs};
use crate::prompt::StdinPrompt;
use crate::setup;
use crate::{
    ChainReadSnafu,
    ExporterSnafu,
    JsonSnafu,
    PlanSnafu,
    RepairSnafu,
    Result,
    SnapshotSnafu,
    TransactionSnafu,
};

/// Assembles one snapshot and prints it.
pub async fn status(node: &NodeArgs) -> Result<()> {
    let address = setup::node_address(node).await?;
    let provider = ProviderBuilder::new().on_http(node.eth_rpc_url.clone());
    let chain = setup::connect(provider, node).await?;

    let cache = StateCache::new(setup::assembler(&chain, node, address));
    let snapshot = cache.refresh().await.context(SnapshotSnafu)?;
    if !snapshot.is_registered() {
        warn!("⚠️ {address} is not a registered Stader operator");
    }
    let json = serde_json::to_string_pretty(snapshot.as_ref()).context(JsonSnafu)?;
    println!("{json}");
    Ok(())
}

/// Refreshes the snapshot periodically and serves it as metrics.
pub async fn exporter(node: &NodeArgs, exporter: &ExporterArgs) -> Result<()> {
    let address = setup::node_address(node).await?;
    let provider = ProviderBuilder::new().on_http(node.eth_rpc_url.clone());
    let chain = setup::connect(provider, node).await?;

    let cache = Arc::new(StateCache::new(setup::assembler(&chain, node, address)));
    info!(
        "📸 Refreshing the snapshot of {address} every {:?}",
        exporter.refresh_interval()
    );
    stader_exporter::run(cache, exporter.metrics_bind, exporter.refresh_interval())
        .await
        .context(ExporterSnafu)
}

/// Lists reward cycles without a local proof.
pub async fn rewards_scan(node: &NodeArgs, rewards: &RewardsArgs) -> Result<()> {
    let address = setup::node_address(node).await?;
    let provider = ProviderBuilder::new().on_http(node.eth_rpc_url.clone());
    let chain = setup::connect(provider, node).await?;

    let scanner = setup::scanner(node, &rewards.proof_url, address);
    match scanner
        .can_repair(chain.reader.as_ref())
        .await
        .context(RepairSnafu)?
    {
        RepairCheck::NotRegistered => warn!("⚠️ {address} is not a registered Stader operator"),
        RepairCheck::NoMissingCycles { current_index } => {
            info!("✅ All {current_index} reward cycles have a local proof")
        }
        RepairCheck::Missing(set) => {
            info!(
                "📋 {} of {} reward cycles are missing a local proof",
                set.missing.len(),
                set.current_index
            );
            for cycle in &set.missing {
                println!("{cycle}");
            }
        }
    }
    Ok(())
}

/// Downloads every missing reward proof.
pub async fn rewards_download(node: &NodeArgs, rewards: &RewardsArgs) -> Result<()> {
    let address = setup::node_address(node).await?;
    let provider = ProviderBuilder::new().on_http(node.eth_rpc_url.clone());
    let chain = setup::connect(provider, node).await?;

    let scanner = setup::scanner(node, &rewards.proof_url, address);
    let set = match scanner
        .can_repair(chain.reader.as_ref())
        .await
        .context(RepairSnafu)?
    {
        RepairCheck::NotRegistered => {
            warn!("⚠️ {address} is not a registered Stader operator");
            return Ok(());
        }
        RepairCheck::NoMissingCycles { current_index } => {
            info!("✅ All {current_index} reward cycles already have a local proof");
            return Ok(());
        }
        RepairCheck::Missing(set) => set,
    };

    let missing: Vec<u64> = set.missing.into_iter().collect();
    info!("📥 Downloading {} merkle proofs", missing.len());
    let written = scanner.repair(&missing).await.context(RepairSnafu)?;
    info!(
        "✅ Stored {written} merkle proofs in {}",
        node.proof_dir.display()
    );
    Ok(())
}

/// Printed when the rewards collector holds nothing for the operator.
pub const NO_REWARDS: &str = "No rewards to claim.";
/// Printed when collateral is below the maximum the validators need.
pub const COLLATERAL_BELOW_MAX: &str = "Not enough SD collateral to repay utilized SD";
/// Printed when there is no SD utility pool position.
pub const NO_UTILIZATION: &str = "You don't have an existing utilization position";
/// Printed when the position does not exceed the maximum collateral.
pub const NOTHING_TO_REPAY: &str =
    "Utilized SD does not exceed the maximum SD collateral, nothing to repay";

/// A transaction command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transaction {
    /// Approve if needed, then deposit SD collateral.
    DepositCollateral {
        /// SD amount in wei.
        amount: U256,
    },
    /// Repay utilized SD with the collateral above the maximum.
    RepayExcessSd,
    /// Claim operator rewards.
    ClaimRewards,
}

impl Transaction {
    /// Command name used in messages.
    pub fn command(&self) -> &'static str {
        match self {
            Transaction::DepositCollateral { .. } => "sd deposit",
            Transaction::RepayExcessSd => "sd repay-excess",
            Transaction::ClaimRewards => "claim-rewards",
        }
    }

    /// Reads what the plan of this command depends on, pinned to `at`.
    pub async fn preflight(
        &self,
        reader: &dyn ChainReader,
        from: Address,
        at: BlockNumber,
    ) -> Result<Preflight> {
        match *self {
            Transaction::DepositCollateral { amount } => {
                let allowance = reader
                    .sd_collateral_allowance(from, at)
                    .await
                    .context(ChainReadSnafu {
                        read: "SD collateral allowance",
                    })?;
                Ok(Preflight::Deposit { amount, allowance })
            }
            Transaction::RepayExcessSd => SdStatus::read(reader, from, at)
                .await
                .map(Preflight::RepayExcess)
                .context(ChainReadSnafu {
                    read: "SD collateral status",
                }),
            Transaction::ClaimRewards => ClaimStatus::read(reader, from, at)
                .await
                .map(Preflight::Claim)
                .context(ChainReadSnafu {
                    read: "operator rewards",
                }),
        }
    }
}

/// Chain state a transaction command was checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preflight {
    /// SD deposit and the allowance already granted to the collateral contract.
    Deposit {
        /// SD amount in wei.
        amount: U256,
        /// SD the collateral contract may already pull.
        allowance: U256,
    },
    /// Collateral and utilization position.
    RepayExcess(SdStatus),
    /// Credited rewards and utilization position.
    Claim(ClaimStatus),
}

/// What a transaction command will submit.
#[derive(Debug)]
pub enum Planned {
    /// Plan to run.
    Ready(TxPlanState),
    /// Nothing to submit, for the given reason.
    Skipped(&'static str),
}

impl Preflight {
    /// Builds the plan, or the reason there is nothing to submit.
    pub fn plan(&self, contracts: &ContractAddresses, nonce: Option<u64>) -> Result<Planned> {
        let plan = match *self {
            Preflight::Deposit { amount, allowance } => plans::collateral_deposit(
                calls::approve_sd_collateral(contracts, amount),
                calls::deposit_sd_collateral(contracts, amount),
                allowance,
                amount,
                nonce,
            ),
            Preflight::RepayExcess(status) => match status.repay_excess() {
                RepayExcessCheck::BelowMaxCollateral => {
                    return Ok(Planned::Skipped(COLLATERAL_BELOW_MAX))
                }
                RepayExcessCheck::NoUtilization => return Ok(Planned::Skipped(NO_UTILIZATION)),
                RepayExcessCheck::NothingToRepay => {
                    return Ok(Planned::Skipped(NOTHING_TO_REPAY))
                }
                RepayExcessCheck::Repay(amount) => {
                    info!("💸 Repaying {} SD of utilized SD", ether(amount));
                    plans::single_call(
                        "repay-excess-sd",
                        calls::repay_sd(contracts, amount),
                        nonce,
                    )
                }
            },
            Preflight::Claim(status) => match status.check() {
                ClaimCheck::NoRewards => return Ok(Planned::Skipped(NO_REWARDS)),
                ClaimCheck::Claimable { balance, cap } => {
                    if let Some(cap) = cap {
                        warn!(
                            "⚠️ An open SD utilization position holds back part of the {} ETH \
                             rewards; repay the utilized SD and its {} SD fee to claim the rest",
                            ether(balance),
                            ether(cap.utilization_fee)
                        );
                        warn!(
                            "⚠️ Based on the current health factor this claim pays up to {} ETH",
                            ether(cap.withdrawable)
                        );
                    }
                    plans::single_call("claim-rewards", calls::claim_rewards(contracts), nonce)
                }
            },
        };
        plan.map(Planned::Ready).context(PlanSnafu)
    }
}

/// `wei` in whole tokens.
fn ether(wei: U256) -> String {
    format_units(wei, "ether").unwrap_or_else(|_| wei.to_string())
}

/// `sd deposit`
pub async fn sd_deposit(node: &NodeArgs, tx: &TxArgs, amount: U256) -> Result<()> {
    transact(node, tx, Transaction::DepositCollateral { amount }).await
}

/// `sd repay-excess`
pub async fn sd_repay_excess(node: &NodeArgs, tx: &TxArgs) -> Result<()> {
    transact(node, tx, Transaction::RepayExcessSd).await
}

/// `claim-rewards`
pub async fn claim_rewards(node: &NodeArgs, tx: &TxArgs) -> Result<()> {
    transact(node, tx, Transaction::ClaimRewards).await
}

/// Checks `transaction` against the chain, then runs its plan from the key file account.
async fn transact(node: &NodeArgs, tx: &TxArgs, transaction: Transaction) -> Result<()> {
    let signer = setup::wallet_signer(node, transaction.command()).await?;
    let from = signer.address();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .on_http(node.eth_rpc_url.clone());
    let chain = setup::connect(provider, node).await?;

    let at = chain
        .reader
        .block_number()
        .await
        .context(ChainReadSnafu {
            read: "block number",
        })?;
    let preflight = transaction
        .preflight(chain.reader.as_ref(), from, at)
        .await?;
    let plan = match preflight.plan(&chain.contracts, tx.nonce)? {
        Planned::Ready(plan) => plan,
        Planned::Skipped(reason) => {
            info!("{reason}");
            return Ok(());
        }
    };
    let orchestrator = setup::orchestrator(&chain, from, tx);
    run_plan(&orchestrator, plan, tx.yes).await
}

/// Runs `plan` and reports how it ended.
async fn run_plan(orchestrator: &TxOrchestrator, mut plan: TxPlanState, yes: bool) -> Result<()> {
    let prompt = StdinPrompt;
    let approval = if yes {
        Approval::PreApproved
    } else {
        Approval::Interactive(&prompt)
    };

    match orchestrator.run(&mut plan, approval).await {
        Ok(PlanOutcome::Completed { final_tx_hash }) => {
            info!("✅ {} finished, final transaction {final_tx_hash}", plan.name());
            Ok(())
        }
        Ok(PlanOutcome::Declined { index }) => {
            info!(
                "Cancelled {} at step {index}; {} of {} steps had completed",
                plan.name(),
                index,
                plan.steps().len()
            );
            Ok(())
        }
        Err(e) => {
            if e.is_pending() {
                warn!(
                    "⏳ {} is still unconfirmed; check the transaction before running the command again",
                    plan.name()
                );
            }
            Err(e).context(TransactionSnafu)
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::sol_types::SolCall;
    use stader_chain::contracts::{ISDCollateral, ISDUtilityPool, IERC20};
    use stader_core::collaborators::{OperatorRewards, SdUtilization};
    use stader_core::tx_orchestrator::StepKind;

    use super::*;

    fn contracts() -> ContractAddresses {
        ContractAddresses {
            stader_config: Address::with_last_byte(1),
            sd_token: Address::with_last_byte(2),
            node_registry: Address::with_last_byte(3),
            sd_collateral: Address::with_last_byte(4),
            vault_factory: Address::with_last_byte(5),
            pool_utils: Address::with_last_byte(6),
            socializing_pool: Address::with_last_byte(7),
            rewards_collector: Address::with_last_byte(8),
            sd_utility_pool: Address::with_last_byte(9),
        }
    }

    fn ready(preflight: Preflight, nonce: Option<u64>) -> TxPlanState {
        match preflight.plan(&contracts(), nonce).unwrap() {
            Planned::Ready(plan) => plan,
            Planned::Skipped(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    fn skipped(preflight: Preflight) -> &'static str {
        match preflight.plan(&contracts(), None).unwrap() {
            Planned::Skipped(reason) => reason,
            Planned::Ready(plan) => panic!("unexpected plan {}", plan.name()),
        }
    }

    fn names(plan: &TxPlanState) -> Vec<&'static str> {
        plan.steps().iter().map(|step| step.kind.name()).collect()
    }

    fn sd_status(collateral: u64, max_collateral: u64, latest_balance: u64) -> Preflight {
        Preflight::RepayExcess(SdStatus {
            collateral: U256::from(collateral),
            max_collateral: U256::from(max_collateral),
            utilization: SdUtilization {
                principal: U256::from(latest_balance / 2),
                latest_balance: U256::from(latest_balance),
            },
        })
    }

    fn claim(balance: u64, withdrawable: u64) -> Preflight {
        Preflight::Claim(ClaimStatus {
            rewards: OperatorRewards {
                balance: U256::from(balance),
                withdrawable: U256::from(withdrawable),
            },
            utilization: SdUtilization::default(),
        })
    }

    #[test]
    fn deposit_approves_only_when_the_allowance_is_short() {
        let amount = U256::from(400u64);
        let short = ready(
            Preflight::Deposit {
                amount,
                allowance: U256::from(399u64),
            },
            Some(12),
        );
        assert_eq!(
            names(&short),
            ["approve", "wait_for_confirmation", "execute", "wait_for_confirmation"]
        );
        assert_eq!(short.nonce_override(), Some(12));
        match &short.steps()[0].kind {
            StepKind::Approve(call) => {
                assert_eq!(call.to, contracts().sd_token);
                assert_eq!(&call.input[..4], &IERC20::approveCall::SELECTOR[..]);
            }
            other => panic!("unexpected first step {other:?}"),
        }

        let covered = ready(
            Preflight::Deposit {
                amount,
                allowance: amount,
            },
            None,
        );
        assert_eq!(names(&covered), ["execute", "wait_for_confirmation"]);
        match &covered.steps()[0].kind {
            StepKind::Execute(call) => assert_eq!(
                &call.input[..4],
                &ISDCollateral::depositSDAsCollateralCall::SELECTOR[..]
            ),
            other => panic!("unexpected first step {other:?}"),
        }
    }

    #[test]
    fn zero_rewards_build_no_claim_plan() {
        assert_eq!(skipped(claim(0, 0)), NO_REWARDS);
    }

    #[test]
    fn credited_rewards_are_claimed() {
        let plan = ready(claim(900, 900), None);
        assert_eq!(plan.name(), "claim-rewards");
        assert_eq!(names(&plan), ["execute", "wait_for_confirmation"]);
        match &plan.steps()[0].kind {
            StepKind::Execute(call) => assert_eq!(call.to, contracts().rewards_collector),
            other => panic!("unexpected first step {other:?}"),
        }
    }

    #[test]
    fn repay_excess_submits_the_balance_above_max_collateral() {
        let plan = ready(sd_status(3_000, 2_400, 2_600), Some(3));
        assert_eq!(plan.name(), "repay-excess-sd");
        assert_eq!(plan.nonce_override(), Some(3));
        match &plan.steps()[0].kind {
            StepKind::Execute(call) => {
                assert_eq!(call.to, contracts().sd_utility_pool);
                let repay = ISDUtilityPool::repayCall::abi_decode(&call.input, true).unwrap();
                assert_eq!(repay.repayAmount, U256::from(200u64));
            }
            other => panic!("unexpected first step {other:?}"),
        }
    }

    #[test]
    fn repay_excess_stops_without_an_excess() {
        assert_eq!(skipped(sd_status(2_000, 2_400, 2_600)), COLLATERAL_BELOW_MAX);
        assert_eq!(skipped(sd_status(3_000, 2_400, 0)), NO_UTILIZATION);
        assert_eq!(skipped(sd_status(3_000, 2_400, 2_400)), NOTHING_TO_REPAY);
    }

    #[test]
    fn command_names_match_the_cli() {
        assert_eq!(Transaction::ClaimRewards.command(), "claim-rewards");
        assert_eq!(Transaction::RepayExcessSd.command(), "sd repay-excess");
        assert_eq!(
            Transaction::DepositCollateral { amount: U256::ZERO }.command(),
            "sd deposit"
        );
    }
}
