//! Chain checks a transaction command runs before it builds a plan.
//!
//! A plan that the contracts would revert is never built: the checks below read the
//! position at one pinned block and decide whether there is anything to submit.

use alloy::primitives::{Address, U256};

use crate::collaborators::{BlockNumber, CallError, ChainReader, OperatorRewards, SdUtilization};

/// SD collateral position of a node address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SdStatus {
    /// SD deposited as collateral.
    pub collateral: U256,
    /// Collateral that fully bonds the operator's non-terminal validators.
    pub max_collateral: U256,
    /// SD utility pool position.
    pub utilization: SdUtilization,
}

/// Whether any utilized SD can be repaid out of excess collateral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepayExcessCheck {
    /// Collateral is below the maximum, so none of it is excess.
    BelowMaxCollateral,
    /// The node address has no utilization position.
    NoUtilization,
    /// The position does not exceed the maximum collateral.
    NothingToRepay,
    /// SD to repay, in wei.
    Repay(U256),
}

impl SdStatus {
    /// Reads the position of `node` at `at`.
    pub async fn read(
        chain: &dyn ChainReader,
        node: Address,
        at: BlockNumber,
    ) -> Result<Self, CallError> {
        let operator_id = chain.operator_id(node, at).await?;
        let validator_count = if operator_id.is_zero() {
            0
        } else {
            let total_keys = chain.total_validator_keys(operator_id, at).await?;
            chain
                .total_non_terminal_validator_keys(node, total_keys, at)
                .await?
        };

        Ok(Self {
            collateral: chain.sd_collateral(node, at).await?,
            max_collateral: chain.max_sd_collateral(validator_count, at).await?,
            utilization: chain.sd_utilization(node, at).await?,
        })
    }

    /// Amount of utilized SD the excess collateral repays.
    pub fn repay_excess(&self) -> RepayExcessCheck {
        if self.collateral < self.max_collateral {
            return RepayExcessCheck::BelowMaxCollateral;
        }
        if !self.utilization.is_open() {
            return RepayExcessCheck::NoUtilization;
        }
        match self
            .utilization
            .latest_balance
            .checked_sub(self.max_collateral)
        {
            Some(excess) if !excess.is_zero() => RepayExcessCheck::Repay(excess),
            _ => RepayExcessCheck::NothingToRepay,
        }
    }
}

/// Rewards claimable by a node address and the utilization that may cap them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClaimStatus {
    /// Rewards held by the rewards collector.
    pub rewards: OperatorRewards,
    /// SD utility pool position.
    pub utilization: SdUtilization,
}

/// An open utilization position holding back part of the rewards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClaimCap {
    /// ETH the claim pays out.
    pub withdrawable: U256,
    /// SD fees to repay before the position closes.
    pub utilization_fee: U256,
}

/// Whether `claim` has anything to pay out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimCheck {
    /// Nothing credited; the claim would revert.
    NoRewards,
    /// Rewards are credited.
    Claimable {
        /// Total ETH credited.
        balance: U256,
        /// Set when a utilization position limits the payout.
        cap: Option<ClaimCap>,
    },
}

impl ClaimStatus {
    /// Reads the rewards and utilization of `node` at `at`.
    pub async fn read(
        chain: &dyn ChainReader,
        node: Address,
        at: BlockNumber,
    ) -> Result<Self, CallError> {
        Ok(Self {
            rewards: chain.operator_rewards(node, at).await?,
            utilization: chain.sd_utilization(node, at).await?,
        })
    }

    /// Decides whether a claim is worth submitting.
    pub fn check(&self) -> ClaimCheck {
        let OperatorRewards {
            balance,
            withdrawable,
        } = self.rewards;
        if balance.is_zero() {
            return ClaimCheck::NoRewards;
        }
        let cap = (withdrawable != balance && self.utilization.is_open()).then(|| ClaimCap {
            withdrawable,
            utilization_fee: self.utilization.accrued_fee(),
        });
        ClaimCheck::Claimable { balance, cap }
    }
}
