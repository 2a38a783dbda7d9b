//! Contract calls submitted by the operator commands.

use alloy::primitives::U256;
use alloy::sol_types::SolCall;
use stader_core::collaborators::ContractCall;

use crate::contracts::{IOperatorRewardsCollector, ISDCollateral, ISDUtilityPool, IERC20};
use crate::reader::ContractAddresses;

/// Encodes a call without ETH value.
fn contract_call(label: &str, to: alloy::primitives::Address, call: impl SolCall) -> ContractCall {
    ContractCall {
        label: label.to_string(),
        to,
        input: call.abi_encode().into(),
        value: U256::ZERO,
    }
}

/// Approves the SD collateral contract to pull `amount` SD.
pub fn approve_sd_collateral(contracts: &ContractAddresses, amount: U256) -> ContractCall {
    contract_call(
        "approve SD for collateral",
        contracts.sd_token,
        IERC20::approveCall {
            spender: contracts.sd_collateral,
            amount,
        },
    )
}

/// Deposits `amount` SD as collateral.
pub fn deposit_sd_collateral(contracts: &ContractAddresses, amount: U256) -> ContractCall {
    contract_call(
        "deposit SD collateral",
        contracts.sd_collateral,
        ISDCollateral::depositSDAsCollateralCall { sdAmount: amount },
    )
}

/// Claims the operator's accumulated rewards.
pub fn claim_rewards(contracts: &ContractAddresses) -> ContractCall {
    contract_call(
        "claim operator rewards",
        contracts.rewards_collector,
        IOperatorRewardsCollector::claimCall {},
    )
}

/// Repays `amount` of utilized SD.
pub fn repay_sd(contracts: &ContractAddresses, amount: U256) -> ContractCall {
    contract_call(
        "repay utilized SD",
        contracts.sd_utility_pool,
        ISDUtilityPool::repayCall {
            repayAmount: amount,
        },
    )
}
