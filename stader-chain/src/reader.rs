//! Execution-layer reads over an alloy provider.
//!
//! Every contract read is an `eth_call` pinned to the block the core asks for, encoded and
//! decoded with the interfaces in [`crate::contracts`].

use alloy::eips::BlockId;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use log::info;
use stader_core::collaborators::{
    BlockNumber,
    CallError,
    ChainReader,
    OperatorInfo,
    OperatorRewards,
    SdUtilization,
    ValidatorInfo,
    ValidatorPubkey,
    WithdrawRequest,
};
use stader_core::status::ValidatorStatus;

use crate::contracts::{
    IPermissionlessNodeRegistry,
    IPoolUtils,
    ISDCollateral,
    ISocializingPool,
    IStaderConfig,
    IValidatorWithdrawalVault,
    IVaultFactory,
    IOperatorRewardsCollector,
    ISDUtilityPool,
    IERC20,
};

/// Pool id of the permissionless pool.
pub const PERMISSIONLESS_POOL_ID: u8 = 1;

/// Addresses of the Stader contracts the operator client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Stader configuration registry, the root every other address is resolved from.
    pub stader_config: Address,
    /// SD token.
    pub sd_token: Address,
    /// Permissionless node registry.
    pub node_registry: Address,
    /// SD collateral.
    pub sd_collateral: Address,
    /// Vault factory.
    pub vault_factory: Address,
    /// Pool utils.
    pub pool_utils: Address,
    /// Permissionless socializing pool.
    pub socializing_pool: Address,
    /// Operator rewards collector.
    pub rewards_collector: Address,
    /// SD utility pool.
    pub sd_utility_pool: Address,
}

impl ContractAddresses {
    /// Reads every contract address from the Stader config registry at the latest block.
    pub async fn resolve<P: Provider>(
        provider: &P,
        stader_config: Address,
    ) -> Result<Self, CallError> {
        let at = BlockId::latest();
        let addresses = Self {
            stader_config,
            sd_token: eth_call(provider, stader_config, IStaderConfig::getStaderTokenCall {}, at)
                .await?
                ._0,
            node_registry: eth_call(
                provider,
                stader_config,
                IStaderConfig::getPermissionlessNodeRegistryCall {},
                at,
            )
            .await?
            ._0,
            sd_collateral: eth_call(
                provider,
                stader_config,
                IStaderConfig::getSDCollateralCall {},
                at,
            )
            .await?
            ._0,
            vault_factory: eth_call(
                provider,
                stader_config,
                IStaderConfig::getVaultFactoryCall {},
                at,
            )
            .await?
            ._0,
            pool_utils: eth_call(provider, stader_config, IStaderConfig::getPoolUtilsCall {}, at)
                .await?
                ._0,
            socializing_pool: eth_call(
                provider,
                stader_config,
                IStaderConfig::getPermissionlessSocializingPoolCall {},
                at,
            )
            .await?
            ._0,
            rewards_collector: eth_call(
                provider,
                stader_config,
                IStaderConfig::getOperatorRewardsCollectorCall {},
                at,
            )
            .await?
            ._0,
            sd_utility_pool: eth_call(
                provider,
                stader_config,
                IStaderConfig::getSDUtilityPoolCall {},
                at,
            )
            .await?
            ._0,
        };
        info!("🔗 Resolved Stader contracts from config {stader_config}");
        Ok(addresses)
    }
}

/// Performs an `eth_call` of `call` against `to` at `at` and decodes the return data.
pub(crate) async fn eth_call<P: Provider, C: SolCall>(
    provider: &P,
    to: Address,
    call: C,
    at: BlockId,
) -> Result<C::Return, CallError> {
    let tx = TransactionRequest::default()
        .with_to(to)
        .with_input(call.abi_encode());
    let output = provider
        .call(&tx)
        .block(at)
        .await
        .map_err(CallError::transport)?;
    C::abi_decode_returns(&output, true).map_err(CallError::transport)
}

/// Narrows a contract integer that is known to be small.
fn to_u64(value: U256, what: &str) -> Result<u64, CallError> {
    u64::try_from(value).map_err(|_| CallError::transport(format!("{what} {value} exceeds u64")))
}

/// [`ChainReader`] backed by an alloy provider.
#[derive(Clone, Debug)]
pub struct AlloyChainReader<P> {
    /// RPC provider.
    provider: P,
    /// Contract addresses.
    contracts: ContractAddresses,
}

impl<P: Provider> AlloyChainReader<P> {
    /// Creates a reader.
    pub fn new(provider: P, contracts: ContractAddresses) -> Self {
        Self {
            provider,
            contracts,
        }
    }

    /// Pinned contract read.
    async fn call<C: SolCall>(
        &self,
        to: Address,
        call: C,
        at: BlockNumber,
    ) -> Result<C::Return, CallError> {
        eth_call(&self.provider, to, call, BlockId::number(at)).await
    }
}

#[async_trait]
impl<P: Provider> ChainReader for AlloyChainReader<P> {
    async fn block_number(&self) -> Result<BlockNumber, CallError> {
        self.provider
            .get_block_number()
            .await
            .map_err(CallError::transport)
    }

    async fn eth_balance(&self, account: Address, at: BlockNumber) -> Result<U256, CallError> {
        self.provider
            .get_balance(account)
            .block_id(BlockId::number(at))
            .await
            .map_err(CallError::transport)
    }

    async fn sd_balance(&self, account: Address, at: BlockNumber) -> Result<U256, CallError> {
        let call = IERC20::balanceOfCall { account };
        Ok(self.call(self.contracts.sd_token, call, at).await?._0)
    }

    async fn operator_id(&self, node: Address, at: BlockNumber) -> Result<U256, CallError> {
        let call = IPermissionlessNodeRegistry::operatorIDByAddressCall { nodeOperator: node };
        Ok(self.call(self.contracts.node_registry, call, at).await?._0)
    }

    async fn operator_info(
        &self,
        operator_id: U256,
        at: BlockNumber,
    ) -> Result<OperatorInfo, CallError> {
        let call = IPermissionlessNodeRegistry::operatorStructByIdCall {
            operatorId: operator_id,
        };
        let entry = self.call(self.contracts.node_registry, call, at).await?;
        Ok(OperatorInfo {
            active: entry.active,
            opted_for_socializing_pool: entry.optedForSocializingPool,
            name: entry.operatorName,
            reward_address: entry.operatorRewardAddress,
            operator_address: entry.operatorAddress,
        })
    }

    async fn el_reward_vault(
        &self,
        operator_id: U256,
        at: BlockNumber,
    ) -> Result<Address, CallError> {
        let call = IVaultFactory::computeNodeELRewardVaultAddressCall {
            poolId: PERMISSIONLESS_POOL_ID,
            operatorId: operator_id,
        };
        Ok(self.call(self.contracts.vault_factory, call, at).await?._0)
    }

    async fn operator_reward_share(
        &self,
        total: U256,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let call = IPoolUtils::calculateRewardShareCall {
            poolId: PERMISSIONLESS_POOL_ID,
            totalRewards: total,
        };
        Ok(self
            .call(self.contracts.pool_utils, call, at)
            .await?
            .operatorShare)
    }

    async fn withdraw_vault_operator_share(
        &self,
        vault: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let call = IValidatorWithdrawalVault::calculateValidatorWithdrawalShareCall {};
        Ok(self.call(vault, call, at).await?.operatorShare)
    }

    async fn sd_collateral(&self, node: Address, at: BlockNumber) -> Result<U256, CallError> {
        let call = ISDCollateral::operatorSDBalanceCall { operator: node };
        Ok(self.call(self.contracts.sd_collateral, call, at).await?._0)
    }

    async fn max_validators_spawnable(
        &self,
        sd_amount: U256,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let call = ISDCollateral::getMaxValidatorSpawnableCall {
            sdAmount: sd_amount,
            poolId: PERMISSIONLESS_POOL_ID,
        };
        Ok(self.call(self.contracts.sd_collateral, call, at).await?._0)
    }

    async fn withdraw_request(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<WithdrawRequest, CallError> {
        let call = ISDCollateral::withdrawReqCall { operator: node };
        let request = self.call(self.contracts.sd_collateral, call, at).await?;
        Ok(WithdrawRequest {
            total_requested: request.totalSDWithdrawReqAmount,
            last_request_timestamp: request.lastWithdrawReqTimestamp,
        })
    }

    async fn withdraw_delay(&self, at: BlockNumber) -> Result<U256, CallError> {
        let call = ISDCollateral::withdrawDelayCall {};
        Ok(self.call(self.contracts.sd_collateral, call, at).await?._0)
    }

    async fn total_validator_keys(
        &self,
        operator_id: U256,
        at: BlockNumber,
    ) -> Result<u64, CallError> {
        let call = IPermissionlessNodeRegistry::getOperatorTotalKeysCall {
            operatorId: operator_id,
        };
        let total = self.call(self.contracts.node_registry, call, at).await?._0;
        to_u64(total, "validator key count")
    }

    async fn total_non_terminal_validator_keys(
        &self,
        node: Address,
        total_keys: u64,
        at: BlockNumber,
    ) -> Result<u64, CallError> {
        let call = IPermissionlessNodeRegistry::getOperatorTotalNonTerminalKeysCall {
            nodeOperator: node,
            startIndex: U256::ZERO,
            endIndex: U256::from(total_keys),
        };
        Ok(self.call(self.contracts.node_registry, call, at).await?._0)
    }

    async fn validator_id_by_operator(
        &self,
        operator_id: U256,
        index: u64,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let call = IPermissionlessNodeRegistry::validatorIdsByOperatorIdCall {
            operatorId: operator_id,
            index: U256::from(index),
        };
        Ok(self.call(self.contracts.node_registry, call, at).await?._0)
    }

    async fn validator_info(
        &self,
        validator_id: U256,
        at: BlockNumber,
    ) -> Result<ValidatorInfo, CallError> {
        let call = IPermissionlessNodeRegistry::validatorRegistryCall {
            validatorId: validator_id,
        };
        let entry = self.call(self.contracts.node_registry, call, at).await?;
        let status = ValidatorStatus::from_repr(entry.status).ok_or_else(|| {
            CallError::transport(format!(
                "validator {validator_id} has unknown status {}",
                entry.status
            ))
        })?;
        let pubkey =
            ValidatorPubkey::try_from(entry.pubkey.as_ref()).map_err(CallError::transport)?;
        Ok(ValidatorInfo {
            status,
            pubkey,
            withdraw_vault: entry.withdrawVaultAddress,
            operator_id: entry.operatorId,
            deposit_block: to_u64(entry.depositBlock, "deposit block")?,
            withdrawn_block: to_u64(entry.withdrawnBlock, "withdrawn block")?,
        })
    }

    async fn rewards_threshold(&self, at: BlockNumber) -> Result<U256, CallError> {
        let call = IStaderConfig::getRewardsThresholdCall {};
        Ok(self.call(self.contracts.stader_config, call, at).await?._0)
    }

    async fn socializing_pool(&self, at: BlockNumber) -> Result<Address, CallError> {
        let call = IStaderConfig::getPermissionlessSocializingPoolCall {};
        Ok(self.call(self.contracts.stader_config, call, at).await?._0)
    }

    async fn reward_cycle_index(&self, at: BlockNumber) -> Result<u64, CallError> {
        let call = ISocializingPool::getRewardDetailsCall {};
        let details = self.call(self.contracts.socializing_pool, call, at).await?;
        to_u64(details.currentIndex, "reward cycle index")
    }

    async fn sd_collateral_allowance(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let call = IERC20::allowanceCall {
            owner: node,
            spender: self.contracts.sd_collateral,
        };
        Ok(self.call(self.contracts.sd_token, call, at).await?._0)
    }

    async fn sd_utilization(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<SdUtilization, CallError> {
        let pool = self.contracts.sd_utility_pool;
        let data = ISDUtilityPool::utilizerDataCall { utilizer: node };
        let latest = ISDUtilityPool::getUtilizerLatestBalanceCall { utilizer: node };
        Ok(SdUtilization {
            principal: self.call(pool, data, at).await?.principal,
            latest_balance: self.call(pool, latest, at).await?._0,
        })
    }

    async fn max_sd_collateral(
        &self,
        validator_count: u64,
        at: BlockNumber,
    ) -> Result<U256, CallError> {
        let collateral = self.contracts.sd_collateral;
        let threshold = ISDCollateral::poolThresholdbyPoolIdCall {
            poolId: PERMISSIONLESS_POOL_ID,
        };
        let max_eth = self
            .call(collateral, threshold, at)
            .await?
            .maxThreshold
            .checked_mul(U256::from(validator_count))
            .ok_or_else(|| CallError::transport("max SD collateral overflows uint256"))?;
        let call = ISDCollateral::convertETHToSDCall { ethAmount: max_eth };
        Ok(self.call(collateral, call, at).await?._0)
    }

    async fn operator_rewards(
        &self,
        node: Address,
        at: BlockNumber,
    ) -> Result<OperatorRewards, CallError> {
        let collector = self.contracts.rewards_collector;
        let balance = IOperatorRewardsCollector::balancesCall { operator: node };
        let withdrawable = IOperatorRewardsCollector::withdrawableInEthCall { operator: node };
        Ok(OperatorRewards {
            balance: self.call(collector, balance, at).await?._0,
            withdrawable: self.call(collector, withdrawable, at).await?._0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_integers_are_rejected() {
        assert_eq!(to_u64(U256::from(42u64), "n").unwrap(), 42);
        assert!(to_u64(U256::MAX, "n").is_err());
    }
}
