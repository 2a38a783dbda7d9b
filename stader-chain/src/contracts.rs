#![allow(clippy::too_many_arguments)]
#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use alloy::sol;

sol! {
    /// Stader protocol configuration registry.
    interface IStaderConfig {
        function getRewardsThreshold() external view returns (uint256);
        function getStaderToken() external view returns (address);
        function getPermissionlessNodeRegistry() external view returns (address);
        function getSDCollateral() external view returns (address);
        function getVaultFactory() external view returns (address);
        function getPoolUtils() external view returns (address);
        function getPermissionlessSocializingPool() external view returns (address);
        function getOperatorRewardsCollector() external view returns (address);
        function getSDUtilityPool() external view returns (address);
    }

    /// Permissionless node registry.
    interface IPermissionlessNodeRegistry {
        function operatorIDByAddress(address nodeOperator) external view returns (uint256);
        function operatorStructById(uint256 operatorId) external view returns (
            bool active,
            bool optedForSocializingPool,
            string operatorName,
            address operatorRewardAddress,
            address operatorAddress
        );
        function getOperatorTotalKeys(uint256 operatorId) external view returns (uint256);
        function getOperatorTotalNonTerminalKeys(
            address nodeOperator,
            uint256 startIndex,
            uint256 endIndex
        ) external view returns (uint64);
        function validatorIdsByOperatorId(uint256 operatorId, uint256 index) external view returns (uint256);
        function validatorRegistry(uint256 validatorId) external view returns (
            uint8 status,
            bytes pubkey,
            bytes preDepositSignature,
            bytes depositSignature,
            address withdrawVaultAddress,
            uint256 operatorId,
            uint256 depositBlock,
            uint256 withdrawnBlock
        );
    }

    /// Vault address derivation.
    interface IVaultFactory {
        function computeNodeELRewardVaultAddress(uint8 poolId, uint256 operatorId) external view returns (address);
    }

    /// Reward split between users, operators and the protocol.
    interface IPoolUtils {
        function calculateRewardShare(uint8 poolId, uint256 totalRewards) external view returns (
            uint256 userShare,
            uint256 operatorShare,
            uint256 protocolShare
        );
    }

    /// Per-validator withdrawal vault.
    interface IValidatorWithdrawalVault {
        function calculateValidatorWithdrawalShare() external view returns (
            uint256 userShare,
            uint256 operatorShare,
            uint256 protocolShare
        );
    }

    /// SD collateral held against validator keys.
    interface ISDCollateral {
        function operatorSDBalance(address operator) external view returns (uint256);
        function getMaxValidatorSpawnable(uint256 sdAmount, uint8 poolId) external view returns (uint256);
        function withdrawReq(address operator) external view returns (
            uint256 lastWithdrawReqTimestamp,
            uint256 totalSDWithdrawReqAmount
        );
        function withdrawDelay() external view returns (uint256);
        function poolThresholdbyPoolId(uint8 poolId) external view returns (
            uint256 minThreshold,
            uint256 maxThreshold,
            uint256 withdrawThreshold,
            string units
        );
        function convertETHToSD(uint256 ethAmount) external view returns (uint256);
        function depositSDAsCollateral(uint256 sdAmount) external;
    }

    /// Socializing pool reward cycles.
    interface ISocializingPool {
        function getRewardDetails() external view returns (
            uint256 currentIndex,
            uint256 currentStartBlock,
            uint256 currentEndBlock
        );
    }

    /// Operator reward payouts.
    interface IOperatorRewardsCollector {
        function balances(address operator) external view returns (uint256);
        function withdrawableInEth(address operator) external view returns (uint256);
        function claim() external;
    }

    /// SD utility pool.
    interface ISDUtilityPool {
        function utilizerData(address utilizer) external view returns (
            uint256 principal,
            uint256 utilizeIndex
        );
        function getUtilizerLatestBalance(address utilizer) external view returns (uint256);
        function repay(uint256 repayAmount) external returns (uint256 repaidAmount, uint256 feePaid);
    }

    /// The SD token.
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}
