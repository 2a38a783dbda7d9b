//! Builders for the transaction plans the operator client runs.

use alloy::primitives::U256;

use crate::collaborators::ContractCall;
use crate::tx_orchestrator::{PlanError, StepKind, TxPlanState};

/// `execute` followed by a wait for it.
pub fn single_call(
    name: impl Into<String>,
    execute: ContractCall,
    nonce_override: Option<u64>,
) -> Result<TxPlanState, PlanError> {
    TxPlanState::new(
        name,
        vec![
            StepKind::Execute(execute),
            StepKind::WaitForConfirmation { of_step: 0 },
        ],
        nonce_override,
    )
}

/// `approve`, a wait for it, `execute`, and a wait for that.
pub fn approve_then_execute(
    name: impl Into<String>,
    approve: ContractCall,
    execute: ContractCall,
    nonce_override: Option<u64>,
) -> Result<TxPlanState, PlanError> {
    TxPlanState::new(
        name,
        vec![
            StepKind::Approve(approve),
            StepKind::WaitForConfirmation { of_step: 0 },
            StepKind::Execute(execute),
            StepKind::WaitForConfirmation { of_step: 2 },
        ],
        nonce_override,
    )
}

/// SD collateral deposit. The approval is only included when `allowance` does not
/// already cover `amount`.
pub fn collateral_deposit(
    approve: ContractCall,
    deposit: ContractCall,
    allowance: U256,
    amount: U256,
    nonce_override: Option<u64>,
) -> Result<TxPlanState, PlanError> {
    if allowance >= amount {
        single_call("deposit-sd-collateral", deposit, nonce_override)
    } else {
        approve_then_execute("deposit-sd-collateral", approve, deposit, nonce_override)
    }
}
