//! Gas estimation, submission and receipt polling over an alloy provider.

use std::time::Duration;

use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, TxHash};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use log::debug;
use stader_core::collaborators::{
    CallError,
    ConfirmationWatcher,
    ContractCall,
    GasEstimate,
    GasEstimator,
    TxParams,
    TxReceipt,
    TxSubmitter,
};

/// Builds the request for `call` sent from `from`.
fn request(from: Address, call: &ContractCall) -> TransactionRequest {
    TransactionRequest::default()
        .with_from(from)
        .with_to(call.to)
        .with_input(call.input.clone())
        .with_value(call.value)
}

/// [`GasEstimator`] using `eth_estimateGas` and the provider's EIP-1559 fee estimate.
#[derive(Clone, Debug)]
pub struct AlloyGasEstimator<P> {
    /// RPC provider.
    provider: P,
    /// Account the calls will be sent from.
    from: Address,
}

impl<P: Provider> AlloyGasEstimator<P> {
    /// Creates an estimator for calls sent from `from`.
    pub fn new(provider: P, from: Address) -> Self {
        Self { provider, from }
    }
}

#[async_trait]
impl<P: Provider> GasEstimator for AlloyGasEstimator<P> {
    async fn estimate(&self, call: &ContractCall) -> Result<GasEstimate, CallError> {
        let tx = request(self.from, call);
        let gas_limit = self
            .provider
            .estimate_gas(&tx)
            .await
            .map_err(CallError::transport)?;
        let fees = self
            .provider
            .estimate_eip1559_fees(None)
            .await
            .map_err(CallError::transport)?;
        debug!("Estimated {gas_limit} gas for {}", call.label);
        Ok(GasEstimate {
            gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }
}

/// [`TxSubmitter`] sending through a wallet-enabled provider.
///
/// A `None` nonce is left to the provider's nonce filler.
#[derive(Clone, Debug)]
pub struct AlloySubmitter<P> {
    /// Wallet-enabled RPC provider.
    provider: P,
    /// Signing account.
    from: Address,
}

impl<P: Provider> AlloySubmitter<P> {
    /// Creates a submitter for the wallet account `from`.
    pub fn new(provider: P, from: Address) -> Self {
        Self { provider, from }
    }
}

#[async_trait]
impl<P: Provider> TxSubmitter for AlloySubmitter<P> {
    async fn submit(&self, call: &ContractCall, params: &TxParams) -> Result<TxHash, CallError> {
        let mut tx = request(self.from, call)
            .with_gas_limit(params.gas_limit)
            .with_max_fee_per_gas(params.max_fee_per_gas)
            .with_max_priority_fee_per_gas(params.max_priority_fee_per_gas);
        if let Some(nonce) = params.nonce {
            tx = tx.with_nonce(nonce);
        }
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(CallError::transport)?;
        Ok(*pending.tx_hash())
    }
}

/// [`ConfirmationWatcher`] polling `eth_getTransactionReceipt`.
///
/// Polls until the receipt appears; the caller bounds the wait.
#[derive(Clone, Debug)]
pub struct ReceiptPoller<P> {
    /// RPC provider.
    provider: P,
    /// Delay between polls.
    poll_interval: Duration,
}

impl<P: Provider> ReceiptPoller<P> {
    /// Creates a poller.
    pub fn new(provider: P, poll_interval: Duration) -> Self {
        Self {
            provider,
            poll_interval,
        }
    }
}

#[async_trait]
impl<P: Provider> ConfirmationWatcher for ReceiptPoller<P> {
    async fn wait_mined(&self, hash: TxHash) -> Result<TxReceipt, CallError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(CallError::transport)?;
            if let Some(receipt) = receipt {
                return Ok(TxReceipt {
                    hash,
                    block_number: receipt.block_number(),
                    success: receipt.status(),
                });
            }
            debug!("{hash} not mined yet, polling again in {:?}", self.poll_interval);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
