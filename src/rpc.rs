//! Blockchain RPC gateway used by the pipeline and the wallets
//!
//! [`ChainRpc`] is the narrow set of node calls the transaction pipeline needs.
//! [`AlloyRpc`] implements it over an alloy HTTP provider; tests substitute an
//! in-memory chain.

use crate::error::TxError;
use crate::types::Receipt;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{Ethereum, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::sol_types::decode_revert_reason;
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportErrorKind};
use eyre::{Context, Result};
use std::future::Future;
use std::sync::Arc;

/// Read-only call parameters for simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    /// Gas to simulate with; the node picks when `None`
    pub gas: Option<u64>,
}

/// Why a simulated call did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// Contract logic rejected the call
    Revert { reason: String },
    /// The node could not run the simulation
    Node(String),
}

/// Gas limit and base fee of the latest block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFees {
    pub gas_limit: u64,
    /// `None` on chains without EIP-1559
    pub base_fee: Option<u64>,
}

/// Node calls consumed by the transaction pipeline
pub trait ChainRpc: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64, TxError>> + Send;

    /// `eth_call`
    fn call(&self, request: &CallRequest) -> impl Future<Output = Result<Bytes, CallFailure>> + Send;

    /// `eth_estimateGas`
    fn estimate_gas(
        &self,
        request: &CallRequest,
    ) -> impl Future<Output = Result<u64, CallFailure>> + Send;

    /// Number of transactions sent from `address` (the next nonce)
    fn transaction_count(&self, address: Address)
        -> impl Future<Output = Result<u64, TxError>> + Send;

    fn send_raw_transaction(&self, raw: &[u8]) -> impl Future<Output = Result<TxHash, TxError>> + Send;

    fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> impl Future<Output = Result<Option<Receipt>, TxError>> + Send;

    /// Whether the node knows the transaction at all (pending or mined)
    fn transaction_known(&self, hash: TxHash) -> impl Future<Output = Result<bool, TxError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, TxError>> + Send;

    /// Suggested legacy gas price
    fn gas_price(&self) -> impl Future<Output = Result<u128, TxError>> + Send;

    /// Suggested EIP-1559 tip
    fn max_priority_fee_per_gas(&self) -> impl Future<Output = Result<u128, TxError>> + Send;

    fn latest_block_fees(&self) -> impl Future<Output = Result<BlockFees, TxError>> + Send;

    fn balance(&self, address: Address) -> impl Future<Output = Result<U256, TxError>> + Send;
}

/// [`ChainRpc`] over an alloy HTTP provider
#[derive(Clone)]
pub struct AlloyRpc {
    /// Read-only provider without fillers; nonce, gas and signing are handled
    /// by the pipeline and the wallets
    provider: Arc<RootProvider<Ethereum>>,
}

impl AlloyRpc {
    /// Connect to an HTTP JSON-RPC endpoint
    pub fn connect(rpc_url: impl AsRef<str>) -> Result<Self> {
        let url: Url = rpc_url.as_ref().parse().context("Invalid RPC URL")?;
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .network::<Ethereum>()
            .connect_http(url);

        Ok(Self {
            provider: Arc::new(provider),
        })
    }

    /// Underlying provider, for calls outside the pipeline
    pub fn provider(&self) -> &RootProvider<Ethereum> {
        &self.provider
    }
}

fn to_request(request: &CallRequest) -> TransactionRequest {
    let tx = TransactionRequest::default()
        .with_from(request.from)
        .with_to(request.to)
        .with_value(request.value)
        .with_input(request.data.clone());

    match request.gas {
        Some(gas) => tx.with_gas_limit(gas),
        None => tx,
    }
}

/// Split node errors into contract reverts and everything else
fn classify(err: RpcError<TransportErrorKind>) -> CallFailure {
    if let Some(payload) = err.as_error_resp() {
        if let Some(data) = payload.as_revert_data() {
            let reason = decode_revert_reason(&data).unwrap_or_else(|| payload.message.to_string());
            return CallFailure::Revert { reason };
        }
        if payload.message.contains("revert") {
            return CallFailure::Revert {
                reason: payload.message.to_string(),
            };
        }
    }

    CallFailure::Node(err.to_string())
}

impl ChainRpc for AlloyRpc {
    async fn chain_id(&self) -> Result<u64, TxError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| TxError::rpc("Failed to get chain id", e))
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, CallFailure> {
        self.provider.call(to_request(request)).await.map_err(classify)
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, CallFailure> {
        self.provider
            .estimate_gas(to_request(request))
            .await
            .map_err(classify)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TxError> {
        self.provider
            .get_transaction_count(address)
            .await
            .map_err(|e| TxError::rpc("Failed to get nonce", e))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TxError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| TxError::rpc("Failed to send transaction", e))?;

        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, TxError> {
        let receipt: Option<TransactionReceipt> = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| TxError::rpc("Failed to get transaction receipt", e))?;

        Ok(receipt.as_ref().map(Receipt::from))
    }

    async fn transaction_known(&self, hash: TxHash) -> Result<bool, TxError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| TxError::rpc("Failed to get transaction", e))?;

        Ok(tx.is_some())
    }

    async fn block_number(&self) -> Result<u64, TxError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| TxError::rpc("Failed to get block number", e))
    }

    async fn gas_price(&self) -> Result<u128, TxError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| TxError::rpc("Failed to get gas price", e))
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128, TxError> {
        self.provider
            .get_max_priority_fee_per_gas()
            .await
            .map_err(|e| TxError::rpc("Failed to get priority fee", e))
    }

    async fn latest_block_fees(&self) -> Result<BlockFees, TxError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| TxError::rpc("Failed to get latest block", e))?
            .ok_or_else(|| TxError::Rpc("Latest block not available".to_string()))?;

        Ok(BlockFees {
            gas_limit: block.header.gas_limit,
            base_fee: block.header.base_fee_per_gas,
        })
    }

    async fn balance(&self, address: Address) -> Result<U256, TxError> {
        self.provider
            .get_balance(address)
            .await
            .map_err(|e| TxError::rpc("Failed to get balance", e))
    }
}
