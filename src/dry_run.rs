//! Dry-run executor: simulate a pending call before spending gas

use crate::config::TxConfig;
use crate::constants::apply_multiplier;
use crate::rpc::{CallFailure, CallRequest, ChainRpc};
use crate::types::{DryRunOutcome, PendingCall};
use alloy::primitives::Address;

/// Simulates calls and classifies the outcome
#[derive(Debug, Clone, Copy)]
pub struct DryRunExecutor {
    /// Safety factor applied to `eth_estimateGas`
    gas_multiplier: f64,
    /// Block gas limit assumed when the latest block cannot be read
    fallback_block_gas_limit: u64,
}

impl DryRunExecutor {
    pub fn new(gas_multiplier: f64, fallback_block_gas_limit: u64) -> Self {
        Self {
            gas_multiplier,
            fallback_block_gas_limit,
        }
    }

    pub fn from_config(config: &TxConfig) -> Self {
        Self::new(config.gas_multiplier, config.default_gas_limit)
    }

    /// Simulate `call` sent by `from`
    ///
    /// With an explicit `gas_limit` the call is executed with that gas and the
    /// limit is reported back unchanged; otherwise the node's estimate is scaled
    /// by the multiplier and clamped to the block gas limit.
    pub async fn run<R: ChainRpc>(
        &self,
        rpc: &R,
        call: &PendingCall,
        from: Address,
        gas_limit: Option<u64>,
    ) -> DryRunOutcome {
        let operation = call.operation().unwrap_or("call");
        tracing::info!(
            operation,
            sender = %from,
            to = %call.to(),
            value = %call.value(),
            "Dry run tx"
        );

        let request = CallRequest {
            from,
            to: call.to(),
            data: call.data().clone(),
            value: call.value(),
            gas: gas_limit,
        };

        let result = match gas_limit {
            Some(gas) => rpc.call(&request).await.map(|_| gas),
            None => self.estimate_gas(rpc, &request, operation).await,
        };

        match result {
            Ok(estimated_gas) => {
                tracing::info!(operation, estimated_gas, "Dry run succeeded");
                DryRunOutcome::WouldSucceed { estimated_gas }
            }
            Err(CallFailure::Revert { reason }) => {
                tracing::warn!(operation, %reason, "Dry run reverted");
                DryRunOutcome::WouldRevert { reason }
            }
            Err(CallFailure::Node(error)) => {
                tracing::error!(operation, %error, "Dry run failed");
                DryRunOutcome::NodeError { error }
            }
        }
    }

    async fn estimate_gas<R: ChainRpc>(
        &self,
        rpc: &R,
        request: &CallRequest,
        operation: &str,
    ) -> Result<u64, CallFailure> {
        let block_gas_limit = match rpc.latest_block_fees().await {
            Ok(fees) => fees.gas_limit,
            Err(e) => {
                tracing::debug!(error = %e, "Block gas limit unavailable, using default");
                self.fallback_block_gas_limit
            }
        };

        let estimated = rpc.estimate_gas(request).await?;
        let normalized = u64::try_from(apply_multiplier(estimated.into(), self.gas_multiplier))
            .unwrap_or(u64::MAX);

        if normalized > block_gas_limit {
            tracing::warn!(
                operation,
                estimated = normalized,
                block_gas_limit,
                "Estimated gas exceeds block gas limit, clamping"
            );
            return Ok(block_gas_limit);
        }

        Ok(normalized)
    }
}
