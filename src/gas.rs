//! Gas limit, fee and nonce resolution

use crate::config::{FeeModel, TxConfig};
use crate::constants::apply_multiplier;
use crate::error::TxError;
use crate::rpc::ChainRpc;
use crate::types::{DryRunOutcome, FeeParams, TxOptions};
use alloy::primitives::Address;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Gas limit: explicit override > dry-run estimate > per-operation table > global default
pub fn resolve_gas_limit(
    config: &TxConfig,
    explicit: Option<u64>,
    dry_run: Option<&DryRunOutcome>,
    operation: Option<&str>,
) -> u64 {
    explicit
        .or_else(|| dry_run.and_then(DryRunOutcome::estimated_gas))
        .unwrap_or_else(|| config.static_gas_limit(operation))
}

/// Fee model for one call: explicit overrides pick the model, otherwise the config does
fn fee_model(config: &TxConfig, opts: &TxOptions) -> FeeModel {
    if opts.gas_price.is_some() {
        FeeModel::Legacy
    } else if opts.max_fee_per_gas.is_some() || opts.max_priority_fee_per_gas.is_some() {
        FeeModel::Eip1559
    } else {
        config.fee_model
    }
}

/// Resolve fee parameters from overrides, config and the node's suggestions
pub async fn resolve_fees<R: ChainRpc>(
    rpc: &R,
    config: &TxConfig,
    opts: &TxOptions,
) -> Result<FeeParams, TxError> {
    let multiplier = opts.multiplier.unwrap_or(config.gas_price_multiplier);
    if !(multiplier.is_finite() && multiplier > 0.0) {
        return Err(TxError::InvalidArgument(format!(
            "fee multiplier must be positive, got {multiplier}"
        )));
    }

    match fee_model(config, opts) {
        FeeModel::Legacy => {
            let gas_price = match opts.gas_price.or(config.default_gas_price) {
                Some(price) => price,
                None => apply_multiplier(rpc.gas_price().await?, multiplier),
            };
            Ok(FeeParams::Legacy { gas_price })
        }
        FeeModel::Eip1559 => {
            let max_priority_fee_per_gas = match opts.max_priority_fee_per_gas {
                Some(fee) => fee,
                None => apply_multiplier(rpc.max_priority_fee_per_gas().await?, multiplier),
            };

            let max_fee_per_gas = match opts.max_fee_per_gas {
                Some(fee) => fee,
                None => {
                    let base_fee = rpc.latest_block_fees().await?.base_fee.ok_or_else(|| {
                        TxError::InvalidArgument(
                            "chain reports no base fee, use the legacy fee model".to_string(),
                        )
                    })?;
                    u128::from(base_fee) * 2 + max_priority_fee_per_gas
                }
            };

            if max_fee_per_gas < max_priority_fee_per_gas {
                return Err(TxError::InvalidArgument(format!(
                    "max fee {max_fee_per_gas} is below priority fee {max_priority_fee_per_gas}"
                )));
            }

            Ok(FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            })
        }
    }
}

/// Where nonces come from
///
/// The default asks the node on every call, so each retry attempt sees the
/// latest on-chain count. Concurrent submissions from one address through
/// different pipelines or processes may then collide; coordinating them is up
/// to the caller.
#[derive(Debug, Default)]
pub enum NonceSource {
    #[default]
    Network,
    /// Local counter per address, for callers that own the address exclusively
    Local(LocalNonceCounter),
}

impl NonceSource {
    pub fn local() -> Self {
        NonceSource::Local(LocalNonceCounter::default())
    }

    /// Nonce for the next transaction from `address`
    pub async fn next<R: ChainRpc>(&self, rpc: &R, address: Address) -> Result<u64, TxError> {
        match self {
            NonceSource::Network => rpc.transaction_count(address).await,
            NonceSource::Local(counter) => counter.next(rpc, address).await,
        }
    }

    /// Hand back a nonce whose transaction never reached the node
    pub async fn release(&self, address: Address, nonce: u64) {
        if let NonceSource::Local(counter) = self {
            counter.release(address, nonce).await;
        }
    }
}

/// Monotonic per-address nonce counter
///
/// Only valid when no other process sends from the same address. The counter
/// never goes below the node's transaction count, so transactions mined
/// through another path are picked up on the next call.
#[derive(Debug, Default)]
pub struct LocalNonceCounter {
    next: Mutex<HashMap<Address, u64>>,
}

impl LocalNonceCounter {
    pub async fn next<R: ChainRpc>(&self, rpc: &R, address: Address) -> Result<u64, TxError> {
        let mut next = self.next.lock().await;
        let on_chain = rpc.transaction_count(address).await?;
        let nonce = next.get(&address).copied().unwrap_or_default().max(on_chain);
        next.insert(address, nonce + 1);
        Ok(nonce)
    }

    pub async fn release(&self, address: Address, nonce: u64) {
        let mut next = self.next.lock().await;
        if next.get(&address) == Some(&(nonce + 1)) {
            next.insert(address, nonce);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChain;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_gas_limit_precedence() {
        let config = TxConfig::default();
        let dry_run = DryRunOutcome::WouldSucceed {
            estimated_gas: 60_000,
        };
        let reverted = DryRunOutcome::WouldRevert {
            reason: "nope".into(),
        };

        assert_eq!(
            resolve_gas_limit(&config, Some(1_000), Some(&dry_run), Some("transfer")),
            1_000
        );
        assert_eq!(
            resolve_gas_limit(&config, None, Some(&dry_run), Some("transfer")),
            60_000
        );
        assert_eq!(
            resolve_gas_limit(&config, None, Some(&reverted), Some("transfer")),
            100_000
        );
        assert_eq!(
            resolve_gas_limit(&config, None, None, Some("unknown")),
            config.default_gas_limit
        );
    }

    #[tokio::test]
    async fn test_legacy_price_from_node_with_multiplier() {
        let chain = MockChain::new();
        let fees = resolve_fees(&chain, &TxConfig::default(), &TxOptions::default())
            .await
            .unwrap();
        assert_eq!(fees, FeeParams::Legacy { gas_price: 120 });

        let opts = TxOptions::default().with_multiplier(2.0);
        let fees = resolve_fees(&chain, &TxConfig::default(), &opts).await.unwrap();
        assert_eq!(fees, FeeParams::Legacy { gas_price: 200 });
    }

    #[tokio::test]
    async fn test_legacy_price_overrides() {
        let chain = MockChain::new();
        let mut config = TxConfig::default();
        config.default_gas_price = Some(55);

        let fees = resolve_fees(&chain, &config, &TxOptions::default()).await.unwrap();
        assert_eq!(fees, FeeParams::Legacy { gas_price: 55 });

        let opts = TxOptions::default().with_gas_price(7);
        let fees = resolve_fees(&chain, &config, &opts).await.unwrap();
        assert_eq!(fees, FeeParams::Legacy { gas_price: 7 });
    }

    #[tokio::test]
    async fn test_eip1559_fees() {
        let chain = MockChain::new();
        let config = TxConfig::default().with_fee_model(FeeModel::Eip1559);

        // base fee 10, suggested tip 2 * 1.2 rounded
        let fees = resolve_fees(&chain, &config, &TxOptions::default()).await.unwrap();
        assert_eq!(
            fees,
            FeeParams::Eip1559 {
                max_fee_per_gas: 22,
                max_priority_fee_per_gas: 2,
            }
        );

        let opts = TxOptions::default().with_max_fees(500, 5);
        let fees = resolve_fees(&chain, &TxConfig::default(), &opts).await.unwrap();
        assert_eq!(
            fees,
            FeeParams::Eip1559 {
                max_fee_per_gas: 500,
                max_priority_fee_per_gas: 5,
            }
        );
    }

    #[tokio::test]
    async fn test_eip1559_without_base_fee_is_rejected() {
        let chain = MockChain::new();
        chain.set_base_fee(None);
        let config = TxConfig::default().with_fee_model(FeeModel::Eip1559);

        let err = resolve_fees(&chain, &config, &TxOptions::default()).await.unwrap_err();
        assert!(matches!(err, TxError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_network_nonce_fetched_every_time() {
        let chain = MockChain::new();
        let who = Address::repeat_byte(1);
        chain.set_nonce(who, 4);

        let source = NonceSource::Network;
        assert_eq!(source.next(&chain, who).await.unwrap(), 4);
        assert_eq!(source.next(&chain, who).await.unwrap(), 4);
        assert_eq!(chain.nonce_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_nonce_counter_is_monotonic() {
        let chain = MockChain::new();
        let who = Address::repeat_byte(1);
        chain.set_nonce(who, 4);

        let source = NonceSource::local();
        assert_eq!(source.next(&chain, who).await.unwrap(), 4);
        assert_eq!(source.next(&chain, who).await.unwrap(), 5);

        // a failed broadcast gives its nonce back
        source.release(who, 5).await;
        assert_eq!(source.next(&chain, who).await.unwrap(), 5);

        // the chain moved ahead through another path
        chain.set_nonce(who, 10);
        assert_eq!(source.next(&chain, who).await.unwrap(), 10);
    }
}
