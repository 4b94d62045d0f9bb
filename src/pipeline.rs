//! Transaction submission pipeline
//!
//! [`TxPipeline::submit`] drives one [`PendingCall`] through
//! dry run → sign and send → wait for receipt → confirmations, stopping early
//! whenever the options or the dry run say so, and returns a [`TxRes`].

use crate::config::TxConfig;
use crate::dry_run::DryRunExecutor;
use crate::error::TxError;
use crate::gas::{resolve_fees, resolve_gas_limit, NonceSource};
use crate::retry::{retry_tx, RetryPolicy};
use crate::rpc::ChainRpc;
use crate::types::{DryRunOutcome, PendingCall, Receipt, TxOptions, TxRef, TxRes, UnsignedTx};
use crate::wallet::{SendHints, WaitParams, Wallet};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;

/// Submits pending calls through one wallet against one chain
///
/// Submissions through the same pipeline are serialized from nonce resolution
/// until the wallet accepted the transaction. Other pipelines or processes
/// sending from the same address are not coordinated with.
pub struct TxPipeline<R, W> {
    rpc: Arc<R>,
    wallet: Arc<W>,
    config: TxConfig,
    executor: DryRunExecutor,
    nonces: NonceSource,
    chain_id: OnceCell<u64>,
    send_lock: Mutex<()>,
}

impl<R: ChainRpc, W: Wallet> TxPipeline<R, W> {
    pub fn new(rpc: Arc<R>, wallet: Arc<W>, config: TxConfig) -> Self {
        Self {
            rpc,
            wallet,
            executor: DryRunExecutor::from_config(&config),
            config,
            nonces: NonceSource::default(),
            chain_id: OnceCell::new(),
            send_lock: Mutex::new(()),
        }
    }

    /// Replace the nonce source (network by default)
    pub fn with_nonce_source(mut self, nonces: NonceSource) -> Self {
        self.nonces = nonces;
        self
    }

    /// Pin the chain ID instead of asking the node on first use
    pub fn with_chain_id(self, chain_id: u64) -> Self {
        Self {
            chain_id: OnceCell::new_with(Some(chain_id)),
            ..self
        }
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Simulate `call` from the pipeline's wallet without sending anything
    pub async fn dry_run(&self, call: &PendingCall) -> DryRunOutcome {
        self.executor
            .run(&*self.rpc, call, self.wallet.address(), call.gas_limit())
            .await
    }

    /// Run the pipeline once
    ///
    /// With `raise_for_status` set (the default) a failed dry run or a failed
    /// receipt comes back as the matching [`TxError`] instead of a [`TxRes`].
    pub async fn submit(&self, call: &PendingCall, opts: &TxOptions) -> Result<TxRes, TxError> {
        let res = self.run(call, opts).await?;
        if opts.raise_for_status {
            res.raise_for_status()?;
        }
        Ok(res)
    }

    /// Run the pipeline under `policy`, re-resolving nonce and dry run on every attempt
    pub async fn submit_with_retry(
        &self,
        call: &PendingCall,
        opts: &TxOptions,
        policy: &RetryPolicy,
    ) -> Result<TxRes, TxError> {
        retry_tx(policy, || self.submit(call, opts)).await
    }

    async fn run(&self, call: &PendingCall, opts: &TxOptions) -> Result<TxRes, TxError> {
        if opts.dry_run_only && opts.skip_dry_run {
            return Err(TxError::InvalidArgument(
                "dry_run_only and skip_dry_run are mutually exclusive".to_string(),
            ));
        }

        let operation = call.operation().unwrap_or("call");
        let from = self.wallet.address();
        let gas_override = opts.gas_limit.or(call.gas_limit());

        // An explicit dry_run_only request wins over the process-wide switch
        let skip_dry_run = !opts.dry_run_only && (opts.skip_dry_run || self.config.disable_dry_run);
        let dry_run = if skip_dry_run {
            tracing::debug!(operation, "Dry run skipped");
            None
        } else {
            Some(self.executor.run(&*self.rpc, call, from, gas_override).await)
        };

        if opts.dry_run_only {
            return TxRes::new(dry_run, None, None);
        }

        if let Some(outcome) = dry_run.as_ref().filter(|o| !o.is_success()) {
            if !opts.force_send {
                tracing::info!(operation, status = ?outcome.status(), "Dry run did not succeed, not sending");
                return TxRes::new(dry_run, None, None);
            }
            tracing::warn!(operation, status = ?outcome.status(), "Dry run did not succeed, sending anyway");
        }

        let gas_limit = resolve_gas_limit(&self.config, gas_override, dry_run.as_ref(), call.operation());
        let (chain_id, fees) = tokio::try_join!(
            self.chain_id(),
            resolve_fees(&*self.rpc, &self.config, opts)
        )?;

        // nonce is filled in under the send lock
        let mut tx = UnsignedTx {
            from,
            to: call.to(),
            value: call.value(),
            data: call.data().clone(),
            gas_limit,
            nonce: 0,
            chain_id,
            fees,
        };

        if self.config.check_balance {
            self.ensure_balance(from, tx.max_cost()).await?;
        }

        let hints = SendHints {
            multiplier: opts.multiplier,
            priority: opts.priority,
            operation: call.operation().map(str::to_string),
            meta: opts.meta.clone(),
        };

        let tx_ref = {
            let _guard = self.send_lock.lock().await;

            let nonce = match opts.nonce {
                Some(nonce) => nonce,
                None => self.nonces.next(&*self.rpc, from).await?,
            };
            tx.nonce = nonce;

            tracing::info!(operation, sender = %from, nonce, gas_limit, ?fees, "Sending transaction");

            match self.wallet.sign_and_send(&tx, &hints).await {
                Ok(tx_ref) => tx_ref,
                Err(e) => {
                    if opts.nonce.is_none() {
                        self.nonces.release(from, nonce).await;
                    }
                    return Err(e);
                }
            }
        };
        tracing::info!(operation, tx = %tx_ref, "Transaction submitted");

        if !opts.wait_for {
            return TxRes::new(dry_run, Some(tx_ref), None);
        }

        // one deadline covers the receipt and the confirmations
        let params = self.wait_params(opts);
        let started = Instant::now();
        let receipt = self.wallet.wait(&tx_ref, &params).await?;

        if receipt.success {
            tracing::info!(
                operation,
                tx_hash = %receipt.tx_hash,
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "Transaction mined"
            );
            if opts.confirmation_blocks > 0 {
                let params = params.remaining_after(started.elapsed());
                wait_for_confirmations(&*self.rpc, &receipt, opts.confirmation_blocks, &params)
                    .await?;
            }
        } else {
            tracing::warn!(operation, tx_hash = %receipt.tx_hash, block = receipt.block_number, "Transaction reverted");
        }

        TxRes::new(dry_run, Some(tx_ref), Some(receipt))
    }

    async fn chain_id(&self) -> Result<u64, TxError> {
        self.chain_id
            .get_or_try_init(|| self.rpc.chain_id())
            .await
            .copied()
    }

    async fn ensure_balance(&self, address: Address, required: U256) -> Result<(), TxError> {
        let available = self.rpc.balance(address).await?;
        if available < required {
            tracing::error!(%address, %required, %available, "Insufficient balance");
            return Err(TxError::InsufficientBalance {
                address,
                required,
                available,
            });
        }
        Ok(())
    }

    fn wait_params(&self, opts: &TxOptions) -> WaitParams {
        WaitParams {
            blocks_to_wait: opts.blocks_to_wait.unwrap_or(self.config.blocks_to_wait),
            timeout: opts.timeout.unwrap_or(self.config.max_waiting_time),
            poll_interval: self.config.poll_interval,
        }
    }
}

/// Wait until `blocks` blocks are on top of the receipt's inclusion block
pub async fn wait_for_confirmations<R: ChainRpc>(
    rpc: &R,
    receipt: &Receipt,
    blocks: u64,
    params: &WaitParams,
) -> Result<(), TxError> {
    let target = receipt.block_number.saturating_add(blocks);
    let started = Instant::now();

    loop {
        let current = rpc.block_number().await?;
        if current >= target {
            tracing::debug!(tx_hash = %receipt.tx_hash, current, target, "Transaction confirmed");
            return Ok(());
        }

        let waited = started.elapsed();
        if waited >= params.timeout {
            return Err(TxError::TransactionTimeout {
                tx: TxRef::Hash(receipt.tx_hash),
                waited,
            });
        }

        tokio::time::sleep(params.poll_interval.min(params.timeout - waited)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::token;
    use crate::retry::Backoff;
    use crate::test_utils::{MockChain, TEST_ADDRESS, TEST_KEY, TOKEN};
    use crate::types::DryRunStatus;
    use crate::wallet::LocalWallet;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    type Pipeline = TxPipeline<MockChain, LocalWallet<MockChain>>;

    fn receiver() -> Address {
        Address::repeat_byte(0xbb)
    }

    fn funded_chain() -> Arc<MockChain> {
        let chain = Arc::new(MockChain::new());
        chain.fund(TEST_ADDRESS, U256::from(10u64.pow(18)));
        chain
    }

    fn pipeline(chain: &Arc<MockChain>) -> Pipeline {
        let wallet = LocalWallet::from_private_key(TEST_KEY, chain.clone()).unwrap();
        TxPipeline::new(chain.clone(), Arc::new(wallet), TxConfig::default())
    }

    fn transfer(amount: u64) -> PendingCall {
        token::transfer(TOKEN, receiver(), U256::from(amount))
    }

    #[tokio::test]
    async fn test_token_transfer_without_dry_run() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default().with_skip_dry_run(true);
        let res = pipeline.submit(&transfer(40), &opts).await.unwrap();

        assert!(res.dry_run().is_none());
        assert!(res.tx_hash().is_some());
        let receipt = res.receipt().unwrap();
        assert!(receipt.success);
        assert_eq!(chain.token_balance(TEST_ADDRESS), U256::from(60));
        assert_eq!(chain.token_balance(receiver()), U256::from(40));
    }

    #[tokio::test]
    async fn test_dry_run_only_revert() {
        let chain = funded_chain();
        let pipeline = pipeline(&chain);

        let opts = TxOptions::dry_run_only().with_raise_for_status(false);
        let res = pipeline.submit(&transfer(40), &opts).await.unwrap();

        assert_eq!(res.dry_run().map(DryRunOutcome::status), Some(DryRunStatus::WouldRevert));
        assert!(res.tx_hash().is_none());
        assert!(res.receipt().is_none());
        assert!(matches!(res.raise_for_status(), Err(TxError::DryRunRevert(_))));

        // raised straight away by default
        let err = pipeline.submit(&transfer(40), &TxOptions::dry_run_only()).await.unwrap_err();
        assert!(matches!(err, TxError::DryRunRevert(_)));
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_only_overrides_disabled_dry_run() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let wallet = LocalWallet::from_private_key(TEST_KEY, chain.clone()).unwrap();
        let config = TxConfig::default().with_dry_run_disabled(true);
        let pipeline = TxPipeline::new(chain.clone(), Arc::new(wallet), config);

        let res = pipeline.submit(&transfer(1), &TxOptions::dry_run_only()).await.unwrap();
        assert!(res.dry_run().unwrap().is_success());
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 0);

        let opts = TxOptions::dry_run_only().with_skip_dry_run(true);
        let err = pipeline.submit(&transfer(1), &opts).await.unwrap_err();
        assert!(matches!(err, TxError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_fire_and_forget_then_wait() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let pipeline = pipeline(&chain);

        let res = pipeline
            .submit(&transfer(10), &TxOptions::fire_and_forget())
            .await
            .unwrap();
        assert!(res.tx_hash().is_some());
        assert!(res.receipt().is_none());
        assert!(res.dry_run().unwrap().is_success());

        let receipt = pipeline
            .wallet()
            .wait(res.tx_ref().unwrap(), &WaitParams::default())
            .await
            .unwrap();
        assert_eq!(Some(receipt.tx_hash), res.tx_hash());
        assert!(receipt.success);
    }

    #[tokio::test]
    async fn test_fire_and_forget_then_wait_sees_revert() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.set_revert_on_chain(true);
        let pipeline = pipeline(&chain);

        let res = pipeline
            .submit(&transfer(10), &TxOptions::fire_and_forget())
            .await
            .unwrap();
        let receipt = pipeline
            .wallet()
            .wait(res.tx_ref().unwrap(), &WaitParams::default())
            .await
            .unwrap();
        assert!(!receipt.success);
    }

    #[tokio::test]
    async fn test_failed_receipt_is_raised() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.set_revert_on_chain(true);
        let pipeline = pipeline(&chain);

        let err = pipeline.submit(&transfer(10), &TxOptions::default()).await.unwrap_err();
        assert!(matches!(err, TxError::TransactionFailed(_)));

        let opts = TxOptions::default().with_raise_for_status(false);
        let res = pipeline.submit(&transfer(10), &opts).await.unwrap();
        assert!(!res.receipt().unwrap().success);
    }

    #[tokio::test]
    async fn test_node_error_blocks_sending() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.set_node_down(true);
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default().with_raise_for_status(false);
        let res = pipeline.submit(&transfer(10), &opts).await.unwrap();
        assert_eq!(res.dry_run().map(DryRunOutcome::status), Some(DryRunStatus::NodeError));
        assert!(res.tx_ref().is_none());

        let err = pipeline.submit(&transfer(10), &TxOptions::default()).await.unwrap_err();
        assert!(matches!(err, TxError::DryRunFailed(_)));
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_force_send_after_node_error() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.set_node_down(true);
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default().with_force_send(true);
        let res = pipeline.submit(&transfer(10), &opts).await.unwrap();
        assert_eq!(res.dry_run().map(DryRunOutcome::status), Some(DryRunStatus::NodeError));
        assert!(res.receipt().unwrap().success);
        assert_eq!(chain.token_balance(receiver()), U256::from(10));
    }

    #[tokio::test]
    async fn test_force_send_after_revert_fails_on_chain() {
        let chain = funded_chain();
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default().with_force_send(true);
        let err = pipeline.submit(&transfer(10), &opts).await.unwrap_err();
        assert!(matches!(err, TxError::TransactionFailed(_)));
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let chain = Arc::new(MockChain::new());
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let pipeline = pipeline(&chain);

        match pipeline.submit(&transfer(10), &TxOptions::default()).await {
            Err(TxError::InsufficientBalance {
                address,
                required,
                available,
            }) => {
                assert_eq!(address, TEST_ADDRESS);
                // 60k gas at 120 wei
                assert_eq!(required, U256::from(7_200_000u64));
                assert_eq!(available, U256::ZERO);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_balance_check_counts_value() {
        let chain = Arc::new(MockChain::new());
        // enough for the fee, not for fee plus value
        chain.fund(TEST_ADDRESS, U256::from(90_000));
        let pipeline = pipeline(&chain);

        let call = PendingCall::transfer(receiver(), U256::from(5));
        let opts = TxOptions::default()
            .with_skip_dry_run(true)
            .with_gas_limit(30_000)
            .with_gas_price(3);

        match pipeline.submit(&call, &opts).await {
            Err(TxError::InsufficientBalance { required, .. }) => {
                assert_eq!(required, U256::from(90_005));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(chain.send_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overrides_reach_the_transaction() {
        let chain = funded_chain();
        let pipeline = pipeline(&chain);
        chain.set_nonce(TEST_ADDRESS, 7);

        let call = PendingCall::transfer(receiver(), U256::from(5));
        let opts = TxOptions::default()
            .with_gas_limit(30_000)
            .with_gas_price(3)
            .with_nonce(7);
        let res = pipeline.submit(&call, &opts).await.unwrap();

        assert_eq!(res.dry_run().unwrap().estimated_gas(), Some(30_000));
        assert_eq!(chain.native_balance(receiver()), U256::from(5));
        assert_eq!(chain.nonce_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_blocks() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default().with_confirmation_blocks(5);
        let res = pipeline.submit(&transfer(10), &opts).await.unwrap();
        let included = res.receipt().unwrap().block_number;
        assert!(chain.current_block() >= included + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmations_time_out() {
        let chain = MockChain::new();
        let receipt = Receipt {
            tx_hash: Default::default(),
            success: true,
            gas_used: 21_000,
            block_number: 1_000_000,
            block_hash: None,
        };
        let params = WaitParams {
            blocks_to_wait: 10,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
        };

        let err = wait_for_confirmations(&chain, &receipt, 1, &params).await.unwrap_err();
        assert!(matches!(err, TxError::TransactionTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_and_confirmations_share_one_timeout() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        // receipt shows up after ~5 polls, confirmations never complete
        chain.set_inclusion_delay(5);
        let pipeline = pipeline(&chain);

        let opts = TxOptions::default()
            .with_timeout(Duration::from_secs(30))
            .with_confirmation_blocks(1_000);
        let started = Instant::now();
        let err = pipeline.submit(&transfer(10), &opts).await.unwrap_err();

        assert!(matches!(err, TxError::TransactionTimeout { .. }));
        assert!(started.elapsed() <= Duration::from_secs(30));
        assert_eq!(chain.token_balance(receiver()), U256::from(10));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_distinct_nonces() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        let pipeline = pipeline(&chain);
        let opts = TxOptions::default();

        let (tx_a, tx_b) = (transfer(10), transfer(20));
        let (first, second) = tokio::join!(
            pipeline.submit(&tx_a, &opts),
            pipeline.submit(&tx_b, &opts)
        );
        assert!(first.unwrap().receipt().unwrap().success);
        assert!(second.unwrap().receipt().unwrap().success);
        assert_eq!(chain.token_balance(receiver()), U256::from(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_refetches_nonce() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.fail_next_sends(1);
        let pipeline = pipeline(&chain);

        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
        };
        let res = pipeline
            .submit_with_retry(&transfer(10), &TxOptions::default(), &policy)
            .await
            .unwrap();

        assert_eq!(res.attempts(), 2);
        assert_eq!(chain.nonce_calls.load(Ordering::SeqCst), 2);
        assert_eq!(chain.estimate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_nonce_source_released_on_failed_send() {
        let chain = funded_chain();
        chain.mint_tokens(TEST_ADDRESS, U256::from(100));
        chain.fail_next_sends(1);
        let pipeline = pipeline(&chain).with_nonce_source(NonceSource::local());

        assert!(pipeline.submit(&transfer(10), &TxOptions::default()).await.is_err());
        let res = pipeline.submit(&transfer(10), &TxOptions::default()).await.unwrap();
        assert!(res.receipt().unwrap().success);
    }
}
