//! Wallet abstraction for the transaction pipeline
//!
//! A wallet is a capability set: derive an address and public key, sign a
//! transaction, sign a hash, sign-and-send, and wait for inclusion. Backends:
//!
//! - [`LocalWallet`]: secp256k1 private key held in memory
//! - [`LedgerWallet`]: hardware device speaking the APDU protocol
//! - [`RemoteWallet`]: HTTP signing service
//! - [`SgxWallet`]: key held inside an SGX enclave, referenced by name
//! - [`QueueWallet`]: hands transactions to a transaction manager over a broker
//!
//! [`AnyWallet`] wraps the first four behind one tagged type.

mod any;
mod ledger;
mod local;
mod queue;
mod remote;
mod sgx;

pub use any::{AnyWallet, WalletConfig};
pub use ledger::{
    derivation_path, encode_bip32_path, sign_frames, ApduTransport, LedgerWallet,
    SpeculosTransport, CHUNK_SIZE,
};
pub use local::LocalWallet;
pub use queue::{
    score, ChannelBroker, Completion, QueueFailure, QueueWallet, Subscription, TxBroker,
};
pub use remote::{RemoteAuth, RemoteWallet};
pub use sgx::{SgxCredentials, SgxWallet};

use crate::constants::{DEFAULT_BLOCKS_TO_WAIT, DEFAULT_POLL_INTERVAL, MAX_WAITING_TIME};
use crate::error::{SigningError, TxError};
use crate::rpc::ChainRpc;
use crate::types::{Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::hex;
use alloy::primitives::{Address, Signature, TxHash, B256, B512};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Uncompressed secp256k1 public key without the `0x04` prefix
pub type PublicKey = B512;

/// Hints forwarded opaquely to the wallet on `sign_and_send`
///
/// Only backends that queue or replace transactions make use of them.
#[derive(Debug, Clone, Default)]
pub struct SendHints {
    pub multiplier: Option<f64>,
    pub priority: Option<u32>,
    pub operation: Option<String>,
    pub meta: Option<serde_json::Value>,
}

/// Bounds for waiting on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitParams {
    /// Blocks to observe before declaring the transaction missing
    pub blocks_to_wait: u64,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitParams {
    /// Same bounds with `elapsed` taken off the timeout
    pub fn remaining_after(&self, elapsed: Duration) -> Self {
        Self {
            timeout: self.timeout.saturating_sub(elapsed),
            ..*self
        }
    }
}

impl Default for WaitParams {
    fn default() -> Self {
        Self {
            blocks_to_wait: DEFAULT_BLOCKS_TO_WAIT,
            timeout: MAX_WAITING_TIME,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Signing and sending capability shared by every backend
///
/// `address` and `public_key` are resolved when the wallet is built and never
/// touch the network afterwards.
pub trait Wallet: Send + Sync {
    /// Returns the wallet's EVM address
    fn address(&self) -> Address;

    fn public_key(&self) -> PublicKey;

    /// Signs a fully resolved transaction
    fn sign(
        &self,
        tx: &UnsignedTx,
    ) -> impl Future<Output = Result<SignedTransaction, TxError>> + Send;

    /// Signs `hash` as an EIP-191 personal message
    ///
    /// Backends without this capability return [`TxError::UnsupportedOperation`].
    fn sign_hash(&self, hash: B256) -> impl Future<Output = Result<Signature, TxError>> + Send;

    /// Signs and broadcasts, returning a handle to pass to [`Wallet::wait`]
    fn sign_and_send(
        &self,
        tx: &UnsignedTx,
        hints: &SendHints,
    ) -> impl Future<Output = Result<TxRef, TxError>> + Send;

    /// Waits until the transaction behind `tx` is mined
    fn wait(
        &self,
        tx: &TxRef,
        params: &WaitParams,
    ) -> impl Future<Output = Result<Receipt, TxError>> + Send;
}

/// Poll for a receipt until it shows up, the block budget is used, or time runs out
///
/// On give-up the node is asked whether it knows the transaction: a known but
/// unmined transaction is a timeout, an unknown one was never broadcast (or was
/// dropped) and is reported as not found.
pub async fn wait_for_receipt<R: ChainRpc>(
    rpc: &R,
    tx_hash: TxHash,
    params: &WaitParams,
) -> Result<Receipt, TxError> {
    let started = Instant::now();
    let start_block = rpc.block_number().await?;
    let mut current_block = start_block;

    loop {
        if let Some(receipt) = rpc.transaction_receipt(tx_hash).await? {
            return Ok(receipt);
        }

        let waited = started.elapsed();
        if waited >= params.timeout
            || current_block > start_block.saturating_add(params.blocks_to_wait)
        {
            break;
        }

        tokio::time::sleep(params.poll_interval.min(params.timeout - waited)).await;
        current_block = rpc.block_number().await?;
    }

    let tx = TxRef::Hash(tx_hash);
    if rpc.transaction_known(tx_hash).await? {
        tracing::warn!(tx_hash = %tx_hash, "Transaction pending but not mined in time");
        Err(TxError::TransactionTimeout {
            tx,
            waited: started.elapsed(),
        })
    } else {
        tracing::warn!(tx_hash = %tx_hash, "Transaction not found");
        Err(TxError::TransactionNotFound(tx))
    }
}

/// Resolve a wallet handle to a hash; only queue tickets lack one
pub(crate) fn require_hash(tx: &TxRef, wallet: &'static str) -> Result<TxHash, TxError> {
    tx.tx_hash().ok_or_else(|| {
        TxError::InvalidArgument(format!("{wallet} cannot wait on queue ticket {tx}"))
    })
}

/// Refuse to sign drafts prepared for another sender
pub(crate) fn ensure_sender(wallet: Address, tx: &UnsignedTx) -> Result<(), TxError> {
    if tx.from != wallet {
        return Err(TxError::InvalidArgument(format!(
            "transaction sender {} does not match wallet {}",
            tx.from, wallet
        )));
    }
    Ok(())
}

/// Parse a hex public key, accepting an optional `0x` and `04` prefix
pub(crate) fn parse_public_key(raw: &str) -> Result<PublicKey, SigningError> {
    let bytes = hex::decode(raw.trim()).map_err(|e| SigningError::Malformed(format!("public key: {e}")))?;

    match bytes.len() {
        64 => Ok(PublicKey::from_slice(&bytes)),
        65 if bytes[0] == 0x04 => Ok(PublicKey::from_slice(&bytes[1..])),
        len => Err(SigningError::Malformed(format!(
            "public key has {len} bytes, expected 64"
        ))),
    }
}
