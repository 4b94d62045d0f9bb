//! Local private key wallet

use super::{ensure_sender, require_hash, wait_for_receipt, PublicKey, SendHints, WaitParams, Wallet};
use crate::error::{SigningError, TxError};
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::types::{Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use eyre::{Context, Result};
use std::sync::Arc;

/// Wallet that signs with a raw secp256k1 key held in memory
pub struct LocalWallet<R = AlloyRpc> {
    signer: PrivateKeySigner,
    public_key: PublicKey,
    rpc: Arc<R>,
}

impl LocalWallet<AlloyRpc> {
    /// Create a wallet from a hex private key and an RPC endpoint URL
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let wallet = LocalWallet::connect("0x...", "https://mainnet.skalenodes.com/v1/...")?;
    /// ```
    pub fn connect(private_key: impl AsRef<str>, rpc_url: impl AsRef<str>) -> Result<Self> {
        let rpc = AlloyRpc::connect(rpc_url)?;
        Self::from_private_key(private_key, Arc::new(rpc))
    }
}

impl<R: ChainRpc> LocalWallet<R> {
    /// Create a wallet from a hex private key (with or without 0x prefix)
    pub fn from_private_key(private_key: impl AsRef<str>, rpc: Arc<R>) -> Result<Self> {
        let key = private_key.as_ref().trim();
        let key = key.strip_prefix("0x").unwrap_or(key);

        let signer: PrivateKeySigner = key.parse().context("Failed to parse private key")?;
        Ok(Self::new(signer, rpc))
    }

    pub fn new(signer: PrivateKeySigner, rpc: Arc<R>) -> Self {
        let point = signer.credential().verifying_key().to_encoded_point(false);
        let public_key = PublicKey::from_slice(&point.as_bytes()[1..]);

        Self {
            signer,
            public_key,
            rpc,
        }
    }

    /// Fresh random key, mostly useful for tests and throwaway accounts
    pub fn random(rpc: Arc<R>) -> Self {
        Self::new(PrivateKeySigner::random(), rpc)
    }
}

impl<R: ChainRpc> Wallet for LocalWallet<R> {
    fn address(&self) -> Address {
        self.signer.address()
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    async fn sign(&self, tx: &UnsignedTx) -> Result<SignedTransaction, TxError> {
        ensure_sender(self.address(), tx)?;

        let signable = tx.to_signable();
        let signature = self
            .signer
            .sign_hash_sync(&signable.signature_hash())
            .map_err(|e| SigningError::Local(e.to_string()))?;

        Ok(signable.into_signed(signature))
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature, TxError> {
        let signature = self
            .signer
            .sign_message_sync(hash.as_slice())
            .map_err(|e| SigningError::Local(e.to_string()))?;

        Ok(signature)
    }

    async fn sign_and_send(&self, tx: &UnsignedTx, _hints: &SendHints) -> Result<TxRef, TxError> {
        let signed = self.sign(tx).await?;
        let tx_hash = self.rpc.send_raw_transaction(&signed.raw).await?;
        tracing::info!(tx_hash = %tx_hash, nonce = tx.nonce, "Sent transaction");

        Ok(TxRef::Hash(tx_hash))
    }

    async fn wait(&self, tx: &TxRef, params: &WaitParams) -> Result<Receipt, TxError> {
        let tx_hash = require_hash(tx, "LocalWallet")?;
        wait_for_receipt(&*self.rpc, tx_hash, params).await
    }
}
