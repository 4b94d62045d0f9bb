//! Wallet whose key lives in an SGX enclave (SKALE sgxwallet JSON-RPC)

use super::{
    ensure_sender, parse_public_key, require_hash, wait_for_receipt, PublicKey, SendHints,
    WaitParams, Wallet,
};
use crate::error::{SigningError, TxError};
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::types::{Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::hex;
use alloy::primitives::{eip191_hash_message, keccak256, Address, Signature, B256, U256};
use eyre::{Context, Result};
use reqwest::{Client, Identity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Client certificate and key the enclave expects for mutual TLS
#[derive(Debug, Clone)]
pub struct SgxCredentials {
    pub cert_pem: String,
    pub key_pem: String,
}

impl SgxCredentials {
    pub fn from_files(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert.as_ref())
            .with_context(|| format!("Failed to read {}", cert.as_ref().display()))?;
        let key_pem = std::fs::read_to_string(key.as_ref())
            .with_context(|| format!("Failed to read {}", key.as_ref().display()))?;
        Ok(Self { cert_pem, key_pem })
    }

    fn identity(&self) -> Result<Identity> {
        let pem = format!("{}\n{}", self.key_pem.trim(), self.cert_pem.trim());
        Identity::from_pem(pem.as_bytes()).context("Invalid SGX client certificate")
    }
}

// ========== JSON-RPC Types ==========

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Fields every sgxwallet result carries
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    status: i64,
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedKey {
    key_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyResult {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResult {
    signature_v: u8,
    signature_r: String,
    signature_s: String,
}

/// Key held by an sgxwallet, addressed by name
pub struct SgxWallet<R = AlloyRpc> {
    url: String,
    client: Client,
    key_name: String,
    address: Address,
    public_key: PublicKey,
    rpc: Arc<R>,
    next_id: AtomicU64,
}

impl SgxWallet<AlloyRpc> {
    pub async fn connect(
        url: impl Into<String>,
        key_name: Option<String>,
        credentials: Option<SgxCredentials>,
        rpc_url: impl AsRef<str>,
    ) -> Result<Self> {
        let rpc = AlloyRpc::connect(rpc_url)?;
        Self::new(url, key_name, credentials, Arc::new(rpc)).await
    }
}

impl<R: ChainRpc> SgxWallet<R> {
    /// Open `key_name`, or generate a fresh enclave key when none is given
    pub async fn new(
        url: impl Into<String>,
        key_name: Option<String>,
        credentials: Option<SgxCredentials>,
        rpc: Arc<R>,
    ) -> Result<Self> {
        // sgxwallet serves a self-signed certificate
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(true);
        if let Some(credentials) = &credentials {
            builder = builder.identity(credentials.identity()?);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        let mut wallet = Self {
            url: url.into(),
            client,
            key_name: String::new(),
            address: Address::ZERO,
            public_key: PublicKey::ZERO,
            rpc,
            next_id: AtomicU64::new(1),
        };

        wallet.key_name = match key_name {
            Some(name) => name,
            None => {
                let generated: GeneratedKey = wallet
                    .request("generateECDSAKey", json!({}))
                    .await
                    .context("Failed to generate enclave key")?;
                tracing::info!(key_name = %generated.key_name, "Generated SGX key");
                generated.key_name
            }
        };

        let result: PublicKeyResult = wallet
            .request("getPublicECDSAKey", json!({ "keyName": wallet.key_name }))
            .await
            .context("Failed to fetch enclave public key")?;
        wallet.public_key = parse_public_key(&result.public_key)?;
        wallet.address = Address::from_slice(&keccak256(wallet.public_key)[12..]);

        tracing::info!(address = %wallet.address, key_name = %wallet.key_name, "Opened SGX wallet");
        Ok(wallet)
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SigningError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SigningError::Unreachable {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let resp: RpcResponse = resp
            .json()
            .await
            .map_err(|e| SigningError::Malformed(format!("{method}: {e}")))?;

        if let Some(error) = resp.error {
            return Err(SigningError::Enclave(format!("{method}: {error}")));
        }
        let result = resp
            .result
            .ok_or_else(|| SigningError::Malformed(format!("{method}: empty result")))?;

        let status: Status = serde_json::from_value(result.clone())
            .map_err(|e| SigningError::Malformed(format!("{method}: {e}")))?;
        if status.status != 0 {
            return Err(SigningError::Enclave(format!(
                "{method} returned status {}: {}",
                status.status, status.error_message
            )));
        }

        serde_json::from_value(result).map_err(|e| SigningError::Malformed(format!("{method}: {e}")))
    }

    /// Sign a raw 32-byte digest inside the enclave
    async fn sign_digest(&self, digest: B256) -> Result<Signature, SigningError> {
        let result: SignatureResult = self
            .request(
                "ecdsaSignMessageHash",
                json!({
                    "base": 16,
                    "keyName": self.key_name,
                    "messageHash": hex::encode(digest),
                }),
            )
            .await?;

        let r = parse_scalar(&result.signature_r)?;
        let s = parse_scalar(&result.signature_s)?;
        let parity = match result.signature_v {
            v @ (0 | 1) => v,
            v @ (27 | 28) => v - 27,
            v => return Err(SigningError::Malformed(format!("unexpected v {v}"))),
        };
        let signature = Signature::new(r, s, parity == 1);

        let signer = signature
            .recover_address_from_prehash(&digest)
            .map_err(|e| SigningError::Malformed(format!("signature: {e}")))?;
        if signer != self.address {
            return Err(SigningError::Enclave(format!(
                "enclave signed with {signer}, expected {}",
                self.address
            )));
        }
        Ok(signature)
    }
}

/// Parse a hex scalar, with or without `0x`
fn parse_scalar(raw: &str) -> Result<U256, SigningError> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16),
        None => U256::from_str_radix(raw, 16),
    };
    parsed.map_err(|e| SigningError::Malformed(format!("scalar {raw:?}: {e}")))
}

impl<R: ChainRpc> Wallet for SgxWallet<R> {
    fn address(&self) -> Address {
        self.address
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    async fn sign(&self, tx: &UnsignedTx) -> Result<SignedTransaction, TxError> {
        ensure_sender(self.address, tx)?;

        let signable = tx.to_signable();
        let signature = self.sign_digest(signable.signature_hash()).await?;
        Ok(signable.into_signed(signature))
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature, TxError> {
        Ok(self.sign_digest(eip191_hash_message(hash)).await?)
    }

    async fn sign_and_send(&self, tx: &UnsignedTx, _hints: &SendHints) -> Result<TxRef, TxError> {
        let signed = self.sign(tx).await?;
        let tx_hash = self.rpc.send_raw_transaction(&signed.raw).await?;
        tracing::info!(tx_hash = %tx_hash, nonce = tx.nonce, "Sent transaction");

        Ok(TxRef::Hash(tx_hash))
    }

    async fn wait(&self, tx: &TxRef, params: &WaitParams) -> Result<Receipt, TxError> {
        let tx_hash = require_hash(tx, "SgxWallet")?;
        wait_for_receipt(&*self.rpc, tx_hash, params).await
    }
}
