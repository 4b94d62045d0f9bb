//! Wallet chosen at runtime from configuration

use super::{
    LedgerWallet, LocalWallet, PublicKey, RemoteAuth, RemoteWallet, SendHints, SgxCredentials,
    SgxWallet, SpeculosTransport, WaitParams, Wallet,
};
use crate::error::TxError;
use crate::rpc::{AlloyRpc, ChainRpc};
use crate::types::{Receipt, SignedTransaction, TxRef, UnsignedTx};
use alloy::primitives::{Address, Signature, B256};
use eyre::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Which wallet backend to build, deserialized from a `type`-tagged map
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletConfig {
    Local {
        private_key: String,
    },
    /// Ledger reached through a Speculos APDU port (`host:port`)
    Ledger {
        emulator: String,
        #[serde(default)]
        index: u32,
        #[serde(default)]
        legacy: bool,
    },
    Remote {
        url: String,
        #[serde(default)]
        access_token: Option<String>,
        /// P-256 PEM for request signing, requires `access_token`
        #[serde(default)]
        request_key_pem: Option<String>,
    },
    Sgx {
        url: String,
        #[serde(default)]
        key_name: Option<String>,
        #[serde(default)]
        cert_path: Option<PathBuf>,
        #[serde(default)]
        key_path: Option<PathBuf>,
    },
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str(match self {
            WalletConfig::Local { .. } => "WalletConfig::Local",
            WalletConfig::Ledger { .. } => "WalletConfig::Ledger",
            WalletConfig::Remote { .. } => "WalletConfig::Remote",
            WalletConfig::Sgx { .. } => "WalletConfig::Sgx",
        })
    }
}

impl WalletConfig {
    /// Pick a backend from the environment (after loading `.env` if present)
    ///
    /// Checked in order: `SGX_WALLET_URL` (+ `SGX_KEY_NAME`, `SGX_CERT_PATH`,
    /// `SGX_KEY_PATH`), `SIGNER_URL` (+ `SIGNER_ACCESS_TOKEN`,
    /// `SIGNER_PRIVATE_KEY`), `LEDGER_EMULATOR` (+ `LEDGER_INDEX`,
    /// `LEDGER_LEGACY`), `ETH_PRIVATE_KEY`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(url) = var("SGX_WALLET_URL") {
            return Ok(WalletConfig::Sgx {
                url,
                key_name: var("SGX_KEY_NAME"),
                cert_path: var("SGX_CERT_PATH").map(PathBuf::from),
                key_path: var("SGX_KEY_PATH").map(PathBuf::from),
            });
        }

        if let Some(url) = var("SIGNER_URL") {
            return Ok(WalletConfig::Remote {
                url,
                access_token: var("SIGNER_ACCESS_TOKEN"),
                request_key_pem: var("SIGNER_PRIVATE_KEY"),
            });
        }

        if let Some(emulator) = var("LEDGER_EMULATOR") {
            let index = match var("LEDGER_INDEX") {
                Some(index) => index.parse().context("LEDGER_INDEX must be an integer")?,
                None => 0,
            };
            let legacy = var("LEDGER_LEGACY").is_some_and(|v| matches!(v.trim(), "1" | "true"));
            return Ok(WalletConfig::Ledger {
                emulator,
                index,
                legacy,
            });
        }

        let private_key = var("ETH_PRIVATE_KEY").ok_or_else(|| {
            eyre::eyre!("No wallet configured: set ETH_PRIVATE_KEY, SIGNER_URL, SGX_WALLET_URL or LEDGER_EMULATOR")
        })?;
        Ok(WalletConfig::Local { private_key })
    }
}

/// One of the signing backends, selected at runtime
pub enum AnyWallet<R = AlloyRpc> {
    Local(LocalWallet<R>),
    Ledger(LedgerWallet<R>),
    Remote(RemoteWallet<R>),
    Sgx(SgxWallet<R>),
}

impl<R: ChainRpc> AnyWallet<R> {
    /// Build the backend described by `config`, sending through `rpc`
    pub async fn connect(config: WalletConfig, rpc: Arc<R>) -> Result<Self> {
        let wallet = match config {
            WalletConfig::Local { private_key } => {
                AnyWallet::Local(LocalWallet::from_private_key(private_key, rpc)?)
            }
            WalletConfig::Ledger {
                emulator,
                index,
                legacy,
            } => {
                let transport = SpeculosTransport::connect(emulator).await?;
                AnyWallet::Ledger(LedgerWallet::new(Box::new(transport), index, legacy, rpc).await?)
            }
            WalletConfig::Remote {
                url,
                access_token,
                request_key_pem,
            } => {
                let auth = match (access_token, request_key_pem) {
                    (Some(token), Some(pem)) => Some(RemoteAuth::new(token, pem)?),
                    (None, None) => None,
                    _ => eyre::bail!("Remote signer auth needs both access_token and request_key_pem"),
                };
                AnyWallet::Remote(RemoteWallet::new(url, auth, rpc).await?)
            }
            WalletConfig::Sgx {
                url,
                key_name,
                cert_path,
                key_path,
            } => {
                let credentials = match (cert_path, key_path) {
                    (Some(cert), Some(key)) => Some(SgxCredentials::from_files(cert, key)?),
                    (None, None) => None,
                    _ => eyre::bail!("SGX client auth needs both cert_path and key_path"),
                };
                AnyWallet::Sgx(SgxWallet::new(url, key_name, credentials, rpc).await?)
            }
        };

        tracing::info!(kind = wallet.kind(), address = %wallet.address(), "Wallet ready");
        Ok(wallet)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnyWallet::Local(_) => "local",
            AnyWallet::Ledger(_) => "ledger",
            AnyWallet::Remote(_) => "remote",
            AnyWallet::Sgx(_) => "sgx",
        }
    }
}

impl AnyWallet<AlloyRpc> {
    /// Wallet from [`WalletConfig::from_env`] over an HTTP provider at `rpc_url`
    pub async fn from_env(rpc_url: impl AsRef<str>) -> Result<Self> {
        let rpc = AlloyRpc::connect(rpc_url)?;
        Self::connect(WalletConfig::from_env()?, Arc::new(rpc)).await
    }
}

impl<R: ChainRpc> Wallet for AnyWallet<R> {
    fn address(&self) -> Address {
        match self {
            AnyWallet::Local(w) => w.address(),
            AnyWallet::Ledger(w) => w.address(),
            AnyWallet::Remote(w) => w.address(),
            AnyWallet::Sgx(w) => w.address(),
        }
    }

    fn public_key(&self) -> PublicKey {
        match self {
            AnyWallet::Local(w) => w.public_key(),
            AnyWallet::Ledger(w) => w.public_key(),
            AnyWallet::Remote(w) => w.public_key(),
            AnyWallet::Sgx(w) => w.public_key(),
        }
    }

    async fn sign(&self, tx: &UnsignedTx) -> Result<SignedTransaction, TxError> {
        match self {
            AnyWallet::Local(w) => w.sign(tx).await,
            AnyWallet::Ledger(w) => w.sign(tx).await,
            AnyWallet::Remote(w) => w.sign(tx).await,
            AnyWallet::Sgx(w) => w.sign(tx).await,
        }
    }

    async fn sign_hash(&self, hash: B256) -> Result<Signature, TxError> {
        match self {
            AnyWallet::Local(w) => w.sign_hash(hash).await,
            AnyWallet::Ledger(w) => w.sign_hash(hash).await,
            AnyWallet::Remote(w) => w.sign_hash(hash).await,
            AnyWallet::Sgx(w) => w.sign_hash(hash).await,
        }
    }

    async fn sign_and_send(&self, tx: &UnsignedTx, hints: &SendHints) -> Result<TxRef, TxError> {
        match self {
            AnyWallet::Local(w) => w.sign_and_send(tx, hints).await,
            AnyWallet::Ledger(w) => w.sign_and_send(tx, hints).await,
            AnyWallet::Remote(w) => w.sign_and_send(tx, hints).await,
            AnyWallet::Sgx(w) => w.sign_and_send(tx, hints).await,
        }
    }

    async fn wait(&self, tx: &TxRef, params: &WaitParams) -> Result<Receipt, TxError> {
        match self {
            AnyWallet::Local(w) => w.wait(tx, params).await,
            AnyWallet::Ledger(w) => w.wait(tx, params).await,
            AnyWallet::Remote(w) => w.wait(tx, params).await,
            AnyWallet::Sgx(w) => w.wait(tx, params).await,
        }
    }
}
