//! SKALE transaction submission for Rust
//!
//! Builds, dry-runs, prices, signs, sends and confirms transactions against
//! SKALE manager contracts, with interchangeable wallet backends.
//!
//! # Features
//!
//! - Dry run every call before sending, with gas estimation and revert reasons
//! - Legacy and EIP-1559 fee resolution with per-call overrides
//! - Wallets: local key, Ledger, remote HTTP signer, SGX enclave, queue-backed
//! - Retry with backoff around the whole submission
//!
//! # Example
//!
//! ```rust,ignore
//! use skale_tx::{contracts::token, LocalWallet, TxConfig, TxOptions, TxPipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let rpc = Arc::new(skale_tx::AlloyRpc::connect("http://localhost:8545")?);
//!     let wallet = Arc::new(LocalWallet::from_private_key("0x...", rpc.clone())?);
//!     let pipeline = TxPipeline::new(rpc, wallet, TxConfig::default());
//!
//!     let call = token::transfer(token_address, recipient, amount);
//!     let res = pipeline.submit(&call, &TxOptions::default()).await?;
//!     println!("{:?}", res.tx_hash());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod contracts;
pub mod dry_run;
pub mod error;
pub mod gas;
pub mod pipeline;
pub mod retry;
pub mod rpc;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod test_utils;

// Re-export main types for convenience
pub use config::{FeeModel, NetworkConfig, TxConfig};
pub use dry_run::DryRunExecutor;
pub use error::{eyre, Context, QueueError, Report, Result, SigningError, TxError};
pub use gas::NonceSource;
pub use pipeline::TxPipeline;
pub use retry::{retry_tx, Backoff, RetryPolicy};
pub use rpc::{AlloyRpc, ChainRpc};
pub use types::{
    DryRunOutcome, DryRunStatus, FeeParams, PendingCall, Receipt, SignedTransaction, TxOptions,
    TxRef, TxRes, UnsignedTx,
};
pub use wallet::{
    AnyWallet, LedgerWallet, LocalWallet, QueueWallet, RemoteWallet, SgxWallet, Wallet,
    WalletConfig,
};
