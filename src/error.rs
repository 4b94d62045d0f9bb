//! Error types for the transaction pipeline
//!
//! Setup code (parsing keys, connecting providers, reading the environment) uses
//! `eyre` for ergonomic error handling with context. Everything on the submission
//! path returns [`TxError`], a small closed set callers can match on.

pub use eyre::{eyre, Context, Report, Result};

use crate::types::{Receipt, TxRef};
use alloy::primitives::{Address, U256};
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the submission pipeline, the wallets and the retry wrapper.
#[derive(Debug, Error)]
pub enum TxError {
    /// The sender cannot cover `gas_limit * fee + value`.
    #[error("insufficient balance on {address}: {required} wei required, {available} wei available")]
    InsufficientBalance {
        address: Address,
        required: U256,
        available: U256,
    },

    /// The simulated call was rejected by contract logic.
    #[error("dry run reverted: {0}")]
    DryRunRevert(String),

    /// The simulation itself could not be performed.
    #[error("dry run failed: {0}")]
    DryRunFailed(String),

    /// The transaction was mined but reverted.
    #[error("transaction {} failed in block {}", .0.tx_hash, .0.block_number)]
    TransactionFailed(Box<Receipt>),

    /// The transaction never showed up on the node within the wait budget.
    #[error("transaction {0} not found")]
    TransactionNotFound(TxRef),

    /// The transaction is known to the node but was not mined (or confirmed) in time.
    #[error("timed out after {waited:?} waiting for transaction {tx}")]
    TransactionTimeout { tx: TxRef, waited: Duration },

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The wallet backend does not implement the requested capability.
    #[error("{wallet} does not support {operation}")]
    UnsupportedOperation {
        wallet: &'static str,
        operation: &'static str,
    },

    /// Transport or node failure outside of simulation.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Bad arguments or configuration supplied by the caller.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TxError {
    /// Whether the retry wrapper may re-run the pipeline after this error.
    ///
    /// Caller mistakes are surfaced immediately. Every transaction-layer failure,
    /// reverts included, is retried per the caller's policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TxError::InvalidArgument(_) | TxError::UnsupportedOperation { .. }
        )
    }

    pub(crate) fn rpc(context: &str, err: impl std::fmt::Display) -> Self {
        TxError::Rpc(format!("{context}: {err}"))
    }
}

/// A wallet backend failed to produce a signature.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("hardware wallet error: {0}")]
    Device(String),

    #[error("remote signer unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("remote signer rejected request: {0}")]
    Rejected(String),

    #[error("enclave signing failed: {0}")]
    Enclave(String),

    #[error("local signing failed: {0}")]
    Local(String),

    #[error("malformed signer response: {0}")]
    Malformed(String),
}

/// Failures reported by the transaction manager behind a queue-backed wallet.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transaction {id} was not sent: {message}")]
    NotSent { id: String, message: String },

    #[error("transaction {id} not found: {message}")]
    NotFound { id: String, message: String },

    #[error("transaction {id} failed: {message}")]
    Failed { id: String, message: String },

    #[error("no completion for {id} within {waited:?}")]
    Timeout { id: String, waited: Duration },

    #[error("broker error: {0}")]
    Broker(String),
}
