//! Dry-run outcomes and the pipeline result type

use super::tx::{Receipt, TxRef};
use crate::error::TxError;
use alloy::primitives::TxHash;

/// Classification of a dry run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunStatus {
    WouldSucceed,
    WouldRevert,
    NodeError,
}

/// Result of simulating a pending call
///
/// Each variant carries exactly the data its status allows: a gas estimate only
/// on success, a decoded revert reason only on revert, raw diagnostics only
/// when the node could not simulate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunOutcome {
    WouldSucceed { estimated_gas: u64 },
    WouldRevert { reason: String },
    NodeError { error: String },
}

impl DryRunOutcome {
    pub fn status(&self) -> DryRunStatus {
        match self {
            DryRunOutcome::WouldSucceed { .. } => DryRunStatus::WouldSucceed,
            DryRunOutcome::WouldRevert { .. } => DryRunStatus::WouldRevert,
            DryRunOutcome::NodeError { .. } => DryRunStatus::NodeError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DryRunOutcome::WouldSucceed { .. })
    }

    pub fn estimated_gas(&self) -> Option<u64> {
        match self {
            DryRunOutcome::WouldSucceed { estimated_gas } => Some(*estimated_gas),
            _ => None,
        }
    }

    pub fn revert_reason(&self) -> Option<&str> {
        match self {
            DryRunOutcome::WouldRevert { reason } => Some(reason),
            _ => None,
        }
    }
}

/// What the pipeline hands back to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRes {
    dry_run: Option<DryRunOutcome>,
    tx: Option<TxRef>,
    receipt: Option<Receipt>,
    attempts: u32,
}

impl TxRes {
    /// Assemble a result; a receipt without a sent transaction is rejected
    pub fn new(
        dry_run: Option<DryRunOutcome>,
        tx: Option<TxRef>,
        receipt: Option<Receipt>,
    ) -> Result<Self, TxError> {
        if receipt.is_some() && tx.is_none() {
            return Err(TxError::InvalidArgument(
                "a receipt requires a transaction reference".to_string(),
            ));
        }

        Ok(Self {
            dry_run,
            tx,
            receipt,
            attempts: 1,
        })
    }

    pub fn dry_run(&self) -> Option<&DryRunOutcome> {
        self.dry_run.as_ref()
    }

    /// Handle returned by the wallet, if the transaction was sent
    pub fn tx_ref(&self) -> Option<&TxRef> {
        self.tx.as_ref()
    }

    /// Transaction hash, resolved through the receipt for queued submissions
    pub fn tx_hash(&self) -> Option<TxHash> {
        self.tx
            .as_ref()
            .and_then(TxRef::tx_hash)
            .or_else(|| self.receipt.as_ref().map(|r| r.tx_hash))
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        self.receipt.as_ref()
    }

    /// Pipeline invocations it took to produce this result
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Turn a failed result into the matching error
    ///
    /// The receipt wins over the dry run when both exist. Without either there
    /// is nothing to judge and the call is a no-op.
    pub fn raise_for_status(&self) -> Result<(), TxError> {
        if let Some(receipt) = &self.receipt {
            if !receipt.success {
                return Err(TxError::TransactionFailed(Box::new(receipt.clone())));
            }
            return Ok(());
        }

        match &self.dry_run {
            Some(DryRunOutcome::WouldRevert { reason }) => Err(TxError::DryRunRevert(reason.clone())),
            Some(DryRunOutcome::NodeError { error }) => Err(TxError::DryRunFailed(error.clone())),
            Some(DryRunOutcome::WouldSucceed { .. }) | None => Ok(()),
        }
    }
}
