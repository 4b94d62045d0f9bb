//! Data model shared by the pipeline and the wallets

mod call;
mod result;
mod tx;

pub use call::{PendingCall, TxOptions};
pub use result::{DryRunOutcome, DryRunStatus, TxRes};
pub use tx::{FeeParams, Receipt, SignedTransaction, TxRef, UnsignedTx};

pub(crate) use tx::SignableTx;
