//! Transaction drafts, signed transactions and receipts

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, Signature, TxHash, TxKind, B256, U256};
use alloy::rpc::types::TransactionReceipt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee fields of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

impl FeeParams {
    /// Highest price per gas the sender may pay
    pub fn max_price_per_gas(&self) -> u128 {
        match self {
            FeeParams::Legacy { gas_price } => *gas_price,
            FeeParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// A fully resolved transaction, ready to be signed
///
/// Serializes with the field names JSON-RPC signers expect (`gas`, `chainId`,
/// `gasPrice` / `maxFeePerGas`, ...). The fee model is read back from which
/// fee fields are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "TransactionDict", try_from = "TransactionDict")]
pub struct UnsignedTx {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub gas_limit: u64,
    pub nonce: u64,
    pub chain_id: u64,
    pub fees: FeeParams,
}

/// Flat JSON shape of [`UnsignedTx`]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDict {
    from: Address,
    to: Address,
    value: U256,
    data: Bytes,
    gas: u64,
    nonce: u64,
    chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_price: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_priority_fee_per_gas: Option<u128>,
}

impl From<UnsignedTx> for TransactionDict {
    fn from(tx: UnsignedTx) -> Self {
        let (gas_price, max_fee_per_gas, max_priority_fee_per_gas) = match tx.fees {
            FeeParams::Legacy { gas_price } => (Some(gas_price), None, None),
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (None, Some(max_fee_per_gas), Some(max_priority_fee_per_gas)),
        };

        Self {
            from: tx.from,
            to: tx.to,
            value: tx.value,
            data: tx.data,
            gas: tx.gas_limit,
            nonce: tx.nonce,
            chain_id: tx.chain_id,
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }
    }
}

impl TryFrom<TransactionDict> for UnsignedTx {
    type Error = String;

    fn try_from(dict: TransactionDict) -> Result<Self, Self::Error> {
        let fees = match (dict.gas_price, dict.max_fee_per_gas, dict.max_priority_fee_per_gas) {
            (Some(gas_price), None, None) => FeeParams::Legacy { gas_price },
            (None, Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
            _ => {
                return Err(
                    "expected either gasPrice or maxFeePerGas with maxPriorityFeePerGas".to_string(),
                )
            }
        };

        Ok(Self {
            from: dict.from,
            to: dict.to,
            value: dict.value,
            data: dict.data,
            gas_limit: dict.gas,
            nonce: dict.nonce,
            chain_id: dict.chain_id,
            fees,
        })
    }
}

impl UnsignedTx {
    /// Worst-case cost: `gas_limit * max price + value`
    pub fn max_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.fees.max_price_per_gas()) + self.value
    }

    pub(crate) fn to_signable(&self) -> SignableTx {
        match self.fees {
            FeeParams::Legacy { gas_price } => SignableTx::Legacy(TxLegacy {
                chain_id: Some(self.chain_id),
                nonce: self.nonce,
                gas_price,
                gas_limit: self.gas_limit,
                to: TxKind::Call(self.to),
                value: self.value,
                input: self.data.clone(),
            }),
            FeeParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => SignableTx::Eip1559(TxEip1559 {
                chain_id: self.chain_id,
                nonce: self.nonce,
                gas_limit: self.gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                to: TxKind::Call(self.to),
                value: self.value,
                access_list: Default::default(),
                input: self.data.clone(),
            }),
        }
    }
}

/// Consensus transaction in the shape a signer consumes
pub(crate) enum SignableTx {
    Legacy(TxLegacy),
    Eip1559(TxEip1559),
}

impl SignableTx {
    /// Hash a software signer signs
    pub fn signature_hash(&self) -> B256 {
        match self {
            SignableTx::Legacy(tx) => tx.signature_hash(),
            SignableTx::Eip1559(tx) => tx.signature_hash(),
        }
    }

    /// Pre-image of the signature hash (EIP-155 RLP, or `0x02 || rlp`)
    pub fn encoded_for_signing(&self) -> Vec<u8> {
        match self {
            SignableTx::Legacy(tx) => tx.encoded_for_signing(),
            SignableTx::Eip1559(tx) => tx.encoded_for_signing(),
        }
    }

    pub fn into_signed(self, signature: Signature) -> SignedTransaction {
        let envelope: TxEnvelope = match self {
            SignableTx::Legacy(tx) => tx.into_signed(signature).into(),
            SignableTx::Eip1559(tx) => tx.into_signed(signature).into(),
        };

        SignedTransaction {
            raw: envelope.encoded_2718().into(),
            hash: *envelope.tx_hash(),
            signature,
        }
    }
}

/// Output of a wallet's `sign`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// EIP-2718 encoded transaction, ready for `eth_sendRawTransaction`
    pub raw: Bytes,
    pub hash: TxHash,
    pub signature: Signature,
}

/// Handle returned by `sign_and_send`
///
/// Most wallets return the transaction hash directly; queue-backed wallets hand
/// out a ticket that only resolves to a hash once the transaction manager
/// reports completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TxRef {
    Hash(TxHash),
    Ticket(String),
}

impl TxRef {
    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            TxRef::Hash(hash) => Some(*hash),
            TxRef::Ticket(_) => None,
        }
    }
}

impl From<TxHash> for TxRef {
    fn from(hash: TxHash) -> Self {
        TxRef::Hash(hash)
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRef::Hash(hash) => write!(f, "{hash}"),
            TxRef::Ticket(id) => write!(f, "{id}"),
        }
    }
}

/// Inclusion result of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// Execution status reported by the network
    pub success: bool,
    pub gas_used: u64,
    pub block_number: u64,
    pub block_hash: Option<B256>,
}

impl From<&TransactionReceipt> for Receipt {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            gas_used: receipt.gas_used,
            block_number: receipt.block_number.unwrap_or_default(),
            block_hash: receipt.block_hash,
        }
    }
}
