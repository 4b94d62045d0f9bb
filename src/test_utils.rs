//! In-memory chain used by unit tests

use crate::contracts::IERC20;
use crate::error::TxError;
use crate::rpc::{BlockFees, CallFailure, CallRequest, ChainRpc};
use crate::types::{FeeParams, Receipt, UnsignedTx};
use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{address, Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::SolCall;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Anvil's first development key
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_ADDRESS: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub const TEST_CHAIN_ID: u64 = 1_351_057_110;
pub const TOKEN: Address = address!("1111111111111111111111111111111111111111");
pub const TRANSFER_GAS: u64 = 50_000;
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

const INSUFFICIENT_TOKENS: &str = "ERC20: transfer amount exceeds balance";

/// Legacy transfer draft from `from` with the given nonce
pub fn draft(from: Address, nonce: u64) -> UnsignedTx {
    UnsignedTx {
        from,
        to: Address::repeat_byte(0x22),
        value: U256::from(1),
        data: Bytes::new(),
        gas_limit: NATIVE_TRANSFER_GAS,
        nonce,
        chain_id: TEST_CHAIN_ID,
        fees: FeeParams::Legacy { gas_price: 1 },
    }
}

struct ChainState {
    block: u64,
    block_gas_limit: u64,
    base_fee: Option<u64>,
    gas_price: u128,
    priority_fee: u128,
    native: HashMap<Address, U256>,
    tokens: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    pending: HashSet<TxHash>,
    estimate_override: Option<u64>,
    node_down: bool,
    fail_sends: usize,
    revert_on_chain: bool,
    mine: bool,
    inclusion_delay: u64,
}

/// Token ledger, nonces, balances and receipts behind [`ChainRpc`]
///
/// Every `block_number` call advances the chain by one block so waits always
/// make progress. Sent transactions are decoded, their signer recovered, and
/// ERC-20 transfers to [`TOKEN`] applied to the token ledger.
pub struct MockChain {
    state: Mutex<ChainState>,
    pub nonce_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub estimate_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                block: 100,
                block_gas_limit: 30_000_000,
                base_fee: Some(10),
                gas_price: 100,
                priority_fee: 2,
                native: HashMap::new(),
                tokens: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                pending: HashSet::new(),
                estimate_override: None,
                node_down: false,
                fail_sends: 0,
                revert_on_chain: false,
                mine: true,
                inclusion_delay: 0,
            }),
            nonce_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            estimate_calls: AtomicUsize::new(0),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn fund(&self, who: Address, amount: U256) {
        self.with_state(|s| s.native.insert(who, amount));
    }

    pub fn mint_tokens(&self, who: Address, amount: U256) {
        self.with_state(|s| s.tokens.insert(who, amount));
    }

    pub fn token_balance(&self, who: Address) -> U256 {
        self.with_state(|s| s.tokens.get(&who).copied().unwrap_or_default())
    }

    pub fn native_balance(&self, who: Address) -> U256 {
        self.with_state(|s| s.native.get(&who).copied().unwrap_or_default())
    }

    pub fn set_nonce(&self, who: Address, nonce: u64) {
        self.with_state(|s| s.nonces.insert(who, nonce));
    }

    pub fn set_block_gas_limit(&self, gas_limit: u64) {
        self.with_state(|s| s.block_gas_limit = gas_limit);
    }

    pub fn set_base_fee(&self, base_fee: Option<u64>) {
        self.with_state(|s| s.base_fee = base_fee);
    }

    pub fn set_estimate(&self, gas: u64) {
        self.with_state(|s| s.estimate_override = Some(gas));
    }

    pub fn set_node_down(&self, down: bool) {
        self.with_state(|s| s.node_down = down);
    }

    /// Reject the next `count` broadcasts with a transport error
    pub fn fail_next_sends(&self, count: usize) {
        self.with_state(|s| s.fail_sends = count);
    }

    /// Mine transactions with a failed status
    pub fn set_revert_on_chain(&self, revert: bool) {
        self.with_state(|s| s.revert_on_chain = revert);
    }

    /// Keep broadcasts in the mempool forever
    pub fn set_mining(&self, mine: bool) {
        self.with_state(|s| s.mine = mine);
    }

    /// Include broadcasts `blocks` blocks later than the next one
    pub fn set_inclusion_delay(&self, blocks: u64) {
        self.with_state(|s| s.inclusion_delay = blocks);
    }

    pub fn add_pending(&self, hash: TxHash) {
        self.with_state(|s| s.pending.insert(hash));
    }

    pub fn current_block(&self) -> u64 {
        self.with_state(|s| s.block)
    }

    fn simulate(&self, request: &CallRequest) -> Result<u64, CallFailure> {
        self.with_state(|s| {
            if s.node_down {
                return Err(CallFailure::Node("connection refused".to_string()));
            }

            if request.to == TOKEN {
                let call = IERC20::transferCall::abi_decode(&request.data)
                    .map_err(|e| CallFailure::Node(format!("malformed call: {e}")))?;
                let balance = s.tokens.get(&request.from).copied().unwrap_or_default();
                if balance < call.amount {
                    return Err(CallFailure::Revert {
                        reason: INSUFFICIENT_TOKENS.to_string(),
                    });
                }
                return Ok(s.estimate_override.unwrap_or(TRANSFER_GAS));
            }

            Ok(s.estimate_override.unwrap_or(NATIVE_TRANSFER_GAS))
        })
    }
}

impl ChainRpc for MockChain {
    async fn chain_id(&self) -> Result<u64, TxError> {
        Ok(TEST_CHAIN_ID)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, CallFailure> {
        if request.to == TOKEN {
            if let Ok(query) = IERC20::balanceOfCall::abi_decode(&request.data) {
                let balance = self.token_balance(query.account);
                return Ok(IERC20::balanceOfCall::abi_encode_returns(&balance).into());
            }
        }
        self.simulate(request).map(|_| Bytes::new())
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, CallFailure> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate(request)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, TxError> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_state(|s| s.nonces.get(&address).copied().unwrap_or_default()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, TxError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);

        let mut buf = raw;
        let envelope = TxEnvelope::decode_2718(&mut buf)
            .map_err(|e| TxError::Rpc(format!("invalid raw transaction: {e}")))?;
        let sender = envelope
            .recover_signer()
            .map_err(|e| TxError::Rpc(format!("invalid signature: {e}")))?;
        let hash = *envelope.tx_hash();

        self.with_state(|s| {
            if s.fail_sends > 0 {
                s.fail_sends -= 1;
                return Err(TxError::Rpc("connection reset by peer".to_string()));
            }

            let expected = s.nonces.get(&sender).copied().unwrap_or_default();
            if envelope.nonce() != expected {
                return Err(TxError::Rpc(format!(
                    "nonce too low: expected {expected}, got {}",
                    envelope.nonce()
                )));
            }
            s.nonces.insert(sender, expected + 1);

            if !s.mine {
                s.pending.insert(hash);
                return Ok(hash);
            }

            let mut success = !s.revert_on_chain;
            let to = envelope.to().unwrap_or_default();

            if success && to == TOKEN {
                match IERC20::transferCall::abi_decode(envelope.input()) {
                    Ok(call) => {
                        let from_balance = s.tokens.get(&sender).copied().unwrap_or_default();
                        if from_balance >= call.amount {
                            s.tokens.insert(sender, from_balance - call.amount);
                            *s.tokens.entry(call.to).or_default() += call.amount;
                        } else {
                            success = false;
                        }
                    }
                    Err(_) => success = false,
                }
            } else if success {
                let from_balance = s.native.get(&sender).copied().unwrap_or_default();
                let value = envelope.value();
                if from_balance >= value {
                    s.native.insert(sender, from_balance - value);
                    *s.native.entry(to).or_default() += value;
                } else {
                    success = false;
                }
            }

            let block_number = s.block + 1 + s.inclusion_delay;
            s.receipts.insert(
                hash,
                Receipt {
                    tx_hash: hash,
                    success,
                    gas_used: envelope.gas_limit().min(TRANSFER_GAS),
                    block_number,
                    block_hash: Some(B256::repeat_byte((block_number % 256) as u8)),
                },
            );
            Ok(hash)
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, TxError> {
        Ok(self.with_state(|s| {
            s.receipts
                .get(&hash)
                .filter(|r| r.block_number <= s.block + 1)
                .cloned()
        }))
    }

    async fn transaction_known(&self, hash: TxHash) -> Result<bool, TxError> {
        Ok(self.with_state(|s| s.pending.contains(&hash) || s.receipts.contains_key(&hash)))
    }

    async fn block_number(&self) -> Result<u64, TxError> {
        Ok(self.with_state(|s| {
            s.block += 1;
            s.block
        }))
    }

    async fn gas_price(&self) -> Result<u128, TxError> {
        Ok(self.with_state(|s| s.gas_price))
    }

    async fn max_priority_fee_per_gas(&self) -> Result<u128, TxError> {
        Ok(self.with_state(|s| s.priority_fee))
    }

    async fn latest_block_fees(&self) -> Result<BlockFees, TxError> {
        Ok(self.with_state(|s| BlockFees {
            gas_limit: s.block_gas_limit,
            base_fee: s.base_fee,
        }))
    }

    async fn balance(&self, address: Address) -> Result<U256, TxError> {
        Ok(self.native_balance(address))
    }
}
