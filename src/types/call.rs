//! Pending contract calls and per-call submission options

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use std::time::Duration;

/// An unsent, fully parameterized contract invocation
///
/// Built once by a contract wrapper and handed to
/// [`TxPipeline::submit`](crate::TxPipeline::submit). The fields are read-only
/// after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    to: Address,
    data: Bytes,
    value: U256,
    gas_limit: Option<u64>,
    operation: Option<String>,
}

impl PendingCall {
    /// Call `to` with raw calldata
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to,
            data: data.into(),
            value: U256::ZERO,
            gas_limit: None,
            operation: None,
        }
    }

    /// ABI-encode a typed call generated by `sol!`
    pub fn from_call<C: SolCall>(to: Address, call: &C) -> Self {
        Self::new(to, call.abi_encode())
    }

    /// Plain native-currency transfer
    pub fn transfer(to: Address, value: U256) -> Self {
        Self::new(to, Bytes::new())
            .with_value(value)
            .with_operation("transfer")
    }

    /// Attach native currency
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Pin the gas limit instead of estimating it
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Name the operation (key into the static gas table, forwarded to wallets)
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn gas_limit(&self) -> Option<u64> {
        self.gas_limit
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }
}

/// Options controlling one pipeline invocation
#[derive(Debug, Clone)]
pub struct TxOptions {
    /// Wait for the receipt after sending
    pub wait_for: bool,
    /// Blocks to wait for inclusion before giving up
    pub blocks_to_wait: Option<u64>,
    /// Ceiling for receipt and confirmation waits
    pub timeout: Option<Duration>,
    pub gas_limit: Option<u64>,
    /// Legacy gas price override (forces the legacy fee model)
    pub gas_price: Option<u128>,
    /// EIP-1559 max fee override (forces the EIP-1559 fee model)
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
    pub skip_dry_run: bool,
    /// Stop after the dry run, never send
    pub dry_run_only: bool,
    /// Send even if the dry run reverted or could not be performed
    pub force_send: bool,
    /// Convert a failed `TxRes` into an error before returning
    pub raise_for_status: bool,
    /// Fee multiplier override
    pub multiplier: Option<f64>,
    /// Priority hint for wallets that queue transactions
    pub priority: Option<u32>,
    /// Extra blocks to observe on top of the inclusion block
    pub confirmation_blocks: u64,
    /// Free-form metadata forwarded to queue-backed wallets
    pub meta: Option<serde_json::Value>,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            wait_for: true,
            blocks_to_wait: None,
            timeout: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: None,
            skip_dry_run: false,
            dry_run_only: false,
            force_send: false,
            raise_for_status: true,
            multiplier: None,
            priority: None,
            confirmation_blocks: 0,
            meta: None,
        }
    }
}

impl TxOptions {
    /// Send without waiting for the receipt
    pub fn fire_and_forget() -> Self {
        Self {
            wait_for: false,
            ..Default::default()
        }
    }

    /// Only simulate the call
    pub fn dry_run_only() -> Self {
        Self {
            dry_run_only: true,
            ..Default::default()
        }
    }

    pub fn with_wait_for(mut self, wait_for: bool) -> Self {
        self.wait_for = wait_for;
        self
    }

    pub fn with_skip_dry_run(mut self, skip: bool) -> Self {
        self.skip_dry_run = skip;
        self
    }

    pub fn with_force_send(mut self, force: bool) -> Self {
        self.force_send = force;
        self
    }

    pub fn with_raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_max_fees(mut self, max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_confirmation_blocks(mut self, blocks: u64) -> Self {
        self.confirmation_blocks = blocks;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_blocks_to_wait(mut self, blocks: u64) -> Self {
        self.blocks_to_wait = Some(blocks);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}
