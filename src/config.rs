//! Network and pipeline configuration
//!
//! Everything the pipeline needs is passed in explicitly through these structs;
//! `from_env` constructors exist for scripts that keep settings in `.env`.

use crate::constants::{
    DEFAULT_BLOCKS_TO_WAIT, DEFAULT_GAS_LIMIT, DEFAULT_GAS_MULTIPLIER,
    DEFAULT_GAS_PRICE_MULTIPLIER, DEFAULT_OPERATION_GAS_LIMITS, DEFAULT_POLL_INTERVAL,
    MAX_WAITING_TIME,
};
use eyre::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Network configuration: which chain and which RPC endpoint
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Chain ID used when signing
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: String,
}

impl NetworkConfig {
    pub fn new(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            rpc_url: rpc_url.into(),
        }
    }

    /// Read `ENDPOINT` and `CHAIN_ID` (after loading `.env` if present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let rpc_url = std::env::var("ENDPOINT").context("ENDPOINT environment variable must be set")?;
        let chain_id = std::env::var("CHAIN_ID")
            .context("CHAIN_ID environment variable must be set")?
            .parse()
            .context("CHAIN_ID must be an integer")?;

        Ok(Self { chain_id, rpc_url })
    }

    /// Replace the RPC URL
    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }
}

/// How transaction fees are priced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeeModel {
    /// Single `gasPrice`
    #[default]
    Legacy,
    /// `maxFeePerGas` / `maxPriorityFeePerGas`
    Eip1559,
}

/// Submission pipeline settings
#[derive(Debug, Clone)]
pub struct TxConfig {
    /// Skip the dry run for every call
    pub disable_dry_run: bool,
    /// Multiplier applied to gas estimates
    pub gas_multiplier: f64,
    /// Multiplier applied to suggested gas price / priority fee
    pub gas_price_multiplier: f64,
    pub fee_model: FeeModel,
    /// Fixed gas price used instead of the node's suggestion (legacy model only)
    pub default_gas_price: Option<u128>,
    /// Gas limit used when no estimate, override or table entry exists
    pub default_gas_limit: u64,
    /// Static per-operation gas limits
    pub gas_limits: HashMap<String, u64>,
    pub blocks_to_wait: u64,
    pub max_waiting_time: Duration,
    pub poll_interval: Duration,
    /// Refuse to send when the sender cannot pay for gas and value
    pub check_balance: bool,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            disable_dry_run: false,
            gas_multiplier: DEFAULT_GAS_MULTIPLIER,
            gas_price_multiplier: DEFAULT_GAS_PRICE_MULTIPLIER,
            fee_model: FeeModel::Legacy,
            default_gas_price: None,
            default_gas_limit: DEFAULT_GAS_LIMIT,
            gas_limits: DEFAULT_OPERATION_GAS_LIMITS
                .iter()
                .map(|(name, gas)| (name.to_string(), *gas))
                .collect(),
            blocks_to_wait: DEFAULT_BLOCKS_TO_WAIT,
            max_waiting_time: MAX_WAITING_TIME,
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_balance: true,
        }
    }
}

impl TxConfig {
    /// Defaults overridden by `DISABLE_DRY_RUN` and `DEFAULT_GAS_PRICE_WEI`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(flag) = std::env::var("DISABLE_DRY_RUN") {
            config.disable_dry_run = matches!(flag.trim(), "1" | "true" | "True" | "TRUE");
        }

        if let Ok(price) = std::env::var("DEFAULT_GAS_PRICE_WEI") {
            let price = price
                .trim()
                .parse()
                .context("DEFAULT_GAS_PRICE_WEI must be an integer")?;
            config.default_gas_price = Some(price);
        }

        Ok(config)
    }

    pub fn with_fee_model(mut self, fee_model: FeeModel) -> Self {
        self.fee_model = fee_model;
        self
    }

    pub fn with_dry_run_disabled(mut self, disabled: bool) -> Self {
        self.disable_dry_run = disabled;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set (or replace) the static gas limit of one operation
    pub fn with_gas_limit(mut self, operation: impl Into<String>, gas: u64) -> Self {
        self.gas_limits.insert(operation.into(), gas);
        self
    }

    /// Static gas limit for an operation, falling back to the global default
    pub fn static_gas_limit(&self, operation: Option<&str>) -> u64 {
        operation
            .and_then(|name| self.gas_limits.get(name).copied())
            .unwrap_or(self.default_gas_limit)
    }
}
