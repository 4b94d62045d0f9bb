//! Defaults for gas, fees and waiting

use std::time::Duration;

/// Safety multiplier applied to `eth_estimateGas` results
pub const DEFAULT_GAS_MULTIPLIER: f64 = 1.2;

/// Multiplier applied to the node's suggested gas price / priority fee
pub const DEFAULT_GAS_PRICE_MULTIPLIER: f64 = 1.2;

/// Gas limit used when nothing better is known
pub const DEFAULT_GAS_LIMIT: u64 = 8_000_000;

/// Blocks to wait for a receipt before giving up
pub const DEFAULT_BLOCKS_TO_WAIT: u64 = 50;

/// Upper bound for any single wait (receipt, confirmations, queue completion)
pub const MAX_WAITING_TIME: Duration = Duration::from_secs(3600);

/// Interval between receipt / block polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default retry attempts for `retry_tx`
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First sleep of the exponential backoff
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Shortest sleep between retry attempts, whatever the schedule says
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Default priority for queue-backed submissions
pub const DEFAULT_PRIORITY: u32 = 1;

/// Static gas limits for SKALE manager operations, keyed by operation name.
///
/// Used when the dry run is skipped and the caller gave no explicit limit.
pub const DEFAULT_OPERATION_GAS_LIMITS: &[(&str, u64)] = &[
    ("transfer", 100_000),
    ("approve", 100_000),
    ("register_validator", 1_000_000),
    ("link_node_address", 300_000),
    ("delegate", 1_000_000),
    ("accept_pending_delegation", 1_500_000),
    ("request_undelegation", 1_500_000),
    ("create_node", 3_000_000),
    ("node_exit", 10_000_000),
    ("add_schain", 10_000_000),
    ("delete_schain", 7_000_000),
    ("complaint", 8_000_000),
    ("broadcast", 8_000_000),
    ("alright", 1_000_000),
];

/// Scale an integer amount by a floating point multiplier, rounding to nearest
pub fn apply_multiplier(value: u128, multiplier: f64) -> u128 {
    (value as f64 * multiplier).round() as u128
}
