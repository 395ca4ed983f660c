//! System-wide constants for the Worpx ledger core.

/// Minimum fixed-point scale for amounts (6 decimal places).
pub const AMOUNT_SCALE: u32 = 6;

/// Maximum accepted fractional digits on an incoming amount.
pub const MAX_AMOUNT_SCALE: u32 = 18;

/// Reconciliation epsilon as a scaled integer: `1 × 10^-6`.
pub const RECONCILE_EPSILON_UNITS: i64 = 1;

/// Default channel dispute window in seconds (24h).
pub const DEFAULT_CHANNEL_DISPUTE_WINDOW_SECS: i64 = 86_400;

/// Default escrow lock time-to-live in seconds (1h).
pub const DEFAULT_ESCROW_TTL_SECS: i64 = 3_600;

/// Default mempool capacity.
pub const DEFAULT_MEMPOOL_MAX_SIZE: usize = 10_000;

/// Default maximum age of a mempool entry in seconds (10 minutes).
pub const DEFAULT_MEMPOOL_MAX_AGE_SECS: i64 = 600;

/// Number of deduplication keys the mempool remembers.
pub const DEFAULT_MEMPOOL_DEDUP_WINDOW: usize = 100_000;

/// Default number of entries per settlement batch.
pub const DEFAULT_SETTLEMENT_BATCH_SIZE: usize = 50;

/// Default number of resubmissions allowed for a chain-rejected batch.
pub const DEFAULT_SETTLEMENT_MAX_RETRIES: u32 = 3;

/// Default settlement interval in seconds before a partial batch is flushed.
pub const DEFAULT_SETTLEMENT_INTERVAL_SECS: i64 = 30;

/// Settlement entry idempotency cache size per chain.
pub const SETTLEMENT_IDEMPOTENCY_CACHE_SIZE: usize = 500_000;

/// Default dispute evidence window in seconds (24h).
pub const DEFAULT_EVIDENCE_WINDOW_SECS: i64 = 86_400;

/// Default dispute arbitration window in seconds (48h).
pub const DEFAULT_ARBITRATION_WINDOW_SECS: i64 = 172_800;

/// Default sweep period for the background sweeper in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Worpx";
