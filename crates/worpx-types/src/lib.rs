//! # worpx-types
//!
//! Shared types, errors, and configuration for the **Worpx** agent payment
//! ledger.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`ChannelId`], [`EscrowId`], [`EntryId`], [`BatchId`], [`DisputeId`], [`ReportId`], [`AgentId`], [`Chain`]
//! - **Channel model**: [`Channel`], [`ChannelPhase`], [`PaymentReceipt`]
//! - **Escrow model**: [`EscrowDeposit`], [`EscrowStatus`], [`ReleaseCondition`]
//! - **Transfer model**: [`TransferIntent`], [`MempoolEntry`], [`DedupKey`], [`MempoolStats`]
//! - **Settlement model**: [`SettlementEntry`], [`SettlementBatch`], [`BatchStatus`]
//! - **Reconciliation model**: [`ReconcileRecord`], [`ReconciliationReport`]
//! - **Dispute model**: [`Dispute`], [`DisputeStatus`], [`Evidence`], [`Resolution`]
//! - **Infrastructure**: [`EntityStore`], [`MemoryStore`], [`Clock`], [`IdempotencyGuard`]
//! - **Configuration**: [`LedgerConfig`] and its per-component sections
//! - **Errors**: [`WorpxError`] with `WX_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod amount;
pub mod channel;
pub mod clock;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod dispute;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod reconciliation;
pub mod settlement;
pub mod store;
pub mod transfer;

// Re-export all primary types at crate root for ergonomic imports:
//   use worpx_types::{Channel, ChannelPhase, SettlementBatch, ...};

pub use channel::*;
pub use clock::*;
pub use config::*;
pub use dedup::*;
pub use dispute::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use reconciliation::*;
pub use settlement::*;
pub use store::*;
pub use transfer::*;

// Constants are accessed via `worpx_types::constants::FOO` and amount
// helpers via `worpx_types::amount::foo` (not re-exported).
