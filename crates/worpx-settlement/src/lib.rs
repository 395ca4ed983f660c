//! # worpx-settlement
//!
//! **Settlement plane**: batches signed channel payment deltas per chain,
//! guards each batch with a hash commitment and the conservation invariant,
//! and reconciles expected against actual settled amounts.
//!
//! ## Architecture
//!
//! 1. [`SettlementEngine`] queues entries per chain and cuts bounded batches
//! 2. [`sealer`] commits each batch to its exact contents
//! 3. [`net`] reduces a batch to per-agent deltas that must sum to zero
//! 4. [`Reconciler`] appends hash-chained reconciliation reports
//!
//! The engine never submits to a chain itself; an external collaborator
//! reports back through `finalize_batch` / `fail_batch`.

pub mod engine;
pub mod net;
pub mod reconciler;
pub mod sealer;

pub use engine::{QueueOutcome, SettlementEngine};
pub use net::{NetSettlement, compute_net_settlement, verify_conservation};
pub use reconciler::Reconciler;
