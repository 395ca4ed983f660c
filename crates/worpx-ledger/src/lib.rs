//! # worpx-ledger
//!
//! The orchestration layer of the **Worpx** agent payment ledger.
//!
//! [`Ledger`] owns one instance of every component and runs the transfer
//! pipeline across them:
//!
//! 1. **Sequencing**: per-agent nonces and the priority mempool
//! 2. **Channels**: payment application against funded capacity
//! 3. **Settlement**: per-chain batching, finalization callbacks, retries
//! 4. **Disputes**: channel contests, reconciliation escalations and
//!    abandoned batches
//!
//! [`spawn_sweeper`] drives the periodic maintenance passes on tokio.

pub mod ledger;
pub mod sweeper;

pub use ledger::{
    FailureOutcome, Ledger, ProcessReport, SweepReport, TransferRequest, TransferTicket,
};
pub use sweeper::{SweeperHandle, spawn_sweeper};
