//! # worpx-dispute
//!
//! **Dispute plane**: a party contests a channel outcome, both parties
//! submit evidence hashes inside a deadline, and the dispute ends resolved
//! (by an arbitrator or the evidence heuristic) or expired by the sweeper.

pub mod resolver;

pub use resolver::DisputeResolver;
