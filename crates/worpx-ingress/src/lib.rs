//! # worpx-ingress
//!
//! **Ingress plane**: sequencing and admission of agent transfers before
//! they touch a channel.
//!
//! 1. **NonceManager**: per `(agent, chain)` sequence numbers; detects gaps
//! 2. **Mempool**: deduplicated, bounded priority pool of pending transfers
//!
//! ## Transfer Flow
//!
//! ```text
//! agent → NonceManager.allocate() → Mempool.admit() → … → Mempool.pop_highest_priority()
//!       → NonceManager.is_pending() → channel
//! ```
//!
//! A popped transfer whose nonce is no longer pending was released or
//! confirmed out of band and must not be applied.

pub mod mempool;
pub mod nonce_manager;

pub use mempool::Mempool;
pub use nonce_manager::{ConfirmedSlot, NonceGap, NonceManager};
