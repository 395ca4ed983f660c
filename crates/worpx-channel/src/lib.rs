//! # worpx-channel
//!
//! **Channel plane**: bilateral payment channels and conditional escrow.
//!
//! - [`state_machine`]: the data-only transition table and the pure
//!   `evaluate` / `allowed` functions over it
//! - [`ChannelRegistry`]: owns channels; funding, transitions and payments
//! - [`EscrowVault`]: owns escrow deposits and per-token locked balances
//!
//! Both owners keep state behind a `worpx_types::EntityStore` and mutate
//! one entity at a time through `worpx_types::transact`.

pub mod escrow;
pub mod registry;
pub mod state_machine;

pub use escrow::{EscrowVault, LockRequest};
pub use registry::ChannelRegistry;
