// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pool of authenticated account sessions.
//!
//! Each [`AccountSlot`] owns one remote session and a "not ready before"
//! instant that only ever moves forward. [`AccountPool::lease`] hands out the
//! next idle, ready slot in round-robin order as a [`Lease`] that frees the
//! slot when dropped.

pub mod pool;
pub mod slot;

pub use pool::{AccountPool, Lease, SlotStatus};
pub use slot::AccountSlot;
