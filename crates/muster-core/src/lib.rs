// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for muster.
//!
//! Holds the error type, the shared domain vocabulary (action kinds, link
//! kinds, membership statuses, per-link outcomes, queue states), and the
//! [`RemoteChannelService`] trait through which every network call to the
//! messaging platform is made.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::MusterError;
pub use traits::{InviteReply, JoinReply, RemoteChannelService, RemoteError, ResolvedEntity};
pub use types::{ActionKind, ChannelId, LinkKind, MembershipStatus, Outcome, QueueState};
