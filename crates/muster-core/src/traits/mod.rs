// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator traits consumed by the join engine.

pub mod remote;

pub use remote::{InviteReply, JoinReply, RemoteChannelService, RemoteError, ResolvedEntity};
