// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules. Every function takes `&Database` and an explicit
//! `now` (unix seconds) where time matters, so callers and tests control
//! the clock.

pub mod backoff;
pub mod holds;
pub mod invites;
pub mod membership;
pub mod queue;
pub mod urls;
