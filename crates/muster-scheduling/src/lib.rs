// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admission control for remote actions.
//!
//! [`RateLimiter`] keeps one token bucket per action kind plus one per
//! account. [`PriorityScheduler`] is an in-memory min-heap of tasks gated by
//! a ready time, releasing a task only once the limiter admits it.

pub mod rate_limiter;
pub mod scheduler;

pub use rate_limiter::{RateLimiter, TokenBucket};
pub use scheduler::{PriorityScheduler, ScheduledTask};
