// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Join orchestration for muster.
//!
//! The [`JoinOrchestrator`] settles one link at a time against the shared
//! [`muster_pool::AccountPool`], consulting the [`ResultCache`] before any
//! remote call. Two drivers sit on top of it: [`BatchDriver`] for live,
//! user-submitted batches and [`QueueWorker`] for the durable task queue.
//! Both may run at once; they only share the pool and the stores.

pub mod batch;
pub mod cache;
pub mod dedup;
pub mod links;
pub mod orchestrator;
pub mod throttle;
pub mod worker;

pub use batch::{BatchDriver, BatchRecord, BatchReport, BatchSummary};
pub use cache::ResultCache;
pub use dedup::{AntiDupWindow, Claim};
pub use links::{ParsedLink, extract_links, is_valid_invite_hash, normalize};
pub use orchestrator::{Disposition, JoinOrchestrator, LinkReport, classify_error};
pub use throttle::Throttle;
pub use worker::{PassStats, QueueWorker};
