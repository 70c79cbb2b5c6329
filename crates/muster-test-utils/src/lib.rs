// SPDX-FileCopyrightText: 2026 Muster Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for muster integration tests.
//!
//! - [`MockRemote`] - scripted remote channel service with call counters
//! - [`TestHarness`] - isolated stack over a temporary database

pub mod harness;
pub mod mock_remote;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_remote::MockRemote;
