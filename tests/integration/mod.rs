//! End-to-end tests of the engine with scripted price sources and a manual
//! clock.
//!
//! Each test builds its own [`TestHarness`]; nothing touches the network.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;
mod quote_flow;
mod settlement;
mod throttling;

pub use harness::{payable, test_config, StubSource, TestHarness, WINDOW_START};
