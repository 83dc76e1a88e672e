//! Shared test utilities for propagator integration tests.
//!
//! This module provides:
//! - `TestHarness` with bare payload and control repositories on disk
//! - `FakeHosting`, a pull-request provider that merges with the real `git` binary

pub mod harness;
pub mod hosting;

pub use harness::TestHarness;
pub use hosting::FakeHosting;
