//! Shared test utilities for cutterq integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated queue instances over a temp data directory
//! - Helpers for writing plot files and building job requests

pub mod harness;

pub use harness::TestHarness;
