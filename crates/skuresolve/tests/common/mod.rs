//! Shared test utilities for skuresolve integration tests.
//!
//! This module provides:
//! - `TestHarness` for running jobs against an isolated SQLite file
//! - Builders for rows and engine configurations

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
