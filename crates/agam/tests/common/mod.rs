//! Shared test utilities for agam integration tests.
//!
//! - `TestHarness` runs a dispatcher against an isolated temp data directory
//! - `builders` produces small but real PDF, DOCX and image payloads

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
