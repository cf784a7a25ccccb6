//! # Gateway Testing Utils
//!
//! Shared testing utilities for the channel test engine.
//! This crate provides in-memory implementations of the storage and
//! collaborator traits, a scripted test executor and test data builders.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! gateway-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
