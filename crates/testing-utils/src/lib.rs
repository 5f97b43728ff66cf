//! # Courier Testing Utils
//!
//! Shared testing utilities for the courier scheduler workspace: entity
//! builders, handler and audit doubles, a controllable clock and a store
//! wrapper that can simulate outages.
//!
//! ```toml
//! [dev-dependencies]
//! courier-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
