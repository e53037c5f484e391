//! hfence core: the policy and filter model shared by the compiler and
//! installer, plus the error surface.
//!
//! This crate carries no engine or OS dependencies so the compiler and
//! weight logic can be exercised against an in-memory engine.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All
//! fallible paths surface as `HFenceError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod directive;
pub mod error;
pub mod filter;
pub mod namespace;

/// Shared result type.
pub use error::{ErrorCode, HFenceError, Result};
