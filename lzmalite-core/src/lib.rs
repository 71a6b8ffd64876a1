//! # lzmalite-core
//!
//! Shared types for the lzmalite workspace.
//!
//! This crate provides the error type used across the encoder crates:
//!
//! - [`error`]: Error types and the workspace-wide `Result` alias
//!
//! ## Example
//!
//! ```rust
//! use lzmalite_core::error::{LzmaError, Result};
//!
//! fn check_capacity(capacity: usize) -> Result<()> {
//!     if capacity < 5 {
//!         return Err(LzmaError::no_space(capacity));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_capacity(4).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;

pub use error::{LzmaError, Result};
