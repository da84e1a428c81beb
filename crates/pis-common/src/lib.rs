//! PIS Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the protein information system workspace:
//!
//! - **Error Handling**: [`PisError`] and the [`Result`] alias
//! - **Checksums**: content addressing for residue strings and files
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```
//! use pis_common::checksum::sequence_checksum;
//!
//! let a = sequence_checksum("mktayiakqr");
//! let b = sequence_checksum("MKTAYIAKQR");
//! assert_eq!(a, b);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{PisError, Result};
