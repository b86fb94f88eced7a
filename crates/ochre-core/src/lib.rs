//! Core data structures and traits for Ochre (pure Rust)
//!
//! This crate holds everything the kernels and the IO layer share:
//! - The [`Csr`] staging format with validated constructors.
//! - The [`Triplet`] coordinate entry consumed by the CSR builder.
//! - The [`Index`] and [`Value`] capability traits that let kernels
//!   instantiate at 32- or 64-bit index and value widths.
//! - The crate-wide [`Error`] type.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod csr;
pub mod error;
pub mod traits;
pub mod triplet;

pub use csr::{validate_parts, Csr};
pub use error::{Error, Result};
pub use traits::{Index, Value};
pub use triplet::Triplet;

/// Execution platform tag.
///
/// Only the CPU path is implemented; the tag is part of the construction
/// API so that matrices carry their placement with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Platform {
    #[default]
    Cpu,
}
