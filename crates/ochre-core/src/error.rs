//! Error types shared across the Ochre crates.

use thiserror::Error;

/// Result type alias using Ochre's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at matrix construction or tuning time.
///
/// The multiplication kernels themselves have no failure mode: every
/// invariant is established (or rejected) before a kernel is installed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Underlying I/O failure while reading a matrix file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed Matrix-Market header or body.
    #[error("matrix market parse error at line {line}: {msg}")]
    Parse {
        /// One-based line number in the source file.
        line: usize,
        /// What was wrong with the line.
        msg: String,
    },

    /// A Matrix-Market declaration this library does not handle.
    #[error("unsupported matrix market declaration: {0}")]
    Unsupported(String),

    /// A CSR structural invariant does not hold.
    #[error("invalid CSR structure: {0}")]
    InvalidCsr(String),

    /// Rejected runtime configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
