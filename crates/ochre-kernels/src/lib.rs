//! Parallel SpMV kernels for Ochre (pure Rust)
//!
//! The centerpiece is [`CsrMatrix`], a sparse matrix that can be tuned into
//! a symmetry-compressed representation: only the lower triangle is stored,
//! each off-diagonal nonzero contributes its two symmetric updates, and the
//! updates are scheduled race-free by coloring a conflict graph over
//! row-blocks. Every parallel region runs on a fixed-size thread pool owned
//! by the matrix, with static per-thread row partitions.
#![allow(
    clippy::many_single_char_names,
    reason = "Math kernels conventionally use i/j/k/c/t to denote indices"
)]

mod color;
mod compress;
mod graph;
mod partition;
mod schedule;
mod spmv;
mod storage;

pub mod matrix;

pub use color::OrderingHeuristic;
pub use matrix::{CsrMatrix, Kernel, Options, SymStrategy, Tuning};

/// Upper bound on the worker thread count.
pub const MAX_THREADS: usize = 64;

/// Graph-coloring vertex granularity in rows. Must be a power of two;
/// `1` means one vertex per row.
pub const BLK_FACTOR: usize = 1;

/// Shift amount mapping a row index to its block id.
pub const BLK_BITS: u32 = BLK_FACTOR.trailing_zeros();

/// Bandwidth threshold separating low- from high-bandwidth nonzeros in
/// hybrid mode: an entry is high-bandwidth when `|col - row|` reaches it.
pub const BW_THRESHOLD: usize = 4000;

/// Number of full passes of the color load-balancing heuristic.
pub const BALANCING_STEPS: usize = 1;

const _: () = assert!(BLK_FACTOR.is_power_of_two());
