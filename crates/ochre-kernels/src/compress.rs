//! Per-thread lower-triangular extraction.
//!
//! Each thread takes its contiguous row range of the staging CSR and
//! produces a [`SymBlock`]: a local CSR holding only the sub-diagonal
//! entries (column indices stay in the global coordinate system), a dense
//! zero-padded diagonal, and, in hybrid mode, a local CSR of the
//! high-bandwidth entries. Blocks are allocated and written entirely by
//! their owner thread, which also establishes first-touch placement.

use ochre_core::{Index, Value};
use rayon::ThreadPool;

/// Borrowed view of a CSR structure.
#[derive(Clone, Copy)]
pub(crate) struct CsrView<'s, T, I> {
    pub nrows: usize,
    pub rowptr: &'s [I],
    pub colind: &'s [I],
    pub values: &'s [T],
}

impl<T: Value, I: Index> CsrView<'_, T, I> {
    /// Half-open entry range of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> (usize, usize) {
        (self.rowptr[i].as_usize(), self.rowptr[i + 1].as_usize())
    }
}

/// Owned high-bandwidth sub-matrix of one thread's rows.
#[derive(Debug)]
pub(crate) struct HighPart<T, I> {
    pub rowptr: Vec<I>,
    pub colind: Vec<I>,
    pub values: Vec<T>,
}

/// One thread's share of the symmetry-compressed matrix.
///
/// The coloring schedule (`range_*`, `deps`) and the local vector are
/// filled in later by the strategy that needs them; extraction leaves
/// them empty.
#[derive(Debug)]
pub(crate) struct SymBlock<T, I> {
    /// Rows in this partition.
    pub nrows: usize,
    /// Global index of the first row.
    pub row_offset: usize,
    /// Local CSR of sub-diagonal entries; columns are global.
    pub rowptr: Vec<I>,
    pub colind: Vec<I>,
    pub values: Vec<T>,
    /// Dense diagonal, zero where the matrix has none.
    pub diagonal: Vec<T>,
    /// High-bandwidth entries of these rows (hybrid mode only).
    pub high: Option<HighPart<T, I>>,
    /// Sub-diagonal nonzero count.
    pub nnz_lower: usize,
    /// Stored diagonal count.
    pub nnz_diag: usize,
    /// High-bandwidth nonzero count.
    pub nnz_high: usize,
    /// Ranges of consecutive local rows, grouped by color:
    /// `range_ptr[c]..range_ptr[c + 1]` indexes into the parallel
    /// `range_start`/`range_end` arrays (both ends inclusive).
    pub range_ptr: Vec<usize>,
    pub range_start: Vec<usize>,
    pub range_end: Vec<usize>,
    /// For each color, the other threads whose previous-color work this
    /// thread must observe before starting.
    pub deps: Vec<Vec<usize>>,
    /// Scratch output vector for the reduction-based strategies, sized
    /// `row_offset`.
    pub local_vector: Option<Vec<T>>,
}

/// Extracts one block per pool thread from the staging CSR.
///
/// Panics if the staging structure violates its CSR invariants; staging is
/// validated at construction, so a violation here is a logic error.
pub(crate) fn extract_blocks<T: Value, I: Index>(
    pool: &ThreadPool,
    staging: CsrView<'_, T, I>,
    high: Option<CsrView<'_, T, I>>,
    row_split: &[usize],
) -> Vec<SymBlock<T, I>> {
    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let lo = row_split[tid];
        let hi = row_split[tid + 1];
        let nrows = hi - lo;

        let mut rowptr = vec![I::zero(); nrows + 1];
        let mut diagonal = vec![T::zero(); nrows];
        let estimate = (staging.rowptr[hi].as_usize() - staging.rowptr[lo].as_usize()) / 2;
        let mut colind: Vec<I> = Vec::with_capacity(estimate);
        let mut values: Vec<T> = Vec::with_capacity(estimate);
        let mut nnz_diag = 0usize;

        for i in lo..hi {
            let (start, end) = staging.row(i);
            for j in start..end {
                let col = staging.colind[j].as_usize();
                if col < i {
                    rowptr[i + 1 - lo] = rowptr[i + 1 - lo] + I::one();
                    colind.push(staging.colind[j]);
                    values.push(staging.values[j]);
                } else if col == i {
                    diagonal[i - lo] = staging.values[j];
                    nnz_diag += 1;
                }
            }
        }
        for i in 1..=nrows {
            rowptr[i] = rowptr[i] + rowptr[i - 1];
        }
        assert_eq!(rowptr[nrows].as_usize(), values.len());
        let nnz_lower = values.len();

        let mut nnz_high = 0usize;
        let high_part = high.map(|h| {
            let mut rowptr_h = vec![I::zero(); nrows + 1];
            let mut colind_h: Vec<I> = Vec::new();
            let mut values_h: Vec<T> = Vec::new();
            for i in lo..hi {
                let (start, end) = h.row(i);
                rowptr_h[i + 1 - lo] = I::from_usize(end - start);
                colind_h.extend_from_slice(&h.colind[start..end]);
                values_h.extend_from_slice(&h.values[start..end]);
            }
            for i in 1..=nrows {
                rowptr_h[i] = rowptr_h[i] + rowptr_h[i - 1];
            }
            nnz_high = values_h.len();
            HighPart {
                rowptr: rowptr_h,
                colind: colind_h,
                values: values_h,
            }
        });

        SymBlock {
            nrows,
            row_offset: lo,
            rowptr,
            colind,
            values,
            diagonal,
            high: high_part,
            nnz_lower,
            nnz_diag,
            nnz_high,
            range_ptr: Vec::new(),
            range_start: Vec::new(),
            range_end: Vec::new(),
            deps: Vec::new(),
            local_vector: None,
        }
    })
}
