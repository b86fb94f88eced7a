//! Definitions and constructors for CSR (Compressed Sparse Row) format matrices.
//!
//! This file provides:
//! - The Csr struct for 2D sparse matrices in CSR format.
//! - Constructors, validation, and the triplet-stream builder.
//!
//! CSR format is row-oriented: each row stores its nonzero column indices
//! and values in a contiguous block, with a rowptr array marking row boundaries.

use crate::error::{Error, Result};
use crate::traits::{Index, Value};
use crate::triplet::Triplet;

/// CSR (Compressed Sparse Row) format for 2D sparse matrices.
///
/// Stores nonzero elements in row-major order with column indices and row pointers.
///
/// - `values`: values of nonzero elements (length = nnz)
/// - `colind`: column indices for nonzeros in row order (length = nnz)
/// - `rowptr`: row pointers (length = nrows + 1)
///   - rowptr[i] = start index in colind/values for row i
///   - rowptr[i+1] = start index for row i+1
///   - rowptr[nrows] = nnz
/// - `nrows`: number of rows in the matrix
/// - `ncols`: number of columns in the matrix
#[derive(Debug, Clone)]
pub struct Csr<T, I> {
    pub values: Vec<T>,  // Nonzero values in row-major order
    pub colind: Vec<I>,  // Column indices (length = nnz)
    pub rowptr: Vec<I>,  // Row pointers (length = nrows + 1)
    pub ncols: usize,    // Number of columns
    pub nrows: usize,    // Number of rows
}

impl<T, I> Csr<T, I> {
    /// Returns the number of nonzero elements (nnz).
    #[inline]
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Returns the shape of the matrix as (nrows, ncols).
    #[inline]
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }
}

/// Validates CSR parts without taking ownership.
///
/// The cheap envelope checks (array lengths, first/last rowptr entry)
/// always run; `check` additionally walks every row validating that
/// `rowptr` is non-decreasing and that column indices are strictly
/// increasing and in bounds.
pub fn validate_parts<T: Value, I: Index>(
    nrows: usize,
    ncols: usize,
    rowptr: &[I],
    colind: &[I],
    values: &[T],
    check: bool,
) -> Result<()> {
    let Some(expected_len) = nrows.checked_add(1) else {
        return Err(Error::InvalidCsr("nrows overflow when adding 1".into()));
    };
    if rowptr.len() != expected_len {
        return Err(Error::InvalidCsr("rowptr length must be nrows + 1".into()));
    }
    if colind.len() != values.len() {
        return Err(Error::InvalidCsr(
            "colind and values must have equal length".into(),
        ));
    }
    let nnz = colind.len();
    let last = rowptr.last().copied().unwrap_or_else(I::zero);
    if last < I::zero() || last.as_usize() != nnz {
        return Err(Error::InvalidCsr(
            "rowptr last element must equal nnz".into(),
        ));
    }
    if rowptr.first().copied().unwrap_or_else(I::zero) != I::zero() {
        return Err(Error::InvalidCsr("rowptr first element must be 0".into()));
    }
    if check {
        for (prev_ptr, next_ptr) in rowptr.iter().zip(rowptr.iter().skip(1)) {
            if *prev_ptr < I::zero() || *next_ptr < I::zero() {
                return Err(Error::InvalidCsr("rowptr must be non-negative".into()));
            }
            if prev_ptr > next_ptr {
                return Err(Error::InvalidCsr("rowptr must be non-decreasing".into()));
            }
        }
        for (&start_i, &end_i) in rowptr.iter().zip(rowptr.iter().skip(1)).take(nrows) {
            let start = start_i.as_usize();
            let end = end_i.as_usize();
            if start > nnz || end > nnz {
                return Err(Error::InvalidCsr(
                    "rowptr elements must be within [0, nnz]".into(),
                ));
            }
            let mut prev_col: Option<usize> = None;
            for &j in &colind[start..end] {
                if j < I::zero() || j.as_usize() >= ncols {
                    return Err(Error::InvalidCsr("column index out of bounds".into()));
                }
                let col = j.as_usize();
                if prev_col.is_some_and(|p| col <= p) {
                    return Err(Error::InvalidCsr(
                        "column indices must be strictly increasing within each row".into(),
                    ));
                }
                prev_col = Some(col);
            }
        }
    }
    Ok(())
}

impl<T: Value, I: Index> Csr<T, I> {
    /// Constructs a `Csr` from parts, with optional full format checking.
    ///
    /// See [`validate_parts`] for what is verified.
    pub fn from_parts(
        nrows: usize,
        ncols: usize,
        rowptr: Vec<I>,
        colind: Vec<I>,
        values: Vec<T>,
        check: bool,
    ) -> Result<Self> {
        validate_parts(nrows, ncols, &rowptr, &colind, &values, check)?;
        Ok(Self {
            values,
            colind,
            rowptr,
            ncols,
            nrows,
        })
    }

    /// Constructs a `Csr` from parts without any checks.
    ///
    /// # Safety (logical)
    /// Caller must ensure:
    /// - rowptr.len() == nrows + 1
    /// - colind.len() == values.len() == nnz
    /// - rowptr[0] == 0 and rowptr[nrows] == nnz
    /// - rowptr is non-decreasing
    /// - For each row: column indices are strictly increasing and within [0, ncols)
    #[inline]
    #[must_use]
    pub fn from_parts_unchecked(
        nrows: usize,
        ncols: usize,
        rowptr: Vec<I>,
        colind: Vec<I>,
        values: Vec<T>,
    ) -> Self {
        Self {
            values,
            colind,
            rowptr,
            ncols,
            nrows,
        }
    }

    /// Builds a CSR matrix from a row-major-sorted triplet stream.
    ///
    /// Requirements on the stream: rows non-decreasing; within a row,
    /// columns strictly increasing (which also rules out duplicate
    /// coordinates); all indices in bounds. Rows absent from the stream
    /// become empty rows.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[Triplet<T, I>]) -> Result<Self> {
        let nnz = triplets.len();
        let mut rowptr = vec![I::zero(); nrows + 1];
        let mut colind = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);

        let mut row_prev = 0usize;
        let mut col_prev: Option<usize> = None;
        for (k, t) in triplets.iter().enumerate() {
            if t.row < I::zero() || t.col < I::zero() {
                return Err(Error::InvalidCsr("negative coordinate".into()));
            }
            let row = t.row.as_usize();
            let col = t.col.as_usize();
            if row >= nrows || col >= ncols {
                return Err(Error::InvalidCsr(format!(
                    "entry ({row}, {col}) out of bounds for a {nrows}x{ncols} matrix"
                )));
            }
            if row < row_prev {
                return Err(Error::InvalidCsr("rows must be non-decreasing".into()));
            }
            if row != row_prev {
                // Close out the previous row and any empty rows in between.
                for r in row_prev..row {
                    rowptr[r + 1] = I::from_usize(k);
                }
                row_prev = row;
                col_prev = None;
            }
            if col_prev.is_some_and(|p| col <= p) {
                return Err(Error::InvalidCsr(format!(
                    "duplicate or unsorted column {col} in row {row}"
                )));
            }
            col_prev = Some(col);
            colind.push(t.col);
            values.push(t.value);
        }
        for r in row_prev..nrows {
            rowptr[r + 1] = I::from_usize(nnz);
        }

        Ok(Self {
            values,
            colind,
            rowptr,
            ncols,
            nrows,
        })
    }
}
