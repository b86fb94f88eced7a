//! Row partitioning and the hybrid bandwidth split.

use ochre_core::{Index, Value};

use crate::compress::CsrView;
use crate::BLK_FACTOR;

/// Splits rows into `nthreads` contiguous ranges balancing the relevant
/// nonzero count per range: sub-diagonal entries in symmetric mode (plus
/// each row's high-bandwidth entries when `high` is present), plain row
/// counts otherwise.
///
/// Interior split points land on `BLK_FACTOR` boundaries so partition
/// edges coincide with coloring-vertex edges. Surplus threads receive
/// empty trailing partitions. Always produces a valid partition.
pub(crate) fn split_by_nnz<T: Value, I: Index>(
    staging: CsrView<'_, T, I>,
    high: Option<CsrView<'_, T, I>>,
    nthreads: usize,
    symmetric: bool,
) -> Vec<usize> {
    let nrows = staging.nrows;
    let nnz = staging.rowptr[nrows].as_usize();
    let mut row_split = vec![0usize; nthreads + 1];
    if nthreads == 1 {
        row_split[1] = nrows;
        return row_split;
    }

    let relevant = if let Some(h) = high {
        (nnz.saturating_sub(nrows)) / 2 + h.rowptr[nrows].as_usize()
    } else if symmetric {
        (nnz.saturating_sub(nrows)) / 2
    } else {
        nnz
    };
    let target = relevant / nthreads;

    let mut current = 0usize;
    let mut split_cnt = 0usize;
    for i in 0..nrows {
        let mut row_nnz = if symmetric {
            let (start, end) = staging.row(i);
            staging.colind[start..end]
                .iter()
                .filter(|c| c.as_usize() < i)
                .count()
        } else {
            let (start, end) = staging.row(i);
            end - start
        };
        if let Some(h) = high {
            let (start, end) = h.row(i);
            row_nnz += end - start;
        }
        current += row_nnz;

        if current >= target && (i + 1) % BLK_FACTOR == 0 {
            split_cnt += 1;
            if split_cnt <= nthreads {
                row_split[split_cnt] = i + 1;
            }
            current = 0;
        }
    }

    // Remaining rows go to the next split; whatever splits are still open
    // become empty partitions pinned at nrows.
    if split_cnt < nthreads {
        split_cnt += 1;
        for s in split_cnt..=nthreads {
            row_split[s] = nrows;
        }
    } else {
        row_split[nthreads] = nrows;
    }
    row_split
}

/// Output of the bandwidth split: a low-bandwidth CSR that replaces the
/// staging matrix and a high-bandwidth CSR holding everything at or above
/// the threshold.
pub(crate) struct BandwidthSplit<T, I> {
    pub low_rowptr: Vec<I>,
    pub low_colind: Vec<I>,
    pub low_values: Vec<T>,
    pub high_rowptr: Vec<I>,
    pub high_colind: Vec<I>,
    pub high_values: Vec<T>,
}

/// Clusters the staging matrix into low- and high-bandwidth nonzeros by
/// `|col - row|` against `threshold`.
pub(crate) fn split_by_bandwidth<T: Value, I: Index>(
    staging: CsrView<'_, T, I>,
    threshold: usize,
) -> BandwidthSplit<T, I> {
    let nrows = staging.nrows;
    let mut low_rowptr = vec![I::zero(); nrows + 1];
    let mut high_rowptr = vec![I::zero(); nrows + 1];
    let mut low_colind = Vec::new();
    let mut low_values = Vec::new();
    let mut high_colind = Vec::new();
    let mut high_values = Vec::new();

    for i in 0..nrows {
        let (start, end) = staging.row(i);
        for j in start..end {
            let col = staging.colind[j].as_usize();
            if col.abs_diff(i) < threshold {
                low_rowptr[i + 1] = low_rowptr[i + 1] + I::one();
                low_colind.push(staging.colind[j]);
                low_values.push(staging.values[j]);
            } else {
                high_rowptr[i + 1] = high_rowptr[i + 1] + I::one();
                high_colind.push(staging.colind[j]);
                high_values.push(staging.values[j]);
            }
        }
    }
    for i in 1..=nrows {
        low_rowptr[i] = low_rowptr[i] + low_rowptr[i - 1];
        high_rowptr[i] = high_rowptr[i] + high_rowptr[i - 1];
    }
    debug_assert_eq!(low_rowptr[nrows].as_usize(), low_values.len());
    debug_assert_eq!(high_rowptr[nrows].as_usize(), high_values.len());

    BandwidthSplit {
        low_rowptr,
        low_colind,
        low_values,
        high_rowptr,
        high_colind,
        high_values,
    }
}
