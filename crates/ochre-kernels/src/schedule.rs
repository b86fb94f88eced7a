//! Execution schedule derived from a coloring: per-thread row ranges per
//! color, and the cross-thread dependencies used by the fine-grained
//! executor instead of barriers.

use ochre_core::{Index, Value};
use rayon::ThreadPool;

use crate::compress::SymBlock;
use crate::graph::ConflictGraph;
use crate::BLK_BITS;

/// Per-thread compiled ranges: for color `c`,
/// `range_ptr[c]..range_ptr[c + 1]` indexes `range_start`/`range_end`,
/// inclusive runs of consecutive local rows.
pub(crate) struct ThreadRanges {
    pub range_ptr: Vec<usize>,
    pub range_start: Vec<usize>,
    pub range_end: Vec<usize>,
}

impl ThreadRanges {
    #[inline]
    pub fn nranges(&self) -> usize {
        self.range_start.len()
    }
}

/// Coalesces each thread's rows into maximal consecutive runs per color.
pub(crate) fn compile_ranges<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &[SymBlock<T, I>],
    color: &[usize],
    ncolors: usize,
) -> Vec<ThreadRanges> {
    pool.broadcast(|ctx| {
        let blk = &blocks[ctx.index()];
        let lo = blk.row_offset;

        let mut rows_of_color: Vec<Vec<usize>> = vec![Vec::new(); ncolors];
        for li in 0..blk.nrows {
            rows_of_color[color[(lo + li) >> BLK_BITS]].push(li);
        }

        let mut range_ptr = vec![0usize; ncolors + 1];
        let mut range_start = Vec::new();
        let mut range_end = Vec::new();
        for (c, rows) in rows_of_color.iter().enumerate() {
            if let Some((&first, rest)) = rows.split_first() {
                range_start.push(first);
                let mut prev = first;
                for &row in rest {
                    if row - prev > 1 {
                        range_end.push(prev);
                        range_start.push(row);
                    }
                    prev = row;
                }
                range_end.push(prev);
            }
            range_ptr[c + 1] = range_start.len();
        }
        debug_assert_eq!(range_start.len(), range_end.len());

        ThreadRanges {
            range_ptr,
            range_start,
            range_end,
        }
    })
}

/// For every `(thread, color)`, the set of other threads whose previous
/// color must be observed complete before the thread may start. A thread
/// t at color c depends on t' when some edge joins a color-c vertex of t
/// to a color-(c-1) vertex of t'.
pub(crate) fn analyze_dependencies(
    g: &ConflictGraph,
    color: &[usize],
    ncolors: usize,
    nthreads: usize,
) -> Vec<Vec<Vec<usize>>> {
    let mut waits = vec![false; ncolors * nthreads * nthreads];
    for u in 0..g.len() {
        let cu = color[u];
        if cu == 0 {
            continue;
        }
        for &n in &g.adj[u] {
            if color[n] == cu - 1 && g.owner[n] != g.owner[u] {
                waits[(cu * nthreads + g.owner[u]) * nthreads + g.owner[n]] = true;
            }
        }
    }

    (0..nthreads)
        .map(|t| {
            (0..ncolors)
                .map(|c| {
                    (0..nthreads)
                        .filter(|&other| waits[(c * nthreads + t) * nthreads + other])
                        .collect()
                })
                .collect()
        })
        .collect()
}
