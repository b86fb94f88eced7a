//! Conflict-graph assembly.
//!
//! Vertices are row-blocks of `BLK_FACTOR` rows. An edge means the two
//! blocks may race during the symmetric update if run concurrently on
//! different threads:
//! - direct: a sub-diagonal entry of one thread writes into a row owned by
//!   another thread;
//! - indirect: blocks owned by different threads both scatter into the
//!   same column-block.
//!
//! Assembly runs in two parallel phases. Each thread collects edges and
//! `(block, thread)` column marks into private scratch; the marks are
//! merged between phases. Duplicate edges are allowed and left for the
//! colorer to tolerate; self-loops are never emitted.

use ochre_core::{Index, Value};
use rayon::ThreadPool;

use crate::compress::SymBlock;
use crate::{BLK_BITS, BLK_FACTOR};

/// Undirected conflict graph with weighted, thread-owned vertices.
pub(crate) struct ConflictGraph {
    /// Adjacency lists; may contain duplicates.
    pub adj: Vec<Vec<usize>>,
    /// Owning thread per vertex.
    pub owner: Vec<usize>,
    /// Aggregate nonzero count per vertex (lower-triangular plus
    /// high-bandwidth), the weight used by the balancing pass.
    pub weight: Vec<usize>,
}

impl ConflictGraph {
    #[inline]
    pub fn len(&self) -> usize {
        self.adj.len()
    }
}

/// Number of coloring vertices for a row count.
#[inline]
pub(crate) fn block_count(nrows: usize) -> usize {
    nrows.div_ceil(BLK_FACTOR)
}

pub(crate) fn build<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &[SymBlock<T, I>],
    row_split: &[usize],
    nrows: usize,
) -> ConflictGraph {
    let nthreads = blocks.len();
    let nblocks = block_count(nrows);

    // Phase 1: direct edges plus indirect column marks, per thread.
    let phase1: Vec<(Vec<(usize, usize)>, Vec<(usize, usize)>, Vec<usize>)> =
        pool.broadcast(|ctx| {
            let tid = ctx.index();
            let blk = &blocks[tid];
            let lo = blk.row_offset;
            let mut edges: Vec<(usize, usize)> = Vec::new();
            let mut marks: Vec<(usize, usize)> = Vec::new();
            let mut weights: Vec<usize> = vec![0; local_block_span(row_split, tid)];
            let blk_base = lo >> BLK_BITS;

            for li in 0..blk.nrows {
                let blk_row = (lo + li) >> BLK_BITS;
                let start = blk.rowptr[li].as_usize();
                let end = blk.rowptr[li + 1].as_usize();
                weights[blk_row - blk_base] += end - start;
                if let Some(h) = &blk.high {
                    weights[blk_row - blk_base] +=
                        h.rowptr[li + 1].as_usize() - h.rowptr[li].as_usize();
                }
                let mut prev_blk_col = usize::MAX;
                for j in start..end {
                    let col = blk.colind[j].as_usize();
                    let blk_col = col >> BLK_BITS;
                    // Sub-diagonal entry landing in another thread's rows.
                    if col < lo {
                        edges.push((blk_row, blk_col));
                    }
                    if blk_col != prev_blk_col {
                        marks.push((blk_col, blk_row));
                    }
                    prev_blk_col = blk_col;
                }
            }
            (edges, marks, weights)
        });

    // Merge the column marks into one append list per column-block.
    let mut indirect: Vec<Vec<(usize, usize)>> = vec![Vec::new(); nblocks];
    for (tid, (_, marks, _)) in phase1.iter().enumerate() {
        for &(blk_col, blk_row) in marks {
            indirect[blk_col].push((blk_row, tid));
        }
    }

    // Phase 2: cross-thread pairs on the same column-block. Each thread
    // scans the column-blocks inside its own row range.
    let indirect_ref = &indirect;
    let phase2: Vec<Vec<(usize, usize)>> = pool.broadcast(|ctx| {
        let tid = ctx.index();
        let blk_start = row_split[tid] >> BLK_BITS;
        let blk_end = blk_start + local_block_span(row_split, tid);
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for list in &indirect_ref[blk_start..blk_end] {
            for (a, &(blk1, t1)) in list.iter().enumerate() {
                for &(blk2, t2) in &list[a + 1..] {
                    if blk1 != blk2 && t1 != t2 {
                        let (u, v) = if blk1 < blk2 { (blk1, blk2) } else { (blk2, blk1) };
                        edges.push((u, v));
                    }
                }
            }
        }
        edges
    });

    // Stitch vertex metadata and assemble the adjacency lists.
    let mut owner = vec![0usize; nblocks];
    let mut weight = vec![0usize; nblocks];
    for tid in 0..nthreads {
        let span = local_block_span(row_split, tid);
        let base = row_split[tid] >> BLK_BITS;
        for b in 0..span {
            owner[base + b] = tid;
            weight[base + b] = phase1[tid].2[b];
        }
    }

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); nblocks];
    for (edges, _, _) in &phase1 {
        for &(u, v) in edges {
            adj[u].push(v);
            adj[v].push(u);
        }
    }
    for edges in &phase2 {
        for &(u, v) in edges {
            adj[u].push(v);
            adj[v].push(u);
        }
    }

    ConflictGraph { adj, owner, weight }
}

/// Number of coloring vertices inside thread `tid`'s row range. Interior
/// split points are block-aligned, so block ranges never overlap; a
/// trailing partial block belongs to the thread owning its rows.
fn local_block_span(row_split: &[usize], tid: usize) -> usize {
    let lo = row_split[tid];
    let hi = row_split[tid + 1];
    if hi == lo {
        return 0;
    }
    ((hi - 1) >> BLK_BITS) + 1 - (lo >> BLK_BITS)
}
