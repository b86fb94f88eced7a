//! Sparse matrix - dense vector multiplication kernels.
//!
//! All parallel kernels run as a single broadcast over the matrix's fixed
//! pool, with each thread pinned to its contiguous row range. Threads
//! write into the shared output through a raw pointer; every kernel
//! guarantees write-disjointness its own way: by row partitioning, by
//! coloring, by atomic accumulation, or by private local vectors reduced
//! at the end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;

use ochre_core::{Index, Value};
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::compress::{CsrView, SymBlock};

/// Completion flags for the fine-grained executor, one per
/// `(thread, color)`. Single writer (the owning thread), many readers.
#[derive(Debug)]
pub(crate) struct DoneFlags {
    flags: Vec<AtomicBool>,
    ncolors: usize,
}

impl DoneFlags {
    pub fn new(nthreads: usize, ncolors: usize) -> Self {
        Self {
            flags: (0..nthreads * ncolors).map(|_| AtomicBool::new(false)).collect(),
            ncolors,
        }
    }

    #[inline]
    fn reset(&self, tid: usize, c: usize) {
        self.flags[tid * self.ncolors + c].store(false, Ordering::Relaxed);
    }

    #[inline]
    fn set(&self, tid: usize, c: usize) {
        self.flags[tid * self.ncolors + c].store(true, Ordering::Release);
    }

    #[inline]
    fn wait(&self, tid: usize, c: usize) {
        let flag = &self.flags[tid * self.ncolors + c];
        while !flag.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }
}

/// Unrolled sparse dot product of one CSR row against `x`.
#[inline]
fn dot_row<T: Value, I: Index>(colind: &[I], values: &[T], x: &[T]) -> T {
    let len = values.len();
    let mut acc = T::zero();
    let mut k = 0usize;
    let limit4 = len & !3;
    while k < limit4 {
        let j0 = colind[k].as_usize();
        let j1 = colind[k + 1].as_usize();
        let j2 = colind[k + 2].as_usize();
        let j3 = colind[k + 3].as_usize();
        acc = values[k + 3].mul_add(
            x[j3],
            values[k + 2].mul_add(x[j2], values[k + 1].mul_add(x[j1], values[k].mul_add(x[j0], acc))),
        );
        k += 4;
    }
    while k < len {
        acc = values[k].mul_add(x[colind[k].as_usize()], acc);
        k += 1;
    }
    acc
}

/// y = A x over the staging CSR, rows in evenly sized parallel chunks.
/// `high` carries the far-bandwidth entries when the staging matrix has
/// been split.
pub(crate) fn mv_vanilla<T: Value, I: Index>(
    pool: &ThreadPool,
    staging: CsrView<'_, T, I>,
    high: Option<CsrView<'_, T, I>>,
    y: &mut [T],
    x: &[T],
) {
    let nrows = staging.nrows;
    let nthreads = pool.current_num_threads().max(1);
    let chunk = nrows.div_ceil(nthreads).max(1);
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut r0 = 0usize;
    while r0 < nrows {
        ranges.push((r0, (r0 + chunk).min(nrows)));
        r0 += chunk;
    }
    let y_addr = y.as_mut_ptr() as usize;
    pool.install(|| {
        ranges.into_par_iter().for_each(|(r0, r1)| {
            let y_ptr = y_addr as *mut T;
            for i in r0..r1 {
                let (s, e) = staging.row(i);
                let mut val = dot_row(&staging.colind[s..e], &staging.values[s..e], x);
                if let Some(h) = high {
                    let (hs, he) = h.row(i);
                    val = val + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
                }
                unsafe {
                    *y_ptr.add(i) = val;
                }
            }
        });
    });
}

/// y = A x with rows partitioned by the nnz-balanced row split.
pub(crate) fn mv_split_nnz<T: Value, I: Index>(
    pool: &ThreadPool,
    staging: CsrView<'_, T, I>,
    high: Option<CsrView<'_, T, I>>,
    row_split: &[usize],
    y: &mut [T],
    x: &[T],
) {
    let y_addr = y.as_mut_ptr() as usize;
    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let y_ptr = y_addr as *mut T;
        for i in row_split[tid]..row_split[tid + 1] {
            let (s, e) = staging.row(i);
            let mut val = dot_row(&staging.colind[s..e], &staging.values[s..e], x);
            if let Some(h) = high {
                let (hs, he) = h.row(i);
                val = val + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
            }
            unsafe {
                *y_ptr.add(i) = val;
            }
        }
    });
}

/// Single-threaded symmetric kernel over one compressed block.
pub(crate) fn mv_sym_serial<T: Value, I: Index>(blk: &SymBlock<T, I>, y: &mut [T], x: &[T]) {
    for i in 0..blk.nrows {
        y[i] = blk.diagonal[i] * x[i];
    }
    for i in 0..blk.nrows {
        let mut y_tmp = T::zero();
        for j in blk.rowptr[i].as_usize()..blk.rowptr[i + 1].as_usize() {
            let col = blk.colind[j].as_usize();
            let val = blk.values[j];
            y_tmp = val.mul_add(x[col], y_tmp);
            y[col] += val * x[i];
        }
        if let Some(h) = &blk.high {
            let (hs, he) = (h.rowptr[i].as_usize(), h.rowptr[i + 1].as_usize());
            y_tmp = y_tmp + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
        }
        y[i] += y_tmp;
    }
}

/// Symmetric kernel where every shared accumulation is an atomic add.
pub(crate) fn mv_sym_atomics<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &[SymBlock<T, I>],
    y: &mut [T],
    x: &[T],
) {
    let nthreads = blocks.len();
    let barrier = Barrier::new(nthreads);
    let y_addr = y.as_mut_ptr() as usize;
    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let blk = &blocks[tid];
        let off = blk.row_offset;
        let y_ptr = y_addr as *mut T;

        for i in 0..blk.nrows {
            unsafe {
                *y_ptr.add(off + i) = blk.diagonal[i] * x[off + i];
            }
        }
        barrier.wait();

        for i in 0..blk.nrows {
            let mut y_tmp = T::zero();
            for j in blk.rowptr[i].as_usize()..blk.rowptr[i + 1].as_usize() {
                let col = blk.colind[j].as_usize();
                let val = blk.values[j];
                y_tmp = val.mul_add(x[col], y_tmp);
                unsafe {
                    T::atomic_add(y_ptr.add(col), val * x[off + i]);
                }
            }
            if let Some(h) = &blk.high {
                let (hs, he) = (h.rowptr[i].as_usize(), h.rowptr[i + 1].as_usize());
                y_tmp = y_tmp + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
            }
            unsafe {
                T::atomic_add(y_ptr.add(off + i), y_tmp);
            }
        }
    });
}

/// Symmetric kernel with per-thread local vectors covering the rows below
/// each thread's range; locals are reduced into `y` (and re-zeroed) by the
/// whole team afterwards.
pub(crate) fn mv_sym_effective_ranges<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &mut [SymBlock<T, I>],
    row_split: &[usize],
    y: &mut [T],
    x: &[T],
) {
    let nthreads = blocks.len();
    let barrier = Barrier::new(nthreads);
    let y_addr = y.as_mut_ptr() as usize;
    // Thread 0 owns no rows below its range; its "local" is y itself.
    let local_addrs: Vec<usize> = blocks
        .iter_mut()
        .map(|b| {
            b.local_vector
                .as_mut()
                .map_or(y_addr, |v| v.as_mut_ptr() as usize)
        })
        .collect();
    let local_addrs = &local_addrs;
    let blocks: &[SymBlock<T, I>] = blocks;

    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let blk = &blocks[tid];
        let off = blk.row_offset;
        let y_ptr = y_addr as *mut T;
        let local = local_addrs[tid] as *mut T;

        for i in 0..blk.nrows {
            unsafe {
                *y_ptr.add(off + i) = blk.diagonal[i] * x[off + i];
            }
        }
        barrier.wait();

        for i in 0..blk.nrows {
            let mut y_tmp = T::zero();
            for j in blk.rowptr[i].as_usize()..blk.rowptr[i + 1].as_usize() {
                let col = blk.colind[j].as_usize();
                let val = blk.values[j];
                y_tmp = val.mul_add(x[col], y_tmp);
                unsafe {
                    if col < off {
                        *local.add(col) += val * x[off + i];
                    } else {
                        *y_ptr.add(col) += val * x[off + i];
                    }
                }
            }
            if let Some(h) = &blk.high {
                let (hs, he) = (h.rowptr[i].as_usize(), h.rowptr[i + 1].as_usize());
                y_tmp = y_tmp + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
            }
            unsafe {
                *y_ptr.add(off + i) += y_tmp;
            }
        }
        barrier.wait();

        // Team reduction of every local vector, one source thread at a
        // time, each worker taking a static slice of the covered rows.
        for src in 1..nthreads {
            let limit = row_split[src];
            let src_local = local_addrs[src] as *mut T;
            let chunk = limit.div_ceil(nthreads).max(1);
            let start = (tid * chunk).min(limit);
            let end = (start + chunk).min(limit);
            for i in start..end {
                unsafe {
                    *y_ptr.add(i) += *src_local.add(i);
                    *src_local.add(i) = T::zero();
                }
            }
            barrier.wait();
        }
    });
}

/// Sparse index of the positions where thread-local vectors actually
/// conflict; the reduction touches only those.
#[derive(Debug)]
pub(crate) struct ConflictMap {
    /// Conflicted y positions, grouped by position.
    pub pos: Vec<usize>,
    /// Source thread holding the local contribution for each entry.
    pub cpu: Vec<u16>,
    /// Per-thread `[start, end)` reduction slice; conflicts on one
    /// position always land in one slice.
    pub slices: Vec<(usize, usize)>,
}

/// Like [`mv_sym_effective_ranges`], but the reduction walks only the
/// indexed conflict positions. Locals are re-zeroed up front instead.
pub(crate) fn mv_sym_local_vectors<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &mut [SymBlock<T, I>],
    map: &ConflictMap,
    y: &mut [T],
    x: &[T],
) {
    let nthreads = blocks.len();
    let barrier = Barrier::new(nthreads);
    let y_addr = y.as_mut_ptr() as usize;
    let local_addrs: Vec<usize> = blocks
        .iter_mut()
        .map(|b| {
            b.local_vector
                .as_mut()
                .map_or(y_addr, |v| v.as_mut_ptr() as usize)
        })
        .collect();
    let local_addrs = &local_addrs;
    let blocks: &[SymBlock<T, I>] = blocks;

    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let blk = &blocks[tid];
        let off = blk.row_offset;
        let y_ptr = y_addr as *mut T;
        let local = local_addrs[tid] as *mut T;

        if blk.local_vector.is_some() {
            for i in 0..off {
                unsafe {
                    *local.add(i) = T::zero();
                }
            }
        }
        for i in 0..blk.nrows {
            unsafe {
                *y_ptr.add(off + i) = blk.diagonal[i] * x[off + i];
            }
        }
        barrier.wait();

        for i in 0..blk.nrows {
            let mut y_tmp = T::zero();
            for j in blk.rowptr[i].as_usize()..blk.rowptr[i + 1].as_usize() {
                let col = blk.colind[j].as_usize();
                let val = blk.values[j];
                y_tmp = val.mul_add(x[col], y_tmp);
                unsafe {
                    if col < off {
                        *local.add(col) += val * x[off + i];
                    } else {
                        *y_ptr.add(col) += val * x[off + i];
                    }
                }
            }
            if let Some(h) = &blk.high {
                let (hs, he) = (h.rowptr[i].as_usize(), h.rowptr[i + 1].as_usize());
                y_tmp = y_tmp + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
            }
            unsafe {
                *y_ptr.add(off + i) += y_tmp;
            }
        }
        barrier.wait();

        let (start, end) = map.slices[tid];
        for k in start..end {
            let p = map.pos[k];
            let src = map.cpu[k] as usize;
            unsafe {
                *y_ptr.add(p) += *(local_addrs[src] as *const T).add(p);
            }
        }
    });
}

/// The conflict-free executor: diagonal pre-loop, then color by color.
/// Within one color no two threads touch the same y position, so all
/// updates are plain stores; between colors either a team barrier or the
/// per-dependency done flags provide the ordering.
#[allow(clippy::too_many_arguments)]
pub(crate) fn mv_sym_conflict_free<T: Value, I: Index>(
    pool: &ThreadPool,
    blocks: &[SymBlock<T, I>],
    ncolors: usize,
    done: &DoneFlags,
    use_barrier: bool,
    y: &mut [T],
    x: &[T],
) {
    let nthreads = blocks.len();
    let barrier = Barrier::new(nthreads);
    let y_addr = y.as_mut_ptr() as usize;

    pool.broadcast(|ctx| {
        let tid = ctx.index();
        let blk = &blocks[tid];
        let off = blk.row_offset;
        let y_ptr = y_addr as *mut T;

        if !use_barrier {
            for c in 0..ncolors {
                done.reset(tid, c);
            }
        }
        for i in 0..blk.nrows {
            unsafe {
                *y_ptr.add(off + i) = blk.diagonal[i] * x[off + i];
            }
        }
        barrier.wait();

        for c in 0..ncolors {
            if !use_barrier {
                debug_assert!(c > 0 || blk.deps[c].is_empty());
                for &other in &blk.deps[c] {
                    done.wait(other, c - 1);
                }
            }

            for r in blk.range_ptr[c]..blk.range_ptr[c + 1] {
                for i in blk.range_start[r]..=blk.range_end[r] {
                    let mut y_tmp = T::zero();
                    for j in blk.rowptr[i].as_usize()..blk.rowptr[i + 1].as_usize() {
                        let col = blk.colind[j].as_usize();
                        let val = blk.values[j];
                        y_tmp = val.mul_add(x[col], y_tmp);
                        unsafe {
                            *y_ptr.add(col) += val * x[off + i];
                        }
                    }
                    if let Some(h) = &blk.high {
                        let (hs, he) = (h.rowptr[i].as_usize(), h.rowptr[i + 1].as_usize());
                        y_tmp = y_tmp + dot_row(&h.colind[hs..he], &h.values[hs..he], x);
                    }
                    unsafe {
                        *y_ptr.add(off + i) += y_tmp;
                    }
                }
            }

            if use_barrier {
                barrier.wait();
            } else {
                done.set(tid, c);
            }
        }
    });
}
