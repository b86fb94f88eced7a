//! The tunable sparse matrix object.
//!
//! [`CsrMatrix`] stages the matrix in CSR form, owns a fixed-size thread
//! pool, and installs exactly one multiplication strategy when tuned.
//! Symmetric aggressive tuning compresses to the lower triangle and builds
//! the conflict-free schedule; every alternative the dispatcher can select
//! is a variant of the [`Strategy`] union carrying exactly the data its
//! kernel needs.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ochre_core::{validate_parts, Csr, Error, Index, Platform, Result, Triplet, Value};
use rayon::ThreadPool;

use crate::color::{self, OrderingHeuristic};
use crate::compress::{self, CsrView, SymBlock};
use crate::graph;
use crate::partition;
use crate::schedule;
use crate::spmv::{self, ConflictMap, DoneFlags};
use crate::storage::first_touch_vec;
use crate::{BW_THRESHOLD, MAX_THREADS};

/// Operation a matrix can be tuned for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    SpMV,
}

/// How hard to tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tuning {
    /// Install the vanilla CSR kernel and discard any compressed
    /// representation.
    None,
    /// Build the best representation the configuration allows.
    Aggressive,
}

/// Symmetric multiplication strategy the dispatcher installs on
/// aggressive tuning (multi-threaded symmetric matrices only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymStrategy {
    /// Conflict-free scheduling via graph coloring.
    #[default]
    ConflictFree,
    /// Atomic accumulation into shared output positions.
    Atomics,
    /// Per-thread local vectors, dense team reduction.
    EffectiveRanges,
    /// Per-thread local vectors, reduction over indexed conflicts only.
    LocalVectors,
}

/// Construction-time configuration, read once.
#[derive(Debug, Clone)]
pub struct Options {
    /// Worker threads; defaults to `OCHRE_NUM_THREADS` or the available
    /// parallelism, capped at [`MAX_THREADS`].
    pub nthreads: Option<usize>,
    pub platform: Platform,
    /// Request symmetric compression. Ignored (with a log message) when
    /// the matrix is not symmetric.
    pub symmetric: bool,
    /// Split off high-bandwidth nonzeros into their own sub-matrix.
    pub hybrid: bool,
    /// Synchronize colors with team barriers instead of per-dependency
    /// completion flags.
    pub barriers: bool,
    /// Vertex-ordering heuristic for the colorer; `None` keeps the
    /// natural order.
    pub ordering: Option<OrderingHeuristic>,
    /// Color with the speculative parallel colorer instead of the
    /// sequential greedy one.
    pub parallel_coloring: bool,
    pub strategy: SymStrategy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            nthreads: None,
            platform: Platform::Cpu,
            symmetric: false,
            hybrid: false,
            barriers: false,
            ordering: None,
            parallel_coloring: false,
            strategy: SymStrategy::default(),
        }
    }
}

/// Staging arrays of the high-bandwidth sub-matrix (hybrid mode).
#[derive(Debug)]
struct HighStaging<T, I> {
    rowptr: Vec<I>,
    colind: Vec<I>,
    values: Vec<T>,
}

/// Installed kernel descriptor. Each variant owns exactly the data its
/// kernel reads; the single dispatch site lives in
/// [`CsrMatrix::dense_vector_multiply`].
#[derive(Debug)]
enum Strategy<T, I> {
    Vanilla,
    SplitNnz,
    SymSerial(Box<SymBlock<T, I>>),
    SymAtomics(Vec<SymBlock<T, I>>),
    SymEffectiveRanges(Vec<SymBlock<T, I>>),
    SymLocalVectors {
        blocks: Vec<SymBlock<T, I>>,
        map: ConflictMap,
    },
    SymConflictFree {
        blocks: Vec<SymBlock<T, I>>,
        ncolors: usize,
        done: DoneFlags,
    },
}

/// A sparse matrix with a tunable SpMV kernel.
///
/// The lifetime covers staging arrays borrowed through
/// [`CsrMatrix::from_raw_parts`]; owning constructors produce
/// `CsrMatrix<'static, _, _>`.
#[derive(Debug)]
pub struct CsrMatrix<'a, T: Value, I: Index> {
    platform: Platform,
    nrows: usize,
    ncols: usize,
    nnz: usize,
    nnz_high: usize,
    symmetric: bool,
    hybrid: bool,
    rowptr: Cow<'a, [I]>,
    colind: Cow<'a, [I]>,
    values: Cow<'a, [T]>,
    high: Option<HighStaging<T, I>>,
    nthreads: usize,
    row_split: Vec<usize>,
    barriers: bool,
    ordering: Option<OrderingHeuristic>,
    parallel_coloring: bool,
    strategy_pref: SymStrategy,
    pool: ThreadPool,
    strategy: Strategy<T, I>,
    nnz_lower: usize,
    nnz_diag: usize,
    ncolors: usize,
    nranges: usize,
}

fn resolve_threads(requested: Option<usize>) -> Result<usize> {
    let n = match requested {
        Some(n) => n,
        None => match std::env::var("OCHRE_NUM_THREADS") {
            Ok(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("bad OCHRE_NUM_THREADS value `{s}`")))?,
            Err(_) => std::thread::available_parallelism().map_or(1, usize::from),
        },
    };
    if n == 0 {
        return Err(Error::Config("thread count must be nonzero".into()));
    }
    Ok(n.min(MAX_THREADS))
}

fn build_pool(nthreads: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .build()
        .map_err(|e| Error::Config(e.to_string()))
}

impl<T: Value, I: Index> CsrMatrix<'static, T, I> {
    /// Reads a Matrix-Market file and stages it in CSR form.
    ///
    /// Symmetric compression is used only when both the options request it
    /// and the file declares it; otherwise the matrix falls back to the
    /// general CSR path.
    pub fn from_file(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let market = ochre_io::read_market_path::<T, I>(path)?;
        let mut options = options;
        if options.symmetric && !market.symmetric {
            log::info!("matrix is not symmetric, rolling back to CSR format");
            options.symmetric = false;
        }

        let nthreads = resolve_threads(options.nthreads)?;
        let pool = build_pool(nthreads)?;

        // First-touch the staging arrays across the pool, then fill them
        // serially from the (sorted) triplet stream.
        let nnz = market.entries.len();
        let mut rowptr = first_touch_vec(market.nrows + 1, I::zero(), &pool);
        let mut colind = first_touch_vec(nnz, I::zero(), &pool);
        let mut values = first_touch_vec(nnz, T::zero(), &pool);
        fill_staging(
            market.nrows,
            market.ncols,
            &market.entries,
            &mut rowptr,
            &mut colind,
            &mut values,
        )?;

        Self::finish_init(
            pool,
            nthreads,
            market.nrows,
            market.ncols,
            Cow::Owned(rowptr),
            Cow::Owned(colind),
            Cow::Owned(values),
            options,
        )
    }

    /// Takes ownership of a staged CSR matrix.
    pub fn from_csr(csr: Csr<T, I>, options: Options) -> Result<Self> {
        validate_parts(csr.nrows, csr.ncols, &csr.rowptr, &csr.colind, &csr.values, true)?;
        let nthreads = resolve_threads(options.nthreads)?;
        let pool = build_pool(nthreads)?;
        Self::finish_init(
            pool,
            nthreads,
            csr.nrows,
            csr.ncols,
            Cow::Owned(csr.rowptr),
            Cow::Owned(csr.colind),
            Cow::Owned(csr.values),
            options,
        )
    }
}

impl<'a, T: Value, I: Index> CsrMatrix<'a, T, I> {
    /// Borrows raw CSR arrays without taking ownership.
    pub fn from_raw_parts(
        nrows: usize,
        ncols: usize,
        rowptr: &'a [I],
        colind: &'a [I],
        values: &'a [T],
        options: Options,
    ) -> Result<Self> {
        validate_parts(nrows, ncols, rowptr, colind, values, true)?;
        let nthreads = resolve_threads(options.nthreads)?;
        let pool = build_pool(nthreads)?;
        Self::finish_init(
            pool,
            nthreads,
            nrows,
            ncols,
            Cow::Borrowed(rowptr),
            Cow::Borrowed(colind),
            Cow::Borrowed(values),
            options,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_init(
        pool: ThreadPool,
        nthreads: usize,
        nrows: usize,
        ncols: usize,
        rowptr: Cow<'a, [I]>,
        colind: Cow<'a, [I]>,
        values: Cow<'a, [T]>,
        options: Options,
    ) -> Result<Self> {
        let symmetric = options.symmetric;
        if symmetric && nrows != ncols {
            return Err(Error::Config(
                "symmetric compression requires a square matrix".into(),
            ));
        }
        let hybrid = options.hybrid && symmetric && nthreads > 1;

        let mut matrix = Self {
            platform: options.platform,
            nrows,
            ncols,
            nnz: colind.len(),
            nnz_high: 0,
            symmetric,
            hybrid,
            rowptr,
            colind,
            values,
            high: None,
            nthreads,
            row_split: Vec::new(),
            barriers: options.barriers,
            ordering: options.ordering,
            parallel_coloring: options.parallel_coloring,
            strategy_pref: options.strategy,
            pool,
            strategy: Strategy::Vanilla,
            nnz_lower: 0,
            nnz_diag: 0,
            ncolors: 0,
            nranges: 0,
        };

        if matrix.hybrid {
            log::info!("clustering matrix into low and high bandwidth nonzeros");
            let split = partition::split_by_bandwidth(matrix.staging_view(), BW_THRESHOLD);
            matrix.nnz = split.low_values.len();
            matrix.nnz_high = split.high_values.len();
            matrix.rowptr = Cow::Owned(split.low_rowptr);
            matrix.colind = Cow::Owned(split.low_colind);
            matrix.values = Cow::Owned(split.low_values);
            matrix.high = Some(HighStaging {
                rowptr: split.high_rowptr,
                colind: split.high_colind,
                values: split.high_values,
            });
        }

        matrix.row_split = partition::split_by_nnz(
            matrix.staging_view(),
            matrix.high_view(),
            nthreads,
            matrix.symmetric,
        );
        Ok(matrix)
    }

    fn staging_view(&self) -> CsrView<'_, T, I> {
        CsrView {
            nrows: self.nrows,
            rowptr: self.rowptr.as_ref(),
            colind: self.colind.as_ref(),
            values: self.values.as_ref(),
        }
    }

    fn high_view(&self) -> Option<CsrView<'_, T, I>> {
        self.high.as_ref().map(|h| CsrView {
            nrows: self.nrows,
            rowptr: &h.rowptr,
            colind: &h.colind,
            values: &h.values,
        })
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored nonzeros (both bandwidth classes in hybrid mode).
    pub fn nnz(&self) -> usize {
        self.nnz + self.nnz_high
    }

    /// Whether the symmetric path is active.
    pub fn symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Worker threads backing this matrix.
    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Colors of the installed conflict-free schedule; 0 for any other
    /// kernel.
    pub fn ncolors(&self) -> usize {
        self.ncolors
    }

    /// Bytes of the live matrix representation's metadata and values.
    pub fn size(&self) -> usize {
        use std::mem::size_of;
        match &self.strategy {
            Strategy::Vanilla | Strategy::SplitNnz => {
                let mut bytes = self.rowptr.len() * size_of::<I>()
                    + self.colind.len() * size_of::<I>()
                    + self.values.len() * size_of::<T>()
                    + self.row_split.len() * size_of::<usize>();
                if let Some(h) = &self.high {
                    bytes += h.rowptr.len() * size_of::<I>()
                        + h.colind.len() * size_of::<I>()
                        + h.values.len() * size_of::<T>();
                }
                bytes
            }
            strategy => {
                // One rowptr per thread block plus the compressed payload.
                let mut bytes = (self.nrows + self.nthreads) * size_of::<I>();
                bytes += self.nnz_lower * (size_of::<I>() + size_of::<T>());
                bytes += self.nnz_diag * size_of::<T>();
                match strategy {
                    Strategy::SymConflictFree { .. } => {
                        bytes += (self.ncolors + 1) * self.nthreads * size_of::<usize>();
                        bytes += 2 * self.nranges * size_of::<usize>();
                    }
                    Strategy::SymLocalVectors { map, .. } => {
                        bytes += map.slices.len() * size_of::<(usize, usize)>();
                        bytes += map.pos.len() * size_of::<usize>();
                        bytes += map.cpu.len() * size_of::<u16>();
                    }
                    _ => {}
                }
                if self.hybrid {
                    bytes += (self.nrows + self.nthreads) * size_of::<I>();
                    bytes += self.nnz_high * (size_of::<I>() + size_of::<T>());
                }
                bytes
            }
        }
    }

    /// Installs the kernel for `tuning`. Returns whether an alternate code
    /// path (anything beyond the vanilla CSR kernel) was installed.
    pub fn tune(&mut self, kernel: Kernel, tuning: Tuning) -> bool {
        let Kernel::SpMV = kernel;
        self.ncolors = 0;
        self.nranges = 0;
        self.nnz_lower = 0;
        self.nnz_diag = 0;
        match tuning {
            Tuning::None => {
                self.strategy = Strategy::Vanilla;
                false
            }
            Tuning::Aggressive => {
                if self.symmetric {
                    log::info!("converting CSR format to symmetric compressed format");
                    self.compress_symmetry();
                } else {
                    self.strategy = Strategy::SplitNnz;
                }
                true
            }
        }
    }

    fn compress_symmetry(&mut self) {
        let staging = self.staging_view();
        let high = self.high_view();
        let mut blocks = compress::extract_blocks(&self.pool, staging, high, &self.row_split);
        self.nnz_lower = blocks.iter().map(|b| b.nnz_lower).sum();
        self.nnz_diag = blocks.iter().map(|b| b.nnz_diag).sum();

        if self.nthreads == 1 {
            let blk = blocks.pop().expect("single-thread extraction yields one block");
            self.strategy = Strategy::SymSerial(Box::new(blk));
            return;
        }

        match self.strategy_pref {
            SymStrategy::ConflictFree => {
                let g = graph::build(&self.pool, &blocks, &self.row_split, self.nrows);
                let order = self
                    .ordering
                    .map(|h| color::ordering(&g, &self.row_split, h));
                let (ncolors, mut colors) = if self.parallel_coloring {
                    color::speculative(&self.pool, &g, order.as_deref())
                } else {
                    color::greedy(&g, order.as_deref())
                };
                color::balance(&g, &mut colors, ncolors, self.nthreads);
                log::info!("conflict-free schedule uses {ncolors} colors");

                let ranges = schedule::compile_ranges(&self.pool, &blocks, &colors, ncolors);
                let deps = schedule::analyze_dependencies(&g, &colors, ncolors, self.nthreads);
                self.nranges = ranges.iter().map(schedule::ThreadRanges::nranges).sum();
                for ((blk, r), d) in blocks.iter_mut().zip(ranges).zip(deps) {
                    blk.range_ptr = r.range_ptr;
                    blk.range_start = r.range_start;
                    blk.range_end = r.range_end;
                    blk.deps = d;
                }
                self.ncolors = ncolors;
                let done = DoneFlags::new(self.nthreads, ncolors);
                self.strategy = Strategy::SymConflictFree {
                    blocks,
                    ncolors,
                    done,
                };
            }
            SymStrategy::Atomics => {
                self.strategy = Strategy::SymAtomics(blocks);
            }
            SymStrategy::EffectiveRanges => {
                self.alloc_local_vectors(&mut blocks);
                self.strategy = Strategy::SymEffectiveRanges(blocks);
            }
            SymStrategy::LocalVectors => {
                self.alloc_local_vectors(&mut blocks);
                let map = build_conflict_map(&blocks, &self.row_split);
                self.strategy = Strategy::SymLocalVectors { blocks, map };
            }
        }
    }

    fn alloc_local_vectors(&self, blocks: &mut [SymBlock<T, I>]) {
        for (tid, blk) in blocks.iter_mut().enumerate().skip(1) {
            blk.local_vector = Some(vec![T::zero(); self.row_split[tid]]);
        }
    }

    /// Computes `y = A x` with the installed kernel.
    ///
    /// `x` must provide at least `ncols` values and is read-only; the
    /// first `nrows` positions of `y` are fully written. `x` and `y` must
    /// not alias. Never fails and never allocates once tuned.
    pub fn dense_vector_multiply(&mut self, y: &mut [T], x: &[T]) {
        assert!(y.len() >= self.nrows, "y shorter than nrows");
        assert!(x.len() >= self.ncols, "x shorter than ncols");
        let staging = CsrView {
            nrows: self.nrows,
            rowptr: self.rowptr.as_ref(),
            colind: self.colind.as_ref(),
            values: self.values.as_ref(),
        };
        let high = self.high.as_ref().map(|h| CsrView {
            nrows: self.nrows,
            rowptr: &h.rowptr,
            colind: &h.colind,
            values: &h.values,
        });
        match &mut self.strategy {
            Strategy::Vanilla => spmv::mv_vanilla(&self.pool, staging, high, y, x),
            Strategy::SplitNnz => {
                spmv::mv_split_nnz(&self.pool, staging, high, &self.row_split, y, x);
            }
            Strategy::SymSerial(blk) => spmv::mv_sym_serial(blk, y, x),
            Strategy::SymAtomics(blocks) => spmv::mv_sym_atomics(&self.pool, blocks, y, x),
            Strategy::SymEffectiveRanges(blocks) => {
                spmv::mv_sym_effective_ranges(&self.pool, blocks, &self.row_split, y, x);
            }
            Strategy::SymLocalVectors { blocks, map } => {
                spmv::mv_sym_local_vectors(&self.pool, blocks, map, y, x);
            }
            Strategy::SymConflictFree {
                blocks,
                ncolors,
                done,
            } => {
                spmv::mv_sym_conflict_free(
                    &self.pool,
                    blocks,
                    *ncolors,
                    done,
                    self.barriers,
                    y,
                    x,
                );
            }
        }
    }
}

/// Fills pre-allocated staging arrays from a sorted triplet stream,
/// validating monotone rows, strictly increasing columns (no duplicate
/// coordinates) and index bounds.
fn fill_staging<T: Value, I: Index>(
    nrows: usize,
    ncols: usize,
    entries: &[Triplet<T, I>],
    rowptr: &mut [I],
    colind: &mut [I],
    values: &mut [T],
) -> Result<()> {
    let nnz = entries.len();
    let mut row_prev = 0usize;
    let mut col_prev: Option<usize> = None;
    rowptr[0] = I::zero();
    for (k, t) in entries.iter().enumerate() {
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
        colind[k] = t.col;
        values[k] = t.value;
    }
    for r in row_prev..nrows {
        rowptr[r + 1] = I::from_usize(nnz);
    }
    Ok(())
}

/// Builds the sparse conflict index for the local-vectors strategy: every
/// `(position, source thread)` pair where a local vector holds a
/// contribution, grouped by position, with per-thread reduction slices
/// that never split a position's group.
fn build_conflict_map<T: Value, I: Index>(
    blocks: &[SymBlock<T, I>],
    row_split: &[usize],
) -> ConflictMap {
    let nthreads = blocks.len();
    let mut global: BTreeMap<usize, BTreeSet<u16>> = BTreeMap::new();
    for (tid, blk) in blocks.iter().enumerate().skip(1) {
        let off = blk.row_offset;
        for li in 0..blk.nrows {
            for j in blk.rowptr[li].as_usize()..blk.rowptr[li + 1].as_usize() {
                let col = blk.colind[j].as_usize();
                if col < row_split[tid] {
                    global.entry(col).or_default().insert(tid as u16);
                }
            }
        }
        debug_assert_eq!(off, row_split[tid]);
    }

    let total: usize = global.values().map(BTreeSet::len).sum();
    let mut pos = Vec::with_capacity(total);
    let mut cpu = Vec::with_capacity(total);
    let mut slices = vec![(total, total); nthreads];
    let mut tid = 0usize;
    let mut start = 0usize;
    let mut remaining = total;
    for (&col, sources) in &global {
        for &src in sources {
            pos.push(col);
            cpu.push(src);
        }
        let filled = pos.len() - start;
        let quota = remaining.div_ceil(nthreads - tid);
        if filled >= quota && tid < nthreads - 1 {
            slices[tid] = (start, pos.len());
            remaining -= filled;
            start = pos.len();
            tid += 1;
        }
    }
    slices[tid] = (start, total);

    ConflictMap { pos, cpu, slices }
}
