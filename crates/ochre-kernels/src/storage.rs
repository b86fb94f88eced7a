//! First-touch array allocation.
//!
//! On NUMA systems pages are placed on the node of the thread that first
//! writes them, so arrays shared by the pool are initialized in parallel
//! with the same static chunking their later readers use. The per-thread
//! compressed blocks do not come through here: they are allocated and
//! filled entirely by their owner thread.

use rayon::prelude::*;
use rayon::ThreadPool;

/// Allocates a vector of `len` copies of `init`, first-touched in parallel
/// static chunks across the pool.
pub(crate) fn first_touch_vec<U: Copy + Send + Sync>(
    len: usize,
    init: U,
    pool: &ThreadPool,
) -> Vec<U> {
    let mut v: Vec<U> = Vec::with_capacity(len);
    if len == 0 {
        return v;
    }
    let nthreads = pool.current_num_threads().max(1);
    let chunk = len.div_ceil(nthreads);
    let spare = &mut v.spare_capacity_mut()[..len];
    pool.install(|| {
        spare.par_chunks_mut(chunk).for_each(|part| {
            for slot in part {
                slot.write(init);
            }
        });
    });
    // Every slot in 0..len was just written.
    unsafe { v.set_len(len) };
    v
}
