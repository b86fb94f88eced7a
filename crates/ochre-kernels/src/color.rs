//! Distance-1 graph coloring.
//!
//! Same-color vertices never share an edge, so the executor may run all
//! blocks of one color concurrently. Two colorers are provided: a
//! sequential greedy pass (the default) and a speculative parallel pass
//! that tentatively colors, detects clashes and retries. Either can be
//! preceded by a vertex-ordering heuristic and followed by a per-thread
//! load-balancing pass over the vertex weights.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::ThreadPool;

use crate::graph::ConflictGraph;
use crate::{BALANCING_STEPS, BLK_BITS, BLK_FACTOR};

/// Sentinel for a vertex that has not been assigned a color yet.
const UNCOLORED: usize = usize::MAX;

/// Vertex orderings for the greedy colorer.
///
/// The round-robin variants interleave vertices from different thread
/// partitions, which spreads every color across all threads and improves
/// per-color load balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingHeuristic {
    /// Natural partition order, one vertex per thread in turn.
    #[default]
    FirstFitRoundRobin,
    /// Globally by increasing vertex weight.
    ShortestRow,
    /// Per-thread by increasing weight, interleaved across threads.
    ShortestRowRoundRobin,
    /// Globally by decreasing vertex weight.
    LongestRow,
    /// Per-thread by decreasing weight, interleaved across threads.
    LongestRowRoundRobin,
}

/// Builds the vertex visit order for a heuristic.
pub(crate) fn ordering(
    g: &ConflictGraph,
    row_split: &[usize],
    heuristic: OrderingHeuristic,
) -> Vec<usize> {
    let nthreads = row_split.len() - 1;
    let v = g.len();
    let mut order = Vec::with_capacity(v);
    match heuristic {
        OrderingHeuristic::FirstFitRoundRobin => {
            let mut offset = 0usize;
            while order.len() < v {
                for t in 0..nthreads {
                    let row = row_split[t] + offset;
                    if row < row_split[t + 1] {
                        order.push(row >> BLK_BITS);
                    }
                }
                offset += BLK_FACTOR;
            }
        }
        OrderingHeuristic::ShortestRow => {
            order.extend(0..v);
            order.sort_by_key(|&u| (g.weight[u], u));
        }
        OrderingHeuristic::LongestRow => {
            order.extend(0..v);
            order.sort_by_key(|&u| (std::cmp::Reverse(g.weight[u]), u));
        }
        OrderingHeuristic::ShortestRowRoundRobin | OrderingHeuristic::LongestRowRoundRobin => {
            let mut per_thread: Vec<Vec<usize>> = vec![Vec::new(); nthreads];
            for u in 0..v {
                per_thread[g.owner[u]].push(u);
            }
            for list in &mut per_thread {
                if heuristic == OrderingHeuristic::ShortestRowRoundRobin {
                    list.sort_by_key(|&u| (g.weight[u], u));
                } else {
                    list.sort_by_key(|&u| (std::cmp::Reverse(g.weight[u]), u));
                }
            }
            let mut cursors = vec![0usize; nthreads];
            while order.len() < v {
                for t in 0..nthreads {
                    if cursors[t] < per_thread[t].len() {
                        order.push(per_thread[t][cursors[t]]);
                        cursors[t] += 1;
                    }
                }
            }
        }
    }
    debug_assert_eq!(order.len(), v);
    order
}

/// Sequential greedy distance-1 coloring.
///
/// Visits vertices in `order` (natural order when absent) and assigns the
/// smallest color unused by any neighbor. The `mark` array records, per
/// color, the step at which it was last seen on a neighbor, making each
/// assignment O(degree). Duplicate edges and self-loops are harmless.
///
/// Returns `(ncolors, color)`.
pub(crate) fn greedy(g: &ConflictGraph, order: Option<&[usize]>) -> (usize, Vec<usize>) {
    let v = g.len();
    let mut color = vec![UNCOLORED; v];
    let mut mark = vec![usize::MAX; v];
    let mut max_color = 0usize;

    for step in 0..v {
        let current = order.map_or(step, |o| o[step]);
        for &n in &g.adj[current] {
            let c = color[n];
            if c != UNCOLORED {
                mark[c] = step;
            }
        }
        let mut j = 0usize;
        while j < max_color && mark[j] == step {
            j += 1;
        }
        if j == max_color {
            max_color += 1;
        }
        color[current] = j;
    }
    (max_color, color)
}

/// Speculative parallel distance-1 coloring.
///
/// Rounds of: tentative coloring of the worklist in static per-thread
/// chunks; global max-color reconciliation; conflict detection where the
/// higher-numbered endpoint of a same-color edge loses its color; worklist
/// compaction. The lowest-numbered vertex of any clash keeps its color, so
/// every round commits at least one vertex.
pub(crate) fn speculative(
    pool: &ThreadPool,
    g: &ConflictGraph,
    order: Option<&[usize]>,
) -> (usize, Vec<usize>) {
    let v = g.len();
    let nthreads = pool.current_num_threads().max(1);
    let color: Vec<AtomicUsize> = (0..v).map(|_| AtomicUsize::new(UNCOLORED)).collect();
    let mut worklist: Vec<usize> = match order {
        Some(o) => o.to_vec(),
        None => (0..v).collect(),
    };
    let mut max_color_global = 0usize;

    while !worklist.is_empty() {
        let pending = worklist.len();
        let chunk = pending.div_ceil(nthreads);
        let worklist_ref = &worklist;
        let color_ref = &color;

        // Tentative coloring.
        let max_per_thread: Vec<usize> = pool.broadcast(|ctx| {
            let tid = ctx.index();
            let start = (tid * chunk).min(pending);
            let end = (start + chunk).min(pending);
            let mut mark = vec![usize::MAX; v];
            let mut max_color = max_color_global;
            for (i, &current) in worklist_ref[start..end].iter().enumerate() {
                let stamp = start + i;
                for &n in &g.adj[current] {
                    if n != current {
                        let c = color_ref[n].load(Ordering::Relaxed);
                        if c != UNCOLORED {
                            mark[c] = stamp;
                        }
                    }
                }
                let mut j = 0usize;
                while j < max_color && mark[j] == stamp {
                    j += 1;
                }
                if j == max_color {
                    max_color += 1;
                }
                color_ref[current].store(j, Ordering::Relaxed);
            }
            max_color
        });
        max_color_global = max_per_thread.into_iter().max().unwrap_or(max_color_global);

        // Conflict detection: the higher-numbered endpoint backs off.
        pool.broadcast(|ctx| {
            let tid = ctx.index();
            let start = (tid * chunk).min(pending);
            let end = (start + chunk).min(pending);
            for &current in &worklist_ref[start..end] {
                let mine = color_ref[current].load(Ordering::Relaxed);
                for &n in &g.adj[current] {
                    if n < current && color_ref[n].load(Ordering::Relaxed) == mine {
                        color_ref[current].store(UNCOLORED, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        worklist.retain(|&u| color[u].load(Ordering::Relaxed) == UNCOLORED);
    }

    let color: Vec<usize> = color.into_iter().map(AtomicUsize::into_inner).collect();
    (max_color_global, color)
}

/// Per-thread color load balancing.
///
/// For each thread independently: compute the nonzero load of every color,
/// then repeatedly move the heaviest vertex out of the most overloaded bin
/// into the lightest bin its neighbors allow. Vertices pop in descending
/// weight. The neighbor constraint is re-checked on every move, so the
/// coloring stays valid; the pass never adds colors.
pub(crate) fn balance(g: &ConflictGraph, color: &mut [usize], ncolors: usize, nthreads: usize) {
    if ncolors < 2 {
        return;
    }
    let v = g.len();
    for tid in 0..nthreads {
        let mut total_load = 0usize;
        let mut load = vec![0usize; ncolors];
        let mut bin: Vec<BinaryHeap<(usize, usize)>> = vec![BinaryHeap::new(); ncolors];
        for u in 0..v {
            if g.owner[u] == tid {
                total_load += g.weight[u];
                load[color[u]] += g.weight[u];
                bin[color[u]].push((g.weight[u], u));
            }
        }
        let mean_load = total_load / ncolors;

        for _ in 0..BALANCING_STEPS {
            let heaviest = (0..ncolors)
                .max_by_key(|&c| load[c] as isize - mean_load as isize)
                .unwrap_or(0);
            let mut candidates = bin[heaviest].len();
            while load[heaviest] > mean_load && candidates > 0 {
                candidates -= 1;
                let Some(&(weight, u)) = bin[heaviest].peek() else {
                    break;
                };
                let mut used = vec![false; ncolors];
                used[heaviest] = true;
                for &n in &g.adj[u] {
                    if n != u {
                        used[color[n]] = true;
                    }
                }
                let mut dest = heaviest;
                let mut dest_load = load[heaviest];
                for c in 0..ncolors {
                    if !used[c] && load[c] < dest_load {
                        dest = c;
                        dest_load = load[c];
                    }
                }
                if dest != heaviest {
                    bin[heaviest].pop();
                    color[u] = dest;
                    load[heaviest] -= weight;
                    load[dest] += weight;
                    bin[dest].push((weight, u));
                }
            }
        }
    }
}

/// Checks that no edge connects same-colored vertices.
#[cfg(test)]
pub(crate) fn is_valid_coloring(g: &ConflictGraph, color: &[usize]) -> bool {
    (0..g.len()).all(|u| g.adj[u].iter().all(|&n| n == u || color[n] != color[u]))
}
