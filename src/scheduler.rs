//! Runs the distance kernel serially or partitions islands across a rayon
//! thread pool. Both modes are deterministic in their outputs regardless of
//! thread count: islands share no nodes, so inter-island projection is
//! embarrassingly parallel, while projection *within* one island stays
//! strictly Gauss-Seidel and sequential.

use std::ops::Range;

use crate::model::Island;

/// Execution strategy for island projection. Part of execution policy, not
/// of the kernels themselves -- the same kernel signature is reused by both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduling {
    Sequential,
    /// `max_threads == 0` means "library default" (rayon's own sizing).
    Parallel { max_threads: usize },
}

/// Iterate islands in stored order, invoking `f` once per island with its
/// edge-index range.
pub fn run_sequential(islands: &[Island], mut f: impl FnMut(Range<usize>)) {
    for island in islands {
        f(island.edge_range());
    }
}

/// Submit one task per island to a scoped rayon thread pool bounded by
/// `max_threads` (0 = rayon's global pool / default sizing), then join all
/// tasks before returning. `f` must be `Sync` since it runs concurrently
/// across islands; callers satisfy this by partitioning their mutable
/// buffers per-island before calling (see `runtime::project_distance_parallel`).
pub fn run_parallel(islands: &[Island], max_threads: usize, f: impl Fn(usize, Range<usize>) + Sync) {
    use rayon::prelude::*;

    let ranges: Vec<Range<usize>> = islands.iter().map(|isl| isl.edge_range()).collect();

    if max_threads == 0 {
        ranges.par_iter().enumerate().for_each(|(idx, r)| f(idx, r.clone()));
    } else {
        // A scoped pool sized per the policy hint; bounded by `max_threads`.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_threads)
            .build()
            .expect("failed to build bounded rayon thread pool");
        pool.install(|| {
            ranges.par_iter().enumerate().for_each(|(idx, r)| f(idx, r.clone()));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Island;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_islands() -> Vec<Island> {
        vec![
            Island { offset: 0, count: 3 },
            Island { offset: 3, count: 2 },
            Island { offset: 5, count: 4 },
        ]
    }

    #[test]
    fn sequential_visits_every_island_in_order() {
        let islands = sample_islands();
        let mut seen = Vec::new();
        run_sequential(&islands, |r| seen.push(r));
        assert_eq!(seen, vec![0..3, 3..5, 5..9]);
    }

    #[test]
    fn parallel_visits_every_island_exactly_once() {
        let islands = sample_islands();
        let visits = AtomicUsize::new(0);
        run_parallel(&islands, 2, |_idx, r| {
            assert!(r.len() > 0);
            visits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visits.load(Ordering::Relaxed), islands.len());
    }
}
