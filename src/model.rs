//! The immutable topology Model produced by [`crate::cooking`]: edges, rest
//! lengths, bend quads, island partition, node remap, and the chosen block
//! size. Replaced wholesale (never mutated in place) on structural rebuild.

use crate::kernels::bending::BendQuad;

/// A maximal connected component of the edge graph, stored as a contiguous
/// range `[offset, offset + count)` of edge indices. Every edge belongs to
/// exactly one island; islands touch disjoint sets of nodes, which is what
/// lets the scheduler project them in parallel without data races.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Island {
    pub offset: usize,
    pub count: usize,
}

impl Island {
    pub fn edge_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.count
    }
}

/// Immutable after build. Produced by [`crate::cooking::cook`] and replaced
/// atomically by [`crate::cooking::rebuild`] on structural commands.
#[derive(Debug, Clone)]
pub struct Model {
    pub node_count: u32,
    /// Flat `(a, b)` pairs, length `2 * edge_count`.
    pub edges: Vec<u32>,
    /// Rest length per edge, length `edge_count`.
    pub rest: Vec<f32>,
    /// Islands in the order edges were reordered into.
    pub islands: Vec<Island>,
    /// `old_id -> new_id` bijection on `[0, node_count)`. Identity after the
    /// first build; updated by structural rebuilds.
    pub node_remap: Vec<u32>,
    pub bend_quads: Vec<BendQuad>,
    /// Rest dihedral angle per bend quad, length == `bend_quads.len()`.
    pub bend_rest_angle: Vec<f32>,
    pub block_size: usize,
}

impl Model {
    pub fn edge_count(&self) -> usize {
        self.rest.len()
    }

    /// Total edge-index span covered by the island partition; must equal
    /// `edge_count()` for the partition invariant to hold.
    pub fn island_edge_span(&self) -> usize {
        self.islands.iter().map(|i| i.count).sum()
    }

    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        assert_eq!(self.edges.len(), 2 * self.rest.len());
        assert_eq!(self.island_edge_span(), self.edge_count());
        assert_eq!(self.node_remap.len(), self.node_count as usize);
        for &e in &self.edges {
            assert!((e as u32) < self.node_count);
        }
        let mut offset = 0usize;
        for island in &self.islands {
            assert_eq!(island.offset, offset);
            offset += island.count;
        }
        assert_eq!(offset, self.edge_count());
        let mut seen = vec![false; self.node_count as usize];
        for &new_id in &self.node_remap {
            assert!(!seen[new_id as usize], "node remap is not a bijection");
            seen[new_id as usize] = true;
        }
    }
}
