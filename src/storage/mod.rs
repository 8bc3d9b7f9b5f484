//! Layout-agnostic storage views over node position/velocity arrays.
//!
//! A [`StorageView`] gives kernels a single `read`/`write`/`accumulate`
//! surface regardless of whether the underlying buffer is Structure-of-Arrays
//! (SoA), Array-of-Structures (AoS), or Blocked/AoSoA. Kernels are written
//! once, generic over `V: StorageView`, and instantiated per layout by the
//! runtime once a [`crate::backend::Chosen`] has been picked.

mod aos;
mod blocked;
mod pack;
mod soa;

pub use aos::AosView;
pub use blocked::{blocks_for, BlockedView};
pub use pack::{pack_soa_to_blocked, unpack_blocked_to_soa};
pub use soa::SoaView;

/// Concrete memory layout for per-node Vec3 arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Three independent arrays `x[], y[], z[]`.
    Soa,
    /// One interleaved array of N triples.
    Aos,
    /// Nodes partitioned into `ceil(N/B)` blocks of B lanes each.
    Blocked,
}

impl Layout {
    pub const ALL: [Layout; 3] = [Layout::Soa, Layout::Aos, Layout::Blocked];

    pub fn name(self) -> &'static str {
        match self {
            Layout::Soa => "soa",
            Layout::Aos => "aos",
            Layout::Blocked => "blocked",
        }
    }
}

/// Layout-parametric read/write/accumulate on a Vec3 array of length N.
///
/// Implementations must compile `read`/`write`/`accumulate` to direct
/// loads/stores with no indirection beyond the index arithmetic the layout
/// itself requires (e.g. `(i / B, i % B)` for [`BlockedView`]).
pub trait StorageView {
    /// Number of logical nodes this view covers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read node `i`'s (x, y, z).
    fn read(&self, i: usize) -> (f32, f32, f32);

    /// Overwrite node `i`'s (x, y, z).
    fn write(&mut self, i: usize, x: f32, y: f32, z: f32);

    /// Add (dx, dy, dz) to node `i`'s current value.
    fn accumulate(&mut self, i: usize, dx: f32, dy: f32, dz: f32) {
        let (x, y, z) = self.read(i);
        self.write(i, x + dx, y + dy, z + dz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Any two views constructed over equivalent data must agree on every
    /// index, regardless of layout. This is the cross-layout contract the
    /// runtime's pack/unpack and kernel genericism both depend on.
    pub(crate) fn assert_same_contents(n: usize, a: &dyn StorageView, b: &dyn StorageView) {
        assert_eq!(a.len(), n);
        assert_eq!(b.len(), n);
        for i in 0..n {
            assert_eq!(a.read(i), b.read(i), "mismatch at node {i}");
        }
    }
}
