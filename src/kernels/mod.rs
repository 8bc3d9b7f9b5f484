//! Pure constraint-projection kernels: distance (XPBD stretch), bending
//! (dihedral), and attachment. Every kernel reads/writes predicted positions
//! in place, reads inverse masses, and performs no allocation — they are the
//! hot loop the rest of the crate exists to schedule and feed data into.

pub mod attachment;
pub mod bending;
pub mod distance;

/// Positions closer together than this are treated as coincident and the
/// constraint touching them is skipped for that sweep (division-by-zero
/// guard on the edge/normal direction).
pub const DEGENERATE_LENGTH_EPS: f32 = 1e-8;
pub const DEGENERATE_NORMAL_EPS: f32 = 1e-12;
pub const BEND_ANGLE_EPS: f32 = 1e-6;
pub const BEND_STIFFNESS_STEP: f32 = 0.1;
