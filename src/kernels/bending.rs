//! Dihedral bending constraint projection.
//!
//! For each bend quad `(i0, i1, i2, i3)` where `(i0, i1)` is the shared edge
//! of two triangles and `i2`, `i3` are their opposing vertices, pushes the
//! dihedral angle between the triangles toward a rest angle computed at
//! cooking time. This is a simplified projection (not a full XPBD
//! constraint with its own compliance/lambda) — stable within the substep
//! loop at moderate stiffness, per the reference behavior.

use crate::storage::StorageView;

use super::{BEND_ANGLE_EPS, BEND_STIFFNESS_STEP, DEGENERATE_NORMAL_EPS};

#[inline]
fn cross(ax: f32, ay: f32, az: f32, bx: f32, by: f32, bz: f32) -> (f32, f32, f32) {
    (ay * bz - az * by, az * bx - ax * bz, ax * by - ay * bx)
}

#[inline]
fn dot(ax: f32, ay: f32, az: f32, bx: f32, by: f32, bz: f32) -> f32 {
    ax * bx + ay * by + az * bz
}

#[inline]
fn len(x: f32, y: f32, z: f32) -> f32 {
    (x * x + y * y + z * z).sqrt()
}

/// One bend quad: `(i0, i1, i2, i3)`. `(i0, i1)` is the shared edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BendQuad {
    pub i0: u32,
    pub i1: u32,
    pub i2: u32,
    pub i3: u32,
}

/// Run `iterations` sweeps of dihedral bending projection over every quad.
/// Unlike distance constraints, bend quads are not partitioned into islands
/// by this crate (see [`crate::model::Model::bend_quads`]); the runtime
/// always runs this kernel single-threaded over the full quad list.
pub fn project_all<V: StorageView>(pos: &mut V, quads: &[BendQuad], rest_angle: &[f32], iterations: u32) {
    debug_assert_eq!(quads.len(), rest_angle.len());
    for _ in 0..iterations {
        for (q, &theta0) in quads.iter().zip(rest_angle) {
            project_one(pos, q, theta0);
        }
    }
}

fn project_one<V: StorageView>(pos: &mut V, q: &BendQuad, theta0: f32) {
    let (i0, i1, i2, i3) = (q.i0 as usize, q.i1 as usize, q.i2 as usize, q.i3 as usize);
    let (x0, y0, z0) = pos.read(i0);
    let (x1, y1, z1) = pos.read(i1);
    let (x2, y2, z2) = pos.read(i2);
    let (x3, y3, z3) = pos.read(i3);

    let e0 = (x1 - x0, y1 - y0, z1 - z0);
    let e1 = (x2 - x0, y2 - y0, z2 - z0);
    let e2 = (x3 - x0, y3 - y0, z3 - z0);

    let n1 = cross(e0.0, e0.1, e0.2, e1.0, e1.1, e1.2);
    let n2 = cross(e0.0, e0.1, e0.2, e2.0, e2.1, e2.2);
    let n1_len = len(n1.0, n1.1, n1.2);
    let n2_len = len(n2.0, n2.1, n2.2);
    if n1_len < DEGENERATE_NORMAL_EPS || n2_len < DEGENERATE_NORMAL_EPS {
        return;
    }

    let cos_theta = (dot(n1.0, n1.1, n1.2, n2.0, n2.1, n2.2) / (n1_len * n2_len)).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    let err = theta - theta0;
    if err.abs() < BEND_ANGLE_EPS {
        return;
    }

    let n1_hat = (n1.0 / n1_len, n1.1 / n1_len, n1.2 / n1_len);
    let n2_hat = (n2.0 / n2_len, n2.1 / n2_len, n2.2 / n2_len);
    let k = BEND_STIFFNESS_STEP;

    pos.accumulate(i2, -k * err * n1_hat.0, -k * err * n1_hat.1, -k * err * n1_hat.2);
    pos.accumulate(i3, k * err * n2_hat.0, k * err * n2_hat.1, k * err * n2_hat.2);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SoaView;

    #[test]
    fn folded_quad_relaxes_toward_flat() {
        // Two triangles sharing edge (0,1), folded so node 2 is lifted out
        // of the plane. Rest angle is flat (pi radians, i.e. coplanar
        // triangles pointing the same way) -- drive it there.
        let mut x = [0.0f32, 1.0, 0.0, 1.0];
        let mut y = [0.0f32, 0.0, 1.0, 1.0];
        let mut z = [0.0f32, 0.0, 1.0, 0.0];
        let quads = [BendQuad { i0: 0, i1: 1, i2: 2, i3: 3 }];

        let mut view = SoaView::new(&mut x, &mut y, &mut z);
        let (x0, y0, z0) = view.read(0);
        let (x1, y1, z1) = view.read(1);
        let (x2, y2, z2) = view.read(2);
        let (x3, y3, z3) = view.read(3);
        let e0 = (x1 - x0, y1 - y0, z1 - z0);
        let e1 = (x2 - x0, y2 - y0, z2 - z0);
        let e2 = (x3 - x0, y3 - y0, z3 - z0);
        let n1 = cross(e0.0, e0.1, e0.2, e1.0, e1.1, e1.2);
        let n2 = cross(e0.0, e0.1, e0.2, e2.0, e2.1, e2.2);
        let theta0 = (dot(n1.0, n1.1, n1.2, n2.0, n2.1, n2.2) / (len(n1.0, n1.1, n1.2) * len(n2.0, n2.1, n2.2)))
            .clamp(-1.0, 1.0)
            .acos();
        // Perturb node 2 further out of plane, then drive back to theta0.
        view.write(2, 0.0, 1.0, 0.6);

        let rest_angle = [theta0];
        project_all(&mut view, &quads, &rest_angle, 50);

        let (_, _, z2_after) = view.read(2);
        assert!((z2_after - 1.0).abs() < 0.3, "z2 did not relax back toward rest fold: {z2_after}");
    }

    #[test]
    fn degenerate_zero_area_triangle_is_skipped() {
        let mut x = [0.0f32, 1.0, 0.0, 2.0];
        let mut y = [0.0f32, 0.0, 0.0, 0.0];
        let mut z = [0.0f32, 0.0, 0.0, 0.0];
        let quads = [BendQuad { i0: 0, i1: 1, i2: 2, i3: 3 }];
        let rest_angle = [0.0f32];
        let mut view = SoaView::new(&mut x, &mut y, &mut z);
        project_all(&mut view, &quads, &rest_angle, 5);
        assert_eq!(view.read(2), (0.0, 0.0, 0.0));
        assert_eq!(view.read(3), (2.0, 0.0, 0.0));
    }
}
