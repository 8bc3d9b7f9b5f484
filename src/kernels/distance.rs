//! XPBD distance (stretch) constraint projection.
//!
//! For each edge `(a, b)` with rest length `r` and precomputed compliance
//! `alpha_tilde = compliance / dt^2`:
//!
//! ```text
//! d = p_b - p_a;  L = |d|
//! C = L - r
//! denom = w_a + w_b + alpha_tilde
//! dlambda = -(C + alpha_tilde * lambda) / denom
//! c = (dlambda / L) * d
//! p_a -= w_a * c;  p_b += w_b * c
//! lambda += dlambda
//! ```
//!
//! Iteration is Gauss-Seidel within one sweep: edges are visited in the order
//! the Model stores them, and corrections from edge `e` are visible to edge
//! `e + 1` in the same sweep. The caller is responsible for restricting
//! `range` to one island so that parallel callers never touch overlapping
//! node slots.

use std::ops::Range;

use crate::storage::StorageView;

use super::DEGENERATE_LENGTH_EPS;

/// Run `iterations` Gauss-Seidel sweeps of distance projection over the edge
/// index range `range` (each edge index `e` owns endpoints
/// `edges[2e], edges[2e+1]`). Generic over the storage layout so the same
/// code serves SoA, AoS, and Blocked views — this is the "Scalar" backend,
/// and also the sole backend for the Blocked layout (its block-contiguous
/// access pattern is friendly to auto-vectorization without hand-written
/// intrinsics).
pub fn project_range<V: StorageView>(
    pos: &mut V,
    edges: &[u32],
    rest: &[f32],
    inv_mass: &[f32],
    lambda: &mut [f32],
    alpha_tilde: &[f32],
    range: Range<usize>,
    iterations: u32,
) {
    for _ in 0..iterations {
        for e in range.clone() {
            let a = edges[2 * e] as usize;
            let b = edges[2 * e + 1] as usize;
            let (ax, ay, az) = pos.read(a);
            let (bx, by, bz) = pos.read(b);
            let dx = bx - ax;
            let dy = by - ay;
            let dz = bz - az;
            let l = (dx * dx + dy * dy + dz * dz).sqrt();
            if l < DEGENERATE_LENGTH_EPS {
                continue;
            }
            let c = l - rest[e];
            let wa = inv_mass[a];
            let wb = inv_mass[b];
            let at = alpha_tilde[e];
            let denom = wa + wb + at;
            if denom <= 0.0 {
                continue;
            }
            let dlambda = -(c + at * lambda[e]) / denom;
            let s = dlambda / l;
            let cx = s * dx;
            let cy = s * dy;
            let cz = s * dz;
            if wa > 0.0 {
                pos.accumulate(a, -wa * cx, -wa * cy, -wa * cz);
            }
            if wb > 0.0 {
                pos.accumulate(b, wb * cx, wb * cy, wb * cz);
            }
            lambda[e] += dlambda;
        }
    }
}

/// Runtime-dispatched SIMD-wide distance projection over flat SoA arrays.
/// Falls back to the scalar kernel (via a [`crate::storage::SoaView`]) on
/// architectures or CPUs without the required feature. This is the "SIMD"
/// backend paired with the SoA layout; the Blocked layout uses
/// [`project_range`] directly since its block contiguity is already
/// auto-vectorization friendly.
pub fn project_range_simd(
    x: &mut [f32],
    y: &mut [f32],
    z: &mut [f32],
    edges: &[u32],
    rest: &[f32],
    inv_mass: &[f32],
    lambda: &mut [f32],
    alpha_tilde: &[f32],
    range: Range<usize>,
    iterations: u32,
) {
    #[cfg(target_arch = "x86_64")]
    {
        if avx2::is_available() {
            // SAFETY: guarded by the runtime feature check above.
            unsafe {
                avx2::project_range_avx2(x, y, z, edges, rest, inv_mass, lambda, alpha_tilde, range, iterations);
            }
            return;
        }
    }
    let mut view = crate::storage::SoaView::new(x, y, z);
    project_range(&mut view, edges, rest, inv_mass, lambda, alpha_tilde, range, iterations);
}

/// Returns true if this process can run the AVX2 SIMD distance kernel.
pub fn simd_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        avx2::is_available()
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;
    use std::ops::Range;
    use std::sync::OnceLock;

    use super::DEGENERATE_LENGTH_EPS;

    /// Edges per SIMD lane group (256-bit / 32-bit lanes).
    pub const WIDTH: usize = 8;

    pub fn is_available() -> bool {
        static CACHED: OnceLock<bool> = OnceLock::new();
        *CACHED.get_or_init(|| is_x86_feature_detected!("avx2"))
    }

    /// Gather-based AVX2 distance projection. Processes `WIDTH` edges per
    /// lane group per sweep; a final partial group (< WIDTH edges) is
    /// handled with the scalar kernel.
    ///
    /// # Safety
    /// Caller must have verified `is_available()` (AVX2 present) before
    /// calling. `edges` indices must all be `< x.len()` (== y.len() ==
    /// z.len()).
    #[target_feature(enable = "avx2")]
    pub unsafe fn project_range_avx2(
        x: &mut [f32],
        y: &mut [f32],
        z: &mut [f32],
        edges: &[u32],
        rest: &[f32],
        inv_mass: &[f32],
        lambda: &mut [f32],
        alpha_tilde: &[f32],
        range: Range<usize>,
        iterations: u32,
    ) {
        let full_groups = range.clone().count() / WIDTH;
        let tail_start = range.start + full_groups * WIDTH;

        for _ in 0..iterations {
            for g in 0..full_groups {
                let base = range.start + g * WIDTH;
                project_group(x, y, z, edges, rest, inv_mass, lambda, alpha_tilde, base);
            }
            // Tail: fewer than WIDTH edges left in this island's range.
            super::project_range(
                &mut crate::storage::SoaView::new(x, y, z),
                edges,
                rest,
                inv_mass,
                lambda,
                alpha_tilde,
                tail_start..range.end,
                1,
            );
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn project_group(
        x: &mut [f32],
        y: &mut [f32],
        z: &mut [f32],
        edges: &[u32],
        rest: &[f32],
        inv_mass: &[f32],
        lambda: &mut [f32],
        alpha_tilde: &[f32],
        base: usize,
    ) {
        // Gather the eight (a, b) endpoint indices for this lane group.
        let mut a_idx = [0i32; WIDTH];
        let mut b_idx = [0i32; WIDTH];
        for lane in 0..WIDTH {
            let e = base + lane;
            a_idx[lane] = edges[2 * e] as i32;
            b_idx[lane] = edges[2 * e + 1] as i32;
        }
        let a_idx_v = _mm256_loadu_si256(a_idx.as_ptr() as *const __m256i);
        let b_idx_v = _mm256_loadu_si256(b_idx.as_ptr() as *const __m256i);

        let ax = _mm256_i32gather_ps(x.as_ptr(), a_idx_v, 4);
        let ay = _mm256_i32gather_ps(y.as_ptr(), a_idx_v, 4);
        let az = _mm256_i32gather_ps(z.as_ptr(), a_idx_v, 4);
        let bx = _mm256_i32gather_ps(x.as_ptr(), b_idx_v, 4);
        let by = _mm256_i32gather_ps(y.as_ptr(), b_idx_v, 4);
        let bz = _mm256_i32gather_ps(z.as_ptr(), b_idx_v, 4);
        let wa = _mm256_i32gather_ps(inv_mass.as_ptr(), a_idx_v, 4);
        let wb = _mm256_i32gather_ps(inv_mass.as_ptr(), b_idx_v, 4);

        let dx = _mm256_sub_ps(bx, ax);
        let dy = _mm256_sub_ps(by, ay);
        let dz = _mm256_sub_ps(bz, az);
        let len_sq = _mm256_add_ps(_mm256_add_ps(_mm256_mul_ps(dx, dx), _mm256_mul_ps(dy, dy)), _mm256_mul_ps(dz, dz));

        // rsqrt + one Newton-Raphson refinement step, as specified.
        let rsqrt0 = _mm256_rsqrt_ps(len_sq);
        let half = _mm256_set1_ps(0.5);
        let three = _mm256_set1_ps(3.0);
        let rsqrt = _mm256_mul_ps(
            _mm256_mul_ps(half, rsqrt0),
            _mm256_sub_ps(three, _mm256_mul_ps(len_sq, _mm256_mul_ps(rsqrt0, rsqrt0))),
        );
        let len = _mm256_mul_ps(len_sq, rsqrt);

        let rest_v = _mm256_loadu_ps(rest[base..base + WIDTH].as_ptr());
        let at_v = _mm256_loadu_ps(alpha_tilde[base..base + WIDTH].as_ptr());
        let lambda_v = _mm256_loadu_ps(lambda[base..base + WIDTH].as_ptr());

        let c = _mm256_sub_ps(len, rest_v);
        let denom = _mm256_add_ps(_mm256_add_ps(wa, wb), at_v);
        let numer = _mm256_add_ps(c, _mm256_mul_ps(at_v, lambda_v));
        let dlambda = _mm256_div_ps(_mm256_sub_ps(_mm256_setzero_ps(), numer), denom);
        let s = _mm256_mul_ps(dlambda, rsqrt);

        let cx = _mm256_mul_ps(s, dx);
        let cy = _mm256_mul_ps(s, dy);
        let cz = _mm256_mul_ps(s, dz);

        // Scatter back scalar-by-scalar: XPBD's Gauss-Seidel coupling means
        // two lanes in the same group may share a node, so this cannot be
        // a vector store. Degenerate/both-pinned lanes are re-checked here
        // in scalar form to match the reference semantics exactly.
        let mut len_arr = [0f32; WIDTH];
        let mut cx_arr = [0f32; WIDTH];
        let mut cy_arr = [0f32; WIDTH];
        let mut cz_arr = [0f32; WIDTH];
        let mut dlambda_arr = [0f32; WIDTH];
        _mm256_storeu_ps(len_arr.as_mut_ptr(), len);
        _mm256_storeu_ps(cx_arr.as_mut_ptr(), cx);
        _mm256_storeu_ps(cy_arr.as_mut_ptr(), cy);
        _mm256_storeu_ps(cz_arr.as_mut_ptr(), cz);
        _mm256_storeu_ps(dlambda_arr.as_mut_ptr(), dlambda);

        for lane in 0..WIDTH {
            let e = base + lane;
            let a = a_idx[lane] as usize;
            let b = b_idx[lane] as usize;
            if len_arr[lane] < DEGENERATE_LENGTH_EPS {
                continue;
            }
            let wa_s = inv_mass[a];
            let wb_s = inv_mass[b];
            if wa_s + wb_s + alpha_tilde[e] <= 0.0 {
                continue;
            }
            if wa_s > 0.0 {
                x[a] -= wa_s * cx_arr[lane];
                y[a] -= wa_s * cy_arr[lane];
                z[a] -= wa_s * cz_arr[lane];
            }
            if wb_s > 0.0 {
                x[b] += wb_s * cx_arr[lane];
                y[b] += wb_s * cy_arr[lane];
                z[b] += wb_s * cz_arr[lane];
            }
            lambda[e] += dlambda_arr[lane];
        }
    }
}
