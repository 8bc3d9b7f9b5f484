use super::blocked::blocks_for;

/// Copy three SoA arrays into a Blocked buffer, padding the last block's
/// unused tail lanes with zeros. `out` must already be sized
/// `3 * block_size * ceil(n / block_size)`.
pub fn pack_soa_to_blocked(x: &[f32], y: &[f32], z: &[f32], n: usize, block_size: usize, out: &mut [f32]) {
    debug_assert_eq!(x.len(), n);
    debug_assert_eq!(y.len(), n);
    debug_assert_eq!(z.len(), n);
    let blocks = blocks_for(n, block_size);
    debug_assert_eq!(out.len(), 3 * block_size * blocks);

    out.fill(0.0);
    for i in 0..n {
        let block = i / block_size;
        let lane = i % block_size;
        let base = block * 3 * block_size;
        out[base + lane] = x[i];
        out[base + block_size + lane] = y[i];
        out[base + 2 * block_size + lane] = z[i];
    }
}

/// Inverse of [`pack_soa_to_blocked`]: copy the first `n` logical lanes of a
/// Blocked buffer back out into three SoA arrays. Padding lanes beyond `n`
/// are not read.
pub fn unpack_blocked_to_soa(input: &[f32], n: usize, block_size: usize, x: &mut [f32], y: &mut [f32], z: &mut [f32]) {
    debug_assert_eq!(x.len(), n);
    debug_assert_eq!(y.len(), n);
    debug_assert_eq!(z.len(), n);

    for i in 0..n {
        let block = i / block_size;
        let lane = i % block_size;
        let base = block * 3 * block_size;
        x[i] = input[base + lane];
        y[i] = input[base + block_size + lane];
        z[i] = input[base + 2 * block_size + lane];
    }
}
