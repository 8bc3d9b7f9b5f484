use super::StorageView;

/// Blocked (AoSoA) view: nodes are partitioned into `ceil(N/B)` blocks of B
/// lanes. Within one block the layout is `[x0..x_{B-1}, y0..y_{B-1},
/// z0..z_{B-1}]`, and blocks are laid out contiguously. Tail lanes beyond the
/// logical node count are padded with zeros but still addressable (they
/// belong to the last block).
pub struct BlockedView<'a> {
    data: &'a mut [f32],
    block_size: usize,
    len: usize,
}

impl<'a> BlockedView<'a> {
    /// `data` must be sized `3 * block_size * ceil(len / block_size)`.
    pub fn new(data: &'a mut [f32], block_size: usize, len: usize) -> Self {
        let blocks = blocks_for(len, block_size);
        debug_assert_eq!(data.len(), 3 * block_size * blocks);
        Self {
            data,
            block_size,
            len,
        }
    }

    #[inline]
    fn lane_offsets(&self, i: usize) -> (usize, usize) {
        let block = i / self.block_size;
        let lane = i % self.block_size;
        let block_base = block * 3 * self.block_size;
        (block_base, lane)
    }
}

/// Number of blocks of `block_size` needed to cover `len` nodes.
pub fn blocks_for(len: usize, block_size: usize) -> usize {
    (len + block_size - 1) / block_size
}

impl<'a> StorageView for BlockedView<'a> {
    fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn read(&self, i: usize) -> (f32, f32, f32) {
        let (base, lane) = self.lane_offsets(i);
        let b = self.block_size;
        (
            self.data[base + lane],
            self.data[base + b + lane],
            self.data[base + 2 * b + lane],
        )
    }

    #[inline]
    fn write(&mut self, i: usize, x: f32, y: f32, z: f32) {
        let (base, lane) = self.lane_offsets(i);
        let b = self.block_size;
        self.data[base + lane] = x;
        self.data[base + b + lane] = y;
        self.data[base + 2 * b + lane] = z;
    }

    #[inline]
    fn accumulate(&mut self, i: usize, dx: f32, dy: f32, dz: f32) {
        let (base, lane) = self.lane_offsets(i);
        let b = self.block_size;
        self.data[base + lane] += dx;
        self.data[base + b + lane] += dy;
        self.data[base + 2 * b + lane] += dz;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_for_rounds_up() {
        assert_eq!(blocks_for(0, 8), 0);
        assert_eq!(blocks_for(1, 8), 1);
        assert_eq!(blocks_for(8, 8), 1);
        assert_eq!(blocks_for(9, 8), 2);
    }

    #[test]
    fn read_write_crosses_block_boundary() {
        let b = 4usize;
        let len = 9usize; // spans three blocks of 4
        let blocks = blocks_for(len, b);
        let mut data = vec![0.0; 3 * b * blocks];
        let mut v = BlockedView::new(&mut data, b, len);
        for i in 0..len {
            v.write(i, i as f32, (i * 2) as f32, (i * 3) as f32);
        }
        for i in 0..len {
            assert_eq!(v.read(i), (i as f32, (i * 2) as f32, (i * 3) as f32));
        }
    }
}
