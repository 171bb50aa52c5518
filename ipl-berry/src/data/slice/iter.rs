use crate::{Idx2d, Idx3d};

/// 行优先 `(y, x)` 索引迭代器.
///
/// 与 `(0..h).flat_map(..)` 等价, 但对象更小, 且可以直接作为结构体字段保存.
#[derive(Clone, Debug)]
pub(crate) struct PosIter {
    cur: Idx2d,
    shape: Idx2d,
}

impl PosIter {
    #[inline]
    pub(crate) fn new(shape: Idx2d) -> Self {
        Self { cur: (0, 0), shape }
    }
}

impl Iterator for PosIter {
    type Item = Idx2d;

    fn next(&mut self) -> Option<Self::Item> {
        let (h, w) = self.shape;
        if h == 0 || w == 0 || self.cur.0 == h {
            return None;
        }
        let ret = self.cur;
        self.cur.1 += 1;
        if self.cur.1 == w {
            self.cur = (self.cur.0 + 1, 0);
        }
        Some(ret)
    }
}

/// 光栅序 (x 最快, 其次 y, 最后 z) 的三维 `(z, y, x)` 索引迭代器.
///
/// 连通域标号依赖该顺序: 标号小的连通域, 其最小光栅序体素也更靠前.
#[derive(Clone, Debug)]
pub(crate) struct VoxelIter {
    z: usize,
    nz: usize,
    plane: PosIter,
}

impl VoxelIter {
    #[inline]
    pub(crate) fn new((nz, ny, nx): Idx3d) -> Self {
        Self {
            z: 0,
            nz,
            plane: PosIter::new((ny, nx)),
        }
    }
}

impl Iterator for VoxelIter {
    type Item = Idx3d;

    fn next(&mut self) -> Option<Self::Item> {
        while self.z < self.nz {
            if let Some((y, x)) = self.plane.next() {
                return Some((self.z, y, x));
            }
            self.z += 1;
            self.plane = PosIter::new(self.plane.shape);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{PosIter, VoxelIter};
    use ndarray::Array3;

    #[test]
    fn test_pos_iter_matches_nested_loops() {
        for h in 0..=3 {
            for w in 0..=3 {
                let expected = (0..h).flat_map(|y| (0..w).map(move |x| (y, x)));
                assert!(Iterator::eq(PosIter::new((h, w)), expected));
            }
        }
    }

    #[test]
    fn test_voxel_iter_is_standard_order() {
        let a = Array3::<u8>::zeros((3, 2, 4));
        let expected: Vec<_> = a.indexed_iter().map(|(idx, _)| idx).collect();
        assert_eq!(VoxelIter::new(a.dim()).collect::<Vec<_>>(), expected);
        assert_eq!(VoxelIter::new((2, 0, 3)).count(), 0);
    }
}
