use super::PosIter;
use crate::consts::mask::{self, is_foreground};
use crate::Idx2d;
use ndarray::ArrayView2;
use ndarray::Array2;
use std::collections::VecDeque;
use std::ops::Index;

/// 一个 4-连通区域内所有像素的 `(y, x)` 索引, 按发现顺序排列.
pub type Area2d = Vec<Idx2d>;

/// 不可变、借用的二维水平 mask 切片 (固定 z).
#[derive(Clone, Debug)]
pub struct MaskSlice<'a> {
    /// 底层数据的轻量级视图, 借用于 [`crate::Volume`].
    data: ArrayView2<'a, i8>,
}

impl Index<Idx2d> for MaskSlice<'_> {
    type Output = i8;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl<'a> MaskSlice<'a> {
    /// 包装 `(y, x)` 视图.
    #[inline]
    pub fn new(data: ArrayView2<'a, i8>) -> Self {
        Self { data }
    }

    /// 获得底层数据的视图.
    #[inline]
    pub fn array_view(&self) -> ArrayView2<'a, i8> {
        self.data.clone()
    }

    /// 切片形状 `(ny, nx)`.
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 切片高度 (y 方向体素个数).
    #[inline]
    pub fn height(&self) -> usize {
        self.shape().0
    }

    /// 切片宽度 (x 方向体素个数).
    #[inline]
    pub fn width(&self) -> usize {
        self.shape().1
    }

    /// 获取给定位置 `(y, x)` 的像素值. 越界时返回 `None`.
    #[inline]
    pub fn get(&self, pos: Idx2d) -> Option<&i8> {
        self.data.get(pos)
    }

    /// 前景像素个数.
    pub fn count_foreground(&self) -> usize {
        self.data.iter().filter(|p| is_foreground(**p)).count()
    }

    /// 切片是否全为背景?
    #[inline]
    pub fn is_background(&self) -> bool {
        self.data.iter().all(|p| mask::is_background(*p))
    }

    /// 行优先遍历所有索引.
    #[inline]
    pub fn pos_iter(&self) -> impl Iterator<Item = Idx2d> {
        PosIter::new(self.shape())
    }

    /// 获取 `pos` 的 4-邻域中位于切片内的索引.
    pub fn n4_positions(&self, (y, x): Idx2d) -> Vec<Idx2d> {
        let (h, w) = self.shape();
        let mut ans = Vec::with_capacity(4);
        if y > 0 {
            ans.push((y - 1, x));
        }
        if y + 1 < h {
            ans.push((y + 1, x));
        }
        if x > 0 {
            ans.push((y, x - 1));
        }
        if x + 1 < w {
            ans.push((y, x + 1));
        }
        ans
    }

    /// 按照 4-相邻规则获取所有前景区域. 两个前景像素属于同一区域,
    /// 当且仅当存在一条连接二者且只经过前景像素的 4-相邻路径.
    ///
    /// 区域按其首个像素的行优先顺序排列.
    pub fn areas(&self) -> Vec<Area2d> {
        let mut ans = Vec::new();
        let mut seen = Array2::<bool>::default(self.shape());
        let mut bfs_q = VecDeque::with_capacity(4);

        for pos in self.pos_iter() {
            if seen[pos] || !is_foreground(self[pos]) {
                continue;
            }
            seen[pos] = true;
            bfs_q.push_back(pos);
            let mut this_area = Area2d::with_capacity(1);
            while let Some(cur) = bfs_q.pop_front() {
                this_area.push(cur);
                for n in self.n4_positions(cur) {
                    if !seen[n] && is_foreground(self[n]) {
                        seen[n] = true;
                        bfs_q.push_back(n);
                    }
                }
            }
            ans.push(this_area);
        }
        ans
    }

    /// 面积最大的 4-连通前景区域. 面积相同时取行优先顺序中先出现的区域.
    /// 切片全为背景时返回 `None`.
    pub fn largest_area(&self) -> Option<Area2d> {
        self.areas()
            .into_iter()
            .fold(None, |best: Option<Area2d>, area| match best {
                Some(b) if b.len() >= area.len() => Some(b),
                _ => Some(area),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::MaskSlice;
    use ndarray::arr2;

    const F: i8 = 127;

    #[test]
    fn test_areas_are_4_connected() {
        // 对角相邻不连通.
        let a = arr2(&[
            [F, 0, 0, F],
            [0, F, 0, F],
            [0, 0, 0, 0],
            [F, F, F, 0],
        ]);
        let s = MaskSlice::new(a.view());
        let areas = s.areas();
        let sizes: Vec<_> = areas.iter().map(Vec::len).collect();
        assert_eq!(sizes, [1, 2, 1, 3]);
        assert_eq!(areas[0], [(0, 0)]);
        assert_eq!(s.count_foreground(), 7);
        assert_eq!(s.largest_area().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_largest_area_tie_takes_first() {
        let a = arr2(&[[0, F, 0, F]]);
        let s = MaskSlice::new(a.view());
        assert_eq!(s.largest_area(), Some(vec![(0, 1)]));

        let empty = arr2(&[[0i8, 0], [0, 0]]);
        let s = MaskSlice::new(empty.view());
        assert!(s.is_background());
        assert_eq!(s.largest_area(), None);
    }

    #[test]
    fn test_n4_positions_at_border() {
        let a = arr2(&[[0i8; 3]; 2]);
        let s = MaskSlice::new(a.view());
        assert_eq!(s.n4_positions((0, 0)), [(1, 0), (0, 1)]);
        assert_eq!(s.n4_positions((1, 1)).len(), 3);
    }
}
