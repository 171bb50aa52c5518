//! 立方体结构元的可分离极值滤波.

use ndarray::{s, Array3, ArrayView1, ArrayViewMut1, Axis};

use crate::workers::Workers;

/// 取窗口内的最大值 (膨胀) 还是最小值 (腐蚀).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Extreme {
    Max,
    Min,
}

fn extreme_lane(mut dst: ArrayViewMut1<'_, i8>, src: ArrayView1<'_, i8>, r: usize, pick: Extreme) {
    let n = src.len();
    for i in 0..n {
        let w = src.slice(s![i.saturating_sub(r)..=(i + r).min(n - 1)]);
        dst[i] = match pick {
            Extreme::Max => w.fold(i8::MIN, |m, v| m.max(*v)),
            Extreme::Min => w.fold(i8::MAX, |m, v| m.min(*v)),
        };
    }
}

/// 边长 `2r + 1` 的立方体窗口极值滤波. 窗口在数组边界处截断,
/// 调用者需预先填充足够的边界.
pub(crate) fn extreme_filter(
    mut a: Array3<i8>,
    r: usize,
    pick: Extreme,
    workers: &Workers,
) -> Array3<i8> {
    if r == 0 {
        return a;
    }
    let mut b = Array3::<i8>::zeros(a.raw_dim());
    let lane = |d: ArrayViewMut1<'_, i8>, s: ArrayView1<'_, i8>| extreme_lane(d, s, r, pick);
    workers.zip_lanes(b.view_mut(), a.view(), Axis(2), lane);
    workers.zip_lanes(a.view_mut(), b.view(), Axis(1), lane);
    workers.zip_lanes(b.view_mut(), a.view(), Axis(0), lane);
    b
}
