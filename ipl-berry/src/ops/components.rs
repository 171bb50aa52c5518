//! 连通域提取.
//!
//! 三维前景按 6-相邻规则连通. 连通域的标号按其首个体素的光栅序 (x 最快) 从 1 开始分配,
//! 因此 "体积相同时取标号小者" 等价于取光栅序中先出现者.

use ndarray::{Array3, ArrayView3, Axis};
use std::collections::VecDeque;

use crate::consts::mask;
use crate::data::slice::VoxelIter;
use crate::data::{MaskSlice, Scalars, Volume};
use crate::error::{invalid, IplResult};
use crate::workers::Workers;
use crate::Idx3d;

/// 标号 0 表示背景.
pub type Label = u32;

#[inline]
fn n6_positions((z, y, x): Idx3d, (nz, ny, nx): Idx3d) -> impl Iterator<Item = Idx3d> {
    [
        z.checked_sub(1).map(|z| (z, y, x)),
        (z + 1 < nz).then_some((z + 1, y, x)),
        y.checked_sub(1).map(|y| (z, y, x)),
        (y + 1 < ny).then_some((z, y + 1, x)),
        x.checked_sub(1).map(|x| (z, y, x)),
        (x + 1 < nx).then_some((z, y, x + 1)),
    ]
    .into_iter()
    .flatten()
}

/// 6-连通标号. 返回标号数组和各连通域的体素个数 (`sizes[l - 1]` 为标号 `l` 的体积).
pub fn label(mask: ArrayView3<'_, i8>) -> (Array3<Label>, Vec<usize>) {
    let shape = mask.dim();
    let mut labels = Array3::<Label>::zeros(shape);
    let mut sizes = Vec::new();
    let mut bfs_q = VecDeque::new();

    for pos in VoxelIter::new(shape) {
        if labels[pos] != 0 || !mask::is_foreground(mask[pos]) {
            continue;
        }
        let l = sizes.len() as Label + 1;
        labels[pos] = l;
        bfs_q.push_back(pos);
        let mut size = 0;
        while let Some(cur) = bfs_q.pop_front() {
            size += 1;
            for n in n6_positions(cur, shape) {
                if labels[n] == 0 && mask::is_foreground(mask[n]) {
                    labels[n] = l;
                    bfs_q.push_back(n);
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// 按体积降序排列的标号. 体积相同时标号小者在前.
pub fn ranked_labels(sizes: &[usize]) -> Vec<Label> {
    let mut order: Vec<Label> = (1..=sizes.len() as Label).collect();
    order.sort_by(|a, b| {
        sizes[*b as usize - 1]
            .cmp(&sizes[*a as usize - 1])
            .then(a.cmp(b))
    });
    order
}

fn check_value(value: i8) -> IplResult<()> {
    if value <= 0 {
        invalid!("component output value must be positive, got {value}");
    }
    Ok(())
}

/// 按体积排名提取连通域. 排名从 1 开始, 输出排名位于 `[first, last]`
/// 内的连通域的并集, 取值 `value`, 其余为 0.
///
/// 排名超出连通域个数的部分不贡献任何体素; 没有任何前景时输出全 0 的 mask.
pub fn rank_extract(mask: &Volume, first: usize, last: usize, value: i8) -> IplResult<Volume> {
    if first == 0 || first > last {
        invalid!("rank range must satisfy 1 <= first <= last, got [{first}, {last}]");
    }
    check_value(value)?;
    let (labels, sizes) = label(mask.mask()?);
    let ranked = ranked_labels(&sizes);
    log::debug!(
        "rank extract: ranks [{first}, {last}] of {} component(s)",
        sizes.len()
    );

    let mut keep = vec![false; sizes.len() + 1];
    for l in ranked.iter().skip(first - 1).take(last - first + 1) {
        keep[*l as usize] = true;
    }
    let out = labels.mapv(|l| if keep[l as usize] { value } else { mask::BACKGROUND });
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

/// 提取体积最大的 6-连通域. 等价于 `rank_extract(mask, 1, 1, value)`.
#[inline]
pub fn largest(mask: &Volume, value: i8) -> IplResult<Volume> {
    rank_extract(mask, 1, 1, value)
}

/// 在每个 z 切片上独立提取面积最大的 4-连通区域.
pub fn slicewise_largest(mask: &Volume, value: i8, workers: &Workers) -> IplResult<Volume> {
    check_value(value)?;
    let src = mask.mask()?;
    log::debug!("slicewise extract: {} slice(s)", src.len_of(Axis(0)));

    let mut out = Array3::<i8>::zeros(src.raw_dim());
    workers.for_each_slice_mut(out.view_mut(), |z, mut dst| {
        let slice = MaskSlice::new(src.index_axis(Axis(0), z));
        if let Some(area) = slice.largest_area() {
            for pos in area {
                dst[pos] = value;
            }
        }
    });
    mask.derive(*mask.extent(), Scalars::from_array(out))
}
