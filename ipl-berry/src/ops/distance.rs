//! 欧氏距离变换与厚度/间距场.
//!
//! 距离变换按轴分离 (Felzenszwalb & Huttenlocher 下包络算法), 依次沿 x, y, z 扫描,
//! 每个轴按体素间距加权, 单位毫米. 范围之外总是视为相外体素.
//!
//! 厚度场: 对每个前景体素, 取包含它且完全位于前景内的最大内切球的直径.
//! 球心按半径降序 (相同半径时光栅序小者优先) 依次覆盖尚未赋值的体素.
//! 间距场是对背景执行同样的计算.

use binary_heap_plus::BinaryHeap;
use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1};
use ordered_float::OrderedFloat;

use crate::consts::mask;
use crate::data::{Scalars, Volume};
use crate::error::IplResult;
use crate::ops::pad::array_axis;
use crate::workers::Workers;
use crate::Idx3d;

/// 相内体素的初始平方距离. 每条 lane 两端都有相外的虚拟体素,
/// 第一遍扫描之后所有值都是有限的.
const FAR: f64 = 1e20;

/// 一维平方距离变换. 位置 `0` 和 `n + 1` 是值为 0 的虚拟采样点,
/// `src[i]` 位于位置 `i + 1`.
fn edt_lane(mut dst: ArrayViewMut1<'_, f64>, src: ArrayView1<'_, f64>, w: f64) {
    let n = src.len();
    let m = n + 2;
    let w2 = w * w;
    let f = |q: usize| if q == 0 || q == m - 1 { 0.0 } else { src[q - 1] };
    let meet = |q: usize, p: usize| {
        let (qf, pf) = (q as f64, p as f64);
        ((f(q) + w2 * qf * qf) - (f(p) + w2 * pf * pf)) / (2.0 * w2 * (qf - pf))
    };

    // 下包络中抛物线的顶点位置, 以及相邻抛物线的分界.
    let mut v = vec![0usize; m];
    let mut z = vec![0.0f64; m + 1];
    let mut k = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..m {
        let mut s = meet(q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = meet(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for q in 1..=n {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let d = q.abs_diff(v[k]) as f64;
        dst[q - 1] = w2 * d * d + f(v[k]);
    }
}

/// 相内体素到最近相外体素的平方欧氏距离 (mm²). 相外体素为 0.
///
/// `foreground` 为真时以前景为相, 否则以背景为相.
pub fn squared_distance(
    mask: ArrayView3<'_, i8>,
    foreground: bool,
    spacing: [f64; 3],
    workers: &Workers,
) -> Array3<f64> {
    let mut a = mask.mapv(|v| {
        if mask::is_foreground(v) == foreground {
            FAR
        } else {
            0.0
        }
    });
    let mut b = Array3::<f64>::zeros(a.raw_dim());
    workers.zip_lanes(b.view_mut(), a.view(), array_axis(0), |d, s| {
        edt_lane(d, s, spacing[0])
    });
    workers.zip_lanes(a.view_mut(), b.view(), array_axis(1), |d, s| {
        edt_lane(d, s, spacing[1])
    });
    workers.zip_lanes(b.view_mut(), a.view(), array_axis(2), |d, s| {
        edt_lane(d, s, spacing[2])
    });
    b
}

/// 前景体素到最近背景体素的欧氏距离 (mm), `f32` 输出.
pub fn distance_map(mask: &Volume, workers: &Workers) -> IplResult<Volume> {
    let d2 = squared_distance(mask.mask()?, true, mask.spacing(), workers);
    let out = d2.mapv(|v| v.sqrt() as f32);
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

fn neighbors_26((z, y, x): Idx3d, (nz, ny, nx): Idx3d) -> impl Iterator<Item = (Idx3d, [i64; 3])> {
    let range = |c: usize, n: usize| c.saturating_sub(1)..(c + 2).min(n);
    range(z, nz).flat_map(move |nz_| {
        range(y, ny).flat_map(move |ny_| {
            range(x, nx).filter_map(move |nx_| {
                let p = (nz_, ny_, nx_);
                let delta = [
                    nx_ as i64 - x as i64,
                    ny_ as i64 - y as i64,
                    nz_ as i64 - z as i64,
                ];
                (p != (z, y, x)).then_some((p, delta))
            })
        })
    })
}

/// 由平方距离图计算最大内切球直径场.
fn sphere_fit(d2: &Array3<f64>, spacing: [f64; 3]) -> Array3<f32> {
    let shape = d2.dim();
    let mut out = Array3::<f32>::zeros(shape);
    let norm = |delta: [i64; 3]| -> f64 {
        (0..3)
            .map(|a| (delta[a] as f64 * spacing[a]).powi(2))
            .sum::<f64>()
            .sqrt()
    };

    // 堆顶半径最大; 半径相同时光栅序小者优先.
    let mut heap: BinaryHeap<(OrderedFloat<f64>, Idx3d), _> =
        BinaryHeap::new_by(|a: &(OrderedFloat<f64>, Idx3d), b: &(OrderedFloat<f64>, Idx3d)| {
            a.0.cmp(&b.0).then(b.1.cmp(&a.1))
        });
    for (c, r2) in d2.indexed_iter() {
        if *r2 <= 0.0 {
            continue;
        }
        let r = r2.sqrt();
        // 被某个相邻球完全包含的球不会贡献任何体素.
        let covered = neighbors_26(c, shape).any(|(n, delta)| d2[n].sqrt() >= r + norm(delta));
        if !covered {
            heap.push((OrderedFloat(r), c));
        }
    }

    let (nz, ny, nx) = shape;
    while let Some((OrderedFloat(r), (cz, cy, cx))) = heap.pop() {
        let r2 = r * r;
        let diameter = (2.0 * r) as f32;
        let reach = |a: usize| (r / spacing[a]).ceil() as usize;
        let span = |c: usize, h: usize, n: usize| c.saturating_sub(h)..(c + h + 1).min(n);
        for z in span(cz, reach(2), nz) {
            for y in span(cy, reach(1), ny) {
                for x in span(cx, reach(0), nx) {
                    let p = (z, y, x);
                    if out[p] != 0.0 || d2[p] <= 0.0 {
                        continue;
                    }
                    let delta = [
                        x as i64 - cx as i64,
                        y as i64 - cy as i64,
                        z as i64 - cz as i64,
                    ];
                    let dist2: f64 = (0..3).map(|a| (delta[a] as f64 * spacing[a]).powi(2)).sum();
                    if dist2 < r2 {
                        out[p] = diameter;
                    }
                }
            }
        }
    }
    out
}

fn fit_field(mask: &Volume, foreground: bool, workers: &Workers) -> IplResult<Volume> {
    let spacing = mask.spacing();
    let d2 = squared_distance(mask.mask()?, foreground, spacing, workers);
    let out = sphere_fit(&d2, spacing);
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

/// 厚度场: 前景体素取包含它的最大内切球直径 (mm), 背景为 0. 输出 `f32`.
pub fn thickness(mask: &Volume, workers: &Workers) -> IplResult<Volume> {
    log::debug!("thickness: dims = {:?}, spacing = {:?}", mask.dims(), mask.spacing());
    fit_field(mask, true, workers)
}

/// 间距场: 与 [`thickness`] 相同, 但作用于背景. 前景为 0.
pub fn spacing(mask: &Volume, workers: &Workers) -> IplResult<Volume> {
    log::debug!("spacing: dims = {:?}, spacing = {:?}", mask.dims(), mask.spacing());
    fit_field(mask, false, workers)
}
