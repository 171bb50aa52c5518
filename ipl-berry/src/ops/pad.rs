//! 边界填充、镜像与子范围裁剪.

use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Axis};

use crate::data::Extent;
use crate::error::{IplError, IplResult};

/// `[x, y, z]` 分量对应的数组轴.
#[inline]
pub(crate) fn array_axis(a: usize) -> Axis {
    Axis(2 - a)
}

/// 以镜像方式填充 `arr` 在各轴两端的 `margin[a]` 层 (仅 `axes[a]` 为真的轴).
///
/// 外层 `m - 1 - k` 取内层 `m + k`, 即以边界面为镜面 (边界层重复一次).
/// 内部层数不足时重复使用最外侧的内部层.
pub(crate) fn mirror_faces<T: Copy>(
    mut arr: ArrayViewMut3<'_, T>,
    margin: [usize; 3],
    axes: [bool; 3],
) {
    for a in 0..3 {
        let m = margin[a];
        if !axes[a] || m == 0 {
            continue;
        }
        let ax = array_axis(a);
        let n = arr.len_of(ax);
        let Some(inner) = n.checked_sub(2 * m).filter(|i| *i > 0) else {
            continue;
        };
        for k in 0..m {
            let r = k.min(inner - 1);
            let layer = arr.index_axis(ax, m + r).to_owned();
            arr.index_axis_mut(ax, m - 1 - k).assign(&layer);
            let layer = arr.index_axis(ax, n - m - 1 - r).to_owned();
            arr.index_axis_mut(ax, n - m + k).assign(&layer);
        }
    }
}

/// 将 `src` 置于各面外扩 `by[a]` 层的新数组中央. 外扩层在 `mirror[a]`
/// 为真的轴上取镜像, 否则为 `T::default()`.
pub(crate) fn pad<T: Copy + Default>(
    src: ArrayView3<'_, T>,
    by: [usize; 3],
    mirror: [bool; 3],
) -> Array3<T> {
    let (nz, ny, nx) = src.dim();
    let [px, py, pz] = by;
    let mut out = Array3::<T>::default((nz + 2 * pz, ny + 2 * py, nx + 2 * px));
    out.slice_mut(s![pz..pz + nz, py..py + ny, px..px + nx])
        .assign(&src);
    mirror_faces(out.view_mut(), by, mirror);
    out
}

/// 取 `src` (范围为 `outer`) 中范围为 `inner` 的子视图. `inner` 必须位于 `outer` 之内.
pub(crate) fn sub_view<'a, T>(
    src: ArrayView3<'a, T>,
    outer: &Extent,
    inner: &Extent,
) -> IplResult<ArrayView3<'a, T>> {
    let (z0, y0, x0) = outer.start_of(inner).ok_or_else(|| {
        IplError::ExtentMismatch(format!("{inner:?} is not inside {outer:?}"))
    })?;
    let (nz, ny, nx) = inner.shape();
    Ok(src.slice_move(s![z0..z0 + nz, y0..y0 + ny, x0..x0 + nx]))
}

/// 将 `src` (范围为 `src_extent`) 复制到范围为 `dst_extent` 的新数组中.
/// 二者不重叠的部分为 `T::default()`.
pub(crate) fn embed<T: Copy + Default>(
    src: ArrayView3<'_, T>,
    src_extent: &Extent,
    dst_extent: &Extent,
) -> Array3<T> {
    let mut out = Array3::<T>::default(dst_extent.shape());
    if let Some(common) = src_extent.intersect(dst_extent) {
        // `common` 同时位于二者之内, 以下两步不会失败.
        if let (Ok(from), Some((z0, y0, x0))) = (
            sub_view(src, src_extent, &common),
            dst_extent.start_of(&common),
        ) {
            let (nz, ny, nx) = common.shape();
            out.slice_mut(s![z0..z0 + nz, y0..y0 + ny, x0..x0 + nx])
                .assign(&from);
        }
    }
    out
}
