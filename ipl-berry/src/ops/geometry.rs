//! 掩膜、剥离、包围盒裁剪、偏移量与取值替换.

use ndarray::Zip;

use crate::consts::mask;
use crate::data::{map_scalars, Extent, Scalars, Volume};
use crate::error::{invalid, IplResult};
use crate::ops::morph_3d;
use crate::ops::pad::{embed, mirror_faces};
use crate::workers::Workers;

/// 将 `grey` 中 `mask` 为背景的体素置 0. 两者必须位于同一网格.
fn apply_mask(grey: &Volume, mask: &Volume) -> IplResult<Volume> {
    grey.check_same_grid(mask)?;
    let m = mask.mask()?;
    let scalars = map_scalars!(grey.scalars(), a => {
        let mut out = a.to_owned();
        Zip::from(&mut out).and(&m).for_each(|v, k| {
            if !mask::is_foreground(*k) {
                *v = Default::default();
            }
        });
        Scalars::from_array(out)
    });
    grey.derive(*grey.extent(), scalars)
}

/// 掩膜并剥离: 先以 `mask` 掩膜 `grey`, 再将 `mask` 剥去最外 `peel_iter` 层
/// (边界补 0) 后重新掩膜. 输出与 `grey` 同类型.
pub fn mask_and_peel(
    grey: &Volume,
    mask: &Volume,
    peel_iter: usize,
    workers: &Workers,
) -> IplResult<Volume> {
    log::debug!("mask and peel: peel_iter = {peel_iter}");
    let masked = apply_mask(grey, mask)?;
    if peel_iter == 0 {
        return Ok(masked);
    }
    let peeled = morph_3d::peel(mask, peel_iter, [false; 3], workers)?;
    apply_mask(&masked, &peeled)
}

/// 前景体素的紧致包围盒 (全局索引). 没有前景时返回 `None`.
pub fn foreground_bounds(mask: &Volume) -> IplResult<Option<Extent>> {
    let e = *mask.extent();
    let mut bounds: Option<([i64; 3], [i64; 3])> = None;
    for (idx, v) in mask.mask()?.indexed_iter() {
        if !mask::is_foreground(*v) {
            continue;
        }
        let p = e.global(idx);
        bounds = Some(match bounds {
            None => (p, p),
            Some((lo, hi)) => (
                [0, 1, 2].map(|a| lo[a].min(p[a])),
                [0, 1, 2].map(|a| hi[a].max(p[a])),
            ),
        });
    }
    bounds.map(|(lo, hi)| Extent::new(lo, hi)).transpose()
}

/// 包围盒裁剪: 截取 `mask` 前景包围盒向外扩展 `border` 后的范围.
///
/// 超出 `vol` 的部分补 0. 输出的偏移量为 0. `mask` 没有前景时返回 `InvalidParameter`.
pub fn bounding_box_cut(vol: &Volume, mask: &Volume, border: [usize; 3]) -> IplResult<Volume> {
    let Some(bbox) = foreground_bounds(mask)? else {
        invalid!("bounding box cut needs a non-empty mask");
    };
    let target = bbox.grow(border);
    log::debug!("bounding box cut: {:?} -> {:?}", vol.extent(), target);
    let scalars = map_scalars!(vol.scalars(), a => {
        Scalars::from_array(embed(a.view(), vol.extent(), &target))
    });
    Ok(vol.derive(target, scalars)?.with_offset([0; 3]))
}

/// 在现有偏移量上增加 `offset`, 不改变体素数据 (共享底层存储).
pub fn offset_add(vol: &Volume, offset: [usize; 3]) -> IplResult<Volume> {
    let total = [0, 1, 2].map(|a| vol.offset()[a] + offset[a]);
    let dims = vol.dims();
    if (0..3).any(|a| 2 * total[a] >= dims[a]) {
        invalid!("offset {total:?} leaves no interior in dims {dims:?}");
    }
    log::debug!("offset add: {:?} -> {total:?}", vol.offset());
    Ok(vol.clone().with_offset(total))
}

/// 以镜像方式填充偏移层: 外层 `k` 取以边界面为镜面的内部体素. 偏移量保持不变.
pub fn mirror_fill(vol: &Volume) -> IplResult<Volume> {
    let offset = vol.offset();
    log::debug!("mirror fill: offset = {offset:?}");
    let scalars = map_scalars!(vol.scalars(), a => {
        let mut out = a.to_owned();
        mirror_faces(out.view_mut(), offset, [true; 3]);
        Scalars::from_array(out)
    });
    vol.derive(*vol.extent(), scalars)
}

/// 取值替换: 前景 (127) 改为 `object`, 背景 (0) 改为 `background`.
pub fn set_value(mask: &Volume, object: i8, background: i8) -> IplResult<Volume> {
    log::debug!("set value: object = {object}, background = {background}");
    let out = mask.mask()?.mapv(|v| {
        if mask::is_foreground(v) {
            object
        } else {
            background
        }
    });
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

/// 前景与背景互换.
#[inline]
pub fn invert(mask: &Volume) -> IplResult<Volume> {
    set_value(mask, mask::BACKGROUND, mask::FOREGROUND)
}

fn combine<F>(a: &Volume, b: &Volume, op: F) -> IplResult<Volume>
where
    F: Fn(bool, bool) -> bool,
{
    a.check_same_grid(b)?;
    let (ma, mb) = (a.mask()?, b.mask()?);
    let out = Zip::from(&ma).and(&mb).map_collect(|x, y| {
        if op(mask::is_foreground(*x), mask::is_foreground(*y)) {
            mask::FOREGROUND
        } else {
            mask::BACKGROUND
        }
    });
    a.derive(*a.extent(), Scalars::from_array(out))
}

/// 两个 mask 的并集.
pub fn mask_union(a: &Volume, b: &Volume) -> IplResult<Volume> {
    combine(a, b, |x, y| x || y)
}

/// 从 `a` 中去除 `b` 的前景.
pub fn mask_subtract(a: &Volume, b: &Volume) -> IplResult<Volume> {
    combine(a, b, |x, y| x && !y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Voxel;
    use crate::error::IplError;
    use crate::ops::threshold::threshold;
    use ndarray::Array3;

    fn owned<T: Voxel>(v: &Volume) -> Array3<T> {
        v.data::<T>().unwrap().to_owned()
    }

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((4, 5, 6), |(z, y, x)| (z * 100 + y * 10 + x) as i16);
        Volume::from_array(data, [1.0; 3]).unwrap()
    }

    #[test]
    fn test_mask_and_peel() {
        let grey = Volume::from_array(Array3::<i16>::from_elem((7, 7, 7), 50), [1.0; 3]).unwrap();
        let e = *grey.extent();
        let m = Volume::mask_from_fn(e, [1.0; 3], |p| p.iter().all(|c| (1..=5).contains(c)))
            .unwrap();
        let masked = mask_and_peel(&grey, &m, 0, &Workers::serial()).unwrap();
        assert_eq!(owned::<i16>(&masked).iter().filter(|v| **v == 50).count(), 125);
        let peeled = mask_and_peel(&grey, &m, 1, &Workers::serial()).unwrap();
        assert_eq!(owned::<i16>(&peeled).iter().filter(|v| **v == 50).count(), 27);

        let other = Volume::from_array(Array3::<i8>::zeros((7, 7, 6)), [1.0; 3]).unwrap();
        let err = mask_and_peel(&grey, &other, 0, &Workers::serial()).unwrap_err();
        assert!(matches!(err, IplError::ExtentMismatch(_)));
    }

    #[test]
    fn test_bounding_box_cut() {
        let vol = ramp();
        let e = *vol.extent();
        let m = Volume::mask_from_fn(e, [1.0; 3], |[x, y, z]| x == 2 && (1..=2).contains(&y) && z == 0)
            .unwrap();
        assert_eq!(
            foreground_bounds(&m).unwrap(),
            Some(Extent::new([2, 1, 0], [2, 2, 0]).unwrap())
        );
        let cut = bounding_box_cut(&vol.clone().with_offset([1, 1, 1]), &m, [1, 0, 1]).unwrap();
        assert_eq!(cut.extent().lo(), [1, 1, -1]);
        assert_eq!(cut.dims(), [3, 2, 3]);
        assert_eq!(cut.offset(), [0; 3]);
        let a = owned::<i16>(&cut);
        assert_eq!(a[(0, 0, 0)], 0);
        assert_eq!(a[(1, 0, 0)], 11);
        assert_eq!(a[(2, 1, 2)], 123);

        let empty = Volume::mask_from_fn(e, [1.0; 3], |_| false).unwrap();
        assert!(bounding_box_cut(&vol, &empty, [0; 3]).is_err());
    }

    #[test]
    fn test_offset_mirror_threshold_round_trip() {
        let vol = ramp();
        let padded = offset_add(&vol, [1, 2, 1]).unwrap();
        assert_eq!(padded.offset(), [1, 2, 1]);
        assert_eq!(padded.scalars(), vol.scalars());

        let filled = mirror_fill(&padded).unwrap();
        let a = owned::<i16>(&filled);
        assert_eq!(a[(0, 0, 0)], a[(1, 3, 1)]);
        assert_eq!(a[(3, 4, 5)], a[(2, 2, 4)]);
        assert_eq!(a[(2, 2, 2)], 222);

        let out = threshold(&filled, -1000.0, 1000.0).unwrap();
        assert_eq!(out.extent(), &vol.extent().shrink([1, 2, 1]).unwrap());
        assert!(offset_add(&vol, [3, 0, 0]).is_err());
    }

    #[test]
    fn test_set_value_and_boolean_ops() {
        let e = Extent::with_dims([4, 1, 1]).unwrap();
        let a = Volume::mask_from_fn(e, [1.0; 3], |[x, _, _]| x < 2).unwrap();
        let b = Volume::mask_from_fn(e, [1.0; 3], |[x, _, _]| x % 2 == 1).unwrap();

        let sv = set_value(&a, 5, -1).unwrap();
        assert_eq!(owned::<i8>(&sv).as_slice().unwrap(), &[5, 5, -1, -1]);
        assert_eq!(owned::<i8>(&invert(&a).unwrap()).as_slice().unwrap(), &[0, 0, 127, 127]);
        assert_eq!(
            owned::<i8>(&mask_union(&a, &b).unwrap()).as_slice().unwrap(),
            &[127, 127, 0, 127]
        );
        assert_eq!(
            owned::<i8>(&mask_subtract(&a, &b).unwrap()).as_slice().unwrap(),
            &[127, 0, 0, 0]
        );
        let shifted = b.clone().with_lo([1, 0, 0]).unwrap();
        assert!(mask_union(&a, &shifted).is_err());
    }
}
