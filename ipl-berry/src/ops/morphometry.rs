//! 形态学测量: BV/TV, 厚度场统计, mask 内平均值.

use ndarray::Zip;

use crate::consts::mask::is_foreground;
use crate::data::{map_scalars, Volume, Voxel};
use crate::error::{invalid, IplResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 骨体积分数: `region` 内 `mask` 前景体素数与 `region` 前景体素数之比.
///
/// 两者必须位于同一网格. `region` 为空时返回 `InvalidParameter`.
pub fn bv_tv(mask: &Volume, region: &Volume) -> IplResult<f64> {
    mask.check_same_grid(region)?;
    let (m, r) = (mask.mask()?, region.mask()?);
    let mut bone = 0usize;
    let mut total = 0usize;
    Zip::from(&m).and(&r).for_each(|m, r| {
        if is_foreground(*r) {
            total += 1;
            bone += is_foreground(*m) as usize;
        }
    });
    if total == 0 {
        invalid!("BV/TV needs a non-empty region");
    }
    Ok(bone as f64 / total as f64)
}

/// 厚度场或间距场的统计量. 只统计取值为正的体素.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldStats {
    /// 平均值.
    pub mean: f64,

    /// 总体标准差.
    pub sd: f64,

    /// 最大值.
    pub max: f64,

    /// 参与统计的体素数.
    pub count: usize,
}

impl FieldStats {
    /// 统计 `field` 中所有正值. 没有正值时各项均为 0.
    pub fn of(field: &Volume) -> Self {
        let (mut sum, mut sum2, mut max, mut count) = (0.0, 0.0, 0.0f64, 0usize);
        map_scalars!(field.scalars(), a => {
            for v in a.iter().map(|v| v.as_f64()).filter(|v| *v > 0.0) {
                sum += v;
                sum2 += v * v;
                max = max.max(v);
                count += 1;
            }
        });
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        let mean = sum / n;
        Self {
            mean,
            sd: (sum2 / n - mean * mean).max(0.0).sqrt(),
            max,
            count,
        }
    }
}

/// `mask` 前景内 `grey` 的平均值. 标定为密度后即为 BMD.
///
/// 两者必须位于同一网格. `mask` 为空时返回 `InvalidParameter`.
pub fn mean_in_mask(grey: &Volume, mask: &Volume) -> IplResult<f64> {
    grey.check_same_grid(mask)?;
    let m = mask.mask()?;
    let (sum, count) = map_scalars!(grey.scalars(), a => {
        let mut acc = (0.0, 0usize);
        Zip::from(a).and(&m).for_each(|v, k| {
            if is_foreground(*k) {
                acc.0 += v.as_f64();
                acc.1 += 1;
            }
        });
        acc
    });
    if count == 0 {
        invalid!("mean value needs a non-empty mask");
    }
    Ok(sum / count as f64)
}
