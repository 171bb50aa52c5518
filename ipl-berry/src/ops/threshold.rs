//! 千分比门限.

use crate::consts::mask;
use crate::data::{map_scalars, Scalars, Volume, Voxel};
use crate::error::{invalid, IplResult};
use crate::ops::pad::sub_view;

/// 门限参数. 上下限以标量类型正向最大值的千分比表示.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Threshold {
    /// 下限 (‰).
    pub lower_permil: f64,

    /// 上限 (‰).
    pub upper_permil: f64,

    /// 范围内体素的输出值.
    pub value_in_range: i8,
}

impl Threshold {
    /// 以默认输出值 127 创建.
    pub fn new(lower_permil: f64, upper_permil: f64) -> Self {
        Self {
            lower_permil,
            upper_permil,
            value_in_range: mask::FOREGROUND,
        }
    }

    /// 设置范围内体素的输出值.
    pub fn value(mut self, value_in_range: i8) -> Self {
        self.value_in_range = value_in_range;
        self
    }

    fn validate(&self) -> IplResult<()> {
        let (lo, hi) = (self.lower_permil, self.upper_permil);
        if lo.is_nan() || hi.is_nan() || lo > hi {
            invalid!("threshold range must be monotone, got [{lo}, {hi}]");
        }
        if self.value_in_range <= 0 {
            invalid!("value in range must be positive, got {}", self.value_in_range);
        }
        Ok(())
    }

    /// 执行门限. 先按偏移量裁去边缘, 再将千分比换算为原生单位, 满足
    /// `lower <= v <= upper` 的体素取 `value_in_range`, 其余为 0.
    ///
    /// 输出为 `i8`, 偏移量为 0.
    pub fn apply(&self, vol: &Volume) -> IplResult<Volume> {
        self.validate()?;
        let ty = vol.scalar_type();
        let lo = ty.permil_to_native(self.lower_permil);
        let hi = ty.permil_to_native(self.upper_permil);
        let valid = vol.valid_extent()?;
        log::debug!(
            "threshold: [{}, {}] permil -> [{lo}, {hi}] {ty}, extent {:?} -> {:?}",
            self.lower_permil,
            self.upper_permil,
            vol.extent(),
            valid
        );
        let on = self.value_in_range;
        let out = map_scalars!(vol.scalars(), a => {
            sub_view(a.view(), vol.extent(), &valid)?.mapv(|v| {
                let v = v.as_f64();
                if lo <= v && v <= hi {
                    on
                } else {
                    mask::BACKGROUND
                }
            })
        });
        Ok(vol.derive(valid, Scalars::from_array(out))?.with_offset([0; 3]))
    }
}

/// 见 [`Threshold::apply`].
#[inline]
pub fn threshold(vol: &Volume, lower_permil: f64, upper_permil: f64) -> IplResult<Volume> {
    Threshold::new(lower_permil, upper_permil).apply(vol)
}
