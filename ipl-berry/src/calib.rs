//! 标定: 原生单位 -> 线性衰减系数 / HU / 密度.
//!
//! 三种映射都是仿射变换 `a * x + b`, 常数来自扫描日志:
//!
//! 1. 原生 -> μ: `μ = x / mu_scaling`;
//! 2. μ -> HU: `HU = 1000 * (μ - μ_water) / (μ_water - μ_air)`, `μ_air = 0`;
//! 3. 原生 -> 密度 (mg HA/ccm): `ρ = slope * x + intercept`.
//!
//! 原生 -> HU 是 1 与 2 的复合.

use ndarray::{Array3, Axis};
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::data::{Grid, ScalarType, Scalars, Volume, Voxel};
use crate::error::{invalid, IplError, IplResult};
use crate::scan_log::ScanLog;
use crate::workers::Workers;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 标定目标.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationMode {
    /// 线性衰减系数 (1/cm).
    Mu,

    /// Hounsfield 单位.
    Hu,

    /// 密度 (mg HA/ccm).
    Density,
}

impl Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CalibrationMode::Mu => "mu",
            CalibrationMode::Hu => "hu",
            CalibrationMode::Density => "density",
        })
    }
}

/// 仿射标定 `slope * x + intercept`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    /// 斜率.
    pub slope: f64,

    /// 截距.
    pub intercept: f64,
}

impl Calibration {
    /// 恒等映射.
    pub const IDENTITY: Calibration = Calibration {
        slope: 1.0,
        intercept: 0.0,
    };

    /// 由扫描日志构建给定模式的标定. 缺少必需字段时返回 `LogFieldMissing`.
    pub fn from_scan_log(log: &ScanLog, mode: CalibrationMode) -> IplResult<Self> {
        match mode {
            CalibrationMode::Mu => Self::native_to_mu(log.require_mu_scaling()?),
            CalibrationMode::Hu => {
                Self::native_to_hu(log.require_mu_scaling()?, log.require_mu_water()?)
            }
            CalibrationMode::Density => {
                let (slope, intercept) = log.require_density()?;
                Ok(Self { slope, intercept })
            }
        }
    }

    /// 原生 -> μ.
    pub fn native_to_mu(mu_scaling: i64) -> IplResult<Self> {
        if mu_scaling <= 0 {
            invalid!("mu scaling must be positive, got {mu_scaling}");
        }
        Ok(Self {
            slope: 1.0 / mu_scaling as f64,
            intercept: 0.0,
        })
    }

    /// μ -> HU.
    pub fn mu_to_hu(mu_water: f64) -> IplResult<Self> {
        if !(mu_water.is_finite() && mu_water > 0.0) {
            invalid!("mu water must be positive, got {mu_water}");
        }
        Ok(Self {
            slope: 1000.0 / mu_water,
            intercept: -1000.0,
        })
    }

    /// 原生 -> HU, 即 `mu_to_hu ∘ native_to_mu` 合并为单个仿射变换.
    pub fn native_to_hu(mu_scaling: i64, mu_water: f64) -> IplResult<Self> {
        Ok(Self::native_to_mu(mu_scaling)?.then(&Self::mu_to_hu(mu_water)?))
    }

    /// 复合: 先 `self`, 后 `next`.
    #[inline]
    pub fn then(&self, next: &Calibration) -> Calibration {
        Calibration {
            slope: next.slope * self.slope,
            intercept: next.slope * self.intercept + next.intercept,
        }
    }

    /// 对单个值求值.
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// 对体数据标定, 输出 `out` 类型. 超出表示范围的值截断并记录警告.
    pub fn apply(&self, vol: &Volume, out: ScalarType, workers: &Workers) -> IplResult<Volume> {
        let (scalars, clamped) = self.convert(vol, out, workers);
        if clamped > 0 {
            log::warn!("calibration to {out}: clamped {clamped} voxel(s)");
        }
        vol.derive(*vol.extent(), scalars)
    }

    /// 与 [`Self::apply`] 相同, 但存在被截断的体素时返回 `NumericOverflow`.
    pub fn apply_strict(
        &self,
        vol: &Volume,
        out: ScalarType,
        workers: &Workers,
    ) -> IplResult<Volume> {
        let (scalars, clamped) = self.convert(vol, out, workers);
        if clamped > 0 {
            return Err(IplError::NumericOverflow(clamped));
        }
        vol.derive(*vol.extent(), scalars)
    }

    fn convert(&self, vol: &Volume, out: ScalarType, workers: &Workers) -> (Scalars, usize) {
        log::debug!(
            "calibrate {} -> {out}: slope = {}, intercept = {}",
            vol.scalar_type(),
            self.slope,
            self.intercept
        );
        fn run<T: Voxel, U: Voxel>(
            c: &Calibration,
            src: &Grid<T>,
            workers: &Workers,
        ) -> (Scalars, usize) {
            let clamped = AtomicUsize::new(0);
            let mut dst = Array3::<U>::default(src.raw_dim());
            workers.zip_lanes(dst.view_mut(), src.view(), Axis(2), |mut d, s| {
                let mut n = 0;
                for (o, i) in d.iter_mut().zip(s.iter()) {
                    let (v, hit) = U::saturate(c.eval(i.as_f64()));
                    *o = v;
                    n += hit as usize;
                }
                clamped.fetch_add(n, Ordering::Relaxed);
            });
            (Scalars::from_array(dst), clamped.into_inner())
        }
        macro_rules! to {
            ($u: ty) => {
                crate::data::map_scalars!(vol.scalars(), a => run::<_, $u>(self, a, workers))
            };
        }
        match out {
            ScalarType::I8 => to!(i8),
            ScalarType::I16 => to!(i16),
            ScalarType::F32 => to!(f32),
        }
    }
}
