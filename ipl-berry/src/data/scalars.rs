//! 标量类型与按类型分派的体素数组.

use ndarray::{ArcArray, Array3, ArrayView3, Ix3};
use num::{NumCast, ToPrimitive};
use std::fmt::{self, Debug, Display};

use crate::consts::per_mille;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 共享存储的三维体素数组, 按 `(z, y, x)` 组织.
pub type Grid<T> = ArcArray<T, Ix3>;

/// 体数据支持的标量类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalarType {
    /// 有符号 8 位整数. mask 总是该类型.
    I8,

    /// 有符号 16 位整数. 扫描仪原生单位通常是该类型.
    I16,

    /// 32 位浮点数.
    F32,
}

impl ScalarType {
    /// 是否是整数类型?
    #[inline]
    pub fn is_integer(self) -> bool {
        !matches!(self, ScalarType::F32)
    }

    /// 千分比门限的参考最大值.
    #[inline]
    pub fn permil_ref(self) -> f64 {
        match self {
            ScalarType::I8 => per_mille::CHAR_MAX,
            ScalarType::I16 => per_mille::SHORT_MAX,
            ScalarType::F32 => per_mille::FLOAT_REF,
        }
    }

    /// 将千分比换算为该类型的原生值. 整数类型向零截断.
    #[inline]
    pub fn permil_to_native(self, permil: f64) -> f64 {
        let v = permil * self.permil_ref() / 1000.0;
        if self.is_integer() {
            v.trunc()
        } else {
            v
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarType::I8 => "char",
            ScalarType::I16 => "short",
            ScalarType::F32 => "float",
        };
        f.write_str(s)
    }
}

/// 体素标量. 各算子对 `i8`, `i16`, `f32` 三种类型泛型实现.
pub trait Voxel:
    Copy + Default + PartialOrd + Debug + Send + Sync + NumCast + ToPrimitive + 'static
{
    /// 对应的 [`ScalarType`].
    const SCALAR_TYPE: ScalarType;

    /// 转换为 `f64`. 三种类型均可无损转换.
    fn as_f64(self) -> f64;

    /// 从 `f64` 转换. 整数类型四舍六入五成双, 超出表示范围时截断到边界.
    ///
    /// 第二个返回值表示是否发生了截断 (`NaN` 也视为截断, 结果为 0).
    fn saturate(v: f64) -> (Self, bool);

    /// 包装为 [`Scalars`].
    fn wrap(data: Grid<Self>) -> Scalars;

    /// 若 `s` 是该类型, 返回其底层数组.
    fn peek(s: &Scalars) -> Option<&Grid<Self>>;
}

macro_rules! impl_int_voxel {
    ($t: ty, $variant: ident) => {
        impl Voxel for $t {
            const SCALAR_TYPE: ScalarType = ScalarType::$variant;

            #[inline]
            fn as_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn saturate(v: f64) -> (Self, bool) {
                if v.is_nan() {
                    return (0, true);
                }
                let r = v.round_ties_even();
                if r < <$t>::MIN as f64 {
                    (<$t>::MIN, true)
                } else if r > <$t>::MAX as f64 {
                    (<$t>::MAX, true)
                } else {
                    (r as $t, false)
                }
            }

            #[inline]
            fn wrap(data: Grid<Self>) -> Scalars {
                Scalars::$variant(data)
            }

            #[inline]
            fn peek(s: &Scalars) -> Option<&Grid<Self>> {
                match s {
                    Scalars::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

impl_int_voxel!(i8, I8);
impl_int_voxel!(i16, I16);

impl Voxel for f32 {
    const SCALAR_TYPE: ScalarType = ScalarType::F32;

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn saturate(v: f64) -> (Self, bool) {
        if v.is_nan() {
            (0.0, true)
        } else if v > f32::MAX as f64 {
            (f32::MAX, true)
        } else if v < f32::MIN as f64 {
            (f32::MIN, true)
        } else {
            (v as f32, false)
        }
    }

    #[inline]
    fn wrap(data: Grid<Self>) -> Scalars {
        Scalars::F32(data)
    }

    #[inline]
    fn peek(s: &Scalars) -> Option<&Grid<Self>> {
        match s {
            Scalars::F32(a) => Some(a),
            _ => None,
        }
    }
}

/// 按标量类型打标签的体素数组.
#[derive(Clone, PartialEq)]
pub enum Scalars {
    /// `i8` 数组.
    I8(Grid<i8>),

    /// `i16` 数组.
    I16(Grid<i16>),

    /// `f32` 数组.
    F32(Grid<f32>),
}

/// 对 [`Scalars`] 的每种变体执行相同的泛型表达式.
///
/// `$a` 在 `$body` 中绑定为对应变体的内部数组.
macro_rules! map_scalars {
    ($s: expr, $a: ident => $body: expr) => {
        match $s {
            $crate::data::Scalars::I8($a) => $body,
            $crate::data::Scalars::I16($a) => $body,
            $crate::data::Scalars::F32($a) => $body,
        }
    };
}

pub(crate) use map_scalars;

impl Scalars {
    /// 由数组构建.
    #[inline]
    pub fn from_array<T: Voxel>(a: Array3<T>) -> Self {
        T::wrap(a.into_shared())
    }

    /// 标量类型.
    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalars::I8(_) => ScalarType::I8,
            Scalars::I16(_) => ScalarType::I16,
            Scalars::F32(_) => ScalarType::F32,
        }
    }

    /// 数组形状 `(nz, ny, nx)`.
    #[inline]
    pub fn shape(&self) -> crate::Idx3d {
        map_scalars!(self, a => a.dim())
    }

    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        map_scalars!(self, a => a.len())
    }

    /// 是否不含体素?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 以 `f64` 读取 `(z, y, x)` 处的体素. 越界时返回 `None`.
    #[inline]
    pub fn get_f64(&self, idx: crate::Idx3d) -> Option<f64> {
        map_scalars!(self, a => a.get(idx).map(|v| v.as_f64()))
    }

    /// 若为 `T` 类型, 获取只读视图.
    #[inline]
    pub fn view<T: Voxel>(&self) -> Option<ArrayView3<'_, T>> {
        T::peek(self).map(|a| a.view())
    }

    /// 以 `f64` 复制全部数据.
    pub fn to_f64(&self) -> Array3<f64> {
        map_scalars!(self, a => a.mapv(|v| v.as_f64()))
    }

    /// 按给定类型从 `f64` 数组转换, 返回结果与被截断的体素个数.
    pub fn saturating_from(src: &Array3<f64>, ty: ScalarType) -> (Self, usize) {
        fn convert<T: Voxel>(src: &Array3<f64>) -> (Scalars, usize) {
            let mut clamped = 0;
            let out = src.mapv(|v| {
                let (o, c) = T::saturate(v);
                clamped += c as usize;
                o
            });
            (Scalars::from_array(out), clamped)
        }
        match ty {
            ScalarType::I8 => convert::<i8>(src),
            ScalarType::I16 => convert::<i16>(src),
            ScalarType::F32 => convert::<f32>(src),
        }
    }
}

impl Debug for Scalars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalars<{}>{:?}", self.scalar_type(), self.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturate_rounds_half_to_even() {
        assert_eq!(i16::saturate(2.5), (2, false));
        assert_eq!(i16::saturate(3.5), (4, false));
        assert_eq!(i16::saturate(-2.5), (-2, false));
        assert_eq!(i8::saturate(300.0), (127, true));
        assert_eq!(i8::saturate(-300.0), (-128, true));
        assert_eq!(i16::saturate(f64::NAN), (0, true));
        assert_eq!(f32::saturate(1e300), (f32::MAX, true));
        assert_eq!(f32::saturate(0.25), (0.25, false));
    }

    #[test]
    fn test_permil_to_native() {
        assert_eq!(ScalarType::I16.permil_to_native(100.0), 3276.0);
        assert_eq!(ScalarType::I8.permil_to_native(500.0), 63.0);
        assert_eq!(ScalarType::F32.permil_to_native(250.5), 250.5);
    }

    #[test]
    fn test_scalars_dispatch() {
        let s = Scalars::from_array(Array3::<i16>::from_elem((2, 3, 4), 7));
        assert_eq!(s.scalar_type(), ScalarType::I16);
        assert_eq!(s.shape(), (2, 3, 4));
        assert_eq!(s.len(), 24);
        assert_eq!(s.get_f64((1, 2, 3)), Some(7.0));
        assert_eq!(s.get_f64((2, 0, 0)), None);
        assert!(s.view::<i16>().is_some());
        assert!(s.view::<f32>().is_none());

        let (t, clamped) = Scalars::saturating_from(&s.to_f64().mapv(|v| v * 100.0), ScalarType::I8);
        assert_eq!(clamped, 24);
        assert_eq!(t.get_f64((0, 0, 0)), Some(127.0));
    }
}
