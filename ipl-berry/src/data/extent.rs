//! 体数据的整数索引范围.

use crate::error::{IplError, IplResult};
use crate::Idx3d;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 三维整数索引范围 `(x0, x1, y0, y1, z0, z1)`, 两端均为闭区间.
///
/// 分量均按 `[x, y, z]` 顺序存储. 底层数组按 `(z, y, x)` 顺序组织,
/// 见 [`Self::shape`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extent {
    lo: [i64; 3],
    hi: [i64; 3],
}

impl Extent {
    /// 由起止索引构建. 任一轴 `hi < lo` 时返回 `InvalidParameter`.
    pub fn new(lo: [i64; 3], hi: [i64; 3]) -> IplResult<Self> {
        if (0..3).any(|a| hi[a] < lo[a]) {
            return Err(IplError::InvalidParameter(format!(
                "empty extent {lo:?}..={hi:?}"
            )));
        }
        Ok(Self { lo, hi })
    }

    /// 由起点与各轴体素个数 `[nx, ny, nz]` 构建. 任一轴个数为 0 或终点溢出时返回
    /// `InvalidParameter`.
    pub fn from_dims(lo: [i64; 3], dims: [usize; 3]) -> IplResult<Self> {
        if dims.contains(&0) {
            return Err(IplError::InvalidParameter(format!("zero dimension {dims:?}")));
        }
        let mut hi = [0i64; 3];
        for a in 0..3 {
            hi[a] = i64::try_from(dims[a] - 1)
                .ok()
                .and_then(|d| lo[a].checked_add(d))
                .ok_or_else(|| {
                    IplError::InvalidParameter(format!("extent {lo:?} + {dims:?} overflows"))
                })?;
        }
        Ok(Self { lo, hi })
    }

    /// 起点为原点, 各轴个数为 `[nx, ny, nz]` 的范围.
    #[inline]
    pub fn with_dims(dims: [usize; 3]) -> IplResult<Self> {
        Self::from_dims([0; 3], dims)
    }

    /// 起始索引 `[x0, y0, z0]`.
    #[inline]
    pub fn lo(&self) -> [i64; 3] {
        self.lo
    }

    /// 终止索引 `[x1, y1, z1]` (含).
    #[inline]
    pub fn hi(&self) -> [i64; 3] {
        self.hi
    }

    /// 各轴体素个数 `[nx, ny, nz]`.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [0, 1, 2].map(|a| (self.hi[a] - self.lo[a] + 1) as usize)
    }

    /// 底层数组形状 `(nz, ny, nx)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let [nx, ny, nz] = self.dims();
        (nz, ny, nx)
    }

    /// 体素总个数.
    #[inline]
    pub fn size(&self) -> usize {
        self.dims().iter().product()
    }

    /// 每个面向外扩张 `by[a]` 个体素.
    pub fn grow(&self, by: [usize; 3]) -> Self {
        Self {
            lo: [0, 1, 2].map(|a| self.lo[a] - by[a] as i64),
            hi: [0, 1, 2].map(|a| self.hi[a] + by[a] as i64),
        }
    }

    /// 每个面向内收缩 `by[a]` 个体素. 收缩后为空时返回 `InvalidParameter`.
    pub fn shrink(&self, by: [usize; 3]) -> IplResult<Self> {
        Self::new(
            [0, 1, 2].map(|a| self.lo[a] + by[a] as i64),
            [0, 1, 2].map(|a| self.hi[a] - by[a] as i64),
        )
    }

    /// 与 `other` 的交集. 不相交时返回 `None`.
    pub fn intersect(&self, other: &Extent) -> Option<Extent> {
        let lo = [0, 1, 2].map(|a| self.lo[a].max(other.lo[a]));
        let hi = [0, 1, 2].map(|a| self.hi[a].min(other.hi[a]));
        Self::new(lo, hi).ok()
    }

    /// `other` 是否完全位于 `self` 之内?
    #[inline]
    pub fn contains_extent(&self, other: &Extent) -> bool {
        (0..3).all(|a| self.lo[a] <= other.lo[a] && other.hi[a] <= self.hi[a])
    }

    /// 全局索引 `[x, y, z]` 是否位于范围内?
    #[inline]
    pub fn contains(&self, p: [i64; 3]) -> bool {
        (0..3).all(|a| self.lo[a] <= p[a] && p[a] <= self.hi[a])
    }

    /// 将全局索引 `[x, y, z]` 转换为底层数组索引 `(z, y, x)`. 越界时返回 `None`.
    #[inline]
    pub fn local(&self, p: [i64; 3]) -> Option<Idx3d> {
        self.contains(p).then(|| {
            let [x, y, z] = [0, 1, 2].map(|a| (p[a] - self.lo[a]) as usize);
            (z, y, x)
        })
    }

    /// 将底层数组索引 `(z, y, x)` 转换为全局索引 `[x, y, z]`. 不检查越界.
    #[inline]
    pub fn global(&self, (z, y, x): Idx3d) -> [i64; 3] {
        [
            self.lo[0] + x as i64,
            self.lo[1] + y as i64,
            self.lo[2] + z as i64,
        ]
    }

    /// `inner` 在 `self` 底层数组中的起点 `(z, y, x)`.
    ///
    /// `inner` 必须位于 `self` 之内, 否则返回 `None`.
    pub fn start_of(&self, inner: &Extent) -> Option<Idx3d> {
        self.contains_extent(inner)
            .then(|| self.local(inner.lo))
            .flatten()
    }
}
