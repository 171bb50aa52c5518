//! 体数据模型.

use ndarray::{Array3, ArrayView3, Axis};

use crate::consts::mask;
use crate::error::{invalid, IplError, IplResult};
use crate::proc_log::ProcessingLog;
use crate::Idx3d;

mod extent;
mod scalars;
pub mod slice;

pub use extent::Extent;
pub(crate) use scalars::map_scalars;
pub use scalars::{Grid, ScalarType, Scalars, Voxel};
pub use slice::MaskSlice;

/// 直线网格上的三维标量场.
///
/// 体素 `[i, j, k]` (全局索引, 见 [`Extent`]) 的世界坐标为
/// `origin + [i, j, k] * spacing`, 单位毫米.
///
/// 从流水线的角度看, `Volume` 是不可变的值: 每个算子都返回新的 `Volume`.
/// 克隆只增加底层数组的引用计数.
#[derive(Clone, Debug)]
pub struct Volume {
    extent: Extent,
    spacing: [f64; 3],
    origin: [f64; 3],
    offset: [usize; 3],
    scalars: Scalars,
    log: ProcessingLog,
}

#[inline]
fn check_spacing(spacing: &[f64; 3]) -> IplResult<()> {
    if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
        invalid!("element spacing must be positive, got {spacing:?}");
    }
    Ok(())
}

impl Volume {
    /// 创建体数据. 原点为 0, 偏移为 0, 日志为空.
    ///
    /// `scalars` 的形状必须等于 `extent.shape()`, `spacing` 的分量必须为正.
    pub fn new(extent: Extent, spacing: [f64; 3], scalars: Scalars) -> IplResult<Self> {
        check_spacing(&spacing)?;
        if scalars.shape() != extent.shape() {
            invalid!(
                "scalar shape {:?} does not match extent shape {:?}",
                scalars.shape(),
                extent.shape()
            );
        }
        Ok(Self {
            extent,
            spacing,
            origin: [0.0; 3],
            offset: [0; 3],
            scalars,
            log: ProcessingLog::default(),
        })
    }

    /// 由 `(z, y, x)` 数组创建, 范围起点为原点.
    pub fn from_array<T: Voxel>(data: Array3<T>, spacing: [f64; 3]) -> IplResult<Self> {
        let (nz, ny, nx) = data.dim();
        let extent = Extent::with_dims([nx, ny, nz])?;
        Self::new(extent, spacing, Scalars::from_array(data))
    }

    /// 由谓词创建 mask. `pred` 接收全局索引 `[x, y, z]`.
    pub fn mask_from_fn<F>(extent: Extent, spacing: [f64; 3], pred: F) -> IplResult<Self>
    where
        F: Fn([i64; 3]) -> bool,
    {
        let data = Array3::from_shape_fn(extent.shape(), |idx| {
            if pred(extent.global(idx)) {
                mask::FOREGROUND
            } else {
                mask::BACKGROUND
            }
        });
        Self::new(extent, spacing, Scalars::from_array(data))
    }

    /// 以相同的元数据 (间距, 原点, 偏移, 日志) 和新的范围与数据创建体数据.
    pub fn derive(&self, extent: Extent, scalars: Scalars) -> IplResult<Self> {
        let mut out = Self::new(extent, self.spacing, scalars)?;
        out.origin = self.origin;
        out.offset = self.offset;
        out.log = self.log.clone();
        Ok(out)
    }

    /// 设置原点.
    #[inline]
    pub fn with_origin(mut self, origin: [f64; 3]) -> Self {
        self.origin = origin;
        self
    }

    /// 设置偏移.
    #[inline]
    pub fn with_offset(mut self, offset: [usize; 3]) -> Self {
        self.offset = offset;
        self
    }

    /// 设置处理日志.
    #[inline]
    pub fn with_log(mut self, log: ProcessingLog) -> Self {
        self.log = log;
        self
    }

    /// 平移范围, 使其起点为 `lo`. 数据不变.
    pub fn with_lo(mut self, lo: [i64; 3]) -> IplResult<Self> {
        self.extent = Extent::from_dims(lo, self.extent.dims())?;
        Ok(self)
    }

    /// 整数索引范围.
    #[inline]
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// 体素间距 `[sx, sy, sz]`, 单位毫米.
    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// 原点 `[ox, oy, oz]`, 单位毫米.
    #[inline]
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// 由平滑或形态学算子带入的内部填充边距 `[dx, dy, dz]`.
    #[inline]
    pub fn offset(&self) -> [usize; 3] {
        self.offset
    }

    /// 体素数组.
    #[inline]
    pub fn scalars(&self) -> &Scalars {
        &self.scalars
    }

    /// 标量类型.
    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        self.scalars.scalar_type()
    }

    /// 处理日志.
    #[inline]
    pub fn log(&self) -> &ProcessingLog {
        &self.log
    }

    /// 处理日志的可变引用. 只应追加.
    #[inline]
    pub fn log_mut(&mut self) -> &mut ProcessingLog {
        &mut self.log
    }

    /// 各轴体素个数 `[nx, ny, nz]`.
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.extent.dims()
    }

    /// 数组形状 `(nz, ny, nx)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.extent.shape()
    }

    /// 体素个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    /// 是否不含体素? 合法的体数据总是返回 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    /// 单个体素的体积, 单位立方毫米.
    #[inline]
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// 全局索引对应的世界坐标, 单位毫米.
    #[inline]
    pub fn world(&self, p: [i64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|a| self.origin[a] + p[a] as f64 * self.spacing[a])
    }

    /// 去除偏移后的有效范围.
    pub fn valid_extent(&self) -> IplResult<Extent> {
        self.extent.shrink(self.offset)
    }

    /// 获取 `T` 类型的底层数组. 类型不符时返回 `InvalidParameter`.
    pub fn data<T: Voxel>(&self) -> IplResult<&Grid<T>> {
        T::peek(&self.scalars).ok_or_else(|| {
            IplError::InvalidParameter(format!(
                "expected {} scalars, got {}",
                T::SCALAR_TYPE,
                self.scalar_type()
            ))
        })
    }

    /// 以 mask 视图读取. 体数据必须为 `i8` 且只含 0 与 127.
    pub fn mask(&self) -> IplResult<ArrayView3<'_, i8>> {
        let Some(view) = self.scalars.view::<i8>() else {
            invalid!("mask must be char typed, got {}", self.scalar_type());
        };
        if let Some(v) = view.iter().find(|v| !mask::is_binary(**v)) {
            invalid!(
                "non-binary mask: found value {v}, expected {} or {}",
                mask::BACKGROUND,
                mask::FOREGROUND
            );
        }
        Ok(view)
    }

    /// 统计 mask 前景体素个数.
    pub fn count_foreground(&self) -> IplResult<usize> {
        Ok(self
            .mask()?
            .iter()
            .filter(|v| mask::is_foreground(**v))
            .count())
    }

    /// 检查两者的范围与间距是否一致. 否则返回 `ExtentMismatch`.
    pub fn check_same_grid(&self, other: &Volume) -> IplResult<()> {
        if self.extent != other.extent {
            return Err(IplError::ExtentMismatch(format!(
                "{:?} vs {:?}",
                self.extent, other.extent
            )));
        }
        if self.spacing != other.spacing {
            return Err(IplError::ExtentMismatch(format!(
                "spacing {:?} vs {:?}",
                self.spacing, other.spacing
            )));
        }
        Ok(())
    }

    /// 获取第 `z` 层 mask 切片. 越界或不是 mask 时返回 `None`.
    pub fn mask_slice_at(&self, z: usize) -> Option<MaskSlice<'_>> {
        let view = self.scalars.view::<i8>()?;
        (z < view.len_of(Axis(0))).then(|| MaskSlice::new(view.index_axis_move(Axis(0), z)))
    }

    /// 按 z 升序迭代 mask 切片.
    pub fn mask_slices(&self) -> IplResult<impl ExactSizeIterator<Item = MaskSlice<'_>>> {
        self.mask()?;
        Ok(self.data::<i8>()?.axis_iter(Axis(0)).map(MaskSlice::new))
    }
}
