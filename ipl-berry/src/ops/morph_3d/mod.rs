//! 3D 形态学操作: 膨胀, 腐蚀, 开运算, 闭运算.
//!
//! 结构元是半边长为 `d` 的立方体. 所有操作只接受 mask (`i8`, {0, 127}),
//! 输出仍是 mask.
//!
//! 每个轴有一个边界连续性标志: 为真时范围之外视为内部的镜像, 否则视为背景.

use ndarray::{Array3, ArrayView3};

use self::filter::{extreme_filter, Extreme};
use crate::data::{Extent, Scalars, Volume};
use crate::error::{invalid, IplResult};
use crate::ops::pad::{pad, sub_view};
use crate::workers::Workers;

mod filter;

/// 开/闭运算前临时镜像填充的层数.
const TRANSIENT_MIRROR: usize = 2;

/// 将 0/1 标志转换为布尔连续性标志. 其它取值返回 `InvalidParameter`.
pub fn continuity(flags: [u8; 3]) -> IplResult<[bool; 3]> {
    if flags.iter().any(|f| *f > 1) {
        invalid!("boundary continuity flags must be 0 or 1, got {flags:?}");
    }
    Ok(flags.map(|f| f == 1))
}

/// 将带符号的距离转换为 `usize`. 负数返回 `InvalidParameter`.
pub fn distance(d: i64) -> IplResult<usize> {
    match usize::try_from(d) {
        Ok(d) => Ok(d),
        Err(_) => invalid!("morphological distance must be non-negative, got {d}"),
    }
}

/// 膨胀, 返回结果数组及其范围.
///
/// 1. 先在每个面外扩 `d + 1` 层 (连续轴镜像, 其余补 0), 做宽 `2d + 1` 的最大值滤波;
/// 2. 在连续轴上从每个面裁回 `d` 层;
/// 3. 最后裁剪到请求的范围: 连续轴为输入范围, 其余轴为输入范围外扩 `d`.
fn dilate_raw(
    src: ArrayView3<'_, i8>,
    extent: &Extent,
    d: usize,
    cont: [bool; 3],
    workers: &Workers,
) -> IplResult<(Array3<i8>, Extent)> {
    let p = d + 1;
    let padded_extent = extent.grow([p; 3]);
    let filtered = extreme_filter(pad(src, [p; 3], cont), d, Extreme::Max, workers);

    let trimmed = padded_extent.shrink(cont.map(|c| if c { d } else { 0 }))?;
    let requested = extent.grow(cont.map(|c| if c { 0 } else { d }));
    let Some(out_extent) = trimmed.intersect(&requested) else {
        invalid!("dilation produced an empty extent");
    };
    let out = sub_view(filtered.view(), &padded_extent, &out_extent)?.to_owned();
    Ok((out, out_extent))
}

/// 半边长为 `r` 的最小值滤波, 结果范围与输入相同.
///
/// 外扩 `r` 层 (连续轴镜像, 其余补 0) 后滤波, 再裁回输入范围.
/// 非连续轴上最外 `r` 层因补 0 而成为背景.
fn erode_raw(
    src: ArrayView3<'_, i8>,
    extent: &Extent,
    r: usize,
    cont: [bool; 3],
    workers: &Workers,
) -> IplResult<Array3<i8>> {
    let p = r.max(1);
    let filtered = extreme_filter(pad(src, [p; 3], cont), r, Extreme::Min, workers);
    Ok(sub_view(filtered.view(), &extent.grow([p; 3]), extent)?.to_owned())
}

/// 膨胀. 非连续轴上范围外扩 `d`, 偏移量相应增加 `d`.
pub fn dilate(mask: &Volume, d: usize, cont: [bool; 3], workers: &Workers) -> IplResult<Volume> {
    log::debug!("dilation: distance = {d}, continuity = {cont:?}");
    let (out, out_extent) = dilate_raw(mask.mask()?, mask.extent(), d, cont, workers)?;
    let offset = [0, 1, 2].map(|a| mask.offset()[a] + if cont[a] { 0 } else { d });
    Ok(mask
        .derive(out_extent, Scalars::from_array(out))?
        .with_offset(offset))
}

/// 腐蚀. 最小值滤波宽 `2(d + 1) + 1`, 范围与偏移量不变.
///
/// 非连续轴上最外 `d + 1` 层成为背景.
pub fn erode(mask: &Volume, d: usize, cont: [bool; 3], workers: &Workers) -> IplResult<Volume> {
    log::debug!("erosion: distance = {d}, continuity = {cont:?}");
    let out = erode_raw(mask.mask()?, mask.extent(), d + 1, cont, workers)?;
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

/// 剥离最外 `r` 层: 半边长 `r` 的最小值滤波, 范围与偏移量不变.
pub(crate) fn peel(mask: &Volume, r: usize, cont: [bool; 3], workers: &Workers) -> IplResult<Volume> {
    let out = erode_raw(mask.mask()?, mask.extent(), r, cont, workers)?;
    mask.derive(*mask.extent(), Scalars::from_array(out))
}

/// 开运算: 先腐蚀后膨胀. 计算前临时镜像填充两层, 结果范围与输入相同.
///
/// 两步使用同一宽度 `2d + 1` 的窗口, 因此结果满足幂等性.
pub fn open(mask: &Volume, d: usize, cont: [bool; 3], workers: &Workers) -> IplResult<Volume> {
    log::debug!("opening: distance = {d}, continuity = {cont:?}");
    let extent = mask.extent();
    let work_extent = extent.grow([TRANSIENT_MIRROR; 3]);
    let work = pad(mask.mask()?, [TRANSIENT_MIRROR; 3], [true; 3]);

    let eroded = erode_raw(work.view(), &work_extent, d, cont, workers)?;
    let (dilated, dilated_extent) = dilate_raw(eroded.view(), &work_extent, d, cont, workers)?;
    let out = sub_view(dilated.view(), &dilated_extent, extent)?.to_owned();
    mask.derive(*extent, Scalars::from_array(out))
}

/// 闭运算: 先膨胀后腐蚀. 窗口宽度与开运算相同, 结果范围与输入相同.
pub fn close(mask: &Volume, d: usize, cont: [bool; 3], workers: &Workers) -> IplResult<Volume> {
    log::debug!("closing: distance = {d}, continuity = {cont:?}");
    let extent = mask.extent();
    let work_extent = extent.grow([TRANSIENT_MIRROR; 3]);
    let work = pad(mask.mask()?, [TRANSIENT_MIRROR; 3], [true; 3]);

    let (dilated, dilated_extent) = dilate_raw(work.view(), &work_extent, d, cont, workers)?;
    let eroded = erode_raw(dilated.view(), &dilated_extent, d, cont, workers)?;
    let out = sub_view(eroded.view(), &dilated_extent, extent)?.to_owned();
    mask.derive(*extent, Scalars::from_array(out))
}
