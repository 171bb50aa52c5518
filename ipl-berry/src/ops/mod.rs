//! 体数据算子. 每个算子都是 `&Volume -> Volume` (或两个输入) 的纯函数.

pub(crate) mod pad;

pub mod components;
pub mod distance;
pub mod gauss;
pub mod geometry;
pub mod morph_3d;
pub mod morphometry;
pub mod threshold;

pub use components::{largest, rank_extract, slicewise_largest};
pub use distance::{spacing, thickness};
pub use gauss::gauss;
pub use geometry::{
    bounding_box_cut, invert, mask_and_peel, mask_subtract, mask_union, mirror_fill, offset_add,
    set_value,
};
pub use morph_3d::{close, dilate, erode, open};
pub use morphometry::{bv_tv, mean_in_mask, FieldStats};
pub use threshold::{threshold, Threshold};
