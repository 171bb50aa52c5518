//! 二维 mask 切片.

mod core;
mod iter;

pub use self::core::{Area2d, MaskSlice};

pub(crate) use iter::{PosIter, VoxelIter};
