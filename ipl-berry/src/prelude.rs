//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{Extent, MaskSlice, ScalarType, Scalars, Volume, Voxel};
pub use crate::error::{IplError, IplResult};
pub use crate::proc_log::{LogBlock, ProcessingLog};
pub use crate::scan_log::{ScanLog, Site};
pub use crate::workers::Workers;

pub use crate::calib::{Calibration, CalibrationMode};
pub use crate::ops::{
    bounding_box_cut, bv_tv, close, dilate, erode, gauss, invert, largest, mask_and_peel,
    mask_subtract, mask_union, mean_in_mask, mirror_fill, offset_add, open, rank_extract,
    set_value, slicewise_largest, spacing, thickness, threshold, FieldStats, Threshold,
};
pub use crate::pipeline::{Pipeline, Session, Stage};

pub use crate::consts::mask::{BACKGROUND, FOREGROUND};

pub use crate::io::{self, data_dir_with};
