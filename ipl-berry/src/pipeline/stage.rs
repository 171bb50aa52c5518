use crate::calib::{Calibration, CalibrationMode};
use crate::data::{ScalarType, Volume};
use crate::error::IplResult;
use crate::ops::{components, distance, geometry, morph_3d, Threshold};
use crate::proc_log::LogBlock;
use crate::scan_log::ScanLog;

use super::Session;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "serde")]
fn default_value() -> i8 {
    crate::consts::mask::FOREGROUND
}

/// 流水线中的单个算子调用及其参数.
///
/// 参数单位与 IPL 一致: 门限为千分比, 距离与偏移量为体素, 边界连续性为 0/1.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "op", rename_all = "snake_case"))]
pub enum Stage {
    /// 按扫描日志标定.
    Calibrate {
        /// 标定目标.
        mode: CalibrationMode,
        /// 输出标量类型.
        output: ScalarType,
    },

    /// 高斯平滑.
    Gauss {
        /// 标准差 (体素).
        sigma: f64,
        /// 截断半径 (体素).
        support: usize,
    },

    /// 千分比门限.
    Threshold {
        /// 下限 (‰).
        lower: f64,
        /// 上限 (‰).
        upper: f64,
        /// 范围内体素的输出值.
        #[cfg_attr(feature = "serde", serde(default = "default_value"))]
        value: i8,
    },

    /// 膨胀.
    Dilation {
        /// 距离 (体素).
        distance: i64,
        /// 各轴边界连续性.
        continuity: [u8; 3],
    },

    /// 腐蚀.
    Erosion {
        /// 距离 (体素).
        distance: i64,
        /// 各轴边界连续性.
        continuity: [u8; 3],
    },

    /// 开运算.
    Opening {
        /// 距离 (体素).
        distance: i64,
        /// 各轴边界连续性.
        continuity: [u8; 3],
    },

    /// 闭运算.
    Closing {
        /// 距离 (体素).
        distance: i64,
        /// 各轴边界连续性.
        continuity: [u8; 3],
    },

    /// 最大 6-连通域.
    Largest {
        /// 输出值.
        #[cfg_attr(feature = "serde", serde(default = "default_value"))]
        value: i8,
    },

    /// 按体积排名提取连通域.
    RankExtract {
        /// 首个排名 (从 1 开始).
        first: usize,
        /// 末个排名 (含).
        last: usize,
        /// 输出值.
        #[cfg_attr(feature = "serde", serde(default = "default_value"))]
        value: i8,
    },

    /// 逐切片最大 4-连通区域.
    Slicewise {
        /// 输出值.
        #[cfg_attr(feature = "serde", serde(default = "default_value"))]
        value: i8,
    },

    /// 厚度场.
    Thickness,

    /// 间距场.
    Spacing,

    /// 以具名 mask 掩膜并剥离.
    MaskAndPeel {
        /// mask 所在的槽位名.
        mask: String,
        /// 剥离层数.
        peel_iter: usize,
    },

    /// 包围盒裁剪. 未给出 mask 时以输入自身为 mask.
    BoundingBoxCut {
        /// mask 所在的槽位名.
        mask: Option<String>,
        /// 各轴外扩层数.
        border: [usize; 3],
    },

    /// 增加偏移量.
    OffsetAdd {
        /// 偏移量 `[dx, dy, dz]`.
        offset: [usize; 3],
    },

    /// 镜像填充偏移层.
    MirrorFill,

    /// 替换前景与背景值.
    SetValue {
        /// 前景值.
        object: i8,
        /// 背景值.
        background: i8,
    },

    /// 前景与背景互换.
    Invert,

    /// 与具名 mask 求并.
    Union {
        /// 另一个 mask 所在的槽位名.
        other: String,
    },

    /// 去除具名 mask 的前景.
    Subtract {
        /// 另一个 mask 所在的槽位名.
        other: String,
    },

    /// 将当前体数据存入槽位, 并原样传给下一阶段.
    Store {
        /// 槽位名.
        name: String,
    },

    /// 以槽位中的体数据替换当前体数据.
    Load {
        /// 槽位名.
        name: String,
    },
}

impl Stage {
    /// 写入处理日志的算子名.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Calibrate { .. } => "calibrate",
            Stage::Gauss { .. } => "gauss_lp",
            Stage::Threshold { .. } => "threshold",
            Stage::Dilation { .. } => "dilation",
            Stage::Erosion { .. } => "erosion",
            Stage::Opening { .. } => "open",
            Stage::Closing { .. } => "close",
            Stage::Largest { .. } => "cl_extract",
            Stage::RankExtract { .. } => "cl_rank_extract",
            Stage::Slicewise { .. } => "cl_slicewise_extract",
            Stage::Thickness => "dt_object",
            Stage::Spacing => "dt_background",
            Stage::MaskAndPeel { .. } => "gobj_maskaimpeel",
            Stage::BoundingBoxCut { .. } => "bounding_box_cut",
            Stage::OffsetAdd { .. } => "offset_add",
            Stage::MirrorFill => "fill_offset_mirror",
            Stage::SetValue { .. } => "set_value",
            Stage::Invert => "invert",
            Stage::Union { .. } => "concat",
            Stage::Subtract { .. } => "subtract",
            Stage::Store { .. } => "store",
            Stage::Load { .. } => "load",
        }
    }

    /// 该阶段引用的槽位名.
    pub fn slot(&self) -> Option<&str> {
        match self {
            Stage::MaskAndPeel { mask, .. } => Some(mask.as_str()),
            Stage::BoundingBoxCut { mask, .. } => mask.as_deref(),
            Stage::Union { other } | Stage::Subtract { other } => Some(other.as_str()),
            Stage::Store { name } | Stage::Load { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// 写入处理日志的块.
    pub fn block(&self) -> LogBlock {
        let b = LogBlock::new(self.name());
        match self {
            Stage::Calibrate { mode, output } => b.param("mode", mode).param("output_type", output),
            Stage::Gauss { sigma, support } => b.param("sigma", sigma).param("support", support),
            Stage::Threshold {
                lower,
                upper,
                value,
            } => b
                .param("lower_in_perm_aut_al", lower)
                .param("upper_in_perm_aut_al", upper)
                .param("value_in_range", value),
            Stage::Dilation {
                distance,
                continuity,
            } => b
                .param("dilate_distance", distance)
                .triple("continuous_at_boundary", continuity),
            Stage::Erosion {
                distance,
                continuity,
            } => b
                .param("erode_distance", distance)
                .triple("continuous_at_boundary", continuity),
            Stage::Opening {
                distance,
                continuity,
            }
            | Stage::Closing {
                distance,
                continuity,
            } => b
                .param("open_close_distance", distance)
                .triple("continuous_at_boundary", continuity),
            Stage::Largest { value } | Stage::Slicewise { value } => b.param("value_in_range", value),
            Stage::RankExtract { first, last, value } => b
                .param("first_rank", first)
                .param("last_rank", last)
                .param("value_in_range", value),
            Stage::MaskAndPeel { mask, peel_iter } => {
                b.param("mask", mask).param("peel_iter", peel_iter)
            }
            Stage::BoundingBoxCut { mask, border } => b
                .param("mask", mask.as_deref().unwrap_or("(input)"))
                .triple("border", border),
            Stage::OffsetAdd { offset } => b.triple("add_offset", offset),
            Stage::SetValue { object, background } => b
                .param("value_object", object)
                .param("value_background", background),
            Stage::Union { other } | Stage::Subtract { other } => b.param("other", other),
            Stage::Store { name } | Stage::Load { name } => b.param("name", name),
            Stage::Thickness | Stage::Spacing | Stage::MirrorFill | Stage::Invert => b,
        }
    }

    /// 对 `input` 执行该阶段.
    pub fn apply(&self, session: &mut Session, input: Volume) -> IplResult<Volume> {
        let workers = session.workers.clone();
        let w = &workers;
        match self {
            Stage::Calibrate { mode, output } => {
                let calib = match session.scan_log.as_ref() {
                    Some(log) => Calibration::from_scan_log(log, *mode)?,
                    None => Calibration::from_scan_log(&ScanLog::parse(input.log().as_str()), *mode)?,
                };
                calib.apply(&input, *output, w)
            }
            Stage::Gauss { sigma, support } => crate::ops::gauss(&input, *sigma, *support, w),
            Stage::Threshold {
                lower,
                upper,
                value,
            } => Threshold::new(*lower, *upper).value(*value).apply(&input),
            Stage::Dilation {
                distance,
                continuity,
            } => morph_3d::dilate(
                &input,
                morph_3d::distance(*distance)?,
                morph_3d::continuity(*continuity)?,
                w,
            ),
            Stage::Erosion {
                distance,
                continuity,
            } => morph_3d::erode(
                &input,
                morph_3d::distance(*distance)?,
                morph_3d::continuity(*continuity)?,
                w,
            ),
            Stage::Opening {
                distance,
                continuity,
            } => morph_3d::open(
                &input,
                morph_3d::distance(*distance)?,
                morph_3d::continuity(*continuity)?,
                w,
            ),
            Stage::Closing {
                distance,
                continuity,
            } => morph_3d::close(
                &input,
                morph_3d::distance(*distance)?,
                morph_3d::continuity(*continuity)?,
                w,
            ),
            Stage::Largest { value } => components::largest(&input, *value),
            Stage::RankExtract { first, last, value } => {
                components::rank_extract(&input, *first, *last, *value)
            }
            Stage::Slicewise { value } => components::slicewise_largest(&input, *value, w),
            Stage::Thickness => distance::thickness(&input, w),
            Stage::Spacing => distance::spacing(&input, w),
            Stage::MaskAndPeel { mask, peel_iter } => {
                geometry::mask_and_peel(&input, session.slot(mask)?, *peel_iter, w)
            }
            Stage::BoundingBoxCut { mask, border } => match mask {
                Some(name) => geometry::bounding_box_cut(&input, session.slot(name)?, *border),
                None => geometry::bounding_box_cut(&input, &input, *border),
            },
            Stage::OffsetAdd { offset } => geometry::offset_add(&input, *offset),
            Stage::MirrorFill => geometry::mirror_fill(&input),
            Stage::SetValue { object, background } => {
                geometry::set_value(&input, *object, *background)
            }
            Stage::Invert => geometry::invert(&input),
            Stage::Union { other } => geometry::mask_union(&input, session.slot(other)?),
            Stage::Subtract { other } => geometry::mask_subtract(&input, session.slot(other)?),
            Stage::Store { name } => {
                session.store(name, input.clone());
                Ok(input)
            }
            Stage::Load { name } => Ok(session.slot(name)?.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Stage;
    use crate::calib::CalibrationMode;
    use crate::data::ScalarType;

    #[test]
    fn test_block_format() {
        let s = Stage::Dilation {
            distance: 2,
            continuity: [0, 1, 0],
        };
        let text = s.block().to_string();
        let mut lines = text.lines().skip(1);
        assert_eq!(lines.next(), Some("!> dilation"));
        assert_eq!(lines.next(), Some("  dilate_distance             2"));
        assert_eq!(lines.next(), Some("  continuous_at_boundary      0 1 0"));
        assert_eq!(lines.next(), None);

        let c = Stage::Calibrate {
            mode: CalibrationMode::Hu,
            output: ScalarType::F32,
        };
        assert!(c.block().to_string().contains("output_type                 float"));
    }

    #[test]
    fn test_slot_references() {
        assert_eq!(Stage::Invert.slot(), None);
        let b = Stage::BoundingBoxCut {
            mask: None,
            border: [0; 3],
        };
        assert_eq!(b.slot(), None);
        let u = Stage::Union {
            other: "cort".into(),
        };
        assert_eq!(u.slot(), Some("cort"));
    }
}
