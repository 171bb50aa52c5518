//! 流水线驱动.
//!
//! 流水线只是一个有序的 [`Stage`] 列表. 驱动依次执行每个阶段, 将输出传给下一阶段,
//! 并为每个阶段向处理日志追加一个块. 阶段之间不做任何优化.

use std::collections::HashMap;
use std::time::Instant;

use crate::data::Volume;
use crate::error::{invalid, IplResult};
use crate::proc_log::ProcessingLog;
use crate::scan_log::ScanLog;
use crate::workers::Workers;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod stage;

pub use stage::Stage;

/// 一次流水线执行的上下文: 处理日志, 标定记录, 线程池句柄与具名中间结果.
#[derive(Debug, Default)]
pub struct Session {
    /// 不断增长的处理日志.
    pub log: ProcessingLog,

    /// 从输入日志解析出的标定记录.
    pub scan_log: Option<ScanLog>,

    /// 算子内部并行使用的线程池.
    pub workers: Workers,

    slots: HashMap<String, Volume>,
}

impl Session {
    /// 以给定的线程池创建空上下文.
    pub fn new(workers: Workers) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// 以 `vol` 的处理日志初始化上下文, 并从中解析标定记录.
    pub fn for_volume(vol: &Volume, workers: Workers) -> Self {
        Self {
            log: vol.log().clone(),
            scan_log: Some(ScanLog::parse(vol.log().as_str())),
            workers,
            slots: HashMap::new(),
        }
    }

    /// 存入具名中间结果. 同名的旧结果被替换.
    pub fn store(&mut self, name: &str, vol: Volume) {
        if self.slots.insert(name.to_owned(), vol).is_some() {
            log::debug!("slot `{name}` overwritten");
        }
    }

    /// 获取具名中间结果. 不存在时返回 `InvalidParameter`.
    pub fn slot(&self, name: &str) -> IplResult<&Volume> {
        match self.slots.get(name) {
            Some(v) => Ok(v),
            None => invalid!("no volume stored under `{name}`"),
        }
    }

    /// 当前持有的中间结果个数.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn release(&mut self, name: &str) {
        if self.slots.remove(name).is_some() {
            log::debug!("slot `{name}` released");
        }
    }
}

/// 有序的阶段列表.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pipeline {
    /// 各阶段, 按执行顺序.
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// 创建空流水线.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个阶段.
    #[inline]
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// 每个槽位最后一次被引用的阶段序号.
    fn last_uses(&self) -> HashMap<&str, usize> {
        self.stages
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.slot().map(|name| (name, i)))
            .collect()
    }

    /// 依次执行所有阶段.
    ///
    /// `session.log` 为空时先以输入的处理日志填充. 每个阶段结束后向 `session.log`
    /// 追加该阶段的日志块, 并将日志附加到输出上.
    /// 出错时以阶段名包装错误. 槽位在最后一次被引用之后立即释放.
    pub fn run(&self, session: &mut Session, input: Volume) -> IplResult<Volume> {
        let last_uses = self.last_uses();
        if session.log.is_empty() {
            session.log = input.log().clone();
        }
        let mut cur = input;
        for (i, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            let start = Instant::now();
            let out = stage
                .apply(session, cur)
                .map_err(|e| e.at_stage(name))?;

            session.log.append(&stage.block());
            cur = out.with_log(session.log.clone());
            log::info!(
                "stage {}/{} `{name}` done in {:.3?}, dims = {:?}, type = {}",
                i + 1,
                self.stages.len(),
                start.elapsed(),
                cur.dims(),
                cur.scalar_type()
            );

            if let Some(slot) = stage.slot() {
                if last_uses.get(slot) == Some(&i) {
                    session.release(slot);
                }
            }
        }
        Ok(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::CalibrationMode;
    use crate::data::{Extent, ScalarType};
    use crate::error::IplError;
    use ndarray::Array3;

    fn init_logger() {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();
    }

    /// 中心 6³ 的高值立方体, 其余为低值.
    fn phantom() -> Volume {
        let data = Array3::from_shape_fn((12, 12, 12), |(z, y, x)| {
            if [z, y, x].iter().all(|c| (3..9).contains(c)) {
                20000i16
            } else {
                100
            }
        });
        let log = ProcessingLog::new("Mu_Scaling 8192\nHU: mu water 0.2366\n");
        Volume::from_array(data, [0.082; 3]).unwrap().with_log(log)
    }

    #[test]
    fn test_segmentation_pipeline() {
        init_logger();
        let vol = phantom();
        let mut session = Session::for_volume(&vol, Workers::serial());
        let p = Pipeline::new()
            .then(Stage::Gauss {
                sigma: 0.8,
                support: 1,
            })
            .then(Stage::Threshold {
                lower: 200.0,
                upper: 1000.0,
                value: 127,
            })
            .then(Stage::Largest { value: 127 })
            .then(Stage::Store {
                name: "bone".into(),
            })
            .then(Stage::Dilation {
                distance: 1,
                continuity: [0, 0, 0],
            })
            .then(Stage::Erosion {
                distance: 1,
                continuity: [0, 0, 0],
            })
            .then(Stage::BoundingBoxCut {
                mask: Some("bone".into()),
                border: [0; 3],
            });
        let out = p.run(&mut session, vol).unwrap();
        // 膨胀 1 后再以宽 5 的窗口腐蚀, 6³ 的骨块剩下 4³.
        assert_eq!(out.count_foreground().unwrap(), 64);
        assert_eq!(out.dims(), [6, 6, 6]);
        assert_eq!(session.slot_count(), 0);

        let names: Vec<_> = out.log().stage_names().collect();
        assert_eq!(
            names,
            [
                "gauss_lp",
                "threshold",
                "cl_extract",
                "store",
                "dilation",
                "erosion",
                "bounding_box_cut"
            ]
        );
        assert!(out.log().as_str().starts_with("Mu_Scaling 8192\n"));
        assert_eq!(out.log(), &session.log);
    }

    #[test]
    fn test_input_log_is_kept() {
        let vol = phantom();
        let original = vol.log().as_str().to_owned();
        let mut session = Session::new(Workers::serial());
        let out = Pipeline::new()
            .then(Stage::Threshold {
                lower: 200.0,
                upper: 1000.0,
                value: 127,
            })
            .run(&mut session, vol)
            .unwrap();
        let text = out.log().as_str();
        assert!(text.starts_with(&original));
        assert!(text.len() > original.len());
        assert_eq!(out.log().stage_names().collect::<Vec<_>>(), ["threshold"]);
    }

    #[test]
    fn test_calibrate_uses_scan_log() {
        let vol = phantom();
        let mut session = Session::for_volume(&vol, Workers::serial());
        let p = Pipeline::new().then(Stage::Calibrate {
            mode: CalibrationMode::Hu,
            output: ScalarType::F32,
        });
        let out = p.run(&mut session, vol).unwrap();
        let hu = out.data::<f32>().unwrap()[(0, 0, 0)] as f64;
        let expect = 1000.0 * (100.0 / 8192.0 - 0.2366) / 0.2366;
        assert!((hu - expect).abs() < 1e-3);

        let bare = Volume::from_array(Array3::<i16>::zeros((1, 1, 1)), [1.0; 3]).unwrap();
        let err = Pipeline::new()
            .then(Stage::Calibrate {
                mode: CalibrationMode::Density,
                output: ScalarType::F32,
            })
            .run(&mut Session::new(Workers::serial()), bare)
            .unwrap_err();
        assert!(matches!(err, IplError::Stage { ref stage, .. } if stage == "calibrate"));
        assert!(matches!(err.root(), IplError::LogFieldMissing(_)));
    }

    #[test]
    fn test_rank_union_and_slots() {
        let e = Extent::with_dims([12, 4, 4]).unwrap();
        let vol = Volume::mask_from_fn(e, [1.0; 3], |[x, _, _]| x < 3 || (5..7).contains(&x) || x > 9)
            .unwrap();
        let mut session = Session::new(Workers::new(2).unwrap());
        let p = Pipeline::new()
            .then(Stage::Store { name: "all".into() })
            .then(Stage::RankExtract {
                first: 2,
                last: 3,
                value: 127,
            })
            .then(Stage::Store {
                name: "tail".into(),
            })
            .then(Stage::Load { name: "all".into() })
            .then(Stage::Subtract {
                other: "tail".into(),
            })
            .then(Stage::Largest { value: 127 })
            .then(Stage::Union {
                other: "tail".into(),
            });
        // 去除排名 2, 3 后只剩最大者, 再并回去即还原.
        let out = p.run(&mut session, vol.clone()).unwrap();
        assert_eq!(out.scalars(), vol.scalars());
        assert_eq!(session.slot_count(), 0);

        let err = Pipeline::new()
            .then(Stage::Load {
                name: "missing".into(),
            })
            .run(&mut session, vol)
            .unwrap_err();
        assert!(matches!(err.root(), IplError::InvalidParameter(_)));
    }

    #[test]
    fn test_parameter_errors_name_the_stage() {
        let e = Extent::with_dims([4, 4, 4]).unwrap();
        let vol = Volume::mask_from_fn(e, [1.0; 3], |_| true).unwrap();
        let mut session = Session::new(Workers::serial());
        let err = Pipeline::new()
            .then(Stage::Opening {
                distance: -1,
                continuity: [0, 0, 0],
            })
            .run(&mut session, vol.clone())
            .unwrap_err();
        assert!(err.to_string().contains("`open`"));

        let err = Pipeline::new()
            .then(Stage::Threshold {
                lower: 10.0,
                upper: 5.0,
                value: 127,
            })
            .run(&mut session, vol)
            .unwrap_err();
        assert!(matches!(err.root(), IplError::InvalidParameter(_)));
        assert!(session.log.is_empty());
    }
}
