#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 以 SCANCO IPL 的语义处理骨骼显微 CT 体数据: 读写 AIM / NIfTI / DICOM,
//! 按扫描日志标定, 平滑, 门限分割, 形态学, 连通域, 厚度与间距, 以及流水线驱动.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 约定
//!
//! 1. 体素数组按 `(z, y, x)` 存储, 全局索引与范围按 `[x, y, z]` 给出.
//! 2. 二值 mask 为 `i8` 类型, 背景为 0, 前景为 127.
//! 3. 门限以千分比给出, 参考最大值见 [`consts::per_mille`].
//! 4. 每个算子都返回新的体数据, 输入保持不变; 失败时返回 [`IplError`], 不会 panic.
//!
//! # 开发计划
//!
//! ### 体数据模型与处理日志 ✅
//!
//! 整数范围, 偏移层, 三种标量类型. 日志只追加, 块格式固定.
//!
//! 实现位于 `ipl-berry/src/data` 与 `ipl-berry/src/proc_log.rs`.
//!
//! ### 扫描日志解析与标定 ✅
//!
//! 支持 HU, 线性衰减系数与密度 (mg HA/ccm) 三种标定.
//!
//! 实现位于 `ipl-berry/src/scan_log.rs` 与 `ipl-berry/src/calib.rs`.
//!
//! ### 高斯平滑与千分比门限 ✅
//!
//! 可分离卷积, 边界重复最外层体素.
//!
//! 实现位于 `ipl-berry/src/ops/gauss.rs` 与 `ipl-berry/src/ops/threshold.rs`.
//!
//! ### 三维形态学操作 ✅
//!
//! 立方体结构元素的膨胀, 腐蚀, 开, 闭. 支持按轴指定边界连续性.
//!
//! 实现位于 `ipl-berry/src/ops/morph_3d`.
//!
//! ### 连通域 ✅
//!
//! 6-连通标记, 按体积排名提取, 逐切片最大区域.
//!
//! 实现位于 `ipl-berry/src/ops/components.rs`.
//!
//! ### 距离变换, 厚度与间距 ✅
//!
//! 精确欧氏距离变换 + 最大内切球.
//!
//! 实现位于 `ipl-berry/src/ops/distance.rs`.
//!
//! ### 几何算子与形态计量 ✅
//!
//! 掩膜剥离, 包围盒裁剪, 偏移量, 取值替换, BV/TV.
//!
//! 实现位于 `ipl-berry/src/ops/geometry.rs` 与 `ipl-berry/src/ops/morphometry.rs`.
//!
//! ### 文件读写 ✅
//!
//! 1. AIM v020 读写, v030 读取. ✅
//! 2. NIfTI 读写, 日志写入旁挂文件. ✅
//! 3. DICOM 单文件与序列读写. ✅
//! 4. 压缩的 AIM 文件 ⌛️
//!
//! 实现位于 `ipl-berry/src/io`.
//!
//! ### 流水线 ✅
//!
//! 有序的算子列表, 具名中间结果, 每个阶段追加日志.
//!
//! 实现位于 `ipl-berry/src/pipeline`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

pub mod error;

pub mod workers;

pub mod data;

pub mod proc_log;

pub mod scan_log;

pub mod calib;

pub mod ops;

pub mod pipeline;

pub mod io;

pub mod prelude;

pub use calib::{Calibration, CalibrationMode};
pub use data::{Extent, MaskSlice, ScalarType, Scalars, Volume, Voxel};
pub use error::{IplError, IplResult};
pub use pipeline::{Pipeline, Session, Stage};
pub use proc_log::{LogBlock, ProcessingLog};
pub use scan_log::{ScanLog, Site};
pub use workers::Workers;
