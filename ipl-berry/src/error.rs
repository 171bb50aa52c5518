//! 运行时错误.

use std::path::PathBuf;

/// 读写、参数校验与流水线执行中的错误.
#[derive(Debug, thiserror::Error)]
pub enum IplError {
    /// 文件不存在, 或目录为空.
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    /// 没有可以匹配扩展名或魔数的读写器, 或文件内容不受支持.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// 需要标定, 但扫描日志缺少必需字段. 参数为字段名.
    #[error("scan log field missing: `{0}`")]
    LogFieldMissing(&'static str),

    /// 双输入算子的两个体数据范围或分辨率不一致.
    #[error("extent mismatch: {0}")]
    ExtentMismatch(String),

    /// 非法参数: 负距离, 非单调门限, 非二值 mask 等.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// 标定值无法用目标标量类型表示. 参数为溢出的体素个数.
    ///
    /// 算子内部总是截断并记录警告, 仅严格模式会返回该错误.
    #[error("numeric overflow: {0} voxel(s) out of range")]
    NumericOverflow(usize),

    /// 找到文件之后的底层 I/O 错误.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// 流水线中某一阶段失败.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        /// 阶段 (算子) 名.
        stage: String,

        /// 原始错误.
        #[source]
        source: Box<IplError>,
    },
}

impl IplError {
    /// 用阶段名包装错误.
    pub fn at_stage(self, stage: impl Into<String>) -> Self {
        IplError::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// 剥去所有 [`IplError::Stage`] 包装, 获取根本错误.
    pub fn root(&self) -> &IplError {
        match self {
            IplError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// 本 crate 通用的返回值类型.
pub type IplResult<T> = Result<T, IplError>;

/// 构造 [`IplError::InvalidParameter`] 并立即返回.
macro_rules! invalid {
    ($($arg: tt)*) => {
        return Err($crate::error::IplError::InvalidParameter(format!($($arg)*)))
    };
}

pub(crate) use invalid;
