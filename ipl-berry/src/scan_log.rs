//! 扫描日志解析.
//!
//! SCANCO 扫描日志是若干 `字段名<空白>值` 形式的行. 解析器按行首锚定的前缀识别字段,
//! 合并连续空白, 保留大小写. 解析器从不猜测: 缺失或无法解析的字段记为 `None`.

use itertools::Itertools;
use std::fmt::{self, Display};
use std::str::FromStr;

use crate::consts::log_layout::SCAN_KEY_WIDTH;
use crate::consts::site;
use crate::error::{IplError, IplResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// 扫描部位.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Site {
    /// 左侧桡骨.
    RadiusLeft,

    /// 右侧桡骨.
    RadiusRight,

    /// 左侧胫骨.
    TibiaLeft,

    /// 右侧胫骨.
    TibiaRight,

    /// 未知部位码, 原样保留.
    Raw(i64),
}

impl From<i64> for Site {
    fn from(code: i64) -> Self {
        match code {
            site::RADIUS_LEFT => Site::RadiusLeft,
            site::RADIUS_RIGHT => Site::RadiusRight,
            site::TIBIA_LEFT => Site::TibiaLeft,
            site::TIBIA_RIGHT => Site::TibiaRight,
            other => Site::Raw(other),
        }
    }
}

impl Site {
    /// 部位码.
    pub fn code(self) -> i64 {
        match self {
            Site::RadiusLeft => site::RADIUS_LEFT,
            Site::RadiusRight => site::RADIUS_RIGHT,
            Site::TibiaLeft => site::TIBIA_LEFT,
            Site::TibiaRight => site::TIBIA_RIGHT,
            Site::Raw(n) => n,
        }
    }
}

impl Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::RadiusLeft => f.write_str("RL"),
            Site::RadiusRight => f.write_str("RR"),
            Site::TibiaLeft => f.write_str("TL"),
            Site::TibiaRight => f.write_str("TR"),
            Site::Raw(n) => write!(f, "{n}"),
        }
    }
}

/// 字段名. 匹配在合并空白之后进行.
mod field {
    pub const MU_SCALING: &str = "Mu_Scaling";
    pub const MU_WATER: &str = "HU: mu water";
    pub const DENSITY_SLOPE: &str = "Density: slope";
    pub const DENSITY_INTERCEPT: &str = "Density: intercept";
    pub const SITE: &str = "Site";
    pub const INDEX_PATIENT: &str = "Index Patient";
    pub const INDEX_MEASUREMENT: &str = "Index Measurement";
    pub const PATIENT_NAME: &str = "Patient Name";
}

/// 从扫描日志中提取的标定常数与元信息.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanLog {
    /// 原生单位到线性衰减系数的整数除数.
    pub mu_scaling: Option<i64>,

    /// 水的线性衰减系数 (1/cm).
    pub mu_water: Option<f64>,

    /// 原生单位到密度 (mg HA/ccm) 的斜率.
    pub density_slope: Option<f64>,

    /// 原生单位到密度 (mg HA/ccm) 的截距.
    pub density_intercept: Option<f64>,

    /// 扫描部位.
    pub site: Option<Site>,

    /// 病人索引号.
    pub index_patient: Option<i64>,

    /// 测量索引号.
    pub index_measurement: Option<i64>,

    /// 病人姓名, 去除尾部空白.
    pub patient_name: Option<String>,
}

/// 若 `line` 以 `key` 开头且其后是空白或行尾, 返回剩余部分.
#[inline]
fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    (rest.is_empty() || rest.starts_with(' ')).then(|| rest.trim_start())
}

/// 解析数值. 失败时记录警告并返回 `None`.
fn parse_num<T: FromStr>(key: &str, value: &str) -> Option<T> {
    // 部分日志在数值后附带单位.
    let token = value.split(' ').next().unwrap_or_default();
    match token.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("scan log field `{key}` has unparsable value {value:?}");
            None
        }
    }
}

/// 仅在 `slot` 为空时写入, 即同名字段以首次出现者为准.
#[inline]
fn keep_first<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

impl ScanLog {
    /// 解析扫描日志文本.
    pub fn parse(text: &str) -> Self {
        let mut ans = Self::default();
        for raw in text.lines() {
            let line = raw.split_whitespace().join(" ");
            if line.is_empty() {
                continue;
            }
            if let Some(v) = strip_key(&line, field::MU_SCALING) {
                keep_first(&mut ans.mu_scaling, parse_num(field::MU_SCALING, v));
            } else if let Some(v) = strip_key(&line, field::MU_WATER) {
                keep_first(&mut ans.mu_water, parse_num(field::MU_WATER, v));
            } else if let Some(v) = strip_key(&line, field::DENSITY_SLOPE) {
                keep_first(&mut ans.density_slope, parse_num(field::DENSITY_SLOPE, v));
            } else if let Some(v) = strip_key(&line, field::DENSITY_INTERCEPT) {
                keep_first(
                    &mut ans.density_intercept,
                    parse_num(field::DENSITY_INTERCEPT, v),
                );
            } else if let Some(v) = strip_key(&line, field::SITE) {
                keep_first(&mut ans.site, parse_num::<i64>(field::SITE, v).map(Site::from));
            } else if let Some(v) = strip_key(&line, field::INDEX_PATIENT) {
                keep_first(&mut ans.index_patient, parse_num(field::INDEX_PATIENT, v));
            } else if let Some(v) = strip_key(&line, field::INDEX_MEASUREMENT) {
                keep_first(
                    &mut ans.index_measurement,
                    parse_num(field::INDEX_MEASUREMENT, v),
                );
            } else if let Some(v) = strip_key(&line, field::PATIENT_NAME) {
                let name = v.trim_end();
                if !name.is_empty() {
                    keep_first(&mut ans.patient_name, Some(name.to_owned()));
                }
            }
        }
        log::debug!("parsed scan log: {ans:?}");
        ans
    }

    /// 以扫描日志的排版输出已知字段, 缺失的字段跳过.
    ///
    /// 输出可以被 [`ScanLog::parse`] 原样解析回来. 用于为不带日志的输入
    /// (如 DICOM 或 NIfTI) 补写标定记录.
    pub fn render(&self) -> String {
        fn line(out: &mut String, key: &str, value: impl Display) {
            out.push_str(&format!("{key:<SCAN_KEY_WIDTH$}{value}\n"));
        }
        let mut out = String::new();
        if let Some(v) = self.index_patient {
            line(&mut out, field::INDEX_PATIENT, v);
        }
        if let Some(v) = self.index_measurement {
            line(&mut out, field::INDEX_MEASUREMENT, v);
        }
        if let Some(v) = &self.patient_name {
            line(&mut out, field::PATIENT_NAME, v);
        }
        if let Some(v) = self.site {
            line(&mut out, field::SITE, v.code());
        }
        if let Some(v) = self.mu_scaling {
            line(&mut out, field::MU_SCALING, v);
        }
        if let Some(v) = self.mu_water {
            line(&mut out, field::MU_WATER, v);
        }
        if let Some(v) = self.density_slope {
            line(&mut out, field::DENSITY_SLOPE, v);
        }
        if let Some(v) = self.density_intercept {
            line(&mut out, field::DENSITY_INTERCEPT, v);
        }
        out
    }

    /// 标定所需的 `Mu_Scaling`. 缺失时返回 `LogFieldMissing`.
    pub fn require_mu_scaling(&self) -> IplResult<i64> {
        self.mu_scaling
            .ok_or(IplError::LogFieldMissing(field::MU_SCALING))
    }

    /// 标定所需的 `HU: mu water`. 缺失时返回 `LogFieldMissing`.
    pub fn require_mu_water(&self) -> IplResult<f64> {
        self.mu_water.ok_or(IplError::LogFieldMissing(field::MU_WATER))
    }

    /// 标定所需的密度斜率与截距. 缺失时返回 `LogFieldMissing`.
    pub fn require_density(&self) -> IplResult<(f64, f64)> {
        let slope = self
            .density_slope
            .ok_or(IplError::LogFieldMissing(field::DENSITY_SLOPE))?;
        let intercept = self
            .density_intercept
            .ok_or(IplError::LogFieldMissing(field::DENSITY_INTERCEPT))?;
        Ok((slope, intercept))
    }
}
