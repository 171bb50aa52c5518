//! 处理日志 (processing log).
//!
//! 日志是只追加的纯文本. 每个算子追加一个固定格式的块:
//!
//! ```text
//! !-------------------------------------------------------------------------------
//! !> dilation
//!   distance                    2
//!   continuity                  0 0 0
//! ```
//!
//! 参数名列宽固定, 以便旧有的 diff 工具得到一致的输出.

use std::fmt::{self, Display, Write};

use crate::consts::log_layout::{BANNER, INDENT, KEY_WIDTH};

/// 算子名所在行的前缀.
const NAME_PREFIX: &str = "!> ";

/// 只追加的处理日志.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProcessingLog {
    text: String,
}

impl ProcessingLog {
    /// 从已有文本 (通常来自文件头) 构建.
    #[inline]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// 全部文本.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 文本字节数.
    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// 追加一个块. 原有文本不以换行结尾时先补一个换行.
    pub fn append(&mut self, block: &LogBlock) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        // 写入 `String` 不会失败.
        let _ = write!(self.text, "{block}");
    }

    /// 按追加顺序列出日志中所有算子块的名字.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.text
            .lines()
            .filter_map(|line| line.strip_prefix(NAME_PREFIX))
            .map(str::trim_end)
    }

    /// 取出内部文本.
    #[inline]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl Display for ProcessingLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// 单个算子的日志块: 算子名与有序的参数列表.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogBlock {
    name: String,
    params: Vec<(String, String)>,
}

impl LogBlock {
    /// 以算子名创建一个空块.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// 追加一个参数.
    pub fn param(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// 追加一个三元参数, 分量以单个空格分隔.
    pub fn triple<T: Display>(self, key: impl Into<String>, v: &[T; 3]) -> Self {
        self.param(key, format_args!("{} {} {}", v[0], v[1], v[2]))
    }

    /// 算子名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 参数列表.
    #[inline]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl Display for LogBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{BANNER}")?;
        writeln!(f, "{NAME_PREFIX}{}", self.name)?;
        for (key, value) in self.params.iter() {
            if key.chars().count() >= KEY_WIDTH {
                writeln!(f, "{INDENT}{key} {value}")?;
            } else {
                writeln!(f, "{INDENT}{key:<KEY_WIDTH$}{value}")?;
            }
        }
        Ok(())
    }
}
