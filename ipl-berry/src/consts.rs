//! 通用常量.

/// 二值 mask 的取值.
pub mod mask {
    /// mask 中背景体素的值.
    pub const BACKGROUND: i8 = 0;

    /// mask 中前景体素的值. IPL 惯例为 127.
    pub const FOREGROUND: i8 = 127;

    /// 体素是否是前景?
    #[inline]
    pub const fn is_foreground(p: i8) -> bool {
        p != BACKGROUND
    }

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: i8) -> bool {
        p == BACKGROUND
    }

    /// 体素是否是合法的 mask 值 (0 或 127)?
    #[inline]
    pub const fn is_binary(p: i8) -> bool {
        matches!(p, BACKGROUND | FOREGROUND)
    }
}

/// 千分比门限的参考最大值.
pub mod per_mille {
    /// `i8` 类型的正向最大值.
    pub const CHAR_MAX: f64 = i8::MAX as f64;

    /// `i16` 类型的正向最大值.
    pub const SHORT_MAX: f64 = i16::MAX as f64;

    /// `f32` 体数据的参考值. 取 1000, 使得千分比数值即为体素值本身
    /// (对 HU 或 mg HA/ccm 标定后的数据最直观).
    pub const FLOAT_REF: f64 = 1000.0;
}

/// SCANCO AIM 文件格式常量.
pub mod aim {
    /// v030 文件头魔数 (16 字节, 不足部分以空格和 `\0` 补齐).
    pub const V030_MAGIC: &[u8; 16] = b"AIMDATA_V030   \0";

    /// v020 pre-header 长度 (5 个 `i32`).
    pub const V020_PRE_HEADER_LEN: usize = 20;

    /// v020 image struct 长度.
    pub const V020_STRUCT_LEN: usize = 140;

    /// v030 pre-header 长度 (魔数 + 5 个 `i64`).
    pub const V030_PRE_HEADER_LEN: usize = 56;

    /// v030 image struct 长度.
    pub const V030_STRUCT_LEN: usize = 280;

    /// `char` (有符号 8 位) 类型码.
    pub const TYPE_CHAR: u32 = 0x0001_0001;

    /// `short` (有符号 16 位) 类型码.
    pub const TYPE_SHORT: u32 = 0x0002_0002;

    /// `float` (32 位) 类型码.
    pub const TYPE_FLOAT: u32 = 0x001A_0004;
}

/// 处理日志 (processing log) 的排版常量.
pub mod log_layout {
    /// 横幅行. 与 SCANCO 日志分隔线一致, 共 80 列.
    pub const BANNER: &str =
        "!-------------------------------------------------------------------------------";

    /// 参数行缩进.
    pub const INDENT: &str = "  ";

    /// 参数名列宽 (不含缩进). 参数名不足此宽度时以空格补齐.
    pub const KEY_WIDTH: usize = 28;

    /// 扫描日志中字段名所占列宽.
    pub const SCAN_KEY_WIDTH: usize = 30;
}

/// 已知的扫描部位码.
pub mod site {
    /// 左侧桡骨 (Radius Left).
    pub const RADIUS_LEFT: i64 = 20;

    /// 右侧桡骨 (Radius Right).
    pub const RADIUS_RIGHT: i64 = 21;

    /// 左侧胫骨 (Tibia Left).
    pub const TIBIA_LEFT: i64 = 38;

    /// 右侧胫骨 (Tibia Right).
    pub const TIBIA_RIGHT: i64 = 39;
}
