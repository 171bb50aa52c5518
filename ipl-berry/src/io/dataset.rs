//! 数据目录.

use std::env;
use std::path::{Path, PathBuf};

/// 指定数据目录的环境变量.
pub const DATA_DIR_ENV: &str = "IPL_BERRY_DATA_DIR";

/// 获取数据目录. 优先使用环境变量 [`DATA_DIR_ENV`], 否则为 `{用户主目录}/dataset`.
pub fn data_dir() -> Option<PathBuf> {
    match env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => {
            let mut ans = dirs::home_dir()?;
            ans.push("dataset");
            Some(ans)
        }
    }
}

/// 获取数据目录下给定继续项组成的全路径.
pub fn data_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = data_dir()?;
    ans.extend(it);
    Some(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_with() {
        let Some(base) = data_dir() else {
            return;
        };
        let full = data_dir_with(["tibia", "C0001234.AIM"]).unwrap();
        assert!(full.starts_with(&base));
        assert!(full.ends_with("tibia/C0001234.AIM"));
    }
}
