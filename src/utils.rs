use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use indicatif::ProgressStyle;
use regex::Regex;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("invalid progress bar template")
        .progress_chars("#>-")
}

/// 当前 UNIX 时间戳（秒）
pub fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// 根据逗号分隔的后缀列表构建匹配正则，忽略大小写
///
/// 例：`jpg,png` => `(?i)^(jpg|png)$`
pub fn suffix_regex(suffix: &str) -> Result<Regex, regex::Error> {
    let parts = suffix
        .split(',')
        .map(|s| s.trim().trim_start_matches('.'))
        .filter(|s| !s.is_empty())
        .map(regex::escape)
        .collect::<Vec<_>>();
    Regex::new(&format!("(?i)^({})$", parts.join("|")))
}

/// 判断文件后缀是否匹配
pub fn has_suffix(path: &Path, re: &Regex) -> bool {
    path.extension().map(|ext| re.is_match(&ext.to_string_lossy())).unwrap_or(false)
}

/// 数据库中使用的路径键
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
