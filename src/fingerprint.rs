use std::fs::File;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use clap::ValueEnum;

/// 文件指纹，用于判断文件自上次索引后是否发生变化
///
/// 所有字段完全相等才视为同一文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// 文件大小
    pub size: u64,
    /// 修改时间，自 UNIX 纪元起的纳秒数
    pub mtime_ns: i64,
    /// blake3 内容哈希，仅在 [`FingerprintMode::Content`] 下计算
    pub hash: Option<[u8; 32]>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintMode {
    /// 仅使用文件大小和修改时间
    #[default]
    Metadata,
    /// 额外计算文件内容哈希
    Content,
}

impl Fingerprint {
    /// 从数据库中的列还原指纹，任一列为空则视为没有指纹
    pub fn from_columns(size: Option<i64>, mtime: Option<i64>, hash: Option<Vec<u8>>) -> Option<Self> {
        let hash = match hash {
            Some(bytes) => Some(bytes.try_into().ok()?),
            None => None,
        };
        Some(Self { size: size? as u64, mtime_ns: mtime?, hash })
    }
}

/// 计算文件指纹
///
/// 只读取文件元数据（内容模式下额外读取文件内容），没有副作用
pub fn fingerprint(path: impl AsRef<Path>, mode: FingerprintMode) -> io::Result<Fingerprint> {
    let path = path.as_ref();
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"));
    }
    let mtime = meta.modified()?;
    let mtime_ns = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    };
    let hash = match mode {
        FingerprintMode::Metadata => None,
        FingerprintMode::Content => {
            let mut hasher = blake3::Hasher::new();
            io::copy(&mut File::open(path)?, &mut hasher)?;
            Some(*hasher.finalize().as_bytes())
        }
    };
    Ok(Fingerprint { size: meta.len(), mtime_ns, hash })
}
