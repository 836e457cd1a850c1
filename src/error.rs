//! 库层面的错误类型
//!
//! 命令行和 HTTP 服务使用 anyhow 包装这些错误，库内部则保留具体的错误种类，
//! 方便调用方区分「单个文件失败」和「整个操作失败」。

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FaceSearchError>;

#[derive(Error, Debug)]
pub enum FaceSearchError {
    /// 索引使用的模型版本与当前提取器不一致
    #[error(
        "model version mismatch: index was built with {store:?}, extractor is {oracle:?}; re-index with the current model"
    )]
    VersionMismatch { store: String, oracle: String },

    /// 特征向量维度与索引不一致
    #[error("embedding dimension mismatch: index has {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// 参考图片中没有检测到人脸
    #[error("no face detected in reference image {}", path.display())]
    NoFaceDetected { path: PathBuf },

    /// 图片无法读取、损坏或格式不支持
    #[error("unreadable image {}: {reason}", path.display())]
    UnreadableImage { path: PathBuf, reason: String },

    #[error("invalid tolerance {0}: must be a finite, non-negative number")]
    InvalidTolerance(f32),

    #[error("index schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("search timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("index store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("failed to migrate index store: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaceSearchError {
    /// 存储写入失败，值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// 必须终止整个操作的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. }
                | Self::SchemaMismatch { .. }
                | Self::Migrate(_)
                | Self::InvalidConfig(_)
                | Self::NoFaceDetected { .. }
        )
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableImage { path: path.into(), reason: reason.to_string() }
    }
}
