use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

use crate::fingerprint::Fingerprint;
use crate::oracle::DetectedFace;

/// 扫描得到的候选图片
pub struct Candidate {
    pub path: PathBuf,
    /// 数据库中的路径键
    pub key: String,
}

/// 需要提取特征的图片
pub struct PendingImage {
    pub path: PathBuf,
    pub key: String,
    /// 读取失败时为空，写入后下次扫描会重新处理
    pub fingerprint: Option<Fingerprint>,
}

/// 特征提取结果
pub enum Extracted {
    Faces { key: String, fingerprint: Option<Fingerprint>, faces: Vec<DetectedFace> },
    Failed { key: String, reason: String },
}

/// 扫描阶段的结果
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// 实际扫描的根目录（已规范化）
    pub roots: Vec<PathBuf>,
    /// 本次扫描中出现的所有图片
    pub seen: HashSet<String>,
    /// 所有目录是否都完整遍历
    pub complete: bool,
}

/// 索引进度事件
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    /// 目录扫描完成
    Scanned { total: u64 },
    /// 文件未变化，跳过
    Skipped { path: String },
    /// 文件已写入索引
    Indexed { path: String, faces: u64 },
    /// 文件处理失败
    Failed { path: String, reason: String },
    /// 移除了已删除的文件
    Pruned { count: u64 },
}

/// 一次索引的统计结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct IndexingStats {
    pub files_scanned: u64,
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub faces_stored: u64,
    pub files_pruned: u64,
    /// 是否被中途取消
    pub cancelled: bool,
}

/// 各个任务共享的计数器
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub scanned: AtomicU64,
    pub indexed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub faces: AtomicU64,
    pub pruned: AtomicU64,
    pub cancelled: AtomicBool,
}

impl Counters {
    pub fn inc(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexingStats {
        IndexingStats {
            files_scanned: self.scanned.load(Ordering::Relaxed),
            files_indexed: self.indexed.load(Ordering::Relaxed),
            files_skipped: self.skipped.load(Ordering::Relaxed),
            files_failed: self.failed.load(Ordering::Relaxed),
            faces_stored: self.faces.load(Ordering::Relaxed),
            files_pruned: self.pruned.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}
