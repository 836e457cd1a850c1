//! 增量索引
//!
//! 索引过程分为四个阶段，通过有界通道串联：
//!
//! 1. 扫描：遍历目录，收集匹配后缀的图片
//! 2. 过滤：比较文件指纹，跳过没有变化的图片
//! 3. 提取：在线程池中调用提取器计算人脸特征
//! 4. 写入：唯一的写入任务逐个将结果写入索引
//!
//! 每个文件的写入都是原子的，中途取消不会留下半写入的文件。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

mod tasks;
mod types;

pub use types::{IndexEvent, IndexingStats};

use self::tasks::*;
use self::types::Counters;
use crate::config::{IndexerConfig, PrunePolicy};
use crate::db::IndexStore;
use crate::error::{FaceSearchError, Result};
use crate::oracle::EmbeddingOracle;
use crate::utils::suffix_regex;

pub(crate) type Progress = Arc<dyn Fn(&IndexEvent) + Send + Sync>;

pub struct IncrementalIndexer {
    store: Arc<IndexStore>,
    oracle: Arc<dyn EmbeddingOracle>,
    config: IndexerConfig,
}

impl IncrementalIndexer {
    pub fn new(store: Arc<IndexStore>, oracle: Arc<dyn EmbeddingOracle>, config: IndexerConfig) -> Self {
        Self { store, oracle, config }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// 扫描目录并更新索引
    ///
    /// `progress` 在每个文件处理完成后调用（写入已提交之后），可能来自不同的线程。
    /// `cancel` 被取消后尽快停止，已提交的文件保持不变，返回的统计中 `cancelled` 为 true。
    ///
    /// 只有目录完整遍历且没有被取消时才会按照 [`PrunePolicy`] 移除已删除的文件。
    pub async fn start_indexing<F>(
        &self,
        directories: &[PathBuf],
        progress: F,
        cancel: CancellationToken,
    ) -> Result<IndexingStats>
    where
        F: Fn(&IndexEvent) + Send + Sync + 'static,
    {
        let model_version = self.oracle.model_version().to_owned();
        self.store.check_model_version(&model_version).await?;

        let re_suf = suffix_regex(&self.config.suffix)
            .map_err(|e| FaceSearchError::InvalidConfig(format!("invalid suffix list: {e}")))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .thread_name(|i| format!("extract-{i}"))
            .build()
            .map_err(|e| FaceSearchError::InvalidConfig(e.to_string()))?;

        info!("开始索引，模型版本: {}，线程数: {}", model_version, self.config.workers.max(1));

        let progress: Progress = Arc::new(progress);
        let counters = Arc::new(Counters::default());
        // 写入任务遇到致命错误时只取消本次流程，不影响调用方的令牌
        let token = cancel.child_token();

        let (t1, rx) = task_scan(
            directories.to_vec(),
            re_suf,
            token.clone(),
            progress.clone(),
            counters.clone(),
        );
        let (t2, rx) = task_filter(
            rx,
            self.store.clone(),
            self.config.fingerprint,
            self.config.force,
            token.clone(),
            progress.clone(),
            counters.clone(),
        );
        let (t3, rx) = task_extract(rx, self.oracle.clone(), pool, token.clone());
        let t4 = task_write(
            rx,
            self.store.clone(),
            model_version,
            self.config.store_retries,
            self.config.retry_backoff,
            token.clone(),
            progress.clone(),
            counters.clone(),
        );

        let (scan, filter, extract, write) = tokio::join!(t1, t2, t3, t4);
        let scan = scan?;
        filter?;
        extract?;
        write??;

        if token.is_cancelled() {
            info!("索引已取消");
            counters.cancelled.store(true, Ordering::Relaxed);
            return Ok(counters.snapshot());
        }

        if scan.complete {
            self.store.mark_full_scan().await?;
            let pruned = match self.config.prune {
                PrunePolicy::Keep => 0,
                PrunePolicy::Scanned => self.store.remove_missing_under(&scan.roots, &scan.seen).await?,
                PrunePolicy::All => self.store.remove_missing(&scan.seen).await?,
            };
            if pruned > 0 {
                Counters::inc(&counters.pruned, pruned);
                progress(&IndexEvent::Pruned { count: pruned });
            }
        } else if self.config.prune != PrunePolicy::Keep {
            warn!("目录没有完整遍历，跳过清理已删除的文件");
        }

        let stats = counters.snapshot();
        info!(
            "索引完成：扫描 {}，新增/更新 {}，跳过 {}，失败 {}，移除 {}",
            stats.files_scanned, stats.files_indexed, stats.files_skipped, stats.files_failed, stats.files_pruned
        );
        Ok(stats)
    }
}
