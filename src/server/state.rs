use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::types::JobStatus;
use crate::config::{IndexerConfig, SearchConfig};
use crate::db::IndexStore;
use crate::oracle::EmbeddingOracle;
use crate::searcher::SearchEngine;

/// 后台索引任务
pub struct IndexJob {
    pub status: JobStatus,
    pub cancel: CancellationToken,
}

/// 应用状态
pub struct AppState {
    /// 索引存储
    pub store: Arc<IndexStore>,
    /// 人脸特征提取器
    pub oracle: Arc<dyn EmbeddingOracle>,
    /// 默认搜索配置
    pub search: SearchConfig,
    /// 默认索引配置
    pub index: IndexerConfig,
    /// 鉴权 token
    pub token: String,
    /// 最近一次索引任务，同一时间最多运行一个
    job: Mutex<Option<IndexJob>>,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        store: Arc<IndexStore>,
        oracle: Arc<dyn EmbeddingOracle>,
        search: SearchConfig,
        index: IndexerConfig,
        token: String,
    ) -> Arc<Self> {
        Arc::new(AppState { store, oracle, search, index, token, job: Mutex::new(None) })
    }

    pub fn engine(&self, search: SearchConfig) -> SearchEngine {
        SearchEngine::new(self.store.clone(), self.oracle.clone(), search)
    }

    /// 锁住任务状态，进度回调中也会调用，因此使用同步锁
    pub fn job(&self) -> MutexGuard<'_, Option<IndexJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
