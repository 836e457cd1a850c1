use std::path::PathBuf;

use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::PrunePolicy;
use crate::indexer::{IndexEvent, IndexingStats};
use crate::searcher::SearchMatch;

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: FieldData<Bytes>,
    pub tolerance: Option<f32>,
    pub count: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的参考图片
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
    /// 匹配阈值，越小越严格
    pub tolerance: Option<f32>,
    /// 最多返回的结果数量
    pub count: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 按距离从小到大排序的匹配结果
    pub result: Vec<SearchMatch>,
}

/// 启动索引任务的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct IndexRequest {
    /// 需要索引的目录（服务器上的路径）
    #[schema(value_type = Vec<String>)]
    pub directories: Vec<PathBuf>,
    /// 忽略指纹，重新处理所有图片
    #[schema(default = false)]
    #[serde(default)]
    pub force: bool,
    /// 已删除文件的处理策略，默认使用服务器配置
    pub prune: Option<PrunePolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Finished,
    Cancelled,
    Failed,
}

/// 索引任务状态
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobStatus {
    pub state: JobState,
    #[schema(value_type = Vec<String>)]
    pub directories: Vec<PathBuf>,
    /// 扫描到的图片总数，扫描完成前为空
    pub total: Option<u64>,
    /// 已处理（跳过、写入或失败）的图片数量
    pub processed: u64,
    /// 最近一次进度事件
    pub last_event: Option<IndexEvent>,
    /// 任务结束后的统计结果
    pub stats: Option<IndexingStats>,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self {
            state: JobState::Running,
            directories,
            total: None,
            processed: 0,
            last_event: None,
            stats: None,
            error: None,
        }
    }

    /// 根据进度事件更新状态
    pub fn apply(&mut self, event: &IndexEvent) {
        match event {
            IndexEvent::Scanned { total } => self.total = Some(*total),
            IndexEvent::Skipped { .. } | IndexEvent::Indexed { .. } | IndexEvent::Failed { .. } => {
                self.processed += 1
            }
            IndexEvent::Pruned { .. } => {}
        }
        self.last_event = Some(event.clone());
    }
}
