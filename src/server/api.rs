use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum_typed_multipart::TypedMultipart;
use log::{error, info};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;

use super::error::{Result, ServerError};
use super::state::{AppState, IndexJob};
use super::types::*;
use crate::config::{IndexerConfig, SearchConfig};
use crate::db::IndexStats;
use crate::indexer::{IncrementalIndexer, IndexEvent};
use crate::metrics;

/// 上传参考图片，搜索包含同一个人的图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, description = "参考图片中没有人脸或参数错误"),
        (status = 409, description = "索引的模型版本与当前提取器不一致"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let TypedMultipart(SearchRequest { file, tolerance, count }) = data;
    let config = SearchConfig {
        tolerance: tolerance.unwrap_or(state.search.tolerance),
        limit: count.or(state.search.limit),
        ..state.search.clone()
    };

    // 提取器根据后缀判断格式，因此保留上传文件的后缀
    let suffix = file
        .metadata
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let start = Instant::now();
    info!("正在搜索上传图片: {:?}", file.metadata.file_name);

    let contents = file.contents;
    let image = spawn_blocking(move || -> std::io::Result<_> {
        let mut image = tempfile::Builder::new().prefix("facesearch-").suffix(&suffix).tempfile()?;
        image.write_all(&contents)?;
        image.flush()?;
        Ok(image)
    })
    .await??;

    let result = state.engine(config.clone()).search_with(image.path(), &config).await?;

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 获取索引统计信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = IndexStats),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<IndexStats>> {
    Ok(Json(state.store.stats().await?))
}

/// 在后台启动索引任务
#[utoipa::path(
    post,
    path = "/index",
    request_body = IndexRequest,
    responses(
        (status = 200, body = JobStatus),
        (status = 409, description = "已有索引任务在运行"),
    )
)]
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<JobStatus>> {
    let cancel = CancellationToken::new();
    let status = {
        let mut job = state.job();
        if job.as_ref().is_some_and(|j| j.status.state == JobState::Running) {
            return Err(ServerError::JobRunning.into());
        }
        let status = JobStatus::new(req.directories.clone());
        *job = Some(IndexJob { status: status.clone(), cancel: cancel.clone() });
        status
    };

    let config = IndexerConfig { force: req.force, prune: req.prune.unwrap_or(state.index.prune), ..state.index.clone() };
    let indexer = IncrementalIndexer::new(state.store.clone(), state.oracle.clone(), config);
    info!("启动索引任务: {:?}", req.directories);

    tokio::spawn({
        let state = state.clone();
        async move {
            let progress = {
                let state = state.clone();
                move |event: &IndexEvent| {
                    if let Some(job) = state.job().as_mut() {
                        job.status.apply(event);
                    }
                }
            };
            let result = indexer.start_indexing(&req.directories, progress, cancel).await;

            let mut job = state.job();
            let Some(job) = job.as_mut() else { return };
            match result {
                Ok(stats) => {
                    job.status.state = if stats.cancelled { JobState::Cancelled } else { JobState::Finished };
                    job.status.stats = Some(stats);
                }
                Err(e) => {
                    error!("索引任务失败: {}", e);
                    job.status.state = JobState::Failed;
                    job.status.error = Some(e.to_string());
                }
            }
        }
    });

    Ok(Json(status))
}

/// 查询最近一次索引任务的状态
#[utoipa::path(
    get,
    path = "/index/status",
    responses(
        (status = 200, body = JobStatus),
        (status = 404, description = "尚未启动过索引任务"),
    )
)]
pub async fn index_status_handler(State(state): State<Arc<AppState>>) -> Result<Json<JobStatus>> {
    let job = state.job();
    let job = job.as_ref().ok_or(ServerError::NoJob)?;
    Ok(Json(job.status.clone()))
}

/// 取消正在运行的索引任务，已写入的文件保留
#[utoipa::path(
    post,
    path = "/index/cancel",
    responses(
        (status = 200, body = JobStatus),
        (status = 404, description = "尚未启动过索引任务"),
    )
)]
pub async fn index_cancel_handler(State(state): State<Arc<AppState>>) -> Result<Json<JobStatus>> {
    let job = state.job();
    let job = job.as_ref().ok_or(ServerError::NoJob)?;
    if job.status.state == JobState::Running {
        info!("取消索引任务");
        job.cancel.cancel();
    }
    Ok(Json(job.status.clone()))
}

/// 导出 prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
