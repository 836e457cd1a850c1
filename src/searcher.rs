use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use log::{debug, info};
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::SearchConfig;
use crate::db::IndexStore;
use crate::error::{FaceSearchError, Result};
use crate::metrics;
use crate::oracle::{DetectedFace, Embedding, EmbeddingOracle};

/// 一条匹配结果
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchMatch {
    pub path: String,
    /// 该图片中与参考人脸最接近的距离
    pub distance: f32,
}

/// 以图搜人
///
/// 只读访问索引，可以与正在进行的索引任务并发执行
pub struct SearchEngine {
    store: Arc<IndexStore>,
    oracle: Arc<dyn EmbeddingOracle>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>, oracle: Arc<dyn EmbeddingOracle>, config: SearchConfig) -> Self {
        Self { store, oracle, config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// 使用默认配置搜索，`tolerance` 为空时使用配置中的阈值
    pub async fn search(&self, reference: impl AsRef<Path>, tolerance: Option<f32>) -> Result<Vec<SearchMatch>> {
        let config = SearchConfig { tolerance: tolerance.unwrap_or(self.config.tolerance), ..self.config.clone() };
        self.search_with(reference, &config).await
    }

    /// 搜索所有包含参考人物的图片，按距离从小到大排序
    ///
    /// 参考图片中有多张人脸时使用面积最大的一张
    pub async fn search_with(&self, reference: impl AsRef<Path>, config: &SearchConfig) -> Result<Vec<SearchMatch>> {
        let reference = reference.as_ref().to_path_buf();
        let start = Instant::now();

        let result = match config.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.search_inner(reference, config))
                .await
                .unwrap_or(Err(FaceSearchError::Timeout(timeout))),
            None => self.search_inner(reference, config).await,
        };

        match &result {
            Ok(matches) => {
                metrics::inc_search_count("ok");
                metrics::inc_search_duration(start.elapsed().as_secs_f32());
                metrics::inc_search_matches(matches.len());
            }
            Err(FaceSearchError::NoFaceDetected { .. }) => metrics::inc_search_count("no_face"),
            Err(FaceSearchError::Timeout(_)) => metrics::inc_search_count("timeout"),
            Err(_) => metrics::inc_search_count("error"),
        }
        result
    }

    async fn search_inner(&self, reference: PathBuf, config: &SearchConfig) -> Result<Vec<SearchMatch>> {
        let tolerance = config.tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(FaceSearchError::InvalidTolerance(tolerance));
        }
        self.store.check_model_version(self.oracle.model_version()).await?;

        info!("正在搜索: {}", reference.display());
        let faces = tokio::task::spawn_blocking({
            let oracle = self.oracle.clone();
            let reference = reference.clone();
            move || oracle.extract_faces(&reference)
        })
        .await??;
        let target = pick_reference_face(faces).ok_or(FaceSearchError::NoFaceDetected { path: reference })?;

        let meta = self.store.metadata().await?;
        if let Some(expected) = meta.dimension {
            if expected != target.dim() && !self.store.is_empty().await? {
                return Err(FaceSearchError::DimensionMismatch { expected, found: target.dim() });
            }
        }

        // 每张图片只保留最小的距离
        let mut best = HashMap::<String, f32>::new();
        let mut records = std::pin::pin!(self.store.all_face_records());
        let mut scanned = 0usize;
        while let Some(face) = records.next().await {
            let face = face?;
            scanned += 1;
            let distance = face.embedding.distance(&target);
            if distance > tolerance {
                continue;
            }
            best.entry(face.path).and_modify(|d| *d = d.min(distance)).or_insert(distance);
        }
        debug!("比较了 {} 张人脸，{} 张图片匹配", scanned, best.len());

        let mut matches = best.into_iter().map(|(path, distance)| SearchMatch { path, distance }).collect::<Vec<_>>();
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.path.cmp(&b.path)));
        if let Some(limit) = config.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }
}

/// 选择面积最大的人脸，面积相同时取第一张
pub fn pick_reference_face(faces: Vec<DetectedFace>) -> Option<Embedding> {
    let mut best: Option<DetectedFace> = None;
    for face in faces {
        if best.as_ref().is_none_or(|b| face.bbox.area() > b.bbox.area()) {
            best = Some(face);
        }
    }
    best.map(|f| f.embedding)
}
