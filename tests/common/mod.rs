#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use facesearch::error::{FaceSearchError, Result};
use facesearch::oracle::{BoundingBox, DetectedFace, Embedding, EmbeddingOracle, OracleOutput, parse_faces};
use facesearch::{IndexStore, IndexerConfig};

pub const MODEL_V1: &str = "test-model-v1";
pub const MODEL_V2: &str = "test-model-v2";
pub const DIM: usize = 4;

/// 直接从图片文件中读取 JSON 格式的人脸数据
pub struct JsonFileOracle {
    version: String,
    delay: Option<Duration>,
}

impl JsonFileOracle {
    pub fn new(version: &str) -> Arc<Self> {
        Arc::new(Self { version: version.to_owned(), delay: None })
    }

    /// 每张图片额外等待一段时间，用于测试取消
    pub fn slow(version: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self { version: version.to_owned(), delay: Some(delay) })
    }
}

impl EmbeddingOracle for JsonFileOracle {
    fn model_version(&self) -> &str {
        &self.version
    }

    fn extract_faces(&self, image: &Path) -> Result<Vec<DetectedFace>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let bytes = fs::read(image).map_err(|e| FaceSearchError::unreadable(image, e))?;
        parse_faces(image, &bytes)
    }
}

/// 第一维为 `x`，其余为 0 的特征向量，与原点的距离恰好为 `x`
pub fn embedding(x: f32) -> Embedding {
    let mut values = vec![0.0; DIM];
    values[0] = x;
    Embedding::new(values)
}

pub fn face(x: f32) -> DetectedFace {
    DetectedFace { bbox: BoundingBox { x: 0, y: 0, w: 10, h: 10 }, embedding: embedding(x) }
}

pub fn sized_face(x: f32, w: u32, h: u32) -> DetectedFace {
    DetectedFace { bbox: BoundingBox { x: 0, y: 0, w, h }, embedding: embedding(x) }
}

/// 写入一张「图片」，内容为提取器输出
pub fn write_image(dir: &Path, name: &str, faces: &[DetectedFace]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let output = OracleOutput { faces: faces.to_vec() };
    fs::write(&path, serde_json::to_vec(&output).unwrap()).unwrap();
    path
}

/// 将修改时间往后推，确保指纹发生变化
pub fn touch_later(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60)).unwrap();
}

pub fn key(path: &Path) -> String {
    path.canonicalize().unwrap().to_string_lossy().into_owned()
}

pub async fn open_store(dir: &Path) -> Arc<IndexStore> {
    Arc::new(IndexStore::open(dir.join("faces.db")).await.unwrap())
}

pub fn indexer_config() -> IndexerConfig {
    IndexerConfig { workers: 2, ..Default::default() }
}
