use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::distance::euclidean;
use crate::error::{FaceSearchError, Result};

/// 人脸在图片中的位置，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from([x, y, w, h]: [u32; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// 人脸特征向量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn distance(&self, other: &Embedding) -> f32 {
        euclidean(&self.0, &other.0)
    }

    /// 以小端序 f32 数组的形式存储
    pub fn to_blob(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() % 4 != 0 {
            return None;
        }
        let values = blob.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        Some(Self(values.collect()))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// 外部人脸特征提取器
///
/// 负责解码图片、检测人脸并计算特征向量。没有检测到人脸时返回空列表而不是错误，
/// 图片损坏或格式不支持时返回 [`FaceSearchError::UnreadableImage`]。
pub trait EmbeddingOracle: Send + Sync {
    /// 模型版本，不同版本的特征向量之间不可比较
    fn model_version(&self) -> &str;

    fn extract_faces(&self, image: &Path) -> Result<Vec<DetectedFace>>;
}

/// 提取器输出格式：`{"faces": [{"bbox": [x, y, w, h], "embedding": [...]}]}`
#[derive(Debug, Serialize, Deserialize)]
pub struct OracleOutput {
    pub faces: Vec<DetectedFace>,
}

/// 解析提取器输出，并检查特征向量是否合法
pub fn parse_faces(path: &Path, bytes: &[u8]) -> Result<Vec<DetectedFace>> {
    let output: OracleOutput =
        serde_json::from_slice(bytes).map_err(|e| FaceSearchError::unreadable(path, e))?;
    for face in &output.faces {
        if face.embedding.dim() == 0 {
            return Err(FaceSearchError::unreadable(path, "empty embedding"));
        }
        if face.embedding.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(FaceSearchError::unreadable(path, "non-finite embedding"));
        }
    }
    Ok(output.faces)
}

/// 调用外部程序提取人脸特征
///
/// 执行 `<program> [args...] <image>`，从标准输出读取 JSON 结果
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: PathBuf,
    args: Vec<String>,
    model_version: String,
}

impl CommandOracle {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, model_version: impl Into<String>) -> Self {
        Self { program: program.into(), args, model_version: model_version.into() }
    }
}

impl EmbeddingOracle for CommandOracle {
    fn model_version(&self) -> &str {
        &self.model_version
    }

    fn extract_faces(&self, image: &Path) -> Result<Vec<DetectedFace>> {
        let output = Command::new(&self.program).args(&self.args).arg(image).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FaceSearchError::unreadable(
                image,
                format!("extractor exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        let faces = parse_faces(image, &output.stdout)?;
        debug!("{} 中检测到 {} 张人脸", image.display(), faces.len());
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_layout() {
        let e = Embedding::new(vec![1.0, -2.5, 0.125]);
        let blob = e.to_blob();
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[0..4], &1.0f32.to_le_bytes());
        assert_eq!(Embedding::from_blob(&blob), Some(e));
        assert_eq!(Embedding::from_blob(&blob[..5]), None);
    }

    #[test]
    fn test_parse_faces() {
        let json = br#"{"faces": [{"bbox": [1, 2, 30, 40], "embedding": [0.5, 0.25]}]}"#;
        let faces = parse_faces(Path::new("a.jpg"), json).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bbox, BoundingBox { x: 1, y: 2, w: 30, h: 40 });
        assert_eq!(faces[0].bbox.area(), 1200);
        assert_eq!(faces[0].embedding.as_slice(), &[0.5, 0.25]);

        let faces = parse_faces(Path::new("a.jpg"), br#"{"faces": []}"#).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_parse_faces_rejects_garbage() {
        let err = parse_faces(Path::new("a.jpg"), b"\x89PNG....").unwrap_err();
        assert!(matches!(err, FaceSearchError::UnreadableImage { .. }));

        let json = br#"{"faces": [{"bbox": [0, 0, 1, 1], "embedding": []}]}"#;
        assert!(parse_faces(Path::new("a.jpg"), json).is_err());
    }

    #[test]
    fn test_command_oracle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, br#"{"faces": [{"bbox": [0, 0, 2, 2], "embedding": [1.0]}]}"#).unwrap();

        let oracle = CommandOracle::new("cat", vec![], "test-v1");
        assert_eq!(oracle.model_version(), "test-v1");
        assert_eq!(oracle.extract_faces(&path).unwrap().len(), 1);

        let err = oracle.extract_faces(&dir.path().join("missing.jpg")).unwrap_err();
        assert!(matches!(err, FaceSearchError::UnreadableImage { .. }));
    }
}
