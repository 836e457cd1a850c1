use serde::Serialize;
use utoipa::ToSchema;

use crate::oracle::{BoundingBox, Embedding};

/// 图片文件记录
#[derive(Debug, sqlx::FromRow)]
pub struct FileRecord {
    /// 文件 ID
    pub id: i64,
    /// 规范化后的绝对路径
    pub path: String,
    /// 文件大小，读取失败时为空
    pub size: Option<i64>,
    /// 修改时间（纳秒），读取失败时为空
    pub mtime: Option<i64>,
    /// blake3 内容哈希
    pub hash: Option<Vec<u8>>,
    /// 最后一次索引的时间（秒）
    pub last_indexed: i64,
}

/// 人脸记录，联表查询时附带文件路径
#[derive(Debug, sqlx::FromRow)]
pub struct FaceRow {
    pub path: String,
    pub bbox_x: i64,
    pub bbox_y: i64,
    pub bbox_w: i64,
    pub bbox_h: i64,
    /// 小端序 f32 数组
    pub embedding: Vec<u8>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MetadataRecord {
    pub model_version: Option<String>,
    pub dimension: Option<i64>,
    pub schema_version: i64,
    pub last_full_scan: Option<i64>,
}

/// 从索引中读出的一张人脸
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFace {
    pub path: String,
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

impl TryFrom<FaceRow> for StoredFace {
    type Error = sqlx::Error;

    fn try_from(row: FaceRow) -> Result<Self, Self::Error> {
        let embedding = Embedding::from_blob(&row.embedding).ok_or_else(|| {
            sqlx::Error::Decode(format!("invalid embedding blob for {}", row.path).into())
        })?;
        Ok(Self {
            bbox: BoundingBox {
                x: row.bbox_x as u32,
                y: row.bbox_y as u32,
                w: row.bbox_w as u32,
                h: row.bbox_h as u32,
            },
            path: row.path,
            embedding,
        })
    }
}

/// 索引元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// 构建索引所用的模型版本，索引为空时可能没有
    pub model_version: Option<String>,
    /// 特征向量维度
    pub dimension: Option<usize>,
    pub schema_version: i64,
    /// 最后一次完整扫描的时间（秒）
    pub last_full_scan: Option<i64>,
}

impl From<MetadataRecord> for IndexMetadata {
    fn from(r: MetadataRecord) -> Self {
        Self {
            model_version: r.model_version,
            dimension: r.dimension.map(|d| d as usize),
            schema_version: r.schema_version,
            last_full_scan: r.last_full_scan,
        }
    }
}

/// 索引统计信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IndexStats {
    /// 已索引的文件数量
    pub total_files: u64,
    /// 已索引的人脸数量
    pub total_faces: u64,
    /// 模型版本
    pub model_version: Option<String>,
    /// 特征向量维度
    pub dimension: Option<usize>,
    /// 最后一次完整扫描的时间（UNIX 秒）
    pub last_full_scan: Option<i64>,
}
