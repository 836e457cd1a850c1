use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use sqlx::{SqlitePool, sqlite::*};
use tokio::sync::Mutex;

pub mod crud;
pub mod model;

pub use model::*;

use crate::error::{FaceSearchError, Result};
use crate::fingerprint::Fingerprint;
use crate::oracle::DetectedFace;
use crate::utils::unix_now;

pub type Database = SqlitePool;

/// 当前数据库结构版本
pub const SCHEMA_VERSION: i64 = 1;

pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true)
        .filename(filename)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    info!("检查数据库迁移");
    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}

/// 人脸索引存储
///
/// 独占所有持久化的文件与人脸记录。所有写操作经由内部的写锁串行执行，
/// 读操作基于 WAL 快照，可以与写操作并发进行。
pub struct IndexStore {
    pool: Database,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IndexStore {
    /// 打开索引，不存在时创建
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let pool = init_db(path).await?;

        let meta = crud::get_metadata(&pool).await?;
        if meta.schema_version != SCHEMA_VERSION {
            pool.close().await;
            return Err(FaceSearchError::SchemaMismatch {
                found: meta.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        Ok(Self { pool, path: path.to_path_buf(), write_lock: Mutex::new(()) })
    }

    /// 关闭索引，等待所有连接释放
    pub async fn close(self) {
        debug!("关闭数据库: {}", self.path.display());
        self.pool.close().await;
    }

    /// 获取文件的指纹，文件未索引或指纹未知时返回 None
    pub async fn get_fingerprint(&self, path: &str) -> Result<Option<Fingerprint>> {
        let record = crud::get_file(&self.pool, path).await?;
        Ok(record.and_then(|r| Fingerprint::from_columns(r.size, r.mtime, r.hash)))
    }

    /// 在同一个事务中替换文件的指纹和全部人脸
    ///
    /// 任何一步失败都会回滚，文件要么保持旧的完整状态，要么是新的完整状态。
    /// 索引非空且模型版本不一致时返回 [`FaceSearchError::VersionMismatch`]。
    pub async fn replace_file(
        &self,
        path: &str,
        fingerprint: Option<&Fingerprint>,
        faces: &[DetectedFace],
        model_version: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let meta = crud::get_metadata(&mut *tx).await?;
        let empty = !crud::has_files(&mut *tx).await?;

        match meta.model_version.as_deref() {
            Some(v) if v == model_version => {}
            Some(v) if !empty => {
                return Err(FaceSearchError::VersionMismatch {
                    store: v.to_owned(),
                    oracle: model_version.to_owned(),
                });
            }
            _ => crud::set_model_version(&mut *tx, Some(model_version)).await?,
        }

        // 空索引可以接受新的维度
        let mut dimension = if empty { None } else { meta.dimension.map(|d| d as usize) };
        if empty && meta.dimension.is_some() {
            crud::set_dimension(&mut *tx, None).await?;
        }

        let file_id = crud::upsert_file(&mut *tx, path, fingerprint, unix_now()).await?;
        crud::delete_faces(&mut *tx, file_id).await?;

        for face in faces {
            let dim = face.embedding.dim();
            match dimension {
                None => {
                    crud::set_dimension(&mut *tx, Some(dim as i64)).await?;
                    dimension = Some(dim);
                }
                Some(expected) if expected != dim => {
                    // tx 被丢弃时自动回滚
                    return Err(FaceSearchError::DimensionMismatch { expected, found: dim });
                }
                Some(_) => {}
            }
            crud::add_face(&mut *tx, file_id, face).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// 流式读取所有人脸
    ///
    /// 每次调用都会重新开始一次完整扫描，数据来自单个游标，不会一次性载入内存
    pub fn all_face_records(&self) -> impl Stream<Item = Result<StoredFace>> + Send + '_ {
        sqlx::query_as::<_, FaceRow>(
            r#"
            SELECT files.path AS path, bbox_x, bbox_y, bbox_w, bbox_h, embedding
            FROM faces
            JOIN files ON faces.file_id = files.id
            "#,
        )
        .fetch(&self.pool)
        .map(|row| -> Result<StoredFace> { Ok(StoredFace::try_from(row?)?) })
    }

    /// 某个文件当前的所有人脸
    pub async fn file_faces(&self, path: &str) -> Result<Vec<StoredFace>> {
        let rows = crud::get_faces_of_file(&self.pool, path).await?;
        let faces = rows.into_iter().map(StoredFace::try_from).collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(faces)
    }

    /// 删除不在 `current` 中的所有文件
    pub async fn remove_missing(&self, current: &HashSet<String>) -> Result<u64> {
        self.remove_where(|path| !current.contains(path)).await
    }

    /// 删除位于 `roots` 之下且不在 `current` 中的文件，其他位置的记录保持不变
    pub async fn remove_missing_under(&self, roots: &[PathBuf], current: &HashSet<String>) -> Result<u64> {
        self.remove_where(|path| {
            !current.contains(path) && roots.iter().any(|root| Path::new(path).starts_with(root))
        })
        .await
    }

    async fn remove_where(&self, pred: impl Fn(&str) -> bool) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut removed = 0;
        for path in crud::get_all_paths(&mut *tx).await? {
            if pred(&path) {
                debug!("移除已删除的文件: {}", path);
                removed += crud::delete_file(&mut *tx, &path).await?;
            }
        }
        // 删空后与 clear 一致，允许下一次写入采用新的模型和维度
        if removed > 0 && !crud::has_files(&mut *tx).await? {
            crud::set_model_version(&mut *tx, None).await?;
            crud::set_dimension(&mut *tx, None).await?;
        }

        tx.commit().await?;
        if removed > 0 {
            info!("已移除 {} 个不存在的文件", removed);
        }
        Ok(removed)
    }

    pub async fn model_version(&self) -> Result<Option<String>> {
        Ok(crud::get_metadata(&self.pool).await?.model_version)
    }

    /// 设置模型版本，索引非空时不允许修改为其他版本
    pub async fn set_model_version(&self, tag: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let meta = crud::get_metadata(&mut *tx).await?;
        if let Some(v) = meta.model_version {
            if v != tag && crud::has_files(&mut *tx).await? {
                return Err(FaceSearchError::VersionMismatch { store: v, oracle: tag.to_owned() });
            }
        }
        crud::set_model_version(&mut *tx, Some(tag)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// 检查模型版本是否与索引一致，空索引总是通过
    pub async fn check_model_version(&self, tag: &str) -> Result<()> {
        let meta = crud::get_metadata(&self.pool).await?;
        match meta.model_version {
            Some(v) if v != tag => {
                if crud::has_files(&self.pool).await? {
                    return Err(FaceSearchError::VersionMismatch { store: v, oracle: tag.to_owned() });
                }
                warn!("空索引的模型版本 {:?} 将被替换为 {:?}", v, tag);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// 索引中没有任何文件
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(!crud::has_files(&self.pool).await?)
    }

    pub async fn metadata(&self) -> Result<IndexMetadata> {
        Ok(crud::get_metadata(&self.pool).await?.into())
    }

    /// 记录一次完整扫描
    pub async fn mark_full_scan(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        crud::set_last_full_scan(&self.pool, unix_now()).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let meta = self.metadata().await?;
        Ok(IndexStats {
            total_files: crud::count_files(&self.pool).await? as u64,
            total_faces: crud::count_faces(&self.pool).await? as u64,
            model_version: meta.model_version,
            dimension: meta.dimension,
            last_full_scan: meta.last_full_scan,
        })
    }

    #[cfg(test)]
    pub(crate) async fn close_pool(&self) {
        self.pool.close().await;
    }

    /// 清空索引
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        crud::delete_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
