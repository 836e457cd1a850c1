use sqlx::{Executor, Result, Sqlite, SqliteConnection};

use super::{FaceRow, FileRecord, MetadataRecord};
use crate::fingerprint::Fingerprint;
use crate::oracle::DetectedFace;

/// 读取元数据
pub async fn get_metadata<'c, E>(executor: E) -> Result<MetadataRecord>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, MetadataRecord>(
        r#"
        SELECT model_version, dimension, schema_version, last_full_scan
        FROM metadata WHERE id = 0
        "#,
    )
    .fetch_one(executor)
    .await
}

/// 设置模型版本
pub async fn set_model_version<'c, E>(executor: E, model_version: Option<&str>) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE metadata SET model_version = ? WHERE id = 0")
        .bind(model_version)
        .execute(executor)
        .await?;
    Ok(())
}

/// 设置特征向量维度
pub async fn set_dimension<'c, E>(executor: E, dimension: Option<i64>) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE metadata SET dimension = ? WHERE id = 0")
        .bind(dimension)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_last_full_scan<'c, E>(executor: E, timestamp: i64) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE metadata SET last_full_scan = ? WHERE id = 0")
        .bind(timestamp)
        .execute(executor)
        .await?;
    Ok(())
}

/// 根据路径查找文件记录
pub async fn get_file<'c, E>(executor: E, path: &str) -> Result<Option<FileRecord>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, FileRecord>(
        r#"
        SELECT id, path, size, mtime, hash, last_indexed FROM files WHERE path = ?
        "#,
    )
    .bind(path)
    .fetch_optional(executor)
    .await
}

/// 插入或更新文件记录，返回文件 ID
pub async fn upsert_file<'c, E>(
    executor: E,
    path: &str,
    fingerprint: Option<&Fingerprint>,
    last_indexed: i64,
) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let size = fingerprint.map(|fp| fp.size as i64);
    let mtime = fingerprint.map(|fp| fp.mtime_ns);
    let hash = fingerprint.and_then(|fp| fp.hash).map(|h| h.to_vec());
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO files (path, size, mtime, hash, last_indexed)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (path) DO UPDATE SET
            size = excluded.size,
            mtime = excluded.mtime,
            hash = excluded.hash,
            last_indexed = excluded.last_indexed
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(size)
    .bind(mtime)
    .bind(hash)
    .bind(last_indexed)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 删除文件的所有人脸
pub async fn delete_faces<'c, E>(executor: E, file_id: i64) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM faces WHERE file_id = ?")
        .bind(file_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// 添加一张人脸
pub async fn add_face<'c, E>(executor: E, file_id: i64, face: &DetectedFace) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO faces (file_id, bbox_x, bbox_y, bbox_w, bbox_h, embedding)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(file_id)
    .bind(face.bbox.x as i64)
    .bind(face.bbox.y as i64)
    .bind(face.bbox.w as i64)
    .bind(face.bbox.h as i64)
    .bind(face.embedding.to_blob())
    .execute(executor)
    .await?;

    Ok(())
}

/// 删除文件及其人脸
pub async fn delete_file<'c, E>(executor: E, path: &str) -> Result<u64>
where
    E: Executor<'c, Database = Sqlite>,
{
    // faces 通过外键级联删除
    let result = sqlx::query("DELETE FROM files WHERE path = ?").bind(path).execute(executor).await?;
    Ok(result.rows_affected())
}

/// 获取所有文件路径
pub async fn get_all_paths<'c, E>(executor: E) -> Result<Vec<String>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT path FROM files ORDER BY path").fetch_all(executor).await?;
    Ok(rows.into_iter().map(|(path,)| path).collect())
}

/// 获取某个文件的所有人脸
pub async fn get_faces_of_file<'c, E>(executor: E, path: &str) -> Result<Vec<FaceRow>>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_as::<_, FaceRow>(
        r#"
        SELECT files.path AS path, bbox_x, bbox_y, bbox_w, bbox_h, embedding
        FROM faces
        JOIN files ON faces.file_id = files.id
        WHERE files.path = ?
        ORDER BY faces.id ASC
        "#,
    )
    .bind(path)
    .fetch_all(executor)
    .await
}

/// 是否存在任何文件记录
pub async fn has_files<'c, E>(executor: E) -> Result<bool>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM files)").fetch_one(executor).await?;
    Ok(exists)
}

pub async fn count_files<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files").fetch_one(executor).await?;
    Ok(count)
}

pub async fn count_faces<'c, E>(executor: E) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM faces").fetch_one(executor).await?;
    Ok(count)
}

/// 清空所有文件和人脸，并重置模型版本
pub async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM faces").execute(&mut *conn).await?;
    sqlx::query("DELETE FROM files").execute(&mut *conn).await?;
    sqlx::query(
        "UPDATE metadata SET model_version = NULL, dimension = NULL, last_full_scan = NULL WHERE id = 0",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}
