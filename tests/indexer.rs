mod common;

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::*;
use facesearch::error::FaceSearchError;
use facesearch::{IncrementalIndexer, IndexEvent, IndexerConfig, PrunePolicy, SearchConfig, SearchEngine};
use rstest::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn indexer(store: &Arc<facesearch::IndexStore>, config: IndexerConfig) -> IncrementalIndexer {
    IncrementalIndexer::new(store.clone(), JsonFileOracle::new(MODEL_V1), config)
}

/// 收集所有进度事件
fn recorder() -> (Arc<Mutex<Vec<IndexEvent>>>, impl Fn(&IndexEvent) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(vec![]));
    let sink = events.clone();
    (events, move |e: &IndexEvent| sink.lock().unwrap().push(e.clone()))
}

#[rstest]
#[tokio::test]
async fn test_index_then_reindex_is_noop(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1), face(0.2)]);
    write_image(&photos, "b.png", &[face(0.3)]);
    write_image(&photos, "sub/c.JPG", &[]);
    write_image(&photos, "notes.txt", &[face(0.4)]);

    let store = open_store(temp_dir.path()).await;
    let indexer = indexer(&store, indexer_config());

    let (events, progress) = recorder();
    let stats = indexer.start_indexing(&[photos.clone()], progress, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.files_scanned, 3);
    assert_eq!(stats.files_indexed, 3);
    assert_eq!(stats.files_skipped, 0);
    assert_eq!(stats.faces_stored, 3);
    assert!(!stats.cancelled);

    let events = events.lock().unwrap();
    assert_eq!(events[0], IndexEvent::Scanned { total: 3 });
    assert_eq!(events.iter().filter(|e| matches!(e, IndexEvent::Indexed { .. })).count(), 3);
    drop(events);

    let store_stats = store.stats().await.unwrap();
    assert_eq!(store_stats.total_files, 3);
    assert_eq!(store_stats.total_faces, 3);
    assert!(store_stats.last_full_scan.is_some());

    let (_, progress) = recorder();
    let stats = indexer.start_indexing(&[photos], progress, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.files_skipped, 3);
    let again = store.stats().await.unwrap();
    assert_eq!(again.total_files, store_stats.total_files);
    assert_eq!(again.total_faces, store_stats.total_faces);
}

#[rstest]
#[tokio::test]
async fn test_changed_file_is_replaced(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    let a = write_image(&photos, "a.jpg", &[face(0.1), face(0.2)]);
    write_image(&photos, "b.jpg", &[face(0.3)]);

    let store = open_store(temp_dir.path()).await;
    let indexer = indexer(&store, indexer_config());
    indexer.start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new()).await.unwrap();

    write_image(&photos, "a.jpg", &[face(0.9)]);
    touch_later(&a);

    let stats = indexer.start_indexing(&[photos], |_: &IndexEvent| {}, CancellationToken::new()).await.unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.files_skipped, 1);

    let faces = store.file_faces(&key(&a)).await.unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].embedding, embedding(0.9));
    assert_eq!(store.stats().await.unwrap().total_faces, 2);
}

#[rstest]
#[tokio::test]
async fn test_force_reprocesses_everything(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1)]);
    write_image(&photos, "b.jpg", &[face(0.2)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();

    let config = IndexerConfig { force: true, ..indexer_config() };
    let stats = indexer(&store, config)
        .start_indexing(&[photos], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 2);
    assert_eq!(stats.files_skipped, 0);
    assert_eq!(store.stats().await.unwrap().total_faces, 2);
}

#[rstest]
#[tokio::test]
async fn test_unreadable_file_does_not_stop_run(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1)]);
    fs::write(photos.join("broken.jpg"), b"\xff\xd8\xff garbage").unwrap();
    write_image(&photos, "c.jpg", &[face(0.3)]);

    let store = open_store(temp_dir.path()).await;
    let (events, progress) = recorder();
    let stats = indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], progress, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.files_indexed, 2);
    assert_eq!(stats.files_failed, 1);
    let broken = key(&photos.join("broken.jpg"));
    assert!(events.lock().unwrap().iter().any(|e| matches!(e, IndexEvent::Failed { path, .. } if *path == broken)));
    assert_eq!(store.stats().await.unwrap().total_files, 2);
}

#[rstest]
#[tokio::test]
async fn test_dimension_mismatch_fails_single_file(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();

    let mut wide = face(0.2);
    wide.embedding = vec![0.2; DIM * 2].into();
    write_image(&photos, "b.jpg", &[wide]);
    write_image(&photos, "c.jpg", &[face(0.3)]);

    let stats = indexer(&store, indexer_config())
        .start_indexing(&[photos], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(store.metadata().await.unwrap().dimension, Some(DIM));
}

#[rstest]
#[tokio::test]
async fn test_model_version_change_is_fatal(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();

    let indexer = IncrementalIndexer::new(store.clone(), JsonFileOracle::new(MODEL_V2), indexer_config());
    let err = indexer.start_indexing(&[photos], |_: &IndexEvent| {}, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, FaceSearchError::VersionMismatch { .. }));
    assert!(err.to_string().contains(MODEL_V1));
    assert!(err.to_string().contains(MODEL_V2));
}

#[rstest]
#[case::keep(PrunePolicy::Keep, 4)]
#[case::scanned(PrunePolicy::Scanned, 3)]
#[case::all(PrunePolicy::All, 1)]
#[tokio::test]
async fn test_prune_policy(temp_dir: TempDir, #[case] prune: PrunePolicy, #[case] remaining: u64) {
    let family = temp_dir.path().join("family");
    let work = temp_dir.path().join("work");
    let gone = write_image(&family, "gone.jpg", &[face(0.1)]);
    write_image(&family, "kept.jpg", &[face(0.2)]);
    write_image(&work, "w1.jpg", &[face(0.3)]);
    write_image(&work, "w2.jpg", &[face(0.4)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[family.clone(), work], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    let gone_key = key(&gone);
    fs::remove_file(&gone).unwrap();

    // 只重新扫描 family
    let config = IndexerConfig { prune, ..indexer_config() };
    let stats = indexer(&store, config)
        .start_indexing(&[family], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_pruned, 4 - remaining);
    assert_eq!(store.stats().await.unwrap().total_files, remaining);

    let engine = SearchEngine::new(store.clone(), JsonFileOracle::new(MODEL_V1), SearchConfig::default());
    let reference = write_image(temp_dir.path(), "reference.jpg", &[face(0.1)]);
    let matches = engine.search(&reference, Some(10.0)).await.unwrap();
    let found = matches.iter().any(|m| m.path == gone_key);
    assert_eq!(found, prune == PrunePolicy::Keep);
}

#[rstest]
#[tokio::test]
async fn test_missing_root_skips_prune(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    let gone = write_image(&photos, "gone.jpg", &[face(0.1)]);
    write_image(&photos, "kept.jpg", &[face(0.2)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    fs::remove_file(&gone).unwrap();

    // 其中一个目录不存在，扫描不完整，不能清理
    let config = IndexerConfig { prune: PrunePolicy::All, ..indexer_config() };
    let stats = indexer(&store, config)
        .start_indexing(&[photos, temp_dir.path().join("nope")], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_pruned, 0);
    assert_eq!(store.stats().await.unwrap().total_files, 2);
}

#[rstest]
#[tokio::test]
async fn test_cancel_keeps_committed_files(temp_dir: TempDir) {
    let photos = temp_dir.path().join("photos");
    let gone = write_image(&photos, "gone.jpg", &[face(0.1)]);

    let store = open_store(temp_dir.path()).await;
    indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], |_: &IndexEvent| {}, CancellationToken::new())
        .await
        .unwrap();
    let gone_key = key(&gone);
    fs::remove_file(&gone).unwrap();

    for i in 0..20 {
        write_image(&photos, &format!("{i:02}.jpg"), &[face(i as f32)]);
    }

    // 第一个文件写入后立即取消
    let cancel = CancellationToken::new();
    let progress = {
        let cancel = cancel.clone();
        move |e: &IndexEvent| {
            if matches!(e, IndexEvent::Indexed { .. }) {
                cancel.cancel();
            }
        }
    };
    let config = IndexerConfig { workers: 1, prune: PrunePolicy::All, ..Default::default() };
    let indexer = IncrementalIndexer::new(
        store.clone(),
        JsonFileOracle::slow(MODEL_V1, Duration::from_millis(20)),
        config,
    );
    let stats = indexer.start_indexing(&[photos], progress, cancel).await.unwrap();

    assert!(stats.cancelled);
    assert!(stats.files_indexed >= 1);
    assert!(stats.files_indexed < 20);
    assert_eq!(stats.files_pruned, 0);

    // 已删除的文件没有被清理，已写入的文件完整可查
    let store_stats = store.stats().await.unwrap();
    assert_eq!(store_stats.total_files, 1 + stats.files_indexed);
    assert_eq!(store_stats.total_faces, store_stats.total_files);
    assert_eq!(store.file_faces(&gone_key).await.unwrap().len(), 1);
}

#[cfg(unix)]
#[rstest]
#[tokio::test]
async fn test_symlinked_images_are_indexed(temp_dir: TempDir) {
    use std::os::unix::fs::symlink;

    let photos = temp_dir.path().join("photos");
    write_image(&photos, "a.jpg", &[face(0.1)]);
    let outside = write_image(&temp_dir.path().join("elsewhere"), "b.jpg", &[face(0.2)]);
    symlink(&outside, photos.join("link.jpg")).unwrap();
    symlink(temp_dir.path().join("gone.jpg"), photos.join("dangling.jpg")).unwrap();

    let store = open_store(temp_dir.path()).await;
    let (_, progress) = recorder();
    let stats = indexer(&store, indexer_config())
        .start_indexing(&[photos.clone()], progress, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.files_scanned, 2);
    assert_eq!(stats.files_indexed, 2);

    // 以链接自身的路径记录
    let link = format!("{}/link.jpg", key(&photos));
    assert_eq!(store.file_faces(&link).await.unwrap().len(), 1);
    assert!(store.file_faces(&key(&outside)).await.unwrap().is_empty());
}
