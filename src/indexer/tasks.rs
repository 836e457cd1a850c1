use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rayon::ThreadPool;
use regex::Regex;
use tokio::sync::mpsc::{Receiver, channel};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::types::*;
use super::Progress;
use crate::db::IndexStore;
use crate::error::Result;
use crate::fingerprint::{Fingerprint, FingerprintMode, fingerprint};
use crate::metrics;
use crate::oracle::{DetectedFace, EmbeddingOracle};
use crate::utils::{has_suffix, path_key};

/// 遍历所有目录，收集匹配后缀的图片
///
/// 先完整遍历再逐个发送，以便在开始处理前报告图片总数
pub fn task_scan(
    roots: Vec<PathBuf>,
    re_suf: Regex,
    cancel: CancellationToken,
    progress: Progress,
    counters: Arc<Counters>,
) -> (JoinHandle<ScanOutcome>, Receiver<Candidate>) {
    let (tx, rx) = channel(num_cpus::get() * 2);
    let t = spawn_blocking(move || {
        let mut outcome = ScanOutcome { complete: true, ..Default::default() };
        let mut entries = vec![];

        for root in roots {
            let root = match root.canonicalize() {
                Ok(root) if root.is_dir() => root,
                Ok(root) => {
                    warn!("不是目录，已跳过: {}", root.display());
                    outcome.complete = false;
                    continue;
                }
                Err(e) => {
                    warn!("无法访问目录 {}: {}", root.display(), e);
                    outcome.complete = false;
                    continue;
                }
            };
            info!("扫描目录: {}", root.display());

            // 根目录已经规范化，且不跟随目录的符号链接，因此得到的路径都是规范路径
            for entry in WalkDir::new(&root) {
                if cancel.is_cancelled() {
                    outcome.complete = false;
                    return outcome;
                }
                match entry {
                    Ok(entry) => {
                        if !is_image_file(&entry) || !has_suffix(entry.path(), &re_suf) {
                            continue;
                        }
                        let key = path_key(entry.path());
                        // 多个目录有重叠时只处理一次
                        if outcome.seen.insert(key.clone()) {
                            entries.push(Candidate { path: entry.into_path(), key });
                        }
                    }
                    Err(e) => {
                        warn!("遍历目录出错: {}", e);
                        outcome.complete = false;
                    }
                }
            }
            outcome.roots.push(root);
        }

        let total = entries.len() as u64;
        info!("扫描完成，共 {} 张图片", total);
        Counters::inc(&counters.scanned, total);
        progress(&IndexEvent::Scanned { total });

        for candidate in entries {
            if cancel.is_cancelled() {
                outcome.complete = false;
                break;
            }
            if tx.blocking_send(candidate).is_err() {
                break;
            }
        }
        outcome
    });
    (t, rx)
}

/// 普通文件，或指向文件的符号链接
///
/// 符号链接以链接自身的路径作为键，不展开到目标
fn is_image_file(entry: &walkdir::DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    if file_type.is_symlink() {
        if entry.path().is_file() {
            return true;
        }
        debug!("跳过不指向文件的符号链接: {}", entry.path().display());
    }
    false
}

/// 比较指纹，跳过没有变化的图片
pub fn task_filter(
    mut lrx: Receiver<Candidate>,
    store: Arc<IndexStore>,
    mode: FingerprintMode,
    force: bool,
    cancel: CancellationToken,
    progress: Progress,
    counters: Arc<Counters>,
) -> (JoinHandle<()>, Receiver<PendingImage>) {
    let (tx, rx) = channel(num_cpus::get() * 2);
    let t = tokio::spawn(async move {
        while let Some(Candidate { path, key }) = lrx.recv().await {
            if cancel.is_cancelled() {
                break;
            }

            let fp = match spawn_blocking({
                let path = path.clone();
                move || fingerprint(path, mode)
            })
            .await
            {
                Ok(Ok(fp)) => Some(fp),
                Ok(Err(e)) => {
                    warn!("读取文件信息失败，将重新处理: {}: {}", key, e);
                    None
                }
                Err(e) => {
                    warn!("读取文件信息失败，将重新处理: {}: {}", key, e);
                    None
                }
            };

            if let (false, Some(fp)) = (force, &fp) {
                match store.get_fingerprint(&key).await {
                    Ok(Some(old)) if &old == fp => {
                        debug!("跳过未变化的图片: {}", key);
                        Counters::inc(&counters.skipped, 1);
                        metrics::inc_indexed_files("skipped");
                        progress(&IndexEvent::Skipped { path: key });
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("查询指纹失败，将重新处理: {}: {}", key, e),
                }
            }

            if tx.send(PendingImage { path, key, fingerprint: fp }).await.is_err() {
                break;
            }
        }
    });
    (t, rx)
}

/// 在线程池中调用提取器计算人脸特征
pub fn task_extract(
    mut lrx: Receiver<PendingImage>,
    oracle: Arc<dyn EmbeddingOracle>,
    pool: ThreadPool,
    cancel: CancellationToken,
) -> (JoinHandle<()>, Receiver<Extracted>) {
    let (tx, rx) = channel(num_cpus::get() * 2);
    let t = spawn_blocking(move || {
        let batch = pool.current_num_threads() * 4;
        let mut buffer = Vec::with_capacity(batch);
        let tx = &tx;
        let oracle = &oracle;
        let cancel = &cancel;
        // NOTE: 一次最多读取 workers * 4 张图片，处理完后再读取下一批，避免占用过多内存
        while lrx.blocking_recv_many(&mut buffer, batch) != 0 {
            if cancel.is_cancelled() {
                break;
            }
            pool.scope(|s| {
                for image in buffer.drain(..) {
                    s.spawn(move |_| {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let result = match oracle.extract_faces(&image.path) {
                            Ok(faces) => {
                                Extracted::Faces { key: image.key, fingerprint: image.fingerprint, faces }
                            }
                            Err(e) => Extracted::Failed { key: image.key, reason: e.to_string() },
                        };
                        // 下游已经退出时直接丢弃
                        let _ = tx.blocking_send(result);
                    });
                }
            });
        }
    });
    (t, rx)
}

/// 唯一的写入任务，逐个将结果写入索引
///
/// 遇到模型版本不一致等致命错误时取消整个流程并返回错误
#[allow(clippy::too_many_arguments)]
pub fn task_write(
    mut lrx: Receiver<Extracted>,
    store: Arc<IndexStore>,
    model_version: String,
    retries: u32,
    backoff: Duration,
    cancel: CancellationToken,
    progress: Progress,
    counters: Arc<Counters>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = lrx.recv() => msg,
            };
            let Some(msg) = msg else { break };

            let (key, fingerprint, faces) = match msg {
                Extracted::Faces { key, fingerprint, faces } => (key, fingerprint, faces),
                Extracted::Failed { key, reason } => {
                    warn!("处理图片失败: {}: {}", key, reason);
                    Counters::inc(&counters.failed, 1);
                    metrics::inc_indexed_files("failed");
                    progress(&IndexEvent::Failed { path: key, reason });
                    continue;
                }
            };

            let res =
                write_with_retry(&store, &key, fingerprint.as_ref(), &faces, &model_version, retries, backoff)
                    .await;
            match res {
                Ok(()) => {
                    debug!("已索引 {}，共 {} 张人脸", key, faces.len());
                    Counters::inc(&counters.indexed, 1);
                    Counters::inc(&counters.faces, faces.len() as u64);
                    metrics::inc_indexed_files("indexed");
                    progress(&IndexEvent::Indexed { path: key, faces: faces.len() as u64 });
                }
                Err(e) if e.is_fatal() => {
                    error!("索引终止: {}", e);
                    cancel.cancel();
                    return Err(e);
                }
                Err(e) => {
                    warn!("写入索引失败: {}: {}", key, e);
                    Counters::inc(&counters.failed, 1);
                    metrics::inc_indexed_files("failed");
                    progress(&IndexEvent::Failed { path: key, reason: e.to_string() });
                }
            }
        }
        Ok(())
    })
}

async fn write_with_retry(
    store: &IndexStore,
    key: &str,
    fingerprint: Option<&Fingerprint>,
    faces: &[DetectedFace],
    model_version: &str,
    retries: u32,
    backoff: Duration,
) -> Result<()> {
    retry(key, retries, backoff, || store.replace_file(key, fingerprint, faces, model_version)).await
}

/// 只重试存储不可用的错误，第 n 次重试前等待 `backoff * n`
async fn retry<F, Fut>(key: &str, retries: u32, backoff: Duration, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!("写入失败，第 {} 次重试: {}: {}", attempt, key, e);
                tokio::time::sleep(backoff * attempt).await;
            }
            res => return res,
        }
    }
}
