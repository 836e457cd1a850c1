use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::cli::SubCommandExtend;
use crate::config::{IndexOptions, OracleOptions, Opts};
use crate::db::IndexStore;
use crate::indexer::{IncrementalIndexer, IndexEvent};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    #[command(flatten)]
    pub index: IndexOptions,
    /// 需要索引的图片目录，可以指定多个
    #[arg(required = true)]
    pub directories: Vec<PathBuf>,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = Arc::new(IndexStore::open(opts.conf_dir.database()).await?);
        let indexer = IncrementalIndexer::new(store.clone(), self.oracle.build(), (&self.index).into());

        let pb = ProgressBar::no_length().with_style(pb_style());
        let cancel = CancellationToken::new();

        // Ctrl-C 时停止索引，已写入的文件保留
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("收到中断信号，正在停止索引");
                    cancel.cancel();
                }
            }
        });

        let progress = {
            let pb = pb.clone();
            move |event: &IndexEvent| match event {
                IndexEvent::Scanned { total } => pb.set_length(*total),
                IndexEvent::Skipped { path } => {
                    pb.set_message(format!("跳过未变化的图片: {}", path));
                    pb.inc(1);
                }
                IndexEvent::Indexed { path, faces } => {
                    pb.set_message(format!("{} 张人脸: {}", faces, path));
                    pb.inc(1);
                }
                IndexEvent::Failed { path, reason } => {
                    pb.println(format!("处理失败: {}: {}", path, reason));
                    pb.inc(1);
                }
                IndexEvent::Pruned { count } => pb.println(format!("已移除 {} 个不存在的文件", count)),
            }
        };

        let stats = indexer.start_indexing(&self.directories, progress, cancel).await;
        match &stats {
            Ok(stats) if stats.cancelled => pb.abandon_with_message("索引已取消"),
            Ok(_) => pb.finish_with_message("索引完成"),
            Err(_) => pb.abandon_with_message("索引失败"),
        }
        let stats = stats?;

        println!("扫描: {}", stats.files_scanned);
        println!("新增/更新: {}", stats.files_indexed);
        println!("跳过: {}", stats.files_skipped);
        println!("失败: {}", stats.files_failed);
        println!("人脸: {}", stats.faces_stored);
        println!("移除: {}", stats.files_pruned);

        drop(indexer);
        if let Some(store) = Arc::into_inner(store) {
            store.close().await;
        }
        info!("索引结束");
        Ok(())
    }
}
