use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::cli::search::OutputFormat;
use crate::config::Opts;
use crate::db::IndexStore;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = IndexStore::open(opts.conf_dir.database()).await?;
        let stats = store.stats().await?;
        store.close().await;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            OutputFormat::Table => {
                println!("文件数量: {}", stats.total_files);
                println!("人脸数量: {}", stats.total_faces);
                println!("模型版本: {}", stats.model_version.as_deref().unwrap_or("-"));
                match stats.dimension {
                    Some(dim) => println!("向量维度: {}", dim),
                    None => println!("向量维度: -"),
                }
                match stats.last_full_scan {
                    Some(ts) => println!("上次完整扫描: {}", ts),
                    None => println!("上次完整扫描: -"),
                }
            }
        }
        Ok(())
    }
}
