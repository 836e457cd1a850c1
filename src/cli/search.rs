use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::{OracleOptions, Opts, SearchOptions};
use crate::db::IndexStore;
use crate::searcher::{SearchEngine, SearchMatch};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 参考图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = Arc::new(IndexStore::open(opts.conf_dir.database()).await?);
        let engine = SearchEngine::new(store, self.oracle.build(), (&self.search).into());

        let result = engine.search(&self.image, None).await?;

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchMatch], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for m in result {
                println!("{:.4}\t{}", m.distance, m.path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
