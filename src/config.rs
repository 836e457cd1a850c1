use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::fingerprint::FingerprintMode;
use crate::oracle::{CommandOracle, EmbeddingOracle};

/// 默认匹配阈值，越小越严格
pub const DEFAULT_TOLERANCE: f32 = 0.6;
/// 默认扫描的图片后缀
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png,gif,bmp";
/// 默认模型版本
pub const DEFAULT_MODEL_VERSION: &str = "dlib_face_recognition_resnet_model_v1";

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "facesearch", "facesearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().expect("config dir is not valid UTF-8")
}

#[derive(Parser, Debug, Clone)]
pub struct OracleOptions {
    /// 人脸特征提取程序，以图片路径为最后一个参数调用，从标准输出读取 JSON
    #[arg(long, value_name = "PROGRAM")]
    pub oracle_cmd: PathBuf,
    /// 传递给提取程序的额外参数，可以多次指定
    #[arg(long = "oracle-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub oracle_args: Vec<String>,
    /// 提取模型的版本标识，不同版本的特征向量不可比较
    #[arg(long, value_name = "TAG", default_value = DEFAULT_MODEL_VERSION)]
    pub model_version: String,
}

impl OracleOptions {
    pub fn build(&self) -> Arc<dyn EmbeddingOracle> {
        Arc::new(CommandOracle::new(&self.oracle_cmd, self.oracle_args.clone(), &self.model_version))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct IndexOptions {
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 并行提取特征的线程数量，默认为 CPU 核心数
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,
    /// 忽略指纹，重新处理所有图片
    #[arg(long)]
    pub force: bool,
    /// 扫描完成后如何处理已经从磁盘上删除的文件
    #[arg(long, value_enum, default_value_t = PrunePolicy::Keep)]
    pub prune: PrunePolicy,
    /// 判断文件是否变化的方式
    #[arg(long, value_enum, default_value_t = FingerprintMode::Metadata)]
    pub fingerprint: FingerprintMode,
    /// 数据库写入失败时的重试次数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retries: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 两张人脸被视为同一个人的最大距离，越小越严格
    #[arg(short, long, value_name = "DISTANCE", default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f32,
    /// 显示的结果数量，默认显示全部
    #[arg(long, value_name = "COUNT")]
    pub count: Option<usize>,
    /// 搜索超时时间，单位为秒
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "facesearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// facesearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录，将图片中的人脸添加到索引
    Index(IndexCommand),
    /// 搜索包含参考图片中人物的照片
    Search(SearchCommand),
    /// 显示索引统计信息
    Stats(StatsCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("faces.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

/// 已删除文件的处理策略
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrunePolicy {
    /// 保留索引中的旧记录
    #[default]
    Keep,
    /// 删除扫描目录下已不存在的文件
    Scanned,
    /// 删除所有本次扫描中没有出现的文件
    All,
}

/// 索引配置
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// 逗号分隔的图片后缀
    pub suffix: String,
    /// 特征提取线程数
    pub workers: usize,
    pub force: bool,
    pub prune: PrunePolicy,
    pub fingerprint: FingerprintMode,
    /// 单个文件写入失败后的最大重试次数
    pub store_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_owned(),
            workers: num_cpus::get(),
            force: false,
            prune: PrunePolicy::Keep,
            fingerprint: FingerprintMode::Metadata,
            store_retries: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

impl From<&IndexOptions> for IndexerConfig {
    fn from(opts: &IndexOptions) -> Self {
        Self {
            suffix: opts.suffix.clone(),
            workers: opts.workers.unwrap_or_else(num_cpus::get).max(1),
            force: opts.force,
            prune: opts.prune,
            fingerprint: opts.fingerprint,
            store_retries: opts.retries,
            ..Default::default()
        }
    }
}

/// 搜索配置
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub tolerance: f32,
    /// 最多返回的结果数量
    pub limit: Option<usize>,
    pub timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { tolerance: DEFAULT_TOLERANCE, limit: None, timeout: None }
    }
}

impl From<&SearchOptions> for SearchConfig {
    fn from(opts: &SearchOptions) -> Self {
        Self {
            tolerance: opts.tolerance,
            limit: opts.count,
            timeout: opts.timeout.map(Duration::from_secs),
        }
    }
}
