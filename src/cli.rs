use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use media_fix::downloader::{QueueConfig, ReporterConfig, RetrievalConfig};
use media_fix::post_process::{CompressorConfig, ceiling_from_mb};

/// 视频下载、压缩与投递工具
#[derive(Parser, Debug)]
#[command(name = "mfix")]
#[command(version = "1.0")]
#[command(author = "rpeng252@gmail.com")]
#[command(about = "下载视频，超出大小上限时自动压缩，然后保存到输出目录", long_about = None)]
pub struct Cli {
    /// 视频链接，不提供时从标准输入逐行读取
    #[arg(value_name = "URL")]
    #[arg(value_hint = clap::ValueHint::Url)]
    pub urls: Vec<String>,

    /// 视频保存目录
    #[arg(long, value_name = "DIR")]
    #[arg(default_value = "./downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// 请求者名称（显示在投递说明里）
    #[arg(long, default_value = "cli")]
    pub requester: String,

    #[arg(long, value_name = "worker 数量", default_value_t = 2)]
    pub workers: usize,

    #[arg(long, value_name = "同时执行的任务数", default_value_t = 2)]
    pub max_concurrent: usize,

    /// 输出文件大小上限 (MB)
    #[arg(long, default_value_t = 49.5)]
    pub ceiling_mb: f64,

    /// 状态消息的最小刷新间隔 (秒)
    #[arg(long, default_value_t = 2.5)]
    pub throttle_secs: f64,

    /// 进度轮询间隔 (毫秒)
    #[arg(long, default_value_t = 500)]
    pub poll_ms: u64,

    /// 直链下载无数据的超时时间 (秒)
    #[arg(long, default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// 同时运行的外部进程数
    #[arg(long, default_value_t = 2)]
    pub max_processes: usize,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn ceiling_bytes(&self) -> u64 {
        ceiling_from_mb(self.ceiling_mb)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            max_concurrent: self.max_concurrent,
            ..QueueConfig::default()
        }
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            ceiling_bytes: self.ceiling_bytes(),
            read_timeout: Duration::from_secs(self.read_timeout_secs.max(1)),
            ..RetrievalConfig::default()
        }
    }

    pub fn compressor_config(&self) -> CompressorConfig {
        CompressorConfig::default()
    }

    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            poll_interval: Duration::from_millis(self.poll_ms.max(1)),
            throttle: Duration::from_secs_f64(self.throttle_secs.max(0.0)),
        }
    }
}
