use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use media_fix::common::logger::{PrettyLogger, init_tracing};
use media_fix::common::process::ProcessPool;
use media_fix::downloader::{DownloadCore, MediaProcessor, QueueManager};
use media_fix::post_process::VideoCompressor;
use media_fix::services::{ServiceRegistry, YtDlpExtractor};
use media_fix::transport::ConsoleTransport;
use media_fix::{log_error, log_info, log_success, log_warning};

mod cli;

// 命令行参数为空时从标准输入读取
async fn collect_inputs(args: &cli::Cli) -> anyhow::Result<Vec<String>> {
    if !args.urls.is_empty() {
        return Ok(args.urls.clone());
    }
    log_info!("未提供链接，从标准输入读取（每行一个）...");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inputs = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            inputs.push(line.to_string());
        }
    }
    Ok(inputs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);
    debug!("命令行参数: {:?}", args);

    let inputs = collect_inputs(&args).await?;
    if inputs.is_empty() {
        log_warning!("没有需要处理的链接");
        return Ok(());
    }

    tokio::fs::create_dir_all(&args.output_dir).await?;
    info!("输出目录: {:?}", args.output_dir);

    // 外部进程池由这里创建，退出前显式关闭
    let pool = ProcessPool::new(args.max_processes);
    let ytdlp_path = std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string());
    let extractor = Arc::new(YtDlpExtractor::new(pool.clone(), ytdlp_path));
    let retriever = Arc::new(DownloadCore::new(
        extractor,
        pool.clone(),
        args.retrieval_config(),
    )?);
    let compressor = Arc::new(VideoCompressor::new(pool.clone(), args.compressor_config()));
    let transport = Arc::new(ConsoleTransport::new(args.output_dir.clone()));
    let processor = Arc::new(MediaProcessor::new(
        retriever,
        compressor,
        transport,
        args.ceiling_bytes(),
        args.reporter_config(),
    ));

    let queue = QueueManager::new(processor, args.queue_config());
    queue.start();

    let registry = ServiceRegistry::default();
    let mut submitted = 0;
    for input in &inputs {
        match registry.find(input) {
            Some((service, url)) => {
                debug!("{} 链接: {}", service.name(), url);
                queue.submit_request(url, args.requester.clone(), args.requester.clone());
                submitted += 1;
            }
            None => log_warning!("无法识别的链接，已跳过: {}", input),
        }
    }

    if submitted > 0 {
        tokio::select! {
            _ = queue.wait_idle() => {
                info!("所有任务已处理完毕");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("收到中断信号，正在退出...");
            }
        }
    }

    queue.shutdown().await;
    pool.shutdown().await;

    let stats = queue.stats();
    PrettyLogger::queue_summary(&stats);
    if stats.total_failed > 0 {
        log_error!("{} 个任务失败", stats.total_failed);
    } else if submitted > 0 {
        log_success!("全部完成！共处理 {} 个任务", stats.total_processed);
    }
    Ok(())
}
