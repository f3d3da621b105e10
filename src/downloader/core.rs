use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::RetrievalError;
use super::models::RetrievalResult;
use super::progress::{ProgressStage, ProgressTracker, ProgressUpdate};
use super::remux::{EXTRACTION_SHARE, SegmentRemuxer, remove_partial};
use super::retry::RetryPolicy;
use crate::common::process::ProcessPool;
use crate::common::utils::{format_eta, format_speed, sanitize_filename};
use crate::post_process::DEFAULT_CEILING_BYTES;
use crate::services::{ExtractError, ExtractErrorKind, ExtractedMedia, Extractor};

pub const PRIMARY_USER_AGENT: &str = "TwitterBot/1.0";
pub const FALLBACK_USER_AGENTS: [&str; 2] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub ceiling_bytes: u64,
    // 主身份在前，其余依次作为后备
    pub user_agents: Vec<String>,
    pub min_artifact_bytes: u64,
    pub remux_timeout: Duration,
    pub connect_timeout: Duration,
    // 直链下载时等待响应头或下一块数据的最长时间
    pub read_timeout: Duration,
    pub referer: Option<String>,
    pub ffmpeg_path: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let mut user_agents = vec![PRIMARY_USER_AGENT.to_string()];
        user_agents.extend(FALLBACK_USER_AGENTS.iter().map(|ua| ua.to_string()));
        Self {
            ceiling_bytes: DEFAULT_CEILING_BYTES,
            user_agents,
            min_artifact_bytes: 10_000,
            remux_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            referer: Some("https://twitter.com/".to_string()),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }
}

/// 获取阶段的抽象，流水线只依赖这个接口
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        url: &str,
        tracker: &ProgressTracker,
    ) -> Result<RetrievalResult, RetrievalError>;
}

/// 获取编排：解析 -> 直链下载 -> 回退到分段流转封装，
/// 每个客户端身份完整走一遍，直到成功或遇到终止性错误。
pub struct DownloadCore {
    extractor: Arc<dyn Extractor>,
    remuxer: SegmentRemuxer,
    client: reqwest::Client,
    config: RetrievalConfig,
}

impl DownloadCore {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        pool: ProcessPool,
        config: RetrievalConfig,
    ) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        let remuxer = SegmentRemuxer::new(pool, config.ffmpeg_path.clone(), config.remux_timeout)
            .with_referer(config.referer.clone());
        Ok(Self {
            extractor,
            remuxer,
            client,
            config,
        })
    }

    // 单个身份的一次完整尝试
    async fn attempt(
        &self,
        url: &str,
        user_agent: &str,
        attempt: usize,
        dir: &Path,
        tracker: &ProgressTracker,
    ) -> Result<RetrievalResult, RetrievalError> {
        debug!("第 {} 次尝试, UA: {}", attempt, user_agent);
        tracker.update(
            ProgressUpdate::new()
                .stage(ProgressStage::Downloading)
                .progress(5.0)
                .speed("正在解析...")
                .eta(""),
        );

        let media = self
            .extractor
            .extract(url, user_agent)
            .await
            .map_err(classify_extract_error)?;
        if !media.has_streams() {
            return Err(RetrievalError::NoStreams);
        }

        let file_name = format!("{}.mp4", sanitize_filename(&media.title, &media.id));
        let output_path = dir.join(&file_name);
        tracker.update(
            ProgressUpdate::new()
                .progress(EXTRACTION_SHARE)
                .filename(file_name),
        );

        if let Err(e) = self.fetch_streams(&media, &output_path, user_agent, tracker).await {
            remove_partial(&output_path).await;
            return Err(e);
        }

        let file_size = match validate_artifact(&output_path, self.config.min_artifact_bytes).await
        {
            Ok(size) => size,
            Err(e) => {
                remove_partial(&output_path).await;
                return Err(e);
            }
        };

        tracker.update(
            ProgressUpdate::new()
                .stage(ProgressStage::Processing)
                .progress(100.0),
        );
        info!("✅ 获取完成: {:?} ({} 字节)", output_path, file_size);

        Ok(RetrievalResult::new(
            output_path,
            file_size,
            media.title,
            media.duration,
            self.config.ceiling_bytes,
            None,
        ))
    }

    // 优先直链，失败后回退到分段流
    async fn fetch_streams(
        &self,
        media: &ExtractedMedia,
        output_path: &Path,
        user_agent: &str,
        tracker: &ProgressTracker,
    ) -> Result<(), RetrievalError> {
        let mut direct_error = None;
        if let Some(direct_url) = &media.direct_url {
            info!("尝试直链下载...");
            match self
                .transfer_direct(direct_url, output_path, user_agent, tracker)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("直链下载失败: {}，回退到分段流", e);
                    remove_partial(output_path).await;
                    direct_error = Some(e);
                }
            }
        }

        match &media.manifest_url {
            Some(manifest_url) => {
                info!("下载分段流...");
                self.remuxer
                    .remux(manifest_url, output_path, user_agent, media.duration, tracker)
                    .await
            }
            None => Err(direct_error.unwrap_or(RetrievalError::NoStreams)),
        }
    }

    async fn transfer_direct(
        &self,
        url: &str,
        output_path: &Path,
        user_agent: &str,
        tracker: &ProgressTracker,
    ) -> Result<(), RetrievalError> {
        let read_timeout = self.config.read_timeout;
        let request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send();
        let response = tokio::time::timeout(read_timeout, request)
            .await
            .map_err(|_| stalled(read_timeout, 0))??;
        check_response_status(&response, url)?;

        let total_size = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(output_path).await?;
        let mut stream = response.bytes_stream();

        let started = Instant::now();
        let mut downloaded = 0u64;
        loop {
            let next = tokio::time::timeout(read_timeout, stream.next())
                .await
                .map_err(|_| stalled(read_timeout, downloaded))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                downloaded as f64 / elapsed
            } else {
                0.0
            };
            let mut update = ProgressUpdate::new()
                .stage(ProgressStage::Downloading)
                .speed(format_speed(rate));
            if total_size > 0 {
                let fraction = downloaded as f64 / total_size as f64;
                update = update.progress(EXTRACTION_SHARE + fraction * (100.0 - EXTRACTION_SHARE));
                if rate > 0.0 {
                    let remaining = total_size.saturating_sub(downloaded) as f64;
                    update = update.eta(format_eta(remaining / rate));
                }
            }
            tracker.update(update);
        }
        file.flush().await?;

        if total_size > 0 && downloaded < total_size {
            return Err(RetrievalError::Transfer(format!(
                "连接提前关闭: {}/{} 字节",
                downloaded, total_size
            )));
        }
        debug!("直链下载完成: {} 字节", downloaded);
        Ok(())
    }
}

#[async_trait]
impl Retriever for DownloadCore {
    async fn retrieve(
        &self,
        url: &str,
        tracker: &ProgressTracker,
    ) -> Result<RetrievalResult, RetrievalError> {
        let policy = RetryPolicy::from_candidates(self.config.user_agents.iter().cloned())
            .ok_or(RetrievalError::NoIdentities)?;

        // 临时目录随结果一起交给调用方，失败时在这里随 drop 删除
        let temp_dir = tempfile::Builder::new().prefix("mfix_dl_").tempdir()?;
        let dir: PathBuf = temp_dir.path().to_path_buf();

        let outcome = policy
            .run(
                |user_agent, attempt| {
                    let dir = dir.clone();
                    async move {
                        self.attempt(url, &user_agent, attempt, &dir, tracker)
                            .await
                    }
                },
                RetrievalError::is_terminal,
            )
            .await;

        match outcome {
            Ok(outcome) => {
                debug!(
                    "第 {}/{} 个身份获取成功",
                    outcome.attempts,
                    policy.candidate_count()
                );
                let mut result = outcome.result;
                result.temp_dir = Some(temp_dir);
                Ok(result)
            }
            Err(failure) => {
                warn!(
                    "❌ 获取失败，共尝试 {} 次: {}",
                    failure.attempts, failure.error
                );
                tracker.set_error(failure.error.to_string());
                Err(failure.error)
            }
        }
    }
}

fn stalled(timeout: Duration, downloaded: u64) -> RetrievalError {
    warn!("⏱ 直链 {} 秒内没有数据，已下载 {} 字节", timeout.as_secs(), downloaded);
    RetrievalError::Transfer(format!(
        "{} 秒内没有收到数据 (已下载 {} 字节)",
        timeout.as_secs(),
        downloaded
    ))
}

fn classify_extract_error(error: ExtractError) -> RetrievalError {
    match error.kind {
        ExtractErrorKind::Terminal => RetrievalError::Terminal(error.message),
        ExtractErrorKind::Retryable => RetrievalError::Extraction(error.message),
    }
}

// 过小的文件通常是错误页面而不是视频
async fn validate_artifact(path: &Path, min_bytes: u64) -> Result<u64, RetrievalError> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if size < min_bytes {
        return Err(RetrievalError::InvalidArtifact {
            path: path.to_path_buf(),
            size,
        });
    }
    Ok(size)
}

fn check_response_status(response: &reqwest::Response, url: &str) -> Result<(), RetrievalError> {
    let status = response.status();
    debug!("Response Status: {}", status);

    match status {
        reqwest::StatusCode::FORBIDDEN => {
            warn!("🚫 检测到 403 Forbidden 状态码，可能触发了风控机制");
            Err(RetrievalError::Transfer(format!(
                "访问被拒绝 (403 Forbidden)，URL: {}",
                url
            )))
        }
        reqwest::StatusCode::TOO_MANY_REQUESTS => {
            warn!("⚠️ 检测到 429 Too Many Requests 状态码，请求过于频繁");
            Err(RetrievalError::Transfer(format!(
                "请求过于频繁 (429 Too Many Requests)，URL: {}",
                url
            )))
        }
        status if status.is_success() => Ok(()),
        _ => Err(RetrievalError::Transfer(format!(
            "HTTP 请求失败，状态码: {}，URL: {}",
            status, url
        ))),
    }
}
