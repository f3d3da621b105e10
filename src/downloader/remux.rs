use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::RetrievalError;
use super::progress::{ProgressStage, ProgressTracker, ProgressUpdate};
use crate::common::process::ProcessPool;
use crate::common::utils::{format_eta, parse_speed_marker, parse_time_marker};

// 下载阶段进度中留给元数据解析的部分
pub const EXTRACTION_SHARE: f64 = 10.0;

/// 把已用时长映射到下载阶段的后 90% 进度区间
pub fn remux_progress(elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return EXTRACTION_SHARE;
    }
    let span = 100.0 - EXTRACTION_SHARE;
    EXTRACTION_SHARE + (elapsed / duration * span).min(span)
}

/// 用 ffmpeg 对分段流 (HLS) 做流复制转封装
pub struct SegmentRemuxer {
    pool: ProcessPool,
    ffmpeg_path: String,
    referer: Option<String>,
    timeout: Duration,
}

impl SegmentRemuxer {
    pub fn new(pool: ProcessPool, ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pool,
            ffmpeg_path: ffmpeg_path.into(),
            referer: None,
            timeout,
        }
    }

    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }

    pub async fn remux(
        &self,
        manifest_url: &str,
        output_path: &Path,
        user_agent: &str,
        duration: f64,
        tracker: &ProgressTracker,
    ) -> Result<(), RetrievalError> {
        info!("开始转封装分段流 -> {:?}", output_path);

        let mut command = Command::new(&self.ffmpeg_path);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("info")
            .arg("-stats")
            .arg("-user_agent")
            .arg(user_agent);
        if let Some(referer) = &self.referer {
            command.arg("-headers").arg(format!("Referer: {}\r\n", referer));
        }
        command
            .arg("-reconnect")
            .arg("1")
            .arg("-reconnect_streamed")
            .arg("1")
            .arg("-reconnect_delay_max")
            .arg("5")
            .arg("-protocol_whitelist")
            .arg("file,http,https,tcp,tls,crypto")
            .arg("-i")
            .arg(manifest_url)
            .arg("-c")
            .arg("copy")
            .arg("-bsf:a")
            .arg("aac_adtstoasc")
            .arg("-movflags")
            .arg("+faststart")
            .arg("-f")
            .arg("mp4")
            .arg(output_path);

        let result = self
            .pool
            .run_streaming(command, self.timeout, |line| {
                report_line(line, duration, tracker);
            })
            .await;

        let failure = match result {
            Ok(output) if output.success() => {
                debug!("✅ 转封装完成: {:?}", output_path);
                return Ok(());
            }
            Ok(output) => RetrievalError::Remux(output.diagnostics()),
            Err(e) => RetrievalError::Process(e),
        };

        warn!("❌ 转封装失败: {}", failure);
        remove_partial(output_path).await;
        Err(failure)
    }
}

fn report_line(line: &str, duration: f64, tracker: &ProgressTracker) {
    if duration <= 0.0 {
        return;
    }
    let Some(elapsed) = parse_time_marker(line) else {
        return;
    };

    let mut update = ProgressUpdate::new()
        .stage(ProgressStage::Downloading)
        .progress(remux_progress(elapsed, duration));
    if let Some(speed) = parse_speed_marker(line) {
        let factor = speed.trim_end_matches('x').parse::<f64>().unwrap_or(0.0);
        if factor > 0.0 {
            update = update.eta(format_eta((duration - elapsed).max(0.0) / factor));
        }
        update = update.speed(speed);
    }
    tracker.update(update);
}

pub(crate) async fn remove_partial(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("删除残留文件失败 {:?}: {}", path, e);
        }
    }
}
