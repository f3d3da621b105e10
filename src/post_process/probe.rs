use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::common::process::ProcessPool;
use crate::downloader::error::CompressionError;

// 用 ffprobe 读取容器时长（秒）
pub async fn probe_duration(
    pool: &ProcessPool,
    ffprobe_path: &str,
    input_path: &Path,
    timeout: Duration,
) -> Result<f64, CompressionError> {
    let mut command = Command::new(ffprobe_path);
    command
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(input_path);

    let output = pool
        .run_output(command, timeout)
        .await
        .map_err(|e| CompressionError::DurationProbe(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("ffprobe 执行失败 {:?}: {}", input_path, stderr.trim());
        return Err(CompressionError::DurationProbe(stderr.trim().to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let duration = parse_duration(&stdout)?;
    debug!("视频时长: {:.2}s ({:?})", duration, input_path);
    Ok(duration)
}

fn parse_duration(stdout: &str) -> Result<f64, CompressionError> {
    let text = stdout.trim();
    let duration: f64 = text
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .parse()
        .map_err(|_| CompressionError::DurationProbe(format!("无法解析时长: {:?}", text)))?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(CompressionError::DurationProbe(format!(
            "时长必须大于 0，实际为 {}",
            duration
        )));
    }
    Ok(duration)
}
