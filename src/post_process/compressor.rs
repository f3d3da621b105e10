use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::probe::probe_duration;
use crate::common::process::ProcessPool;
use crate::common::utils::{format_bytes, parse_time_marker};
use crate::downloader::error::CompressionError;

#[derive(Debug, Clone)]
pub struct CompressorConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub audio_bitrate_bps: f64,
    // 只用到上限的这个比例，给容器开销留余量
    pub target_ratio: f64,
    pub pass_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            audio_bitrate_bps: 128_000.0,
            target_ratio: 0.95,
            pass_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// 计算目标视频码率 (bps)。
///
/// `ceiling_bytes * ratio * 8 / duration - audio_bps`，结果不大于 0 时直接报错，
/// 不做下限截断。
pub fn compute_video_bitrate(
    ceiling_bytes: u64,
    duration: f64,
    ratio: f64,
    audio_bitrate_bps: f64,
) -> Result<f64, CompressionError> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(CompressionError::DurationProbe(format!(
            "时长必须大于 0，实际为 {}",
            duration
        )));
    }
    let target_bits = ceiling_bytes as f64 * ratio * 8.0;
    let bitrate_bps = target_bits / duration - audio_bitrate_bps;
    if bitrate_bps <= 0.0 {
        return Err(CompressionError::BitrateTooLow { bitrate_bps });
    }
    Ok(bitrate_bps)
}

// 两遍编码合在一起的总进度：第一遍 0-50，第二遍 50-100
fn overall_progress(pass: u8, elapsed: f64, duration: f64) -> f64 {
    let fraction = (elapsed / duration).clamp(0.0, 1.0);
    (f64::from(pass) - 1.0) * 50.0 + fraction * 50.0
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

pub fn compressed_output_path(input_path: &Path) -> PathBuf {
    let stem = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    input_path.with_file_name(format!("{}_compressed.mp4", stem))
}

/// 两遍 H.264 编码，把视频压到指定大小以内
pub struct VideoCompressor {
    pool: ProcessPool,
    config: CompressorConfig,
}

impl VideoCompressor {
    pub fn new(pool: ProcessPool, config: CompressorConfig) -> Self {
        Self { pool, config }
    }

    /// 文件不超过上限时原样返回 `(input, false)`，否则压缩并返回 `(output, true)`。
    ///
    /// 压缩结果仍超过上限时返回 `OverCeiling`，并删除输出文件。
    pub async fn compress_if_needed(
        &self,
        input_path: &Path,
        ceiling_bytes: u64,
        on_progress: Option<&(dyn Fn(f64) + Send + Sync)>,
    ) -> Result<(PathBuf, bool), CompressionError> {
        let metadata = tokio::fs::metadata(input_path)
            .await
            .map_err(|_| CompressionError::InputNotFound(input_path.to_path_buf()))?;
        let file_size = metadata.len();

        if file_size <= ceiling_bytes {
            debug!("文件未超过上限 ({}), 跳过压缩", format_bytes(file_size));
            return Ok((input_path.to_path_buf(), false));
        }

        info!(
            "文件大小 {} 超过上限 {}，开始压缩",
            format_bytes(file_size),
            format_bytes(ceiling_bytes)
        );

        let output_path = compressed_output_path(input_path);
        match self
            .run_two_pass(input_path, &output_path, ceiling_bytes, on_progress)
            .await
        {
            Ok(()) => Ok((output_path, true)),
            Err(e) => {
                error!("❌ 压缩失败: {}", e);
                if tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
                    if let Err(remove_err) = tokio::fs::remove_file(&output_path).await {
                        warn!("删除未完成的压缩文件失败: {}", remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_two_pass(
        &self,
        input_path: &Path,
        output_path: &Path,
        ceiling_bytes: u64,
        on_progress: Option<&(dyn Fn(f64) + Send + Sync)>,
    ) -> Result<(), CompressionError> {
        let duration = probe_duration(
            &self.pool,
            &self.config.ffprobe_path,
            input_path,
            self.config.probe_timeout,
        )
        .await?;

        let video_bps = compute_video_bitrate(
            ceiling_bytes,
            duration,
            self.config.target_ratio,
            self.config.audio_bitrate_bps,
        )?;
        let video_bitrate = format!("{}k", (video_bps / 1000.0) as u64);
        let audio_bitrate = format!("{}k", (self.config.audio_bitrate_bps / 1000.0) as u64);
        info!(
            "时长 {:.1}s，目标视频码率 {}，音频码率 {}",
            duration, video_bitrate, audio_bitrate
        );

        // 两遍编码共用的统计日志放在独立临时目录里
        let pass_dir = tempfile::Builder::new().prefix("mfix_pass_").tempdir()?;
        let passlog = pass_dir.path().join("ffmpeg2pass");

        // ------ 第一遍：只分析，丢弃输出 ------
        let mut pass1 = self.encoder_command(input_path, &video_bitrate, 1, &passlog);
        pass1.arg("-an").arg("-f").arg("null").arg(null_device());
        self.run_pass(pass1, 1, duration, on_progress).await?;

        // ------ 第二遍：生成最终文件 ------
        let mut pass2 = self.encoder_command(input_path, &video_bitrate, 2, &passlog);
        pass2
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg(&audio_bitrate)
            .arg("-movflags")
            .arg("+faststart")
            .arg(output_path);
        self.run_pass(pass2, 2, duration, on_progress).await?;

        let output_size = match tokio::fs::metadata(output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if output_size == 0 {
            return Err(CompressionError::EmptyOutput(output_path.to_path_buf()));
        }
        if output_size > ceiling_bytes {
            return Err(CompressionError::OverCeiling {
                size: output_size,
                ceiling: ceiling_bytes,
            });
        }

        info!("✅ 压缩完成: {:?} ({})", output_path, format_bytes(output_size));
        Ok(())
    }

    fn encoder_command(
        &self,
        input_path: &Path,
        video_bitrate: &str,
        pass: u8,
        passlog: &Path,
    ) -> Command {
        let mut command = Command::new(&self.config.ffmpeg_path);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-i")
            .arg(input_path)
            .arg("-c:v")
            .arg("libx264")
            .arg("-b:v")
            .arg(video_bitrate)
            .arg("-pass")
            .arg(pass.to_string())
            .arg("-passlogfile")
            .arg(passlog);
        command
    }

    async fn run_pass(
        &self,
        command: Command,
        pass: u8,
        duration: f64,
        on_progress: Option<&(dyn Fn(f64) + Send + Sync)>,
    ) -> Result<(), CompressionError> {
        debug!("开始第 {} 遍编码", pass);
        let output = self
            .pool
            .run_streaming(command, self.config.pass_timeout, |line| {
                if let (Some(callback), Some(elapsed)) = (on_progress, parse_time_marker(line)) {
                    callback(overall_progress(pass, elapsed, duration));
                }
            })
            .await?;

        if !output.success() {
            return Err(CompressionError::Encoder {
                pass,
                diagnostics: output.diagnostics(),
            });
        }
        if let Some(callback) = on_progress {
            callback(f64::from(pass) * 50.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_split_progress_evenly() {
        assert_eq!(overall_progress(1, 0.0, 100.0), 0.0);
        assert_eq!(overall_progress(1, 100.0, 100.0), 50.0);
        assert_eq!(overall_progress(2, 50.0, 100.0), 75.0);
        assert_eq!(overall_progress(2, 500.0, 100.0), 100.0);
    }

    #[test]
    fn output_sits_next_to_input() {
        let out = compressed_output_path(Path::new("/tmp/dl/clip_42.mp4"));
        assert_eq!(out, PathBuf::from("/tmp/dl/clip_42_compressed.mp4"));
    }
}
