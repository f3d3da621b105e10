use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ExtractError, ExtractedMedia, Extractor};
use crate::common::process::ProcessPool;
use crate::common::utils::clean_title;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);
const TITLE_MAX_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    formats: Option<Vec<YtDlpFormat>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    ext: Option<String>,
    height: Option<u32>,
    protocol: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
}

impl YtDlpFormat {
    fn is_hls(&self) -> bool {
        let url_is_hls = self.url.as_deref().is_some_and(|u| u.contains(".m3u8"));
        url_is_hls || self.protocol.as_deref() == Some("m3u8_native")
    }

    // YouTube 的 DASH 格式音视频分离，单文件下载只能用两者都有的格式；
    // 没写编码信息的格式 (Twitter) 视为完整
    fn is_muxed(&self) -> bool {
        self.acodec.as_deref() != Some("none") && self.vcodec.as_deref() != Some("none")
    }
}

/// 基于 yt-dlp 的解析器，只解析元数据不下载
pub struct YtDlpExtractor {
    pool: ProcessPool,
    binary: String,
}

impl YtDlpExtractor {
    pub fn new(pool: ProcessPool, binary: impl Into<String>) -> Self {
        Self {
            pool,
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, url: &str, user_agent: &str) -> Result<ExtractedMedia, ExtractError> {
        info!("开始解析元数据: {}", url);
        let mut command = Command::new(&self.binary);
        command
            .arg("-J")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--user-agent")
            .arg(user_agent)
            .arg(url);

        let output = self
            .pool
            .run_output(command, EXTRACT_TIMEOUT)
            .await
            .map_err(|e| ExtractError::retryable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp 解析失败: {}", stderr.trim());
            return Err(ExtractError::classify(stderr.trim()));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::retryable(format!("解析 yt-dlp 输出失败: {}", e)))?;
        let media = select_streams(info);
        debug!(
            "解析结果: direct={:?}, manifest={:?}, duration={}",
            media.direct_url, media.manifest_url, media.duration
        );
        Ok(media)
    }
}

// 在带音轨的格式中分别挑选最高画质的 m3u8 和 mp4 地址，同分取后出现的
fn select_streams(info: YtDlpInfo) -> ExtractedMedia {
    let mut manifest_url = None;
    let mut direct_url = None;
    let formats = info.formats.unwrap_or_default();

    if formats.is_empty() {
        direct_url = info.url.clone();
    }

    let mut best_manifest = 0;
    let mut best_direct = 0;
    for format in formats.into_iter().filter(YtDlpFormat::is_muxed) {
        let height = format.height.unwrap_or(0);
        if format.is_hls() {
            if height >= best_manifest {
                manifest_url = format.url;
                best_manifest = height;
            }
        } else if format.ext.as_deref() == Some("mp4") && height >= best_direct {
            direct_url = format.url;
            best_direct = height;
        }
    }

    let raw_title = info
        .title
        .filter(|t| !t.trim().is_empty())
        .or(info.description)
        .unwrap_or_else(|| "Video".to_string());

    ExtractedMedia {
        direct_url,
        manifest_url,
        title: clean_title(&raw_title, TITLE_MAX_CHARS),
        duration: info.duration.unwrap_or(0.0),
        id: info.id.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_streams() {
        let json = r#"{
            "id": "42",
            "title": "clip https://t.co/abc",
            "duration": 12.5,
            "formats": [
                {"url": "https://v/low.m3u8", "ext": "mp4", "height": 360, "protocol": "m3u8_native"},
                {"url": "https://v/low.mp4", "ext": "mp4", "height": 360, "protocol": "https"},
                {"url": "https://v/high.m3u8", "ext": "mp4", "height": 720, "protocol": "m3u8_native"},
                {"url": "https://v/high.mp4", "ext": "mp4", "height": 720, "protocol": "https"}
            ]
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let media = select_streams(info);
        assert_eq!(media.manifest_url.as_deref(), Some("https://v/high.m3u8"));
        assert_eq!(media.direct_url.as_deref(), Some("https://v/high.mp4"));
        assert_eq!(media.title, "clip");
        assert_eq!(media.id, "42");
    }

    #[test]
    fn skips_video_only_and_audio_only_formats() {
        let json = r#"{
            "id": "yt1",
            "title": "music video",
            "duration": 200,
            "formats": [
                {"format_id": "18", "url": "https://r/18.mp4", "ext": "mp4", "height": 360, "protocol": "https", "acodec": "mp4a.40.2", "vcodec": "avc1.42001E"},
                {"format_id": "140", "url": "https://r/140.m4a", "ext": "m4a", "protocol": "https", "acodec": "mp4a.40.2", "vcodec": "none"},
                {"format_id": "137", "url": "https://r/137.mp4", "ext": "mp4", "height": 1080, "protocol": "https", "acodec": "none", "vcodec": "avc1.640028"}
            ]
        }"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let media = select_streams(info);
        assert_eq!(media.direct_url.as_deref(), Some("https://r/18.mp4"));
        assert_eq!(media.manifest_url, None);
    }

    #[test]
    fn falls_back_to_top_level_url() {
        let json = r#"{"id": "7", "description": "desc only", "url": "https://v/file.mp4", "formats": null}"#;
        let info: YtDlpInfo = serde_json::from_str(json).unwrap();
        let media = select_streams(info);
        assert_eq!(media.direct_url.as_deref(), Some("https://v/file.mp4"));
        assert_eq!(media.manifest_url, None);
        assert_eq!(media.title, "desc only");
        assert_eq!(media.duration, 0.0);
    }
}
