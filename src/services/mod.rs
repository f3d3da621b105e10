use async_trait::async_trait;
use thiserror::Error;

pub mod detector;
pub mod ytdlp;

pub use detector::{Service, ServiceRegistry};
pub use ytdlp::YtDlpExtractor;

// 解析出的流地址和元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMedia {
    pub direct_url: Option<String>,   // 可直接下载的单文件地址
    pub manifest_url: Option<String>, // 分段流 (m3u8) 地址
    pub title: String,
    pub duration: f64, // 秒
    pub id: String,
}

impl ExtractedMedia {
    pub fn has_streams(&self) -> bool {
        self.direct_url.is_some() || self.manifest_url.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractErrorKind {
    // 内容不存在/私密，换身份也没用
    Terminal,
    Retryable,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExtractError {
    pub kind: ExtractErrorKind,
    pub message: String,
}

impl ExtractError {
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractErrorKind::Retryable,
            message: message.into(),
        }
    }

    // 根据错误文本判断是否为终止性错误
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_terminal_message(&message) {
            Self::terminal(message)
        } else {
            Self::retryable(message)
        }
    }
}

const TERMINAL_MARKERS: [&str; 5] = [
    "not found",
    "private",
    "404",
    "unavailable",
    "does not exist",
];

pub fn is_terminal_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TERMINAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

// 外部解析器：把页面地址解析为可下载的流地址
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, user_agent: &str) -> Result<ExtractedMedia, ExtractError>;
}
