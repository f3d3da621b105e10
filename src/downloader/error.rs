use std::path::PathBuf;

use thiserror::Error;

use super::task::TaskState;

// 子进程边界上的错误
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("无法启动进程 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("进程 {program} 超时 ({secs}s)，已终止")]
    Timeout { program: String, secs: u64 },

    #[error("进程池已关闭")]
    ShutDown,

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

// 获取阶段的错误：Terminal 表示换身份重试也没有意义
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("内容不可用: {0}")]
    Terminal(String),

    #[error("解析失败: {0}")]
    Extraction(String),

    #[error("没有可用的视频流")]
    NoStreams,

    #[error("直链下载失败: {0}")]
    Transfer(String),

    #[error("分段流转封装失败: {0}")]
    Remux(String),

    #[error("下载的文件无效: {path:?} ({size} 字节)")]
    InvalidArtifact { path: PathBuf, size: u64 },

    #[error("没有可用的客户端身份")]
    NoIdentities,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetrievalError::Terminal(_))
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(error: reqwest::Error) -> Self {
        RetrievalError::Transfer(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("输入文件不存在: {0:?}")]
    InputNotFound(PathBuf),

    #[error("无法获取视频时长: {0}")]
    DurationProbe(String),

    #[error("视频过长，无法压缩到目标大小 (计算出的视频码率 {bitrate_bps:.0} bps)")]
    BitrateTooLow { bitrate_bps: f64 },

    #[error("FFmpeg 第 {pass} 遍编码失败: {diagnostics}")]
    Encoder { pass: u8, diagnostics: String },

    #[error("压缩输出缺失或为空: {0:?}")]
    EmptyOutput(PathBuf),

    #[error("压缩后仍超过上限: {size} > {ceiling} 字节")]
    OverCeiling { size: u64, ceiling: u64 },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("目标拒绝接收文件: {0}")]
    Rejected(String),

    #[error("待投递的文件不存在: {0:?}")]
    FileNotFound(PathBuf),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
#[error("非法的任务状态转换: {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: TaskState,
    pub to: TaskState,
}

// 单个任务流水线的错误
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
