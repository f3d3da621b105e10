use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::downloader::error::DeliveryError;

pub mod console;

pub use console::ConsoleTransport;

/// 消息通道：通知请求者、刷新状态消息、投递最终文件
#[async_trait]
pub trait Transport: Send + Sync {
    // 尽力而为，失败只记录日志
    async fn notify(&self, target: &str, text: &str);

    async fn update_status(&self, target: &str, text: &str);

    async fn clear_status(&self, target: &str);

    async fn deliver_artifact(
        &self,
        target: &str,
        path: &Path,
        caption: &str,
    ) -> Result<PathBuf, DeliveryError>;
}
