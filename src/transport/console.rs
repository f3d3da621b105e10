use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Transport;
use crate::common::logger::PrettyLogger;
use crate::downloader::error::DeliveryError;

/// 终端 + 本地目录：消息打印到控制台，文件移动到输出目录
pub struct ConsoleTransport {
    output_dir: PathBuf,
}

impl ConsoleTransport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn notify(&self, target: &str, text: &str) {
        PrettyLogger::notice(target, text);
    }

    async fn update_status(&self, target: &str, text: &str) {
        PrettyLogger::status(target, text);
    }

    async fn clear_status(&self, target: &str) {
        debug!("清除状态消息: {}", target);
    }

    async fn deliver_artifact(
        &self,
        target: &str,
        path: &Path,
        caption: &str,
    ) -> Result<PathBuf, DeliveryError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DeliveryError::FileNotFound(path.to_path_buf()));
        }
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let file_name = path
            .file_name()
            .ok_or_else(|| DeliveryError::Rejected(format!("无效的文件路径: {:?}", path)))?;
        let final_target = unique_target(&self.output_dir.join(file_name)).await;

        // 跨文件系统时 rename 会失败，退回到复制后删除
        if let Err(e) = tokio::fs::rename(path, &final_target).await {
            debug!("rename 失败 ({})，改为复制", e);
            tokio::fs::copy(path, &final_target).await?;
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!("删除源文件失败 {:?}: {}", path, e);
            }
        }

        PrettyLogger::notice(target, caption);
        PrettyLogger::file_info("已保存", final_target.display().to_string());
        Ok(final_target)
    }
}

// 目标已存在时追加 _1, _2 ...
async fn unique_target(target: &Path) -> PathBuf {
    if !tokio::fs::try_exists(target).await.unwrap_or(false) {
        return target.to_path_buf();
    }
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = target
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    let mut counter = 1;
    loop {
        let new_name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = target.with_file_name(new_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        counter += 1;
    }
}
