use std::path::PathBuf;

use serde::Serialize;
use tempfile::TempDir;

// 获取阶段的产物
#[derive(Debug)]
pub struct RetrievalResult {
    pub file_path: PathBuf,
    pub file_size: u64,
    pub title: String,
    pub duration: f64, // 秒
    pub needs_compression: bool,
    // 获取阶段创建的临时目录，由调用方负责释放
    pub temp_dir: Option<TempDir>,
}

impl RetrievalResult {
    pub fn new(
        file_path: PathBuf,
        file_size: u64,
        title: String,
        duration: f64,
        ceiling_bytes: u64,
        temp_dir: Option<TempDir>,
    ) -> Self {
        Self {
            file_path,
            file_size,
            title,
            duration,
            needs_compression: file_size > ceiling_bytes,
            temp_dir,
        }
    }

    pub fn take_temp_dir(&mut self) -> Option<TempDir> {
        self.temp_dir.take()
    }
}

// --------------------------------------------------------------------

// 需要单独计数的重型阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Downloading,
    Compressing,
    Uploading,
}

// 全局队列统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_queued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_compressed: u64,
    pub active: usize,
    pub currently_downloading: usize,
    pub currently_compressing: usize,
    pub currently_uploading: usize,
}

impl QueueStats {
    pub fn stage_counter_mut(&mut self, stage: StageKind) -> &mut usize {
        match stage {
            StageKind::Downloading => &mut self.currently_downloading,
            StageKind::Compressing => &mut self.currently_compressing,
            StageKind::Uploading => &mut self.currently_uploading,
        }
    }
}
