#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use media_fix::downloader::error::{DeliveryError, RetrievalError};
use media_fix::downloader::models::RetrievalResult;
use media_fix::downloader::{ProgressStage, ProgressTracker, ProgressUpdate, Retriever};
use media_fix::transport::{ConsoleTransport, Transport};

pub const MB: u64 = 1024 * 1024;

// 写一个可执行的 sh 脚本
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

// 模拟 ffprobe：固定输出时长
#[cfg(unix)]
pub fn fake_ffprobe(dir: &Path, duration: f64) -> PathBuf {
    write_script(dir, "ffprobe", &format!("echo {}", duration))
}

// 模拟 ffmpeg：输出进度行，第二遍写出指定大小的文件
#[cfg(unix)]
pub fn fake_encoder(dir: &Path, output_bytes: u64) -> PathBuf {
    let body = format!(
        r#"for last; do :; done
pass=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-pass" ]; then pass="$a"; fi
  prev="$a"
done
printf 'frame=1 time=00:05:00.00 bitrate=1k speed=2.0x\r' >&2
printf 'frame=2 time=00:10:00.00 bitrate=1k speed=2.0x\n' >&2
if [ "$pass" = "2" ]; then
  head -c {} /dev/zero > "$last"
fi
exit 0"#,
        output_bytes
    );
    write_script(dir, "ffmpeg", &body)
}

// 模拟失败的 ffmpeg：在指定遍数写出部分文件后返回非零
#[cfg(unix)]
pub fn failing_encoder(dir: &Path, failing_pass: u8) -> PathBuf {
    let body = format!(
        r#"for last; do :; done
pass=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-pass" ]; then pass="$a"; fi
  prev="$a"
done
if [ "$pass" = "{pass}" ]; then
  if [ "$pass" = "2" ]; then head -c 4096 /dev/zero > "$last"; fi
  echo "Error: encoder exploded on pass {pass}" >&2
  exit 1
fi
exit 0"#,
        pass = failing_pass
    );
    write_script(dir, "ffmpeg", &body)
}

// 模拟分段流转封装：把指定字节数写到最后一个参数
#[cfg(unix)]
pub fn fake_remuxer(dir: &Path, output_bytes: u64) -> PathBuf {
    let body = format!(
        r#"for last; do :; done
printf 'size=1kB time=00:00:05.00 bitrate=1k speed=5.0x\r' >&2
printf 'size=2kB time=00:00:10.00 bitrate=1k speed=5.0x\n' >&2
head -c {} /dev/zero > "$last"
exit 0"#,
        output_bytes
    );
    write_script(dir, "ffmpeg", &body)
}

// ----------------------------------------------------------------------

/// 返回固定大小文件的获取阶段，可选延迟并统计并发峰值
pub struct FakeRetriever {
    pub size: u64,
    pub duration: f64,
    pub ceiling: u64,
    pub delay: Duration,
    pub fail_with: Option<String>,
    pub temp_dirs: Mutex<Vec<PathBuf>>,
    pub urls: Mutex<Vec<String>>,
    current: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeRetriever {
    pub fn new(size: u64, duration: f64, ceiling: u64) -> Self {
        Self {
            size,
            duration,
            ceiling,
            delay: Duration::ZERO,
            fail_with: None,
            temp_dirs: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn retrieve(
        &self,
        url: &str,
        tracker: &ProgressTracker,
    ) -> Result<RetrievalResult, RetrievalError> {
        self.urls.lock().push(url.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tracker.update(
            ProgressUpdate::new()
                .stage(ProgressStage::Downloading)
                .progress(50.0),
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.fail_with {
            return Err(RetrievalError::Terminal(message.clone()));
        }

        let dir = tempfile::Builder::new().prefix("fake_dl_").tempdir()?;
        let file_path = dir.path().join("clip_1.mp4");
        let file = std::fs::File::create(&file_path)?;
        file.set_len(self.size)?;
        self.temp_dirs.lock().push(dir.path().to_path_buf());

        Ok(RetrievalResult::new(
            file_path,
            self.size,
            "clip".to_string(),
            self.duration,
            self.ceiling,
            Some(dir),
        ))
    }
}

// ----------------------------------------------------------------------

/// 记录所有消息，投递交给 ConsoleTransport 完成
pub struct RecordingTransport {
    inner: ConsoleTransport,
    pub notices: Mutex<Vec<(String, String)>>,
    pub statuses: Mutex<Vec<String>>,
    pub cleared: AtomicUsize,
    pub deliveries: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingTransport {
    pub fn new(output_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: ConsoleTransport::new(output_dir),
            notices: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            cleared: AtomicUsize::new(0),
            deliveries: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn notify(&self, target: &str, text: &str) {
        self.notices.lock().push((target.to_string(), text.to_string()));
    }

    async fn update_status(&self, _target: &str, text: &str) {
        self.statuses.lock().push(text.to_string());
    }

    async fn clear_status(&self, _target: &str) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    async fn deliver_artifact(
        &self,
        target: &str,
        path: &Path,
        caption: &str,
    ) -> Result<PathBuf, DeliveryError> {
        let delivered = self.inner.deliver_artifact(target, path, caption).await?;
        self.deliveries
            .lock()
            .push((delivered.clone(), caption.to_string()));
        Ok(delivered)
    }
}
