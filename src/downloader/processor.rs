use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::core::Retriever;
use super::error::{PipelineError, TransitionError};
use super::models::{QueueStats, StageKind};
use super::progress::{ProgressStage, ProgressTracker, ProgressUpdate, format_progress_message};
use super::task::{Task, TaskEvent, TaskState};
use crate::common::utils::{format_bytes, format_eta};
use crate::post_process::VideoCompressor;
use crate::post_process::compressor::compressed_output_path;
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub poll_interval: Duration,
    pub throttle: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            throttle: Duration::from_secs_f64(2.5),
        }
    }
}

// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Counter {
    Active,
    Stage(StageKind),
}

fn counter_mut(stats: &mut QueueStats, counter: Counter) -> &mut usize {
    match counter {
        Counter::Active => &mut stats.active,
        Counter::Stage(stage) => stats.stage_counter_mut(stage),
    }
}

/// 计数守卫：创建时 +1，drop 时 -1，错误路径和 panic 也会归还
pub struct CounterGuard {
    stats: Arc<Mutex<QueueStats>>,
    counter: Counter,
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        let value = counter_mut(&mut stats, self.counter);
        *value = value.saturating_sub(1);
    }
}

/// 流水线与队列共享的统计和事件通道
#[derive(Clone)]
pub struct PipelineHooks {
    stats: Arc<Mutex<QueueStats>>,
    events: broadcast::Sender<TaskEvent>,
}

impl Default for PipelineHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineHooks {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            stats: Arc::new(Mutex::new(QueueStats::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.lock().clone()
    }

    pub fn update_stats(&self, f: impl FnOnce(&mut QueueStats)) {
        f(&mut self.stats.lock());
    }

    pub fn publish(&self, event: TaskEvent) {
        // 没有订阅者时发送失败是正常的
        let _ = self.events.send(event);
    }

    pub fn advance(&self, task: &mut Task, next: TaskState) -> Result<(), TransitionError> {
        task.advance(next)?;
        debug!("任务 {} -> {:?}", task.task_id, next);
        self.publish(TaskEvent::from_task(task));
        Ok(())
    }

    pub fn fail(&self, task: &mut Task, message: impl Into<String>) {
        if task.fail(message) {
            self.publish(TaskEvent::from_task(task));
        }
    }

    pub fn enter_active(&self) -> CounterGuard {
        self.enter(Counter::Active)
    }

    pub fn enter_stage(&self, stage: StageKind) -> CounterGuard {
        self.enter(Counter::Stage(stage))
    }

    fn enter(&self, counter: Counter) -> CounterGuard {
        *counter_mut(&mut self.stats.lock(), counter) += 1;
        CounterGuard {
            stats: Arc::clone(&self.stats),
            counter,
        }
    }
}

// ----------------------------------------------------------------------

// 本任务创建的临时文件和目录，结束时统一删除
#[derive(Default)]
struct TempResources {
    files: Vec<PathBuf>,
    dirs: Vec<TempDir>,
}

impl TempResources {
    async fn release(self) {
        for file in self.files {
            if tokio::fs::try_exists(&file).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::remove_file(&file).await {
                    warn!("删除临时文件失败 {:?}: {}", file, e);
                }
            }
        }
        for dir in self.dirs {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("删除临时目录失败 {:?}: {}", path, e);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub delivered: PathBuf,
    pub compressed: bool,
}

/// 单个任务的流水线：获取 -> (压缩) -> 投递
pub struct MediaProcessor {
    retriever: Arc<dyn Retriever>,
    compressor: Arc<VideoCompressor>,
    transport: Arc<dyn Transport>,
    ceiling_bytes: u64,
    reporter: ReporterConfig,
}

impl MediaProcessor {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        compressor: Arc<VideoCompressor>,
        transport: Arc<dyn Transport>,
        ceiling_bytes: u64,
        reporter: ReporterConfig,
    ) -> Self {
        Self {
            retriever,
            compressor,
            transport,
            ceiling_bytes,
            reporter,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn process(
        &self,
        task: &mut Task,
        worker_id: usize,
        hooks: &PipelineHooks,
    ) -> Result<PipelineOutcome, PipelineError> {
        info!("Worker {} 开始处理任务 {}: {}", worker_id, task.task_id, task.url);

        let tracker = Arc::new(ProgressTracker::new());
        let title = Arc::new(Mutex::new(task.url.clone()));
        let target = task.requester.reply_target.clone();

        let cancel = CancellationToken::new();
        let reporter = AbortOnDropHandle::new(tokio::spawn(run_reporter(
            Arc::clone(&tracker),
            Arc::clone(&title),
            Arc::clone(&self.transport),
            target.clone(),
            self.reporter.clone(),
            cancel.clone(),
        )));

        let mut resources = TempResources::default();
        let result = self
            .run_stages(task, hooks, &tracker, &title, &mut resources)
            .await;

        // ------ 清理：无论哪个阶段失败都会执行 ------
        cancel.cancel();
        if let Err(e) = reporter.await {
            if !e.is_cancelled() {
                warn!("状态汇报任务异常退出: {}", e);
            }
        }
        resources.release().await;

        match &result {
            Ok(outcome) => {
                info!("✅ 任务 {} 完成: {:?}", task.task_id, outcome.delivered);
                self.transport.clear_status(&target).await;
            }
            Err(e) => {
                warn!("❌ 任务 {} 失败: {}", task.task_id, e);
                hooks.fail(task, e.to_string());
                tracker.set_error(e.to_string());
                let text = format_progress_message(&tracker.snapshot(), &title.lock().clone());
                self.transport.update_status(&target, &text).await;
            }
        }
        result
    }

    async fn run_stages(
        &self,
        task: &mut Task,
        hooks: &PipelineHooks,
        tracker: &Arc<ProgressTracker>,
        title: &Mutex<String>,
        resources: &mut TempResources,
    ) -> Result<PipelineOutcome, PipelineError> {
        // ------ 下载 ------
        hooks.advance(task, TaskState::Downloading)?;
        let retrieved = {
            let _stage = hooks.enter_stage(StageKind::Downloading);
            tracker.update(ProgressUpdate::new().stage(ProgressStage::Downloading));
            self.retriever.retrieve(&task.url, tracker).await
        };
        let mut retrieved = retrieved?;
        if let Some(dir) = retrieved.take_temp_dir() {
            resources.dirs.push(dir);
        }
        resources.files.push(retrieved.file_path.clone());
        *title.lock() = retrieved.title.clone();

        // ------ 压缩 ------
        let mut final_path = retrieved.file_path.clone();
        let mut compressed = false;
        if retrieved.needs_compression {
            hooks.advance(task, TaskState::Compressing)?;
            let _stage = hooks.enter_stage(StageKind::Compressing);
            tracker.update(
                ProgressUpdate::new()
                    .stage(ProgressStage::Compressing)
                    .progress(0.0)
                    .speed("")
                    .eta(""),
            );
            tracker.force_update_allowed();
            resources.files.push(compressed_output_path(&final_path));

            let started = Instant::now();
            let progress_tracker = Arc::clone(tracker);
            let on_progress = move |percent: f64| {
                let mut update = ProgressUpdate::new()
                    .stage(ProgressStage::Compressing)
                    .progress(percent);
                if percent > 0.0 {
                    let elapsed = started.elapsed().as_secs_f64();
                    update = update.eta(format_eta(elapsed * (100.0 - percent) / percent));
                }
                progress_tracker.update(update);
            };

            let (path, was_compressed) = self
                .compressor
                .compress_if_needed(&final_path, self.ceiling_bytes, Some(&on_progress))
                .await?;
            if was_compressed {
                hooks.update_stats(|stats| stats.total_compressed += 1);
            }
            final_path = path;
            compressed = was_compressed;
        }

        // ------ 投递 ------
        hooks.advance(task, TaskState::Uploading)?;
        let delivered = {
            let _stage = hooks.enter_stage(StageKind::Uploading);
            let size = tokio::fs::metadata(&final_path)
                .await
                .map(|m| m.len())
                .unwrap_or(retrieved.file_size);
            tracker.update(
                ProgressUpdate::new()
                    .stage(ProgressStage::Uploading)
                    .progress(0.0)
                    .speed(format_bytes(size))
                    .eta(""),
            );
            tracker.force_update_allowed();

            let caption = format!("🎬 {}\n👤 {}", retrieved.title, task.requester.name);
            let delivered = self
                .transport
                .deliver_artifact(&task.requester.reply_target, &final_path, &caption)
                .await?;
            tracker.update(ProgressUpdate::new().progress(100.0));
            delivered
        };

        hooks.advance(task, TaskState::Completed)?;
        tracker.set_completed();
        Ok(PipelineOutcome {
            delivered,
            compressed,
        })
    }
}

// 定时读取进度快照，节流后只在文本变化时刷新状态消息
async fn run_reporter(
    tracker: Arc<ProgressTracker>,
    title: Arc<Mutex<String>>,
    transport: Arc<dyn Transport>,
    target: String,
    config: ReporterConfig,
    cancel: CancellationToken,
) {
    let mut last_text = String::new();
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !tracker.should_emit(config.throttle) {
            continue;
        }
        let text = format_progress_message(&tracker.snapshot(), &title.lock().clone());
        if text != last_text {
            transport.update_status(&target, &text).await;
            last_text = text;
        }
    }
}
