use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::models::QueueStats;
use super::processor::{MediaProcessor, PipelineHooks};
use super::task::{Requester, Task, TaskEvent, TaskState};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    // 同时执行下载/压缩/上传的流水线上限
    pub max_concurrent: usize,
    pub pop_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_concurrent: 2,
            pop_timeout: Duration::from_secs(1),
        }
    }
}

struct Shared {
    backlog: Mutex<VecDeque<Task>>,
    available: Notify,
    permits: Arc<Semaphore>,
    hooks: PipelineHooks,
    processor: Arc<MediaProcessor>,
    config: QueueConfig,
    // 已提交但还没结束的任务数
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Shared {
    // 带超时的出队，超时返回 None 以便检查关闭信号
    async fn pop(&self) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + self.config.pop_timeout;
        loop {
            if let Some(task) = self.backlog.lock().pop_front() {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// 任务队列 + 固定数量的 worker。
///
/// 积压队列无上限，提交永远不会阻塞；真正执行流水线的任务数
/// 由全局信号量限制为 `max_concurrent`。
pub struct QueueManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    workers: Mutex<JoinSet<()>>,
}

impl QueueManager {
    pub fn new(processor: Arc<MediaProcessor>, config: QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            shared: Arc::new(Shared {
                backlog: Mutex::new(VecDeque::new()),
                available: Notify::new(),
                permits: Arc::new(Semaphore::new(max_concurrent)),
                hooks: PipelineHooks::new(),
                processor,
                config: QueueConfig {
                    max_concurrent,
                    ..config
                },
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            workers: Mutex::new(JoinSet::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.hooks.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.hooks.stats()
    }

    pub fn backlog_len(&self) -> usize {
        self.shared.backlog.lock().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.config.max_concurrent
    }

    // 按配置的 worker 数量启动
    pub fn start(&self) {
        let worker_count = self.shared.config.workers.max(1);
        let mut workers = self.workers.lock();
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&self.shared);
            let cancel = self.cancel.clone();
            workers.spawn(worker_loop(shared, cancel, worker_id));
        }
        info!(
            "队列已启动: {} 个 worker, 并发上限 {}",
            worker_count,
            self.shared.config.max_concurrent
        );
    }

    // 提交请求，返回任务 id
    pub fn submit_request(
        &self,
        url: impl Into<String>,
        requester_name: impl Into<String>,
        reply_target: impl Into<String>,
    ) -> String {
        let task = Task::new(
            url,
            Requester {
                name: requester_name.into(),
                reply_target: reply_target.into(),
            },
        );
        let task_id = task.task_id.clone();
        self.submit(task);
        task_id
    }

    pub fn submit(&self, task: Task) {
        let shared = &self.shared;
        shared.hooks.publish(TaskEvent::from_task(&task));
        shared.outstanding.fetch_add(1, Ordering::AcqRel);

        let requester = task.requester.clone();
        let queue_size = {
            let mut backlog = shared.backlog.lock();
            backlog.push_back(task);
            backlog.len()
        };
        let mut active = 0;
        shared.hooks.update_stats(|stats| {
            stats.total_queued += 1;
            active = stats.active;
        });
        shared.available.notify_one();

        info!(
            "收到来自 {} 的任务. 队列: {}, 运行中: {}",
            requester.name, queue_size, active
        );

        let max = shared.config.max_concurrent;
        if queue_size > 1 || active >= max {
            let text = format!(
                "⏳ 已加入队列\n📊 位置: {}\n⚙️ 运行中: {}/{}",
                queue_size, active, max
            );
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let transport = Arc::clone(shared.processor.transport());
                    handle.spawn(async move {
                        transport.notify(&requester.reply_target, &text).await;
                    });
                }
                // 通知是尽力而为的，不能影响入队
                Err(_) => warn!("不在异步运行时中，跳过排队通知: {}", requester.name),
            }
        }
    }

    // 等待队列清空且没有任务在执行
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    // 取消所有 worker 并等待退出
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("正在关闭队列...");
        self.cancel.cancel();
        let mut workers = std::mem::take(&mut *self.workers.lock());
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker 异常退出: {}", e);
            }
        }
        self.shared.permits.close();
        info!("队列已关闭");
    }
}

async fn worker_loop(shared: Arc<Shared>, cancel: CancellationToken, worker_id: usize) {
    debug!("Worker {} 已启动", worker_id);
    loop {
        let popped = tokio::select! {
            _ = cancel.cancelled() => break,
            popped = shared.pop() => popped,
        };
        let Some(task) = popped else {
            continue;
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                // 还没开始执行，放回队首
                shared.backlog.lock().push_front(task);
                break;
            }
            permit = Arc::clone(&shared.permits).acquire_owned() => permit,
        };
        let Ok(permit) = permit else {
            shared.backlog.lock().push_front(task);
            break;
        };

        let task_id = task.task_id.clone();
        let reply_target = task.requester.reply_target.clone();
        let mut handle = tokio::spawn(run_task(Arc::clone(&shared), task, worker_id));
        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                handle.abort();
                handle.await
            }
        };
        drop(permit);

        // 正常情况下 run_task 自己完成记账，这里只处理被取消或 panic 的任务
        if let Err(e) = joined {
            let message = if e.is_cancelled() {
                "任务已取消".to_string()
            } else {
                error!("Worker {} 执行任务 {} 时 panic: {}", worker_id, task_id, e);
                format!("内部错误: {}", e)
            };
            shared.hooks.update_stats(|stats| stats.total_failed += 1);
            shared.hooks.publish(TaskEvent {
                task_id,
                state: TaskState::Failed,
                error: Some(message.clone()),
            });
            let transport = Arc::clone(shared.processor.transport());
            transport
                .notify(&reply_target, &format!("❌ 失败: {}", message))
                .await;
        }
        shared.finish_one();
    }
    debug!("Worker {} 已退出", worker_id);
}

async fn run_task(shared: Arc<Shared>, mut task: Task, worker_id: usize) {
    let hooks = &shared.hooks;
    let _active = hooks.enter_active();

    match shared.processor.process(&mut task, worker_id, hooks).await {
        Ok(outcome) => {
            hooks.update_stats(|stats| stats.total_processed += 1);
            debug!(
                "Worker {} 完成任务 {} (压缩: {})",
                worker_id, task.task_id, outcome.compressed
            );
        }
        Err(e) => {
            warn!("Worker {} 任务 {} 失败: {}", worker_id, task.task_id, e);
            hooks.update_stats(|stats| stats.total_failed += 1);
            shared
                .processor
                .transport()
                .notify(&task.requester.reply_target, &format!("❌ 失败: {}", e))
                .await;
        }
    }
}
