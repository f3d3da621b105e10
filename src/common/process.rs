use std::collections::VecDeque;
use std::process::{ExitStatus, Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::downloader::error::ProcessError;

const TAIL_LINES: usize = 20;
const MAX_LINE_BYTES: usize = 64 * 1024;

// 子进程执行结果，只保留 stderr 的最后几行用于诊断
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stderr_tail: Vec<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn diagnostics(&self) -> String {
        if self.stderr_tail.is_empty() {
            format!("退出状态: {}", self.status)
        } else {
            self.stderr_tail.join("\n")
        }
    }
}

/// 外部进程（ffmpeg / ffprobe / yt-dlp）的执行池。
///
/// 由调用方显式创建并持有，限制同时运行的子进程数量；
/// `shutdown` 会终止所有在跑的子进程并等待调用全部返回。
#[derive(Clone)]
pub struct ProcessPool {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ProcessPool {
    pub fn new(max_processes: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_processes.max(1))),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // 运行进程并逐行回调 stderr（同时按 \r 和 \n 切分）
    pub async fn run_streaming<F>(
        &self,
        mut command: Command,
        timeout: Duration,
        mut on_line: F,
    ) -> Result<ProcessOutput, ProcessError>
    where
        F: FnMut(&str) + Send,
    {
        let program = program_name(&command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let permits = Arc::clone(&self.permits);
        let run = async move {
            let _permit = permits.acquire().await.map_err(|_| ProcessError::ShutDown)?;
            debug!("启动子进程: {}", program);

            let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

            let drive = async {
                let mut tail = VecDeque::with_capacity(TAIL_LINES);
                if let Some(stderr) = child.stderr.take() {
                    let codec = AnyDelimiterCodec::new_with_max_length(
                        b"\r\n".to_vec(),
                        Vec::new(),
                        MAX_LINE_BYTES,
                    );
                    let mut lines = FramedRead::new(stderr, codec);
                    while let Some(chunk) = lines.next().await {
                        let chunk = match chunk {
                            Ok(chunk) => chunk,
                            Err(e) => {
                                warn!("读取 {} 输出失败: {}", program, e);
                                break;
                            }
                        };
                        let line = String::from_utf8_lossy(&chunk);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        on_line(line);
                        if tail.len() == TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.to_string());
                    }
                }
                let status = child.wait().await?;
                Ok::<_, std::io::Error>(ProcessOutput {
                    status,
                    stderr_tail: tail.into_iter().collect(),
                })
            };

            // 超时后 drive 被丢弃，kill_on_drop 负责结束子进程
            let result = tokio::time::timeout(timeout, drive).await;
            match result {
                Ok(output) => Ok(output?),
                Err(_) => {
                    warn!("子进程 {} 超时，已终止", program);
                    Err(ProcessError::Timeout {
                        program,
                        secs: timeout.as_secs(),
                    })
                }
            }
        };

        self.guarded(run).await
    }

    // 运行进程并收集 stdout / stderr
    pub async fn run_output(
        &self,
        mut command: Command,
        timeout: Duration,
    ) -> Result<Output, ProcessError> {
        let program = program_name(&command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let permits = Arc::clone(&self.permits);
        let run = async move {
            let _permit = permits.acquire().await.map_err(|_| ProcessError::ShutDown)?;
            debug!("启动子进程: {}", program);

            let child = command.spawn().map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

            let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
            match result {
                Ok(output) => Ok(output?),
                Err(_) => Err(ProcessError::Timeout {
                    program,
                    secs: timeout.as_secs(),
                }),
            }
        };

        self.guarded(run).await
    }

    async fn guarded<T, Fut>(&self, run: Fut) -> Result<T, ProcessError>
    where
        Fut: Future<Output = Result<T, ProcessError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ProcessError::ShutDown);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProcessError::ShutDown),
            result = self.tracker.track_future(run) => result,
        }
    }

    // 终止所有子进程并等待在途调用结束
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("正在关闭进程池...");
        self.cancel.cancel();
        self.permits.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!("进程池已关闭");
    }
}

fn program_name(command: &Command) -> String {
    command.as_std().get_program().to_string_lossy().into_owned()
}
