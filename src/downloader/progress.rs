use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Idle,
    Downloading,
    Processing,
    Compressing,
    Uploading,
    Completed,
    Failed,
}

// 进度快照
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub stage: ProgressStage,
    pub progress: f64, // 0-100
    pub speed: String,
    pub eta: String,
    pub filename: String,
    pub error: Option<String>,
    pub completed: bool,
    pub last_update: Instant,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            stage: ProgressStage::Idle,
            progress: 0.0,
            speed: String::new(),
            eta: String::new(),
            filename: String::new(),
            error: None,
            completed: false,
            last_update: Instant::now(),
        }
    }
}

// 一次局部更新，只合并提供了的字段
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub stage: Option<ProgressStage>,
    pub progress: Option<f64>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
    pub completed: Option<bool>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: ProgressStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn speed(mut self, speed: impl Into<String>) -> Self {
        self.speed = Some(speed.into());
        self
    }

    pub fn eta(mut self, eta: impl Into<String>) -> Self {
        self.eta = Some(eta.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
}

struct Inner {
    state: ProgressState,
    last_emit: Option<Instant>,
}

/// 跨线程共享的进度状态。
///
/// 下载、转封装、编码等后台工作通过 `update` 写入，
/// 状态汇报循环通过 `snapshot` 读取，两边只在这把锁上同步。
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ProgressState::default(),
                last_emit: None,
            }),
        }
    }

    pub fn update(&self, update: ProgressUpdate) {
        let mut inner = self.inner.lock();
        let state = &mut inner.state;

        if let Some(stage) = update.stage {
            state.stage = stage;
        }
        if let Some(progress) = update.progress {
            // NaN 会被 max 吞掉，结果落在 0
            state.progress = progress.max(0.0).min(100.0);
        }
        if let Some(speed) = update.speed {
            state.speed = speed;
        }
        if let Some(eta) = update.eta {
            state.eta = eta;
        }
        if let Some(filename) = update.filename {
            state.filename = filename;
        }
        if let Some(completed) = update.completed {
            state.completed = completed;
            if completed && update.error.is_none() {
                state.stage = ProgressStage::Completed;
                state.progress = 100.0;
            }
        }
        if let Some(error) = update.error {
            state.error = Some(error);
            state.stage = ProgressStage::Failed;
        }
        state.last_update = Instant::now();
    }

    pub fn snapshot(&self) -> ProgressState {
        self.inner.lock().state.clone()
    }

    // 节流：每个 throttle 窗口内最多返回一次 true
    pub fn should_emit(&self, throttle: Duration) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let due = match inner.last_emit {
            Some(last) => now.duration_since(last) >= throttle,
            None => true,
        };
        if due {
            inner.last_emit = Some(now);
        }
        due
    }

    // 允许下一次立即刷新
    pub fn force_update_allowed(&self) {
        self.inner.lock().last_emit = None;
    }

    pub fn set_error(&self, message: impl Into<String>) {
        self.update(ProgressUpdate::new().error(message).completed(true));
    }

    pub fn set_completed(&self) {
        self.update(ProgressUpdate::new().progress(100.0).completed(true));
    }
}

// --------------------------------------------------------------------

const TITLE_MAX_CHARS: usize = 40;

/// 生成文本进度条，例如 `[████░░░░░░] 40.0%`
pub fn generate_progress_bar(progress: f64, length: usize) -> String {
    let progress = progress.max(0.0).min(100.0);
    let filled = ((progress / 100.0) * length as f64) as usize;
    let empty = length.saturating_sub(filled);
    format!(
        "[{}{}] {:.1}%",
        "█".repeat(filled),
        "░".repeat(empty),
        progress
    )
}

fn display_title(title: &str) -> String {
    if title.chars().count() > TITLE_MAX_CHARS {
        let head: String = title.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

/// 根据当前阶段渲染状态消息
pub fn format_progress_message(state: &ProgressState, title: &str) -> String {
    let title = display_title(title);
    let bar = generate_progress_bar(state.progress, 10);

    match state.stage {
        ProgressStage::Failed => format!(
            "❌ 失败\n📹 {}\n\n{}",
            title,
            state.error.as_deref().unwrap_or("未知错误")
        ),
        ProgressStage::Downloading => {
            let mut stats = Vec::new();
            if !state.speed.is_empty() {
                stats.push(format!("⚡ {}", state.speed));
            }
            if !state.eta.is_empty() {
                stats.push(format!("⏱ 剩余: {}", state.eta));
            }
            format!("⏬ 下载中\n📹 {}\n\n{}\n{}", title, bar, stats.join(" | "))
        }
        ProgressStage::Compressing => {
            format!("🔧 压缩中\n📹 {}\n\n{}\n⏱ 剩余: {}", title, bar, state.eta)
        }
        ProgressStage::Uploading => {
            format!("⏫ 上传中\n📹 {}\n\n{}\n⚡ {}", title, bar, state.speed)
        }
        ProgressStage::Completed => format!("✅ 已完成\n📹 {}", title),
        ProgressStage::Idle | ProgressStage::Processing => format!("⏳ 处理中\n📹 {}", title),
    }
}
