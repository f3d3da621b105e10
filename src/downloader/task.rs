use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::error::TransitionError;

// 任务状态只能前进，不能回退
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    Pending,
    Downloading,
    Compressing,
    Uploading,
    Completed,
    Failed,
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Downloading => 1,
            TaskState::Compressing => 2,
            TaskState::Uploading => 3,
            TaskState::Completed | TaskState::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    // 正在执行重型阶段（下载/压缩/上传）
    pub fn is_running(self) -> bool {
        !self.is_terminal() && self != TaskState::Pending
    }

    pub fn can_advance_to(self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TaskState::Failed => true,
            // Completed 只能从 Uploading 进入
            TaskState::Completed => self == TaskState::Uploading,
            _ => next.rank() > self.rank(),
        }
    }
}

// 请求者信息：显示名称 + 回复目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub reply_target: String,
}

#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub url: String,
    pub requester: Requester,
    pub created_at: DateTime<Local>,
    state: TaskState,
    pub error: Option<String>,
}

impl Task {
    pub fn new(url: impl Into<String>, requester: Requester) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            requester,
            created_at: Local::now(),
            state: TaskState::Pending,
            error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn advance(&mut self, next: TaskState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    // 标记失败，已经是终态时保持不变
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Failed;
        self.error = Some(message.into());
        true
    }
}

// 广播给订阅者的任务状态变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: String,
    pub state: TaskState,
    pub error: Option<String>,
}

impl TaskEvent {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            state: task.state(),
            error: task.error.clone(),
        }
    }
}
