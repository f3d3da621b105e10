use media_fix::downloader::{Requester, Task, TaskState};

fn new_task() -> Task {
    Task::new(
        "https://x.com/someone/status/1",
        Requester {
            name: "tester".to_string(),
            reply_target: "chat-1".to_string(),
        },
    )
}

#[test]
fn test_full_path_with_compression() {
    let mut task = new_task();
    assert_eq!(task.state(), TaskState::Pending);
    for next in [
        TaskState::Downloading,
        TaskState::Compressing,
        TaskState::Uploading,
        TaskState::Completed,
    ] {
        task.advance(next).unwrap();
        assert_eq!(task.state(), next);
    }
    assert!(task.state().is_terminal());
}

#[test]
fn test_compressing_can_be_skipped() {
    let mut task = new_task();
    task.advance(TaskState::Downloading).unwrap();
    task.advance(TaskState::Uploading).unwrap();
    task.advance(TaskState::Completed).unwrap();
}

#[test]
fn test_no_backward_transitions() {
    let mut task = new_task();
    task.advance(TaskState::Downloading).unwrap();
    task.advance(TaskState::Uploading).unwrap();

    let err = task.advance(TaskState::Downloading).unwrap_err();
    assert_eq!(err.from, TaskState::Uploading);
    assert_eq!(err.to, TaskState::Downloading);
    assert!(task.advance(TaskState::Compressing).is_err());
    assert!(task.advance(TaskState::Pending).is_err());
    assert_eq!(task.state(), TaskState::Uploading);
}

#[test]
fn test_completed_only_after_uploading() {
    let mut task = new_task();
    assert!(task.advance(TaskState::Completed).is_err());
    task.advance(TaskState::Downloading).unwrap();
    assert!(task.advance(TaskState::Completed).is_err());
}

#[test]
fn test_failure_is_final() {
    let mut task = new_task();
    task.advance(TaskState::Downloading).unwrap();
    assert!(task.fail("下载失败"));
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(task.error.as_deref(), Some("下载失败"));

    // 终态之后不再变化
    assert!(!task.fail("再次失败"));
    assert_eq!(task.error.as_deref(), Some("下载失败"));
    assert!(task.advance(TaskState::Uploading).is_err());
    assert!(task.advance(TaskState::Failed).is_err());
}

#[test]
fn test_running_states() {
    assert!(!TaskState::Pending.is_running());
    assert!(TaskState::Downloading.is_running());
    assert!(TaskState::Compressing.is_running());
    assert!(TaskState::Uploading.is_running());
    assert!(!TaskState::Completed.is_running());
    assert!(!TaskState::Failed.is_running());
}
