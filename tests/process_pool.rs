#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::process::Command;

use media_fix::common::process::ProcessPool;
use media_fix::downloader::error::ProcessError;

fn sh(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[tokio::test]
async fn test_stderr_split_on_carriage_return() {
    let pool = ProcessPool::new(1);
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);

    let output = pool
        .run_streaming(
            sh(r"printf 'a=1\rb=2\r\nc=3\n' >&2"),
            Duration::from_secs(5),
            move |line| sink.lock().push(line.to_string()),
        )
        .await
        .unwrap();

    assert!(output.success());
    assert_eq!(*lines.lock(), vec!["a=1", "b=2", "c=3"]);
    assert_eq!(output.stderr_tail, vec!["a=1", "b=2", "c=3"]);
}

#[tokio::test]
async fn test_failure_keeps_diagnostics() {
    let pool = ProcessPool::new(1);
    let output = pool
        .run_streaming(
            sh("echo 'bad input' >&2; exit 3"),
            Duration::from_secs(5),
            |_| {},
        )
        .await
        .unwrap();
    assert!(!output.success());
    assert_eq!(output.diagnostics(), "bad input");
}

#[tokio::test]
async fn test_timeout_kills_process() {
    let pool = ProcessPool::new(1);
    let started = Instant::now();
    let err = pool
        .run_output(sh("sleep 30"), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_limits_parallel_processes() {
    let pool = ProcessPool::new(1);
    let started = Instant::now();
    let (a, b) = tokio::join!(
        pool.run_output(sh("sleep 0.3"), Duration::from_secs(5)),
        pool.run_output(sh("sleep 0.3"), Duration::from_secs(5)),
    );
    a.unwrap();
    b.unwrap();
    // 同一时间只允许一个子进程，两次调用只能串行
    assert!(started.elapsed() >= Duration::from_millis(550));
}

#[tokio::test]
async fn test_shutdown_rejects_new_work_and_stops_running() {
    let pool = ProcessPool::new(2);
    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run_output(sh("sleep 30"), Duration::from_secs(60)).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .unwrap();
    assert!(pool.is_shut_down());
    assert!(matches!(running.await.unwrap(), Err(ProcessError::ShutDown)));

    let err = pool
        .run_output(sh("true"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::ShutDown));
}

#[tokio::test]
async fn test_missing_program() {
    let pool = ProcessPool::new(1);
    let err = pool
        .run_output(Command::new("/nonexistent/tool"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ProcessError::Spawn { .. }));
}
