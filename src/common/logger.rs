use colored::*;

use crate::downloader::models::QueueStats;

// 初始化 tracing，verbose 时输出 DEBUG
pub fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// 面向用户的控制台输出，和诊断日志分开
pub struct PrettyLogger;

impl PrettyLogger {
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    pub fn error(message: impl AsRef<str>) {
        println!("{} {}", "✗".red().bold(), message.as_ref());
    }

    /// 显示某个请求者的通知消息
    pub fn notice(target: impl AsRef<str>, text: impl AsRef<str>) {
        println!("{} {}", format!("[{}]", target.as_ref()).cyan().bold(), text.as_ref());
    }

    /// 显示状态消息（多行文本整体缩进）
    pub fn status(target: impl AsRef<str>, text: impl AsRef<str>) {
        println!("{}", format!("[{}]", target.as_ref()).bright_black());
        for line in text.as_ref().lines() {
            println!("  {}", line);
        }
    }

    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count().min(48);
        let padding = (48 - width) / 2;
        println!(
            "{} {} {}",
            "─".repeat(padding).bright_black(),
            text.bold(),
            "─".repeat(48 - padding - width).bright_black()
        );
    }

    /// 显示队列统计
    pub fn queue_summary(stats: &QueueStats) {
        Self::title("队列统计");
        println!("  已入队: {}", stats.total_queued);
        println!("  已完成: {}", stats.total_processed.to_string().green());
        println!("  失败:   {}", stats.total_failed.to_string().red());
        println!("  已压缩: {}", stats.total_compressed);
        Self::separator();
    }
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}
