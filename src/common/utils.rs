use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TIME_PATTERN: Regex = Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").unwrap();
    static ref SPEED_PATTERN: Regex = Regex::new(r"speed=\s*([\d.]+)x").unwrap();
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref URL_PATTERN: Regex = Regex::new(r"https?://\S+").unwrap();
}

// 从 ffmpeg 输出中提取 time=HH:MM:SS.ss，返回秒数
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let caps = TIME_PATTERN.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

// 从 ffmpeg 输出中提取 speed=1.5x
pub fn parse_speed_marker(line: &str) -> Option<String> {
    SPEED_PATTERN
        .captures(line)
        .map(|caps| format!("{}x", &caps[1]))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return String::new();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

// 秒数 -> 1h02m03s / 1m05s / 42s
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return String::new();
    }
    let total = seconds.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

// 生成安全的文件名: 标题_ID
pub fn sanitize_filename(title: &str, id: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(title, "");
    let truncated: String = cleaned.chars().take(50).collect();
    let stem = truncated.trim().replace(' ', "_");
    match (stem.is_empty(), id.is_empty()) {
        (true, true) => "video".to_string(),
        (true, false) => id.to_string(),
        (false, true) => stem,
        (false, false) => format!("{}_{}", stem, id),
    }
}

// 去掉标题里的链接并截断到 max_chars
pub fn clean_title(title: &str, max_chars: usize) -> String {
    let without_urls = URL_PATTERN.replace_all(title, "");
    without_urls.trim().chars().take(max_chars).collect::<String>().trim().to_string()
}
