use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref TWITTER_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(https?://(?:www\.)?twitter\.com/\w+/status/\d+(?:\?\S*)?)").unwrap(),
        Regex::new(r"(https?://(?:www\.)?x\.com/\w+/status/\d+(?:\?\S*)?)").unwrap(),
        Regex::new(r"(https?://mobile\.twitter\.com/\w+/status/\d+(?:\?\S*)?)").unwrap(),
        Regex::new(r"(https?://t\.co/\w+)").unwrap(),
        Regex::new(r"(https?://(?:www\.)?twitter\.com/i/videos/\d+)").unwrap(),
        Regex::new(r"(https?://(?:www\.)?x\.com/i/videos/\d+)").unwrap(),
    ];
    static ref YOUTUBE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(https?://(?:www\.)?youtube\.com/watch\?v=[\w-]+(?:[&?][\w=%-]*)*)").unwrap(),
        Regex::new(r"(https?://youtu\.be/[\w-]+(?:\?[\w=%-]*)*)").unwrap(),
        Regex::new(r"(https?://(?:www\.)?youtube\.com/shorts/[\w-]+(?:\?[\w=%-]*)*)").unwrap(),
        Regex::new(r"(https?://m\.youtube\.com/watch\?v=[\w-]+(?:[&?][\w=%-]*)*)").unwrap(),
    ];
}

// 支持的站点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Twitter,
    Youtube,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Twitter => "Twitter",
            Service::Youtube => "YouTube",
        }
    }

    fn patterns(&self) -> &'static [Regex] {
        match self {
            Service::Twitter => TWITTER_PATTERNS.as_slice(),
            Service::Youtube => YOUTUBE_PATTERNS.as_slice(),
        }
    }

    // 从文本中提取该站点的链接
    pub fn extract_url(&self, text: &str) -> Option<String> {
        let url = self
            .patterns()
            .iter()
            .find_map(|pattern| pattern.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())?;

        match self {
            // 去掉追踪参数
            Service::Twitter => Some(strip_query(&url)),
            Service::Youtube => Some(url),
        }
    }
}

fn strip_query(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

// 按固定优先级依次尝试各站点
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self {
            services: vec![Service::Twitter, Service::Youtube],
        }
    }
}

impl ServiceRegistry {
    pub fn find(&self, text: &str) -> Option<(Service, String)> {
        let found = self
            .services
            .iter()
            .find_map(|service| service.extract_url(text).map(|url| (*service, url)));
        if let Some((service, url)) = &found {
            debug!("检测到 {} 链接: {}", service.name(), url);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_twitter_tracking_params() {
        let registry = ServiceRegistry::default();
        let (service, url) = registry
            .find("看看这个 https://x.com/someone/status/123456?s=20&t=abc 哈哈")
            .unwrap();
        assert_eq!(service, Service::Twitter);
        assert_eq!(url, "https://x.com/someone/status/123456");
    }

    #[test]
    fn detects_youtube_links() {
        let registry = ServiceRegistry::default();
        let (service, url) = registry.find("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(service, Service::Youtube);
        assert_eq!(url, "https://youtu.be/dQw4w9WgXcQ");
        assert!(registry.find("https://example.com/video.mp4").is_none());
    }
}
