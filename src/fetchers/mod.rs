pub mod bilibili;
pub mod youtube;

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::config::SettingsStore;

pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One search hit in the single shape the UI consumes, regardless of which
/// platform produced it. `duration` is passed through as-is (seconds from
/// one schema, a display string from the other).
#[derive(Debug, Clone, Serialize)]
pub struct VideoSummary {
    pub bvid: String,
    pub title: String,
    pub url: String,
    pub pic: String,
    pub author: String,
    pub duration: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub videos: Vec<VideoSummary>,
    pub total_pages: u32,
}

/// Session identity for the bilibili client. Built from the settings
/// document once at startup and handed to the constructor; the client keeps
/// it for its whole lifetime.
#[derive(Debug, Clone)]
pub struct BiliSession {
    pub cookie: String,
    pub user_agent: String,
}

impl BiliSession {
    pub fn from_settings(settings: &SettingsStore) -> Self {
        Self {
            cookie: settings.get_str("bilibiliCookies").unwrap_or_default(),
            user_agent: DESKTOP_USER_AGENT.to_string(),
        }
    }
}

/// Per-call configuration for the yt-dlp wrapper; rebuilt from settings and
/// the environment every time, never cached.
#[derive(Debug, Clone, Default)]
pub struct YtSession {
    pub cookie: String,
    pub proxy: Option<String>,
}

impl YtSession {
    pub fn from_settings(settings: &SettingsStore) -> Self {
        Self {
            cookie: settings.get_str("youtubeCookies").unwrap_or_default(),
            proxy: proxy_from_env(),
        }
    }
}

/// System proxy from the environment. yt-dlp gets socks endpoints rewritten
/// to plain http, which is what the local proxy tools here actually speak.
pub fn proxy_from_env() -> Option<String> {
    const VARS: &[&str] = &[
        "https_proxy",
        "HTTPS_PROXY",
        "http_proxy",
        "HTTP_PROXY",
        "all_proxy",
        "ALL_PROXY",
    ];
    for var in VARS {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Some(normalize_proxy(&value));
            }
        }
    }
    None
}

fn normalize_proxy(value: &str) -> String {
    value.replace("socks5://", "http://")
}

pub type ThumbnailCache = moka::future::Cache<String, String>;
pub type PreviewCache = moka::future::Cache<String, bilibili::PreviewInfo>;

/// Bounded thumbnail cache: base64 payloads keyed by video id or URL.
pub fn thumbnail_cache() -> ThumbnailCache {
    moka::future::Cache::builder()
        .max_capacity(256)
        .time_to_live(Duration::from_secs(60 * 60))
        .build()
}

/// Bounded preview cache; stream URLs go stale fast, so a short TTL.
pub fn preview_cache() -> PreviewCache {
    moka::future::Cache::builder()
        .max_capacity(64)
        .time_to_live(Duration::from_secs(10 * 60))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socks_proxies_are_rewritten_for_ytdlp() {
        assert_eq!(normalize_proxy("socks5://127.0.0.1:1080"), "http://127.0.0.1:1080");
        assert_eq!(normalize_proxy("http://127.0.0.1:7890"), "http://127.0.0.1:7890");
    }
}
