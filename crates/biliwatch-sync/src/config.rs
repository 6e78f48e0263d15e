//! Environment-driven runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub webdriver_url: String,
    pub home_url: String,
    pub api_base: String,
    pub video_url_base: String,
    /// Catalog cap per cycle; also the upper bound handed to manual triggers.
    pub max_videos: usize,
    /// Catalog cycle spacing. The online-count cycle interval is fixed.
    pub interval_minutes: u64,
    /// Pause between per-video detail fetches inside a catalog cycle.
    pub detail_delay: Duration,
    /// Pause between per-video samples inside an online-count cycle.
    pub online_delay: Duration,
    pub headless: bool,
    /// Optional JSON file with the main-zone → sub-zone-id table.
    pub zone_table_path: Option<PathBuf>,
    pub listen_addr: String,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://videos.db".to_string()),
            webdriver_url: std::env::var("BILIWATCH_WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9515".to_string()),
            home_url: std::env::var("BILIWATCH_HOME_URL")
                .unwrap_or_else(|_| "https://www.bilibili.com/".to_string()),
            api_base: std::env::var("BILIWATCH_API_BASE")
                .unwrap_or_else(|_| "https://api.bilibili.com".to_string()),
            video_url_base: std::env::var("BILIWATCH_VIDEO_URL_BASE")
                .unwrap_or_else(|_| "https://www.bilibili.com/video".to_string()),
            max_videos: std::env::var("BILIWATCH_MAX_VIDEOS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            interval_minutes: std::env::var("BILIWATCH_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            detail_delay: Duration::from_millis(
                std::env::var("BILIWATCH_DETAIL_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(500),
            ),
            online_delay: Duration::from_millis(
                std::env::var("BILIWATCH_ONLINE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1000),
            ),
            headless: std::env::var("BILIWATCH_HEADLESS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            zone_table_path: std::env::var("BILIWATCH_ZONES").ok().map(PathBuf::from),
            listen_addr: std::env::var("BILIWATCH_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://videos.db".to_string(),
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            home_url: "https://www.bilibili.com/".to_string(),
            api_base: "https://api.bilibili.com".to_string(),
            video_url_base: "https://www.bilibili.com/video".to_string(),
            max_videos: 100,
            interval_minutes: 60,
            detail_delay: Duration::from_millis(500),
            online_delay: Duration::from_millis(1000),
            headless: true,
            zone_table_path: None,
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}
