use std::ops::RangeInclusive;
use std::time::Duration;

use shared_types::Rect;

use crate::drafts::AutoOpenPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Origin serving both the chat stream and the persistence API
    pub api_base_url: String,
    /// Static bearer token; `None` sends requests without credentials
    pub api_token: Option<String>,
    /// Path of the chat stream endpoint
    pub chat_path: String,
    /// Transport connection timeout
    pub connect_timeout: Duration,
    /// Debounce applied to document content saves
    pub save_debounce: Duration,
    /// Send a greeting request when a session opens with no messages
    pub auto_greeting: bool,
    /// Draft length band whose first crossing opens the artifact overlay
    pub overlay_open_band: RangeInclusive<usize>,
    /// Drafts finishing at or below this length open the overlay centered
    pub overlay_short_max: usize,
    /// Guard against corrupt parent chains when rebuilding the active path
    pub max_thread_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            api_token: None,
            chat_path: "/api/chat".to_string(),
            connect_timeout: Duration::from_secs(30),
            save_debounce: Duration::from_millis(2000),
            auto_greeting: false,
            overlay_open_band: 400..=450,
            overlay_short_max: 200,
            max_thread_depth: 10_000,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            api_base_url: env_str("MENTOR_API_BASE_URL", &defaults.api_base_url),
            api_token: std::env::var("MENTOR_API_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            chat_path: env_str("MENTOR_CHAT_PATH", &defaults.chat_path),
            connect_timeout: Duration::from_secs(env_parse("MENTOR_CONNECT_TIMEOUT_SECS", 30)?),
            save_debounce: Duration::from_millis(env_parse("MENTOR_SAVE_DEBOUNCE_MS", 2000)?),
            auto_greeting: env_bool("MENTOR_AUTO_GREETING", defaults.auto_greeting),
            overlay_open_band: env_band("MENTOR_OVERLAY_OPEN_BAND", defaults.overlay_open_band)?,
            overlay_short_max: env_parse("MENTOR_OVERLAY_SHORT_MAX", defaults.overlay_short_max)?,
            max_thread_depth: env_parse("MENTOR_MAX_THREAD_DEPTH", defaults.max_thread_depth)?,
        })
    }

    pub fn chat_url(&self) -> String {
        format!(
            "{}{}",
            self.api_base_url.trim_end_matches('/'),
            self.chat_path
        )
    }

    pub fn auto_open_policy(&self, viewport: Rect) -> AutoOpenPolicy {
        AutoOpenPolicy {
            open_band: self.overlay_open_band.clone(),
            short_max: self.overlay_short_max,
            viewport,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_band(key: &str, default: RangeInclusive<usize>) -> anyhow::Result<RangeInclusive<usize>> {
    match std::env::var(key) {
        Ok(val) => parse_band(&val)
            .ok_or_else(|| anyhow::anyhow!("Failed to parse env var {key}={val}: expected LOW-HIGH")),
        Err(_) => Ok(default),
    }
}

fn parse_band(raw: &str) -> Option<RangeInclusive<usize>> {
    let (low, high) = raw.split_once('-')?;
    let low = low.trim().parse::<usize>().ok()?;
    let high = high.trim().parse::<usize>().ok()?;
    (low <= high).then_some(low..=high)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_band_accepts_low_high() {
        assert_eq!(parse_band("400-450"), Some(400..=450));
        assert_eq!(parse_band(" 10 - 20 "), Some(10..=20));
    }

    #[test]
    fn parse_band_rejects_inverted_or_garbage() {
        assert_eq!(parse_band("450-400"), None);
        assert_eq!(parse_band("abc"), None);
        assert_eq!(parse_band("1-"), None);
    }

    #[test]
    fn chat_url_joins_without_double_slash() {
        let config = Config {
            api_base_url: "http://example.test/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.chat_url(), "http://example.test/api/chat");
    }
}
