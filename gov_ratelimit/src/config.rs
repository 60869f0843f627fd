use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::RateLimitError;
use crate::error::Result;

/// Prefix of every counter key in the coordination store
pub const KEY_PREFIX: &str = "ratelimit";

/// Key suffix used when a provider has a single credential
pub const DEFAULT_KEY_SUFFIX: &str = "default";

/// Sliding windows a provider quota can be expressed in, tightest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    pub const fn duration(self) -> Duration {
        match self {
            Window::Minute => Duration::from_secs(60),
            Window::Hour => Duration::from_secs(3_600),
            Window::Day => Duration::from_secs(86_400),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter key for one window of one credential: `ratelimit:{arena}:{provider}:{key_suffix}:{window}`
///
/// Operational tooling reads these keys directly; the layout must not change.
pub fn counter_key(arena: &str, provider: &str, key_suffix: &str, window: Window) -> String {
    format!("{KEY_PREFIX}:{arena}:{provider}:{key_suffix}:{window}")
}

/// Request quota for one provider
///
/// The minute limit is mandatory; hour and day limits are enforced only when
/// set. `burst_size` raises the minute limit and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
    pub burst_size: Option<u32>,
}

impl RateLimitConfig {
    pub const fn per_minute(requests_per_minute: u32) -> Self {
        Self { requests_per_minute, requests_per_hour: None, requests_per_day: None, burst_size: None }
    }

    pub const fn with_hourly(mut self, requests_per_hour: u32) -> Self {
        self.requests_per_hour = Some(requests_per_hour);
        self
    }

    pub const fn with_daily(mut self, requests_per_day: u32) -> Self {
        self.requests_per_day = Some(requests_per_day);
        self
    }

    pub const fn with_burst(mut self, burst_size: u32) -> Self {
        self.burst_size = Some(burst_size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(RateLimitError::InvalidConfig("requests_per_minute must be greater than 0"));
        }
        Ok(())
    }

    /// Effective limit per configured window, tightest window first
    pub fn limits(&self) -> Vec<(Window, u32)> {
        let minute = self.requests_per_minute.saturating_add(self.burst_size.unwrap_or(0));
        let mut limits = vec![(Window::Minute, minute)];

        if let Some(hour) = self.requests_per_hour {
            limits.push((Window::Hour, hour));
        }
        if let Some(day) = self.requests_per_day {
            limits.push((Window::Day, day));
        }

        limits
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_format() {
        assert_eq!(
            counter_key("youtube", "youtube_data_api", "default", Window::Minute),
            "ratelimit:youtube:youtube_data_api:default:minute"
        );
        assert_eq!(counter_key("reddit", "reddit", "account-2", Window::Day), "ratelimit:reddit:reddit:account-2:day");
    }

    #[test]
    fn test_window_durations() {
        assert_eq!(Window::Minute.duration(), Duration::from_secs(60));
        assert_eq!(Window::Hour.duration(), Duration::from_secs(3_600));
        assert_eq!(Window::Day.duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_limits_minute_only() {
        let config = RateLimitConfig::per_minute(2);
        assert_eq!(config.limits(), vec![(Window::Minute, 2)]);
    }

    #[test]
    fn test_burst_applies_to_minute_only() {
        let config = RateLimitConfig::per_minute(10).with_hourly(100).with_daily(1_000).with_burst(5);
        assert_eq!(config.limits(), vec![(Window::Minute, 15), (Window::Hour, 100), (Window::Day, 1_000)]);
    }

    #[test]
    fn test_day_without_hour() {
        let config = RateLimitConfig::per_minute(10).with_daily(50);
        assert_eq!(config.limits(), vec![(Window::Minute, 10), (Window::Day, 50)]);
    }

    #[test]
    fn test_validate() {
        assert!(RateLimitConfig::per_minute(1).validate().is_ok());
        assert!(matches!(RateLimitConfig::per_minute(0).validate(), Err(RateLimitError::InvalidConfig(_))));
    }

    #[test]
    fn test_deserialize_optional_windows() {
        let config: RateLimitConfig = toml::from_str("requests_per_minute = 30\nburst_size = 5\n").unwrap();
        assert_eq!(config, RateLimitConfig::per_minute(30).with_burst(5));
    }
}
