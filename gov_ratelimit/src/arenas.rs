//! Default request quotas per arena
//!
//! Collectors pass an explicit [`RateLimitConfig`] only when a credential has
//! a non-standard quota. Otherwise the arena's entry in this table applies,
//! and arenas without an entry fall back to the global default.
//!
//! The presets sit below each provider's published quota so that several
//! workers sharing one credential stay inside it.

use std::collections::HashMap;

use crate::config::RateLimitConfig;

/// Arena name → default quota, plus one global fallback
#[derive(Debug, Clone)]
pub struct RateLimitTable {
    global: RateLimitConfig,
    arenas: HashMap<String, RateLimitConfig>,
}

impl RateLimitTable {
    /// Empty table where every arena uses `global`
    pub fn new(global: RateLimitConfig) -> Self {
        Self { global, arenas: HashMap::new() }
    }

    /// Table preloaded with the standard arena presets
    pub fn standard() -> Self {
        Self::new(RateLimitConfig::default())
            // Custom Search JSON API: 100 queries per 100 seconds, 10k per day
            .with_arena("google_search", RateLimitConfig::per_minute(60).with_daily(10_000))
            // Data API quota is 10k units per day; a search costs 100 units
            .with_arena("youtube", RateLimitConfig::per_minute(30).with_hourly(1_000).with_daily(10_000))
            // 100 queries per minute per OAuth client
            .with_arena("reddit", RateLimitConfig::per_minute(90).with_burst(10))
            // 3000 requests per 5 minutes per IP
            .with_arena("bluesky", RateLimitConfig::per_minute(500).with_hourly(30_000))
            .with_arena("telegram", RateLimitConfig::per_minute(20).with_burst(5))
            // Research API: 1000 requests per day
            .with_arena("tiktok", RateLimitConfig::per_minute(10).with_daily(1_000))
            .with_arena("x_twitter", RateLimitConfig::per_minute(50).with_hourly(1_500))
            .with_arena("gdelt", RateLimitConfig::per_minute(12))
            .with_arena("event_registry", RateLimitConfig::per_minute(20).with_daily(2_000))
            .with_arena("rss_feeds", RateLimitConfig::per_minute(120).with_burst(30))
    }

    pub fn with_arena(mut self, arena: impl Into<String>, config: RateLimitConfig) -> Self {
        self.arenas.insert(arena.into(), config);
        self
    }

    /// Replace the global default
    pub fn with_global(mut self, global: RateLimitConfig) -> Self {
        self.global = global;
        self
    }

    /// Merge arena entries over the existing ones
    pub fn extend(&mut self, overrides: impl IntoIterator<Item = (String, RateLimitConfig)>) {
        self.arenas.extend(overrides);
    }

    /// Resolve the quota for one call: explicit override, then arena default, then global default
    pub fn resolve(&self, arena: &str, override_config: Option<&RateLimitConfig>) -> RateLimitConfig {
        override_config.or_else(|| self.arenas.get(arena)).copied().unwrap_or(self.global)
    }

    pub fn global(&self) -> &RateLimitConfig {
        &self.global
    }

    pub fn arena(&self, arena: &str) -> Option<&RateLimitConfig> {
        self.arenas.get(arena)
    }

    pub fn arena_names(&self) -> impl Iterator<Item = &str> {
        self.arenas.keys().map(String::as_str)
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_precedence() {
        let table = RateLimitTable::new(RateLimitConfig::per_minute(60)).with_arena("youtube", RateLimitConfig::per_minute(30));
        let explicit = RateLimitConfig::per_minute(5);

        assert_eq!(table.resolve("youtube", Some(&explicit)), explicit);
        assert_eq!(table.resolve("youtube", None), RateLimitConfig::per_minute(30));
        assert_eq!(table.resolve("unknown_arena", None), RateLimitConfig::per_minute(60));
    }

    #[test]
    fn test_standard_presets_are_valid() {
        let table = RateLimitTable::standard();

        assert!(table.global().validate().is_ok());
        for name in table.arena_names() {
            let config = table.arena(name).unwrap();
            assert!(config.validate().is_ok(), "invalid preset for {name}");
        }
    }

    #[test]
    fn test_extend_overrides_presets() {
        let mut table = RateLimitTable::standard();
        table.extend([("youtube".to_string(), RateLimitConfig::per_minute(1)), ("new_arena".to_string(), RateLimitConfig::per_minute(2))]);

        assert_eq!(table.resolve("youtube", None), RateLimitConfig::per_minute(1));
        assert_eq!(table.resolve("new_arena", None), RateLimitConfig::per_minute(2));
        assert!(table.arena("reddit").is_some());
    }

    #[test]
    fn test_with_global() {
        let table = RateLimitTable::new(RateLimitConfig::default()).with_global(RateLimitConfig::per_minute(7));
        assert_eq!(table.resolve("anything", None).requests_per_minute, 7);
    }
}
