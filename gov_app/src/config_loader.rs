use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use gov_ratelimit::RateLimitConfig;
use gov_ratelimit::RateLimitTable;
use serde::Deserialize;

/// Settings shared by governance binaries
///
/// Read from an optional TOML file, then `GOV_` environment variables, with
/// `__` separating nested keys (`GOV_RATE_LIMITS__GLOBAL__REQUESTS_PER_MINUTE`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub redis_url: String,
    pub database_url: String,
    pub log_dir: String,
    pub poll_interval_ms: u64,
    pub rate_limits: RateLimitOverrides,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            database_url: "sqlite://governance.db".to_string(),
            log_dir: "logs".to_string(),
            poll_interval_ms: 100,
            rate_limits: RateLimitOverrides::default(),
        }
    }
}

impl GovernanceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Quotas layered over the standard arena presets
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitOverrides {
    pub global: Option<RateLimitConfig>,
    pub arenas: HashMap<String, RateLimitConfig>,
}

impl RateLimitOverrides {
    pub fn table(&self) -> RateLimitTable {
        let mut table = RateLimitTable::standard();
        if let Some(global) = self.global {
            table = table.with_global(global);
        }
        table.extend(self.arenas.clone());
        table
    }
}

fn environment() -> Environment {
    Environment::with_prefix("GOV").prefix_separator("_").separator("__").try_parsing(true)
}

fn build(path: Option<&Path>, environment: Environment) -> Result<GovernanceConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }
    let config = builder.add_source(environment).build()?;

    config.try_deserialize()
}

pub fn load_config(path: Option<&Path>) -> Result<GovernanceConfig, ConfigError> {
    build(path, environment())
}

/// Load config with fallback to default
pub fn load_config_or_default(path: Option<&Path>) -> GovernanceConfig {
    match load_config(path) {
        Ok(config) => {
            tracing::info!("Loaded governance config from {}", path.map_or("environment".into(), |path| path.display().to_string()));
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load governance config: {}. Using defaults.", err);
            GovernanceConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use gov_ratelimit::Window;

    use super::*;

    fn no_env() -> Environment {
        environment().source(Some(config::Map::new()))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = build(None, no_env()).unwrap();
        assert_eq!(config, GovernanceConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_file_overrides_and_table() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
redis_url = "redis://cache:6379/"
poll_interval_ms = 250

[rate_limits.global]
requests_per_minute = 5

[rate_limits.arenas.youtube]
requests_per_minute = 3
requests_per_day = 100
"#
        )
        .unwrap();

        let config = build(Some(file.path()), no_env()).unwrap();
        assert_eq!(config.redis_url, "redis://cache:6379/");
        assert_eq!(config.database_url, GovernanceConfig::default().database_url);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));

        let table = config.rate_limits.table();
        assert_eq!(table.global().requests_per_minute, 5);
        assert_eq!(table.resolve("youtube", None).limits(), vec![(Window::Minute, 3), (Window::Day, 100)]);
        // Presets not named in the file survive
        assert_eq!(table.resolve("gdelt", None).requests_per_minute, 12);
        assert_eq!(table.resolve("unknown_arena", None).requests_per_minute, 5);
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "database_url = \"sqlite://from-file.db\"").unwrap();

        let mut vars = config::Map::new();
        vars.insert("GOV_DATABASE_URL".to_string(), "sqlite://from-env.db".to_string());
        vars.insert("GOV_POLL_INTERVAL_MS".to_string(), "40".to_string());
        vars.insert("GOV_RATE_LIMITS__GLOBAL__REQUESTS_PER_MINUTE".to_string(), "7".to_string());

        let config = build(Some(file.path()), environment().source(Some(vars))).unwrap();
        assert_eq!(config.database_url, "sqlite://from-env.db");
        assert_eq!(config.poll_interval_ms, 40);
        assert_eq!(config.rate_limits.global, Some(RateLimitConfig::per_minute(7)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config_or_default(Some(Path::new("/nonexistent/governance.toml")));
        assert_eq!(config.log_dir, "logs");
    }
}
