// src/config/app.rs
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

pub const DEFAULT_CONFIG_PATH: &str = "config/newsdesk.toml";
pub const ENV_CONFIG_PATH: &str = "NEWSDESK_CONFIG";

fn default_monitor_interval() -> u64 {
    60
}
fn default_schedule_tick() -> u64 {
    20
}
fn default_dispatch_timeout() -> u64 {
    30
}
fn default_catalog_path() -> Option<String> {
    Some("state/catalog.json".to_string())
}

/// Process settings. Precedence: built-in defaults < TOML file < `NEWSDESK_*` env vars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds between threshold checks (appends also wake the monitor).
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_schedule_tick")]
    pub schedule_tick_secs: u64,
    /// Upper bound on a single channel send.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout_secs: u64,
    /// JSON snapshot of channels/templates/tasks. `None` keeps the catalog in memory.
    #[serde(default = "default_catalog_path")]
    pub catalog_path: Option<String>,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval(),
            schedule_tick_secs: default_schedule_tick(),
            dispatch_timeout_secs: default_dispatch_timeout(),
            catalog_path: default_catalog_path(),
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load from `NEWSDESK_CONFIG` (or `config/newsdesk.toml`) when present, then apply env overrides.
    /// A missing default file is fine; a missing file that was asked for explicitly is an error.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut cfg = match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?,
            Err(e) if explicit.is_some() => {
                anyhow::bail!("failed to read config at {}: {e}", path.display())
            }
            Err(_) => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg.sanitized())
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str::<Self>(toml_str)?.sanitized())
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_u64("NEWSDESK_MONITOR_INTERVAL_SECS") {
            self.monitor_interval_secs = v;
        }
        if let Some(v) = env_u64("NEWSDESK_SCHEDULE_TICK_SECS") {
            self.schedule_tick_secs = v;
        }
        if let Some(v) = env_u64("NEWSDESK_DISPATCH_TIMEOUT_SECS") {
            self.dispatch_timeout_secs = v;
        }
        if let Ok(p) = std::env::var("NEWSDESK_CATALOG_PATH") {
            // empty string disables persistence
            self.catalog_path = Some(p).filter(|p| !p.trim().is_empty());
        }
        if let Ok(v) = std::env::var("NEWSDESK_LOG_JSON") {
            self.log_json = v.trim() == "1" || v.trim().eq_ignore_ascii_case("true");
        }
    }

    /// Zero intervals would spin; clamp them to at least one second.
    fn sanitized(mut self) -> Self {
        self.monitor_interval_secs = self.monitor_interval_secs.max(1);
        self.schedule_tick_secs = self.schedule_tick_secs.max(1);
        self.dispatch_timeout_secs = self.dispatch_timeout_secs.max(1);
        self
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 6] = [
        ENV_CONFIG_PATH,
        "NEWSDESK_MONITOR_INTERVAL_SECS",
        "NEWSDESK_SCHEDULE_TICK_SECS",
        "NEWSDESK_DISPATCH_TIMEOUT_SECS",
        "NEWSDESK_CATALOG_PATH",
        "NEWSDESK_LOG_JSON",
    ];

    fn clear_env() {
        for k in VARS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn toml_fills_missing_fields_with_defaults() {
        let cfg = AppConfig::from_toml_str("dispatch_timeout_secs = 5\ncatalog_path = \"x.json\"").unwrap();
        assert_eq!(cfg.dispatch_timeout_secs, 5);
        assert_eq!(cfg.monitor_interval_secs, 60);
        assert_eq!(cfg.catalog_path.as_deref(), Some("x.json"));
    }

    #[test]
    fn zero_intervals_are_clamped() {
        let cfg = AppConfig::from_toml_str("schedule_tick_secs = 0").unwrap();
        assert_eq!(cfg.schedule_tick_secs, 1);
    }

    #[test]
    #[serial]
    fn env_overrides_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newsdesk.toml");
        fs::write(&path, "monitor_interval_secs = 90\nschedule_tick_secs = 10\n").unwrap();

        std::env::set_var(ENV_CONFIG_PATH, &path);
        std::env::set_var("NEWSDESK_MONITOR_INTERVAL_SECS", "15");
        std::env::set_var("NEWSDESK_CATALOG_PATH", "");
        std::env::set_var("NEWSDESK_LOG_JSON", "1");

        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.monitor_interval_secs, 15);
        assert_eq!(cfg.schedule_tick_secs, 10);
        assert_eq!(cfg.catalog_path, None);
        assert!(cfg.log_json);
        clear_env();
    }

    #[test]
    #[serial]
    fn explicit_missing_file_is_an_error() {
        clear_env();
        std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
        assert!(AppConfig::load().is_err());
        clear_env();
    }
}
