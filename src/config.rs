use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub mod env_vars {
    /// Data directory override
    pub const DATA_DIR: &str = "DEVNOTE_DATA_DIR";
    /// Log filter directive, e.g. `devnote_sync=debug`
    pub const LOG: &str = "DEVNOTE_LOG";
    /// Watcher debounce window in milliseconds
    pub const WATCH_DEBOUNCE_MS: &str = "DEVNOTE_WATCH_DEBOUNCE_MS";
}

const APP_DIR_NAME: &str = "DevNote";
pub const DEFAULT_LOG_FILTER: &str = "devnote_sync=info";
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

// Runtime configuration, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub watch_debounce: Duration,
    pub log_filter: String,
}

impl AppConfig {
    /// Defaults for everything except the data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            watch_debounce: DEFAULT_WATCH_DEBOUNCE,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = lookup(env_vars::DATA_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let watch_debounce = match lookup(env_vars::WATCH_DEBOUNCE_MS) {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().with_context(|| {
                    format!("{} must be a number of milliseconds, got '{}'", env_vars::WATCH_DEBOUNCE_MS, raw)
                })?;
                Duration::from_millis(ms)
            }
            None => DEFAULT_WATCH_DEBOUNCE,
        };

        let log_filter = lookup(env_vars::LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            data_dir,
            watch_debounce,
            log_filter,
        })
    }
}

// <platform data dir>/DevNote, or ./data when there is no such dir
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve_with(&[]).unwrap();
        assert_eq!(config.watch_debounce, Duration::from_millis(500));
        assert_eq!(config.log_filter, "devnote_sync=info");
        assert!(config.data_dir.ends_with("DevNote") || config.data_dir == PathBuf::from("data"));
    }

    #[test]
    fn test_overrides() {
        let config = resolve_with(&[
            ("DEVNOTE_DATA_DIR", "/tmp/notes-here"),
            ("DEVNOTE_LOG", "debug"),
            ("DEVNOTE_WATCH_DEBOUNCE_MS", " 250 "),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/notes-here"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.watch_debounce, Duration::from_millis(250));
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = resolve_with(&[("DEVNOTE_LOG", "  ")]).unwrap();
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_bad_debounce_is_an_error() {
        let err = resolve_with(&[("DEVNOTE_WATCH_DEBOUNCE_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("DEVNOTE_WATCH_DEBOUNCE_MS"));
    }

    #[test]
    fn test_with_data_dir() {
        let config = AppConfig::with_data_dir("/x");
        assert_eq!(config.data_dir, PathBuf::from("/x"));
        assert_eq!(config.watch_debounce, DEFAULT_WATCH_DEBOUNCE);
    }
}
