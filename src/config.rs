//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::taxonomy::EnvironmentMode;

/// Service configuration, read from `BOOKFINDER_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Controls how much failure detail reaches clients.
    pub environment: EnvironmentMode,
    /// Generation tasks allowed to run at once.
    pub max_parallel: usize,
    /// Streams are rejected with `QUEUE_BUSY` once this many tasks are pending.
    pub queue_threshold: usize,
    /// Priority assigned to stream requests (1 = served first).
    pub priority: i32,
    /// Use the local preview generator.
    pub preview_generator: bool,
    /// JSON file seeding the in-memory catalog.
    pub catalog_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            environment: EnvironmentMode::Production,
            max_parallel: 2,
            queue_threshold: 5,
            priority: 5,
            preview_generator: false,
            catalog_path: None,
        }
    }
}

impl AppConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = parse_or(var("BOOKFINDER_PORT"), "BOOKFINDER_PORT", defaults.port)?;

        let max_parallel = parse_or(
            var("BOOKFINDER_AI_MAX_PARALLEL"),
            "BOOKFINDER_AI_MAX_PARALLEL",
            defaults.max_parallel,
        )?;
        if max_parallel == 0 {
            return Err(ConfigError::invalid("BOOKFINDER_AI_MAX_PARALLEL", "must be at least 1"));
        }

        let queue_threshold = parse_or(
            var("BOOKFINDER_AI_QUEUE_THRESHOLD"),
            "BOOKFINDER_AI_QUEUE_THRESHOLD",
            defaults.queue_threshold,
        )?;

        let priority: i64 = parse_or(
            var("BOOKFINDER_AI_PRIORITY"),
            "BOOKFINDER_AI_PRIORITY",
            defaults.priority as i64,
        )?;

        let preview_generator = match var("BOOKFINDER_AI_PREVIEW") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid("BOOKFINDER_AI_PREVIEW", format!("not a boolean: {raw:?}"))
            })?,
            None => defaults.preview_generator,
        };

        Ok(Self {
            port,
            environment: EnvironmentMode::parse(lookup("BOOKFINDER_ENV").as_deref()),
            max_parallel,
            queue_threshold,
            priority: crate::queue::clamp_priority(priority),
            preview_generator,
            catalog_path: var("BOOKFINDER_CATALOG_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.environment, EnvironmentMode::Production);
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.queue_threshold, 5);
        assert_eq!(config.priority, 5);
        assert!(!config.preview_generator);
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("BOOKFINDER_PORT", "9000"),
            ("BOOKFINDER_ENV", "development"),
            ("BOOKFINDER_AI_MAX_PARALLEL", " 4 "),
            ("BOOKFINDER_AI_QUEUE_THRESHOLD", "10"),
            ("BOOKFINDER_AI_PREVIEW", "yes"),
            ("BOOKFINDER_CATALOG_PATH", "/data/books.json"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.environment, EnvironmentMode::Development);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.queue_threshold, 10);
        assert!(config.preview_generator);
        assert_eq!(config.catalog_path, Some(PathBuf::from("/data/books.json")));
    }

    #[test]
    fn priority_is_clamped() {
        assert_eq!(config(&[("BOOKFINDER_AI_PRIORITY", "0")]).unwrap().priority, 1);
        assert_eq!(config(&[("BOOKFINDER_AI_PRIORITY", "99")]).unwrap().priority, 10);
    }

    #[test]
    fn rejects_invalid_values() {
        for (key, value) in [
            ("BOOKFINDER_PORT", "eighty"),
            ("BOOKFINDER_AI_MAX_PARALLEL", "0"),
            ("BOOKFINDER_AI_QUEUE_THRESHOLD", "-1"),
            ("BOOKFINDER_AI_PREVIEW", "maybe"),
        ] {
            let err = config(&[(key, value)]).unwrap_err();
            match err {
                ConfigError::InvalidValue { key: k, .. } => assert_eq!(k, key),
            }
        }
    }
}
