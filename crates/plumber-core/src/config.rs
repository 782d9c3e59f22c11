//! Layered runtime configuration (SPEC_FULL.md ambient stack). Grounded on
//! the teacher's `configuration::source::ConfigurationSource` layer model
//! (`spark-core/src/configuration/source.rs`), simplified to Plumber's
//! needs: a handful of scalar scheduler/listener settings rather than a
//! full hot-reloading configuration service.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{codes, ErrorCategory, PlumberError, Result};

/// One layer of raw string key/value entries plus the priority it merges
/// at (higher wins). Mirrors `ConfigurationLayer` without the watch/delta
/// machinery Plumber doesn't need.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    pub source_name: String,
    pub priority: u16,
    pub entries: BTreeMap<String, String>,
}

/// A configuration backend (env, a TOML file, ...). Object-safe so
/// [`LayeredConfig`] can hold a heterogeneous list of sources.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ConfigLayer>;
}

/// Reads every `PLUMBER_*` environment variable, stripping the prefix and
/// lower-casing the remainder with `_` kept as the key separator (e.g.
/// `PLUMBER_WORKER_THREADS=8` becomes key `worker_threads`).
pub struct EnvSource {
    prefix: &'static str,
    priority: u16,
}

impl EnvSource {
    pub fn new(prefix: &'static str, priority: u16) -> Self {
        Self { prefix, priority }
    }
}

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<ConfigLayer> {
        let mut entries = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(self.prefix) {
                entries.insert(stripped.to_lowercase(), value);
            }
        }
        Ok(ConfigLayer {
            source_name: format!("env:{}", self.prefix),
            priority: self.priority,
            entries,
        })
    }
}

/// A TOML file of flat scalar settings, e.g.
/// ```toml
/// worker_threads = "8"
/// equeue_capacity = "4096"
/// ```
pub struct TomlFileSource {
    path: std::path::PathBuf,
    priority: u16,
}

impl TomlFileSource {
    pub fn new(path: impl AsRef<Path>, priority: u16) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            priority,
        }
    }
}

impl ConfigSource for TomlFileSource {
    fn load(&self) -> Result<ConfigLayer> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            PlumberError::new(
                codes::USAGE_INVALID_ARGUMENT,
                ErrorCategory::Usage,
                format!("reading config file {}: {e}", self.path.display()),
            )
        })?;
        let table: toml::Table = toml::from_str(&text).map_err(|e| {
            PlumberError::new(
                codes::USAGE_INVALID_ARGUMENT,
                ErrorCategory::Usage,
                format!("parsing config file {}: {e}", self.path.display()),
            )
        })?;
        let mut entries = BTreeMap::new();
        for (key, value) in table {
            let rendered = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            entries.insert(key, rendered);
        }
        Ok(ConfigLayer {
            source_name: format!("file:{}", self.path.display()),
            priority: self.priority,
            entries,
        })
    }
}

/// Merges configuration layers highest-priority-wins (spec.md's scheduler
/// tunables plus listener address, per SPEC_FULL.md's ambient-stack table).
#[derive(Default)]
pub struct LayeredConfig {
    merged: BTreeMap<String, String>,
    layer_names: Vec<String>,
}

impl LayeredConfig {
    /// Loads every source, sorts by ascending priority so later (higher
    /// priority) layers overwrite earlier ones on key collision.
    pub fn load(sources: &[Box<dyn ConfigSource>]) -> Result<Self> {
        let mut layers: Vec<ConfigLayer> = sources.iter().map(|s| s.load()).collect::<Result<_>>()?;
        layers.sort_by_key(|l| l.priority);
        let mut merged = BTreeMap::new();
        let mut layer_names = Vec::new();
        for layer in layers {
            layer_names.push(layer.source_name);
            merged.extend(layer.entries);
        }
        Ok(Self { merged, layer_names })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.merged.get(key).map(String::as_str)
    }

    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| PlumberError::usage(format!("config key {key:?}: {e}"))),
        }
    }

    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ConfigLayer);
    impl ConfigSource for Fixed {
        fn load(&self) -> Result<ConfigLayer> {
            Ok(self.0.clone())
        }
    }

    fn layer(name: &str, priority: u16, entries: &[(&str, &str)]) -> ConfigLayer {
        ConfigLayer {
            source_name: name.to_string(),
            priority,
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn higher_priority_layer_overrides_lower() {
        let sources: Vec<Box<dyn ConfigSource>> = vec![
            Box::new(Fixed(layer("base", 0, &[("worker_threads", "4")]))),
            Box::new(Fixed(layer("override", 10, &[("worker_threads", "8")]))),
        ];
        let config = LayeredConfig::load(&sources).unwrap();
        assert_eq!(config.get("worker_threads"), Some("8"));
    }

    #[test]
    fn get_parsed_reports_a_usage_error_on_bad_input() {
        let sources: Vec<Box<dyn ConfigSource>> =
            vec![Box::new(Fixed(layer("base", 0, &[("worker_threads", "nope")])))];
        let config = LayeredConfig::load(&sources).unwrap();
        let err = config.get_parsed::<u32>("worker_threads").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Usage);
    }
}
