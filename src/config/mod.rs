//! Configuration management for `isearch`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`ISEARCH_*`)
//! 3. Project config (`./.isearch.yaml`, or `--config <path>`)
//! 4. User config (`~/.config/isearch/config.yaml`)
//! 5. Defaults
//!
//! Example YAML:
//!
//! ```yaml
//! db: /var/lib/isearch/search.db
//! lock-timeout: 5000
//! search:
//!   default-limit: 50
//!   max-limit: 500
//!   max-hits: 1000
//! ```

use crate::error::{Result, SearchError};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default database filename, relative to the working directory.
pub const DEFAULT_DB_FILENAME: &str = "isearch.db";
/// Project config filename, looked up in the working directory.
pub const PROJECT_CONFIG_FILENAME: &str = ".isearch.yaml";

const ENV_PREFIX: &str = "ISEARCH_";

const DB_KEY: &str = "db";
const LOCK_TIMEOUT_KEY: &str = "lock-timeout";
const LOG_FILE_KEY: &str = "log-file";
const DEFAULT_LIMIT_KEY: &str = "search.default-limit";
const MAX_LIMIT_KEY: &str = "search.max-limit";
const MAX_HITS_KEY: &str = "search.max-hits";

/// Alternate spellings and the key each is stored under.
const KEY_ALIASES: &[(&str, &str)] = &[
    ("database", DB_KEY),
    ("log.file", LOG_FILE_KEY),
    ("default-limit", DEFAULT_LIMIT_KEY),
    ("max-limit", MAX_LIMIT_KEY),
    ("max-hits", MAX_HITS_KEY),
];

/// One configuration source as flat `key -> value` pairs.
///
/// Keys are normalized (lowercase, `_` replaced by `-`) and aliases are
/// stored under their canonical key; nested YAML keys are joined with `.`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Merge another layer on top of this one (higher precedence wins).
    pub fn merge_from(&mut self, other: &Self) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Merge multiple layers in precedence order (lowest to highest).
    #[must_use]
    pub fn merge_layers(layers: &[Self]) -> Self {
        let mut merged = Self::default();
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Build a layer from a YAML file path. Missing files return empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        Ok(layer_from_yaml_value(&value))
    }

    /// Build a layer from `ISEARCH_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut entries = Vec::new();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                for variant in env_key_variants(stripped) {
                    entries.push((variant, value.clone()));
                }
            }
        }

        let mut layer = Self::default();
        entries.sort_by_key(|(key, _)| !is_alias(key));
        for (key, value) in entries {
            layer.insert(&key, value);
        }
        layer
    }

    /// Insert a value under its canonical key.
    pub fn insert(&mut self, key: &str, value: String) {
        self.values.insert(canonical_key(key), value);
    }

    /// Value stored under `key` or any of its aliases.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&String> {
        self.values.get(&canonical_key(key))
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SearchError::Config(format!("invalid value for {key}: '{raw}'")))
    }
}

/// CLI overrides for config loading (optional).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub lock_timeout: Option<u64>,
    pub config: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();

        if let Some(path) = &self.db {
            layer.insert(DB_KEY, path.to_string_lossy().to_string());
        }
        if let Some(lock_timeout) = self.lock_timeout {
            layer.insert(LOCK_TIMEOUT_KEY, lock_timeout.to_string());
        }
        if let Some(path) = &self.log_file {
            layer.insert(LOG_FILE_KEY, path.to_string_lossy().to_string());
        }

        layer
    }
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub db_path: PathBuf,
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_hits: usize,
    pub lock_timeout_ms: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILENAME),
            default_limit: 100,
            max_limit: 1000,
            max_hits: 1000,
            lock_timeout_ms: None,
            log_file: None,
        }
    }
}

impl SearchConfig {
    /// Read the typed configuration out of a merged layer.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value does not parse or limits are inconsistent.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let defaults = Self::default();

        let db_path = layer
            .get(DB_KEY)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map_or(defaults.db_path, PathBuf::from);
        let log_file = layer
            .get(LOG_FILE_KEY)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let config = Self {
            db_path,
            default_limit: layer
                .parse(DEFAULT_LIMIT_KEY)?
                .unwrap_or(defaults.default_limit),
            max_limit: layer.parse(MAX_LIMIT_KEY)?.unwrap_or(defaults.max_limit),
            max_hits: layer.parse(MAX_HITS_KEY)?.unwrap_or(defaults.max_hits),
            lock_timeout_ms: layer.parse(LOCK_TIMEOUT_KEY)?,
            log_file,
        };

        if config.max_limit == 0 || config.default_limit == 0 {
            return Err(SearchError::Config(
                "search limits must be at least 1".to_string(),
            ));
        }
        if config.default_limit > config.max_limit {
            return Err(SearchError::Config(format!(
                "search.default-limit ({}) exceeds search.max-limit ({})",
                config.default_limit, config.max_limit
            )));
        }
        Ok(config)
    }
}

/// Load user config (`~/.config/isearch/config.yaml`).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<ConfigLayer> {
    let Ok(home) = env::var("HOME") else {
        return Ok(ConfigLayer::default());
    };
    let path = Path::new(&home)
        .join(".config")
        .join("isearch")
        .join("config.yaml");
    ConfigLayer::from_yaml(&path)
}

/// Load project config (`--config` path, else `./.isearch.yaml`).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or an explicit
/// `--config` path does not exist.
pub fn load_project_config(explicit: Option<&Path>) -> Result<ConfigLayer> {
    match explicit {
        Some(path) if !path.exists() => Err(SearchError::Config(format!(
            "config file not found: {}",
            path.display()
        ))),
        Some(path) => ConfigLayer::from_yaml(path),
        None => ConfigLayer::from_yaml(Path::new(PROJECT_CONFIG_FILENAME)),
    }
}

/// Default config layer (lowest precedence).
#[must_use]
pub fn default_config_layer() -> ConfigLayer {
    let defaults = SearchConfig::default();
    let mut layer = ConfigLayer::default();
    layer.insert(DB_KEY, DEFAULT_DB_FILENAME.to_string());
    layer.insert(DEFAULT_LIMIT_KEY, defaults.default_limit.to_string());
    layer.insert(MAX_LIMIT_KEY, defaults.max_limit.to_string());
    layer.insert(MAX_HITS_KEY, defaults.max_hits.to_string());
    layer
}

/// Load and merge every layer in precedence order.
///
/// # Errors
///
/// Returns an error if any config file cannot be read or parsed.
pub fn load_config(cli: &CliOverrides) -> Result<ConfigLayer> {
    let defaults = default_config_layer();
    let user = load_user_config()?;
    let project = load_project_config(cli.config.as_deref())?;
    let env_layer = ConfigLayer::from_env();
    let cli_layer = cli.as_layer();

    Ok(ConfigLayer::merge_layers(&[
        defaults, user, project, env_layer, cli_layer,
    ]))
}

/// Load the typed configuration for a CLI invocation.
///
/// # Errors
///
/// Returns an error if loading fails or a value is invalid.
pub fn load_search_config(cli: &CliOverrides) -> Result<SearchConfig> {
    let layer = load_config(cli)?;
    SearchConfig::from_layer(&layer)
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}

fn canonical_key(key: &str) -> String {
    let normalized = normalize_key(key);
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map_or(normalized, |(_, canonical)| (*canonical).to_string())
}

fn is_alias(key: &str) -> bool {
    canonical_key(key) != normalize_key(key)
}

/// Candidate keys for an environment variable suffix.
///
/// `SEARCH_MAX_HITS` could mean `search-max-hits` or the nested
/// `search.max-hits`; both are recorded.
fn env_key_variants(raw: &str) -> Vec<String> {
    let raw_lower = raw.to_lowercase();
    let mut variants = vec![raw_lower.clone(), raw_lower.replace('_', ".")];
    if let Some((head, tail)) = raw_lower.split_once('_') {
        variants.push(format!("{head}.{tail}"));
    }
    variants
}

/// Parse a boolean flag value.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn layer_from_yaml_value(value: &serde_yaml::Value) -> ConfigLayer {
    let mut layer = ConfigLayer::default();
    let mut flat = HashMap::new();
    flatten_yaml(value, "", &mut flat);

    // Canonical spellings win over aliases in the same file.
    let mut entries: Vec<_> = flat.into_iter().collect();
    entries.sort_by_key(|(key, _)| !is_alias(key));
    for (key, value) in entries {
        layer.insert(&key, value);
    }

    layer
}

fn flatten_yaml(value: &serde_yaml::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                let Some(key_str) = key.as_str() else {
                    continue;
                };
                let next_prefix = if prefix.is_empty() {
                    key_str.to_string()
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(value, &next_prefix, out);
            }
        }
        serde_yaml::Value::Sequence(values) => {
            let joined = values
                .iter()
                .filter_map(yaml_scalar_to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix.to_string(), joined);
        }
        _ => {
            if let Some(value) = yaml_scalar_to_string(value) {
                out.insert(prefix.to_string(), value);
            }
        }
    }
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Bool(v) => Some(v.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Null
        | serde_yaml::Value::Sequence(_)
        | serde_yaml::Value::Mapping(_) => None,
        serde_yaml::Value::Tagged(tagged) => yaml_scalar_to_string(&tagged.value),
    }
}
