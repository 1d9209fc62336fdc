//! Layered configuration: `defaults -> file -> env`, merged over
//! `serde_json::Value` layer by layer, then validated eagerly into a typed
//! `RuntimeConfig`. Nothing
//! here silently defaults a critical field — an invalid `unknownPricingMode`
//! or a negative retry multiplier fails at load, not at first use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPricingMode {
    Warn,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingEntry {
    pub prompt_cost_per_1k: f64,
    pub completion_cost_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEstimatorConfig {
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for TokenEstimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_token: default_chars_per_token(),
        }
    }
}

fn default_chars_per_token() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetDefaults {
    /// 0 means unlimited (remaining = +inf), per spec.
    #[serde(default)]
    pub max_cost_per_run: f64,
    #[serde(default)]
    pub max_cost_per_session: f64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default)]
    pub unknown_pricing_mode: UnknownPricingMode,
}

impl Default for UnknownPricingMode {
    fn default() -> Self {
        UnknownPricingMode::Warn
    }
}

impl Default for BudgetDefaults {
    fn default() -> Self {
        Self {
            max_cost_per_run: 0.0,
            max_cost_per_session: 0.0,
            warning_threshold: default_warning_threshold(),
            unknown_pricing_mode: UnknownPricingMode::default(),
        }
    }
}

fn default_warning_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDefaults {
    #[serde(default = "default_max_events_per_scope")]
    pub max_events_per_scope: usize,
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
    #[serde(default = "default_pinned_fraction")]
    pub pinned_fraction: f64,
}

impl Default for MemoryDefaults {
    fn default() -> Self {
        Self {
            max_events_per_scope: default_max_events_per_scope(),
            compaction_threshold: default_compaction_threshold(),
            pinned_fraction: default_pinned_fraction(),
        }
    }
}

fn default_max_events_per_scope() -> usize {
    500
}
fn default_compaction_threshold() -> usize {
    400
}
fn default_pinned_fraction() -> f64 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefaults {
    pub default_provider_id: Option<String>,
    pub default_model_id: Option<String>,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            default_provider_id: None,
            default_model_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub token_estimator: TokenEstimatorConfig,
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub budget: BudgetDefaults,
    #[serde(default)]
    pub memory: MemoryDefaults,
    #[serde(default)]
    pub provider_defaults: ProviderDefaults,
    #[serde(default)]
    pub pricing_registry: HashMap<String, PricingEntry>,
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_estimator.chars_per_token == 0 {
            return Err(ConfigError::Invalid(
                "token_estimator.chars_per_token must be > 0".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be >= 1".to_string(),
            ));
        }
        if self.budget.warning_threshold < 0.0 || self.budget.warning_threshold > 1.0 {
            return Err(ConfigError::Invalid(
                "budget.warning_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.memory.pinned_fraction < 0.0 || self.memory.pinned_fraction > 1.0 {
            return Err(ConfigError::Invalid(
                "memory.pinned_fraction must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pricing_key(provider_id: &str, model_id: &str) -> String {
        format!("{provider_id}:{model_id}")
    }
}

/// Builds a `RuntimeConfig` by merging defaults, an optional JSON file, and
/// `WAYPOINT_`-prefixed environment overrides, validating the result.
pub struct ConfigLoader {
    file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { file_path: None }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub async fn load(&self) -> Result<RuntimeConfig, ConfigError> {
        let mut merged = serde_json::to_value(RuntimeConfig::default())
            .expect("RuntimeConfig default always serializes");

        if let Some(path) = &self.file_path {
            if let Some(file_value) = read_file_layer(path).await? {
                deep_merge(&mut merged, &file_value);
            }
        }

        let env_value = env_layer();
        deep_merge(&mut merged, &env_value);

        let config: RuntimeConfig = serde_json::from_value(merged).map_err(|e| {
            ConfigError::Invalid(format!("merged configuration does not match shape: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_file_layer(path: &Path) -> Result<Option<Value>, ConfigError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

fn env_layer() -> Value {
    let mut root = Map::new();
    if let Ok(v) = std::env::var("WAYPOINT_MAX_COST_PER_RUN") {
        if let Ok(v) = v.parse::<f64>() {
            insert_path(&mut root, &["budget", "max_cost_per_run"], Value::from(v));
        }
    }
    if let Ok(v) = std::env::var("WAYPOINT_MAX_COST_PER_SESSION") {
        if let Ok(v) = v.parse::<f64>() {
            insert_path(
                &mut root,
                &["budget", "max_cost_per_session"],
                Value::from(v),
            );
        }
    }
    if let Ok(v) = std::env::var("WAYPOINT_UNKNOWN_PRICING_MODE") {
        insert_path(
            &mut root,
            &["budget", "unknown_pricing_mode"],
            Value::from(v.to_lowercase()),
        );
    }
    if let Ok(v) = std::env::var("WAYPOINT_DEFAULT_PROVIDER_ID") {
        insert_path(
            &mut root,
            &["provider_defaults", "default_provider_id"],
            Value::from(v),
        );
    }
    if let Ok(v) = std::env::var("WAYPOINT_DEFAULT_MODEL_ID") {
        insert_path(
            &mut root,
            &["provider_defaults", "default_model_id"],
            Value::from(v),
        );
    }
    Value::Object(root)
}

fn insert_path(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    match path {
        [] => {}
        [last] => {
            root.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = root
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = entry {
                insert_path(map, rest, value);
            }
        }
    }
}

/// Deep-merges `overlay` onto `base`: nulls never erase a base value,
/// objects merge key-by-key, everything else is replaced wholesale.
fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_load_without_a_file() {
        let config = ConfigLoader::new().load().await.unwrap();
        assert_eq!(config.token_estimator.chars_per_token, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.budget.max_cost_per_run, 0.0);
    }

    #[tokio::test]
    async fn file_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waypoint.json");
        tokio::fs::write(
            &path,
            r#"{"budget":{"max_cost_per_run":5.0,"unknown_pricing_mode":"block"}}"#,
        )
        .await
        .unwrap();

        let config = ConfigLoader::new().with_file(&path).load().await.unwrap();
        assert_eq!(config.budget.max_cost_per_run, 5.0);
        assert_eq!(config.budget.unknown_pricing_mode, UnknownPricingMode::Block);
        assert_eq!(config.retry.max_retries, 3, "untouched layers keep defaults");
    }

    #[tokio::test]
    async fn invalid_multiplier_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waypoint.json");
        tokio::fs::write(&path, r#"{"retry":{"multiplier":0.5}}"#)
            .await
            .unwrap();

        let err = ConfigLoader::new().with_file(&path).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn pricing_key_is_stable() {
        assert_eq!(RuntimeConfig::pricing_key("openai", "gpt-4"), "openai:gpt-4");
    }
}
