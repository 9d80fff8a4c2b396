//! Model configuration
//!
//! Default values are defined in `config/default.toml`. User files are
//! merged on top of the defaults, so a partial file only overrides the
//! keys it names.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default configuration TOML embedded from config/default.toml
const DEFAULT_CONFIG_TOML: &str = include_str!("../config/default.toml");

/// Top-level settings file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub model: ModelConfig,
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the binary trie language model
    pub model_path: PathBuf,
    /// Append every scored sequence to this file (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_log: Option<PathBuf>,
    /// Maximum number of cached max-order probabilities
    pub cache_capacity: usize,
    /// Clear the probability cache at every utterance end
    pub clear_cache_after_utterance: bool,
    /// Whether `language_weight` and `word_insertion_probability` are applied
    pub apply_language_weight_and_wip: bool,
    pub language_weight: f32,
    pub word_insertion_probability: f64,
    /// Base of the decoder's log domain
    pub log_base: f64,
    /// Cap on the n-gram order used for queries (defaults to the file's order)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("embedded default.toml must be valid")
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Settings::default().model
    }
}

impl ModelConfig {
    /// Default settings pointing at `model_path`.
    pub fn for_model(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }
}

/// Recursively merge `overlay` TOML values on top of `base`.
///
/// Tables merge key by key, so a user file holding only
/// `[model] cache_capacity = 64` keeps every other `[model]` default; any
/// other value, arrays included, replaces the default outright.
fn merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, _) => {
            *base = overlay.clone();
        }
    }
}

/// Parse user TOML content merged on top of default.toml.
fn parse_with_defaults(user_content: &str) -> Result<Settings> {
    let mut base: toml::Value = toml::from_str(DEFAULT_CONFIG_TOML)?;
    let user: toml::Value = toml::from_str(user_content)?;
    merge_toml(&mut base, &user);
    let settings: Settings = base.try_into()?;
    Ok(settings)
}

impl Settings {
    /// Load settings from a file, merged on top of defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let content = fs::read_to_string(path)?;
        parse_with_defaults(&content)
    }

    /// Save settings to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
