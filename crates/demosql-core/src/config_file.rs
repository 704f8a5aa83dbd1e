//! On-disk TOML configuration.
//!
//! All fields are optional so partial configs work; a CWD `.demosql.toml`
//! overlays the platform config file, and CLI flags / environment variables
//! override both (resolved in the binary).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub cache: Option<CacheConfig>,
    pub records: Option<RecordsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub openai_key: Option<String>,
    pub openai_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub path: Option<String>,
    /// Retention window for cache entries, in days. Default 30.
    pub expiry_days: Option<u64>,
    /// Proposals at or above this confidence skip review. Default 0.9;
    /// raising it sends more proposals to the adjudicator, lowering it
    /// auto-accepts more.
    pub auto_approve_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsConfig {
    pub path: Option<String>,
}

/// Platform config path: `<config_dir>/demosql/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("demosql").join("config.toml"))
}

/// Load config by cascading CWD `.demosql.toml` over the platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(&PathBuf::from(".demosql.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &PathBuf) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content).ok()
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api_keys: Some(ApiKeysConfig {
            openai_key: overlay
                .api_keys
                .as_ref()
                .and_then(|a| a.openai_key.clone())
                .or_else(|| base.api_keys.as_ref().and_then(|a| a.openai_key.clone())),
            openai_model: overlay
                .api_keys
                .as_ref()
                .and_then(|a| a.openai_model.clone())
                .or_else(|| base.api_keys.as_ref().and_then(|a| a.openai_model.clone())),
        }),
        cache: Some(CacheConfig {
            path: overlay
                .cache
                .as_ref()
                .and_then(|c| c.path.clone())
                .or_else(|| base.cache.as_ref().and_then(|c| c.path.clone())),
            expiry_days: overlay
                .cache
                .as_ref()
                .and_then(|c| c.expiry_days)
                .or_else(|| base.cache.as_ref().and_then(|c| c.expiry_days)),
            auto_approve_threshold: overlay
                .cache
                .as_ref()
                .and_then(|c| c.auto_approve_threshold)
                .or_else(|| base.cache.as_ref().and_then(|c| c.auto_approve_threshold)),
        }),
        records: Some(RecordsConfig {
            path: overlay
                .records
                .as_ref()
                .and_then(|r| r.path.clone())
                .or_else(|| base.records.as_ref().and_then(|r| r.path.clone())),
        }),
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(path)
}
