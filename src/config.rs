//! Hierarchical configuration: defaults ← user config ← project config ←
//! environment variables ← CLI flags (spec §6). Grounded on the teacher's
//! `Config`/`load_config` shape in its own `config.rs` — per-section
//! `#[serde(default)]` structs with a `Default` impl and a graceful
//! fallback to defaults on a missing or unparseable file — generalized
//! from one `.cortexast.json` source to the full layered cascade and
//! three serialization formats.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    pub paths: Vec<PathBuf>,
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paths: vec![],
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub enabled: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            base_url: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include: vec![],
            exclude: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub scan: ScanConfig,
    pub watch: WatchConfig,
    pub embedding: EmbeddingConfig,
    pub server: ServerConfig,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".chunkhound.lance"),
            scan: ScanConfig::default(),
            watch: WatchConfig::default(),
            embedding: EmbeddingConfig::default(),
            server: ServerConfig::default(),
            verbose: false,
        }
    }
}

/// Load and merge the four non-CLI layers: defaults, the user-level
/// config (`~/.chunkhound/config.{json,yaml,toml}`), the project config
/// (`<root>/.chunkhound.{json,yaml,toml}`), then environment variables.
/// CLI flags are applied by the caller afterward via the `with_*`
/// methods, since clap has already parsed them by the time this runs.
pub fn load_config(project_root: &Path) -> Config {
    let mut config = Config::default();

    if let Some(home) = dirs::home_dir() {
        merge_from_file(&mut config, &home.join(".chunkhound").join("config"));
    }
    merge_from_file(&mut config, &project_root.join(".chunkhound"));
    apply_env_overrides(&mut config);
    config
}

/// Looks for `{stem}.json`, `{stem}.yaml`/`.yml`, or `{stem}.toml` next to
/// `stem`, in that order, and merges the first one found. Parse failures
/// are logged and treated as "file absent" — never fatal.
fn merge_from_file(config: &mut Config, stem: &Path) {
    for (ext, parse) in [
        ("json", parse_json as fn(&str) -> Result<Config>),
        ("yaml", parse_yaml),
        ("yml", parse_yaml),
        ("toml", parse_toml),
    ] {
        let path = stem.with_extension(ext);
        let Ok(text) = std::fs::read_to_string(&path) else { continue };
        match parse(&text) {
            Ok(loaded) => {
                *config = loaded;
                return;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config file, ignoring");
            }
        }
    }
}

fn parse_json(text: &str) -> Result<Config> {
    serde_json::from_str(text).map_err(|e| SearchError::configuration(e.to_string()))
}

fn parse_yaml(text: &str) -> Result<Config> {
    serde_yaml::from_str(text).map_err(|e| SearchError::configuration(e.to_string()))
}

fn parse_toml(text: &str) -> Result<Config> {
    toml::from_str(text).map_err(|e| SearchError::configuration(e.to_string()))
}

/// `CHUNKHOUND_DB_PATH`, `CHUNKHOUND_WATCH_PATHS` (comma-separated),
/// `CHUNKHOUND_WATCH_ENABLED`, `CHUNKHOUND_EMBEDDING_*`, plus legacy
/// `OPENAI_API_KEY` / `OPENAI_BASE_URL` fallbacks (spec §6).
fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("CHUNKHOUND_DB_PATH") {
        config.db_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_WATCH_PATHS") {
        config.watch.paths = v.split(',').filter(|s| !s.is_empty()).map(PathBuf::from).collect();
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_WATCH_ENABLED") {
        config.watch.enabled = parse_bool(&v).unwrap_or(config.watch.enabled);
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_EMBEDDING_PROVIDER") {
        config.embedding.provider = Some(v);
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_EMBEDDING_MODEL") {
        config.embedding.model = Some(v);
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(v);
    }
    if let Ok(v) = std::env::var("CHUNKHOUND_EMBEDDING_BASE_URL") {
        config.embedding.base_url = Some(v);
    }
    if config.embedding.api_key.is_none() {
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            config.embedding.api_key = Some(v);
        }
    }
    if config.embedding.base_url.is_none() {
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            config.embedding.base_url = Some(v);
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `true` when `CHUNKHOUND_MCP_MODE` is set, signalling the MCP
/// entrypoint to suppress stdout/stderr noise that would corrupt
/// JSON-RPC framing (spec §6).
pub fn mcp_mode_requested() -> bool {
    std::env::var("CHUNKHOUND_MCP_MODE").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_well_formed() {
        let c = Config::default();
        assert_eq!(c.server.port, 8080);
        assert!(c.watch.enabled);
    }

    #[test]
    fn env_override_replaces_db_path() {
        std::env::set_var("CHUNKHOUND_DB_PATH", "/tmp/override.lance");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.db_path, PathBuf::from("/tmp/override.lance"));
        std::env::remove_var("CHUNKHOUND_DB_PATH");
    }

    #[test]
    fn watch_paths_env_splits_on_comma() {
        std::env::set_var("CHUNKHOUND_WATCH_PATHS", "/a,/b,/c");
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.watch.paths.len(), 3);
        std::env::remove_var("CHUNKHOUND_WATCH_PATHS");
    }

    #[test]
    fn unparseable_project_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".chunkhound.json"), "{ not json").unwrap();
        let config = load_config(dir.path());
        assert_eq!(config.db_path, Config::default().db_path);
    }
}
