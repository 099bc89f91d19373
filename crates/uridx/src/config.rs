//! Configuration: an optional TOML file plus environment overrides.
//!
//! Every table and field has a default, so uridx runs with no file at all.
//! Environment variables win over the file:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `URIDX_DB_PATH` | `db.path` | `$XDG_DATA_HOME/uridx/uridx.db` |
//! | `URIDX_EMBED_PROVIDER` | `embedding.provider` | `ollama` |
//! | `OLLAMA_BASE_URL` | `embedding.url` | `http://localhost:11434` |
//! | `OLLAMA_EMBED_MODEL` | `embedding.model` | `nomic-embed-text` |
//!
//! The `OLLAMA_*` variables only apply when the provider is `ollama`.
//!
//! ```toml
//! [db]
//! path = "/home/me/.local/share/uridx/uridx.db"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! timeout_secs = 30
//! max_retries = 3
//!
//! [chunking]
//! max_tokens = 700
//!
//! [retrieval]
//! default_limit = 10
//!
//! [server]
//! bind = "127.0.0.1:7331"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    data_dir(|k| std::env::var(k).ok()).join("uridx").join("uridx.db")
}

fn data_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(xdg) = lookup("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg);
    }
    match lookup("HOME").filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(".local").join("share"),
        None => PathBuf::from("."),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the embedding service. Defaults depend on the provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

impl EmbeddingConfig {
    pub fn base_url(&self) -> &str {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, "openai") => DEFAULT_OPENAI_URL,
            (None, _) => DEFAULT_OLLAMA_URL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            page_size: default_page_size(),
        }
    }
}

fn default_limit() -> i64 {
    10
}
fn default_page_size() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

impl Config {
    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(path) = get("URIDX_DB_PATH") {
            self.db.path = PathBuf::from(path);
        }
        if let Some(provider) = get("URIDX_EMBED_PROVIDER") {
            self.embedding.provider = provider;
        }
        if self.embedding.provider == "ollama" {
            if let Some(url) = get("OLLAMA_BASE_URL") {
                self.embedding.url = Some(url);
            }
            if let Some(model) = get("OLLAMA_EMBED_MODEL") {
                self.embedding.model = model;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.retrieval.default_limit < 1 {
            bail!("retrieval.default_limit must be >= 1");
        }
        if self.retrieval.page_size == 0 {
            bail!("retrieval.page_size must be > 0");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        match self.embedding.provider.as_str() {
            "ollama" | "openai" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be ollama or openai.",
                other
            ),
        }
        if self.db.path.as_os_str().is_empty() {
            bail!("db.path must not be empty");
        }
        Ok(())
    }
}

/// Load the configuration once at startup.
///
/// Reads `path` when given (a missing file is an error), otherwise starts
/// from defaults, then applies the process environment and validates.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };
    config.apply_env(|k| std::env::var(k).ok());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.embedding.base_url(), DEFAULT_OLLAMA_URL);
        assert_eq!(config.retrieval.default_limit, 10);
        assert!(config.db.path.ends_with("uridx/uridx.db"));
    }

    #[test]
    fn data_dir_prefers_xdg() {
        assert_eq!(
            data_dir(env(&[("XDG_DATA_HOME", "/x"), ("HOME", "/h")])),
            PathBuf::from("/x")
        );
        assert_eq!(
            data_dir(env(&[("HOME", "/h")])),
            PathBuf::from("/h/.local/share")
        );
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config: Config = toml::from_str(
            r#"
            [db]
            path = "/from/file.db"
            [embedding]
            model = "file-model"
            "#,
        )
        .unwrap();
        config.apply_env(env(&[
            ("URIDX_DB_PATH", "/from/env.db"),
            ("OLLAMA_BASE_URL", "http://gpu:11434/"),
            ("OLLAMA_EMBED_MODEL", "mxbai-embed-large"),
        ]));
        assert_eq!(config.db.path, PathBuf::from("/from/env.db"));
        assert_eq!(config.embedding.model, "mxbai-embed-large");
        assert_eq!(config.embedding.base_url(), "http://gpu:11434");
    }

    #[test]
    fn ollama_vars_ignored_for_openai() {
        let mut config = Config::default();
        config.embedding.model = "text-embedding-3-small".into();
        config.apply_env(env(&[
            ("URIDX_EMBED_PROVIDER", "openai"),
            ("OLLAMA_EMBED_MODEL", "nomic-embed-text"),
        ]));
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.base_url(), DEFAULT_OPENAI_URL);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.embedding.provider = "local".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chunking.max_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retrieval.default_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/uridx.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
