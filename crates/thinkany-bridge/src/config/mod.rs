use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::models::Mode;

/// Main configuration structure for thinkany-bridge
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Client authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Backend connection configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Conversation cache configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// Headings used for the rendered search/answer blocks
    #[serde(default)]
    pub labels: LabelConfig,
    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Public model table
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            session: SessionConfig::default(),
            labels: LabelConfig::default(),
            default_model: default_model(),
            models: default_models(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8088")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8088".to_string()
}

/// Bearer-token check applied to the `/v1` routes
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Master key clients must present (unset = no check)
    #[serde(default)]
    pub master_key: Option<String>,
    /// Compatibility shim: a master key equal to this value disables the check
    #[serde(default = "default_bypass_key")]
    pub bypass_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            master_key: None,
            bypass_key: default_bypass_key(),
        }
    }
}

fn default_bypass_key() -> Option<String> {
    Some("1".to_string())
}

impl AuthConfig {
    /// The key to enforce, or `None` when the check is disabled
    pub fn enforced_key(&self) -> Option<&str> {
        let key = self.master_key.as_deref().filter(|k| !k.is_empty())?;
        if self.bypass_key.as_deref() == Some(key) {
            return None;
        }
        Some(key)
    }

    /// Whether the configured master key is switched off by the bypass value
    pub fn is_bypassed(&self) -> bool {
        match (&self.master_key, &self.bypass_key) {
            (Some(key), Some(bypass)) => key == bypass,
            _ => false,
        }
    }
}

/// Backend connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Backend origin, e.g. "https://thinkany.ai"
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Ceiling for a whole backend call, streaming included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Locale sent in the payload and the Referer path
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Accept-Language header value
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// Cookie pool, rotated round-robin
    #[serde(default)]
    pub cookies: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            locale: default_locale(),
            accept_language: default_accept_language(),
            cookies: Vec::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://thinkany.ai".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_locale() -> String {
    "zh".to_string()
}

fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9,en;q=0.8".to_string()
}

/// Conversation cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds a session survives after its last update
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of cached sessions
    #[serde(default = "default_session_max_entries")]
    pub max_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_entries: default_session_max_entries(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_session_max_entries() -> usize {
    1024
}

/// Text used when rendering search traces, sources and the answer heading
#[derive(Debug, Clone, Deserialize)]
pub struct LabelConfig {
    #[serde(default = "default_search_process_label")]
    pub search_process: String,
    #[serde(default = "default_sources_label")]
    pub sources: String,
    #[serde(default = "default_answer_label")]
    pub answer: String,
    #[serde(default = "default_unknown_title")]
    pub unknown_title: String,
    #[serde(default = "default_unknown_source")]
    pub unknown_source: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            search_process: default_search_process_label(),
            sources: default_sources_label(),
            answer: default_answer_label(),
            unknown_title: default_unknown_title(),
            unknown_source: default_unknown_source(),
        }
    }
}

fn default_search_process_label() -> String {
    "Search Process".to_string()
}

fn default_sources_label() -> String {
    "Sources".to_string()
}

fn default_answer_label() -> String {
    "Answer".to_string()
}

fn default_unknown_title() -> String {
    "unknown title".to_string()
}

fn default_unknown_source() -> String {
    "unknown source".to_string()
}

/// One row of the public model table
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// Name clients send in `model`
    pub name: String,
    /// Model name the backend expects in `llm_model`
    pub upstream_model: String,
    /// Backend pipeline to use
    pub mode: Mode,
}

impl ModelEntry {
    fn new(name: &str, upstream_model: &str, mode: Mode) -> Self {
        Self {
            name: name.to_string(),
            upstream_model: upstream_model.to_string(),
            mode,
        }
    }
}

fn default_model() -> String {
    "thinkany-search-gpt4o-mini".to_string()
}

fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("thinkany-search-gpt4o-mini", "gpt-4o-mini", Mode::Search),
        ModelEntry::new("thinkany-chat-gpt4o-mini", "gpt-4o-mini", Mode::Chat),
        ModelEntry::new("thinkany-search-gemini-flash", "gemini-flash-1.5", Mode::Search),
        ModelEntry::new("thinkany-chat-gemini-flash", "gemini-flash-1.5", Mode::Chat),
        ModelEntry::new("thinkany-search-haiku", "claude-3-haiku", Mode::Search),
        ModelEntry::new("thinkany-chat-haiku", "claude-3-haiku", Mode::Chat),
    ]
}

impl Config {
    /// Overlay the deployment environment variables onto this config
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay values produced by `lookup`; split out so tests need no process env
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("API_MASTER_KEY") {
            self.auth.master_key = Some(key);
        }

        let mut index = 1;
        while let Some(cookie) = lookup(&format!("THINKANY_COOKIE_{index}")) {
            if cookie.is_empty() {
                break;
            }
            self.upstream.cookies.push(cookie);
            index += 1;
        }

        if let Some(value) = lookup("API_REQUEST_TIMEOUT") {
            self.upstream.timeout_secs = parse_env_number("API_REQUEST_TIMEOUT", &value)?;
        }

        if let Some(value) = lookup("SESSION_CACHE_TTL") {
            self.session.ttl_secs = parse_env_number("SESSION_CACHE_TTL", &value)?;
        }

        if let Some(value) = lookup("LISTEN_PORT") {
            let port: u16 = parse_env_number("LISTEN_PORT", &value)?;
            let mut addr = self.listen_addr()?;
            addr.set_port(port);
            self.server.listen_addr = addr.to_string();
        }

        Ok(())
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid listen address: {e}")))
    }

    /// Check the invariants the proxy relies on at startup
    pub fn validate(&self) -> Result<()> {
        if self.upstream.cookies.is_empty() {
            return Err(BridgeError::Config(
                "At least one credential is required: set THINKANY_COOKIE_1 or upstream.cookies"
                    .to_string(),
            ));
        }

        if self.upstream.timeout_secs == 0 {
            return Err(BridgeError::Config(
                "upstream.timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.session.max_entries == 0 {
            return Err(BridgeError::Config(
                "session.max_entries must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.models {
            if entry.name.is_empty() {
                return Err(BridgeError::Config("Model names cannot be empty".to_string()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(BridgeError::Config(format!(
                    "Duplicate model name '{}'",
                    entry.name
                )));
            }
        }

        if !seen.contains(self.default_model.as_str()) {
            return Err(BridgeError::Config(format!(
                "Default model '{}' is not in the model table",
                self.default_model
            )));
        }

        url::Url::parse(&self.upstream.base_url)
            .map_err(|e| BridgeError::Config(format!("Invalid upstream base_url: {e}")))?;

        self.listen_addr()?;

        Ok(())
    }
}

/// Config files tried in order when no `--config` is given
pub fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::home_dir().map(|h| h.join(".thinkany-bridge").join("config.toml")),
        dirs::config_dir().map(|c| c.join("thinkany-bridge").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

impl Config {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from `path`, or the first existing default path, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for candidate in default_config_paths() {
            if candidate.exists() {
                tracing::info!("Loading config from: {}", candidate.display());
                return Self::from_file(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| BridgeError::Config(format!("Invalid value for {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_with_cookie() -> Config {
        let mut config = Config::default();
        config.upstream.cookies.push("cookie-a".to_string());
        config
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8088");
        assert!(config.auth.master_key.is_none());
        assert_eq!(config.auth.bypass_key.as_deref(), Some("1"));
        assert_eq!(config.upstream.base_url, "https://thinkany.ai");
        assert_eq!(config.upstream.timeout_secs, 180);
        assert_eq!(config.upstream.locale, "zh");
        assert!(config.upstream.cookies.is_empty());
        assert_eq!(config.session.ttl_secs, 3600);
        assert_eq!(config.session.max_entries, 1024);
        assert_eq!(config.models.len(), 6);
        assert_eq!(config.default_model, "thinkany-search-gpt4o-mini");
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
default_model = "fast"

[server]
listen_addr = "0.0.0.0:9000"

[auth]
master_key = "sk-secret"

[upstream]
base_url = "http://localhost:7000"
timeout_secs = 30
cookies = ["a=1", "b=2"]

[session]
ttl_secs = 60
max_entries = 16

[labels]
answer = "Antwort"

[[models]]
name = "fast"
upstream_model = "gpt-4o-mini"
mode = "chat"

[[models]]
name = "deep"
upstream_model = "claude-3-haiku"
mode = "search"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.auth.master_key.as_deref(), Some("sk-secret"));
        assert_eq!(config.upstream.base_url, "http://localhost:7000");
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.upstream.cookies, vec!["a=1", "b=2"]);
        assert_eq!(config.upstream.locale, "zh");
        assert_eq!(config.session.ttl_secs, 60);
        assert_eq!(config.session.max_entries, 16);
        assert_eq!(config.labels.answer, "Antwort");
        assert_eq!(config.labels.sources, "Sources");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].mode, Mode::Search);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[upstream]
cookies = ["only-one"]
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.server.listen_addr, "127.0.0.1:8088");
        assert_eq!(config.upstream.timeout_secs, 180);
        assert_eq!(config.models.len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay() {
        let vars = env(&[
            ("API_MASTER_KEY", "sk-env"),
            ("THINKANY_COOKIE_1", "first"),
            ("THINKANY_COOKIE_2", "second"),
            ("THINKANY_COOKIE_4", "after-gap"),
            ("API_REQUEST_TIMEOUT", "45"),
            ("SESSION_CACHE_TTL", "120"),
            ("LISTEN_PORT", "9100"),
        ]);

        let mut config = Config::default();
        config
            .apply_env_from(|key| vars.get(key).cloned())
            .expect("env overlay should succeed");

        assert_eq!(config.auth.master_key.as_deref(), Some("sk-env"));
        assert_eq!(config.upstream.cookies, vec!["first", "second"]);
        assert_eq!(config.upstream.timeout_secs, 45);
        assert_eq!(config.session.ttl_secs, 120);
        assert_eq!(config.server.listen_addr, "127.0.0.1:9100");
    }

    #[test]
    fn test_env_overlay_rejects_bad_numbers() {
        let vars = env(&[("API_REQUEST_TIMEOUT", "soon")]);
        let mut config = Config::default();
        let err = config
            .apply_env_from(|key| vars.get(key).cloned())
            .unwrap_err();
        assert!(err.to_string().contains("API_REQUEST_TIMEOUT"));
    }

    #[test]
    fn test_validate_requires_cookie() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("THINKANY_COOKIE_1"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let vars = env(&[("API_REQUEST_TIMEOUT", "0")]);
        let mut config = config_with_cookie();
        config
            .apply_env_from(|key| vars.get(key).cloned())
            .expect("env overlay should succeed");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_validate_rejects_duplicate_models() {
        let mut config = config_with_cookie();
        config
            .models
            .push(ModelEntry::new("thinkany-chat-haiku", "other", Mode::Chat));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate model name"));
    }

    #[test]
    fn test_validate_rejects_unknown_default_model() {
        let mut config = config_with_cookie();
        config.default_model = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_enforced_key() {
        let mut auth = AuthConfig::default();
        assert_eq!(auth.enforced_key(), None);

        auth.master_key = Some("sk-real".to_string());
        assert_eq!(auth.enforced_key(), Some("sk-real"));
        assert!(!auth.is_bypassed());

        auth.master_key = Some("1".to_string());
        assert_eq!(auth.enforced_key(), None);
        assert!(auth.is_bypassed());

        auth.bypass_key = None;
        assert_eq!(auth.enforced_key(), Some("1"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upstream]\ncookies = [\"from-file\"]\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.upstream.cookies, vec!["from-file"]);
    }

    #[test]
    fn test_load_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        let err = Config::load(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[upstream\n").unwrap();
        let err = Config::load(Some(&broken)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
