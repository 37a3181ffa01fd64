use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::state_machine::{TransitionRules, DEFAULT_PAGE_SIZE};

pub const CONFIG_FILE_NAME: &str = "jobhive.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
}

/// One week. Sessions are meant to lapse after minutes of silence.
pub const MAX_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn default_session_ttl_secs() -> u64 {
    20 * 60
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_pagination_keywords() -> Vec<String> {
    vec!["voir plus".to_string(), "plus".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_pagination_keywords")]
    pub pagination_keywords: Vec<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            debounce_ms: default_debounce_ms(),
            page_size: default_page_size(),
            pagination_keywords: default_pagination_keywords(),
        }
    }
}

impl ConversationConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn rules(&self) -> TransitionRules {
        TransitionRules::new(self.page_size, &self.pagination_keywords)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

fn default_store_path() -> String {
    "data/jobhive.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_burst() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst: default_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobhiveConfig {
    pub app: AppConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(root: &Path) -> Result<JobhiveConfig> {
    let mut config: JobhiveConfig = read_yaml_file(&root.join(CONFIG_FILE_NAME))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &JobhiveConfig) -> Result<()> {
    let conversation = &config.conversation;
    if conversation.session_ttl_secs == 0 {
        return Err(anyhow!("conversation.session_ttl_secs must be positive"));
    }
    if conversation.session_ttl_secs > MAX_SESSION_TTL_SECS {
        return Err(anyhow!(
            "conversation.session_ttl_secs ({}) exceeds the maximum of {}",
            conversation.session_ttl_secs,
            MAX_SESSION_TTL_SECS
        ));
    }
    if conversation.page_size == 0 {
        return Err(anyhow!("conversation.page_size must be positive"));
    }
    if conversation.debounce_ms >= conversation.session_ttl_secs.saturating_mul(1000) {
        return Err(anyhow!(
            "conversation.debounce_ms ({}) must be shorter than the session ttl",
            conversation.debounce_ms
        ));
    }
    if conversation
        .pagination_keywords
        .iter()
        .all(|keyword| keyword.trim().is_empty())
    {
        return Err(anyhow!("conversation.pagination_keywords is empty"));
    }

    if config.store.backend == StoreBackend::Sqlite && config.store.path.trim().is_empty() {
        return Err(anyhow!("store.path is required for the sqlite backend"));
    }

    if config.rate_limit.requests_per_minute == 0 || config.rate_limit.burst == 0 {
        return Err(anyhow!(
            "rate_limit.requests_per_minute and rate_limit.burst must be positive"
        ));
    }

    Ok(())
}

pub fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut JobhiveConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.app.env = resolve_env_var(&config.app.env);
    config.store.path = resolve_env_var(&config.store.path);
    for keyword in &mut config.conversation.pagination_keywords {
        *keyword = resolve_env_var(keyword);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture_config_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    fn minimal() -> JobhiveConfig {
        serde_yaml::from_str("app:\n  name: test\n  env: test\n").unwrap()
    }

    #[test]
    fn load_config_from_workspace_fixtures() {
        let config = load_config(&fixture_config_root()).unwrap();
        assert_eq!(config.app.name, "jobhive");
        assert_eq!(config.conversation.session_ttl(), Duration::from_secs(1200));
        assert_eq!(config.conversation.debounce_delay(), Duration::from_millis(500));
        assert_eq!(config.conversation.page_size, 5);
        assert!(config
            .conversation
            .pagination_keywords
            .contains(&"voir plus".to_string()));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = minimal();
        assert_eq!(config.conversation.session_ttl_secs, 1200);
        assert_eq!(config.conversation.debounce_ms, 500);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.rate_limit.requests_per_minute, 30);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn store_backend_parses_lowercase() {
        let config: JobhiveConfig = serde_yaml::from_str(
            "app:\n  name: t\n  env: t\nstore:\n  backend: memory\n",
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn rules_follow_conversation_settings() {
        let mut config = minimal();
        config.conversation.page_size = 10;
        config.conversation.pagination_keywords = vec!["  Suivant ".into()];

        let rules = config.conversation.rules();
        assert_eq!(rules.page_size, 10);
        assert!(rules.is_pagination_request("suivant"));
        assert!(!rules.is_pagination_request("plus"));
    }

    #[test]
    fn validate_config_rejects_zero_page_size() {
        let mut config = minimal();
        config.conversation.page_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn validate_config_bounds_session_ttl() {
        let mut config = minimal();
        config.conversation.session_ttl_secs = u64::MAX;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"));

        config.conversation.session_ttl_secs = MAX_SESSION_TTL_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn validate_config_rejects_debounce_longer_than_ttl() {
        let mut config = minimal();
        config.conversation.session_ttl_secs = 1;
        config.conversation.debounce_ms = 5_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("debounce_ms"));
    }

    #[test]
    fn validate_config_requires_sqlite_path() {
        let mut config = minimal();
        config.store.path = "  ".into();
        assert!(validate_config(&config).is_err());

        config.store.backend = StoreBackend::Memory;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn validate_config_rejects_blank_keywords() {
        let mut config = minimal();
        config.conversation.pagination_keywords = vec![" ".into()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("pagination_keywords"));
    }

    #[test]
    fn resolve_env_var_replaces_env_placeholder() {
        let expected = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("${PATH}"), expected);
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("data/${UNCLOSED"), "data/${UNCLOSED");
    }

    #[test]
    fn resolve_env_var_missing_env_returns_empty() {
        let result = resolve_env_var("db=${JOBHIVE_NONEXISTENT_VAR_XYZ}");
        assert_eq!(result, "db=");
    }
}
