use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Layered configuration for a review run: built-in defaults, overridden by
/// `review.toml` (project root, then `~/.config/sentinel-review/config.toml`),
/// overridden in turn by `REVIEW_*` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub validator: ValidatorSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub agents: AgentRosterSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ReviewConfig {
    pub fn load() -> Result<Self> {
        let mut config = if Self::config_path().exists() {
            let content = std::fs::read_to_string(Self::config_path())
                .context("failed to read global config file")?;
            toml::from_str(&content).context("failed to parse global config file")?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_project(project_root: &std::path::Path) -> Result<Option<Self>> {
        let path = project_root.join("review.toml");
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).context("failed to read project config")?;
        let config: ReviewConfig =
            toml::from_str(&content).context("failed to parse project config")?;
        Ok(Some(config))
    }

    pub fn merge(global: &ReviewConfig, project: &ReviewConfig) -> ReviewConfig {
        let provider = {
            let mut merged = global.provider.providers.clone();
            for (k, proj_entry) in &project.provider.providers {
                let base = merged.remove(k).unwrap_or_default();
                merged.insert(k.clone(), merge_provider_entry(&base, proj_entry));
            }
            ProviderConfig {
                default: if project.provider.default != default_provider() {
                    project.provider.default.clone()
                } else {
                    global.provider.default.clone()
                },
                providers: merged,
            }
        };

        ReviewConfig {
            provider,
            validator: ValidatorSettings {
                max_concurrent_sessions: if project.validator.max_concurrent_sessions
                    != default_max_concurrent_sessions()
                {
                    project.validator.max_concurrent_sessions
                } else {
                    global.validator.max_concurrent_sessions
                },
                idle_timeout_secs: if project.validator.idle_timeout_secs
                    != default_idle_timeout_secs()
                {
                    project.validator.idle_timeout_secs
                } else {
                    global.validator.idle_timeout_secs
                },
                min_confidence: if (project.validator.min_confidence - default_min_confidence())
                    .abs()
                    > f64::EPSILON
                {
                    project.validator.min_confidence
                } else {
                    global.validator.min_confidence
                },
                llm_fallback_threshold: global.validator.llm_fallback_threshold,
            },
            dedup: global.dedup.clone(),
            retry: RetrySettings {
                max_retries: if project.retry.max_retries != default_max_retries() {
                    project.retry.max_retries
                } else {
                    global.retry.max_retries
                },
                initial_backoff_ms: if project.retry.initial_backoff_ms
                    != default_initial_backoff_ms()
                {
                    project.retry.initial_backoff_ms
                } else {
                    global.retry.initial_backoff_ms
                },
                max_backoff_ms: if project.retry.max_backoff_ms != default_max_backoff_ms() {
                    project.retry.max_backoff_ms
                } else {
                    global.retry.max_backoff_ms
                },
            },
            budget: global.budget.clone(),
            agents: {
                let mut overrides = global.agents.overrides.clone();
                overrides.extend(project.agents.overrides.clone());
                AgentRosterSettings { overrides }
            },
            logging: global.logging.clone(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("REVIEW_MAX_CONCURRENT_SESSIONS") {
            if let Ok(n) = v.parse() {
                self.validator.max_concurrent_sessions = n;
            }
        }
        if let Ok(v) = std::env::var("REVIEW_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.validator.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("REVIEW_MIN_CONFIDENCE") {
            if let Ok(n) = v.parse() {
                self.validator.min_confidence = n;
            }
        }
        if let Ok(v) = std::env::var("REVIEW_MAX_TOTAL_TOKENS") {
            if let Ok(n) = v.parse() {
                self.budget.max_total_tokens = Some(n);
            }
        }
        if let Ok(v) = std::env::var("REVIEW_OVERALL_TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.budget.overall_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("REVIEW_LOG_JSON") {
            self.logging.json = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("REVIEW_PROVIDER") {
            self.provider.default = v;
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sentinel-review")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub default_base_url: &'static str,
    pub api_style: &'static str,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef {
        id: "openai",
        name: "OpenAI",
        env_var: "OPENAI_API_KEY",
        default_base_url: "https://api.openai.com/v1",
        api_style: "openai",
    },
    ProviderDef {
        id: "anthropic",
        name: "Anthropic",
        env_var: "ANTHROPIC_API_KEY",
        default_base_url: "https://api.anthropic.com/v1",
        api_style: "anthropic",
    },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default, flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_style: Option<String>,
}

impl ProviderConfig {
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            providers: HashMap::new(),
        }
    }
}

fn merge_provider_entry(global: &ProviderEntry, project: &ProviderEntry) -> ProviderEntry {
    ProviderEntry {
        api_key: project.api_key.clone().or_else(|| global.api_key.clone()),
        base_url: project
            .base_url
            .clone()
            .or_else(|| global.base_url.clone()),
        model: project.model.clone().or_else(|| global.model.clone()),
        api_style: project
            .api_style
            .clone()
            .or_else(|| global.api_style.clone()),
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

/// Bounds on the streaming validator: concurrent per-file sessions, idle
/// shutdown, and the confidence gate that skips the LLM entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSettings {
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_llm_fallback_threshold")]
    pub llm_fallback_threshold: f64,
}

fn default_max_concurrent_sessions() -> usize {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_llm_fallback_threshold() -> f64 {
    0.8
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            min_confidence: default_min_confidence(),
            llm_fallback_threshold: default_llm_fallback_threshold(),
        }
    }
}

/// Tuning for the real-time deduplicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedup_model")]
    pub model: Option<String>,
}

fn default_dedup_model() -> Option<String> {
    None
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_dedup_model(),
        }
    }
}

fn default_max_retries() -> u32 {
    1
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_overall_timeout_secs() -> u64 {
    1800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSettings {
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    #[serde(default)]
    pub max_total_tokens: Option<u64>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            overall_timeout_secs: default_overall_timeout_secs(),
            max_total_tokens: None,
        }
    }
}

/// Per-agent overrides layered on top of the fixed reviewer roster
/// (security, logic, style, performance, fix-verifier).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRosterSettings {
    #[serde(default, flatten)]
    pub overrides: HashMap<String, AgentRoleOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRoleOverride {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub disabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ReviewConfig::default();
        assert_eq!(config.validator.max_concurrent_sessions, 5);
        assert_eq!(config.validator.idle_timeout_secs, 30);
        assert!((config.validator.min_confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn merge_prefers_project_when_non_default() {
        let global = ReviewConfig::default();
        let mut project = ReviewConfig::default();
        project.validator.max_concurrent_sessions = 10;
        let merged = ReviewConfig::merge(&global, &project);
        assert_eq!(merged.validator.max_concurrent_sessions, 10);
        assert_eq!(merged.validator.idle_timeout_secs, 30);
    }

    #[test]
    fn merge_combines_provider_entries() {
        let mut global = ReviewConfig::default();
        global.provider.providers.insert(
            "anthropic".into(),
            ProviderEntry {
                api_key: Some("global-key".into()),
                ..Default::default()
            },
        );
        let mut project = ReviewConfig::default();
        project.provider.providers.insert(
            "anthropic".into(),
            ProviderEntry {
                model: Some("claude-opus-4-20250514".into()),
                ..Default::default()
            },
        );
        let merged = ReviewConfig::merge(&global, &project);
        let entry = merged.provider.entry("anthropic").unwrap();
        assert_eq!(entry.api_key.as_deref(), Some("global-key"));
        assert_eq!(entry.model.as_deref(), Some("claude-opus-4-20250514"));
    }
}
