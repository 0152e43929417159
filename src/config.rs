use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

use crate::error::{ExploreError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "explore_llm.toml";
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
const MAX_RETRIES_CAP: u32 = 5;

/// Main configuration structure loaded from explore_llm.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub completion: CompletionConfig,
    pub server: ServerConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// Upstream completion service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Ask the upstream for a guaranteed JSON object response
    pub structured_output: bool,
    pub temperature: Option<f32>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_ms: 60_000,
            max_retries: 0,
            retry_delay_ms: 200,
            structured_output: true,
            temperature: None,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            cors_origins: vec!["http://localhost:3000".to_string()],
            request_timeout_ms: 90_000,
        }
    }
}

/// Upstream credential. Never printed by `Debug`.
#[derive(Clone, Default)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_blank() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(***)")
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub api_key: ApiKey,
}

impl RuntimeConfig {
    fn from_env<F>(env: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            api_key: ApiKey::new(env(API_KEY_VAR).unwrap_or_default().trim()),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the TOML file and process environment.
    /// Uses EXPLORE_LLM_CONFIG or defaults to "explore_llm.toml".
    ///
    /// Fails when the upstream credential is absent, so the server never starts
    /// without it.
    pub fn load() -> Result<Self> {
        load_env_files();

        let config_path = std::env::var("EXPLORE_LLM_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let file = match std::fs::read_to_string(&config_path) {
            Ok(content) => Some(content),
            Err(_) => {
                tracing::warn!("Config file {} not found, using defaults", config_path);
                None
            }
        };

        Self::from_sources(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a validated configuration from optional TOML text and an environment lookup.
    pub fn from_sources<F>(toml_text: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = match toml_text {
            Some(text) => toml::from_str(text)?,
            None => Self::default(),
        };

        config.apply_env_overrides(&env);
        config.runtime = RuntimeConfig::from_env(&env);
        config.validate()?;
        Ok(config)
    }

    /// Env-first overrides. Unparseable values are ignored with a warning.
    fn apply_env_overrides<F>(&mut self, env: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = env("EXPLORE_MODEL") {
            self.completion.model = model;
        }
        if let Some(url) = env("EXPLORE_BASE_URL") {
            self.completion.base_url = url;
        }
        if let Some(v) = parsed(env, "EXPLORE_TIMEOUT_MS") {
            self.completion.timeout_ms = v;
        }
        if let Some(v) = parsed(env, "EXPLORE_MAX_RETRIES") {
            self.completion.max_retries = v;
        }
        if let Some(v) = env("EXPLORE_STRUCTURED_OUTPUT") {
            match parse_flag(&v) {
                Some(flag) => self.completion.structured_output = flag,
                None => tracing::warn!("Ignoring EXPLORE_STRUCTURED_OUTPUT={}", v),
            }
        }
        if let Some(bind) = parsed(env, "EXPLORE_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Some(origins) = env("EXPLORE_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = parsed(env, "EXPLORE_REQUEST_TIMEOUT_MS") {
            self.server.request_timeout_ms = v;
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.runtime.api_key.is_blank() {
            return Err(ExploreError::config(format!(
                "{API_KEY_VAR} is not set; the completion service cannot be reached"
            )));
        }
        self.validate_settings()
    }

    /// Checks everything except the credential.
    fn validate_settings(&mut self) -> Result<()> {
        let base = &self.completion.base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ExploreError::config(format!(
                "Completion base_url '{base}' must start with http:// or https://"
            )));
        }
        if self.completion.timeout_ms == 0 {
            return Err(ExploreError::config("completion.timeout_ms must be > 0"));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ExploreError::config("server.request_timeout_ms must be > 0"));
        }
        if self.completion.max_retries > MAX_RETRIES_CAP {
            tracing::warn!(
                "max_retries {} exceeds max {}, clamping",
                self.completion.max_retries,
                MAX_RETRIES_CAP
            );
            self.completion.max_retries = MAX_RETRIES_CAP;
        }
        for origin in &self.server.cors_origins {
            if origin != "*" && axum::http::HeaderValue::from_str(origin).is_err() {
                return Err(ExploreError::config(format!(
                    "CORS origin '{origin}' is not a valid header value"
                )));
            }
        }
        Ok(())
    }
}

/// Load environment variables with fallbacks:
/// 1) EXPLORE_ENV_FILE if set
/// 2) ./.env
/// 3) ../.env (repo root when running from a subdirectory)
fn load_env_files() {
    if let Ok(env_path) = std::env::var("EXPLORE_ENV_FILE") {
        let _ = dotenvy::from_path(env_path);
        return;
    }
    let _ = dotenvy::from_path(".env");
    if std::env::var(API_KEY_VAR).is_err() {
        let _ = dotenvy::from_path("../.env");
    }
}

fn parsed<F, T>(env: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
