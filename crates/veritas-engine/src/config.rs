use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_SECS: f64 = 60.0;
const MIN_TIMEOUT_SECS: f64 = 5.0;
const MAX_TIMEOUT_SECS: f64 = 300.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown analysis provider '{provider}' (known: {})", .known.join(", "))]
    UnknownProvider { provider: String, known: Vec<String> },

    #[error("{0}")]
    NoModel(String),
}

/// Engine settings. `Default` is fully offline-safe: no key and no environment reads.
#[derive(Clone, PartialEq)]
pub struct EngineConfig {
    pub provider: String,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: Some(DEFAULT_MODEL.to_string()),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through `lookup`, which maps a variable name to its raw value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            provider: non_empty("VERITAS_PROVIDER")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or(defaults.provider),
            model: non_empty("VERITAS_MODEL").or(defaults.model),
            api_key: non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")),
            api_base: non_empty("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            request_timeout: Duration::from_secs_f64(timeout_secs(
                non_empty("VERITAS_REQUEST_TIMEOUT").as_deref(),
            )),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_request_timeout(mut self, secs: f64) -> Self {
        self.request_timeout = Duration::from_secs_f64(clamp_timeout(secs));
        self
    }
}

fn timeout_secs(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(clamp_timeout)
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
}

fn clamp_timeout(secs: f64) -> f64 {
    if !secs.is_finite() {
        return DEFAULT_TIMEOUT_SECS;
    }
    secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)
}
