//! Analysis clients: one blocking round trip from an encoded image to a verdict.

mod dryrun;
mod gemini;

use thiserror::Error;
use tracing::{debug, warn};
use veritas_contracts::models::{ModelSelector, VISION};
use veritas_contracts::providers::{NamedProvider, ProviderRegistry};
use veritas_contracts::{AnalysisResult, VerdictError};

use crate::config::{ConfigError, EngineConfig};

pub use dryrun::DryrunClient;
pub use gemini::GeminiClient;

/// Fixed instruction sent alongside every image.
pub const FORENSIC_INSTRUCTION: &str = "You are a digital image forensics examiner. \
Decide whether the attached image is an authentic camera photograph (real), fully \
synthesised by a generative model (ai-generated), or a real photograph that has been \
edited or composited (manipulated). Inspect it for diffusion artifacts, lighting and \
shadow inconsistencies, anatomical errors, unnatural textures, garbled text, broken \
perspective and edit seams. Respond only with JSON matching the provided schema: \
classification, confidence between 0 and 1, a concise rationale citing the evidence, \
and one artifacts entry per concrete finding (an empty list if there are none).";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("credentials missing: {0}")]
    MissingCredentials(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication rejected ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("model declined to answer: {0}")]
    Declined(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("malformed verdict: {0}")]
    Verdict(#[from] VerdictError),
}

impl AnalysisError {
    /// Short label for the failure class, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::MissingCredentials(_) | AnalysisError::Authentication { .. } => {
                "authentication"
            }
            AnalysisError::Transport(_) => "transport",
            AnalysisError::RateLimited { .. } => "rate_limited",
            AnalysisError::Service { .. } => "service",
            AnalysisError::Declined(_) => "declined",
            AnalysisError::Malformed(_) | AnalysisError::Verdict(_) => "malformed",
        }
    }
}

/// Remote classifier contract.
///
/// Implementations hold no per-session state. `analyze` is blocking; callers
/// that must stay responsive run it off their own thread.
pub trait AnalysisClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn analyze(&self, content: &str, media_type: &str) -> Result<AnalysisResult, AnalysisError>;
}

/// Deferred constructor for one backend; nothing is built until it is chosen.
struct ClientFactory {
    name: &'static str,
    build: fn(&EngineConfig, &str) -> Box<dyn AnalysisClient>,
}

impl NamedProvider for ClientFactory {
    fn name(&self) -> &str {
        self.name
    }
}

fn client_factories() -> ProviderRegistry<ClientFactory> {
    ProviderRegistry::new(vec![
        ClientFactory {
            name: "gemini",
            build: |config, model| {
                Box::new(GeminiClient::new(config, model)) as Box<dyn AnalysisClient>
            },
        },
        ClientFactory {
            name: "dryrun",
            build: |_, model| Box::new(DryrunClient::new(model)) as Box<dyn AnalysisClient>,
        },
    ])
}

/// Names accepted by [`build_client`], sorted.
pub fn known_providers() -> Vec<String> {
    client_factories().names()
}

/// Build the client named by `config.provider`, resolving its model for vision input.
pub fn build_client(config: &EngineConfig) -> Result<Box<dyn AnalysisClient>, ConfigError> {
    let provider = config.provider.trim().to_ascii_lowercase();
    let factories = client_factories();
    if !factories.contains(&provider) {
        return Err(ConfigError::UnknownProvider {
            provider,
            known: factories.names(),
        });
    }

    let selection = ModelSelector::new(None)
        .select(config.model.as_deref(), &provider, VISION)
        .map_err(ConfigError::NoModel)?;
    if let Some(reason) = selection.fallback_reason.as_deref() {
        if selection.requested.is_some() {
            warn!(model = %selection.model.name, "{reason}");
        } else {
            debug!(model = %selection.model.name, "{reason}");
        }
    }

    let known = factories.names();
    let factory = factories
        .take(&provider)
        .ok_or(ConfigError::UnknownProvider { provider, known })?;
    Ok((factory.build)(config, &selection.model.name))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_resolves_provider_and_model() -> anyhow::Result<()> {
        let config = EngineConfig::default().with_provider("dryrun");
        let client = build_client(&config)?;
        assert_eq!(client.name(), "dryrun");
        assert_eq!(client.model(), "dryrun-vision-1");

        let config = EngineConfig::default().with_model("gemini-2.5-pro");
        let client = build_client(&config)?;
        assert_eq!(client.name(), "gemini");
        assert_eq!(client.model(), "gemini-2.5-pro");
        Ok(())
    }

    #[test]
    fn build_client_falls_back_to_provider_default() -> anyhow::Result<()> {
        let config = EngineConfig::default()
            .with_provider("gemini")
            .with_model("dryrun-vision-1");
        let client = build_client(&config)?;
        assert_eq!(client.model(), "gemini-2.5-flash");
        Ok(())
    }

    #[test]
    fn build_client_rejects_unknown_provider() {
        let config = EngineConfig::default().with_provider("oracle");
        match build_client(&config) {
            Err(ConfigError::UnknownProvider { provider, known }) => {
                assert_eq!(provider, "oracle");
                assert_eq!(known, vec!["dryrun", "gemini"]);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(client) => panic!("unexpected client {}", client.name()),
        }
    }

    #[test]
    fn every_known_provider_builds_its_own_backend() -> anyhow::Result<()> {
        assert_eq!(known_providers(), vec!["dryrun", "gemini"]);
        for provider in known_providers() {
            let client = build_client(&EngineConfig::default().with_provider(provider.as_str()))?;
            assert_eq!(client.name(), provider);
        }
        Ok(())
    }

    #[test]
    fn error_kinds_group_causes() {
        assert_eq!(
            AnalysisError::MissingCredentials("GEMINI_API_KEY".to_string()).kind(),
            "authentication"
        );
        assert_eq!(
            AnalysisError::RateLimited {
                retry_after_secs: Some(3)
            }
            .kind(),
            "rate_limited"
        );
        assert_eq!(
            AnalysisError::from(VerdictError::BlankRationale).kind(),
            "malformed"
        );
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
