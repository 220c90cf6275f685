use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolve `requested` for `capability`, preferring models served by `provider`.
    pub fn select(
        &self,
        requested: Option<&str>,
        provider: &str,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            match self.registry.ensure(requested_value, capability) {
                Some(model) if model.provider == provider => {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(_) => (
                    Some(format!(
                        "Requested model '{requested_value}' is not served by provider '{provider}'."
                    )),
                    Some(requested_value.to_string()),
                ),
                None => (
                    Some(format!(
                        "Requested model '{requested_value}' unavailable for capability '{capability}'."
                    )),
                    Some(requested_value.to_string()),
                ),
            }
        } else {
            (Some("No model specified; using default.".to_string()), None)
        };

        let candidates = self.registry.by_provider(provider, capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}' on provider '{provider}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
