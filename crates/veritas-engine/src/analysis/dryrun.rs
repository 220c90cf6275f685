use sha2::{Digest, Sha256};
use tracing::debug;
use veritas_contracts::{AnalysisResult, ArtifactCategory, ArtifactFinding, Classification};

use super::{AnalysisClient, AnalysisError};

/// Offline backend. The verdict is a pure function of the encoded content and
/// carries no forensic meaning; it exists for demos and smoke tests.
pub struct DryrunClient {
    model: String,
}

impl DryrunClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

impl AnalysisClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn analyze(&self, content: &str, media_type: &str) -> Result<AnalysisResult, AnalysisError> {
        let mut hasher = Sha256::new();
        hasher.update(media_type.as_bytes());
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();

        let classification = Classification::ALL[digest[0] as usize % Classification::ALL.len()];
        let confidence = (50.0 + f64::from(digest[1]) * 49.0 / 255.0).round() / 100.0;
        let artifacts = if classification.is_authentic() {
            Vec::new()
        } else {
            let category = ArtifactCategory::ALL[digest[2] as usize % ArtifactCategory::ALL.len()];
            vec![ArtifactFinding {
                category,
                description: format!("{} placeholder finding", category.label()),
            }]
        };
        let short = hex::encode(&digest[..4]);
        debug!(digest = %short, %classification, "dryrun verdict");

        Ok(AnalysisResult {
            classification,
            confidence,
            rationale: format!(
                "Dryrun verdict derived from content digest {short}; no forensic analysis was performed."
            ),
            artifacts,
        }
        .validate()?)
    }
}
