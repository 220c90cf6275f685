use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Real-vs-synthetic call made by the remote model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Real,
    AiGenerated,
    Manipulated,
}

impl Classification {
    pub const ALL: [Classification; 3] = [
        Classification::Real,
        Classification::AiGenerated,
        Classification::Manipulated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Real => "real",
            Classification::AiGenerated => "ai-generated",
            Classification::Manipulated => "manipulated",
        }
    }

    pub fn is_authentic(&self) -> bool {
        matches!(self, Classification::Real)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactCategory {
    DiffusionArtifact,
    LightingInconsistency,
    AnatomicalError,
    TextureAnomaly,
    TextGarbling,
    PerspectiveError,
    EditSeam,
    Other,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 8] = [
        ArtifactCategory::DiffusionArtifact,
        ArtifactCategory::LightingInconsistency,
        ArtifactCategory::AnatomicalError,
        ArtifactCategory::TextureAnomaly,
        ArtifactCategory::TextGarbling,
        ArtifactCategory::PerspectiveError,
        ArtifactCategory::EditSeam,
        ArtifactCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactCategory::DiffusionArtifact => "diffusion-artifact",
            ArtifactCategory::LightingInconsistency => "lighting-inconsistency",
            ArtifactCategory::AnatomicalError => "anatomical-error",
            ArtifactCategory::TextureAnomaly => "texture-anomaly",
            ArtifactCategory::TextGarbling => "text-garbling",
            ArtifactCategory::PerspectiveError => "perspective-error",
            ArtifactCategory::EditSeam => "edit-seam",
            ArtifactCategory::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactCategory::DiffusionArtifact => "Diffusion artifact",
            ArtifactCategory::LightingInconsistency => "Lighting inconsistency",
            ArtifactCategory::AnatomicalError => "Anatomical error",
            ArtifactCategory::TextureAnomaly => "Texture anomaly",
            ArtifactCategory::TextGarbling => "Garbled text",
            ArtifactCategory::PerspectiveError => "Perspective error",
            ArtifactCategory::EditSeam => "Edit seam",
            ArtifactCategory::Other => "Other",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactFinding {
    pub category: ArtifactCategory,
    pub description: String,
}

/// Forensic verdict returned by the analysis backend.
///
/// Every field is required on the wire. A value of this type is only ever
/// produced by [`AnalysisResult::from_model_text`] or [`AnalysisResult::validate`],
/// so a partially populated verdict never escapes the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisResult {
    pub classification: Classification,
    pub confidence: f64,
    pub rationale: String,
    pub artifacts: Vec<ArtifactFinding>,
}

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("verdict payload is empty")]
    Empty,

    #[error("verdict payload is not valid JSON for the expected schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("rationale is blank")]
    BlankRationale,
}

impl AnalysisResult {
    /// Parse the raw text emitted by the model.
    ///
    /// A surrounding markdown code fence is tolerated; nothing else is repaired.
    pub fn from_model_text(text: &str) -> Result<Self, VerdictError> {
        let body = strip_code_fence(text);
        if body.is_empty() {
            return Err(VerdictError::Empty);
        }
        let parsed: AnalysisResult = serde_json::from_str(body)?;
        parsed.validate()
    }

    pub fn validate(self) -> Result<Self, VerdictError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(VerdictError::ConfidenceOutOfRange(self.confidence));
        }
        if self.rationale.trim().is_empty() {
            return Err(VerdictError::BlankRationale);
        }
        Ok(self)
    }

    pub fn headline(&self) -> &'static str {
        match self.classification {
            Classification::Real => "Likely Real",
            Classification::AiGenerated => "Likely AI-Generated",
            Classification::Manipulated => "Likely Manipulated",
        }
    }

    pub fn confidence_pct(&self) -> u8 {
        (self.confidence * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json` on the opening fence line.
    match body.split_once('\n') {
        Some((info, inner)) if !info.trim_start().starts_with('{') => inner.trim(),
        _ => body.trim(),
    }
}

/// OpenAPI-style schema handed to the model as its structured output contract.
pub fn response_schema() -> Value {
    let classifications: Vec<&str> = Classification::ALL.iter().map(|c| c.as_str()).collect();
    let categories: Vec<&str> = ArtifactCategory::ALL.iter().map(|c| c.as_str()).collect();
    json!({
        "type": "OBJECT",
        "properties": {
            "classification": {
                "type": "STRING",
                "enum": classifications,
                "description": "Overall authenticity call for the image.",
            },
            "confidence": {
                "type": "NUMBER",
                "description": "Confidence in the classification, from 0.0 to 1.0.",
            },
            "rationale": {
                "type": "STRING",
                "description": "Concise forensic reasoning supporting the classification.",
            },
            "artifacts": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "category": { "type": "STRING", "enum": categories },
                        "description": { "type": "STRING" },
                    },
                    "required": ["category", "description"],
                },
            },
        },
        "required": ["classification", "confidence", "rationale", "artifacts"],
        "propertyOrdering": ["classification", "confidence", "rationale", "artifacts"],
    })
}
