//! Rendering seam for completed verdicts.

use veritas_contracts::AnalysisResult;

use crate::intake::PreviewRef;

pub const DISCLAIMER: &str =
    "AI detection is probabilistic. Results should be used as indicators, not definitive proof.";

/// Receives a verdict together with the preview of the image it describes.
///
/// The controller only calls `render` from the `Complete` state.
pub trait ResultPresenter {
    fn render(&self, result: &AnalysisResult, preview: &PreviewRef);
}

/// Plain-text report shared by terminal presenters.
pub fn text_report(result: &AnalysisResult, preview: &PreviewRef) -> String {
    let mut lines = vec![
        result.headline().to_string(),
        format!("Confidence: {}%", result.confidence_pct()),
        String::new(),
        result.rationale.trim().to_string(),
    ];
    if !result.artifacts.is_empty() {
        lines.push(String::new());
        lines.push("Detected artifacts:".to_string());
        for finding in &result.artifacts {
            lines.push(format!(
                "  - {}: {}",
                finding.category.label(),
                finding.description.trim()
            ));
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Preview: {} ({}, {} bytes)",
        preview.id(),
        preview.media_type(),
        preview.bytes().len()
    ));
    lines.push(DISCLAIMER.to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use veritas_contracts::{ArtifactCategory, ArtifactFinding, Classification};

    use super::*;
    use crate::intake::{intake, tests::png_file};

    #[test]
    fn report_lists_verdict_artifacts_and_disclaimer() -> anyhow::Result<()> {
        let uploaded = intake(&png_file())?;
        let result = AnalysisResult {
            classification: Classification::Manipulated,
            confidence: 0.734,
            rationale: " Cloned region near the left edge. ".to_string(),
            artifacts: vec![ArtifactFinding {
                category: ArtifactCategory::EditSeam,
                description: "repeated texture block".to_string(),
            }],
        };
        let report = text_report(&result, uploaded.preview());
        assert!(report.starts_with(result.headline()));
        assert!(report.contains("Confidence: 73%"));
        assert!(report.contains("Cloned region near the left edge."));
        assert!(report.contains("repeated texture block"));
        assert!(report.contains(&uploaded.preview().id().to_string()));
        assert!(report.ends_with(DISCLAIMER));
        Ok(())
    }

    #[test]
    fn report_omits_empty_artifact_section() -> anyhow::Result<()> {
        let uploaded = intake(&png_file())?;
        let result = AnalysisResult {
            classification: Classification::Real,
            confidence: 0.9,
            rationale: "Consistent sensor noise.".to_string(),
            artifacts: Vec::new(),
        };
        assert!(!text_report(&result, uploaded.preview()).contains("Detected artifacts"));
        Ok(())
    }
}
