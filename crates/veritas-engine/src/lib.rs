//! Image intake, remote analysis and the session state machine that ties them together.

pub mod analysis;
pub mod config;
pub mod intake;
pub mod presenter;
pub mod workflow;

pub use analysis::{build_client, known_providers, AnalysisClient, AnalysisError};
pub use config::{ConfigError, EngineConfig};
pub use intake::{intake, ImageFile, IntakeError, PreviewRef, UploadedImage};
pub use presenter::{ResultPresenter, DISCLAIMER};
pub use workflow::{
    AnalysisState, Delivery, Session, WorkflowController, WorkflowError, ANALYSIS_FAILED_MESSAGE,
    INTAKE_FAILED_MESSAGE,
};
