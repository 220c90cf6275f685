//! Session state machine driving one image through intake and analysis.
//!
//! The remote call runs on a named worker thread; its outcome comes back over
//! an mpsc channel tagged with the generation that started it. Only the
//! outcome for the current generation may move the session out of
//! `Analyzing`, so a reset or a newer selection always wins over a late reply.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use veritas_contracts::AnalysisResult;

use crate::analysis::{AnalysisClient, AnalysisError};
use crate::intake::{intake, ImageFile, UploadedImage};
use crate::presenter::ResultPresenter;

pub const ANALYSIS_FAILED_MESSAGE: &str =
    "Failed to analyze the image. Please ensure the API key is valid or try a different image.";
pub const INTAKE_FAILED_MESSAGE: &str =
    "The selected file could not be read as a supported image (PNG, JPEG, WebP or GIF).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisState {
    Idle,
    Analyzing,
    Complete,
    Error,
}

impl AnalysisState {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Analyzing => "analyzing",
            AnalysisState::Complete => "complete",
            AnalysisState::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The whole session. Each variant carries exactly the data valid in that state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Session {
    #[default]
    Idle,
    Analyzing {
        image: Arc<UploadedImage>,
    },
    Complete {
        image: Arc<UploadedImage>,
        result: AnalysisResult,
    },
    /// `image` is `None` only when intake itself failed.
    Error {
        image: Option<Arc<UploadedImage>>,
        message: String,
    },
}

impl Session {
    pub fn state(&self) -> AnalysisState {
        match self {
            Session::Idle => AnalysisState::Idle,
            Session::Analyzing { .. } => AnalysisState::Analyzing,
            Session::Complete { .. } => AnalysisState::Complete,
            Session::Error { .. } => AnalysisState::Error,
        }
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        match self {
            Session::Idle => None,
            Session::Analyzing { image } | Session::Complete { image, .. } => Some(image),
            Session::Error { image, .. } => image.as_deref(),
        }
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            Session::Complete { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Session::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("an image can only be selected from a fresh session (current state: {0}); reset first")]
    Busy(AnalysisState),

    #[error("nothing to retry while {0}")]
    NothingToRetry(AnalysisState),
}

/// What happened to one outcome taken off the worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The outcome belonged to the current analysis and moved the session.
    Applied(AnalysisState),
    /// The outcome belonged to a superseded analysis and was dropped.
    Stale { generation: u64 },
}

struct AnalysisOutcome {
    generation: u64,
    result: Result<AnalysisResult, AnalysisError>,
}

pub struct WorkflowController {
    client: Arc<dyn AnalysisClient>,
    session: Session,
    generation: u64,
    cancel: Option<Arc<AtomicBool>>,
    outcome_tx: Sender<AnalysisOutcome>,
    outcome_rx: Receiver<AnalysisOutcome>,
    /// Holds the next worker before its cancellation check.
    #[cfg(test)]
    start_gate: Option<Receiver<()>>,
}

impl WorkflowController {
    pub fn new(client: Arc<dyn AnalysisClient>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Self {
            client,
            session: Session::Idle,
            generation: 0,
            cancel: None,
            outcome_tx,
            outcome_rx,
            #[cfg(test)]
            start_gate: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> AnalysisState {
        self.session.state()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn client(&self) -> &dyn AnalysisClient {
        self.client.as_ref()
    }

    /// Swap the analysis backend. Refused while an analysis is in flight.
    pub fn set_client(&mut self, client: Arc<dyn AnalysisClient>) -> Result<(), WorkflowError> {
        if matches!(self.session, Session::Analyzing { .. }) {
            return Err(WorkflowError::Busy(AnalysisState::Analyzing));
        }
        info!(provider = client.name(), model = client.model(), "analysis client changed");
        self.client = client;
        Ok(())
    }

    /// Accept a user selection. Only a fresh (`Idle`) session takes a new image.
    ///
    /// Intake failures settle the session in `Error` without any remote call.
    /// On success the session is `Analyzing` before this returns and the
    /// verdict arrives through [`poll`](Self::poll) or [`wait`](Self::wait).
    pub fn select(&mut self, file: &ImageFile) -> Result<AnalysisState, WorkflowError> {
        let state = self.state();
        if state != AnalysisState::Idle {
            return Err(WorkflowError::Busy(state));
        }

        let image = match intake(file) {
            Ok(image) => Arc::new(image),
            Err(err) => {
                warn!(file = file.name(), error = %err, "image intake failed");
                self.session = Session::Error {
                    image: None,
                    message: INTAKE_FAILED_MESSAGE.to_string(),
                };
                return Ok(AnalysisState::Error);
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let cancel = Arc::new(AtomicBool::new(false));
        let client = Arc::clone(&self.client);
        let outcome_tx = self.outcome_tx.clone();
        let worker_image = Arc::clone(&image);
        let worker_cancel = Arc::clone(&cancel);
        #[cfg(test)]
        let start_gate = self.start_gate.take();

        let spawned = thread::Builder::new()
            .name(format!("veritas-analysis-{generation}"))
            .spawn(move || {
                #[cfg(test)]
                let _ = start_gate.map(|gate| gate.recv());
                if worker_cancel.load(Ordering::SeqCst) {
                    return;
                }
                let result = client.analyze(worker_image.content(), worker_image.media_type());
                if worker_cancel.load(Ordering::SeqCst) {
                    debug!(generation, "analysis finished after cancellation");
                }
                let _ = outcome_tx.send(AnalysisOutcome { generation, result });
            });

        match spawned {
            Ok(_) => {
                info!(
                    generation,
                    file = image.file_name(),
                    media_type = image.media_type(),
                    provider = self.client.name(),
                    model = self.client.model(),
                    "analysis started"
                );
                self.cancel = Some(cancel);
                self.session = Session::Analyzing { image };
                Ok(AnalysisState::Analyzing)
            }
            Err(err) => {
                error!(generation, error = %err, "failed to spawn analysis worker");
                self.session = Session::Error {
                    image: Some(image),
                    message: ANALYSIS_FAILED_MESSAGE.to_string(),
                };
                Ok(AnalysisState::Error)
            }
        }
    }

    /// Read `path` from disk and select it. An unreadable file is an intake failure.
    pub fn select_path(&mut self, path: &Path) -> Result<AnalysisState, WorkflowError> {
        let state = self.state();
        if state != AnalysisState::Idle {
            return Err(WorkflowError::Busy(state));
        }
        match ImageFile::open(path) {
            Ok(file) => self.select(&file),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "image intake failed");
                self.session = Session::Error {
                    image: None,
                    message: INTAKE_FAILED_MESSAGE.to_string(),
                };
                Ok(AnalysisState::Error)
            }
        }
    }

    /// Apply a pending outcome without blocking.
    pub fn poll(&mut self) -> Option<Delivery> {
        let outcome = self.outcome_rx.try_recv().ok()?;
        Some(self.apply(outcome))
    }

    /// Block up to `timeout` for the next outcome.
    pub fn wait(&mut self, timeout: Duration) -> Option<Delivery> {
        match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => Some(self.apply(outcome)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain outcomes until the session leaves `Analyzing` or `timeout` elapses.
    pub fn wait_until_settled(&mut self, timeout: Duration) -> AnalysisState {
        let deadline = Instant::now() + timeout;
        while self.state() == AnalysisState::Analyzing {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.wait(remaining);
        }
        self.state()
    }

    /// Discard the session from any state. Any in-flight analysis becomes stale.
    pub fn reset(&mut self) -> &Session {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        let previous = self.state();
        if previous != AnalysisState::Idle {
            self.generation += 1;
            info!(from = %previous, generation = self.generation, "session reset");
        }
        self.session = Session::Idle;
        &self.session
    }

    /// Reset and, when the discarded session held an image, analyze the same bytes again.
    pub fn retry(&mut self) -> Result<AnalysisState, WorkflowError> {
        let state = self.state();
        if !matches!(state, AnalysisState::Complete | AnalysisState::Error) {
            return Err(WorkflowError::NothingToRetry(state));
        }
        let source = self.session.image().map(UploadedImage::source_file);
        self.reset();
        match source {
            Some(file) => self.select(&file),
            None => Ok(AnalysisState::Idle),
        }
    }

    /// Hand a completed verdict to `presenter`. Returns whether anything was rendered.
    pub fn present(&self, presenter: &dyn ResultPresenter) -> bool {
        match &self.session {
            Session::Complete { image, result } => {
                presenter.render(result, image.preview());
                true
            }
            _ => false,
        }
    }

    fn apply(&mut self, outcome: AnalysisOutcome) -> Delivery {
        let AnalysisOutcome { generation, result } = outcome;
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale analysis outcome");
            return Delivery::Stale { generation };
        }
        let image = match std::mem::take(&mut self.session) {
            Session::Analyzing { image } => image,
            other => {
                self.session = other;
                debug!(generation, "discarding outcome for a settled session");
                return Delivery::Stale { generation };
            }
        };
        self.cancel = None;

        self.session = match result {
            Ok(result) => {
                info!(
                    generation,
                    classification = %result.classification,
                    confidence = result.confidence,
                    "analysis complete"
                );
                Session::Complete { image, result }
            }
            Err(err) => {
                warn!(generation, kind = err.kind(), error = %err, "analysis failed");
                Session::Error {
                    image: Some(image),
                    message: ANALYSIS_FAILED_MESSAGE.to_string(),
                }
            }
        };
        Delivery::Applied(self.state())
    }
}

impl Drop for WorkflowController {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
    }
}
