use std::cell::RefCell;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use veritas_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use veritas_contracts::models::{ModelRegistry, VISION};
use veritas_contracts::AnalysisResult;
use veritas_engine::presenter::text_report;
use veritas_engine::{
    build_client, known_providers, AnalysisState, Delivery, EngineConfig, PreviewRef,
    ResultPresenter, Session, WorkflowController,
};

/// Extra time allowed past the request timeout before a wait gives up.
const SETTLE_MARGIN: Duration = Duration::from_secs(5);
/// How often the chat loop checks for a finished analysis while waiting for input.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const EXIT_COMPLETE: i32 = 0;
const EXIT_ANALYSIS_FAILED: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "veritas",
    version,
    about = "Check whether an image is a real photograph, AI-generated or manipulated"
)]
struct Cli {
    /// Log engine activity at debug level (overrides RUST_LOG).
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: select images, inspect verdicts, reset and retry.
    Chat(ChatArgs),
    /// Analyze one image and exit (0 on a verdict, 2 on failure).
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct BackendArgs {
    /// Analysis provider (gemini or dryrun). Defaults to VERITAS_PROVIDER.
    #[arg(long)]
    provider: Option<String>,
    /// Model name. Defaults to VERITAS_MODEL or the provider default.
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Args)]
struct CheckArgs {
    path: PathBuf,
    #[command(flatten)]
    backend: BackendArgs,
    /// Print the session as JSON instead of a report.
    #[arg(long)]
    json: bool,
    /// Request timeout in seconds (clamped to 5-300).
    #[arg(long)]
    timeout: Option<f64>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("veritas error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(EXIT_COMPLETE)
        }
        Command::Check(args) => run_check(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("veritas=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "veritas=warn".into())
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn resolve_config(base: EngineConfig, backend: &BackendArgs) -> EngineConfig {
    let mut config = base;
    if let Some(provider) = backend.provider.as_deref() {
        config = config.with_provider(provider.trim().to_ascii_lowercase());
        if backend.model.is_none() {
            config.model = None;
        }
    }
    if let Some(model) = backend.model.as_deref() {
        config = config.with_model(model.trim());
    }
    config
}

fn controller_for(config: &EngineConfig) -> Result<WorkflowController> {
    let client = build_client(config).context("failed to configure analysis client")?;
    debug!(provider = client.name(), model = client.model(), "analysis client ready");
    Ok(WorkflowController::new(Arc::from(client)))
}

fn run_check(args: CheckArgs) -> Result<i32> {
    let mut config = resolve_config(EngineConfig::from_env(), &args.backend);
    if let Some(timeout) = args.timeout {
        config = config.with_request_timeout(timeout);
    }
    let mut controller = controller_for(&config)?;
    controller.select_path(&args.path)?;
    let state = controller.wait_until_settled(config.request_timeout + SETTLE_MARGIN);
    if state == AnalysisState::Analyzing {
        bail!(
            "analysis of {} did not finish within {:?}",
            args.path.display(),
            config.request_timeout + SETTLE_MARGIN
        );
    }

    let mut stdout = io::stdout().lock();
    if args.json {
        writeln!(
            stdout,
            "{}",
            serde_json::to_string_pretty(&session_json(controller.session())?)?
        )?;
    } else {
        report_session(&controller, &mut stdout)?;
    }
    Ok(exit_code(state))
}

fn exit_code(state: AnalysisState) -> i32 {
    match state {
        AnalysisState::Complete => EXIT_COMPLETE,
        _ => EXIT_ANALYSIS_FAILED,
    }
}

fn session_json(session: &Session) -> Result<Value> {
    let image = session.image().map(|image| {
        let (width, height) = image.dimensions();
        json!({
            "file_name": image.file_name(),
            "media_type": image.media_type(),
            "width": width,
            "height": height,
            "preview_id": image.preview().id().to_string(),
        })
    });
    let result = session
        .result()
        .map(serde_json::to_value)
        .transpose()
        .context("failed to serialize verdict")?;
    Ok(json!({
        "state": session.state().as_str(),
        "image": image.unwrap_or(Value::Null),
        "result": result.unwrap_or(Value::Null),
        "error": session.error_message(),
    }))
}

/// Writes the plain-text report, stamped with the local time of rendering.
///
/// `render` cannot fail, so a write error is held until [`finish`](Self::finish).
struct TerminalPresenter<W: Write> {
    out: RefCell<W>,
    failure: RefCell<Option<io::Error>>,
}

impl<W: Write> TerminalPresenter<W> {
    fn new(out: W) -> Self {
        Self {
            out: RefCell::new(out),
            failure: RefCell::new(None),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self.failure.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<W: Write> ResultPresenter for TerminalPresenter<W> {
    fn render(&self, result: &AnalysisResult, preview: &PreviewRef) {
        let mut out = self.out.borrow_mut();
        if let Err(err) = write_report(&mut *out, result, preview) {
            debug!(error = %err, "failed to write analysis report");
            self.failure.replace(Some(err));
        }
    }
}

fn write_report(
    out: &mut impl Write,
    result: &AnalysisResult,
    preview: &PreviewRef,
) -> io::Result<()> {
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(out, "Analysis ({stamp})")?;
    writeln!(out, "{}", text_report(result, preview))?;
    out.flush()
}

fn report_session(controller: &WorkflowController, out: &mut dyn Write) -> Result<()> {
    match controller.session() {
        Session::Idle => writeln!(out, "No image selected. Use /analyze <path>.")?,
        Session::Analyzing { image } => writeln!(
            out,
            "Still analyzing {}. Use /wait to keep waiting.",
            image.file_name()
        )?,
        Session::Complete { .. } => {
            let presenter = TerminalPresenter::new(&mut *out);
            controller.present(&presenter);
            presenter.finish()?;
        }
        Session::Error { message, .. } => writeln!(out, "{message}")?,
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct ChatSession {
    config: EngineConfig,
    controller: WorkflowController,
}

impl ChatSession {
    fn new(config: EngineConfig) -> Result<Self> {
        let controller = controller_for(&config)?;
        Ok(Self::with_controller(config, controller))
    }

    fn with_controller(config: EngineConfig, controller: WorkflowController) -> Self {
        Self { config, controller }
    }

    fn settle_timeout(&self) -> Duration {
        self.config.request_timeout + SETTLE_MARGIN
    }

    fn handle(&mut self, intent: &Intent, out: &mut dyn Write) -> Result<Flow> {
        match intent.action.as_str() {
            "noop" => {}
            "help" => writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?,
            "quit" => return Ok(Flow::Quit),
            "analyze" => {
                let Some(path) = intent.arg_str("path").filter(|path| !path.is_empty()) else {
                    writeln!(out, "/analyze requires a path")?;
                    return Ok(Flow::Continue);
                };
                match self.controller.select_path(Path::new(path)) {
                    Ok(AnalysisState::Analyzing) => self.announce(out)?,
                    Ok(_) => report_session(&self.controller, out)?,
                    Err(err) => writeln!(out, "{err}")?,
                }
            }
            "status" => self.write_status(out)?,
            "wait" => {
                self.controller.wait_until_settled(self.settle_timeout());
                report_session(&self.controller, out)?;
            }
            "show" => report_session(&self.controller, out)?,
            "reset" => {
                self.controller.reset();
                writeln!(out, "Session reset.")?;
            }
            "retry" => match self.controller.retry() {
                Ok(AnalysisState::Analyzing) => self.announce(out)?,
                Ok(AnalysisState::Idle) => {
                    writeln!(out, "Nothing to re-analyze. Use /analyze <path>.")?
                }
                Ok(_) => report_session(&self.controller, out)?,
                Err(err) => writeln!(out, "{err}")?,
            },
            "set_model" => {
                let model = intent.arg_str("model").unwrap_or_default().trim();
                if model.is_empty() {
                    let client = self.controller.client();
                    let available: Vec<String> = ModelRegistry::new(None)
                        .by_provider(client.name(), VISION)
                        .into_iter()
                        .map(|spec| spec.name)
                        .collect();
                    writeln!(
                        out,
                        "Model: {} (available: {})",
                        client.model(),
                        available.join(", ")
                    )?;
                } else {
                    let config = self.config.clone().with_model(model);
                    self.switch_backend(config, out)?;
                }
            }
            "set_provider" => {
                let provider = intent.arg_str("provider").unwrap_or_default().trim();
                if provider.is_empty() {
                    writeln!(
                        out,
                        "Provider: {} (available: {})",
                        self.controller.client().name(),
                        known_providers().join(", ")
                    )?;
                } else {
                    let mut config = self.config.clone().with_provider(provider.to_ascii_lowercase());
                    config.model = None;
                    self.switch_backend(config, out)?;
                }
            }
            _ => {
                let command = intent.arg_str("command").unwrap_or(intent.raw.as_str());
                writeln!(out, "Unknown command: /{command}. Type /help for commands.")?;
            }
        }
        Ok(Flow::Continue)
    }

    fn announce(&self, out: &mut dyn Write) -> Result<()> {
        if let Some(image) = self.controller.session().image() {
            let (width, height) = image.dimensions();
            writeln!(
                out,
                "Analyzing {} ({}x{}) with {}/{}... (/status, /wait or /reset meanwhile)",
                image.file_name(),
                width,
                height,
                self.controller.client().name(),
                self.controller.client().model()
            )?;
            out.flush()?;
        }
        Ok(())
    }

    /// Apply finished analyses and report the ones that settled the session.
    fn drain(&mut self, out: &mut dyn Write) -> Result<bool> {
        let mut reported = false;
        while let Some(delivery) = self.controller.poll() {
            if let Delivery::Applied(_) = delivery {
                report_session(&self.controller, out)?;
                reported = true;
            }
        }
        Ok(reported)
    }

    fn write_status(&self, out: &mut dyn Write) -> Result<()> {
        let session = self.controller.session();
        write!(out, "State: {}", session.state())?;
        if let Some(image) = session.image() {
            write!(out, " | image: {}", image.file_name())?;
        }
        writeln!(
            out,
            " | backend: {}/{}",
            self.controller.client().name(),
            self.controller.client().model()
        )?;
        Ok(())
    }

    fn switch_backend(&mut self, config: EngineConfig, out: &mut dyn Write) -> Result<()> {
        let client = match build_client(&config) {
            Ok(client) => client,
            Err(err) => {
                writeln!(out, "{err}")?;
                return Ok(());
            }
        };
        match self.controller.set_client(Arc::from(client)) {
            Ok(()) => {
                writeln!(
                    out,
                    "Backend set to {}/{}",
                    self.controller.client().name(),
                    self.controller.client().model()
                )?;
                self.config = config;
            }
            Err(err) => writeln!(out, "{err}")?,
        }
        Ok(())
    }
}

fn spawn_line_reader() -> Result<Receiver<io::Result<String>>> {
    let (line_tx, line_rx) = mpsc::channel();
    thread::Builder::new()
        .name("veritas-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            loop {
                let mut line = String::new();
                match stdin.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if line_tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        let _ = line_tx.send(Err(err));
                        break;
                    }
                }
            }
        })
        .context("failed to start input reader")?;
    Ok(line_rx)
}

fn prompt(out: &mut dyn Write) -> Result<()> {
    write!(out, "> ")?;
    out.flush()?;
    Ok(())
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = resolve_config(EngineConfig::from_env(), &args.backend);
    let mut session = ChatSession::new(config)?;
    let lines = spawn_line_reader()?;

    println!("Veritas chat started. Type /help for commands.");
    prompt(&mut io::stdout())?;

    loop {
        let mut settled = Vec::new();
        if session.drain(&mut settled)? {
            let mut stdout = io::stdout().lock();
            writeln!(stdout)?;
            stdout.write_all(&settled)?;
            prompt(&mut stdout)?;
        }

        let line = match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        let mut stdout = io::stdout().lock();
        if session.handle(&intent, &mut stdout)? == Flow::Quit {
            break;
        }
        prompt(&mut stdout)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use image::{Rgb, RgbImage};
    use veritas_engine::{AnalysisClient, AnalysisError, DISCLAIMER, INTAKE_FAILED_MESSAGE};

    use super::*;

    const SETTLE: Duration = Duration::from_secs(5);

    fn dryrun_session() -> Result<ChatSession> {
        ChatSession::new(
            EngineConfig::default()
                .with_provider("dryrun")
                .with_model("dryrun-vision-1"),
        )
    }

    /// Never answers until the test drops the sending half of `release`.
    struct StalledClient {
        release: Mutex<Receiver<()>>,
    }

    impl AnalysisClient for StalledClient {
        fn name(&self) -> &str {
            "stalled"
        }

        fn model(&self) -> &str {
            "stalled-1"
        }

        fn analyze(
            &self,
            _content: &str,
            _media_type: &str,
        ) -> Result<AnalysisResult, AnalysisError> {
            if let Ok(release) = self.release.lock() {
                let _ = release.recv();
            }
            Err(AnalysisError::Transport("released".to_string()))
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn say(session: &mut ChatSession, input: &str) -> Result<(Flow, String)> {
        let mut out = Vec::new();
        let flow = session.handle(&parse_intent(input), &mut out)?;
        Ok((flow, String::from_utf8(out)?))
    }

    fn write_png(dir: &Path, name: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        let mut img = RgbImage::new(6, 4);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([x as u8 * 30, y as u8 * 50, 120]);
        }
        img.save(&path)?;
        Ok(path)
    }

    #[test]
    fn check_arguments_parse() -> Result<()> {
        let cli = Cli::try_parse_from([
            "veritas",
            "check",
            "photo.jpg",
            "--provider",
            "dryrun",
            "--json",
            "--timeout",
            "30",
            "--verbose",
        ])?;
        assert!(cli.verbose);
        match cli.command {
            Command::Check(args) => {
                assert_eq!(args.path, PathBuf::from("photo.jpg"));
                assert_eq!(args.backend.provider.as_deref(), Some("dryrun"));
                assert!(args.json);
                assert_eq!(args.timeout, Some(30.0));
            }
            Command::Chat(_) => bail!("expected check"),
        }
        Ok(())
    }

    #[test]
    fn provider_flag_drops_inherited_model() {
        let base = EngineConfig::default().with_model("gemini-2.5-pro");
        let backend = BackendArgs {
            provider: Some("DryRun".to_string()),
            model: None,
        };
        let config = resolve_config(base.clone(), &backend);
        assert_eq!(config.provider, "dryrun");
        assert_eq!(config.model, None);

        let backend = BackendArgs {
            provider: None,
            model: Some("gemini-2.5-flash-lite".to_string()),
        };
        let config = resolve_config(base, &backend);
        assert_eq!(config.provider, "gemini");
        assert_eq!(config.model.as_deref(), Some("gemini-2.5-flash-lite"));
    }

    #[test]
    fn chat_analyze_show_and_reset() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "beach.png")?;
        let mut session = dryrun_session()?;

        let (flow, output) = say(&mut session, &format!("/analyze {}", path.display()))?;
        assert_eq!(flow, Flow::Continue);
        assert!(output.contains("Analyzing beach.png (6x4) with dryrun/dryrun-vision-1"));
        assert!(!output.contains("Confidence:"));
        assert_eq!(session.controller.state(), AnalysisState::Analyzing);

        let (_, output) = say(&mut session, "/wait")?;
        assert!(output.contains("Confidence:"));
        assert!(output.contains(DISCLAIMER));
        assert_eq!(session.controller.state(), AnalysisState::Complete);

        let (_, output) = say(&mut session, &format!("/analyze {}", path.display()))?;
        assert!(output.contains("reset first"));

        let (_, output) = say(&mut session, "/status")?;
        assert!(output.starts_with("State: complete | image: beach.png"));

        let (_, output) = say(&mut session, "/reset")?;
        assert_eq!(output.trim(), "Session reset.");
        assert_eq!(session.controller.session(), &Session::Idle);

        let (_, output) = say(&mut session, "/show")?;
        assert!(output.contains("No image selected"));
        Ok(())
    }

    #[test]
    fn chat_reports_intake_failure_and_retry_returns_idle() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.png");
        std::fs::write(&notes, b"definitely not a png")?;
        let mut session = dryrun_session()?;

        let (_, output) = say(&mut session, &notes.display().to_string())?;
        assert_eq!(output.trim(), INTAKE_FAILED_MESSAGE);
        assert_eq!(session.controller.state(), AnalysisState::Error);

        let (_, output) = say(&mut session, "/retry")?;
        assert!(output.contains("Nothing to re-analyze"));
        assert_eq!(session.controller.state(), AnalysisState::Idle);
        Ok(())
    }

    #[test]
    fn chat_retry_reanalyzes_completed_image() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "pier.png")?;
        let mut session = dryrun_session()?;
        say(&mut session, &format!("/check {}", path.display()))?;
        say(&mut session, "/wait")?;
        let first = session.controller.session().result().cloned();
        assert!(first.is_some());

        let (_, output) = say(&mut session, "/retry")?;
        assert!(output.contains("Analyzing pier.png"));
        say(&mut session, "/wait")?;
        assert_eq!(session.controller.state(), AnalysisState::Complete);
        assert_eq!(session.controller.session().result().cloned(), first);
        Ok(())
    }

    #[test]
    fn chat_backend_commands() -> Result<()> {
        let mut session = dryrun_session()?;

        let (_, output) = say(&mut session, "/provider")?;
        assert_eq!(output.trim(), "Provider: dryrun (available: dryrun, gemini)");

        let (_, output) = say(&mut session, "/provider oracle")?;
        assert!(output.contains("unknown analysis provider 'oracle'"));
        assert_eq!(session.controller.client().name(), "dryrun");

        let (_, output) = say(&mut session, "/provider gemini")?;
        assert_eq!(output.trim(), "Backend set to gemini/gemini-2.5-flash");

        let (_, output) = say(&mut session, "/model gemini-2.5-pro")?;
        assert_eq!(output.trim(), "Backend set to gemini/gemini-2.5-pro");

        let (_, output) = say(&mut session, "/model")?;
        assert_eq!(
            output.trim(),
            "Model: gemini-2.5-pro (available: gemini-2.5-flash, gemini-2.5-pro, gemini-2.5-flash-lite)"
        );
        Ok(())
    }

    #[test]
    fn chat_misc_commands() -> Result<()> {
        let mut session = dryrun_session()?;
        let (_, output) = say(&mut session, "/help")?;
        assert!(output.contains("/analyze <path>"));

        let (_, output) = say(&mut session, "/frobnicate now")?;
        assert!(output.contains("Unknown command: /frobnicate"));

        let (_, output) = say(&mut session, "/analyze")?;
        assert!(output.contains("requires a path"));

        let (flow, _) = say(&mut session, "/exit")?;
        assert_eq!(flow, Flow::Quit);
        Ok(())
    }

    #[test]
    fn session_json_describes_each_outcome() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "tower.png")?;
        let mut session = dryrun_session()?;

        assert_eq!(session_json(session.controller.session())?["state"], json!("idle"));

        say(&mut session, &format!("/analyze {}", path.display()))?;
        say(&mut session, "/wait")?;
        let value = session_json(session.controller.session())?;
        assert_eq!(value["state"], json!("complete"));
        assert_eq!(value["image"]["media_type"], json!("image/png"));
        assert_eq!(value["image"]["width"], json!(6));
        assert!(value["result"]["confidence"].is_number());
        assert_eq!(value["error"], Value::Null);
        assert_eq!(exit_code(session.controller.state()), EXIT_COMPLETE);

        say(&mut session, "/reset")?;
        say(&mut session, "/analyze ./does-not-exist.webp")?;
        let value = session_json(session.controller.session())?;
        assert_eq!(value["state"], json!("error"));
        assert_eq!(value["image"], Value::Null);
        assert_eq!(value["error"], json!(INTAKE_FAILED_MESSAGE));
        assert_eq!(exit_code(session.controller.state()), EXIT_ANALYSIS_FAILED);
        Ok(())
    }

    #[test]
    fn chat_accepts_commands_while_analysis_runs() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "slow.png")?;
        let (release_tx, release_rx) = mpsc::channel();
        let client = StalledClient {
            release: Mutex::new(release_rx),
        };
        let config = EngineConfig::default().with_request_timeout(5.0);
        let controller = WorkflowController::new(Arc::new(client));
        let mut session = ChatSession::with_controller(config, controller);

        let started = Instant::now();
        let (_, output) = say(&mut session, &format!("/analyze {}", path.display()))?;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(output.contains("Analyzing slow.png"));

        let (_, output) = say(&mut session, "/status")?;
        assert!(output.starts_with("State: analyzing | image: slow.png"));

        let (_, output) = say(&mut session, "/reset")?;
        assert_eq!(output.trim(), "Session reset.");
        assert_eq!(session.controller.session(), &Session::Idle);

        drop(release_tx);
        assert!(matches!(
            session.controller.wait(SETTLE),
            Some(Delivery::Stale { .. })
        ));
        let mut out = Vec::new();
        assert!(!session.drain(&mut out)?);
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn drain_reports_verdict_once_it_lands() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "dock.png")?;
        let mut session = dryrun_session()?;
        say(&mut session, &format!("/analyze {}", path.display()))?;

        let mut out = Vec::new();
        let deadline = Instant::now() + SETTLE;
        while !session.drain(&mut out)? {
            assert!(Instant::now() < deadline, "verdict never arrived");
            thread::sleep(Duration::from_millis(10));
        }
        let report = String::from_utf8(out)?;
        assert!(report.contains("Confidence:"));
        assert!(report.contains(DISCLAIMER));
        assert!(!session.drain(&mut Vec::new())?);
        Ok(())
    }

    #[test]
    fn report_write_failure_is_returned() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_png(temp.path(), "cliff.png")?;
        let mut session = dryrun_session()?;
        say(&mut session, &format!("/analyze {}", path.display()))?;
        say(&mut session, "/wait")?;
        assert_eq!(session.controller.state(), AnalysisState::Complete);

        let err = match report_session(&session.controller, &mut ClosedPipe) {
            Ok(()) => bail!("closed output accepted the report"),
            Err(err) => err,
        };
        let io_err = err
            .downcast_ref::<io::Error>()
            .map(io::Error::kind);
        assert_eq!(io_err, Some(ErrorKind::BrokenPipe));
        Ok(())
    }
}
