use crate::api::ApiClient;
use crate::logging::{self, LogTarget};
use crate::model::{
    Exercise, Phase, SessionConfig, SessionEvent, SessionReport, SessionStats, SessionSummary,
};
use crate::orchestrator::finalize_session;
use crate::session::{validate_exercises, EngineControl, SessionEngine, SessionOutcome};
use crate::storage::{self, FileStore, KeyValueStore, MemoryStore, TOKEN_KEY};
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "workout-runner",
    version,
    about = "Guided workout timer with exercise/rest countdown and optional TUI"
)]
pub struct Cli {
    /// Base URL of the workout backend
    #[arg(long, env = "FASTNFIT_API_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    /// Workout to fetch from the backend and record on completion
    #[arg(long)]
    pub workout_id: Option<i64>,

    /// Run exercises from a local JSON file instead of fetching them
    #[arg(long)]
    pub exercises: Option<std::path::PathBuf>,

    /// Print JSON result and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text progress and summary (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors
    #[arg(long)]
    pub silent: bool,

    /// Countdown tick period
    #[arg(long, default_value = "1s")]
    pub tick_interval: humantime::Duration,

    /// Timeout for each backend request
    #[arg(long, default_value = "10s")]
    pub request_timeout: humantime::Duration,

    /// Extra attempts when recording a completed workout fails
    #[arg(long, default_value_t = 3)]
    pub completion_retries: u32,

    /// First retry delay; doubles per attempt
    #[arg(long, default_value = "500ms")]
    pub retry_base_delay: humantime::Duration,

    /// Auth token for the backend; stored for later runs
    #[arg(long, env = "FASTNFIT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Remove the stored auth token
    #[arg(long)]
    pub forget_token: bool,

    /// Export the session report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Start the workout as soon as the TUI opens
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub start_on_launch: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Write logs to this file instead of the default location
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

impl Cli {
    fn is_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text && !self.silent
    }
}

/// Everything a presentation layer needs to run a workout.
pub(crate) struct Workout {
    pub cfg: SessionConfig,
    pub client: ApiClient,
    pub exercises: Vec<Exercise>,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let target = LogTarget::for_mode(args.is_tui(), args.log_file.as_deref())?;
    logging::init(&args.log_level, &target)?;

    let workout = prepare(&args).await?;

    if args.silent {
        return run_json(args, workout, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, workout).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args, workout).await;
        }
    }

    if args.json {
        return run_json(args, workout, false).await;
    }

    run_text(args, workout).await
}

/// Generate a random identifier for one session.
pub(crate) fn gen_session_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

/// Build a `SessionConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> SessionConfig {
    SessionConfig {
        base_url: args.base_url.clone(),
        session_id: gen_session_id(),
        workout_id: args.workout_id,
        tick_interval: Duration::from(args.tick_interval),
        request_timeout: Duration::from(args.request_timeout),
        completion_retries: args.completion_retries,
        retry_base_delay: Duration::from(args.retry_base_delay),
        user_agent: format!("workout-runner/{}", env!("CARGO_PKG_VERSION")),
    }
}

fn open_store() -> Box<dyn KeyValueStore> {
    match FileStore::open_default() {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(error = %e, "settings store unavailable; using memory only");
            Box::new(MemoryStore::default())
        }
    }
}

/// Token from flags or env, else whatever was stored by an earlier run.
fn resolve_token(args: &Cli, store: &dyn KeyValueStore) -> Result<Option<String>> {
    if args.forget_token {
        store.remove(TOKEN_KEY).context("forget stored token")?;
    }
    if let Some(token) = args.token.as_deref().filter(|t| !t.trim().is_empty()) {
        store.set(TOKEN_KEY, token).context("store token")?;
        return Ok(Some(token.to_string()));
    }
    Ok(store.get(TOKEN_KEY))
}

/// Local file first, then the backend, then the cached copy of that workout.
pub(crate) async fn load_exercises(
    args: &Cli,
    client: &ApiClient,
    store: &dyn KeyValueStore,
) -> Result<Vec<Exercise>> {
    if let Some(path) = args.exercises.as_deref() {
        return storage::load_exercises_file(path);
    }
    let Some(workout_id) = args.workout_id else {
        anyhow::bail!("nothing to run: pass --workout-id <id> or --exercises <file.json>");
    };
    match client.fetch_exercises(workout_id).await {
        Ok(list) => {
            if let Err(e) = storage::cache_exercises(store, workout_id, &list) {
                warn!(workout_id, error = %e, "could not cache exercise list");
            }
            Ok(list)
        }
        Err(e) => match storage::cached_exercises(store, workout_id) {
            Some(list) => {
                warn!(workout_id, error = %e, "backend unreachable; using cached exercise list");
                Ok(list)
            }
            None => Err(anyhow::Error::new(e)
                .context(format!("fetch exercises for workout {workout_id}"))),
        },
    }
}

async fn prepare(args: &Cli) -> Result<Workout> {
    let cfg = build_config(args);
    let store = open_store();
    let token = resolve_token(args, store.as_ref())?;
    let client = ApiClient::new(&cfg, token)?;
    let exercises = load_exercises(args, &client, store.as_ref()).await?;
    validate_exercises(&exercises).context("invalid workout")?;
    info!(
        base_url = client.base_url(),
        exercises = exercises.len(),
        authenticated = client.has_token(),
        "workout loaded"
    );
    Ok(Workout {
        cfg,
        client,
        exercises,
    })
}

/// A session running without a UI. Ctrl-C cancels the workout while it runs
/// and abandons the completion request once it has finished.
struct HeadlessSession {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    ctrl_tx: mpsc::UnboundedSender<EngineControl>,
    interrupts: mpsc::UnboundedReceiver<()>,
    engine: JoinHandle<Result<SessionOutcome>>,
    signal: Option<JoinHandle<()>>,
}

impl HeadlessSession {
    fn spawn(workout: &Workout) -> Self {
        let (int_tx, interrupts) = mpsc::unbounded_channel();
        // The listener stays up until the session is dropped: once tokio owns
        // SIGINT the default handler no longer terminates the process.
        let signal = tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    break;
                }
                if int_tx.send(()).is_err() {
                    break;
                }
            }
        });
        Self::with_interrupts(workout, interrupts, Some(signal))
    }

    fn with_interrupts(
        workout: &Workout,
        interrupts: mpsc::UnboundedReceiver<()>,
        signal: Option<JoinHandle<()>>,
    ) -> Self {
        let (evt_tx, events) = mpsc::unbounded_channel::<SessionEvent>();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

        let engine = SessionEngine::new(workout.cfg.clone(), workout.exercises.clone());
        let engine = tokio::spawn(async move { engine.run(evt_tx, ctrl_rx).await });
        Self {
            events,
            ctrl_tx,
            interrupts,
            engine,
            signal,
        }
    }

    /// Next engine event; `None` once the engine is done.
    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            tokio::select! {
                ev = self.events.recv() => return ev,
                Some(()) = self.interrupts.recv() => {
                    info!("interrupted, cancelling session");
                    let _ = self.ctrl_tx.send(EngineControl::Cancel);
                }
            }
        }
    }

    async fn finish(&mut self) -> Result<SessionOutcome> {
        (&mut self.engine).await.context("session task failed")?
    }

    /// Record the completed session. An interrupt gives up on the request.
    async fn finalize(
        &mut self,
        workout: &Workout,
        stats: SessionStats,
        event_tx: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Option<SessionSummary> {
        tokio::select! {
            summary = finalize_session(&workout.client, &workout.cfg, stats, event_tx) => Some(summary),
            Some(()) = self.interrupts.recv() => {
                warn!("interrupted, workout not recorded");
                None
            }
        }
    }
}

impl Drop for HeadlessSession {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.abort();
        }
    }
}

/// Run the session headless and print the final `SessionReport` as JSON.
/// `silent` controls whether any output is produced.
async fn run_json(args: Cli, workout: Workout, silent: bool) -> Result<()> {
    let (out_tx, out_handle) = if silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let mut session = HeadlessSession::spawn(&workout);
    // Events are only consumed to keep the channel drained.
    while session.next_event().await.is_some() {}
    let outcome = session.finish().await?;

    let (completed, summary) = match outcome {
        SessionOutcome::Completed(stats) => {
            let (fin_tx, _fin_rx) = mpsc::unbounded_channel::<SessionEvent>();
            (true, session.finalize(&workout, stats, &fin_tx).await)
        }
        SessionOutcome::Cancelled => (false, None),
    };
    drop(session);
    let report = SessionReport {
        completed,
        exercises: workout.exercises,
        summary,
    };

    if let Some(p) = args.export_json.as_deref() {
        storage::export_json(p, &report)?;
    }

    if let Some(tx) = out_tx.as_ref() {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = tx.send(OutputLine::Stdout(out));
    }

    if args.auto_save {
        if let Some(summary) = report.summary.as_ref() {
            if silent {
                storage::save_session(summary).context("failed to save session summary")?;
            } else if let Some(tx) = out_tx.as_ref() {
                if let Ok(p) = storage::save_session(summary) {
                    let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
                }
            }
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}

fn describe_event(ev: &SessionEvent, exercise_count: usize) -> Option<String> {
    match ev {
        SessionEvent::PhaseStarted {
            phase: Phase::Exercising,
            index,
            name,
            seconds,
        } => Some(format!(
            "== Exercise {}/{}: {} ({}) ==",
            index + 1,
            exercise_count,
            name,
            crate::metrics::format_clock(u64::from(*seconds))
        )),
        SessionEvent::PhaseStarted { phase, seconds, .. } => Some(format!(
            "-- {} {} --",
            phase.label(),
            crate::metrics::format_clock(u64::from(*seconds))
        )),
        SessionEvent::Tick {
            phase,
            seconds_remaining,
            ..
        } if *seconds_remaining <= 3 || seconds_remaining % 10 == 0 => Some(format!(
            "{}: {}",
            phase.label(),
            crate::metrics::format_clock(u64::from(*seconds_remaining))
        )),
        SessionEvent::Tick { .. } => None,
        SessionEvent::PauseChanged { paused: true } => Some("Paused".into()),
        SessionEvent::PauseChanged { paused: false } => Some("Resumed".into()),
        SessionEvent::Info(info) => Some(info.to_message()),
        SessionEvent::Completed { .. } => Some("== Workout complete ==".into()),
        SessionEvent::Cancelled => Some("Workout cancelled; nothing recorded.".into()),
        SessionEvent::Finalizing { .. } | SessionEvent::SummaryReady { .. } => None,
    }
}

/// Print recorder messages as they arrive rather than after recording ends.
fn spawn_progress_printer(
    out_tx: mpsc::UnboundedSender<OutputLine>,
) -> (mpsc::UnboundedSender<SessionEvent>, JoinHandle<()>) {
    let (fin_tx, mut fin_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let handle = tokio::spawn(async move {
        while let Some(ev) = fin_rx.recv().await {
            if let SessionEvent::Info(info) = ev {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
            }
        }
    });
    (fin_tx, handle)
}

async fn run_text(args: Cli, workout: Workout) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let count = workout.exercises.len();

    let mut session = HeadlessSession::spawn(&workout);
    while let Some(ev) = session.next_event().await {
        if let Some(line) = describe_event(&ev, count) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }
    let outcome = session.finish().await?;

    let SessionOutcome::Completed(stats) = outcome else {
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(());
    };

    let (fin_tx, progress) = spawn_progress_printer(out_tx.clone());
    let summary = session.finalize(&workout, stats, &fin_tx).await;
    drop(session);
    drop(fin_tx);
    let _ = progress.await;

    let Some(summary) = summary else {
        let _ = out_tx.send(OutputLine::Stderr("Interrupted; workout not recorded.".into()));
        drop(out_tx);
        let _ = out_handle.await;
        return Ok(());
    };

    if let Some(p) = args.export_json.as_deref() {
        let report = SessionReport {
            completed: true,
            exercises: workout.exercises.clone(),
            summary: Some(summary.clone()),
        };
        storage::export_json(p, &report)?;
    }

    let text = crate::text_summary::build_text_summary(&summary);
    for line in text.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    if args.auto_save {
        if let Ok(p) = storage::save_session(&summary) {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
