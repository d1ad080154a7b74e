//! Session lifecycle controller.
//!
//! Owns start/exit/restart orchestration, fires the completion recorder on the
//! completion edge, and emits events for presentation layers.

use super::post_process::finalize_session;
use crate::api::ApiClient;
use crate::cli::gen_session_id;
use crate::model::{Exercise, InfoEvent, SessionConfig, SessionEvent, SessionSummary};
use crate::session::{EngineControl, SessionEngine, SessionOutcome};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{info, warn};

/// How long an in-flight completion request may run after quit.
const QUIT_GRACE: Duration = Duration::from_secs(3);

/// Commands emitted by UI layers to control the session.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Start a new session (from the exercise list or after completion)
    Start,
    TogglePause,
    Skip,
    /// Abandon the current session; the UI has already confirmed
    Exit,
    Quit,
}

/// Internal handle for a running session task.
struct SessionCtx {
    cfg: SessionConfig,
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<JoinHandle<Result<SessionOutcome>>>,
}

/// Spawn a new session and return its control handle.
fn start_session(
    cfg: &SessionConfig,
    exercises: &[Exercise],
    event_tx: UnboundedSender<SessionEvent>,
) -> SessionCtx {
    let cfg = SessionConfig {
        session_id: gen_session_id(),
        ..cfg.clone()
    };
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = SessionEngine::new(cfg.clone(), exercises.to_vec());
    let handle = tokio::spawn(async move { engine.run(event_tx, ctrl_rx).await });
    SessionCtx {
        cfg,
        ctrl_tx,
        handle: Some(handle),
    }
}

/// Orchestrate sessions based on UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    cfg: &SessionConfig,
    client: ApiClient,
    exercises: Vec<Exercise>,
    start_on_launch: bool,
    event_tx: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut session = if start_on_launch {
        Some(start_session(cfg, &exercises, event_tx.clone()))
    } else {
        None
    };
    let mut finalizer: Option<JoinHandle<SessionSummary>> = None;
    let mut quit_pending = false;
    // Give an in-flight completion request a short grace period on quit.
    let mut quit_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(250));

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Start) => {
                        if session.is_none() {
                            let ctx = start_session(cfg, &exercises, event_tx.clone());
                            session = Some(ctx);
                        }
                    }
                    Some(UiCommand::TogglePause) => {
                        if let Some(ctx) = &session {
                            let _ = ctx.ctrl_tx.send(EngineControl::TogglePause);
                        }
                    }
                    Some(UiCommand::Skip) => {
                        if let Some(ctx) = &session {
                            let _ = ctx.ctrl_tx.send(EngineControl::Skip);
                        }
                    }
                    Some(UiCommand::Exit) => {
                        if let Some(ctx) = &session {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        quit_pending = true;
                        if let Some(ctx) = &session {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        }
                        if session.is_none() && finalizer.is_none() {
                            break Ok(());
                        }
                        if finalizer.is_some() {
                            let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(
                                "Finishing up…".into(),
                            )));
                        }
                        // Armed even without a recorder: the session may still
                        // complete before it sees the cancel and spawn one.
                        quit_deadline = Some(tokio::time::Instant::now() + QUIT_GRACE);
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut session {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    let finished_cfg = session.take().map(|ctx| ctx.cfg);
                    match (join_res, finished_cfg) {
                        (Ok(Ok(SessionOutcome::Completed(stats))), Some(fin_cfg)) => {
                            // One finalizer per completion edge.
                            let client = client.clone();
                            let tx = event_tx.clone();
                            // Replacing an older handle detaches it; it still finishes.
                            finalizer = Some(tokio::spawn(async move {
                                finalize_session(&client, &fin_cfg, stats, &tx).await
                            }));
                        }
                        (Ok(Ok(_)), _) => {}
                        (Ok(Err(e)), _) => {
                            let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(format!(
                                "Session failed: {e:#}"
                            ))));
                        }
                        (Err(e), _) => {
                            let _ = event_tx.send(SessionEvent::Info(InfoEvent::Message(format!(
                                "Session join failed: {e}"
                            ))));
                        }
                    }
                    if quit_pending && finalizer.is_none() {
                        break Ok(());
                    }
                }
            }
            done = async {
                match finalizer.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                finalizer = None;
                if let Err(e) = done {
                    if !e.is_cancelled() {
                        warn!(error = %e, "completion task failed");
                    }
                }
                if quit_pending && session.is_none() {
                    break Ok(());
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = quit_deadline {
                    if tokio::time::Instant::now() >= deadline {
                        if let Some(h) = finalizer.take() {
                            info!("abandoning outstanding completion request");
                            h.abort();
                        }
                        if session.is_none() {
                            break Ok(());
                        }
                    }
                }
            }
        }
    };

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn offline_config() -> SessionConfig {
        SessionConfig {
            base_url: "http://127.0.0.1:9".into(),
            session_id: "unused".into(),
            workout_id: None,
            tick_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
            completion_retries: 0,
            retry_base_delay: Duration::from_millis(1),
            user_agent: "test".into(),
        }
    }

    async fn next_matching(
        rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
        seen: &mut Vec<SessionEvent>,
    ) {
        while let Some(ev) = rx.recv().await {
            let hit = pred(&ev);
            seen.push(ev);
            if hit {
                return;
            }
        }
        panic!("event stream ended early");
    }

    #[tokio::test(start_paused = true)]
    async fn completion_finalizes_exactly_once() {
        let cfg = offline_config();
        let client = ApiClient::new(&cfg, None).unwrap();
        let exercises = vec![Exercise::new("a", 2, 1), Exercise::new("b", 1, 0)];
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            run_controller(&cfg, client, exercises, true, event_tx, cmd_rx).await
        });

        let mut seen = Vec::new();
        next_matching(
            &mut event_rx,
            |e| matches!(e, SessionEvent::SummaryReady { .. }),
            &mut seen,
        )
        .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(ev) = event_rx.try_recv() {
            seen.push(ev);
        }

        let count = |f: fn(&SessionEvent) -> bool| seen.iter().filter(|e| f(e)).count();
        assert_eq!(count(|e| matches!(e, SessionEvent::Completed { .. })), 1);
        assert_eq!(count(|e| matches!(e, SessionEvent::Finalizing { .. })), 1);
        assert_eq!(count(|e| matches!(e, SessionEvent::SummaryReady { .. })), 1);

        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exit_cancels_without_recording() {
        let cfg = offline_config();
        let client = ApiClient::new(&cfg, None).unwrap();
        let exercises = vec![Exercise::new("a", 30, 10), Exercise::new("b", 30, 0)];
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            run_controller(&cfg, client, exercises, false, event_tx, cmd_rx).await
        });

        cmd_tx.send(UiCommand::Start).unwrap();
        let mut seen = Vec::new();
        next_matching(
            &mut event_rx,
            |e| matches!(e, SessionEvent::Tick { .. }),
            &mut seen,
        )
        .await;
        cmd_tx.send(UiCommand::Exit).unwrap();
        next_matching(&mut event_rx, |e| matches!(e, SessionEvent::Cancelled), &mut seen).await;

        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();
        while let Ok(ev) = event_rx.try_recv() {
            seen.push(ev);
        }
        assert!(!seen.iter().any(|e| matches!(e, SessionEvent::Finalizing { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_racing_completion_still_honours_grace_period() {
        let cfg = SessionConfig {
            workout_id: Some(1),
            completion_retries: 5,
            retry_base_delay: Duration::from_secs(30),
            ..offline_config()
        };
        let client = ApiClient::new(&cfg, None).unwrap();
        let exercises = vec![Exercise::new("a", 1, 0)];
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        let handle = tokio::spawn(async move {
            run_controller(&cfg, client, exercises, true, event_tx, cmd_rx).await
        });

        // The engine has returned but the controller may not have reaped it yet,
        // so the quit can land before the recorder exists.
        let mut seen = Vec::new();
        next_matching(
            &mut event_rx,
            |e| matches!(e, SessionEvent::Completed { .. }),
            &mut seen,
        )
        .await;
        cmd_tx.send(UiCommand::Quit).unwrap();
        handle.await.unwrap().unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn quit_with_no_session_returns_immediately() {
        let cfg = offline_config();
        let client = ApiClient::new(&cfg, None).unwrap();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(UiCommand::Quit).unwrap();
        run_controller(&cfg, client, vec![Exercise::new("a", 5, 0)], false, event_tx, cmd_rx)
            .await
            .unwrap();
    }
}
