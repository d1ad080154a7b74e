mod runner;
mod ticker;

pub use runner::{validate_exercises, SessionRunner, SessionState, StartError, Transition};

use crate::model::{Exercise, InfoEvent, SessionConfig, SessionEvent, SessionStats};
use anyhow::{Context, Result};
use ticker::Ticker;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Pause a running session or resume a paused one
    TogglePause,
    /// Jump to the end of the current exercise or rest
    Skip,
    /// Abandon the session entirely
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(SessionStats),
    Cancelled,
}

/// Drives one `SessionRunner` from a real tick source until it completes or is cancelled.
pub struct SessionEngine {
    cfg: SessionConfig,
    exercises: Vec<Exercise>,
}

impl SessionEngine {
    pub fn new(cfg: SessionConfig, exercises: Vec<Exercise>) -> Self {
        Self { cfg, exercises }
    }

    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<SessionOutcome> {
        let mut runner = SessionRunner::new();
        let count = self.exercises.len();
        let first = runner
            .start(self.exercises)
            .context("cannot start workout")?;
        info!(session_id = %self.cfg.session_id, exercises = count, "workout started");
        emit(&event_tx, &runner, first);

        let mut ticker = Ticker::new(self.cfg.tick_interval);
        ticker.arm();

        let outcome = loop {
            let transition = tokio::select! {
                cmd = control_rx.recv() => match cmd {
                    Some(EngineControl::TogglePause) => runner.toggle_play_pause(),
                    Some(EngineControl::Skip) => {
                        let before = runner.state();
                        let t = runner.skip();
                        if t.is_some() {
                            debug!(phase = ?before.phase, index = before.index, "skipped");
                            let _ = event_tx.send(SessionEvent::Info(InfoEvent::Skipped {
                                phase: before.phase,
                                index: before.index,
                            }));
                        }
                        t
                    }
                    // A closed control channel means the owner went away.
                    Some(EngineControl::Cancel) | None => runner.cancel(),
                },
                _ = ticker.tick() => runner.tick(),
            };

            let Some(t) = transition else { continue };

            if let Transition::PauseChanged { running } = t {
                if running {
                    ticker.arm();
                    info!("workout resumed");
                } else {
                    ticker.disarm();
                    info!("workout paused");
                }
            }
            if let Transition::Entered { phase, index, seconds } = t {
                debug!(?phase, index, seconds, "phase started");
            }

            emit(&event_tx, &runner, t);

            match t {
                Transition::Completed => {
                    info!(session_id = %self.cfg.session_id, "workout completed");
                    break SessionOutcome::Completed(runner.stats().clone());
                }
                Transition::Reset => {
                    info!(session_id = %self.cfg.session_id, "workout cancelled");
                    break SessionOutcome::Cancelled;
                }
                _ => {}
            }
        };

        ticker.disarm();
        Ok(outcome)
    }
}

fn emit(tx: &mpsc::UnboundedSender<SessionEvent>, runner: &SessionRunner, t: Transition) {
    let state = runner.state();
    let ev = match t {
        Transition::Counted { seconds_remaining } => SessionEvent::Tick {
            phase: state.phase,
            index: state.index,
            seconds_remaining,
        },
        Transition::Entered {
            phase,
            index,
            seconds,
        } => SessionEvent::PhaseStarted {
            phase,
            index,
            name: runner
                .current_exercise()
                .map(|e| e.name.clone())
                .unwrap_or_default(),
            seconds,
        },
        Transition::Completed => SessionEvent::Completed {
            stats: runner.stats().clone(),
        },
        Transition::PauseChanged { running } => SessionEvent::PauseChanged { paused: !running },
        Transition::Reset => SessionEvent::Cancelled,
    };
    let _ = tx.send(ev);
}
