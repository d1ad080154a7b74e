//! Workout session state machine.
//!
//! The runner is a pure reducer over `(SessionState, Command)`. It never sleeps,
//! never touches the clock and never does I/O; the engine feeds it ticks from an
//! external tick source and turns the returned `Transition`s into events.

use crate::model::{Exercise, Phase, SessionStats};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("workout has no exercises")]
    Empty,
    #[error("exercise {name:?} has a zero work duration")]
    ZeroWorkDuration { name: String },
    #[error("exercise name {name:?} appears more than once")]
    DuplicateName { name: String },
    #[error("a session is already in progress")]
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    /// Only meaningful while `phase.is_active()`.
    pub index: usize,
    pub seconds_remaining: u32,
    pub is_running: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Pre,
            index: 0,
            seconds_remaining: 0,
            is_running: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tick,
    TogglePlayPause,
    Skip,
    Cancel,
}

/// What a command did to the session. `None` from [`reduce`] means nothing changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// One second elapsed inside the current phase.
    Counted { seconds_remaining: u32 },
    Entered {
        phase: Phase,
        index: usize,
        seconds: u32,
    },
    /// The last exercise's work phase ended. Fired once per session.
    Completed,
    PauseChanged { running: bool },
    Reset,
}

/// Check an exercise list before it is handed to [`SessionRunner::start`].
pub fn validate_exercises(exercises: &[Exercise]) -> Result<(), StartError> {
    if exercises.is_empty() {
        return Err(StartError::Empty);
    }
    let mut seen = HashSet::new();
    for ex in exercises {
        if ex.work_secs == 0 {
            return Err(StartError::ZeroWorkDuration {
                name: ex.name.clone(),
            });
        }
        if !seen.insert(ex.name.as_str()) {
            return Err(StartError::DuplicateName {
                name: ex.name.clone(),
            });
        }
    }
    Ok(())
}

fn enter_exercise(exercises: &[Exercise], index: usize, running: bool) -> (SessionState, Transition) {
    let seconds = exercises[index].work_secs;
    (
        SessionState {
            phase: Phase::Exercising,
            index,
            seconds_remaining: seconds,
            is_running: running,
        },
        Transition::Entered {
            phase: Phase::Exercising,
            index,
            seconds,
        },
    )
}

/// The transition taken when the current phase runs out, or is skipped.
fn advance(exercises: &[Exercise], state: SessionState) -> (SessionState, Transition) {
    let i = state.index;
    match state.phase {
        Phase::Exercising if i + 1 >= exercises.len() => (
            // The final exercise never gets its trailing rest.
            SessionState {
                phase: Phase::Completed,
                index: i,
                seconds_remaining: 0,
                is_running: false,
            },
            Transition::Completed,
        ),
        Phase::Exercising => {
            let rest = exercises[i].rest_secs;
            if rest == 0 {
                return enter_exercise(exercises, i + 1, state.is_running);
            }
            (
                SessionState {
                    phase: Phase::Resting,
                    index: i,
                    seconds_remaining: rest,
                    is_running: state.is_running,
                },
                Transition::Entered {
                    phase: Phase::Resting,
                    index: i,
                    seconds: rest,
                },
            )
        }
        Phase::Resting => enter_exercise(exercises, i + 1, state.is_running),
        Phase::Pre | Phase::Completed => (state, Transition::Reset),
    }
}

/// Apply one command to a session state.
pub fn reduce(
    exercises: &[Exercise],
    state: SessionState,
    cmd: Command,
) -> (SessionState, Option<Transition>) {
    match cmd {
        Command::Cancel => (SessionState::default(), Some(Transition::Reset)),
        _ if !state.phase.is_active() || exercises.is_empty() => (state, None),
        Command::Tick if !state.is_running => (state, None),
        Command::Tick if state.seconds_remaining > 1 => {
            let seconds_remaining = state.seconds_remaining - 1;
            (
                SessionState {
                    seconds_remaining,
                    ..state
                },
                Some(Transition::Counted { seconds_remaining }),
            )
        }
        Command::Tick | Command::Skip => {
            let (next, t) = advance(exercises, state);
            (next, Some(t))
        }
        Command::TogglePlayPause => {
            let running = !state.is_running;
            (
                SessionState {
                    is_running: running,
                    ..state
                },
                Some(Transition::PauseChanged { running }),
            )
        }
    }
}

/// Owns the exercise list, the live state and its counters.
#[derive(Debug, Default)]
pub struct SessionRunner {
    exercises: Vec<Exercise>,
    state: SessionState,
    stats: SessionStats,
}

impl SessionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn current_exercise(&self) -> Option<&Exercise> {
        if self.state.phase.is_active() {
            self.exercises.get(self.state.index)
        } else {
            None
        }
    }

    /// Begin a session. Rejected lists leave the runner untouched in `Pre`.
    pub fn start(&mut self, exercises: Vec<Exercise>) -> Result<Transition, StartError> {
        if self.state.phase.is_active() {
            return Err(StartError::AlreadyActive);
        }
        validate_exercises(&exercises)?;

        self.stats = SessionStats {
            exercise_count: exercises.len(),
            exercises_performed: 1,
            planned_work_secs: exercises.iter().map(|e| u64::from(e.work_secs)).sum(),
            planned_rest_secs: exercises
                .iter()
                .take(exercises.len() - 1)
                .map(|e| u64::from(e.rest_secs))
                .sum(),
            ..Default::default()
        };
        self.exercises = exercises;
        let (state, t) = enter_exercise(&self.exercises, 0, true);
        self.state = state;
        Ok(t)
    }

    pub fn tick(&mut self) -> Option<Transition> {
        self.apply(Command::Tick)
    }

    pub fn toggle_play_pause(&mut self) -> Option<Transition> {
        self.apply(Command::TogglePlayPause)
    }

    pub fn skip(&mut self) -> Option<Transition> {
        self.apply(Command::Skip)
    }

    pub fn cancel(&mut self) -> Option<Transition> {
        self.apply(Command::Cancel)
    }

    pub fn apply(&mut self, cmd: Command) -> Option<Transition> {
        let prev = self.state;
        let (next, t) = reduce(&self.exercises, prev, cmd);
        self.state = next;
        let t = t?;

        if cmd == Command::Tick {
            match prev.phase {
                Phase::Exercising => self.stats.work_secs += 1,
                Phase::Resting => self.stats.rest_secs += 1,
                _ => {}
            }
        }
        if cmd == Command::Skip {
            match prev.phase {
                Phase::Exercising => self.stats.exercises_skipped += 1,
                Phase::Resting => self.stats.rests_skipped += 1,
                _ => {}
            }
        }
        match t {
            Transition::Entered {
                phase: Phase::Exercising,
                ..
            } => self.stats.exercises_performed += 1,
            Transition::Entered {
                phase: Phase::Resting,
                ..
            } => self.stats.rests_taken += 1,
            Transition::Reset => self.stats = SessionStats::default(),
            _ => {}
        }
        Some(t)
    }
}
