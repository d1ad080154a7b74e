use crate::model::{Exercise, Phase, SessionEvent, SessionStats, SessionSummary};
use crate::session::SessionState;

pub const WORKOUT_TAB: usize = 0;
pub const HISTORY_TAB: usize = 1;
pub const HELP_TAB: usize = 2;

/// Owned by the UI thread only; rebuilt from the controller's event stream.
pub struct UiState {
    pub tab: usize,
    pub phase: Phase,
    pub index: usize,
    pub exercise_name: String,
    pub seconds_remaining: u32,
    pub phase_total: u32,
    pub paused: bool,
    pub info: String,

    pub exercises: Vec<Exercise>,
    pub confirm_exit: bool,
    /// Session whose completion is still being recorded.
    pub finalizing: Option<String>,
    pub last_stats: Option<SessionStats>,
    pub last_summary: Option<SessionSummary>,

    pub history: Vec<SessionSummary>,
    pub history_selected: usize, // 0 = most recent
    pub history_load: usize,
    pub auto_save: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: WORKOUT_TAB,
            phase: Phase::Pre,
            index: 0,
            exercise_name: String::new(),
            seconds_remaining: 0,
            phase_total: 0,
            paused: false,
            info: String::new(),
            exercises: Vec::new(),
            confirm_exit: false,
            finalizing: None,
            last_stats: None,
            last_summary: None,
            history: Vec::new(),
            history_selected: 0,
            history_load: 50,
            auto_save: true,
        }
    }
}

impl UiState {
    pub fn session_state(&self) -> SessionState {
        SessionState {
            phase: self.phase,
            index: self.index,
            seconds_remaining: self.seconds_remaining,
            is_running: self.phase.is_active() && !self.paused,
        }
    }

    pub fn current_exercise(&self) -> Option<&Exercise> {
        if self.phase.is_active() {
            self.exercises.get(self.index)
        } else {
            None
        }
    }

    /// The exercise after the current phase, if any.
    pub fn up_next(&self) -> Option<&Exercise> {
        match self.phase {
            Phase::Exercising | Phase::Resting => self.exercises.get(self.index + 1),
            _ => None,
        }
    }

    /// Forget the finished session before a new one starts.
    pub fn clear_session(&mut self) {
        self.index = 0;
        self.exercise_name.clear();
        self.seconds_remaining = 0;
        self.phase_total = 0;
        self.paused = false;
        self.confirm_exit = false;
        self.finalizing = None;
        self.last_stats = None;
        self.last_summary = None;
    }

    pub fn apply_event(&mut self, ev: SessionEvent) {
        match ev {
            SessionEvent::PhaseStarted {
                phase,
                index,
                name,
                seconds,
            } => {
                if !self.phase.is_active() {
                    self.clear_session();
                }
                self.phase = phase;
                self.index = index;
                self.seconds_remaining = seconds;
                self.phase_total = seconds;
                self.info = match phase {
                    Phase::Resting => format!("Rest. Next up: {}", self.next_name(index)),
                    _ => format!("Go: {name}"),
                };
                self.exercise_name = name;
            }
            SessionEvent::Tick {
                phase,
                index,
                seconds_remaining,
            } => {
                self.phase = phase;
                self.index = index;
                self.seconds_remaining = seconds_remaining;
            }
            SessionEvent::PauseChanged { paused } => {
                self.paused = paused;
                self.info = if paused { "Paused" } else { "Resumed" }.into();
            }
            SessionEvent::Info(info) => self.info = info.to_message(),
            SessionEvent::Completed { stats } => {
                self.phase = Phase::Completed;
                self.seconds_remaining = 0;
                self.paused = false;
                self.confirm_exit = false;
                self.last_stats = Some(stats);
                self.last_summary = None;
                self.info = "Workout complete!".into();
            }
            SessionEvent::Cancelled => {
                self.phase = Phase::Pre;
                self.clear_session();
                self.info = "Workout ended early; nothing recorded".into();
            }
            SessionEvent::Finalizing { session_id } => self.finalizing = Some(session_id),
            SessionEvent::SummaryReady { summary } => {
                self.set_summary(*summary);
            }
        }
    }

    /// Show `summary` on the completion screen if it belongs to the session
    /// being recorded. Summaries from a session that was since replaced are dropped.
    pub fn set_summary(&mut self, summary: SessionSummary) -> bool {
        if self.finalizing.as_deref() != Some(summary.session_id.as_str()) {
            return false;
        }
        self.finalizing = None;
        self.last_summary = Some(summary);
        true
    }

    fn next_name(&self, index: usize) -> &str {
        self.exercises
            .get(index + 1)
            .map(|e| e.name.as_str())
            .unwrap_or("-")
    }

    pub fn select_prev(&mut self) {
        self.history_selected = self.history_selected.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        if self.history_selected + 1 < self.history.len() {
            self.history_selected += 1;
        }
    }

    pub fn set_history(&mut self, history: Vec<SessionSummary>) {
        self.history = history;
        if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len().saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InfoEvent;

    fn with_workout() -> UiState {
        UiState {
            exercises: vec![
                Exercise::new("Jumping Jacks", 30, 10),
                Exercise::new("Squats", 40, 0),
            ],
            ..Default::default()
        }
    }

    fn started(phase: Phase, index: usize, name: &str, seconds: u32) -> SessionEvent {
        SessionEvent::PhaseStarted {
            phase,
            index,
            name: name.into(),
            seconds,
        }
    }

    #[test]
    fn phase_events_drive_the_countdown() {
        let mut s = with_workout();
        s.apply_event(started(Phase::Exercising, 0, "Jumping Jacks", 30));
        assert_eq!(s.exercise_name, "Jumping Jacks");
        assert_eq!(s.phase_total, 30);
        s.apply_event(SessionEvent::Tick {
            phase: Phase::Exercising,
            index: 0,
            seconds_remaining: 29,
        });
        assert_eq!(s.seconds_remaining, 29);

        s.apply_event(started(Phase::Resting, 0, "Jumping Jacks", 10));
        assert_eq!(s.info, "Rest. Next up: Squats");
        assert_eq!(s.up_next().map(|e| e.name.as_str()), Some("Squats"));
        assert!(s.session_state().is_running);
    }

    #[test]
    fn restart_clears_previous_results() {
        let mut s = with_workout();
        s.apply_event(started(Phase::Exercising, 0, "Jumping Jacks", 30));
        s.apply_event(SessionEvent::Completed {
            stats: SessionStats::default(),
        });
        assert_eq!(s.phase, Phase::Completed);
        assert!(s.last_stats.is_some());

        s.apply_event(started(Phase::Exercising, 0, "Jumping Jacks", 30));
        assert!(s.last_stats.is_none());
        assert_eq!(s.phase, Phase::Exercising);
    }

    fn summary(session_id: &str, exercise_count: usize) -> SessionSummary {
        SessionSummary {
            timestamp_utc: String::new(),
            session_id: session_id.into(),
            workout_id: None,
            stats: SessionStats {
                exercise_count,
                ..Default::default()
            },
            totals: None,
            streak_days: None,
        }
    }

    fn finalizing(session_id: &str) -> SessionEvent {
        SessionEvent::Finalizing {
            session_id: session_id.into(),
        }
    }

    #[test]
    fn finalizing_ends_with_summary() {
        let mut s = with_workout();
        s.apply_event(finalizing("x"));
        assert_eq!(s.finalizing.as_deref(), Some("x"));
        s.apply_event(SessionEvent::Info(InfoEvent::NoWorkoutId));
        assert_eq!(s.info, InfoEvent::NoWorkoutId.to_message());
        s.apply_event(SessionEvent::SummaryReady {
            summary: Box::new(summary("x", 2)),
        });
        assert!(s.finalizing.is_none());
        assert!(s.last_summary.is_some());
    }

    #[test]
    fn late_summary_from_replaced_session_is_not_shown() {
        let mut s = with_workout();
        s.apply_event(started(Phase::Exercising, 0, "Jumping Jacks", 30));
        s.apply_event(SessionEvent::Completed {
            stats: SessionStats::default(),
        });
        s.apply_event(finalizing("first"));

        // Restart while the first session is still being recorded.
        s.clear_session();
        s.apply_event(started(Phase::Exercising, 0, "Jumping Jacks", 30));
        assert!(!s.set_summary(summary("first", 1)));
        assert!(s.last_summary.is_none());

        s.apply_event(SessionEvent::Completed {
            stats: SessionStats {
                exercise_count: 2,
                ..Default::default()
            },
        });
        s.apply_event(finalizing("second"));
        assert!(s.last_summary.is_none());
        assert_eq!(s.last_stats.as_ref().map(|st| st.exercise_count), Some(2));

        assert!(s.set_summary(summary("second", 2)));
        assert_eq!(
            s.last_summary.as_ref().map(|sm| sm.session_id.as_str()),
            Some("second")
        );
    }

    #[test]
    fn cancel_returns_to_exercise_list() {
        let mut s = with_workout();
        s.apply_event(started(Phase::Exercising, 1, "Squats", 40));
        s.apply_event(SessionEvent::PauseChanged { paused: true });
        s.confirm_exit = true;
        s.apply_event(SessionEvent::Cancelled);
        assert_eq!(s.phase, Phase::Pre);
        assert_eq!(s.index, 0);
        assert!(!s.paused);
        assert!(!s.confirm_exit);
    }

    #[test]
    fn history_selection_stays_in_bounds() {
        let mut s = UiState::default();
        s.select_next();
        assert_eq!(s.history_selected, 0);
        let entry = summary("a", 1);
        s.set_history(vec![entry.clone(), entry.clone()]);
        s.select_next();
        s.select_next();
        assert_eq!(s.history_selected, 1);
        s.set_history(vec![entry]);
        assert_eq!(s.history_selected, 0);
        s.select_prev();
        assert_eq!(s.history_selected, 0);
    }
}
