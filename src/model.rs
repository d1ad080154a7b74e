use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub base_url: String,
    pub session_id: String,
    #[serde(default)]
    pub workout_id: Option<i64>,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub completion_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

/// One step of a workout. Only `name` and the two durations drive the runner;
/// the rest is display material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    #[serde(rename = "duration")]
    pub work_secs: u32,
    #[serde(rename = "rest", default)]
    pub rest_secs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Exercise {
    pub fn new(name: impl Into<String>, work_secs: u32, rest_secs: u32) -> Self {
        Self {
            name: name.into(),
            work_secs,
            rest_secs,
            description: None,
            tips: None,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Pre,
    Exercising,
    Resting,
    Completed,
}

impl Phase {
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Exercising | Phase::Resting)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Pre => "READY",
            Phase::Exercising => "EXERCISE",
            Phase::Resting => "REST",
            Phase::Completed => "DONE",
        }
    }
}

/// Counters accumulated by the runner while a session is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub exercise_count: usize,
    pub exercises_performed: usize,
    pub exercises_skipped: usize,
    pub rests_taken: usize,
    pub rests_skipped: usize,
    pub work_secs: u64,
    pub rest_secs: u64,
    pub planned_work_secs: u64,
    pub planned_rest_secs: u64,
}

impl SessionStats {
    pub fn elapsed_secs(&self) -> u64 {
        self.work_secs + self.rest_secs
    }
}

/// Body returned by `POST /api/workout-progress/complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionTotals {
    #[serde(default)]
    pub history_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub workout_id: Option<i64>,
    #[serde(default)]
    pub workout_name: Option<String>,
    #[serde(default)]
    pub calories_burned: u32,
    #[serde(default)]
    pub total_workouts: u32,
    #[serde(default)]
    pub total_calories_burned: u32,
    #[serde(default)]
    pub total_duration_in_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(default)]
    pub timestamp_utc: String,
    pub session_id: String,
    #[serde(default)]
    pub workout_id: Option<i64>,
    pub stats: SessionStats,
    #[serde(default)]
    pub totals: Option<CompletionTotals>,
    #[serde(default)]
    pub streak_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    PhaseStarted {
        phase: Phase,
        index: usize,
        name: String,
        seconds: u32,
    },
    Tick {
        phase: Phase,
        index: usize,
        seconds_remaining: u32,
    },
    PauseChanged {
        paused: bool,
    },
    Info(InfoEvent),
    Completed {
        stats: SessionStats,
    },
    Cancelled,
    /// Completion recorder is in flight for `session_id`.
    Finalizing {
        session_id: String,
    },
    SummaryReady {
        // Boxed so the common tick events stay small.
        summary: Box<SessionSummary>,
    },
}

/// Structured info events emitted by the engine and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Skipped { phase: Phase, index: usize },
    RecordAttempt { attempt: u32, max_attempts: u32 },
    RecordFailed { reason: String },
    NoWorkoutId,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Skipped { phase, index } => match phase {
                Phase::Resting => format!("Skipped rest after exercise {}", index + 1),
                _ => format!("Skipped exercise {}", index + 1),
            },
            InfoEvent::RecordAttempt {
                attempt,
                max_attempts,
            } => format!("Recording workout ({attempt}/{max_attempts})…"),
            InfoEvent::RecordFailed { reason } => format!("Could not record workout: {reason}"),
            InfoEvent::NoWorkoutId => "No workout id; progress not recorded".to_string(),
        }
    }
}

/// Final JSON document printed in `--json` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub completed: bool,
    pub exercises: Vec<Exercise>,
    #[serde(default)]
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub days: u32,
}
