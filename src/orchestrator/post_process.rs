//! Post-session processing.
//!
//! Records the completed workout with the backend (with retry), refreshes the
//! streak, and handles auto-save and history reload for presentation layers.

use crate::api::{ApiClient, ApiError};
use crate::model::{InfoEvent, SessionConfig, SessionEvent, SessionStats, SessionSummary};
use crate::storage;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// Exponential backoff for the completion recorder.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    const MAX_BACKOFF_FACTOR: u32 = 8;

    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            max_attempts: cfg.completion_retries.saturating_add(1),
            base_delay: cfg.retry_base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(Self::MAX_BACKOFF_FACTOR);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut on_attempt: impl FnMut(u32, u32),
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        on_attempt(attempt, max);
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && e.is_retryable() => {
                let delay = policy.delay_after(attempt);
                warn!(attempt, max_attempts = max, error = %e, ?delay, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Report a completed session to the backend and assemble its summary.
///
/// Emits `Finalizing` first and `SummaryReady` last. Collaborator failures only
/// leave the corresponding summary fields empty.
pub(crate) async fn finalize_session(
    client: &ApiClient,
    cfg: &SessionConfig,
    stats: SessionStats,
    event_tx: &UnboundedSender<SessionEvent>,
) -> SessionSummary {
    let _ = event_tx.send(SessionEvent::Finalizing {
        session_id: cfg.session_id.clone(),
    });

    let totals = match cfg.workout_id {
        Some(workout_id) => {
            let result = retry_with_backoff(
                RetryPolicy::from_config(cfg),
                |attempt, max_attempts| {
                    let _ = event_tx.send(SessionEvent::Info(InfoEvent::RecordAttempt {
                        attempt,
                        max_attempts,
                    }));
                },
                || client.complete_workout(workout_id),
            )
            .await;
            match result {
                Ok(totals) => {
                    info!(workout_id, total_workouts = totals.total_workouts, "workout recorded");
                    Some(totals)
                }
                Err(e) => {
                    warn!(workout_id, error = %e, "could not record workout");
                    let _ = event_tx.send(SessionEvent::Info(InfoEvent::RecordFailed {
                        reason: e.to_string(),
                    }));
                    None
                }
            }
        }
        None => {
            let _ = event_tx.send(SessionEvent::Info(InfoEvent::NoWorkoutId));
            None
        }
    };

    let streak_days = if client.has_token() {
        match client.fetch_streak().await {
            Ok(s) => Some(s.days),
            Err(e) => {
                warn!(error = %e, "streak refresh failed");
                None
            }
        }
    } else {
        None
    };

    let summary = SessionSummary {
        timestamp_utc: now_rfc3339(),
        session_id: cfg.session_id.clone(),
        workout_id: cfg.workout_id,
        stats,
        totals,
        streak_days,
    };
    let _ = event_tx.send(SessionEvent::SummaryReady {
        summary: Box::new(summary.clone()),
    });
    summary
}

/// Result of post-session processing, ready for presentation layers.
pub(crate) struct ProcessedSession {
    pub saved_path: Option<std::path::PathBuf>,
    pub history: Vec<SessionSummary>,
}

/// Auto-save the summary and reload recent history.
pub(crate) fn process_session_completion(
    summary: &SessionSummary,
    auto_save: bool,
    history_load: usize,
) -> ProcessedSession {
    let saved_path = if auto_save {
        match storage::save_session(summary) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "auto-save failed");
                None
            }
        }
    } else {
        None
    };
    let history = storage::load_recent(history_load).unwrap_or_default();
    ProcessedSession {
        saved_path,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::json;
    use std::cell::Cell;
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unavailable() -> ApiError {
        ApiError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
        };
        let delays: Vec<_> = (1..=6).map(|a| p.delay_after(a).as_millis()).collect();
        assert_eq!(delays, [100, 200, 400, 800, 800, 800]);
        assert_eq!(p.delay_after(40), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_errors_with_backoff() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        let start = Instant::now();
        let res: Result<(), ApiError> = retry_with_backoff(
            policy,
            |_, _| {},
            || {
                calls.set(calls.get() + 1);
                async { Err(unavailable()) }
            },
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.get(), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_success_or_permanent_error() {
        let calls = Cell::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        };
        let res = retry_with_backoff(
            policy,
            |_, _| {},
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(unavailable())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(res.unwrap(), 3);

        calls.set(0);
        let res: Result<(), ApiError> = retry_with_backoff(
            policy,
            |_, _| {},
            || {
                calls.set(calls.get() + 1);
                async { Err(ApiError::MissingToken) }
            },
        )
        .await;
        assert!(matches!(res, Err(ApiError::MissingToken)));
        assert_eq!(calls.get(), 1);
    }

    fn config_for(server: &MockServer, workout_id: Option<i64>) -> SessionConfig {
        SessionConfig {
            base_url: server.uri(),
            session_id: "sess-1".into(),
            workout_id,
            tick_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            completion_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            user_agent: "test".into(),
        }
    }

    #[tokio::test]
    async fn finalize_records_after_transient_failures_and_refreshes_streak() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workout-progress/complete"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/workout-progress/complete"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "workoutId": 3, "caloriesBurned": 90, "totalWorkouts": 8,
                "totalCaloriesBurned": 700, "totalDurationInMinutes": 64
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/home/streak"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "days": 4 })))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config_for(&server, Some(3));
        let client = ApiClient::new(&cfg, Some("tok".into())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = finalize_session(&client, &cfg, SessionStats::default(), &tx).await;

        assert_eq!(summary.totals.as_ref().map(|t| t.total_workouts), Some(8));
        assert_eq!(summary.streak_days, Some(4));
        assert_eq!(summary.session_id, "sess-1");

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(matches!(events.first(), Some(SessionEvent::Finalizing { .. })));
        assert!(matches!(events.last(), Some(SessionEvent::SummaryReady { .. })));
        let attempts = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Info(InfoEvent::RecordAttempt { .. })))
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn finalize_tolerates_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workout-progress/complete"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/home/streak"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cfg = config_for(&server, Some(3));
        let client = ApiClient::new(&cfg, Some("tok".into())).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = finalize_session(&client, &cfg, SessionStats::default(), &tx).await;
        assert!(summary.totals.is_none());
        assert!(summary.streak_days.is_none());

        let mut failed = false;
        while let Ok(ev) = rx.try_recv() {
            failed |= matches!(ev, SessionEvent::Info(InfoEvent::RecordFailed { .. }));
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn finalize_without_workout_id_skips_recording() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let cfg = config_for(&server, None);
        let client = ApiClient::new(&cfg, None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = finalize_session(&client, &cfg, SessionStats::default(), &tx).await;
        assert!(summary.totals.is_none());

        let mut skipped = false;
        while let Ok(ev) = rx.try_recv() {
            skipped |= matches!(ev, SessionEvent::Info(InfoEvent::NoWorkoutId));
        }
        assert!(skipped);
    }
}
