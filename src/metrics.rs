use crate::model::{Exercise, Phase, SessionStats};
use crate::session::SessionState;

/// Format seconds as `m:ss`.
pub fn format_clock(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Fraction of the current phase already elapsed, in `[0, 1]`.
pub fn phase_progress(seconds_remaining: u32, phase_total: u32) -> f64 {
    if phase_total == 0 {
        return 1.0;
    }
    let done = phase_total.saturating_sub(seconds_remaining) as f64;
    (done / phase_total as f64).clamp(0.0, 1.0)
}

/// Seconds left in the whole session if nothing is skipped.
/// The final exercise's rest is not counted since it never runs.
pub fn remaining_session_secs(exercises: &[Exercise], state: &SessionState) -> u64 {
    if !state.phase.is_active() {
        return match state.phase {
            Phase::Pre => planned_session_secs(exercises),
            _ => 0,
        };
    }
    let last = exercises.len().saturating_sub(1);
    let mut total = u64::from(state.seconds_remaining);
    if state.phase == Phase::Exercising && state.index < last {
        total += u64::from(exercises[state.index].rest_secs);
    }
    for (i, ex) in exercises.iter().enumerate().skip(state.index + 1) {
        total += u64::from(ex.work_secs);
        if i < last {
            total += u64::from(ex.rest_secs);
        }
    }
    total
}

pub fn planned_session_secs(exercises: &[Exercise]) -> u64 {
    let last = exercises.len().saturating_sub(1);
    exercises
        .iter()
        .enumerate()
        .map(|(i, ex)| {
            let rest = if i < last { ex.rest_secs } else { 0 };
            u64::from(ex.work_secs) + u64::from(rest)
        })
        .sum()
}

/// Share of the planned work time actually spent exercising.
pub fn work_ratio(stats: &SessionStats) -> Option<f64> {
    if stats.planned_work_secs == 0 {
        return None;
    }
    Some(stats.work_secs as f64 / stats.planned_work_secs as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workout() -> Vec<Exercise> {
        vec![
            Exercise::new("a", 40, 20),
            Exercise::new("b", 40, 20),
            Exercise::new("c", 30, 15),
        ]
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(65), "1:05");
        assert_eq!(format_clock(600), "10:00");
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(phase_progress(40, 40), 0.0);
        assert_eq!(phase_progress(10, 40), 0.75);
        assert_eq!(phase_progress(0, 0), 1.0);
    }

    #[test]
    fn planned_time_excludes_final_rest() {
        assert_eq!(planned_session_secs(&workout()), 150);
    }

    #[test]
    fn remaining_time_tracks_position() {
        let ex = workout();
        let pre = SessionState::default();
        assert_eq!(remaining_session_secs(&ex, &pre), 150);

        let resting = SessionState {
            phase: Phase::Resting,
            index: 1,
            seconds_remaining: 5,
            is_running: true,
        };
        assert_eq!(remaining_session_secs(&ex, &resting), 35);

        let last = SessionState {
            phase: Phase::Exercising,
            index: 2,
            seconds_remaining: 12,
            is_running: true,
        };
        assert_eq!(remaining_session_secs(&ex, &last), 12);
    }

    #[test]
    fn work_ratio_needs_a_plan() {
        assert_eq!(work_ratio(&SessionStats::default()), None);
        let stats = SessionStats {
            work_secs: 55,
            planned_work_secs: 110,
            ..Default::default()
        };
        assert_eq!(work_ratio(&stats), Some(0.5));
    }
}
