//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for the completion summary.

use crate::metrics;
use crate::model::SessionSummary;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finalized session.
pub(crate) fn build_text_summary(summary: &SessionSummary) -> TextSummary {
    let mut lines = Vec::new();
    let stats = &summary.stats;

    lines.push(format!(
        "Workout complete: {} of {} exercises ({} skipped)",
        stats.exercises_performed.saturating_sub(stats.exercises_skipped),
        stats.exercise_count,
        stats.exercises_skipped
    ));
    lines.push(format!(
        "Time: {} total, {} exercising, {} resting",
        metrics::format_clock(stats.elapsed_secs()),
        metrics::format_clock(stats.work_secs),
        metrics::format_clock(stats.rest_secs)
    ));
    if let Some(ratio) = metrics::work_ratio(stats) {
        lines.push(format!("Effort: {:.0}% of planned work time", ratio * 100.0));
    }

    match summary.totals.as_ref() {
        Some(t) => {
            if let Some(name) = t.workout_name.as_deref() {
                lines.push(format!("Recorded: {name}"));
            }
            lines.push(format!("Calories: {}", t.calories_burned));
            lines.push(format!(
                "Totals: {} workouts, {} min, {} kcal",
                t.total_workouts, t.total_duration_in_minutes, t.total_calories_burned
            ));
        }
        None => lines.push("Totals: unavailable".to_string()),
    }
    if let Some(days) = summary.streak_days {
        lines.push(format!("Streak: {days} days"));
    }

    TextSummary { lines }
}
