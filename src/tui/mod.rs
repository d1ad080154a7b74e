mod help;
mod state;

use crate::cli::{Cli, Workout};
use crate::metrics;
use crate::model::{Exercise, Phase, SessionEvent, SessionSummary};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{UiState, HELP_TAB, HISTORY_TAB, WORKOUT_TAB};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub(crate) async fn run(args: Cli, workout: Workout) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_exercises = workout.exercises.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_args, ui_exercises, event_rx, cmd_tx));

    let res = orchestrator::run_controller(
        &workout.cfg,
        workout.client,
        workout.exercises,
        args.start_on_launch,
        event_tx,
        cmd_rx,
    )
    .await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

fn run_threaded(
    args: Cli,
    exercises: Vec<Exercise>,
    mut event_rx: UnboundedReceiver<SessionEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState {
        exercises,
        auto_save: args.auto_save,
        info: if args.start_on_launch {
            "Starting…".into()
        } else {
            "Press Enter to start".into()
        },
        ..Default::default()
    };
    state.history = crate::storage::load_recent(state.history_load).unwrap_or_default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                SessionEvent::SummaryReady { summary } => {
                    handle_summary_ready(&mut state, *summary);
                }
                other => state.apply_event(other),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match handle_key(&mut state, k.modifiers, k.code) {
                    KeyAction::None => {}
                    KeyAction::Send(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

#[derive(Debug)]
enum KeyAction {
    None,
    Send(UiCommand),
    Quit,
}

fn handle_key(state: &mut UiState, mods: KeyModifiers, code: KeyCode) -> KeyAction {
    match (mods, code) {
        (_, KeyCode::Char('q')) => return KeyAction::Quit,
        (m, KeyCode::Char('c')) if m.contains(KeyModifiers::CONTROL) => return KeyAction::Quit,
        _ => {}
    }

    // The exit dialog swallows the next key.
    if state.confirm_exit {
        state.confirm_exit = false;
        if matches!(code, KeyCode::Char('y') | KeyCode::Char('Y')) {
            state.info = "Ending workout…".into();
            return KeyAction::Send(UiCommand::Exit);
        }
        state.info = "Keep going!".into();
        return KeyAction::None;
    }

    match code {
        KeyCode::Tab => {
            state.tab = (state.tab + 1) % 3;
            if state.tab == HISTORY_TAB {
                state.history_selected = 0;
            }
        }
        KeyCode::Char('?') => state.tab = HELP_TAB,
        KeyCode::Char('a') => {
            state.auto_save = !state.auto_save;
            state.info = if state.auto_save {
                "Auto-save enabled".into()
            } else {
                "Auto-save disabled".into()
            };
        }
        _ if state.tab == HISTORY_TAB => handle_history_key(state, code),
        _ if state.tab != WORKOUT_TAB => {}
        KeyCode::Enter if state.phase == Phase::Pre => {
            state.info = "Starting…".into();
            return KeyAction::Send(UiCommand::Start);
        }
        KeyCode::Char('r') if state.phase == Phase::Completed => {
            state.clear_session();
            state.info = "Starting again…".into();
            return KeyAction::Send(UiCommand::Start);
        }
        KeyCode::Char('p') | KeyCode::Char(' ') if state.phase.is_active() => {
            return KeyAction::Send(UiCommand::TogglePause);
        }
        KeyCode::Char('n') if state.phase.is_active() => {
            return KeyAction::Send(UiCommand::Skip);
        }
        KeyCode::Char('x') | KeyCode::Esc if state.phase.is_active() => {
            state.confirm_exit = true;
        }
        _ => {}
    }
    KeyAction::None
}

fn handle_history_key(state: &mut UiState, code: KeyCode) {
    match code {
        KeyCode::Up | KeyCode::Char('k') => state.select_prev(),
        KeyCode::Down | KeyCode::Char('j') => state.select_next(),
        KeyCode::Char('r') => match crate::storage::load_recent(state.history_load) {
            Ok(history) => {
                let n = history.len();
                state.set_history(history);
                state.info = format!("Refreshed: {n} session(s)");
            }
            Err(e) => state.info = format!("Refresh failed: {e:#}"),
        },
        _ => {}
    }
}

fn handle_summary_ready(state: &mut UiState, summary: SessionSummary) {
    let reload_size = state.history_load.max(state.history.len() + 1);
    let processed =
        orchestrator::process_session_completion(&summary, state.auto_save, reload_size);

    if let Some(path) = processed.saved_path.as_ref() {
        state.info = format!("Saved: {}", path.display());
    }
    state.set_history(processed.history);
    state.set_summary(summary);
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Workout"),
        Line::from("History"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("workout-runner"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        WORKOUT_TAB => draw_workout(chunks[1], f, state),
        HISTORY_TAB => draw_history(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    let status = Paragraph::new(Line::from(vec![
        Span::raw(state.info.clone()),
        Span::styled(
            if state.auto_save {
                "  [auto-save on]"
            } else {
                "  [auto-save off]"
            },
            Style::default().fg(Color::DarkGray),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, chunks[2]);

    if state.confirm_exit {
        draw_confirm_exit(area, f);
    }
}

fn phase_color(phase: Phase, paused: bool) -> Color {
    if paused {
        return Color::Yellow;
    }
    match phase {
        Phase::Exercising => Color::Green,
        Phase::Resting => Color::Cyan,
        Phase::Completed => Color::Magenta,
        Phase::Pre => Color::Gray,
    }
}

fn draw_workout(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    match state.phase {
        Phase::Pre => draw_exercise_list(area, f, state),
        Phase::Exercising | Phase::Resting => draw_active(area, f, state),
        Phase::Completed => draw_completed(area, f, state),
    }
}

fn draw_exercise_list(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let total = metrics::planned_session_secs(&state.exercises);
    let mut lines = vec![
        Line::from(format!(
            "{} exercises, about {}",
            state.exercises.len(),
            metrics::format_clock(total)
        )),
        Line::from(""),
    ];
    let last = state.exercises.len().saturating_sub(1);
    for (i, ex) in state.exercises.iter().enumerate() {
        let rest = if i < last && ex.rest_secs > 0 {
            format!("  rest {}", metrics::format_clock(u64::from(ex.rest_secs)))
        } else {
            String::new()
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:>2}. ", i + 1), Style::default().fg(Color::Gray)),
            Span::raw(ex.name.clone()),
            Span::styled(
                format!("  {}", metrics::format_clock(u64::from(ex.work_secs))),
                Style::default().fg(Color::Green),
            ),
            Span::styled(rest, Style::default().fg(Color::Cyan)),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("Press "),
        Span::styled("Enter", Style::default().fg(Color::Magenta)),
        Span::raw(" to start"),
    ]));

    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Ready"))
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}

fn draw_active(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(5),
                Constraint::Length(3),
                Constraint::Min(0),
            ]
            .as_ref(),
        )
        .split(area);

    let color = phase_color(state.phase, state.paused);
    let badge = if state.paused {
        "PAUSED"
    } else {
        state.phase.label()
    };
    let title = match state.phase {
        Phase::Resting => "Rest".to_string(),
        _ => state.exercise_name.clone(),
    };
    let clock = Paragraph::new(vec![
        Line::from(Span::styled(
            format!(" {badge} "),
            Style::default()
                .fg(Color::Black)
                .bg(color)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            metrics::format_clock(u64::from(state.seconds_remaining)),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )),
        Line::from(format!(
            "Exercise {} of {}",
            state.index + 1,
            state.exercises.len()
        )),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(clock, chunks[0]);

    let ratio = metrics::phase_progress(state.seconds_remaining, state.phase_total);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(format!("{:.0}%", ratio * 100.0));
    f.render_widget(gauge, chunks[1]);

    let remaining = metrics::remaining_session_secs(&state.exercises, &state.session_state());
    let mut lines = vec![Line::from(vec![
        Span::styled("Workout left: ", Style::default().fg(Color::Gray)),
        Span::raw(metrics::format_clock(remaining)),
    ])];
    match state.up_next() {
        Some(next) => lines.push(Line::from(vec![
            Span::styled("Up next: ", Style::default().fg(Color::Gray)),
            Span::raw(next.name.clone()),
        ])),
        None if state.phase == Phase::Exercising => {
            lines.push(Line::from("Last exercise, finish strong!"));
        }
        None => {}
    }
    if let Some(ex) = state.current_exercise() {
        if let Some(d) = ex.description.as_deref() {
            lines.push(Line::from(""));
            lines.push(Line::from(d.to_string()));
        }
        if let Some(t) = ex.tips.as_deref() {
            lines.push(Line::from(vec![
                Span::styled("Tip: ", Style::default().fg(Color::Yellow)),
                Span::raw(t.to_string()),
            ]));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("p", Style::default().fg(Color::Magenta)),
        Span::raw(if state.paused { " resume  " } else { " pause  " }),
        Span::styled("n", Style::default().fg(Color::Magenta)),
        Span::raw(" skip  "),
        Span::styled("x", Style::default().fg(Color::Magenta)),
        Span::raw(" end workout"),
    ]));
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: true });
    f.render_widget(p, chunks[2]);
}

fn draw_completed(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = Vec::new();
    match (state.last_summary.as_ref(), state.last_stats.as_ref()) {
        (Some(summary), _) => {
            for l in crate::text_summary::build_text_summary(summary).lines {
                lines.push(Line::from(l));
            }
        }
        (None, Some(stats)) => {
            lines.push(Line::from(format!(
                "{} exercises in {}",
                stats.exercise_count,
                metrics::format_clock(stats.elapsed_secs())
            )));
        }
        (None, None) => {}
    }
    if state.finalizing.is_some() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Recording your workout…",
            Style::default().fg(Color::Yellow),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("Press "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(" to go again or "),
        Span::styled("q", Style::default().fg(Color::Magenta)),
        Span::raw(" to quit"),
    ]));
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Workout complete")
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(p, area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

fn draw_confirm_exit(area: Rect, f: &mut ratatui::Frame) {
    let rect = centered(area, 44, 5);
    f.render_widget(Clear, rect);
    let p = Paragraph::new(vec![
        Line::from("End this workout? It will not be recorded."),
        Line::from(""),
        Line::from(vec![
            Span::styled("y", Style::default().fg(Color::Magenta)),
            Span::raw(" end   "),
            Span::styled("any other key", Style::default().fg(Color::Magenta)),
            Span::raw(" keep going"),
        ]),
    ])
    .alignment(Alignment::Center)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("End workout")
            .border_style(Style::default().fg(Color::Red)),
    );
    f.render_widget(p, rect);
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = Vec::new();
    let max_items = (area.height as usize).saturating_sub(4);
    let total = state.history.len();
    let current = if total > 0 {
        state.history_selected + 1
    } else {
        0
    };

    lines.push(Line::from(vec![
        Span::raw(format!("History ({current}/{total}) - ")),
        Span::styled("↑/↓/j/k", Style::default().fg(Color::Magenta)),
        Span::raw(": navigate, "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(": refresh"),
    ]));
    lines.push(Line::from(""));

    if state.history.is_empty() {
        lines.push(Line::from("No saved sessions yet."));
    }
    let offset = state
        .history_selected
        .saturating_sub(max_items.saturating_sub(1));
    for (i, s) in state
        .history
        .iter()
        .enumerate()
        .skip(offset)
        .take(max_items.max(1))
    {
        let stats = &s.stats;
        let kcal = s
            .totals
            .as_ref()
            .map(|t| format!("{} kcal", t.calories_burned))
            .unwrap_or_else(|| "not recorded".into());
        let streak = s
            .streak_days
            .map(|d| format!("  streak {d}d"))
            .unwrap_or_default();
        let text = format!(
            "{}  {}/{} done  {}  {}{}",
            s.timestamp_utc,
            stats
                .exercises_performed
                .saturating_sub(stats.exercises_skipped),
            stats.exercise_count,
            metrics::format_clock(stats.elapsed_secs()),
            kcal,
            streak
        );
        let style = if i == state.history_selected {
            Style::default().fg(Color::Black).bg(Color::Yellow)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(text, style)));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History"));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStats;

    fn active() -> UiState {
        UiState {
            phase: Phase::Exercising,
            exercises: vec![Exercise::new("a", 10, 5), Exercise::new("b", 10, 0)],
            ..Default::default()
        }
    }

    fn press(state: &mut UiState, c: char) -> KeyAction {
        handle_key(state, KeyModifiers::NONE, KeyCode::Char(c))
    }

    #[test]
    fn exit_requires_confirmation() {
        let mut s = active();
        assert!(matches!(press(&mut s, 'x'), KeyAction::None));
        assert!(s.confirm_exit);
        assert!(matches!(press(&mut s, 'n'), KeyAction::None));
        assert!(!s.confirm_exit);

        handle_key(&mut s, KeyModifiers::NONE, KeyCode::Esc);
        assert!(s.confirm_exit);
        assert!(matches!(press(&mut s, 'y'), KeyAction::Send(UiCommand::Exit)));
    }

    #[test]
    fn session_keys_only_apply_while_active() {
        let mut s = active();
        assert!(matches!(press(&mut s, 'p'), KeyAction::Send(UiCommand::TogglePause)));
        assert!(matches!(press(&mut s, 'n'), KeyAction::Send(UiCommand::Skip)));
        assert!(matches!(
            handle_key(&mut s, KeyModifiers::NONE, KeyCode::Enter),
            KeyAction::None
        ));

        let mut pre = UiState::default();
        assert!(matches!(press(&mut pre, 'p'), KeyAction::None));
        assert!(matches!(press(&mut pre, 'x'), KeyAction::None));
        assert!(!pre.confirm_exit);
        assert!(matches!(
            handle_key(&mut pre, KeyModifiers::NONE, KeyCode::Enter),
            KeyAction::Send(UiCommand::Start)
        ));
    }

    #[test]
    fn restart_only_after_completion() {
        let mut s = active();
        assert!(matches!(press(&mut s, 'r'), KeyAction::None));
        s.phase = Phase::Completed;
        s.last_stats = Some(SessionStats::default());
        assert!(matches!(press(&mut s, 'r'), KeyAction::Send(UiCommand::Start)));
        assert!(s.last_stats.is_none());
    }

    #[test]
    fn workout_keys_are_ignored_on_other_tabs() {
        let mut s = active();
        handle_key(&mut s, KeyModifiers::NONE, KeyCode::Tab);
        assert_eq!(s.tab, HISTORY_TAB);
        assert!(matches!(press(&mut s, 'n'), KeyAction::None));
        press(&mut s, '?');
        assert_eq!(s.tab, HELP_TAB);
        assert!(matches!(press(&mut s, 'p'), KeyAction::None));
    }

    #[test]
    fn quit_keys() {
        let mut s = active();
        assert!(matches!(press(&mut s, 'q'), KeyAction::Quit));
        assert!(matches!(
            handle_key(&mut s, KeyModifiers::CONTROL, KeyCode::Char('c')),
            KeyAction::Quit
        ));
    }
}
