mod editor;

use std::collections::HashMap;
use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use querydeck_core::execution::{ExecutionContext, RunKind};
use querydeck_core::history::FileExecutionHistory;
use querydeck_core::notice::WorkbenchNotice;
use querydeck_core::run_mode::RunRequest;
use querydeck_core::service::ExecutionService;
use querydeck_core::tab_store::{CloseOutcome, Tab, TabId};
use querydeck_core::virtualizer::{ResultViewport, ViewportMetrics};
use querydeck_core::workbench::{CancelOutcome, PageOutcome, RunOutcome, Workbench};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::editor::{EditKey, EditorCursor};

const TICK_RATE: Duration = Duration::from_millis(100);
// Terminal rows are one cell tall.
const TERMINAL_ROW_HEIGHT: u32 = 1;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Editor,
    Results,
}

impl Focus {
    fn toggle(self) -> Self {
        match self {
            Self::Editor => Self::Results,
            Self::Results => Self::Editor,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Editor => "Editor",
            Self::Results => "Results",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    ToggleFocus,
    Run,
    Explain,
    Cancel,
    NewTab,
    CloseTab,
    DuplicateTab,
    SelectTab(isize),
    CycleDatasource,
    ReopenLastHistory,
    NextPage,
    PreviousPage,
    ScrollRows(i64),
    ScrollPages(i64),
    ScrollTop,
    Edit(EditKey),
    Tick,
}

struct TuiApp<S: ExecutionService + 'static> {
    workbench: Workbench<S>,
    runtime: Handle,
    history: Option<FileExecutionHistory>,
    notices: broadcast::Receiver<WorkbenchNotice>,
    reports_tx: mpsc::UnboundedSender<String>,
    reports: mpsc::UnboundedReceiver<String>,
    focus: Focus,
    cursors: HashMap<TabId, EditorCursor>,
    viewport: ResultViewport,
    metrics: ViewportMetrics,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl<S: ExecutionService + 'static> TuiApp<S> {
    fn new(
        workbench: Workbench<S>,
        runtime: Handle,
        history: Option<FileExecutionHistory>,
    ) -> Self {
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let metrics = ViewportMetrics {
            row_height: TERMINAL_ROW_HEIGHT,
            viewport_height: 10,
            overscan: workbench.config().overscan,
        };
        Self {
            notices: workbench.subscribe(),
            workbench,
            runtime,
            history,
            reports_tx,
            reports,
            focus: Focus::Editor,
            cursors: HashMap::new(),
            viewport: ResultViewport::new(),
            metrics,
            show_help: false,
            should_quit: false,
            status_line: "F5 runs the statement under the cursor, F1 shows help".to_string(),
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::ToggleFocus => {
                self.focus = self.focus.toggle();
                self.status_line = format!("Focus: {}", self.focus.label());
            }
            Msg::Run => self.run_active(RunKind::Query),
            Msg::Explain => self.run_active(RunKind::Explain),
            Msg::Cancel => self.cancel_active(),
            Msg::NewTab => {
                self.workbench.new_tab();
                self.focus = Focus::Editor;
            }
            Msg::CloseTab => self.close_active(),
            Msg::DuplicateTab => {
                if let Err(err) = self.workbench.duplicate_tab(self.workbench.active_id()) {
                    self.status_line = err.to_string();
                }
            }
            Msg::SelectTab(offset) => {
                self.workbench.select_relative(offset);
            }
            Msg::CycleDatasource => self.cycle_datasource(),
            Msg::ReopenLastHistory => self.reopen_last_history(),
            Msg::NextPage => self.step_page(true),
            Msg::PreviousPage => self.step_page(false),
            Msg::ScrollRows(rows) => self.scroll_by(rows * i64::from(self.metrics.row_height)),
            Msg::ScrollPages(pages) => {
                self.scroll_by(pages * i64::from(self.metrics.viewport_height));
            }
            Msg::ScrollTop => {
                let total = self.active_row_count();
                self.viewport.scroll_to(0, total, self.metrics);
            }
            Msg::Edit(key) => self.edit(key),
            Msg::Tick => self.drain_reports(),
        }
    }

    fn active_tab(&self) -> Option<Tab> {
        self.workbench.active_tab()
    }

    fn active_row_count(&self) -> usize {
        self.active_tab()
            .map_or(0, |tab| tab.execution.result_rows.len())
    }

    fn cursor_for(&mut self, tab: &Tab) -> &mut EditorCursor {
        let cursor = self
            .cursors
            .entry(tab.id)
            .or_insert_with(|| EditorCursor::at_end(&tab.sql));
        cursor.clamp(&tab.sql);
        cursor
    }

    fn edit(&mut self, key: EditKey) {
        let Some(tab) = self.active_tab() else {
            return;
        };
        let Some(edited) = self.cursor_for(&tab).apply(&tab.sql, key) else {
            return;
        };
        if let Err(err) = self.workbench.set_sql(tab.id, edited) {
            self.status_line = err.to_string();
        }
    }

    fn run_active(&mut self, kind: RunKind) {
        let Some(tab) = self.active_tab() else {
            return;
        };
        let editor = self.cursor_for(&tab).snapshot();
        let request = match kind {
            RunKind::Query => RunRequest::query(editor),
            RunKind::Explain => RunRequest::explain(editor),
        };

        let workbench = self.workbench.clone();
        let reports = self.reports_tx.clone();
        self.focus = Focus::Results;
        self.runtime.spawn(async move {
            let report = match workbench.run(tab.id, request).await {
                Ok(RunOutcome::Started(execution_id)) => format!("Submitted {execution_id}"),
                Ok(RunOutcome::AlreadyExecuting) => {
                    "This tab is already running a query".to_string()
                }
                Ok(RunOutcome::Rejected(message) | RunOutcome::SubmitFailed(message)) => message,
                Ok(RunOutcome::Abandoned) => "Submission discarded".to_string(),
                Err(err) => err.to_string(),
            };
            let _ = reports.send(report);
        });
    }

    fn cancel_active(&mut self) {
        let tab_id = self.workbench.active_id();
        let workbench = self.workbench.clone();
        let reports = self.reports_tx.clone();
        self.runtime.spawn(async move {
            let report = match workbench.cancel(tab_id).await {
                Ok(CancelOutcome::NothingToCancel) => return,
                Ok(CancelOutcome::Settled(phase)) => format!("Execution settled as {phase}"),
                Ok(CancelOutcome::StillRunning) => {
                    "Cancel sent; the server still reports the query as running".to_string()
                }
                Ok(CancelOutcome::Failed(message)) => message,
                Ok(CancelOutcome::Superseded) => "Cancel overtaken by a newer run".to_string(),
                Err(err) => err.to_string(),
            };
            let _ = reports.send(report);
        });
    }

    fn close_active(&mut self) {
        let tab_id = self.workbench.active_id();
        match self.workbench.close_tab(tab_id) {
            Ok(CloseOutcome::Reset) => {
                self.cursors.remove(&tab_id);
                self.status_line = "Last tab reset".to_string();
            }
            Ok(CloseOutcome::Removed | CloseOutcome::Missing) => {
                self.cursors.remove(&tab_id);
            }
            Err(err) => self.status_line = err.to_string(),
        }
    }

    fn cycle_datasource(&mut self) {
        let Some(tab) = self.active_tab() else {
            return;
        };
        let permitted = self.workbench.permitted_datasources();
        if permitted.is_empty() {
            self.status_line = "No permitted datasources configured".to_string();
            return;
        }
        let next = tab
            .datasource_id
            .as_ref()
            .and_then(|current| permitted.iter().position(|id| id == current))
            .map_or(0, |index| (index + 1) % permitted.len());
        let datasource_id = permitted[next].clone();
        match self
            .workbench
            .set_datasource(tab.id, Some(datasource_id.clone()))
        {
            Ok(()) => self.status_line = format!("Datasource: {datasource_id}"),
            Err(err) => self.status_line = err.to_string(),
        }
    }

    fn reopen_last_history(&mut self) {
        let Some(history) = &self.history else {
            self.status_line = "Execution history is disabled".to_string();
            return;
        };
        match history.recent(1) {
            Ok(records) => match records.first() {
                Some(record) => {
                    self.workbench.open_history_entry(record);
                    self.focus = Focus::Editor;
                }
                None => self.status_line = "History is empty".to_string(),
            },
            Err(err) => self.status_line = format!("Failed to read history: {err}"),
        }
    }

    fn step_page(&mut self, forward: bool) {
        let tab_id = self.workbench.active_id();
        let workbench = self.workbench.clone();
        let reports = self.reports_tx.clone();
        self.runtime.spawn(async move {
            let outcome = if forward {
                workbench.next_page(tab_id).await
            } else {
                workbench.previous_page(tab_id).await
            };
            let report = match outcome {
                Ok(PageOutcome::Loaded | PageOutcome::Stale) => return,
                Ok(PageOutcome::Busy) => "A page is already loading".to_string(),
                Ok(PageOutcome::Unavailable) => "No page in that direction".to_string(),
                Ok(PageOutcome::Failed(message)) => message,
                Err(err) => err.to_string(),
            };
            let _ = reports.send(report);
        });
    }

    fn scroll_by(&mut self, delta: i64) {
        let total = self.active_row_count();
        self.viewport.scroll_by(delta, total, self.metrics);
    }

    fn drain_reports(&mut self) {
        while let Ok(report) = self.reports.try_recv() {
            self.status_line = report;
        }
        loop {
            match self.notices.try_recv() {
                Ok(WorkbenchNotice::ExecutionFinished(finished)) => {
                    let detail = finished
                        .error_message
                        .or(finished.status_message)
                        .unwrap_or_default();
                    self.status_line =
                        format!("{}: {} {detail}", finished.tab_title, finished.phase);
                }
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "tui skipped workbench notices");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => break,
            }
        }
    }
}

/// Runs the terminal workbench until the user quits. Background work is
/// spawned on `runtime`; this call blocks the current thread.
pub fn run<S: ExecutionService + 'static>(
    workbench: Workbench<S>,
    runtime: Handle,
    history: Option<FileExecutionHistory>,
) -> Result<(), TuiError> {
    let mut terminal = setup_terminal()?;
    let mut app = TuiApp::new(workbench, runtime, history);
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<B: Backend, S: ExecutionService + 'static>(
    terminal: &mut Terminal<B>,
    app: &mut TuiApp<S>,
) -> Result<(), TuiError> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.focus) {
                        app.handle(message);
                    }
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render<S: ExecutionService + 'static>(frame: &mut Frame<'_>, app: &mut TuiApp<S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(35),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let tabs = app.workbench.tabs();
    let active_id = app.workbench.active_id();
    render_tab_bar(frame, chunks[0], &tabs, active_id);

    let Some(tab) = tabs.iter().find(|tab| tab.id == active_id) else {
        return;
    };
    render_editor(frame, chunks[1], app, tab);
    render_results(frame, chunks[2], app, tab);
    render_footer(frame, chunks[3], app, tab);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn render_tab_bar(frame: &mut Frame<'_>, area: Rect, tabs: &[Tab], active_id: TabId) {
    let mut spans = Vec::with_capacity(tabs.len() * 2);
    for tab in tabs {
        let marker = if tab.execution.is_executing() { "*" } else { "" };
        let label = format!(" {}{marker} ", tab.title);
        let style = if tab.id == active_id {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default()
        };
        spans.push(Span::styled(label, style));
        spans.push(Span::raw("|"));
    }
    let bar = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("querydeck"));
    frame.render_widget(bar, area);
}

fn render_editor<S: ExecutionService + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &mut TuiApp<S>,
    tab: &Tab,
) {
    let title = format!(
        "SQL [{}{}]",
        tab.datasource_id.as_deref().unwrap_or("default datasource"),
        tab.schema
            .as_deref()
            .map(|schema| format!(" / {schema}"))
            .unwrap_or_default()
    );
    let lines: Vec<Line<'_>> = tab.sql.lines().map(Line::from).collect();
    let editor = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(focus_style(app.focus == Focus::Editor)),
    );
    frame.render_widget(editor, area);

    if app.focus == Focus::Editor && !app.show_help {
        let (line, column) = app.cursor_for(tab).line_and_column(&tab.sql);
        let x = area.x.saturating_add(1).saturating_add(clamp_u16(column));
        let y = area.y.saturating_add(1).saturating_add(clamp_u16(line));
        if x < area.right().saturating_sub(1) && y < area.bottom().saturating_sub(1) {
            frame.set_cursor_position(Position::new(x, y));
        }
    }
}

fn render_results<S: ExecutionService + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &mut TuiApp<S>,
    tab: &Tab,
) {
    let execution = &tab.execution;
    let block = Block::default()
        .borders(Borders::ALL)
        .title(results_title(execution))
        .border_style(focus_style(app.focus == Focus::Results));

    // One line goes to the column header.
    let inner_height = area.height.saturating_sub(3).max(1);
    app.metrics.viewport_height = u32::from(inner_height);

    let lines = if execution.has_results() {
        let rows = &execution.result_rows;
        app.viewport.sync(
            tab.id,
            execution.execution_id.as_ref(),
            &execution.cursor.current_token,
        );
        let window = app.viewport.window(rows.len(), app.metrics);
        let first_visible =
            usize::try_from(app.viewport.scroll_offset() / app.metrics.row_height.max(1))
                .unwrap_or(usize::MAX);
        let mounted = window.slice(rows);

        let mut lines = vec![Line::styled(
            execution.result_columns.join(" | "),
            Style::default().add_modifier(Modifier::BOLD),
        )];
        lines.extend(
            mounted
                .iter()
                .skip(first_visible.saturating_sub(window.start))
                .take(usize::from(inner_height))
                .map(|row| Line::from(format_row(execution, &row.values))),
        );
        lines
    } else {
        vec![Line::from(
            execution
                .error_message
                .clone()
                .or_else(|| execution.status_message.clone())
                .unwrap_or_else(|| "No results".to_string()),
        )]
    };

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn results_title(execution: &ExecutionContext) -> String {
    let kind = match execution.run_kind {
        RunKind::Query => "Results",
        RunKind::Explain => "Plan",
    };
    if !execution.has_results() {
        return format!("{kind} [{}]", execution.phase);
    }
    let mut title = format!(
        "{kind} [{}] page {} | {} rows",
        execution.phase,
        execution.cursor.page_number(),
        execution.result_rows.len()
    );
    if execution.row_limit_reached {
        title.push_str(" | row limit reached");
    }
    if execution.page_loading {
        title.push_str(" | loading");
    }
    title
}

fn format_row(execution: &ExecutionContext, values: &[String]) -> String {
    match execution.run_kind {
        RunKind::Query => values.join(" | "),
        RunKind::Explain => execution
            .result_columns
            .iter()
            .zip(values)
            .filter(|(_, value)| value.as_str() != "NULL")
            .map(|(column, value)| format!("{column}={value}"))
            .collect::<Vec<_>>()
            .join("  "),
    }
}

fn render_footer<S: ExecutionService + 'static>(
    frame: &mut Frame<'_>,
    area: Rect,
    app: &TuiApp<S>,
    tab: &Tab,
) {
    let execution_line = match (&execution_id_label(&tab.execution), &tab.execution.notice) {
        (_, Some(notice)) => notice.clone(),
        (Some(label), None) => label.clone(),
        (None, None) => "No execution yet".to_string(),
    };
    let footer = Paragraph::new(vec![
        Line::from(execution_line),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("F1 help"));
    frame.render_widget(footer, area);
}

fn execution_id_label(execution: &ExecutionContext) -> Option<String> {
    execution.execution_id.as_ref().map(|execution_id| {
        let message = execution.status_message.as_deref().unwrap_or_default();
        format!("{} {execution_id} {message}", execution.phase)
    })
}

fn focus_style(focused: bool) -> Style {
    if focused {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn clamp_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("F5: run selection, statement under cursor, or whole tab"),
        Line::from("F7: explain"),
        Line::from("Esc / Ctrl+C: cancel the running query"),
        Line::from("Ctrl+T new tab, Ctrl+W close, Ctrl+D duplicate"),
        Line::from("F2 / F3: previous / next tab"),
        Line::from("F4: cycle datasource, F9: reopen last history entry"),
        Line::from("Tab: switch between editor and results"),
        Line::from("Results: arrows or j/k scroll, PgUp/PgDn, n/p page"),
        Line::from("Shift+arrows select, Ctrl+A select all"),
        Line::from("Ctrl+Q: quit"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, focus: Focus) -> Option<Msg> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    match key.code {
        KeyCode::Char('q') if ctrl => Some(Msg::Quit),
        KeyCode::Char('c') if ctrl => Some(Msg::Cancel),
        KeyCode::Char('t') if ctrl => Some(Msg::NewTab),
        KeyCode::Char('w') if ctrl => Some(Msg::CloseTab),
        KeyCode::Char('d') if ctrl => Some(Msg::DuplicateTab),
        KeyCode::Esc => Some(Msg::Cancel),
        KeyCode::F(1) => Some(Msg::ToggleHelp),
        KeyCode::F(2) => Some(Msg::SelectTab(-1)),
        KeyCode::F(3) => Some(Msg::SelectTab(1)),
        KeyCode::F(4) => Some(Msg::CycleDatasource),
        KeyCode::F(5) => Some(Msg::Run),
        KeyCode::F(7) => Some(Msg::Explain),
        KeyCode::F(9) => Some(Msg::ReopenLastHistory),
        KeyCode::Tab => Some(Msg::ToggleFocus),
        code => match focus {
            Focus::Editor => map_editor_key(code, ctrl, shift),
            Focus::Results => map_results_key(code),
        },
    }
}

fn map_editor_key(code: KeyCode, ctrl: bool, shift: bool) -> Option<Msg> {
    let edit = match code {
        KeyCode::Char('a') if ctrl => EditKey::SelectAll,
        KeyCode::Char(_) if ctrl => return None,
        KeyCode::Char(ch) => EditKey::Insert(ch),
        KeyCode::Enter => EditKey::Insert('\n'),
        KeyCode::Backspace => EditKey::Backspace,
        KeyCode::Delete => EditKey::Delete,
        KeyCode::Left if shift => EditKey::SelectLeft,
        KeyCode::Right if shift => EditKey::SelectRight,
        KeyCode::Left => EditKey::Left,
        KeyCode::Right => EditKey::Right,
        KeyCode::Up => EditKey::Up,
        KeyCode::Down => EditKey::Down,
        KeyCode::Home => EditKey::Home,
        KeyCode::End => EditKey::End,
        _ => return None,
    };
    Some(Msg::Edit(edit))
}

fn map_results_key(code: KeyCode) -> Option<Msg> {
    match code {
        KeyCode::Up | KeyCode::Char('k') => Some(Msg::ScrollRows(-1)),
        KeyCode::Down | KeyCode::Char('j') => Some(Msg::ScrollRows(1)),
        KeyCode::PageUp => Some(Msg::ScrollPages(-1)),
        KeyCode::PageDown => Some(Msg::ScrollPages(1)),
        KeyCode::Home => Some(Msg::ScrollTop),
        KeyCode::Char('n') | KeyCode::Right => Some(Msg::NextPage),
        KeyCode::Char('p') | KeyCode::Left => Some(Msg::PreviousPage),
        _ => None,
    }
}
