//! Requests TUI (Ratatui)
//!
//! Live table of the proxy's recent requests with a detail pane.

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use crossterm::{execute, terminal};
use proxydash_core::{FeedState, RequestRecord};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};
use ratatui::{Frame, Terminal};
use tokio::sync::mpsc;

use super::{request_state, request_target};
use crate::client::{ApiError, RecentRequestsSource};
use crate::commands::Session;
use crate::poller::{PollEvent, PollSchedule, Poller};
use crate::units::{fmt_bytes, fmt_duration, fmt_unix_time};

const STATUS_TTL: Duration = Duration::from_secs(2);
const TABLE_CHROME_ROWS: u16 = 3;

struct TuiGuard {
    stdout: Stdout,
}

impl TuiGuard {
    fn enter() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(stdout, EnterAlternateScreen)?;
        Ok(Self { stdout })
    }

    fn backend(&mut self) -> CrosstermBackend<&mut Stdout> {
        CrosstermBackend::new(&mut self.stdout)
    }

    fn set_title(&mut self, title: &str) {
        let _ = execute!(self.stdout, SetTitle(title));
    }
}

impl Drop for TuiGuard {
    fn drop(&mut self) {
        let _ = execute!(self.stdout, SetTitle("proxydash"), LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, Clone, Copy)]
struct Theme {
    fg: Color,
    muted: Color,
    accent: Color,
    success: Color,
    warning: Color,
    error: Color,
    selection_bg: Color,
}

const THEME: Theme = Theme {
    fg: Color::Rgb(0xF2, 0xEC, 0xEA),
    muted: Color::Rgb(0x94, 0xA3, 0xB8),
    accent: Color::Rgb(0xE8, 0x87, 0x83),
    success: Color::Rgb(0x9B, 0xD9, 0xB3),
    warning: Color::Rgb(0xEA, 0xD3, 0x9C),
    error: Color::Rgb(0xE8, 0xA3, 0xA0),
    selection_bg: Color::Rgb(0x2B, 0x3A, 0x37),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TuiAction {
    None,
    Quit,
    ToggleAutoRefresh,
    RefreshNow,
}

struct UiState {
    feed: FeedState,
    /// Selection follows the request id so it survives rows moving around.
    selected_id: Option<u64>,
    table: TableState,
    show_detail: bool,
    auto_refresh: bool,
    interval: Duration,
    loading: bool,
    fetched_at: Option<Instant>,
    last_error: Option<String>,
    status_msg: Option<(String, Instant)>,
    last_visible_rows: usize,
}

impl UiState {
    fn new(capacity: usize, interval: Duration, auto_refresh: bool) -> Self {
        Self {
            feed: FeedState::new(capacity),
            selected_id: None,
            table: TableState::default(),
            show_detail: false,
            auto_refresh,
            interval,
            loading: true,
            fetched_at: None,
            last_error: None,
            status_msg: None,
            last_visible_rows: 0,
        }
    }

    fn set_status(&mut self, msg: impl Into<String>, ttl: Duration) {
        self.status_msg = Some((msg.into(), Instant::now() + ttl));
    }

    fn clear_expired_status(&mut self) {
        if let Some((_, until)) = &self.status_msg
            && Instant::now() >= *until
        {
            self.status_msg = None;
        }
    }

    fn selected_index(&self) -> Option<usize> {
        self.selected_id.and_then(|id| self.feed.position(id))
    }

    fn selected_record(&self) -> Option<&RequestRecord> {
        self.selected_id.and_then(|id| self.feed.find(id))
    }

    fn select_index(&mut self, index: usize) {
        if self.feed.is_empty() {
            self.selected_id = None;
            self.table.select(None);
            return;
        }
        let index = index.min(self.feed.len() - 1);
        self.selected_id = self.feed.get(index).map(|r| r.id);
        self.table.select(Some(index));
    }

    fn move_selection(&mut self, delta: isize) {
        let current = self.selected_index().unwrap_or(0);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as usize)
        };
        self.select_index(next);
    }

    fn on_poll(&mut self, event: PollEvent<Vec<RequestRecord>>) {
        self.loading = false;
        match event {
            PollEvent::Fetched(batch) => {
                let previous_index = self.table.selected();
                self.feed.apply(&batch);
                self.fetched_at = Some(Instant::now());
                self.last_error = None;

                match self.selected_index() {
                    Some(index) => self.table.select(Some(index)),
                    // The selected row was evicted or nothing was selected yet.
                    None => self.select_index(previous_index.unwrap_or(0)),
                }
            }
            PollEvent::Failed(e) => {
                self.last_error = Some(describe_error(&e));
            }
        }
    }
}

fn describe_error(e: &ApiError) -> String {
    match e {
        ApiError::Unauthorized { .. } => "API key rejected".to_string(),
        other => other.to_string(),
    }
}

fn spawn_event_reader(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if tx.blocking_send(ev).is_err() {
                break;
            }
        }
    });
}

fn handle_key(state: &mut UiState, key: KeyEvent) -> TuiAction {
    if key.kind != KeyEventKind::Press {
        return TuiAction::None;
    }

    if matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
        && key.modifiers.contains(KeyModifiers::CONTROL)
    {
        return TuiAction::Quit;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => TuiAction::Quit,

        KeyCode::Esc => {
            if state.show_detail {
                state.show_detail = false;
                TuiAction::None
            } else {
                TuiAction::Quit
            }
        }

        KeyCode::Char(' ') => TuiAction::ToggleAutoRefresh,

        KeyCode::Char('r') => {
            state.loading = true;
            state.set_status("refreshing", STATUS_TTL);
            TuiAction::RefreshNow
        }

        KeyCode::Enter => {
            state.show_detail = !state.show_detail && state.selected_id.is_some();
            TuiAction::None
        }

        KeyCode::Up | KeyCode::Char('k') => {
            state.move_selection(-1);
            TuiAction::None
        }

        KeyCode::Down | KeyCode::Char('j') => {
            state.move_selection(1);
            TuiAction::None
        }

        KeyCode::PageUp => {
            let step = state.last_visible_rows.max(1) as isize;
            state.move_selection(-step);
            TuiAction::None
        }

        KeyCode::PageDown => {
            let step = state.last_visible_rows.max(1) as isize;
            state.move_selection(step);
            TuiAction::None
        }

        KeyCode::Home | KeyCode::Char('g') => {
            state.select_index(0);
            TuiAction::None
        }

        KeyCode::End | KeyCode::Char('G') => {
            state.select_index(state.feed.len().saturating_sub(1));
            TuiAction::None
        }

        _ => TuiAction::None,
    }
}

fn layout_chunks(area: Rect, show_detail: bool) -> [Rect; 4] {
    let body = if show_detail {
        Constraint::Percentage(60)
    } else {
        Constraint::Min(3)
    };
    let detail = if show_detail {
        Constraint::Min(6)
    } else {
        Constraint::Length(0)
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), body, detail, Constraint::Length(1)])
        .split(area);
    [chunks[0], chunks[1], chunks[2], chunks[3]]
}

fn header_line(state: &UiState, profile_name: &str) -> Line<'static> {
    let t = THEME;
    let refresh = if state.auto_refresh {
        Span::styled(
            format!("auto {}", fmt_duration(state.interval)),
            Style::default().fg(t.success),
        )
    } else {
        Span::styled("paused", Style::default().fg(t.warning))
    };

    let mut spans = vec![
        Span::styled(
            "proxydash",
            Style::default().fg(t.accent).add_modifier(Modifier::BOLD),
        ),
        Span::styled(" · ", Style::default().fg(t.muted)),
        Span::styled(profile_name.to_string(), Style::default().fg(t.fg)),
        Span::styled(" · ", Style::default().fg(t.muted)),
        Span::styled(
            format!("{}/{} requests", state.feed.len(), state.feed.capacity()),
            Style::default().fg(t.fg),
        ),
        Span::styled(" · ", Style::default().fg(t.muted)),
        refresh,
    ];

    if state.loading {
        spans.push(Span::styled(" · loading…", Style::default().fg(t.muted)));
    } else if let Some(at) = state.fetched_at {
        spans.push(Span::styled(
            format!(" · updated {} ago", fmt_duration(at.elapsed())),
            Style::default().fg(t.muted),
        ));
    }

    Line::from(spans)
}

fn footer_line(state: &UiState) -> Line<'static> {
    let t = THEME;
    if let Some(error) = &state.last_error {
        return Line::from(Span::styled(
            format!("refresh failed: {} (showing last data)", error),
            Style::default().fg(t.error),
        ));
    }
    if let Some((msg, _)) = &state.status_msg {
        return Line::from(Span::styled(msg.clone(), Style::default().fg(t.fg)));
    }
    Line::from(Span::styled(
        "space auto-refresh  r refresh  ↑/↓ move  enter details  q quit",
        Style::default().fg(t.muted),
    ))
}

fn state_color(record: &RequestRecord) -> Color {
    if record.is_failed() {
        THEME.error
    } else if record.is_completed() {
        THEME.muted
    } else {
        THEME.success
    }
}

fn request_table(state: &UiState) -> Table<'static> {
    let t = THEME;
    let header = Row::new(["ID", "STATE", "METHOD", "POLICY", "DOWN", "UP", "TARGET"])
        .style(Style::default().fg(t.muted).add_modifier(Modifier::BOLD));

    let rows = state.feed.iter().map(|record| {
        Row::new([
            Cell::from(record.id.to_string()),
            Cell::from(request_state(record)).style(Style::default().fg(state_color(record))),
            Cell::from(record.method().unwrap_or("-").to_string()),
            Cell::from(record.policy_name().unwrap_or("-").to_string()),
            Cell::from(fmt_bytes(record.in_bytes())),
            Cell::from(fmt_bytes(record.out_bytes())),
            Cell::from(request_target(record).to_string()),
        ])
    });

    let widths = [
        Constraint::Length(7),
        Constraint::Length(10),
        Constraint::Length(7),
        Constraint::Length(18),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Min(10),
    ];

    let empty_hint = if state.loading { "" } else { " (no requests yet)" };
    Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(t.muted))
                .title(format!("Recent requests{}", empty_hint)),
        )
        .style(Style::default().fg(t.fg))
        .row_highlight_style(Style::default().bg(t.selection_bg).add_modifier(Modifier::BOLD))
}

fn detail_lines(record: &RequestRecord) -> Vec<Line<'static>> {
    let t = THEME;
    let field = |label: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{:<10}", label), Style::default().fg(t.muted)),
            Span::styled(value, Style::default().fg(t.fg)),
        ])
    };

    let mut lines = vec![
        field("Target", request_target(record).to_string()),
        field("State", request_state(record)),
        field("Method", record.method().unwrap_or("-").to_string()),
        field("Host", record.remote_host().unwrap_or("-").to_string()),
        field("Policy", record.policy_name().unwrap_or("-").to_string()),
        field("Rule", record.rule().unwrap_or("-").to_string()),
        field(
            "Traffic",
            format!(
                "↓ {}  ↑ {}",
                fmt_bytes(record.in_bytes()),
                fmt_bytes(record.out_bytes())
            ),
        ),
        field(
            "Started",
            record
                .start_date()
                .map(fmt_unix_time)
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];

    for note in record.notes() {
        lines.push(Line::from(Span::styled(
            note.to_string(),
            Style::default().fg(t.muted),
        )));
    }
    lines
}

fn draw(f: &mut Frame, state: &mut UiState, profile_name: &str) {
    let [header_area, table_area, detail_area, footer_area] =
        layout_chunks(f.area(), state.show_detail);

    state.last_visible_rows = table_area.height.saturating_sub(TABLE_CHROME_ROWS) as usize;

    f.render_widget(Paragraph::new(header_line(state, profile_name)), header_area);
    let table = request_table(state);
    f.render_stateful_widget(table, table_area, &mut state.table);

    if state.show_detail
        && let Some(record) = state.selected_record()
    {
        let detail = Paragraph::new(detail_lines(record))
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(THEME.muted))
                    .title(format!("Request {}", record.id)),
            );
        f.render_widget(detail, detail_area);
    }

    f.render_widget(Paragraph::new(footer_line(state)), footer_area);
}

fn render(
    terminal: &mut Terminal<CrosstermBackend<&mut Stdout>>,
    state: &mut UiState,
    profile_name: &str,
) -> io::Result<()> {
    terminal.draw(|f| draw(f, state, profile_name))?;
    Ok(())
}

pub async fn run_requests_tui(session: &Session) -> Result<(), Box<dyn std::error::Error>> {
    let interval = session.settings.requests_interval();
    let (poller, mut poll_rx) = Poller::start(
        RecentRequestsSource(session.client.clone()),
        PollSchedule::new(interval, true),
    );

    let mut state = UiState::new(
        session.settings.feed_capacity,
        interval,
        poller.is_auto_refresh(),
    );
    let profile_name = session.profile.name.as_str();

    let result = async {
        let mut guard = TuiGuard::enter()?;
        guard.set_title(&format!("proxydash | {}", profile_name));
        let mut terminal = Terminal::new(guard.backend())?;
        terminal.clear()?;

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);
        spawn_event_reader(event_tx);

        // Keeps the "updated Ns ago" label and status expiry moving.
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        render(&mut terminal, &mut state, profile_name)?;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    state.clear_expired_status();
                }
                event = poll_rx.recv() => {
                    let Some(event) = event else { break };
                    state.on_poll(event);
                }
                Some(ev) = event_rx.recv() => {
                    let action = match ev {
                        Event::Key(key) => handle_key(&mut state, key),
                        _ => TuiAction::None,
                    };

                    match action {
                        TuiAction::None => {}
                        TuiAction::Quit => break,
                        TuiAction::ToggleAutoRefresh => {
                            let wanted = !poller.is_auto_refresh();
                            state.auto_refresh = poller.toggle_auto_refresh();
                            let msg = match (wanted, state.auto_refresh) {
                                (true, true) => "auto refresh on",
                                (true, false) => "auto refresh unavailable (interval is 0)",
                                _ => "auto refresh paused",
                            };
                            state.set_status(msg, STATUS_TTL);
                        }
                        TuiAction::RefreshNow => poller.refresh_now(),
                    }
                }
            }

            render(&mut terminal, &mut state, profile_name)?;
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    }
    .await;

    poller.stop().await;
    result
}
