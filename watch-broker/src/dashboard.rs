//! Terminal dashboard for the broker

use crate::config::BrokerConfig;
use crate::metrics::{LogLevel, Metrics, RoomInfo, ServerStatus, SharedMetrics};
use crate::network::{self, NetworkEvent};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How far back the activity log is scrolled; 0 follows the newest entry
#[derive(Debug, Default)]
struct LogView {
    offset: usize,
}

impl LogView {
    fn older(&mut self, log_count: usize) {
        self.offset = (self.offset + 1).min(log_count.saturating_sub(1));
    }

    fn newer(&mut self) {
        self.offset = self.offset.saturating_sub(1);
    }

    fn following(&self) -> bool {
        self.offset == 0
    }
}

/// What a key press asks the dashboard to do
#[derive(Debug, PartialEq)]
enum Action {
    Quit,
    Continue,
}

fn handle_key(key: KeyEvent, view: &mut LogView, log_count: usize) -> Action {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Action::Quit,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Action::Quit,
        KeyCode::Up | KeyCode::Char('k') => view.older(log_count),
        KeyCode::Down | KeyCode::Char('j') => view.newer(),
        _ => {}
    }
    Action::Continue
}

/// Run the dashboard until the operator quits
pub async fn run(config: BrokerConfig, metrics: SharedMetrics) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<NetworkEvent>();
    let limits = Limits::from(&config);
    let metrics_for_network = Arc::clone(&metrics);
    tokio::spawn(async move {
        let _ = network::run_with_dashboard(config, metrics_for_network, event_tx).await;
    });

    let mut view = LogView::default();
    let tick_rate = Duration::from_millis(100);

    loop {
        // Jump back to the newest entry so a bind failure is on screen
        while let Ok(event) = event_rx.try_recv() {
            if let NetworkEvent::Failed(_) = event {
                view = LogView::default();
            }
        }

        terminal.draw(|f| draw(f, &metrics, &limits, &view))?;

        if !event::poll(tick_rate)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let log_count = metrics.read().logs.len();
        if handle_key(key, &mut view, log_count) == Action::Quit {
            break;
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Connection limits shown in the server panel
struct Limits {
    client_buffer: usize,
    max_message_size: usize,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl From<&BrokerConfig> for Limits {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            client_buffer: config.client_buffer,
            max_message_size: config.max_message_size,
            ping_interval: config.ping_interval,
            ping_timeout: config.ping_timeout,
        }
    }
}

/// Draw the dashboard
fn draw(f: &mut Frame, metrics: &SharedMetrics, limits: &Limits, view: &LogView) {
    let m = metrics.read();

    // Main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(5),  // Stats
            Constraint::Length(8),  // Rooms
            Constraint::Min(8),     // Logs
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], &m);
    draw_stats(f, chunks[1], &m, limits);
    draw_rooms(f, chunks[2], &m.room_list);
    draw_logs(f, chunks[3], &m, view);
    draw_footer(f, chunks[4]);
}

fn draw_header(f: &mut Frame, area: Rect, m: &Metrics) {
    let status_style = match m.status {
        ServerStatus::Starting => Style::default().fg(Color::Yellow),
        ServerStatus::Running => Style::default().fg(Color::Green),
        ServerStatus::Error => Style::default().fg(Color::Red),
    };

    let status_text = match m.status {
        ServerStatus::Starting => "STARTING",
        ServerStatus::Running => "RUNNING",
        ServerStatus::Error => "ERROR",
    };

    let title = vec![
        Line::from(vec![
            Span::styled("Watch Broker", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  │  Status: "),
            Span::styled(status_text, status_style),
            Span::raw("  │  Uptime: "),
            Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
        ])
    ];

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_stats(f: &mut Frame, area: Rect, m: &Metrics, limits: &Limits) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(33),
            Constraint::Percentage(34),
            Constraint::Percentage(33),
        ])
        .split(area);

    // Server Info
    let listen = m.listen_addr.clone().unwrap_or_else(|| "binding...".to_string());

    let server_info = vec![
        Line::from(vec![
            Span::raw("Listen: "),
            Span::styled(listen, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Limits: "),
            Span::styled(
                format!(
                    "{} msgs, {}, ping {}s/{}s",
                    limits.client_buffer,
                    format_bytes(limits.max_message_size as u64),
                    limits.ping_interval.as_secs(),
                    limits.ping_timeout.as_secs(),
                ),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(vec![
            Span::raw("Issues: "),
            Span::styled(
                format!("{} malformed, {} dropped", m.malformed_frames, m.dropped_messages),
                Style::default().fg(if m.malformed_frames + m.dropped_messages > 0 {
                    Color::Yellow
                } else {
                    Color::DarkGray
                }),
            ),
        ]),
    ];

    let server_block = Paragraph::new(server_info)
        .block(Block::default().borders(Borders::ALL).title(" Server "));
    f.render_widget(server_block, chunks[0]);

    // Connections
    let conn_info = vec![
        Line::from(vec![
            Span::raw("Active: "),
            Span::styled(
                m.active_connections.to_string(),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Total: "),
            Span::styled(m.total_connections.to_string(), Style::default().fg(Color::White)),
        ]),
        Line::from(vec![
            Span::raw("Peak: "),
            Span::styled(m.peak_connections.to_string(), Style::default().fg(Color::Magenta)),
        ]),
    ];

    let conn_block = Paragraph::new(conn_info)
        .block(Block::default().borders(Borders::ALL).title(" Connections "));
    f.render_widget(conn_block, chunks[1]);

    // Room Stats
    let room_info = vec![
        Line::from(vec![
            Span::raw("Rooms: "),
            Span::styled(
                format!("{} / {}", m.active_rooms(), m.total_rooms),
                Style::default().fg(Color::Yellow),
            ),
        ]),
        Line::from(vec![
            Span::raw("Accepted: "),
            Span::styled(m.accepted_proposals.to_string(), Style::default().fg(Color::Green)),
        ]),
        Line::from(vec![
            Span::raw("Advisory: "),
            Span::styled(m.advisory_proposals.to_string(), Style::default().fg(Color::Cyan)),
        ]),
    ];

    let room_block = Paragraph::new(room_info)
        .block(Block::default().borders(Borders::ALL).title(" Proposals "));
    f.render_widget(room_block, chunks[2]);
}

fn draw_rooms(f: &mut Frame, area: Rect, rooms: &[RoomInfo]) {
    let header = Row::new(["Room", "Watchers", "Remote", "Episode", "Position", ""])
        .style(Style::default().fg(Color::DarkGray));

    let rows: Vec<Row> = rooms
        .iter()
        .map(|room| {
            let (state, state_color) = if room.playing {
                ("▶ playing", Color::Green)
            } else {
                ("⏸ paused", Color::Yellow)
            };
            Row::new(vec![
                Cell::from(room.room_id.clone()),
                Cell::from(room.watchers.to_string()),
                Cell::from(
                    room.initiator
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::from(
                    room.episode_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
                Cell::from(format_position(room.position())),
                Cell::from(state).style(Style::default().fg(state_color)),
            ])
        })
        .collect();

    let widths = [
        Constraint::Percentage(30),
        Constraint::Length(9),
        Constraint::Length(22),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(format!(" Rooms ({}) ", rooms.len())));

    f.render_widget(table, area);
}

fn draw_logs(f: &mut Frame, area: Rect, m: &Metrics, view: &LogView) {
    let visible_height = area.height.saturating_sub(2) as usize;

    let items: Vec<ListItem> = m
        .logs
        .iter()
        .rev()
        .skip(view.offset)
        .take(visible_height)
        .map(|entry| {
            let color = match entry.level {
                LogLevel::Info => Color::Blue,
                LogLevel::Warning => Color::Yellow,
                LogLevel::Error => Color::Red,
                LogLevel::Connection => Color::Green,
                LogLevel::Room => Color::Magenta,
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", entry.timestamp.format("%H:%M:%S")),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("{:<5} ", entry.level.as_str()), Style::default().fg(color)),
                Span::raw(&entry.message),
            ]))
        })
        .collect();

    let title = if view.following() {
        " Activity ".to_string()
    } else {
        format!(" Activity (-{}) ", view.offset)
    };
    let logs = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(logs, area);
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" q ", Style::default().fg(Color::Black).bg(Color::Gray)),
        Span::raw(" quit   "),
        Span::styled(" ↑/↓ ", Style::default().fg(Color::Black).bg(Color::Gray)),
        Span::raw(" browse activity"),
    ]));
    f.render_widget(footer, area);
}

fn format_bytes(bytes: u64) -> String {
    match bytes {
        0..=1023 => format!("{} B", bytes),
        1024..=1_048_575 => format!("{} KiB", bytes / 1024),
        _ => format!("{:.1} MiB", bytes as f64 / 1_048_576.0),
    }
}

fn format_position(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let (hours, mins, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
