//! relaytop
//!
//! Terminal dashboard for a running cliprelay daemon: clips in flight, recent
//! progress events, system load, and what has been sent.
//! Polls the daemon metrics endpoint at http://127.0.0.1:7879/metrics

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, Gauge, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    io::{self, Stdout},
    time::{Duration, Instant},
};

const METRICS_URL: &str = "http://127.0.0.1:7879/metrics";
const POLL_INTERVAL_MS: u64 = 500;
const MAX_SENT_POINTS: usize = 120;
const MAX_NOTICES: usize = 20;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ============================================================================
// Data Models (mirroring daemon metrics types)
// ============================================================================

/// Per-job metrics tracking relay progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub file_name: String,
    pub stage: String,
    pub progress: f64,
    pub message: String,
    pub size_in_bytes_before: u64,
    pub size_in_bytes_after: u64,
    pub error: Option<String>,
}

/// A single progress notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: String,
    pub progress: f64,
    pub message: String,
    pub is_complete: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A progress event attributed to a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub job_id: String,
    pub timestamp_unix_ms: i64,
    pub event: ProgressEvent,
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Persistent clip counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayStats {
    pub total_clips: u64,
    pub session_clips: u64,
    pub total_size_bytes: u64,
    pub last_clip_time_ms: Option<i64>,
    pub start_time_ms: i64,
    pub last_update_time_ms: i64,
}

/// Complete metrics snapshot served by the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelaySnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub recent_events: VecDeque<ProgressRecord>,
    pub system: SystemMetrics,
    pub queue_len: usize,
    pub running_jobs: usize,
    pub sent_clips: u64,
    pub failed_jobs: u64,
    pub total_bytes_sent: u64,
    pub stats: RelayStats,
}

// ============================================================================
// App State
// ============================================================================

/// Main application state for the dashboard
pub struct App {
    /// Current metrics snapshot from daemon
    pub metrics: Option<RelaySnapshot>,
    /// Connection notices, newest last
    pub notices: VecDeque<String>,
    /// Sent history for chart (elapsed_secs, mb_sent)
    pub sent_history: VecDeque<(f64, f64)>,
    /// Connection status
    pub connected: bool,
    /// HTTP client for metrics fetching
    client: reqwest::Client,
    /// Start time for chart x-axis
    start_time: Instant,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Create a new App instance
    pub fn new() -> Self {
        Self {
            metrics: None,
            notices: VecDeque::with_capacity(MAX_NOTICES),
            sent_history: VecDeque::with_capacity(MAX_SENT_POINTS),
            connected: false,
            client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }

    /// Add a connection notice
    pub fn notice(&mut self, notice: String) {
        if self.notices.len() >= MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    /// Fetch metrics from the daemon HTTP endpoint
    pub async fn fetch_metrics(&mut self) {
        match self.client.get(METRICS_URL).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    match response.json::<RelaySnapshot>().await {
                        Ok(snapshot) => {
                            if !self.connected {
                                self.notice("Connected to daemon".to_string());
                            }
                            self.apply_snapshot(snapshot);
                        }
                        Err(e) => {
                            self.notice(format!("JSON parse error: {}", e));
                            self.connected = false;
                        }
                    }
                } else {
                    self.notice(format!("HTTP error: {}", response.status()));
                    self.connected = false;
                }
            }
            Err(e) => {
                if self.connected {
                    self.notice(format!("Connection lost: {}", e));
                }
                self.connected = false;
            }
        }
    }

    /// Take a fresh snapshot and extend the chart
    pub fn apply_snapshot(&mut self, snapshot: RelaySnapshot) {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        self.record_sent(elapsed_secs, snapshot.total_bytes_sent);
        self.metrics = Some(snapshot);
        self.connected = true;
    }

    fn record_sent(&mut self, elapsed_secs: f64, total_bytes_sent: u64) {
        if self.sent_history.len() >= MAX_SENT_POINTS {
            self.sent_history.pop_front();
        }
        self.sent_history
            .push_back((elapsed_secs, total_bytes_sent as f64 / BYTES_PER_MB));
    }

    /// Event log lines, newest first
    pub fn event_lines(&self) -> Vec<String> {
        let Some(metrics) = &self.metrics else {
            return self.notices.iter().rev().cloned().collect();
        };
        metrics
            .recent_events
            .iter()
            .rev()
            .map(|record| format_event(record, metrics))
            .collect()
    }
}

/// Human label for a job: its file name if still listed, else a short id
fn job_label(job_id: &str, snapshot: &RelaySnapshot) -> String {
    snapshot
        .jobs
        .iter()
        .find(|job| job.id == job_id)
        .map(|job| job.file_name.clone())
        .unwrap_or_else(|| job_id.chars().take(8).collect())
}

/// One event log line: `<age> <file> [<stage>] <message>`, with any error appended
fn format_event(record: &ProgressRecord, snapshot: &RelaySnapshot) -> String {
    let age_secs = ((snapshot.timestamp_unix_ms - record.timestamp_unix_ms).max(0) / 1000) as f32;
    let mut line = format!(
        "{:>7} {} [{}] {}",
        format_duration(age_secs),
        job_label(&record.job_id, snapshot),
        record.event.stage,
        record.event.message
    );
    if let Some(error) = &record.event.error {
        line.push_str(&format!(" ({})", error));
    }
    line
}

// ============================================================================
// Terminal Setup/Teardown
// ============================================================================

/// Initialize the terminal for TUI rendering
fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore terminal to normal state
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    Ok(())
}

// ============================================================================
// Widget Rendering
// ============================================================================

/// Render the jobs table
fn render_jobs_table(f: &mut Frame, area: Rect, app: &App) {
    let header_cells = ["File", "Stage", "Progress", "Size", "Message"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let rows: Vec<Row> = match &app.metrics {
        Some(metrics) => metrics
            .jobs
            .iter()
            .map(|job| {
                let style = match job.stage.as_str() {
                    "failed" => Style::default().fg(Color::Red),
                    "completed" => Style::default().fg(Color::Green),
                    _ => Style::default(),
                };
                let message = job.error.clone().unwrap_or_else(|| job.message.clone());
                Row::new(vec![
                    Cell::from(job.file_name.clone()),
                    Cell::from(job.stage.clone()),
                    Cell::from(format!("{:.0}%", job.progress * 100.0)),
                    Cell::from(format_size(job.size_in_bytes_before, job.size_in_bytes_after)),
                    Cell::from(message),
                ])
                .style(style)
            })
            .collect(),
        None => vec![],
    };

    let widths = [
        Constraint::Percentage(25),
        Constraint::Length(12),
        Constraint::Length(9),
        Constraint::Length(18),
        Constraint::Min(10),
    ];

    let title = if app.connected { " Clips " } else { " Clips (Disconnected) " };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

/// `60.0 MB` before anything is sent, `60.0 → 9.8 MB` after
fn format_size(before: u64, after: u64) -> String {
    let before_mb = before as f64 / BYTES_PER_MB;
    if after == 0 {
        format!("{:.1} MB", before_mb)
    } else {
        format!("{:.1} → {:.1} MB", before_mb, after as f64 / BYTES_PER_MB)
    }
}

/// Render CPU and memory usage gauges
fn render_system_gauges(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let (cpu_percent, mem_percent) = match &app.metrics {
        Some(metrics) => (
            metrics.system.cpu_usage_percent as f64 / 100.0,
            metrics.system.mem_usage_percent as f64 / 100.0,
        ),
        None => (0.0, 0.0),
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" CPU "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(cpu_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", cpu_percent * 100.0));

    let mem_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Memory "))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(mem_percent.clamp(0.0, 1.0))
        .label(format!("{:.1}%", mem_percent * 100.0));

    f.render_widget(cpu_gauge, chunks[0]);
    f.render_widget(mem_gauge, chunks[1]);
}

/// Render load averages table
fn render_load_averages(f: &mut Frame, area: Rect, app: &App) {
    let system = app.metrics.as_ref().map(|m| m.system.clone()).unwrap_or_default();

    let rows = vec![
        Row::new(vec![Cell::from("1 min"), Cell::from(format!("{:.2}", system.load_avg_1))]),
        Row::new(vec![Cell::from("5 min"), Cell::from(format!("{:.2}", system.load_avg_5))]),
        Row::new(vec![Cell::from("15 min"), Cell::from(format!("{:.2}", system.load_avg_15))]),
    ];

    let widths = [Constraint::Length(8), Constraint::Length(10)];

    let table = Table::new(rows, widths).block(Block::default().borders(Borders::ALL).title(" Load Avg "));

    f.render_widget(table, area);
}

/// Render chart of MB sent this session over time
fn render_sent_chart(f: &mut Frame, area: Rect, app: &App) {
    let data: Vec<(f64, f64)> = app.sent_history.iter().cloned().collect();

    if data.is_empty() {
        let block = Block::default().borders(Borders::ALL).title(" Sent (MB) ");
        f.render_widget(block, area);
        return;
    }

    let min_x = data.first().map(|(x, _)| *x).unwrap_or(0.0);
    let max_x = data.last().map(|(x, _)| *x).unwrap_or(60.0).max(min_x + 1.0);
    let max_y = data.iter().map(|(_, y)| *y).fold(0.0f64, f64::max).max(1.0);

    let datasets = vec![Dataset::default()
        .name("MB sent")
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(Color::Green))
        .data(&data)];

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(" Sent (MB) "))
        .x_axis(
            Axis::default()
                .title("Time (s)")
                .style(Style::default().fg(Color::Gray))
                .bounds([min_x, max_x])
                .labels(vec![
                    Span::raw(format!("{:.0}", min_x)),
                    Span::raw(format!("{:.0}", max_x)),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("MB")
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, max_y])
                .labels(vec![
                    Span::raw("0"),
                    Span::raw(format!("{:.0}", max_y / 2.0)),
                    Span::raw(format!("{:.0}", max_y)),
                ]),
        );

    f.render_widget(chart, area);
}

/// Render the progress event log
fn render_event_log(f: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let events: Vec<Line> = app
        .event_lines()
        .into_iter()
        .take(visible)
        .map(Line::from)
        .collect();

    let paragraph = Paragraph::new(events)
        .block(Block::default().borders(Borders::ALL).title(" Events "))
        .wrap(Wrap { trim: true });

    f.render_widget(paragraph, area);
}

/// Status bar text with clip stats
fn status_text(app: &App) -> String {
    match &app.metrics {
        Some(metrics) if app.connected => format!(
            " Queue: {} | Running: {} | Sent: {} this session, {} total | Failed: {} | {:.1} MB sent | Press 'q' to quit ",
            metrics.queue_len,
            metrics.running_jobs,
            metrics.stats.session_clips,
            metrics.stats.total_clips,
            metrics.failed_jobs,
            metrics.total_bytes_sent as f64 / BYTES_PER_MB
        ),
        Some(_) => " Disconnected, showing last snapshot | Press 'q' to quit ".to_string(),
        None => " Connecting to daemon... | Press 'q' to quit ".to_string(),
    }
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let paragraph = Paragraph::new(status_text(app)).style(Style::default().fg(Color::White).bg(Color::DarkGray));
    f.render_widget(paragraph, area);
}

/// Format duration in seconds to human-readable string
fn format_duration(secs: f32) -> String {
    let total_secs = secs as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

// ============================================================================
// Main UI Layout
// ============================================================================

/// Render the complete UI layout
fn ui(f: &mut Frame, app: &App) {
    let size = f.area();

    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(size);

    let content_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_chunks[0]);

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(content_chunks[0]);

    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6), // CPU + Memory gauges
            Constraint::Length(5), // Load averages
            Constraint::Min(0),    // Sent chart
        ])
        .split(content_chunks[1]);

    render_jobs_table(f, left_chunks[0], app);
    render_event_log(f, left_chunks[1], app);
    render_system_gauges(f, right_chunks[0], app);
    render_load_averages(f, right_chunks[1], app);
    render_sent_chart(f, right_chunks[2], app);
    render_status_bar(f, main_chunks[1], app);
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> io::Result<()> {
    let mut terminal = setup_terminal()?;

    let mut app = App::new();
    app.notice("relaytop started".to_string());

    let result = run_app(&mut terminal, &mut app).await;

    restore_terminal(&mut terminal)?;

    result
}

/// Main application loop
async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    let poll_interval = Duration::from_millis(POLL_INTERVAL_MS);
    let mut last_fetch: Option<Instant> = None;

    loop {
        if last_fetch.map_or(true, |t| t.elapsed() >= poll_interval) {
            app.fetch_metrics().await;
            last_fetch = Some(Instant::now());
        }

        terminal.draw(|f| ui(f, app))?;

        // Short timeout keeps redraws frequent
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }
}
