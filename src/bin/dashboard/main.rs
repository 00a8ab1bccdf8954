mod app;
mod view;

use std::io;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use tokio::sync::mpsc;

use app::{AppState, FetchOutcome, Screen};
use view::truncate;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const INPUT_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let (mut app, mut outcomes) = AppState::new(base_url);
    app.refresh(&client);

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut table_state = TableState::default();

    let result = run_loop(&mut terminal, &mut app, &mut outcomes, &client, &mut table_state).await;

    app.shutdown();

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    outcomes: &mut mpsc::UnboundedReceiver<FetchOutcome>,
    client: &reqwest::Client,
    table_state: &mut TableState,
) -> io::Result<()> {
    let mut last_tick = Instant::now();

    loop {
        while let Ok(outcome) = outcomes.try_recv() {
            app.apply(outcome);
        }

        terminal.draw(|f| render(f, app, table_state))?;

        if event::poll(INPUT_POLL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            if matches!(app.screen, Screen::Error(_)) {
                                app.reload(client);
                            } else {
                                app.refresh(client);
                            }
                            last_tick = Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.coins.len().saturating_sub(1);
                            let next = table_state.selected().map_or(0, |i| (i + 1).min(max));
                            table_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = table_state.selected().map_or(0, |i| i.saturating_sub(1));
                            table_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        // The error panel waits for an explicit reload.
        if last_tick.elapsed() >= REFRESH_INTERVAL && !matches!(app.screen, Screen::Error(_)) {
            app.refresh(client);
            last_tick = Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &mut AppState, table_state: &mut TableState) {
    let area = f.area();

    if let Screen::Error(message) = &app.screen {
        render_error(f, message, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // coins
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_coins_table(f, app, table_state, chunks[1]);
    render_footer(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match app.screen {
        Screen::Loading => ("◌ loading".to_string(), Color::Yellow),
        _ => ("● live".to_string(), Color::Green),
    };
    let updated = app
        .last_refresh
        .map_or("never".to_string(), |t| format!("{}s ago", t.elapsed().as_secs()));

    let spans = vec![
        Span::styled(
            " CoinScribe  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(format!("{} coins", app.coins.len()), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "server {} in {}",
                app.server_timestamp.as_deref().map_or("—", short_time),
                app.response_time.as_deref().unwrap_or("—")
            ),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(format!("updated {updated}"), Style::default().fg(Color::DarkGray)),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "refresh #{} · rows built {}",
                app.refresher.generation(),
                app.view.computations()
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ];

    let paragraph = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(paragraph, area);
}

/// `HH:MM:SS` part of an RFC 3339 timestamp.
fn short_time(ts: &str) -> &str {
    ts.get(11..19).unwrap_or(ts)
}

fn render_coins_table(f: &mut Frame, app: &mut AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["#", "Symbol", "Name", "Price", "24h", "Volume", "Mkt cap", "AI index"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let lines = app.view.rows(&app.coins);
    let rows: Vec<Row> = lines
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let change_color = match c.rising {
                Some(true) => Color::Green,
                Some(false) => Color::Red,
                None => Color::DarkGray,
            };
            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(c.symbol.as_str()).style(Style::default().add_modifier(Modifier::BOLD)),
                Cell::from(truncate(&c.name, 16)),
                Cell::from(c.price.as_str()),
                Cell::from(c.change.as_str()).style(Style::default().fg(change_color)),
                Cell::from(c.volume.as_str()),
                Cell::from(c.market_cap.as_str()),
                Cell::from(c.index.as_str()).style(Style::default().fg(Color::Cyan)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Length(10),
            Constraint::Min(10),
            Constraint::Length(16),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(9),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " COINS ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_error(f: &mut Frame, message: &str, area: Rect) {
    let text = vec![
        Line::from(Span::styled(
            "Something went wrong",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::raw(""),
        Line::from(Span::styled(message.to_string(), Style::default().fg(Color::White))),
        Line::raw(""),
        Line::from(vec![
            Span::styled("[r] ", Style::default().fg(Color::Yellow)),
            Span::raw("reload  "),
            Span::styled("[q] ", Style::default().fg(Color::Yellow)),
            Span::raw("quit"),
        ]),
    ];
    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(" ERROR "),
        );
    f.render_widget(paragraph, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll  "),
        Span::styled(
            format!("auto-refresh: {}s", REFRESH_INTERVAL.as_secs()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    f.render_widget(Paragraph::new(line).style(Style::default().fg(Color::White)), area);
}
