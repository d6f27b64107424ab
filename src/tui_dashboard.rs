// File: src/tui_dashboard.rs
// Terminal UI dashboard using ratatui

use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, Wrap},
    Frame, Terminal,
};
use std::{io, time::Duration};
use tokio::sync::watch;
use tracing::warn;

use crate::data_models::{BlockDetail, ChartPoint, MarketSnapshot, PriceSeries};
use crate::sync::{Phase, ResourceStatus, SyncHandle, ViewModel};

/// Application state for TUI
pub struct TuiApp {
    handle: SyncHandle,
    updates: watch::Receiver<ViewModel>,
    pub view: ViewModel,
    pub notice: Option<String>,
    pub should_quit: bool,
}

impl TuiApp {
    pub fn new(handle: SyncHandle) -> Self {
        let updates = handle.subscribe();
        let view = updates.borrow().clone();
        Self {
            handle,
            updates,
            view,
            notice: None,
            should_quit: false,
        }
    }

    /// Pull the latest snapshot if the synchronizer published one
    pub fn sync_view(&mut self) -> bool {
        match self.updates.has_changed() {
            Ok(true) => {
                self.view = self.updates.borrow_and_update().clone();
                true
            }
            Ok(false) => false,
            Err(_) => {
                self.notice = Some("synchronizer closed".to_string());
                false
            }
        }
    }

    fn select(&mut self, hash: &str) {
        if let Err(err) = self.handle.select_block(hash) {
            warn!("Selection rejected: {}", err);
            self.notice = Some(err.to_string());
        }
    }

    /// Handle keyboard input
    pub fn handle_input(&mut self, key: KeyCode) {
        self.notice = None;
        match key {
            KeyCode::Char('q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char('r') => {
                if let Err(err) = self.handle.refresh() {
                    self.notice = Some(err.to_string());
                }
            }
            KeyCode::Left | KeyCode::Up | KeyCode::Char('k')
            | KeyCode::Right | KeyCode::Down | KeyCode::Char('j')
            | KeyCode::Home => {
                if let Some(hash) = selection_target(&self.view, key) {
                    self.select(&hash);
                }
            }
            _ => {}
        }
    }
}

/// Hash a navigation key should select, or None when the selection stays put.
/// The list is newest first, so left walks back in chain order and both ends clamp.
/// A selection that dropped off the list restarts from the newest block.
fn selection_target(view: &ViewModel, key: KeyCode) -> Option<String> {
    let blocks = &view.recent_blocks;
    let last = blocks.len().checked_sub(1)?;
    let step: isize = match key {
        KeyCode::Left | KeyCode::Up | KeyCode::Char('k') => 1,
        KeyCode::Right | KeyCode::Down | KeyCode::Char('j') => -1,
        KeyCode::Home => 0,
        _ => return None,
    };
    let target = match (key, view.selected_index()) {
        (KeyCode::Home, _) | (_, None) => 0,
        (_, Some(index)) => index.saturating_add_signed(step).min(last),
    };
    let hash = &blocks[target].hash;
    (view.selected_hash.as_deref() != Some(hash.as_str())).then(|| hash.clone())
}

/// Run the TUI dashboard until the user quits
pub async fn run_tui_mode(handle: SyncHandle) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = TuiApp::new(handle);
    let result = event_loop(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    println!("👋 Chain Explorer - Dashboard closed");
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp,
) -> Result<()> {
    let input_timeout = Duration::from_millis(100);
    let mut dirty = true;

    loop {
        dirty |= app.sync_view();
        if dirty {
            terminal.draw(|f| ui(f, app))?;
            dirty = false;
        }

        if event::poll(input_timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    app.handle_input(key.code);
                    dirty = true;
                }
                Event::Resize(_, _) => dirty = true,
                _ => {}
            }
        }

        if app.should_quit {
            return Ok(());
        }

        // Let the sync task publish between input polls
        tokio::task::yield_now().await;
    }
}

/// Render the UI
fn ui(f: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Min(12),    // Blocks and detail
            Constraint::Length(13), // Market
            Constraint::Length(3),  // Footer
        ])
        .split(f.area());

    render_header(f, chunks[0], &app.view);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    render_recent_blocks(f, middle[0], &app.view);
    render_block_detail(f, middle[1], &app.view);

    let market = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(45),
            Constraint::Percentage(25),
        ])
        .split(chunks[2]);
    render_market(f, market[0], app.view.market.as_ref(), &app.view.status.market);
    render_price_chart(f, market[1], app.view.price_series.as_ref());
    render_change_chart(f, market[2], app.view.price_series.as_ref());

    render_footer(f, chunks[3], app);
}

/// Render header section
fn render_header(f: &mut Frame, area: Rect, view: &ViewModel) {
    let tip = view
        .recent_blocks
        .first()
        .map(|b| format!("#{}", b.height))
        .unwrap_or_else(|| "-".to_string());
    let price = view
        .market
        .as_ref()
        .map(|m| format!("${:.2}", m.price_usd))
        .unwrap_or_else(|| "-".to_string());

    let header = Paragraph::new(Line::from(vec![
        Span::styled("🔗 ", Style::default().fg(Color::Yellow)),
        Span::styled("Chain Explorer", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
        Span::styled("  tip ", Style::default().fg(Color::Gray)),
        Span::styled(tip, Style::default().fg(Color::White)),
        Span::styled("  price ", Style::default().fg(Color::Gray)),
        Span::styled(price, Style::default().fg(Color::White)),
        Span::styled(format!("  rev {}", view.revision), Style::default().fg(Color::DarkGray)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Blockchain Explorer"));

    f.render_widget(header, area);
}

fn short_hash(hash: &str) -> String {
    match hash.char_indices().nth(16) {
        Some((cut, _)) => format!("{}...", &hash[..cut]),
        None => hash.to_string(),
    }
}

/// Render recent blocks, highlighting the selection
fn render_recent_blocks(f: &mut Frame, area: Rect, view: &ViewModel) {
    let header_cells = ["Height", "Hash", "Time"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let selected = view.selected_index();
    let rows = view.recent_blocks.iter().enumerate().map(|(i, block)| {
        let row = Row::new(vec![
            Cell::from(block.height.to_string()),
            Cell::from(short_hash(&block.hash)),
            Cell::from(block.time.format("%H:%M:%S").to_string()),
        ]);
        if Some(i) == selected {
            row.style(Style::default().fg(Color::Black).bg(Color::Cyan))
        } else {
            row
        }
    });

    let widths = [Constraint::Length(10), Constraint::Length(20), Constraint::Length(10)];
    let title = format!("📊 Recent Blocks {}", status_marker(&view.status.recent_blocks));
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(table, area);
}

fn detail_lines(detail: &BlockDetail) -> Vec<Line<'static>> {
    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::Gray));
    let mut lines = vec![
        Line::from(vec![label("Height:    "), Span::raw(detail.summary.height.to_string())]),
        Line::from(vec![label("Hash:      "), Span::raw(detail.summary.hash.clone())]),
        Line::from(vec![label("Previous:  "), Span::raw(detail.previous_hash.clone())]),
        Line::from(vec![
            label("Time:      "),
            Span::raw(detail.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        ]),
        Line::from(vec![label("Peers:     "), Span::raw(detail.peer_count.to_string())]),
        Line::from(vec![
            label("Fees:      "),
            Span::styled(format!("high {} ", detail.fee_tiers.high), Style::default().fg(Color::Red)),
            Span::styled(format!("med {} ", detail.fee_tiers.medium), Style::default().fg(Color::Yellow)),
            Span::styled(format!("low {}", detail.fee_tiers.low), Style::default().fg(Color::Green)),
        ]),
    ];
    if let Some(price) = detail.price {
        lines.push(Line::from(vec![label("Price:     "), Span::raw(format!("${price:.2}"))]));
    }
    if let Some(count) = detail.unconfirmed_count {
        lines.push(Line::from(vec![label("Mempool:   "), Span::raw(format!("{count} unconfirmed"))]));
    }
    if let Some(volume) = detail.volume_24h {
        lines.push(Line::from(vec![label("24h Vol:   "), Span::raw(compact_usd(volume))]));
    }
    lines
}

fn render_block_detail(f: &mut Frame, area: Rect, view: &ViewModel) {
    let status = &view.status.selected_detail;
    let mut lines = match (&view.selected_detail, &view.selected_hash) {
        (Some(detail), _) => detail_lines(detail),
        (None, Some(hash)) if status.loading => vec![Line::from(format!("Loading {}...", short_hash(hash)))],
        (None, Some(hash)) => vec![Line::from(format!("No detail for {}", short_hash(hash)))],
        (None, None) => vec![Line::from("Waiting for blocks...")],
    };
    if let Some(err) = &status.last_error {
        lines.push(Line::from(Span::styled(
            format!("⚠ {}: {}", err.kind.label(), err.message),
            Style::default().fg(Color::Red),
        )));
    }

    let title = format!("🧱 Block Detail {}", status_marker(status));
    let panel = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(panel, area);
}

fn compact_usd(value: f64) -> String {
    match value.abs() {
        v if v >= 1e12 => format!("${:.2}T", value / 1e12),
        v if v >= 1e9 => format!("${:.2}B", value / 1e9),
        v if v >= 1e6 => format!("${:.2}M", value / 1e6),
        _ => format!("${value:.2}"),
    }
}

fn change_style(pct: f64) -> Style {
    if pct >= 0.0 {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Red)
    }
}

fn render_market(f: &mut Frame, area: Rect, market: Option<&MarketSnapshot>, status: &ResourceStatus) {
    let title = format!("💰 Market {}", status_marker(status));
    let lines = match market {
        Some(m) => vec![
            Line::from(format!("Price:      ${:.2}", m.price_usd)),
            Line::from(format!("Market cap: {}", compact_usd(m.market_cap_usd))),
            Line::from(format!("Volume 24h: {}", compact_usd(m.volume_24h_usd))),
            Line::from(vec![
                Span::raw("24h:        "),
                Span::styled(format!("{:+.2}%", m.price_change_24h_pct), change_style(m.price_change_24h_pct)),
            ]),
            Line::from(vec![
                Span::raw("7d:         "),
                Span::styled(format!("{:+.2}%", m.price_change_7d_pct), change_style(m.price_change_7d_pct)),
            ]),
            Line::from(format!("Supply:     {:.0}", m.circulating_supply)),
            Line::from(format!("Dominance:  {:.1}%", m.dominance_pct)),
            Line::from(format!("ATH:        ${:.2}", m.ath_usd)),
        ],
        None => vec![Line::from("No market data yet")],
    };
    let panel = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(panel, area);
}

fn as_tuples(points: &[ChartPoint]) -> Vec<(f64, f64)> {
    points.iter().map(|p| (p.x, p.y)).collect()
}

fn x_bounds(points: &[(f64, f64)]) -> [f64; 2] {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if last.0 > first.0 => [first.0, last.0],
        (Some(first), _) => [first.0, first.0 + 1.0],
        _ => [0.0, 1.0],
    }
}

fn y_bounds(points: &[(f64, f64)]) -> [f64; 2] {
    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    if !lo.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.05).max(0.01);
    [lo - pad, hi + pad]
}

fn render_series_chart(f: &mut Frame, area: Rect, title: String, data: &[(f64, f64)], color: Color, unit: &str) {
    let y = y_bounds(data);
    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data);

    let chart = Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(Axis::default().style(Style::default().fg(Color::Gray)).bounds(x_bounds(data)))
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds(y)
                .labels(vec![
                    Span::raw(format!("{:.0}{unit}", y[0])),
                    Span::raw(format!("{:.0}{unit}", y[1])),
                ]),
        );
    f.render_widget(chart, area);
}

fn render_price_chart(f: &mut Frame, area: Rect, series: Option<&PriceSeries>) {
    let data = series.map(|s| as_tuples(&s.chart_points())).unwrap_or_default();
    let days = series.map(|s| s.window.days).unwrap_or_default();
    render_series_chart(f, area, format!("📈 Price ({days}d)"), &data, Color::Cyan, "");
}

fn render_change_chart(f: &mut Frame, area: Rect, series: Option<&PriceSeries>) {
    let data = series.map(|s| as_tuples(&s.change_points())).unwrap_or_default();
    render_series_chart(f, area, "Δ % per sample".to_string(), &data, Color::Magenta, "%");
}

/// Single-glyph indicator for a resource's fetch state
fn status_marker(status: &ResourceStatus) -> &'static str {
    match (status.loading, status.phase) {
        (true, _) => "⟳",
        (false, Phase::Ready) => "●",
        (false, Phase::Failed) => "⚠",
        (false, _) => "○",
    }
}

/// Render footer
fn render_footer(f: &mut Frame, area: Rect, app: &TuiApp) {
    let status = &app.view.status;
    let mut spans = vec![Span::styled(
        "←/→ select  Home newest  r refresh  q quit",
        Style::default().fg(Color::Gray),
    )];
    for (name, s) in [
        ("blocks", &status.recent_blocks),
        ("detail", &status.selected_detail),
        ("market", &status.market),
        ("chart", &status.price_series),
    ] {
        let color = if s.is_stale() { Color::Red } else { Color::DarkGray };
        spans.push(Span::styled(format!("  {name} {}", status_marker(s)), Style::default().fg(color)));
    }
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(format!("  {notice}"), Style::default().fg(Color::Yellow)));
    }

    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::BlockSummary;
    use crate::demo::{DemoChain, DemoMarket};
    use crate::sync::{SyncSettings, Synchronizer};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn listed(hashes: &[&str], selected: Option<&str>) -> ViewModel {
        let recent_blocks = hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| BlockSummary {
                id: i as i64,
                height: 100 - i as u64,
                hash: hash.to_string(),
                time: Utc.timestamp_opt(1_700_000_000 - i as i64 * 600, 0).unwrap(),
            })
            .collect();
        ViewModel {
            recent_blocks,
            selected_hash: selected.map(str::to_string),
            ..ViewModel::default()
        }
    }

    #[test]
    fn test_arrows_walk_newest_first_list_and_clamp() {
        let view = listed(&["a", "b", "c"], Some("b"));
        assert_eq!(selection_target(&view, KeyCode::Left).as_deref(), Some("c"));
        assert_eq!(selection_target(&view, KeyCode::Right).as_deref(), Some("a"));

        let oldest = listed(&["a", "b", "c"], Some("c"));
        assert_eq!(selection_target(&oldest, KeyCode::Left), None);
        let newest = listed(&["a", "b", "c"], Some("a"));
        assert_eq!(selection_target(&newest, KeyCode::Right), None);
    }

    #[test]
    fn test_home_and_dropped_selection_go_to_newest() {
        let view = listed(&["a", "b", "c"], Some("c"));
        assert_eq!(selection_target(&view, KeyCode::Home).as_deref(), Some("a"));

        let dropped = listed(&["a", "b", "c"], Some("gone"));
        assert_eq!(selection_target(&dropped, KeyCode::Left).as_deref(), Some("a"));
        assert_eq!(selection_target(&dropped, KeyCode::Right).as_deref(), Some("a"));

        assert_eq!(selection_target(&listed(&[], Some("x")), KeyCode::Home), None);
        assert_eq!(selection_target(&view, KeyCode::Char('x')), None);
    }

    #[tokio::test]
    async fn test_navigation_key_reaches_synchronizer() {
        let mut sync = Synchronizer::new(
            Arc::new(DemoChain::new()),
            Arc::new(DemoMarket::new()),
            SyncSettings::default(),
        );
        let mut updates = sync.subscribe();
        let mut app = TuiApp::new(sync.handle());
        app.view = listed(&["n1", "n2", "n3"], Some("n2"));

        app.handle_input(KeyCode::Left);
        sync.start(Duration::from_secs(3600));
        let view = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|v| v.selected_hash.as_deref() == Some("n3")),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(view.selected_hash.as_deref(), Some("n3"));
        assert!(app.notice.is_none());

        app.handle_input(KeyCode::Char('q'));
        assert!(app.should_quit);
        sync.stop().await;
    }

    #[test]
    fn test_short_hash_cuts_on_char_boundary() {
        let hash = format!("{}é{}", "a".repeat(15), "b".repeat(10));
        assert_eq!(short_hash(&hash), format!("{}é...", "a".repeat(15)));
        assert_eq!(short_hash("ééé"), "ééé");
    }

    #[test]
    fn test_chart_bounds_cover_data_with_padding() {
        let data = [(10.0, 5.0), (20.0, 15.0)];
        assert_eq!(x_bounds(&data), [10.0, 20.0]);
        let [lo, hi] = y_bounds(&data);
        assert!(lo < 5.0 && hi > 15.0);
        assert_eq!(y_bounds(&[]), [0.0, 1.0]);
        assert_eq!(x_bounds(&[(3.0, 1.0)]), [3.0, 4.0]);
    }

    #[test]
    fn test_compact_usd_scales() {
        assert_eq!(compact_usd(1.25e12), "$1.25T");
        assert_eq!(compact_usd(3.1e10), "$31.00B");
        assert_eq!(compact_usd(12.5), "$12.50");
    }

    #[test]
    fn test_status_marker_prefers_loading() {
        let mut status = ResourceStatus::idle();
        assert_eq!(status_marker(&status), "○");
        status.phase = Phase::Failed;
        assert_eq!(status_marker(&status), "⚠");
        status.loading = true;
        assert_eq!(status_marker(&status), "⟳");
    }
}
