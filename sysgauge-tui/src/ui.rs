use crate::app::App;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
    Frame,
};

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_tabs(f, app, chunks[0]);
    draw_monitor(f, app, chunks[1]);
    draw_alerts(f, app, chunks[2]);
    draw_footer(f, app, chunks[3]);
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let network = match app.current_interface() {
        Some(interface) => format!("Network: {} (2)", interface),
        None => "Network (2)".to_string(),
    };
    let titles = vec![
        "Graph (1)".to_string(),
        network,
        "Disk I/O (3)".to_string(),
        "Sensors (4)".to_string(),
    ];
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("sysgauge"))
        .select(app.screen.index())
        .style(Style::default().fg(Color::White))
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_monitor(f: &mut Frame, app: &App, area: Rect) {
    let (title, text) = match &app.latest {
        Some(output) => (
            format!("{} - tick {}", output.title, output.seq),
            output.text.clone(),
        ),
        None => ("Waiting for first sample".to_string(), String::new()),
    };

    // Keep the newest graph lines visible when the block is shorter than the text.
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<&str> = text.lines().collect();
    let skip = lines.len().saturating_sub(visible);
    let body: Vec<Line> = lines[skip..]
        .iter()
        .map(|line| {
            if line.starts_with("ALERT") {
                Line::from(Span::styled(line.to_string(), Style::default().fg(Color::Red)))
            } else {
                Line::from(line.to_string())
            }
        })
        .collect();

    let paragraph = Paragraph::new(body).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(paragraph, area);
}

fn draw_alerts(f: &mut Frame, app: &App, area: Rect) {
    let items: Vec<ListItem> = app
        .alerts
        .iter()
        .rev()
        .map(|alert| ListItem::new(Span::styled(alert.clone(), Style::default().fg(Color::Red))))
        .collect();

    let threshold = match app.cpu_threshold() {
        Some(limit) => format!("CPU > {:.1}%", limit),
        None => "CPU alerting off".to_string(),
    };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Alerts ({}) - {}", app.alerts.len(), threshold)),
    );

    f.render_widget(list, area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let (text, style) = if app.threshold_mode {
        (
            format!("New CPU threshold: {}_  (Enter to apply, Esc to cancel)", app.threshold_input),
            Style::default().fg(Color::Yellow),
        )
    } else if let Some(message) = &app.status_message {
        (message.clone(), Style::default().fg(Color::Yellow))
    } else {
        (
            "q: Quit | Tab/1-4: Switch monitor | i: Next interface | t: Set CPU threshold".to_string(),
            Style::default().fg(Color::Gray),
        )
    };

    let footer = Paragraph::new(text)
        .style(style)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}
