mod app;
mod ui;

use anyhow::Result;
use app::{App, Screen};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use sysgauge_core::MonitorConfig;

#[derive(Debug, Parser)]
#[command(name = "sysgauge-tui", about = "Live CPU, memory, network and disk monitors")]
struct Args {
    /// JSON config file; missing keys use defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Monitor shown at startup.
    #[arg(short, long, value_enum, default_value = "graph")]
    screen: Screen,

    #[arg(short, long)]
    interface: Option<String>,

    #[arg(long)]
    cpu_threshold: Option<f64>,

    #[arg(long)]
    tick_ms: Option<u64>,

    /// Append alert records (JSON lines) to this file.
    #[arg(long)]
    alert_log: Option<PathBuf>,

    /// Write diagnostics here; without it logging is discarded so the
    /// terminal stays clean.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

impl Args {
    fn load_config(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => MonitorConfig::load(path)?,
            None => MonitorConfig::default(),
        };

        if let Some(interface) = &self.interface {
            config.interface = Some(interface.clone());
        }
        if let Some(limit) = self.cpu_threshold {
            config.cpu_threshold = limit;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_ms = tick_ms;
        }
        if let Some(path) = &self.alert_log {
            config.alert_log = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(args: &Args) -> Result<()> {
    match &args.log_file {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_max_level(args.log_level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_writer(io::sink).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    let config = args.load_config()?;

    // Create app before touching the terminal so config errors print normally
    let mut app = App::new(config, args.screen).await?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run app
    let res = run_app(&mut terminal, &mut app).await;
    app.shutdown().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.poll_updates();
        terminal.draw(|f| ui::draw(f, app))?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.threshold_mode {
            match key.code {
                KeyCode::Char(c) => app.add_threshold_char(c),
                KeyCode::Backspace => app.remove_threshold_char(),
                KeyCode::Enter => app.apply_threshold(),
                KeyCode::Esc => app.toggle_threshold_mode(),
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => return Ok(()),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(());
            }
            KeyCode::Tab => app.next_screen().await?,
            KeyCode::Char('1') => app.set_screen(Screen::Graph).await?,
            KeyCode::Char('2') => app.set_screen(Screen::Network).await?,
            KeyCode::Char('3') => app.set_screen(Screen::Disk).await?,
            KeyCode::Char('4') => app.set_screen(Screen::Sensors).await?,
            KeyCode::Char('i') => app.next_interface().await?,
            KeyCode::Char('t') => app.toggle_threshold_mode(),
            KeyCode::Esc => app.status_message = None,
            _ => {}
        }
    }
}
