//! annote - multi-view video step annotation
//!
//! Terminal UI for capturing and editing step annotations over the
//! synchronized streams of a session folder.

mod app;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use annote_core::persist;
use annote_core::playback::SimulatedBackend;
use annote_core::schedule::MonotonicClock;
use annote_core::{AnnotationSession, Config};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::app::App;

#[derive(Parser)]
#[command(name = "annote")]
#[command(about = "Annotate steps across synchronized video streams")]
#[command(version)]
struct Args {
    /// Annotation data root (overrides `data_root` from the config file)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Session label to open (defaults to the first session under the root)
    #[arg(long)]
    session: Option<String>,

    /// Configuration file (defaults to the XDG location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List sessions under the root and exit
    #[arg(long)]
    list: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let Some(root) = args.root.clone().or_else(|| config.data_root.clone()) else {
        bail!("no data root: pass --root or set data_root in {}", Config::config_path().display());
    };

    if args.list {
        return list_sessions(&root);
    }

    // Initialize logging (to file, not stdout since we have a TUI)
    let log_guard =
        annote_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(root = %root.display(), "annote TUI starting up");

    let label = match args.session {
        Some(label) => label,
        None => persist::list_sessions(&root)
            .context("failed to list sessions")?
            .into_iter()
            .next()
            .map(|s| s.label)
            .with_context(|| format!("no sessions found under {}", root.display()))?,
    };
    let _session_span = annote_core::logging::session_span(&root, &label).entered();

    persist::validate_importable(&root, &label)
        .with_context(|| format!("cannot open session {label}"))?;

    let clock = Arc::new(MonotonicClock::new());
    let backend = SimulatedBackend::new(clock.clone());
    let session = AnnotationSession::open(&root, &label, &config, clock, Box::new(backend))
        .with_context(|| format!("failed to open session {label}"))?;

    let mut app = App::new(session);

    // Setup terminal
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal")?;

    // Run the main loop
    let result = run_app(&mut terminal, &mut app);

    app.close();

    // Restore terminal
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;

    tracing::info!("annote TUI shutting down");

    if result.is_err() {
        eprintln!("Logs are in {}", log_guard.log_dir().display());
    }
    result
}

/// Print the sessions under `root` with their last modification time.
fn list_sessions(root: &std::path::Path) -> Result<()> {
    let sessions = persist::list_sessions(root).context("failed to list sessions")?;
    if sessions.is_empty() {
        println!("No sessions under {}", root.display());
        return Ok(());
    }
    for session in sessions {
        let modified = session.modified_at.with_timezone(&Local);
        println!(
            "{:<32} {}",
            session.label,
            modified.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Run the main application loop.
fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        // Drive playback timers and pick up warnings
        app.tick();

        // Render
        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events
        if event::poll(Duration::from_millis(50))? {
            match event::read()? {
                Event::Key(key) => app.handle_key(key),
                Event::Mouse(mouse) => app.handle_mouse(mouse),
                _ => {}
            }
        }

        // Check if we should quit
        if app.should_quit {
            break;
        }
    }

    Ok(())
}
