mod app;
mod clock;
mod config;
mod error;
mod lease;
mod ledger;
mod payout;
mod phase;
mod scheduler;
mod store;
mod ui;
mod watch;

use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use app::App;
use chrono::Utc;
use clap::{Parser, Subcommand};
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event as CEvent, KeyEvent};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::clock::{CycleStore, format_countdown};
use crate::config::Config;
use crate::lease::{FileLease, WriterLease};
use crate::ledger::{PlanKind, load_app_state, update_app_state};
use crate::payout::{PayoutEngine, RandSource};
use crate::scheduler::{CatchUpScheduler, observe};
use crate::store::{APP_STATE_KEY, CYCLE_META_KEY, DurableStore, FileStore};
use crate::ui::draw;
use crate::watch::CheckpointWatcher;

#[derive(Debug, Parser)]
#[command(name = "hashcycle", version, about = "Offline-resilient mining cycle simulator")]
struct Cli {
    /// Directory holding the checkpoint, app state and lease files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Seed for payout randomness
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the dashboard and drive the mining clock (default)
    Run,
    /// Print the projected clock and wallet without taking the clock
    Status,
    /// Credit the available balance
    Deposit { amount: f64 },
    /// Open a plan funded from the available balance
    Invest { kind: PlanKind, amount: f64 },
    Notifications {
        #[command(subcommand)]
        action: NotificationAction,
    },
    /// Delete the checkpoint and all application state
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum NotificationAction {
    Read,
    Clear,
}

#[derive(Debug, Clone)]
enum Event<I> {
    Input(I),
    Focus(bool),
    Tick,
    StoreChanged,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let store = FileStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open data dir {}", config.data_dir.display()))?;
    let command = cli.command.unwrap_or(Command::Run);
    init_logging(&config, matches!(command, Command::Run))?;

    match command {
        Command::Run => run(&config, store),
        Command::Status => status(&store),
        Command::Deposit { amount } => {
            let now = Utc::now();
            let (state, outcome) = update_app_state(&store, |s| s.deposit(amount, now))?;
            outcome?;
            println!("Available: ${:.4}", state.wallet.available);
            Ok(())
        }
        Command::Invest { kind, amount } => {
            let now = Utc::now();
            let (state, outcome) =
                update_app_state(&store, |s| s.open_plan(kind, amount, now).cloned())?;
            let plan = outcome?;
            info!(plan = %plan.id, kind = %plan.kind, principal = plan.principal, "plan opened");
            println!(
                "Opened {} plan {} with ${:.2}. Available: ${:.4}",
                plan.kind, plan.id, plan.principal, state.wallet.available
            );
            Ok(())
        }
        Command::Notifications { action } => {
            update_app_state(&store, |s| match action {
                NotificationAction::Read => s.mark_all_notifications_read(),
                NotificationAction::Clear => s.clear_notifications(),
            })?;
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("reset deletes all progress and balances; pass --yes to confirm");
            }
            let mut lease = FileLease::new(store.root());
            if !lease.try_acquire() {
                bail!("a hashcycle session is driving the clock; quit it before resetting");
            }
            let _lock = store.lock(APP_STATE_KEY)?;
            store.remove(APP_STATE_KEY)?;
            store.remove(CYCLE_META_KEY)?;
            info!(dir = %store.root().display(), "application data reset");
            println!("All hashcycle data removed.");
            Ok(())
        }
    }
}

fn init_logging(config: &Config, to_file: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_file())
            .context("Failed to open log file")?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

fn status(store: &FileStore) -> Result<()> {
    let now = Utc::now();
    let clock = observe(store, now);
    let state = load_app_state(store)?;
    let mut lease = FileLease::new(store.root());
    let writer = if lease.try_acquire() {
        lease.release();
        "none running"
    } else {
        "active"
    };
    let last = store
        .load_checkpoint()
        .map(|m| m.last_observed_at.to_rfc3339())
        .unwrap_or_else(|_| "never".to_string());

    println!("Next payout in {}  (last checkpoint {})", format_countdown(clock.remaining()), last);
    println!("Clock writer: {}", writer);
    println!(
        "Available ${:.4} | Earned ${:.4} | Deposited ${:.2}",
        state.wallet.available, state.wallet.total_earnings, state.wallet.deposited
    );
    for plan in state.active_plans() {
        println!("  {:<9} ${:>10.2}  since {}", plan.kind, plan.principal, plan.started_at);
    }
    println!(
        "{} history entries, {} unread notifications",
        state.mining_history.len(),
        state.unread_count()
    );
    Ok(())
}

fn run(config: &Config, store: FileStore) -> Result<()> {
    let checkpoint = store.path_for(CYCLE_META_KEY);
    let lease = FileLease::new(store.root());
    let scheduler = CatchUpScheduler::new(PayoutEngine::new(RandSource::seeded(config.seed)));
    let mut app = App::new(Box::new(store), Box::new(lease), scheduler, Utc::now());
    app.start(Utc::now());
    info!(role = app.role.label(), "session started");

    let mut terminal = setup_terminal()?;
    let res = run_app(&mut terminal, &mut app, &checkpoint);
    restore_terminal(&mut terminal)?;
    app.shutdown();
    res
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    checkpoint: &Path,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<Event<KeyEvent>>();
    let tick_rate = Duration::from_secs(1);

    let input_tx = tx.clone();
    thread::spawn(move || {
        loop {
            if !event::poll(Duration::from_millis(250)).unwrap_or(false) {
                continue;
            }
            let forwarded = match event::read() {
                Ok(CEvent::Key(key)) => Some(Event::Input(key)),
                Ok(CEvent::FocusGained) => Some(Event::Focus(true)),
                Ok(CEvent::FocusLost) => Some(Event::Focus(false)),
                Ok(_) => None,
                Err(_) => None,
            };
            if let Some(ev) = forwarded {
                if input_tx.send(ev).is_err() {
                    break;
                }
            }
        }
    });

    let _watcher = match CheckpointWatcher::spawn(checkpoint, tx.clone(), Event::StoreChanged) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "checkpoint watch unavailable, observers follow ticks only");
            None
        }
    };

    thread::spawn(move || {
        loop {
            thread::sleep(tick_rate);
            if tx.send(Event::Tick).is_err() {
                break;
            }
        }
    });

    loop {
        terminal.draw(|f| draw(f, app))?;

        match rx.recv()? {
            Event::Input(key) => app.on_key(key),
            Event::Focus(true) => app.on_focus_gained(Utc::now()),
            Event::Focus(false) => app.on_focus_lost(),
            Event::Tick => app.on_tick(Utc::now()),
            Event::StoreChanged => app.on_store_changed(Utc::now()),
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
