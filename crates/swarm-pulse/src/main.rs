mod app;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use swarm_session::{
    event_channel, HttpTriggerBackend, MonitorConfig, SessionController, WsSnapshotSource,
};
use tracing::{error, info};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const REDRAW_INTERVAL_MS: u64 = 250;

#[derive(Parser, Debug)]
#[command(name = "swarm-pulse")]
struct Args {
    #[arg(long, default_value = "")]
    backend_url: String,
    #[arg(long, default_value = "")]
    ws_url: String,
    #[arg(long, default_value_t = swarm_session::config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout_enabled: bool,
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = MonitorConfig::resolve(&args.backend_url, &args.ws_url)
        .context("invalid backend configuration")?
        .with_request_timeout(Duration::from_secs(args.request_timeout));
    let log_dir = resolve_log_dir(&args.log_dir);
    let _log_guard = init_logging(&log_dir);
    info!(
        event = "monitor_start",
        backend = %config.backend_url,
        push = %config.push_url,
        timeout_secs = config.request_timeout.as_secs()
    );

    let backend = HttpTriggerBackend::new(&config).context("failed to build http client")?;
    let source = WsSnapshotSource::new(config.push_url.clone());
    let (events_tx, mut events_rx) = event_channel();
    let session = SessionController::new(backend, source, events_tx);
    let mut app = app::App::new(session, config.backend_url.as_str());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = run(&mut terminal, &mut app, &mut events_rx).await;
    app.teardown();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = &result {
        error!(event = "monitor_error", error = %err);
    }
    info!(event = "monitor_exit");
    result
}

async fn run<B, S>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut app::App<B, S>,
    events_rx: &mut tokio::sync::mpsc::Receiver<swarm_session::TransportEvent>,
) -> Result<()>
where
    B: swarm_session::TriggerBackend,
    S: swarm_session::SnapshotSource,
{
    let mut input = EventStream::new();
    let mut redraw = tokio::time::interval(Duration::from_millis(REDRAW_INTERVAL_MS));

    loop {
        let screen = app.screen();
        terminal.draw(|frame| ui::render(frame, &screen))?;

        tokio::select! {
            _ = redraw.tick() => {}
            Some(event) = events_rx.recv() => {
                app.apply_transport_event(event);
            }
            maybe_event = input.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if let Some(action) = app::action_for_key(key) {
                            app.perform(action).await;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(err.into()),
                    None => break,
                }
            }
        }

        if app.should_quit() {
            break;
        }
    }
    Ok(())
}

fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = env::var("SWARM_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    ".swarm/logs".to_string()
}

fn resolve_log_stdout() -> bool {
    matches!(
        env::var("SWARM_LOG_STDOUT").ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    )
}

fn init_logging(log_dir: &str) -> Option<LogGuard> {
    let level = env::var("SWARM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let stdout_enabled = resolve_log_stdout();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone(), stdout_enabled));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("swarm-pulse-{stamp}-{}.log", std::process::id()));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}

impl MultiWriter {
    fn new(file: Option<Arc<StdMutex<std::fs::File>>>, stdout_enabled: bool) -> Self {
        Self {
            stdout_enabled,
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout_enabled {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout_enabled {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}
