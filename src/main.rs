use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing_subscriber::EnvFilter;

mod app;
mod chat;
mod client;
mod config;
mod format;
mod handler;
mod session;
mod stream;
mod tui;
mod ui;

use app::App;
use config::Config;
use format::RenderBackends;
use session::NetEvent;
use tui::{EventHandler, Tui};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8082";

#[derive(Parser)]
#[command(name = "kubechat")]
#[command(about = "Terminal chat client for kubectl-ai web backends", version)]
struct Cli {
    /// Backend server URL (overrides the configured one)
    #[arg(short, long)]
    server: Option<String>,

    /// Write logs to this file; the terminal owns stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&PathBuf>) -> Result<()> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = std::fs::File::create(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(file)
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    let config = Config::load().unwrap_or_default();
    let server = cli
        .server
        .or_else(|| config.server_url.clone())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    let backends = Arc::new(RenderBackends::new());
    format::spawn_loader(backends.clone());
    format::spawn_capability_watch(backends.clone());

    let (net_tx, mut net_rx) = mpsc::unbounded_channel();
    let mut app = App::new(&server, &config, backends, net_tx);
    app.refresh_contexts();
    app.refresh_commands();

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let result = run(&mut terminal, &mut app, &mut events, &mut net_rx).await;

    tui::restore()?;
    result
}

async fn run(
    terminal: &mut Tui,
    app: &mut App,
    events: &mut EventHandler,
    net_rx: &mut UnboundedReceiver<NetEvent>,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        tokio::select! {
            Some(event) = events.next() => handler::handle_event(app, event)?,
            Some(event) = net_rx.recv() => app.on_net_event(event),
        }
    }
    Ok(())
}
