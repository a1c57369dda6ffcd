use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cabinet_watch::config::{Config, SinkKind};
use cabinet_watch::session::{
    EventSink, FileBoundaryStore, HttpDetectorFactory, HttpSink, JsonLinesSink, LogSink, SessionCommand,
    SessionContext, SessionManager, SinkDispatcher,
};

/// Receives camera streams from cabinet devices and reports items crossing each cabinet's boundary
#[derive(Debug, Parser)]
#[command(name = "cabinet-server", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn build_sink(config: &Config) -> Result<Arc<dyn EventSink>> {
    let sink = &config.sink;
    let timeout = Duration::from_millis(sink.timeout_ms);
    let built: Arc<dyn EventSink> = match sink.kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Jsonl => {
            let path = sink.path.as_deref().context("sink.path is required for the jsonl sink")?;
            Arc::new(JsonLinesSink::open(path).with_context(|| format!("failed to open {}", path.display()))?)
        }
        SinkKind::Http => {
            let url = sink.url.clone().context("sink.url is required for the http sink")?;
            Arc::new(HttpSink::new(url, timeout))
        }
    };
    tracing::info!(kind = ?sink.kind, "event sink ready");
    Ok(built)
}

// Console commands, one per line. Runs on its own thread so a pending read never holds up exit.
fn read_console(commands: mpsc::Sender<SessionCommand>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read console");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<SessionCommand>() {
            Ok(command) => {
                if commands.blocking_send(command).is_err() {
                    return;
                }
            }
            Err(err) => tracing::warn!(%line, error = %err, "ignoring console command"),
        }
    }
    tracing::debug!("console closed");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    tracing::debug!(?config, "loaded configuration");

    let boundaries = FileBoundaryStore::open(&config.boundaries.path)
        .with_context(|| format!("failed to open boundaries at {}", config.boundaries.path.display()))?;
    if config.detection.endpoint.is_none() {
        tracing::warn!("no detection endpoint configured, no objects will be detected");
    }
    let detectors = HttpDetectorFactory {
        endpoint: config.detection.endpoint.clone(),
        timeout: Duration::from_millis(config.detection.timeout_ms),
    };
    let (dispatcher, sink_thread) =
        SinkDispatcher::spawn(build_sink(&config)?, config.sink.queue_capacity).context("failed to start event sink")?;

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    let (commands_tx, commands_rx) = mpsc::channel(16);
    let console = commands_tx.clone();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || read_console(console))
        .context("failed to start console reader")?;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted");
            let _ = commands_tx.send(SessionCommand::Shutdown).await;
        }
    });

    let manager = SessionManager::new(SessionContext {
        config,
        boundaries: Arc::new(boundaries),
        detectors: Arc::new(detectors),
        dispatcher,
    });
    manager.run(listener, commands_rx).await;

    // The manager held the last dispatcher; the sink thread drains and exits
    tokio::task::spawn_blocking(move || sink_thread.join())
        .await
        .context("failed to wait for event sink")?
        .map_err(|_| anyhow::anyhow!("event sink thread panicked"))?;
    Ok(())
}
