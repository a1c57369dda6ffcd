use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cabinet_watch::transport::FrameSender;

// Progress is logged every this many frames
const REPORT_EVERY: u64 = 30;

/// Replays encoded image files to a cabinet-server as if they came from a camera
#[derive(Debug, Parser)]
#[command(name = "cabinet-capture", version)]
struct Cli {
    /// Processing server address, e.g. 192.168.1.10:8485
    #[arg(short, long)]
    server: String,
    /// Identifier sent in the handshake
    #[arg(short, long)]
    device_id: String,
    /// Directory of .jpg/.jpeg/.png frames, sent in file name order
    #[arg(short, long)]
    frames_dir: PathBuf,
    /// Maximum frames per second, 0 for unthrottled
    #[arg(long, default_value_t = 10.0)]
    fps: f32,
    /// Start over from the first frame after the last one
    #[arg(long = "loop")]
    repeat: bool,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = vec![];
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if is_image {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

async fn stream(cli: &Cli, frames: &[PathBuf], sender: &mut FrameSender) -> Result<()> {
    let started = Instant::now();
    loop {
        for path in frames {
            let payload = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            sender.send_frame(&payload).await.context("connection lost to server")?;
            let sent = sender.frames_sent();
            if sent % REPORT_EVERY == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::info!(
                    frames = sent,
                    fps = %format!("{:.2}", sent as f64 / elapsed.max(f64::EPSILON)),
                    kib = %format!("{:.1}", payload.len() as f64 / 1024.0),
                    "streaming"
                );
            }
        }
        if !cli.repeat {
            return Ok(());
        }
    }
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

    let frames = list_frames(&cli.frames_dir)?;
    if frames.is_empty() {
        bail!("no frames found in {}", cli.frames_dir.display());
    }
    tracing::info!(count = frames.len(), dir = %cli.frames_dir.display(), "frames loaded");

    let target_fps = Some(cli.fps).filter(|fps| *fps > 0.0);
    let mut sender = FrameSender::connect(cli.server.as_str(), &cli.device_id, target_fps)
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;
    tracing::info!(server = %cli.server, device_id = %cli.device_id, "connected");

    let started = Instant::now();
    let outcome = tokio::select! {
        result = stream(&cli, &frames, &mut sender) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stopped by user");
            Ok(())
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    let sent = sender.frames_sent();
    tracing::info!(
        frames = sent,
        mib = %format!("{:.1}", sender.bytes_sent() as f64 / (1024.0 * 1024.0)),
        secs = %format!("{:.1}", elapsed),
        fps = %format!("{:.2}", sent as f64 / elapsed.max(f64::EPSILON)),
        "capture finished"
    );
    if let Err(err) = sender.close().await {
        tracing::debug!(error = %err, "close failed");
    }
    outcome
}
