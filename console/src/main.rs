//! Operator console: arms the capture controller and watches a session.
//!
//! Type `ready` to send the READY ack and start processing PLC commands,
//! `exit` to stop. The driver runs as a background task; typing `exit`
//! mid-session trips the shutdown token and the driver tears down in
//! order (device first, then the link).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plc_capture::drivers::{CaptureDriver, CaptureDriverConfig};
use plc_capture::progress::ProgressEvent;
use sim::SimCamera;

#[derive(Parser, Debug)]
#[command(name = "capture-console", about = "PLC-synchronized capture controller")]
struct Cli {
    /// Serial port connected to the PLC.
    #[arg(long)]
    port: Option<String>,

    /// Baud rate override.
    #[arg(long)]
    baud: Option<u32>,

    /// JSON file with a full CaptureDriverConfig; CLI flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for batch output.
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Use the simulated camera instead of real hardware.
    #[arg(long)]
    simulate: bool,
}

fn load_config(cli: &Cli) -> Result<CaptureDriverConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => CaptureDriverConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud = baud;
    }
    if let Some(root) = &cli.output_root {
        config.output_root = root.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if !cli.simulate {
        // The physical camera SDK integrates through the CaptureDevice
        // trait; this binary only wires up the simulated one.
        bail!("no physical camera backend is wired in; run with --simulate");
    }

    println!("Type 'ready' to arm the controller or 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await?.as_deref().map(str::trim) {
            Some("ready") => {
                run_session(config.clone(), &mut lines).await?;
                break;
            }
            Some("exit") | None => {
                info!("exiting without a session");
                break;
            }
            Some(other) => {
                warn!(input = other, "unknown console command");
                println!("Unknown command. Type 'ready' or 'exit'.");
            }
        }
    }
    Ok(())
}

async fn run_session(
    config: CaptureDriverConfig,
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut driver = CaptureDriver::connect(config, SimCamera::new(), shutdown_rx)
        .await
        .context("connecting to the PLC")?;

    let progress = driver.subscribe_progress();
    tokio::spawn(print_progress(progress));

    driver.start_session().await.context("starting session")?;
    let mut session = tokio::spawn(driver.run());

    loop {
        tokio::select! {
            result = &mut session => {
                let summary = result.context("driver task panicked")??;
                info!(
                    total_captured = summary.total_captured,
                    batch_dir = ?summary.batch_dir,
                    "session finished"
                );
                return Ok(());
            }
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("exit") | None => {
                        info!("operator requested shutdown");
                        let _ = shutdown_tx.send(true);
                    }
                    Some(other) => {
                        warn!(input = other, "session is running; type 'exit' to stop");
                    }
                }
            }
        }
    }
}

async fn print_progress(mut progress: plc_capture::progress::ProgressReceiver) {
    while let Ok(event) = progress.recv().await {
        match event {
            ProgressEvent::SessionStarted {
                batch_dir,
                total_expected,
            } => {
                println!(
                    "Session started: {} ({} images expected)",
                    batch_dir.display(),
                    total_expected
                );
            }
            ProgressEvent::LayerStarted { layer } => {
                println!("Layer {} started", layer + 1);
            }
            ProgressEvent::LayerCompleted {
                layer,
                captured_in_layer,
            } => {
                println!("Layer {} complete ({captured_in_layer} images)", layer + 1);
            }
            ProgressEvent::ImageCaptured {
                image_number,
                total_captured,
                total_expected,
                ..
            } => {
                println!("Captured image_{image_number} ({total_captured}/{total_expected})");
            }
            ProgressEvent::SessionFinished { total_captured } => {
                println!("Session finished: {total_captured} images captured");
            }
        }
    }
}
