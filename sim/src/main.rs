//! Virtual PLC binary: drives a full capture session against a controller
//! listening on the other end of a serial line (typically a socat/pty
//! pair on the bench).
//!
//! Usage: `sim <port> [baud] [inter-frame-delay-ms]`

use std::time::Duration;

use tokio_serial::SerialPortBuilderExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plc_capture::LayerPlan;
use sim::VirtualPlc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .ok_or("usage: sim <port> [baud] [inter-frame-delay-ms]")?;
    let baud: u32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(9600);
    let delay_ms: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(1000);

    info!(port = %port, baud, "virtual PLC starting");
    let stream = tokio_serial::new(&port, baud).open_native_async()?;

    let plan = LayerPlan::default();
    let report = VirtualPlc::new(plan)
        .with_inter_frame_delay(Duration::from_millis(delay_ms))
        .run(stream)
        .await?;

    info!(
        dones = report.dones,
        errors = report.errors,
        "virtual PLC finished"
    );
    Ok(())
}
