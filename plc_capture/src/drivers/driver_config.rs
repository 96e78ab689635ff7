use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::link::SerialConfig;
use crate::LayerPlan;

/// Everything the capture driver needs for one session: the serial line,
/// the output root, the layer plan and the timing/flush knobs.
///
/// The flush counts are deployment tunables. A camera with a deep internal
/// frame queue wants a higher layer-transition flush (more latency, fresher
/// frames); a shallow queue gets away with less.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CaptureDriverConfig {
    pub serial: SerialConfig,
    /// Batch directories are allocated under this root.
    pub output_root: PathBuf,
    pub layer_plan: LayerPlan,
    /// Frames discarded right after the READY ack.
    pub initial_flush_frames: u32,
    /// Frames discarded when a layer boundary is crossed. Valid range 2-10.
    pub layer_flush_frames: u32,
    /// Frames discarded immediately before every capture, after the settle
    /// delay, so nothing queued during the pause ends up in the image.
    pub pre_capture_flush_frames: u32,
    /// Mechanical/exposure settling pause on the first capture of a layer.
    pub settle_delay_ms: u64,
    /// On-disk verification: number of existence polls after a capture.
    pub verify_retries: u32,
    /// Pause between existence polls.
    pub verify_interval_ms: u64,
    /// Depth of the listener-to-control-loop frame mailbox.
    pub queue_depth: usize,
}

impl CaptureDriverConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.serial.validate()?;
        if !(2..=10).contains(&self.layer_flush_frames) {
            return Err("layer flush count must be between 2 and 10".to_string());
        }
        if self.verify_retries == 0 {
            return Err("verification needs at least one retry".to_string());
        }
        if self.queue_depth == 0 {
            return Err("frame queue depth must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_ms)
    }
}

impl Default for CaptureDriverConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            output_root: PathBuf::from("."),
            layer_plan: LayerPlan::default(),
            initial_flush_frames: 8,
            layer_flush_frames: 5,
            pre_capture_flush_frames: 3,
            settle_delay_ms: 100,
            verify_retries: 10,
            verify_interval_ms: 100,
            queue_depth: 100,
        }
    }
}
