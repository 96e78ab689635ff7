use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use plc_capture::device::CaptureDevice;

// Smallest thing image viewers accept as a JPEG: SOI/APP0 header and EOI.
const PLACEHOLDER_JPEG: [u8; 20] = [
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0xFF, 0xD9,
];

/// Camera stand-in that writes a placeholder JPEG per capture.
///
/// `frame_delay` approximates the sensor's per-frame read time so flush
/// counts cost realistic wall time on the bench; leave it at zero for
/// tests.
pub struct SimCamera {
    frame_delay: Duration,
    released: bool,
}

impl SimCamera {
    pub fn new() -> Self {
        Self {
            frame_delay: Duration::ZERO,
            released: false,
        }
    }

    pub fn with_frame_delay(frame_delay: Duration) -> Self {
        Self {
            frame_delay,
            released: false,
        }
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureDevice for SimCamera {
    async fn flush(&mut self, frames: u32) {
        debug!(frames, "flushing simulated frame buffer");
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay * frames).await;
        }
    }

    async fn capture(&mut self, path: &Path) -> bool {
        if !self.frame_delay.is_zero() {
            tokio::time::sleep(self.frame_delay).await;
        }
        match std::fs::write(path, PLACEHOLDER_JPEG) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "simulated capture failed");
                false
            }
        }
    }

    async fn release(&mut self) {
        if !self.released {
            info!("simulated camera released");
            self.released = true;
        }
    }
}
