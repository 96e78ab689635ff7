//! One-way progress events for an operator display.
//!
//! The driver publishes over a broadcast channel and never reads anything
//! back; a slow or absent subscriber cannot block or stall the control
//! loop (`broadcast::Sender::send` to zero receivers is a no-op).

use std::path::PathBuf;

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// READY was acknowledged and the batch directory exists.
    SessionStarted {
        batch_dir: PathBuf,
        total_expected: u32,
    },
    LayerStarted {
        layer: u16,
    },
    /// Bookkeeping close-out when a layer boundary is crossed.
    LayerCompleted {
        layer: u16,
        captured_in_layer: u32,
    },
    ImageCaptured {
        layer: u16,
        section: u16,
        image_number: u32,
        total_captured: u32,
        total_expected: u32,
    },
    SessionFinished {
        total_captured: u32,
    },
}

pub type ProgressSender = broadcast::Sender<ProgressEvent>;
pub type ProgressReceiver = broadcast::Receiver<ProgressEvent>;

pub fn channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    broadcast::channel(capacity)
}
