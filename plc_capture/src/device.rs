//! Capability interface of the camera subsystem.
//!
//! The physical camera SDK lives behind this trait; the driver only ever
//! flushes stale frames, captures to a path and releases the device.
//! Initialization belongs to the concrete implementation's constructor, and
//! a failed constructor is fatal to the session before any frame is sent.

use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait CaptureDevice: Send {
    /// Reads and discards up to `frames` frames from the device's internal
    /// queue. Best effort: a short read is not an error.
    async fn flush(&mut self, frames: u32);

    /// Captures one image to `path`. Returns `false` on a device-level
    /// failure; the file may or may not exist afterwards, which is why the
    /// driver verifies on disk separately.
    async fn capture(&mut self, path: &Path) -> bool;

    /// Releases the hardware. Idempotent; called exactly once per session
    /// by the driver's teardown, but safe to call again.
    async fn release(&mut self);
}
