//! The capture driver: link listener, frame mailbox and the state machine
//! that turns PLC commands into camera captures and acknowledgements.
//!
//! One logical control loop owns all session state. A dedicated listener
//! task reads and decodes frames from the link and hands them over an
//! ordered mpsc mailbox in arrival order; no command is ever processed
//! concurrently with another and none is reordered relative to arrival.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::CaptureDriverConfig;
use crate::device::CaptureDevice;
use crate::errors::CaptureError;
use crate::layout::BatchLayout;
use crate::link::{FrameReader, FrameWriter, Link};
use crate::packets::{CommandCode, Decoded, Frame};
use crate::progress::{self, ProgressEvent, ProgressReceiver, ProgressSender};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Idle,
    Ready,
    Capturing,
    Finished,
}

/// Per-session bookkeeping. Exists from READY until EXIT; never persisted
/// across restarts.
struct Session {
    layout: BatchLayout,
    current_layer: Option<u16>,
    section_in_layer: u16,
    /// Number of the next image file, starting at 1. Advances only on a
    /// verified capture and never resets, across layer boundaries included.
    image_counter: u32,
    total_captured: u32,
}

/// What a finished (or torn down) session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub batch_dir: Option<PathBuf>,
    pub total_captured: u32,
}

enum LoopAction {
    Continue,
    Finished,
}

/// Drives one capture session against a PLC on the other end of a link.
///
/// Construction does not start a session: the PLC world expects the
/// operator to arm the controller first ([`CaptureDriver::start_session`]
/// sends the READY ack), after which [`CaptureDriver::run`] processes
/// commands until EXIT, shutdown or a fatal link failure. Teardown always
/// releases the device and closes the link, in that order, no matter which
/// path ended the loop.
pub struct CaptureDriver<D: CaptureDevice> {
    config: CaptureDriverConfig,
    writer: FrameWriter,
    device: D,
    queue_rx: mpsc::Receiver<Decoded>,
    shutdown: watch::Receiver<bool>,
    progress: ProgressSender,
    listener: JoinHandle<()>,
    state: DriverState,
    session: Option<Session>,
}

impl<D: CaptureDevice> CaptureDriver<D> {
    /// Opens the configured serial port (with retries and the DTR reset
    /// pulse) and attaches the driver to it. A connection failure here is
    /// fatal to the session; no frame has been sent yet.
    pub async fn connect(
        config: CaptureDriverConfig,
        device: D,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::InvalidConfig)?;
        let link = Link::open_serial(&config.serial).await?;
        Ok(Self::attach(link, config, device, shutdown))
    }

    /// Attaches the driver to an already-open link. The simulator and the
    /// integration tests come in through here with a duplex stream.
    pub fn attach(
        link: Link,
        config: CaptureDriverConfig,
        device: D,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (reader, writer) = link.into_split();
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth);
        let (progress, _) = progress::channel(PROGRESS_CHANNEL_CAPACITY);
        let listener = tokio::spawn(listen(
            reader,
            queue_tx,
            shutdown.clone(),
            config.serial.read_timeout(),
        ));

        Self {
            config,
            writer,
            device,
            queue_rx,
            shutdown,
            progress,
            listener,
            state: DriverState::Idle,
            session: None,
        }
    }

    /// Subscribe to one-way progress events. The driver never blocks on
    /// subscribers and never reads their state back.
    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.progress.subscribe()
    }

    /// Idle -> Ready: the operator's start signal.
    ///
    /// Sends the READY ack, flushes the device's startup backlog, allocates
    /// the batch directory, pre-creates the folder for the first layer and
    /// zeroes the counters.
    pub async fn start_session(&mut self) -> Result<(), CaptureError> {
        if self.state != DriverState::Idle {
            warn!(state = ?self.state, "start_session ignored; session already started");
            return Ok(());
        }

        self.writer
            .write_frame(&Frame::new(CommandCode::Ready.word(), 0, 0))
            .await?;
        self.device.flush(self.config.initial_flush_frames).await;

        let mut layout = BatchLayout::allocate(&self.config.output_root)?;
        layout.ensure_layer(0)?;
        let batch_dir = layout.batch_dir().to_path_buf();

        self.session = Some(Session {
            layout,
            current_layer: None,
            section_in_layer: 0,
            image_counter: 1,
            total_captured: 0,
        });
        self.state = DriverState::Ready;

        info!(batch_dir = %batch_dir.display(), "session started");
        let _ = self.progress.send(ProgressEvent::SessionStarted {
            batch_dir,
            total_expected: self.config.layer_plan.total_sections(),
        });
        Ok(())
    }

    /// Processes commands until EXIT, an external shutdown or a fatal link
    /// failure, then tears the session down. The device is released and the
    /// link closed on every path out of here.
    pub async fn run(mut self) -> Result<SessionSummary, CaptureError> {
        let outcome = self.control_loop().await;
        let summary = self.teardown().await;
        outcome.map(|_| summary)
    }

    async fn control_loop(&mut self) -> Result<(), CaptureError> {
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("shutdown requested; stopping control loop");
                        return Ok(());
                    }
                }
                decoded = self.queue_rx.recv() => {
                    match decoded {
                        None => {
                            error!("frame listener stopped while the session was running");
                            return Err(CaptureError::LinkClosed);
                        }
                        Some(decoded) => {
                            if let LoopAction::Finished = self.handle_frame(decoded).await? {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, decoded: Decoded) -> Result<LoopAction, CaptureError> {
        let frame = match decoded {
            // The listener filters these out; tolerate them anyway.
            Decoded::NoData => return Ok(LoopAction::Continue),
            Decoded::Terminal(command) => Frame::new(command, 0, 0),
            Decoded::Frame(frame) => frame,
        };

        match CommandCode::from_word(frame.command) {
            Some(CommandCode::Capture) => {
                self.handle_capture(frame.layer, frame.section).await?;
                Ok(LoopAction::Continue)
            }
            Some(CommandCode::Exit) => {
                info!("exit command received; finishing session");
                // Echo the exit ack; a failed echo must not block teardown.
                if let Err(e) = self
                    .writer
                    .write_frame(&Frame::new(CommandCode::Exit.word(), frame.layer, frame.section))
                    .await
                {
                    warn!(error = %e, "could not echo exit ack");
                }
                self.state = DriverState::Finished;
                Ok(LoopAction::Finished)
            }
            Some(code) => {
                // Our own ack codes have no meaning inbound.
                debug!(code = ?code, "ignoring inbound acknowledgement code");
                Ok(LoopAction::Continue)
            }
            None => {
                warn!(command = frame.command, "unknown command dropped");
                Ok(LoopAction::Continue)
            }
        }
    }

    async fn handle_capture(&mut self, layer: u16, section: u16) -> Result<(), CaptureError> {
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => {
                warn!(layer, section, "capture command before session start; dropped");
                return Ok(());
            }
        };

        // Layer boundary crossing: close out the previous layer, flush the
        // device's stale-frame queue and make sure every folder up to the
        // new layer exists (the PLC may skip indices).
        if session.current_layer != Some(layer) {
            if let Some(previous) = session.current_layer {
                let _ = self.progress.send(ProgressEvent::LayerCompleted {
                    layer: previous,
                    captured_in_layer: u32::from(session.section_in_layer),
                });
            }
            self.device.flush(self.config.layer_flush_frames).await;
            session.layout.ensure_layer(usize::from(layer))?;
            session.current_layer = Some(layer);
            session.section_in_layer = 0;
            let _ = self.progress.send(ProgressEvent::LayerStarted { layer });
        }

        // Mechanical/exposure settling, first capture of a layer only.
        if session.section_in_layer == 0 {
            sleep(self.config.settle_delay()).await;
        }

        // Discard whatever queued up during the settle delay.
        self.device.flush(self.config.pre_capture_flush_frames).await;

        let path = match session
            .layout
            .image_path(usize::from(layer), session.image_counter)
        {
            Some(path) => path,
            None => {
                // Unreachable after ensure_layer; do not desync the PLC over it.
                error!(layer, "no folder for layer; capture dropped");
                return Ok(());
            }
        };

        if !self.device.capture(&path).await {
            warn!(layer, section, "device-level capture failure");
            self.state = DriverState::Capturing;
            self.writer
                .write_frame(&Frame::new(CommandCode::Error.word(), layer, section))
                .await?;
            return Ok(());
        }

        // Bridge asynchronous write completion on slow storage. If the file
        // never appears we send nothing at all: a DONE for a file that never
        // landed would desynchronize the PLC, whose own timeout governs the
        // retry.
        if !wait_for_file(
            &path,
            self.config.verify_retries,
            self.config.verify_interval(),
        )
        .await
        {
            warn!(path = %path.display(), "captured file never appeared; withholding ack");
            return Ok(());
        }

        let image_number = session.image_counter;
        session.image_counter += 1;
        session.section_in_layer += 1;
        session.total_captured += 1;
        self.state = DriverState::Capturing;

        debug!(layer, section, image_number, "capture complete");
        let _ = self.progress.send(ProgressEvent::ImageCaptured {
            layer,
            section,
            image_number,
            total_captured: session.total_captured,
            total_expected: self.config.layer_plan.total_sections(),
        });

        // DONE regardless of layer completion; the PLC infers completion
        // from its own section counter.
        self.writer
            .write_frame(&Frame::new(CommandCode::Done.word(), layer, section))
            .await
    }

    /// Strict shutdown order: stop accepting frames, release the device,
    /// close the link. Reversing it risks writing to a closed link.
    async fn teardown(&mut self) -> SessionSummary {
        self.listener.abort();
        self.queue_rx.close();
        self.device.release().await;
        self.writer.close().await;

        let summary = SessionSummary {
            batch_dir: self
                .session
                .as_ref()
                .map(|s| s.layout.batch_dir().to_path_buf()),
            total_captured: self.session.as_ref().map_or(0, |s| s.total_captured),
        };
        let _ = self.progress.send(ProgressEvent::SessionFinished {
            total_captured: summary.total_captured,
        });
        info!(total_captured = summary.total_captured, "session torn down");
        summary
    }
}

/// Listener routine: keeps the blocking link read off the control loop.
///
/// Frames go into the mailbox in arrival order. Decode errors are logged
/// and swallowed here so the protocol stays live; anything fatal stops the
/// listener, which the control loop observes as a closed mailbox.
async fn listen(
    mut reader: FrameReader,
    queue: mpsc::Sender<Decoded>,
    shutdown: watch::Receiver<bool>,
    read_timeout: Duration,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match reader.read_frame(read_timeout).await {
            // Timeout; loop around so shutdown is observed between reads.
            Ok(Decoded::NoData) => continue,
            Ok(decoded) => {
                if queue.send(decoded).await.is_err() {
                    break;
                }
            }
            Err(CaptureError::Decode(e)) => {
                warn!(error = %e, "malformed frame discarded");
            }
            Err(e) => {
                error!(error = %e, "link read failed; listener stopping");
                break;
            }
        }
    }
}

async fn wait_for_file(path: &Path, retries: u32, interval: Duration) -> bool {
    for _ in 0..retries {
        if path.exists() {
            return true;
        }
        sleep(interval).await;
    }
    path.exists()
}
