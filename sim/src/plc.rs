use std::time::Duration;

use tracing::{info, warn};

use plc_capture::link::{FrameReader, Link, LinkStream};
use plc_capture::packets::{CommandCode, Decoded, Frame};
use plc_capture::{CaptureError, LayerPlan};

/// Virtual PLC: walks a layer plan the way the rig firmware does, one
/// CAPTURE per section, waiting for each acknowledgement before moving on,
/// and closes the session with EXIT.
pub struct VirtualPlc {
    plan: LayerPlan,
    ack_timeout: Duration,
    inter_frame_delay: Duration,
}

/// Acknowledgement counts seen over one full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlcReport {
    pub dones: u32,
    pub errors: u32,
}

impl VirtualPlc {
    pub fn new(plan: LayerPlan) -> Self {
        Self {
            plan,
            ack_timeout: Duration::from_secs(10),
            inter_frame_delay: Duration::ZERO,
        }
    }

    /// Pace between frames, for bench runs against real hardware.
    pub fn with_inter_frame_delay(mut self, delay: Duration) -> Self {
        self.inter_frame_delay = delay;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Drives one full session over `stream`: wait for READY, send every
    /// CAPTURE in plan order, then EXIT and wait for the echo.
    pub async fn run<S: LinkStream + 'static>(self, stream: S) -> Result<PlcReport, CaptureError> {
        let (mut reader, mut writer) = Link::from_stream(stream).into_split();
        let mut report = PlcReport::default();

        self.wait_for(&mut reader, CommandCode::Ready).await?;
        info!("controller reported ready");

        let mut last = (0u16, 0u16);
        for (layer_index, sections) in self.plan.iter().enumerate() {
            let layer = u16::try_from(layer_index)
                .map_err(|_| CaptureError::InvalidPlan("plan exceeds 65535 layers".to_string()))?;
            for section in 1..=sections {
                writer
                    .write_frame(&Frame::new(CommandCode::Capture.word(), layer, section))
                    .await?;
                match self.wait_ack(&mut reader).await? {
                    CommandCode::Done => report.dones += 1,
                    CommandCode::Error => {
                        warn!(layer, section, "controller reported a capture failure");
                        report.errors += 1;
                    }
                    other => warn!(code = ?other, "unexpected acknowledgement"),
                }
                last = (layer, section);
                if !self.inter_frame_delay.is_zero() {
                    tokio::time::sleep(self.inter_frame_delay).await;
                }
            }
            info!(layer = layer + 1, sections, "layer complete");
        }

        writer
            .write_frame(&Frame::new(CommandCode::Exit.word(), last.0, last.1))
            .await?;
        self.wait_for(&mut reader, CommandCode::Exit).await?;
        writer.close().await;

        info!(dones = report.dones, errors = report.errors, "session complete");
        Ok(report)
    }

    /// Reads until `expected` arrives. Anything else in between is noise
    /// from the controller's point of view and is skipped.
    async fn wait_for(
        &self,
        reader: &mut FrameReader,
        expected: CommandCode,
    ) -> Result<(), CaptureError> {
        loop {
            if self.next_command(reader).await? == Some(expected) {
                return Ok(());
            }
        }
    }

    /// Reads until a DONE or ERROR acknowledgement arrives.
    async fn wait_ack(&self, reader: &mut FrameReader) -> Result<CommandCode, CaptureError> {
        loop {
            match self.next_command(reader).await? {
                Some(code @ (CommandCode::Done | CommandCode::Error)) => return Ok(code),
                Some(_) | None => continue,
            }
        }
    }

    async fn next_command(
        &self,
        reader: &mut FrameReader,
    ) -> Result<Option<CommandCode>, CaptureError> {
        let word = match reader.read_frame(self.ack_timeout).await? {
            Decoded::NoData => {
                return Err(CaptureError::FailedToReceive(format!(
                    "no acknowledgement within {:?}",
                    self.ack_timeout
                )))
            }
            Decoded::Terminal(command) => command,
            Decoded::Frame(frame) => frame.command,
        };
        Ok(CommandCode::from_word(word))
    }
}
