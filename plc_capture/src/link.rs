//! Serial link management.
//!
//! Owns the physical transport: retrying open with the DTR reset pulse the
//! PLC firmware expects, buffered read-until-terminator, write-with-flush
//! and idempotent close. A [`Link`] can also wrap any in-memory stream so
//! the simulator and the integration tests attach over
//! [`tokio::io::duplex`] instead of hardware.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::{sleep, timeout, Instant};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, warn};

use crate::errors::CaptureError;
use crate::packets::{self, Decoded, Frame, TERMINATOR};

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_RETRY_PAUSE: Duration = Duration::from_secs(1);
const DTR_PULSE: Duration = Duration::from_millis(100);

/// Serial line parameters. Configuration surface only; changing them never
/// changes wire semantics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub parity: Parity,
    pub stop_bits: u8,
    pub data_bits: u8,
    pub read_timeout_ms: u64,
    pub rtscts: bool,
    pub xonxoff: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.port.is_empty() {
            return Err("serial port name cannot be empty".to_string());
        }
        if self.baud == 0 {
            return Err("baud rate must be greater than 0".to_string());
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err("stop bits must be 1 or 2".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err("data bits must be between 5 and 8".to_string());
        }
        if self.read_timeout_ms == 0 {
            return Err("read timeout must be greater than 0".to_string());
        }
        if self.rtscts && self.xonxoff {
            return Err("hardware and software flow control are mutually exclusive".to_string());
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        let parity = match self.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };
        let stop_bits = match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };
        let data_bits = match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let flow_control = if self.rtscts {
            tokio_serial::FlowControl::Hardware
        } else if self.xonxoff {
            tokio_serial::FlowControl::Software
        } else {
            tokio_serial::FlowControl::None
        };
        tokio_serial::new(&self.port, self.baud)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .flow_control(flow_control)
            .timeout(self.read_timeout())
    }
}

impl Default for SerialConfig {
    // Line settings of the deployed PLC: 9600 8-O-1, no flow control.
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            parity: Parity::Odd,
            stop_bits: 1,
            data_bits: 8,
            read_timeout_ms: 1000,
            rtscts: false,
            xonxoff: false,
        }
    }
}

pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

/// One open link to the PLC.
pub struct Link {
    stream: Box<dyn LinkStream>,
}

impl Link {
    /// Opens the configured serial port, retrying up to 3 times with a one
    /// second pause. Each attempt clears both line buffers and pulses DTR
    /// low for 100 ms, which the remote PLC firmware treats as a hardware
    /// reset. Exhausting the retries is fatal to the whole session.
    pub async fn open_serial(config: &SerialConfig) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::InvalidConfig)?;

        let mut last_error = String::new();
        for attempt in 1..=OPEN_ATTEMPTS {
            match open_once(config).await {
                Ok(stream) => {
                    debug!(port = %config.port, attempt, "serial port opened");
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => {
                    warn!(port = %config.port, attempt, error = %e, "serial open attempt failed");
                    last_error = e;
                    if attempt < OPEN_ATTEMPTS {
                        sleep(OPEN_RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(CaptureError::Connection(format!(
            "{} after {} attempts: {}",
            config.port, OPEN_ATTEMPTS, last_error
        )))
    }

    /// Wraps an already-open stream. Used by the simulator and by tests.
    pub fn from_stream<S: LinkStream + 'static>(stream: S) -> Self {
        Self {
            stream: Box::new(stream),
        }
    }

    /// Splits the link into its read and write halves so a dedicated
    /// listener can block on reads while the control loop writes acks.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read_half, write_half) = split(self.stream);
        (
            FrameReader {
                half: read_half,
                buffer: Vec::new(),
            },
            FrameWriter {
                half: write_half,
                closed: false,
            },
        )
    }
}

async fn open_once(config: &SerialConfig) -> Result<SerialStream, String> {
    let mut stream = config
        .builder()
        .open_native_async()
        .map_err(|e| e.to_string())?;
    stream
        .clear(ClearBuffer::All)
        .map_err(|e| format!("clearing line buffers: {e}"))?;
    stream
        .write_data_terminal_ready(false)
        .map_err(|e| format!("dropping DTR: {e}"))?;
    sleep(DTR_PULSE).await;
    stream
        .write_data_terminal_ready(true)
        .map_err(|e| format!("raising DTR: {e}"))?;
    Ok(stream)
}

/// Buffering reader for the inbound side of the link.
pub struct FrameReader {
    half: ReadHalf<Box<dyn LinkStream>>,
    buffer: Vec<u8>,
}

impl FrameReader {
    /// Reads until one terminated frame is buffered or `timeout` elapses.
    ///
    /// A timeout with no complete frame yields [`Decoded::NoData`], not an
    /// error, so the caller can poll in a loop and observe cancellation
    /// between reads. A malformed frame is a [`CaptureError::Decode`]; the
    /// bytes are already consumed, so the caller can log and keep reading.
    pub async fn read_frame(&mut self, read_timeout: Duration) -> Result<Decoded, CaptureError> {
        let deadline = Instant::now() + read_timeout;
        loop {
            if let Some(chunk) = take_terminated_chunk(&mut self.buffer) {
                return packets::decode(&chunk).map_err(CaptureError::from);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Decoded::NoData);
            }

            let mut scratch = [0u8; 256];
            match timeout(remaining, self.half.read(&mut scratch)).await {
                Err(_) => return Ok(Decoded::NoData),
                Ok(Ok(0)) => return Err(CaptureError::LinkClosed),
                Ok(Ok(n)) => self.buffer.extend_from_slice(&scratch[..n]),
                Ok(Err(e)) => return Err(CaptureError::FailedToReceive(e.to_string())),
            }
        }
    }
}

/// Drains the buffer up to and including the first terminator, if present.
fn take_terminated_chunk(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = buffer
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)?;
    Some(buffer.drain(..pos + TERMINATOR.len()).collect())
}

/// Outbound side of the link.
pub struct FrameWriter {
    half: WriteHalf<Box<dyn LinkStream>>,
    closed: bool,
}

impl FrameWriter {
    /// Writes one frame and flushes so the PLC observes it promptly.
    /// Failures are returned to the caller, never swallowed.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::LinkClosed);
        }
        self.half
            .write_all(&frame.encode())
            .await
            .map_err(|e| CaptureError::FailedToSend(e.to_string()))?;
        self.half
            .flush()
            .await
            .map_err(|e| CaptureError::FailedToSend(e.to_string()))?;
        debug!(
            command = frame.command,
            layer = frame.layer,
            section = frame.section,
            "frame sent"
        );
        Ok(())
    }

    /// Idempotent close; safe to call multiple times.
    pub async fn close(&mut self) {
        if !self.closed {
            let _ = self.half.shutdown().await;
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::Decoded;

    #[tokio::test]
    async fn reads_one_frame_per_call() {
        let (local, mut remote) = tokio::io::duplex(256);
        let (mut reader, _writer) = Link::from_stream(local).into_split();

        let mut bytes = Frame::new(400, 0, 1).encode().to_vec();
        bytes.extend_from_slice(&Frame::new(400, 0, 2).encode());
        remote.write_all(&bytes).await.unwrap();

        let first = reader.read_frame(Duration::from_millis(200)).await.unwrap();
        let second = reader.read_frame(Duration::from_millis(200)).await.unwrap();
        assert_eq!(first, Decoded::Frame(Frame::new(400, 0, 1)));
        assert_eq!(second, Decoded::Frame(Frame::new(400, 0, 2)));
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_reads() {
        let (local, mut remote) = tokio::io::duplex(256);
        let (mut reader, _writer) = Link::from_stream(local).into_split();

        let bytes = Frame::new(400, 3, 9).encode();
        remote.write_all(&bytes[..3]).await.unwrap();
        remote.flush().await.unwrap();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.write_all(&bytes[3..]).await.unwrap();
            remote
        });

        let decoded = reader.read_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(decoded, Decoded::Frame(Frame::new(400, 3, 9)));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_with_nothing_buffered_is_no_data() {
        let (local, _remote) = tokio::io::duplex(256);
        let (mut reader, _writer) = Link::from_stream(local).into_split();

        let decoded = reader.read_frame(Duration::from_millis(20)).await.unwrap();
        assert_eq!(decoded, Decoded::NoData);
    }

    #[tokio::test]
    async fn peer_hangup_is_reported_as_link_closed() {
        let (local, remote) = tokio::io::duplex(256);
        let (mut reader, _writer) = Link::from_stream(local).into_split();
        drop(remote);

        let result = reader.read_frame(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CaptureError::LinkClosed)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (local, _remote) = tokio::io::duplex(256);
        let (_reader, mut writer) = Link::from_stream(local).into_split();

        writer.close().await;
        writer.close().await;
        assert!(writer.is_closed());
        assert!(matches!(
            writer.write_frame(&Frame::new(500, 0, 0)).await,
            Err(CaptureError::LinkClosed)
        ));
    }

    #[test]
    fn default_serial_config_is_valid() {
        assert!(SerialConfig::default().validate().is_ok());
    }

    #[test]
    fn conflicting_flow_control_is_rejected() {
        let config = SerialConfig {
            rtscts: true,
            xonxoff: true,
            ..SerialConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
