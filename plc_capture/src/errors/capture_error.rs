use thiserror::Error;

use crate::packets::{DecodeError, EncodeError};

/// Error taxonomy of the capture controller.
///
/// `Connection` and `Device` are fatal to the session and unwind to
/// teardown. `Decode` never crosses the control loop: the listener logs the
/// malformed frame and keeps reading. Capture failures are not errors at
/// all; they are acknowledged on the wire (`ERROR` code) or deliberately
/// left unacknowledged (verification timeout) and the loop stays live.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("serial link could not be opened: {0}")]
    Connection(String),

    #[error("capture device failed to initialize: {0}")]
    Device(String),

    #[error(transparent)]
    Encoding(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to send frame: {0}")]
    FailedToSend(String),

    #[error("failed to receive frame: {0}")]
    FailedToReceive(String),

    #[error("link closed while the session was still running")]
    LinkClosed,

    #[error("invalid layer plan: {0}")]
    InvalidPlan(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
