use int_enum::IntEnum;
use serde::{Deserialize, Serialize};

/// Command words of the PLC frame protocol.
///
/// The same code space is used in both directions: the PLC requests with
/// `Capture`/`Exit`, the controller acknowledges with `Ready`/`Done`/
/// `Error` and echoes `Exit`. Codes outside this set are logged and
/// dropped by the driver, never fatal.
#[repr(u16)]
#[derive(Serialize, Deserialize, IntEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    /// Controller is initialized and the batch directory exists.
    Ready = 300,
    /// Request one image capture at (layer, section).
    Capture = 400,
    /// Capture completed and the file landed on disk.
    Done = 500,
    /// Capture failed at the device level.
    Error = 600,
    /// Terminate the session. Sent by the PLC, echoed by the controller.
    Exit = 700,
}

impl CommandCode {
    /// Decodes a raw command word, `None` for codes outside the protocol.
    pub fn from_word(word: u16) -> Option<Self> {
        Self::try_from(word).ok()
    }

    pub fn word(self) -> u16 {
        u16::from(self)
    }
}
