//! The fixed control vocabulary carried in WebSocket text frames.

use std::fmt;

/// One of the four control messages understood on a tunnel.
///
/// Control messages always travel as *text* frames; payload always travels as
/// *binary* frames.  Keeping the two apart is what lets the bridge forward
/// device bytes verbatim without escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlMessage {
    /// The remote device is attached and ready (`device:ok`).
    DeviceReady,
    /// The remote device could not be attached or went away (`device:fail`).
    DeviceFailed,
    /// A local consumer is attached and ready for payload (`client:ok`).
    ClientReady,
    /// The local consumer went away (`client:fail`).
    ClientFailed,
}

impl ControlMessage {
    /// Wire spelling of the message.
    pub const fn as_str(self) -> &'static str {
        match self {
            ControlMessage::DeviceReady => "device:ok",
            ControlMessage::DeviceFailed => "device:fail",
            ControlMessage::ClientReady => "client:ok",
            ControlMessage::ClientFailed => "client:fail",
        }
    }

    /// Parses a text frame payload.
    ///
    /// Returns `None` for anything outside the vocabulary; such frames are
    /// ignored by the tunnel.  Matching is exact: no trimming, no case folding.
    ///
    /// # Example
    ///
    /// ```rust
    /// use xray_core::ControlMessage;
    ///
    /// assert_eq!(ControlMessage::parse(b"device:ok"), Some(ControlMessage::DeviceReady));
    /// assert_eq!(ControlMessage::parse(b"hello"), None);
    /// ```
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"device:ok" => Some(ControlMessage::DeviceReady),
            b"device:fail" => Some(ControlMessage::DeviceFailed),
            b"client:ok" => Some(ControlMessage::ClientReady),
            b"client:fail" => Some(ControlMessage::ClientFailed),
            _ => None,
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ControlMessage; 4] = [
        ControlMessage::DeviceReady,
        ControlMessage::DeviceFailed,
        ControlMessage::ClientReady,
        ControlMessage::ClientFailed,
    ];

    #[test]
    fn test_every_message_parses_from_its_own_spelling() {
        for msg in ALL {
            assert_eq!(ControlMessage::parse(msg.as_str().as_bytes()), Some(msg));
        }
    }

    #[test]
    fn test_wire_spellings_match_protocol() {
        assert_eq!(ControlMessage::DeviceReady.as_str(), "device:ok");
        assert_eq!(ControlMessage::DeviceFailed.as_str(), "device:fail");
        assert_eq!(ControlMessage::ClientReady.as_str(), "client:ok");
        assert_eq!(ControlMessage::ClientFailed.as_str(), "client:fail");
    }

    #[test]
    fn test_unknown_text_is_not_a_control_message() {
        assert_eq!(ControlMessage::parse(b""), None);
        assert_eq!(ControlMessage::parse(b"device:maybe"), None);
        assert_eq!(ControlMessage::parse(b"DEVICE:OK"), None);
        assert_eq!(ControlMessage::parse(b"device:ok\n"), None);
    }
}
