//! Wire types for the remote client connection.
//!
//! The remote side is a WebSocket: binary frames carry terminal bytes, text
//! frames carry JSON control and overlay messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Inbound JSON control messages from the client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Resize the PTY
    #[serde(rename = "resize")]
    Resize { cols: u16, rows: u16 },

    /// Turn vision pattern detection on
    #[serde(rename = "VISION_ENABLE")]
    VisionEnable,

    /// Turn vision pattern detection off
    #[serde(rename = "VISION_DISABLE")]
    VisionDisable,

    /// Write a command into the PTY on the client's behalf
    #[serde(rename = "INJECT_COMMAND")]
    InjectCommand { command: String },

    /// Toggle auto-respond mode for low-confidence alerting
    #[serde(rename = "AM_AUTO_RESPOND")]
    AutoRespond {
        #[serde(rename = "autoRespond")]
        auto_respond: bool,
    },
}

/// Outbound JSON messages to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// A vision detector matched
    #[serde(rename = "VISION_OVERLAY")]
    VisionOverlay {
        #[serde(rename = "overlayType")]
        overlay_type: String,
        payload: Value,
    },

    /// A parse landed below the confidence threshold; raw text included so
    /// the client loses nothing
    #[serde(rename = "AM_LOW_CONFIDENCE")]
    LowConfidence { raw: String, confidence: f64 },
}

/// Why the connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The PTY process exited normally
    ProcessExited,
    /// The session hit its lifetime ceiling
    SessionTimeout,
    /// A PTY read/write error ended the session
    IoError,
}

impl CloseReason {
    /// Application-defined close code
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::ProcessExited => 4000,
            CloseReason::SessionTimeout => 4001,
            CloseReason::IoError => 4002,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::ProcessExited => "process exited",
            CloseReason::SessionTimeout => "session timed out",
            CloseReason::IoError => "pty i/o error",
        }
    }

    pub fn close_frame(&self) -> CloseFrame<'static> {
        CloseFrame {
            code: CloseCode::from(self.code()),
            reason: self.reason().into(),
        }
    }
}

/// One item on the outbound queue. Exactly one writer task drains these in
/// FIFO order, which is what guarantees client-side byte ordering.
#[derive(Debug)]
pub enum Outbound {
    /// Raw terminal bytes (binary frame)
    Data(Vec<u8>),
    /// JSON message (text frame)
    Message(ClientMessage),
    /// Close the connection with a reason
    Close(CloseReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_parse_from_wire_shapes() {
        let resize: ControlMessage =
            serde_json::from_str(r#"{"type":"resize","cols":120,"rows":40}"#).unwrap();
        assert!(matches!(resize, ControlMessage::Resize { cols: 120, rows: 40 }));

        let enable: ControlMessage =
            serde_json::from_str(r#"{"type":"VISION_ENABLE"}"#).unwrap();
        assert!(matches!(enable, ControlMessage::VisionEnable));

        let inject: ControlMessage =
            serde_json::from_str(r#"{"type":"INJECT_COMMAND","command":"claude"}"#).unwrap();
        assert!(matches!(inject, ControlMessage::InjectCommand { command } if command == "claude"));

        let auto: ControlMessage =
            serde_json::from_str(r#"{"type":"AM_AUTO_RESPOND","autoRespond":true}"#).unwrap();
        assert!(matches!(auto, ControlMessage::AutoRespond { auto_respond: true }));
    }

    #[test]
    fn overlay_serializes_with_wire_names() {
        let message = ClientMessage::VisionOverlay {
            overlay_type: "git_status".to_string(),
            payload: serde_json::json!({"branch": "main"}),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"VISION_OVERLAY""#));
        assert!(json.contains(r#""overlayType":"git_status""#));
    }

    #[test]
    fn close_codes_are_distinct() {
        assert_eq!(CloseReason::ProcessExited.code(), 4000);
        assert_eq!(CloseReason::SessionTimeout.code(), 4001);
        assert_eq!(CloseReason::IoError.code(), 4002);
    }
}
