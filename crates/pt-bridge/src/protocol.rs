use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Wire messages
// ---------------------------------------------------------------------------

/// Frames a client may send over the terminal WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Raw input data to write to the shell.
    Input { data: String },
    /// Resize the terminal.
    Resize { rows: u16, cols: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Frames the server sends back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        state: ConnectionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
    },
    Output {
        data: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn connected(session_id: Uuid) -> Self {
        ServerMessage::Status {
            state: ConnectionState::Connected,
            session_id: Some(session_id),
        }
    }

    pub fn disconnected() -> Self {
        ServerMessage::Status {
            state: ConnectionState::Disconnected,
            session_id: None,
        }
    }

    pub fn output(data: impl Into<String>) -> Self {
        ServerMessage::Output { data: data.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Utf8Decoder
// ---------------------------------------------------------------------------

/// Turns pty output chunks into text without splitting multi-byte characters.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk; bytes that can never form valid UTF-8 become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is still held back, lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"input","data":"ls -la\r"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                data: "ls -la\r".into()
            }
        );
    }

    #[test]
    fn test_parse_resize() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"resize","rows":40,"cols":120}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { rows: 40, cols: 120 });
    }

    #[test]
    fn test_reject_malformed_frames() {
        for raw in [
            "not json",
            r#"{"type":"unknown"}"#,
            r#"{"type":"input"}"#,
            r#"{"type":"resize","rows":-1,"cols":80}"#,
            r#"{"data":"no type"}"#,
        ] {
            assert!(serde_json::from_str::<ClientMessage>(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn test_status_shapes() {
        let id = Uuid::new_v4();
        let connected = serde_json::to_value(ServerMessage::connected(id)).unwrap();
        assert_eq!(
            connected,
            serde_json::json!({"type": "status", "state": "connected", "session_id": id.to_string()})
        );

        let disconnected = serde_json::to_value(ServerMessage::disconnected()).unwrap();
        assert_eq!(
            disconnected,
            serde_json::json!({"type": "status", "state": "disconnected"})
        );
    }

    #[test]
    fn test_output_and_error_shapes() {
        let v = serde_json::to_value(ServerMessage::output("hi")).unwrap();
        assert_eq!(v, serde_json::json!({"type": "output", "data": "hi"}));
        let v = serde_json::to_value(ServerMessage::error("boom")).unwrap();
        assert_eq!(v, serde_json::json!({"type": "error", "message": "boom"}));
    }

    #[test]
    fn test_decoder_holds_split_character() {
        let bytes = "héllo".as_bytes();
        // 'é' is two bytes; split between them.
        let mut d = Utf8Decoder::new();
        let first = d.decode(&bytes[..2]);
        assert_eq!(first, "h");
        let second = d.decode(&bytes[2..]);
        assert_eq!(second, "éllo");
        assert!(d.finish().is_empty());
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_finish_flushes_incomplete_tail() {
        let mut d = Utf8Decoder::new();
        assert_eq!(d.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(d.finish(), "\u{FFFD}");
    }
}
