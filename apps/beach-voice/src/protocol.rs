use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SDP_MID: &str = "audio";
pub const OFFER_FAILED_MESSAGE: &str = "Failed to handle offer";

/// Messages sent from the browser client over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for a short-lived credential for the realtime API.
    RequestEphemeralKey,
    /// Remote session description to answer.
    Offer { sdp: String },
    /// Remote network candidate for the current negotiation.
    IceCandidate(RemoteCandidate),
    /// Any other `type` value; logged and ignored.
    #[serde(other)]
    Unrecognized,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::RequestEphemeralKey => "request_ephemeral_key",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::IceCandidate(_) => "ice_candidate",
            ClientMessage::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl RemoteCandidate {
    pub fn sdp_mid(&self) -> &str {
        self.sdp_mid.as_deref().unwrap_or(DEFAULT_SDP_MID)
    }

    pub fn sdp_mline_index(&self) -> u16 {
        self.sdp_mline_index.unwrap_or(0)
    }
}

/// Messages sent from the relay back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    EphemeralKey { key: String, expires_at: i64 },
    Answer { sdp: String },
    IceCandidate { candidate: LocalCandidate },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// A candidate discovered by the server-side peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Debug, Error)]
#[error("malformed control message: {0}")]
pub struct ProtocolError(#[from] serde_json::Error);

pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test_timeout::timeout]
    fn decodes_known_message_types() {
        assert_eq!(
            decode(r#"{"type":"request_ephemeral_key"}"#).unwrap(),
            ClientMessage::RequestEphemeralKey
        );
        assert_eq!(
            decode(r#"{"type":"offer","sdp":"v=0\r\n"}"#).unwrap(),
            ClientMessage::Offer {
                sdp: "v=0\r\n".into()
            }
        );
    }

    #[test_timeout::timeout]
    fn ice_candidate_defaults_mid_and_index() {
        let msg = decode(r#"{"type":"ice_candidate","candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host"}"#)
            .unwrap();
        let ClientMessage::IceCandidate(candidate) = msg else {
            panic!("expected ice candidate, got {msg:?}");
        };
        assert_eq!(candidate.sdp_mid(), "audio");
        assert_eq!(candidate.sdp_mline_index(), 0);

        let explicit = decode(
            r#"{"type":"ice_candidate","candidate":"c","sdpMid":"0","sdpMLineIndex":2}"#,
        )
        .unwrap();
        let ClientMessage::IceCandidate(candidate) = explicit else {
            panic!("expected ice candidate");
        };
        assert_eq!(candidate.sdp_mid(), "0");
        assert_eq!(candidate.sdp_mline_index(), 2);
    }

    #[test_timeout::timeout]
    fn unknown_type_is_unrecognized_not_an_error() {
        let msg = decode(r#"{"type":"session.update","foo":1}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unrecognized);
    }

    #[test_timeout::timeout]
    fn malformed_payloads_are_rejected() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"sdp":"v=0"}"#).is_err());
        assert!(decode(r#"{"type":"offer"}"#).is_err());
        assert!(decode(r#"{"type":"ice_candidate","sdpMid":"audio"}"#).is_err());
    }

    #[test_timeout::timeout]
    fn server_messages_use_wire_field_names() {
        let key: Value = serde_json::from_str(
            &encode(&ServerMessage::EphemeralKey {
                key: "abc".into(),
                expires_at: 999,
            })
            .unwrap(),
        )
        .unwrap();
        assert_eq!(key, json!({"type": "ephemeral_key", "key": "abc", "expires_at": 999}));

        let candidate: Value = serde_json::from_str(
            &encode(&ServerMessage::IceCandidate {
                candidate: LocalCandidate {
                    candidate: "candidate:2".into(),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                },
            })
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            candidate,
            json!({
                "type": "ice_candidate",
                "candidate": {"candidate": "candidate:2", "sdpMid": "0", "sdpMLineIndex": 0}
            })
        );
    }
}
