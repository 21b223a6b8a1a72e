use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events a connected client sends to the node.
///
/// Offer, answer and candidate payloads are opaque blobs: the node routes
/// them to the named peer without looking inside.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    // 1. Handshake: claim an identifier before anything else
    Register { identifier: String },

    // 2. Call setup and teardown
    Invite { target: String, offer: Value },
    Accept { peer: String, answer: Value },
    Decline { peer: String },
    Candidate { peer: String, candidate: Value },
    Hangup { peer: String },
}

/// Events the node pushes to a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    // Registration outcome
    Registered { identifier: String },
    Rejected { reason: String },

    /// Everyone currently online except the recipient, in registration
    /// order. Pushed to all endpoints on every membership change.
    Presence { peers: Vec<String> },

    // Call signaling, tagged with the sending identifier
    IncomingInvite { from: String, offer: Value },
    InviteAccepted { from: String, answer: Value },
    InviteDeclined { from: String },
    Candidate { from: String, candidate: Value },
    CallEnded { peer: String, reason: EndReason },

    /// Structured failure for a request that could not be carried out.
    Error { code: String, message: String },
}

/// Why a call left the active set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    Hangup,
    Declined,
    PeerDisconnected,
    InviteExpired,
    PeerUnreachable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_events_use_tagged_wire_shape() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"REGISTER","payload":{"identifier":"alice"}}"#)
                .unwrap();
        assert_eq!(
            event,
            ClientEvent::Register {
                identifier: "alice".into()
            }
        );

        let invite = ClientEvent::Invite {
            target: "bob".into(),
            offer: json!({"sdp": "offer1"}),
        };
        let text = serde_json::to_string(&invite).unwrap();
        assert!(text.contains(r#""type":"INVITE""#));
        assert!(text.contains(r#""sdp":"offer1""#));
    }

    #[test]
    fn server_events_carry_sender_attribution() {
        let event = ServerEvent::Candidate {
            from: "alice".into(),
            candidate: json!({"ip": "10.0.0.1"}),
        };
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains(r#""type":"CANDIDATE""#));
        assert!(text.contains(r#""from":"alice""#));
    }

    #[test]
    fn end_reasons_serialize_screaming() {
        let text = serde_json::to_string(&EndReason::PeerDisconnected).unwrap();
        assert_eq!(text, r#""PEER_DISCONNECTED""#);
    }

    #[test]
    fn opaque_payloads_round_trip_untouched() {
        let payload = json!({"sdp": "v=0\r\no=- 42 2 IN IP4 127.0.0.1", "nested": {"k": [1, 2]}});
        let event = ServerEvent::IncomingInvite {
            from: "bob".into(),
            offer: payload.clone(),
        };
        let text = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(
            back,
            ServerEvent::IncomingInvite {
                from: "bob".into(),
                offer: payload
            }
        );
    }
}
