//! Handshake message construction.

use beacon_messages::{Handshake, Message};

use crate::NODE_VERSION;

/// Authentication material attached to an outbound handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthChallenge {
    pub auth_token: String,
    pub challenge: String,
    /// The timestamp the token was computed over.
    pub timestamp: f64,
}

/// Build a `handshake_init` (`response == false`) or `handshake_response`.
///
/// With an [`AuthChallenge`] the message carries the challenge's own
/// timestamp, so the token stays verifiable on the other side.
pub fn handshake_message(
    response: bool,
    node_uuid: &str,
    now: f64,
    auth: Option<AuthChallenge>,
) -> Message {
    let mut body = Handshake {
        uuid: node_uuid.to_string(),
        node_version: Some(NODE_VERSION.to_string()),
        timestamp: Some(now),
        auth_token: None,
        challenge: None,
    };
    if let Some(auth) = auth {
        body.timestamp = Some(auth.timestamp);
        body.auth_token = Some(auth.auth_token);
        body.challenge = Some(auth.challenge);
    }

    if response {
        Message::HandshakeResponse(body)
    } else {
        Message::HandshakeInit(body)
    }
}
