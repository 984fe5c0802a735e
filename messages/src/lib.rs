//! Network message types for beacon node-to-node communication.
//!
//! Every message is a JSON object whose `type` field selects the variant.
//! [`Message`] is the typed view; inbound traffic is kept as a raw
//! [`serde_json::Value`] until the security checks that need the exact wire
//! form (signatures, auth timestamps) have run.

use beacon_types::{
    deserialize_optional_user_id, deserialize_user_id, empty_object, GunbanEvent, PeerAddress,
    SpammerRecord, LEGACY_SOURCE,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Wire names of every message type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    HandshakeInit,
    HandshakeResponse,
    CheckP2pData,
    CheckP2pDataResponse,
    SpammerInfoBroadcast,
    /// Legacy removal message, handled as a gunban.
    SpammerInfoRemoval,
    /// Legacy unban message, handled as a gunban.
    Unban,
    Gunban,
    Unknown(String),
}

impl MessageType {
    pub fn parse(name: &str) -> Self {
        match name {
            "handshake_init" => MessageType::HandshakeInit,
            "handshake_response" => MessageType::HandshakeResponse,
            "check_p2p_data" => MessageType::CheckP2pData,
            "check_p2p_data_response" => MessageType::CheckP2pDataResponse,
            "spammer_info_broadcast" => MessageType::SpammerInfoBroadcast,
            "spammer_info_removal" => MessageType::SpammerInfoRemoval,
            "unban" => MessageType::Unban,
            "gunban" => MessageType::Gunban,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    /// The `type` field of a raw message; a missing or non-string field reads
    /// as `"unknown"`.
    pub fn of(value: &Value) -> Self {
        Self::parse(value.get("type").and_then(Value::as_str).unwrap_or("unknown"))
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::HandshakeInit => "handshake_init",
            MessageType::HandshakeResponse => "handshake_response",
            MessageType::CheckP2pData => "check_p2p_data",
            MessageType::CheckP2pDataResponse => "check_p2p_data_response",
            MessageType::SpammerInfoBroadcast => "spammer_info_broadcast",
            MessageType::SpammerInfoRemoval => "spammer_info_removal",
            MessageType::Unban => "unban",
            MessageType::Gunban => "gunban",
            MessageType::Unknown(name) => name,
        }
    }

    /// Handshake messages are exempt from the authenticated-node check.
    pub fn is_handshake(&self) -> bool {
        matches!(self, MessageType::HandshakeInit | MessageType::HandshakeResponse)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level peer message. The variant is carried in the `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    HandshakeInit(Handshake),
    HandshakeResponse(Handshake),
    CheckP2pData(CheckP2pData),
    CheckP2pDataResponse(CheckP2pDataResponse),
    SpammerInfoBroadcast(SpammerInfoBroadcast),
    SpammerInfoRemoval(SpammerInfoRemoval),
    Unban(Unban),
    Gunban(Gunban),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::HandshakeInit(_) => MessageType::HandshakeInit,
            Message::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Message::CheckP2pData(_) => MessageType::CheckP2pData,
            Message::CheckP2pDataResponse(_) => MessageType::CheckP2pDataResponse,
            Message::SpammerInfoBroadcast(_) => MessageType::SpammerInfoBroadcast,
            Message::SpammerInfoRemoval(_) => MessageType::SpammerInfoRemoval,
            Message::Unban(_) => MessageType::Unban,
            Message::Gunban(_) => MessageType::Gunban,
        }
    }

    /// Typed view of a raw inbound message.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The JSON object sent on the wire, `type` included.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Body of `handshake_init` and `handshake_response`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
}

/// Ask a peer whether it holds a record for `user_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckP2pData {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: String,
}

/// Answer to [`CheckP2pData`]: either the record fields or an `error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckP2pDataResponse {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lols_bot_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_chat_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p2p_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_spammer: Option<bool>,
}

/// Error text of a negative [`CheckP2pDataResponse`].
pub const NO_SPAMMER_DATA: &str = "No spammer data found";

impl CheckP2pDataResponse {
    /// Positive answer; `p2p_data` is derived when the record has none.
    pub fn found(record: &SpammerRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            error: None,
            lols_bot_data: Some(record.lols_bot_data.clone()),
            cas_chat_data: Some(record.cas_chat_data.clone()),
            p2p_data: Some(record.p2p_data_or_derived()),
            is_spammer: Some(record.is_spammer),
        }
    }

    pub fn not_found(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            error: Some(NO_SPAMMER_DATA.to_string()),
            lols_bot_data: None,
            cas_chat_data: None,
            p2p_data: None,
            is_spammer: None,
        }
    }

    /// The record carried by a positive answer.
    pub fn into_record(self) -> Option<SpammerRecord> {
        if self.error.is_some() {
            return None;
        }
        Some(SpammerRecord {
            user_id: self.user_id,
            lols_bot_data: self.lols_bot_data.unwrap_or_else(empty_object),
            cas_chat_data: self.cas_chat_data.unwrap_or_else(empty_object),
            p2p_data: self.p2p_data.unwrap_or_else(empty_object),
            is_spammer: self.is_spammer.unwrap_or(false),
        })
    }
}

/// `spammer_info_broadcast`: a spammer record, or a list of peer addresses.
///
/// A payload with a `user_id` is a record; one without a `user_id` but with
/// `peers` is a peer-list update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpammerInfoBroadcast {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_user_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default = "empty_object")]
    pub lols_bot_data: Value,
    #[serde(default = "empty_object")]
    pub cas_chat_data: Value,
    #[serde(default = "empty_object")]
    pub p2p_data: Value,
    #[serde(default)]
    pub is_spammer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerAddress>>,
}

impl SpammerInfoBroadcast {
    pub fn from_record(record: &SpammerRecord) -> Self {
        Self {
            user_id: Some(record.user_id.clone()),
            lols_bot_data: record.lols_bot_data.clone(),
            cas_chat_data: record.cas_chat_data.clone(),
            p2p_data: record.p2p_data.clone(),
            is_spammer: record.is_spammer,
            peers: None,
        }
    }

    pub fn peer_list(peers: Vec<PeerAddress>) -> Self {
        Self {
            user_id: None,
            lols_bot_data: empty_object(),
            cas_chat_data: empty_object(),
            p2p_data: empty_object(),
            is_spammer: false,
            peers: Some(peers),
        }
    }

    /// The record carried by this broadcast, if it names a user.
    pub fn record(&self) -> Option<SpammerRecord> {
        let user_id = self.user_id.clone()?;
        Some(SpammerRecord {
            user_id,
            lols_bot_data: self.lols_bot_data.clone(),
            cas_chat_data: self.cas_chat_data.clone(),
            p2p_data: self.p2p_data.clone(),
            is_spammer: self.is_spammer,
        })
    }
}

/// `gunban`: retract a record network-wide.
///
/// Both identifiers are optional on the wire so that an incomplete message can
/// be reported rather than failing to decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gunban {
    #[serde(default, deserialize_with = "deserialize_optional_user_id")]
    pub spammer_id: Option<String>,
    #[serde(default)]
    pub source_node_uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl Gunban {
    pub fn from_event(event: &GunbanEvent) -> Self {
        Self {
            spammer_id: Some(event.spammer_id.clone()),
            source_node_uuid: Some(event.source_node_uuid.clone()),
            timestamp: Some(event.timestamp),
        }
    }
}

/// Legacy `unban`; the source defaults to [`LEGACY_SOURCE`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unban {
    #[serde(default, deserialize_with = "deserialize_optional_user_id")]
    pub spammer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_uuid: Option<String>,
}

/// Legacy `spammer_info_removal`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpammerInfoRemoval {
    #[serde(default, deserialize_with = "deserialize_optional_user_id")]
    pub user_id: Option<String>,
}

/// Why an inbound retraction could not be turned into a [`GunbanEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingField {
    SpammerId,
    SourceNodeUuid,
    UserId,
}

impl MissingField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingField::SpammerId => "spammer_id",
            MissingField::SourceNodeUuid => "source_node_uuid",
            MissingField::UserId => "user_id",
        }
    }
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Gunban {
    /// Both identifiers are required; the timestamp defaults to `now`.
    pub fn into_event(self, now: f64) -> Result<GunbanEvent, MissingField> {
        let spammer_id = non_empty(self.spammer_id).ok_or(MissingField::SpammerId)?;
        let source = non_empty(self.source_node_uuid).ok_or(MissingField::SourceNodeUuid)?;
        Ok(GunbanEvent::new(spammer_id, source, self.timestamp.unwrap_or(now)))
    }
}

impl Unban {
    pub fn into_event(self, now: f64) -> Result<GunbanEvent, MissingField> {
        let spammer_id = non_empty(self.spammer_id).ok_or(MissingField::SpammerId)?;
        let source = non_empty(self.source_node_uuid).unwrap_or_else(|| LEGACY_SOURCE.to_string());
        Ok(GunbanEvent::new(spammer_id, source, now))
    }
}

impl SpammerInfoRemoval {
    pub fn into_event(self, now: f64) -> Result<GunbanEvent, MissingField> {
        let user_id = non_empty(self.user_id).ok_or(MissingField::UserId)?;
        Ok(GunbanEvent::new(user_id, LEGACY_SOURCE, now))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_names_round_trip_through_parse() {
        for name in [
            "handshake_init",
            "handshake_response",
            "check_p2p_data",
            "check_p2p_data_response",
            "spammer_info_broadcast",
            "spammer_info_removal",
            "unban",
            "gunban",
        ] {
            assert_eq!(MessageType::parse(name).as_str(), name);
            assert!(!matches!(MessageType::parse(name), MessageType::Unknown(_)));
        }
        assert_eq!(MessageType::parse("ping"), MessageType::Unknown("ping".into()));
    }

    #[test]
    fn type_of_raw_message_defaults_to_unknown() {
        assert_eq!(MessageType::of(&json!({"type": "gunban"})), MessageType::Gunban);
        assert_eq!(MessageType::of(&json!({})), MessageType::Unknown("unknown".into()));
        assert_eq!(MessageType::of(&json!({"type": 3})), MessageType::Unknown("unknown".into()));
    }

    #[test]
    fn handshake_serializes_with_type_and_without_empty_auth() {
        let msg = Message::HandshakeInit(Handshake {
            uuid: "node-a".into(),
            node_version: Some("1.0.0".into()),
            timestamp: Some(1718000000.5),
            auth_token: None,
            challenge: None,
        });
        assert_eq!(
            msg.to_value().unwrap(),
            json!({
                "type": "handshake_init",
                "uuid": "node-a",
                "node_version": "1.0.0",
                "timestamp": 1718000000.5,
            })
        );
    }

    #[test]
    fn handshake_accepts_integer_timestamp() {
        let msg = Message::from_value(json!({"type": "handshake_response", "uuid": "b", "timestamp": 1718000000}))
            .unwrap();
        match msg {
            Message::HandshakeResponse(h) => assert_eq!(h.timestamp, Some(1718000000.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn broadcast_with_user_id_is_a_record() {
        let msg = Message::from_value(json!({
            "type": "spammer_info_broadcast",
            "user_id": 42,
            "lols_bot_data": {"banned": true},
            "is_spammer": true,
        }))
        .unwrap();
        let Message::SpammerInfoBroadcast(b) = msg else {
            panic!("wrong variant")
        };
        let record = b.record().unwrap();
        assert_eq!(record.user_id, "42");
        assert_eq!(record.cas_chat_data, json!({}));
        assert!(record.is_spammer);
    }

    #[test]
    fn broadcast_with_peers_only_is_a_peer_list() {
        let msg = Message::from_value(json!({
            "type": "spammer_info_broadcast",
            "peers": ["10.0.0.2:9828", {"host": "10.0.0.3", "port": 9828}],
        }))
        .unwrap();
        let Message::SpammerInfoBroadcast(b) = msg else {
            panic!("wrong variant")
        };
        assert!(b.record().is_none());
        assert_eq!(b.peers.unwrap().len(), 2);
    }

    #[test]
    fn check_response_not_found_shape() {
        let value = Message::CheckP2pDataResponse(CheckP2pDataResponse::not_found("9"))
            .to_value()
            .unwrap();
        assert_eq!(
            value,
            json!({"type": "check_p2p_data_response", "user_id": "9", "error": "No spammer data found"})
        );
    }

    #[test]
    fn check_response_found_derives_p2p_data() {
        let record = SpammerRecord::flagged("9", json!({"a": 1}), json!({"b": 2}));
        let response = CheckP2pDataResponse::found(&record);
        assert_eq!(
            response.p2p_data,
            Some(json!({"lols_bot_data": {"a": 1}, "cas_chat_data": {"b": 2}}))
        );
        let back = response.into_record().unwrap();
        assert_eq!(back.lols_bot_data, record.lols_bot_data);
        assert!(back.is_spammer);
    }

    #[test]
    fn gunban_requires_both_ids() {
        let missing_source = Gunban {
            spammer_id: Some("1".into()),
            source_node_uuid: None,
            timestamp: Some(5.0),
        };
        assert_eq!(missing_source.into_event(9.0), Err(MissingField::SourceNodeUuid));

        let missing_id = Gunban {
            spammer_id: Some(String::new()),
            source_node_uuid: Some("n".into()),
            timestamp: None,
        };
        assert_eq!(missing_id.into_event(9.0), Err(MissingField::SpammerId));

        let ok = Gunban {
            spammer_id: Some("1".into()),
            source_node_uuid: Some("n".into()),
            timestamp: None,
        };
        assert_eq!(ok.into_event(9.0).unwrap(), GunbanEvent::new("1", "n", 9.0));
    }

    #[test]
    fn legacy_messages_default_to_legacy_source() {
        let unban = Unban {
            spammer_id: Some("1".into()),
            source_node_uuid: None,
        };
        assert_eq!(unban.into_event(1.0).unwrap().source_node_uuid, LEGACY_SOURCE);

        let removal: SpammerInfoRemoval = serde_json::from_value(json!({"user_id": 77})).unwrap();
        let event = removal.into_event(1.0).unwrap();
        assert_eq!(event.spammer_id, "77");
        assert!(event.is_legacy());

        let empty: SpammerInfoRemoval = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.into_event(1.0), Err(MissingField::UserId));
    }
}
