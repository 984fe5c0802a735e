//! Spammer records, the value type gossiped between nodes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A flagged identity as stored locally and exchanged with peers.
///
/// Records are compared by structural equality: a broadcast that matches the
/// stored record field-for-field is neither written nor relayed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpammerRecord {
    #[serde(deserialize_with = "deserialize_user_id")]
    pub user_id: String,
    #[serde(default = "empty_object")]
    pub lols_bot_data: Value,
    #[serde(default = "empty_object")]
    pub cas_chat_data: Value,
    #[serde(default = "empty_object")]
    pub p2p_data: Value,
    #[serde(default)]
    pub is_spammer: bool,
}

impl SpammerRecord {
    /// A record with empty data blobs and the flag cleared.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            lols_bot_data: empty_object(),
            cas_chat_data: empty_object(),
            p2p_data: empty_object(),
            is_spammer: false,
        }
    }

    /// A flagged record carrying the given reputation payloads.
    pub fn flagged(user_id: impl Into<String>, lols_bot_data: Value, cas_chat_data: Value) -> Self {
        Self {
            lols_bot_data,
            cas_chat_data,
            is_spammer: true,
            ..Self::new(user_id)
        }
    }

    /// The `p2p_data` blob, or one assembled from the other two payloads when
    /// the stored record never received any.
    pub fn p2p_data_or_derived(&self) -> Value {
        if is_blank(&self.p2p_data) {
            let mut derived = Map::new();
            derived.insert("lols_bot_data".into(), self.lols_bot_data.clone());
            derived.insert("cas_chat_data".into(), self.cas_chat_data.clone());
            Value::Object(derived)
        } else {
            self.p2p_data.clone()
        }
    }
}

/// `{}`, the default for every JSON payload field.
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Accept a user identifier encoded either as a JSON string or an integer.
///
/// Chat platforms hand out numeric ids; older peers serialize them as numbers.
pub fn deserialize_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

/// Like [`deserialize_user_id`], for fields that may be absent or `null`.
pub fn deserialize_optional_user_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize_user_id")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(id)| id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_payloads_default_to_empty_objects() {
        let record: SpammerRecord = serde_json::from_value(json!({"user_id": "42"})).unwrap();
        assert_eq!(record, SpammerRecord::new("42"));
    }

    #[test]
    fn numeric_user_id_is_accepted() {
        let record: SpammerRecord =
            serde_json::from_value(json!({"user_id": 5_000_000_001_u64, "is_spammer": true}))
                .unwrap();
        assert_eq!(record.user_id, "5000000001");
        assert!(record.is_spammer);
    }

    #[test]
    fn optional_user_id_accepts_null_and_numbers() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "deserialize_optional_user_id")]
            user_id: Option<String>,
        }

        let probe: Probe = serde_json::from_value(json!({"user_id": 12})).unwrap();
        assert_eq!(probe.user_id.as_deref(), Some("12"));
        let probe: Probe = serde_json::from_value(json!({"user_id": null})).unwrap();
        assert_eq!(probe.user_id, None);
        let probe: Probe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(probe.user_id, None);
    }

    #[test]
    fn equality_is_field_by_field() {
        let a = SpammerRecord::flagged("7", json!({"ok": true}), json!({}));
        let mut b = a.clone();
        assert_eq!(a, b);
        b.cas_chat_data = json!({"offenses": 3});
        assert_ne!(a, b);
    }

    #[test]
    fn derived_p2p_data_wraps_other_payloads() {
        let record = SpammerRecord::flagged("7", json!({"banned": true}), json!({"offenses": 1}));
        assert_eq!(
            record.p2p_data_or_derived(),
            json!({"lols_bot_data": {"banned": true}, "cas_chat_data": {"offenses": 1}})
        );
    }

    #[test]
    fn explicit_p2p_data_is_kept() {
        let mut record = SpammerRecord::new("7");
        record.p2p_data = json!({"source": "peer"});
        assert_eq!(record.p2p_data_or_derived(), json!({"source": "peer"}));
    }
}
