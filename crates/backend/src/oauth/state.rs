//! The OAuth `state` parameter codec.
//!
//! The current encoding is a JSON object `{"accountId": "...",
//! "autoConnect": bool, "fromSettings": bool}`. Older clients sent a bare
//! account id string; that form is still accepted on decode (with a
//! deprecation warning) because we cannot prove it is dead, but is never
//! emitted. Decoding happens exactly once, at the callback boundary.

use serde::{Deserialize, Serialize};

/// Decoded contents of the connect-flow `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectState {
    pub account_id: String,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub from_settings: bool,
}

impl ConnectState {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            auto_connect: false,
            from_settings: false,
        }
    }

    /// Encode for the authorize redirect. Always emits the JSON form.
    pub fn encode(&self) -> String {
        // Serialization of this struct cannot fail.
        serde_json::to_string(self).expect("state serialization")
    }

    /// Decode a callback `state` parameter.
    ///
    /// Returns `None` for empty input or a JSON object without an
    /// `accountId`.
    pub fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.starts_with('{') {
            return match serde_json::from_str::<ConnectState>(raw) {
                Ok(state) if !state.account_id.is_empty() => Some(state),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Malformed JSON state parameter: {}", e);
                    None
                }
            };
        }

        // Legacy: a bare account id string.
        tracing::warn!(
            "Deprecated bare-string OAuth state received (account {}); \
             clients should send the JSON form",
            raw
        );
        Some(ConnectState::new(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_state() {
        let state = ConnectState::decode(r#"{"accountId":"acc1","autoConnect":true}"#).unwrap();
        assert_eq!(state.account_id, "acc1");
        assert!(state.auto_connect);
        assert!(!state.from_settings);
    }

    #[test]
    fn decodes_legacy_bare_string_identically_to_json() {
        let legacy = ConnectState::decode("acc1").unwrap();
        let json = ConnectState::decode(r#"{"accountId":"acc1"}"#).unwrap();
        assert_eq!(legacy, json);
        assert!(!legacy.auto_connect);
    }

    #[test]
    fn round_trips_through_encode() {
        let state = ConnectState {
            account_id: "acc42".to_string(),
            auto_connect: true,
            from_settings: true,
        };
        assert_eq!(ConnectState::decode(&state.encode()), Some(state));
    }

    #[test]
    fn encode_emits_camel_case_json() {
        let encoded = ConnectState::new("acc1").encode();
        assert!(encoded.contains("\"accountId\":\"acc1\""));
        assert!(encoded.contains("\"autoConnect\":false"));
    }

    #[test]
    fn rejects_empty_and_missing_account() {
        assert_eq!(ConnectState::decode(""), None);
        assert_eq!(ConnectState::decode("   "), None);
        assert_eq!(ConnectState::decode(r#"{"autoConnect":true}"#), None);
        assert_eq!(ConnectState::decode(r#"{"accountId":""}"#), None);
    }

    #[test]
    fn malformed_json_is_not_treated_as_legacy() {
        assert_eq!(ConnectState::decode(r#"{"accountId":"#), None);
    }
}
