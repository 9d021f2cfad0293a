use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

/// Source type accepted by the adaptation service.
pub const SOURCE_TYPE_TEXT: &str = "text";
/// Proficiency level used when the caller does not pick one.
pub const DEFAULT_LEVEL: &str = "B1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Token {
        #[serde(default)]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Error {
        #[serde(default)]
        data: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Adaptation request carried as the init payload of a session.
///
/// The service owns this schema; sessions treat the serialized value as
/// opaque. `init_data` is the signed identity credential and is redacted
/// from `Debug` output.
#[derive(Clone, Debug, Serialize)]
pub struct AdaptRequest {
    #[serde(serialize_with = "serialize_secret")]
    pub init_data: SecretString,
    pub source_type: String,
    pub payload: String,
    pub level: String,
}

impl AdaptRequest {
    /// Builds a text adaptation request at the default level.
    pub fn text(init_data: SecretString, payload: impl Into<String>) -> Self {
        Self {
            init_data,
            source_type: SOURCE_TYPE_TEXT.to_string(),
            payload: payload.into(),
            level: DEFAULT_LEVEL.to_string(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Converts the request into the opaque init payload.
    pub fn into_init(self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_encodes_as_bare_type_marker() {
        assert_eq!(ClientMessage::Ping.to_text().expect("encode"), r#"{"type":"ping"}"#);
    }

    #[test]
    fn token_frame_with_sequence_decodes() {
        let msg = ServerMessage::from_text(r#"{"type":"token","data":"Hello","seq":3}"#)
            .expect("decode");
        assert_eq!(
            msg,
            ServerMessage::Token {
                data: Some("Hello".to_string()),
                seq: Some(3),
            }
        );
    }

    #[test]
    fn null_and_missing_data_decode_as_none() {
        let null = ServerMessage::from_text(r#"{"type":"token","data":null,"seq":null}"#)
            .expect("decode null");
        let missing = ServerMessage::from_text(r#"{"type":"error"}"#).expect("decode missing");
        assert_eq!(null, ServerMessage::Token { data: None, seq: None });
        assert_eq!(missing, ServerMessage::Error { data: None });
    }

    #[test]
    fn start_and_end_markers_are_accepted() {
        let start = ServerMessage::from_text(r#"{"type":"start","data":"stream-begin","seq":null}"#)
            .expect("decode start");
        let end = ServerMessage::from_text(r#"{"type":"end","data":"stream-end","seq":12}"#)
            .expect("decode end");
        assert!(matches!(start, ServerMessage::Start { .. }));
        assert!(matches!(end, ServerMessage::End { seq: Some(12), .. }));
    }

    #[test]
    fn unrecognized_type_decodes_as_unknown() {
        let msg = ServerMessage::from_text(r#"{"type":"progress","data":"50%"}"#).expect("decode");
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn malformed_frames_fail_to_decode() {
        assert!(ServerMessage::from_text("not-json").is_err());
        assert!(ServerMessage::from_text(r#"{"data":"no type"}"#).is_err());
        assert!(ServerMessage::from_text("[1,2,3]").is_err());
    }

    #[test]
    fn adapt_request_exposes_credential_only_on_the_wire() {
        let request = AdaptRequest::text(
            SecretString::new("query_id=1&hash=abc".to_string()),
            "Some article text",
        )
        .with_level("A2");

        let debug = format!("{request:?}");
        assert!(!debug.contains("hash=abc"));

        let init = request.into_init().expect("serialize");
        assert_eq!(init["init_data"], "query_id=1&hash=abc");
        assert_eq!(init["source_type"], "text");
        assert_eq!(init["payload"], "Some article text");
        assert_eq!(init["level"], "A2");
    }
}
