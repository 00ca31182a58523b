//! The relay's wire message.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::tag;
use crate::error::Result;

/// One JSON frame on the wire, discriminated by its `type` field.
///
/// String fields that are absent or `null` decode as empty strings, so
/// completeness checks only need to test for emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "AGENT_REGISTER")]
    Register {
        #[serde(default, deserialize_with = "null_as_empty")]
        agent_id: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        auth_token: String,
    },

    #[serde(rename = "AGENT_MESSAGE")]
    Direct {
        #[serde(default, deserialize_with = "null_as_empty")]
        sender_id: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        receiver_id: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },

    #[serde(rename = "BROADCAST_MESSAGE")]
    Broadcast {
        #[serde(default, deserialize_with = "null_as_empty")]
        sender_id: String,
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },

    #[serde(rename = "LIST_AGENTS_REQUEST")]
    ListRequest {
        #[serde(default, deserialize_with = "null_as_empty")]
        sender_id: String,
    },

    #[serde(rename = "LIST_AGENTS_RESPONSE")]
    ListResponse {
        #[serde(default)]
        agents: Vec<String>,
        #[serde(default, deserialize_with = "null_as_empty")]
        requester_id: String,
    },

    #[serde(rename = "SERVER_INFO")]
    ServerInfo {
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },

    #[serde(rename = "SERVER_ERROR")]
    ServerError {
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Envelope {
    pub fn register(agent_id: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self::Register {
            agent_id: agent_id.into(),
            auth_token: auth_token.into(),
        }
    }

    pub fn direct(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Direct {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
        }
    }

    pub fn broadcast(sender_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Broadcast {
            sender_id: sender_id.into(),
            content: content.into(),
        }
    }

    pub fn list_request(sender_id: impl Into<String>) -> Self {
        Self::ListRequest {
            sender_id: sender_id.into(),
        }
    }

    pub fn list_response(agents: Vec<String>, requester_id: impl Into<String>) -> Self {
        Self::ListResponse {
            agents,
            requester_id: requester_id.into(),
        }
    }

    pub fn server_info(content: impl Into<String>) -> Self {
        Self::ServerInfo {
            content: content.into(),
        }
    }

    pub fn server_error(content: impl Into<String>) -> Self {
        Self::ServerError {
            content: content.into(),
        }
    }

    /// The `type` discriminator this envelope serializes with.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Register { .. } => tag::REGISTER,
            Self::Direct { .. } => tag::DIRECT,
            Self::Broadcast { .. } => tag::BROADCAST,
            Self::ListRequest { .. } => tag::LIST_REQUEST,
            Self::ListResponse { .. } => tag::LIST_RESPONSE,
            Self::ServerInfo { .. } => tag::SERVER_INFO,
            Self::ServerError { .. } => tag::SERVER_ERROR,
        }
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Why an inbound frame could not be turned into an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// Parse a text frame.
///
/// Objects with a missing or unrecognized `type` are [`ParseError::UnknownType`];
/// anything that is not a well-typed JSON object is [`ParseError::InvalidFormat`].
pub fn parse_frame(text: &str) -> std::result::Result<Envelope, ParseError> {
    parse_frame_of(text, &tag::ALL)
}

/// Parse a text frame whose `type` must be one of `accepted`.
///
/// Any other tag, known or not, is [`ParseError::UnknownType`] whatever the
/// rest of the object holds.
pub fn parse_frame_of(
    text: &str,
    accepted: &[&str],
) -> std::result::Result<Envelope, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidFormat("frame is not a JSON object".to_string()))?;

    match object.get("type") {
        Some(Value::String(t)) if accepted.contains(&t.as_str()) => {}
        Some(Value::String(t)) => return Err(ParseError::UnknownType(t.clone())),
        Some(other) => return Err(ParseError::UnknownType(other.to_string())),
        None => return Err(ParseError::UnknownType("<missing>".to_string())),
    }

    serde_json::from_value(value).map_err(|e| ParseError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_wire_shape() {
        let frame = Envelope::register("alice", "secret").to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "AGENT_REGISTER");
        assert_eq!(value["agent_id"], "alice");
        assert_eq!(value["auth_token"], "secret");
    }

    #[test]
    fn test_parse_direct() {
        let env = parse_frame(
            r#"{"type":"AGENT_MESSAGE","sender_id":"alice","receiver_id":"bob","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(env, Envelope::direct("alice", "bob", "hi"));
        assert_eq!(env.tag(), tag::DIRECT);
    }

    #[test]
    fn test_missing_and_null_fields_are_empty() {
        let env = parse_frame(r#"{"type":"BROADCAST_MESSAGE","sender_id":null}"#).unwrap();
        assert_eq!(env, Envelope::broadcast("", ""));

        let env = parse_frame(r#"{"type":"AGENT_REGISTER"}"#).unwrap();
        assert_eq!(env, Envelope::register("", ""));
    }

    #[test]
    fn test_unknown_type() {
        let err = parse_frame(r#"{"type":"PING"}"#).unwrap_err();
        assert_eq!(err, ParseError::UnknownType("PING".to_string()));

        let err = parse_frame(r#"{"content":"no type"}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownType(_)));

        let err = parse_frame(r#"{"type":42}"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownType(_)));
    }

    #[test]
    fn test_restricted_tags() {
        // A server-only tag is unknown to agents even when its fields are ill-typed.
        let err = parse_frame_of(r#"{"type":"SERVER_INFO","content":5}"#, &tag::ROUTABLE)
            .unwrap_err();
        assert_eq!(err, ParseError::UnknownType("SERVER_INFO".to_string()));

        let err = parse_frame_of(r#"{"type":"AGENT_REGISTER"}"#, &tag::ROUTABLE).unwrap_err();
        assert_eq!(err, ParseError::UnknownType("AGENT_REGISTER".to_string()));

        let env = parse_frame_of(r#"{"type":"LIST_AGENTS_REQUEST"}"#, &tag::ROUTABLE).unwrap();
        assert_eq!(env, Envelope::list_request(""));

        assert!(matches!(
            parse_frame_of(r#"{"type":"AGENT_MESSAGE","content":7}"#, &tag::ROUTABLE),
            Err(ParseError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(
            parse_frame("not json").unwrap_err(),
            ParseError::InvalidFormat(_)
        ));
        assert!(matches!(
            parse_frame(r#"["AGENT_MESSAGE"]"#).unwrap_err(),
            ParseError::InvalidFormat(_)
        ));
        // Known tag but a field of the wrong JSON type.
        assert!(matches!(
            parse_frame(r#"{"type":"AGENT_MESSAGE","content":7}"#).unwrap_err(),
            ParseError::InvalidFormat(_)
        ));
    }

    #[test]
    fn test_list_response_shape() {
        let frame = Envelope::list_response(vec!["alice".into(), "bob".into()], "bob")
            .to_frame()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "LIST_AGENTS_RESPONSE");
        assert_eq!(value["agents"], serde_json::json!(["alice", "bob"]));
        assert_eq!(value["requester_id"], "bob");
    }
}
