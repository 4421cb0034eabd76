//! Purpose: Wire shapes for the push surface and the request/response success envelope.
//! Exports: `ClientMessage`, `MessageType`, `Frame`, `decode_message`, `ok_envelope`.
//! Role: Single place where inbound text is decoded and outbound JSON is shaped.
//! Invariants: All push frames share `{type, event?, data | code+message}`.
//! Invariants: Data frames carry payloads unprojected.
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Reauthorize,
    Other(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientMessage {
    pub kind: MessageType,
    pub event: Option<String>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event: Option<String>,
}

pub fn decode_message(raw: &str) -> Result<ClientMessage, Error> {
    let message: RawMessage = serde_json::from_str(raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("malformed message: {err}"))
            .with_source(err)
    })?;
    let kind = match message.kind.as_str() {
        "subscribe" => MessageType::Subscribe,
        "unsubscribe" => MessageType::Unsubscribe,
        "reauthorize" => MessageType::Reauthorize,
        _ => MessageType::Other(message.kind),
    };
    Ok(ClientMessage {
        kind,
        event: message.event,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    SubscribeAck {
        event: String,
    },
    UnsubscribeAck {
        event: String,
    },
    Data {
        event: String,
        data: Value,
    },
    Error {
        code: u16,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}

impl Frame {
    pub fn data(event: &str, data: Value) -> Self {
        Frame::Data {
            event: event.to_string(),
            data,
        }
    }

    pub fn error(err: &Error, event: Option<&str>) -> Self {
        Frame::Error {
            code: err.kind().code(),
            message: err.public_message(),
            event: event.map(str::to_string),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":500,"message":"Internal Server Error"}"#.to_string()
        })
    }
}

/// `{status:"ok"}` with optional `data`.
pub fn ok_envelope(data: Option<Value>) -> Value {
    match data {
        Some(data) => json!({ "status": "ok", "data": data }),
        None => json!({ "status": "ok" }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Frame, MessageType, decode_message};
    use crate::core::error::{Error, ErrorKind};
    use serde_json::{Value, json};

    #[test]
    fn decodes_known_types() {
        let msg = decode_message(r#"{"type":"subscribe","event":"/a/b/"}"#).expect("decode");
        assert_eq!(msg.kind, MessageType::Subscribe);
        assert_eq!(msg.event.as_deref(), Some("/a/b/"));
        let msg = decode_message(r#"{"type":"reauthorize"}"#).expect("decode");
        assert_eq!(msg.kind, MessageType::Reauthorize);
        assert_eq!(msg.event, None);
    }

    #[test]
    fn unknown_type_is_preserved() {
        let msg = decode_message(r#"{"type":"ping","event":"/a/b/"}"#).expect("decode");
        assert_eq!(msg.kind, MessageType::Other("ping".to_string()));
    }

    #[test]
    fn undecodable_input_is_usage_error() {
        for raw in ["not json", "{}", r#"{"type": 3}"#, "[]"] {
            let err = decode_message(raw).expect_err(raw);
            assert_eq!(err.kind(), ErrorKind::Usage);
            assert!(err.message().unwrap_or_default().starts_with("malformed message"));
        }
    }

    #[test]
    fn frames_serialize_to_envelope_shape() {
        let ack: Value = serde_json::from_str(
            &Frame::SubscribeAck {
                event: "/a/b/".to_string(),
            }
            .to_json(),
        )
        .expect("json");
        assert_eq!(ack, json!({"type": "subscribeAck", "event": "/a/b/"}));

        let data: Value =
            serde_json::from_str(&Frame::data("/a/b/", json!([1])).to_json()).expect("json");
        assert_eq!(data, json!({"type": "data", "event": "/a/b/", "data": [1]}));

        let err = Error::new(ErrorKind::NotImplemented);
        let frame: Value =
            serde_json::from_str(&Frame::error(&err, None).to_json()).expect("json");
        assert_eq!(
            frame,
            json!({"type": "error", "code": 501, "message": "Not Implemented"})
        );
    }
}
