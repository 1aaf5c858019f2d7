use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription key that receives every inbound envelope in full.
pub const WILDCARD: &str = "*";

static NULL: Value = Value::Null;

/// Wire envelope shared by both directions of a channel.
///
/// `data` is omitted from the encoded form when it is `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Dispatch key, sent as `type`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Builds an envelope; a missing payload encodes as no `data` field.
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data: data.unwrap_or(Value::Null),
        }
    }

    /// Decodes one text frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encodes the envelope as a single text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Inbound frame parsed as JSON but not yet validated against any schema.
///
/// The full parsed value is kept so wildcard subscribers see exactly what the
/// server sent, extra fields included.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    raw: Value,
}

impl InboundFrame {
    /// Parses a text frame. Anything that is valid JSON is accepted.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(|raw| Self { raw })
    }

    /// Dispatch key, when the frame carries a string `type` field.
    pub fn message_type(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }

    /// Payload of the frame; `null` when absent.
    pub fn data(&self) -> &Value {
        self.raw.get("data").unwrap_or(&NULL)
    }

    /// The whole envelope as received.
    pub fn envelope(&self) -> &Value {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Envelope, InboundFrame};

    #[test]
    fn envelope_without_data_omits_the_field() {
        let text = Envelope::new("ping", None).to_text().expect("encode");
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn envelope_with_data_encodes_type_and_data() {
        let text = Envelope::new("subscribe", Some(json!({"codes":["005930"]})))
            .to_text()
            .expect("encode");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value, json!({"type":"subscribe","data":{"codes":["005930"]}}));
    }

    #[test]
    fn envelope_decode_defaults_missing_data_to_null() {
        let envelope = Envelope::from_text(r#"{"type":"heartbeat"}"#).expect("decode");
        assert_eq!(envelope.kind, "heartbeat");
        assert!(envelope.data.is_null());
    }

    #[test]
    fn inbound_frame_exposes_type_data_and_full_envelope() {
        let frame =
            InboundFrame::parse(r#"{"type":"price_update","data":{"price":71200},"seq":9}"#)
                .expect("parse");
        assert_eq!(frame.message_type(), Some("price_update"));
        assert_eq!(frame.data(), &json!({"price":71200}));
        assert_eq!(frame.envelope()["seq"], json!(9));
    }

    #[test]
    fn inbound_frame_without_string_type_has_no_dispatch_key() {
        let frame = InboundFrame::parse(r#"{"type":7,"data":1}"#).expect("parse");
        assert_eq!(frame.message_type(), None);

        let frame = InboundFrame::parse("[1,2,3]").expect("parse");
        assert_eq!(frame.message_type(), None);
        assert!(frame.data().is_null());
    }

    #[test]
    fn inbound_frame_rejects_non_json() {
        assert!(InboundFrame::parse("not json").is_err());
    }
}
