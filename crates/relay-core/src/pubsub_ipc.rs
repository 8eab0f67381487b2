use crate::topics::TopicKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PUBSUB_URL: &str = "wss://pubsub-edge.twitch.tv";

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    Listen {
        #[serde(skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
        data: ListenData,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenData {
    pub topics: Vec<String>,
    pub auth_token: String,
}

/// Frames received from the push stream. Anything with an unknown `type`
/// decodes to `Unknown` instead of failing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    Response {
        #[serde(default)]
        nonce: Option<String>,
        #[serde(default)]
        error: String,
    },
    Message {
        data: MessageData,
    },
    Reconnect,
    Pong,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MessageData {
    pub topic: String,
    /// The event itself, JSON-encoded a second time.
    pub message: String,
}

/// Topics plus credential, sent once per connection before listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    topics: Vec<String>,
    auth_token: String,
}

impl SubscriptionRequest {
    pub fn new(topics: Vec<String>, auth_token: impl Into<String>) -> Self {
        Self {
            topics,
            auth_token: auth_token.into(),
        }
    }

    /// Every dispatchable topic for one channel.
    pub fn for_channel(channel_id: &str, auth_token: impl Into<String>) -> Self {
        let topics = TopicKind::DISPATCH_ORDER
            .iter()
            .map(|kind| kind.topic_for(channel_id))
            .collect();
        Self::new(topics, auth_token)
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn to_frame(&self, nonce: Option<String>) -> OutboundFrame {
        OutboundFrame::Listen {
            nonce,
            data: ListenData {
                topics: self.topics.clone(),
                auth_token: self.auth_token.clone(),
            },
        }
    }
}

pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame(frame: &OutboundFrame) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(|err| WireError::Encode(err.to_string()))
}

pub fn decode_frame(text: &str) -> Result<InboundFrame, WireError> {
    serde_json::from_str(text.trim()).map_err(|err| WireError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::decode_payload;
    use serde_json::Value;

    #[test]
    fn listen_frame_has_expected_shape() {
        let request = SubscriptionRequest::for_channel("1234", "secret");
        let encoded = encode_frame(&request.to_frame(Some("n1".to_string()))).expect("encode");
        let value: Value = serde_json::from_str(&encoded).expect("json");
        assert_eq!(value["type"], "LISTEN");
        assert_eq!(value["nonce"], "n1");
        assert_eq!(value["data"]["auth_token"], "secret");
        let topics = value["data"]["topics"].as_array().expect("topics");
        assert_eq!(topics.len(), 8);
        assert_eq!(topics[0], "channel-bits-events-v2.1234");
        assert_eq!(topics[7], "community-points-channel-v1.1234");
    }

    #[test]
    fn ping_frame_is_bare_type() {
        assert_eq!(
            encode_frame(&OutboundFrame::Ping).expect("encode"),
            r#"{"type":"PING"}"#
        );
    }

    #[test]
    fn decodes_control_frames() {
        assert_eq!(decode_frame(r#"{"type":"PONG"}"#), Ok(InboundFrame::Pong));
        assert_eq!(
            decode_frame(r#"{"type":"RECONNECT"}"#),
            Ok(InboundFrame::Reconnect)
        );
        assert_eq!(
            decode_frame(r#"{"type":"RESPONSE","nonce":"abc","error":""}"#),
            Ok(InboundFrame::Response {
                nonce: Some("abc".to_string()),
                error: String::new(),
            })
        );
        assert_eq!(
            decode_frame(r#"{"type":"SOMETHING_NEW","data":{}}"#),
            Ok(InboundFrame::Unknown)
        );
    }

    #[test]
    fn response_without_error_field_counts_as_success() {
        let frame = decode_frame(r#"{"type":"RESPONSE"}"#).expect("decode");
        assert_eq!(
            frame,
            InboundFrame::Response {
                nonce: None,
                error: String::new(),
            }
        );
    }

    #[test]
    fn message_payload_is_decoded_twice() {
        let raw = r#"{"type":"MESSAGE","data":{"topic":"following.1","message":"{\"username\":\"viewer\",\"user_id\":\"77\"}"}}"#;
        let InboundFrame::Message { data } = decode_frame(raw).expect("decode") else {
            panic!("expected message frame");
        };
        assert_eq!(data.topic, "following.1");
        let inner: Value = decode_payload(&data.message).expect("inner");
        assert_eq!(inner["username"], "viewer");
    }

    #[test]
    fn malformed_frame_is_a_decode_error() {
        assert!(matches!(decode_frame("{not json"), Err(WireError::Decode(_))));
        assert!(matches!(
            decode_frame(r#"{"type":"MESSAGE"}"#),
            Err(WireError::Decode(_))
        ));
    }
}
