//! Wire frames of the push protocol.

use collegium_activity::{Format, StreamEntry, StreamType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// The mandatory first frame.
    Authentication {
        /// The authenticating user principal.
        user_id: String,
        /// The tenant the socket belongs to.
        tenant_alias: String,
        /// HMAC over `userId#tenantAlias` with the platform key.
        signature: String,
    },
    /// Subscribe to one resource stream.
    Subscribe {
        /// Client-chosen frame id, echoed on ack/error.
        id: Value,
        /// The resource whose stream to join.
        resource_id: String,
        /// The stream type; `email` is not subscribable.
        stream_type: String,
        /// Signature previously issued for the resource, when the socket's
        /// own identity does not grant access.
        token: Option<String>,
        /// Requested serialization; defaults to `activitystreams`.
        format: Option<String>,
    },
    /// Orderly shutdown.
    Close {
        /// Client-chosen frame id.
        id: Value,
    },
}

/// Why a client frame failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The text was not a JSON object or named an unknown type.
    Malformed,
    /// A non-authentication frame arrived without an `id`.
    MissingId,
}

impl ClientFrame {
    /// Parse one client frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::Malformed`] when the text is not a JSON object with a
    /// known `type`; [`FrameError::MissingId`] when a non-authentication
    /// frame lacks its `id`.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text).map_err(|_| FrameError::Malformed)?;
        let Value::Object(map) = value else {
            return Err(FrameError::Malformed);
        };
        let frame_type = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::Malformed)?;

        match frame_type {
            "authentication" => {
                let field = |name: &str| {
                    map.get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or(FrameError::Malformed)
                };
                Ok(Self::Authentication {
                    user_id: field("userId")?,
                    tenant_alias: field("tenantAlias")?,
                    signature: field("signature")?,
                })
            }
            "subscribe" => {
                let id = map.get("id").cloned().ok_or(FrameError::MissingId)?;
                let resource_id = map
                    .get("resourceId")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::Malformed)?
                    .to_string();
                let stream_type = map
                    .get("streamType")
                    .and_then(Value::as_str)
                    .ok_or(FrameError::Malformed)?
                    .to_string();
                Ok(Self::Subscribe {
                    id,
                    resource_id,
                    stream_type,
                    token: map.get("token").and_then(Value::as_str).map(str::to_string),
                    format: map.get("format").and_then(Value::as_str).map(str::to_string),
                })
            }
            "close" => {
                let id = map.get("id").cloned().ok_or(FrameError::MissingId)?;
                Ok(Self::Close { id })
            }
            _ => Err(FrameError::Malformed),
        }
    }
}

/// The error payload of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Numeric code, the platform error taxonomy.
    pub code: u16,
    /// Short message.
    pub message: String,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Positive response to a client frame.
    Ack {
        /// The client frame id.
        id: Value,
    },
    /// Negative response to a client frame, or a terminal protocol error.
    Error {
        /// The client frame id, when one was readable.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
        /// The error payload.
        error: ErrorBody,
    },
    /// Aggregated entries of one subscribed stream.
    Delivery {
        /// The stream the entries belong to.
        #[serde(rename = "streamType")]
        stream_type: StreamType,
        /// The subscription's format.
        format: Format,
        /// The materialized entries.
        activities: Vec<StreamEntry>,
        /// Unseen deliverable units on the stream.
        #[serde(rename = "numNewActivities")]
        num_new_activities: i64,
    },
}

impl ServerFrame {
    /// Build an error frame.
    #[must_use]
    pub fn error(id: Option<Value>, code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    #[test]
    fn parses_authentication() {
        let frame = ClientFrame::parse(
            r#"{"type":"authentication","userId":"u:cam:a","tenantAlias":"cam","signature":"s"}"#,
        )
        .expect("valid frame");
        assert!(matches!(frame, ClientFrame::Authentication { .. }));
    }

    #[test]
    fn subscribe_without_id_is_missing_id() {
        let result = ClientFrame::parse(
            r#"{"type":"subscribe","resourceId":"u:cam:a","streamType":"activity"}"#,
        );
        assert_eq!(result, Err(FrameError::MissingId));
    }

    #[test]
    fn junk_is_malformed() {
        for text in ["nope", "[]", "{}", r#"{"type":"dance","id":1}"#] {
            assert_eq!(ClientFrame::parse(text), Err(FrameError::Malformed), "{text}");
        }
    }

    #[test]
    fn server_frames_serialize_with_wire_names() {
        let ack = serde_json::to_string(&ServerFrame::Ack {
            id: serde_json::json!(7),
        })
        .expect("serialize");
        assert_eq!(ack, r#"{"type":"ack","id":7}"#);

        let error =
            serde_json::to_string(&ServerFrame::error(None, 400, "bad")).expect("serialize");
        assert_eq!(
            error,
            r#"{"type":"error","error":{"code":400,"message":"bad"}}"#
        );

        let delivery = serde_json::to_string(&ServerFrame::Delivery {
            stream_type: StreamType::Notification,
            format: Format::Internal,
            activities: vec![],
            num_new_activities: 2,
        })
        .expect("serialize");
        assert!(delivery.contains(r#""streamType":"notification""#));
        assert!(delivery.contains(r#""numNewActivities":2"#));
    }
}
