//! Request and response messages.
//!
//! A message on the wire is exactly two codec values written back to back:
//! a header list whose first element is the numeric message type, then a
//! body value.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{decode_from, encode_into};
use crate::error::{Result, WireError};
use crate::value::Value;

/// Identifier of one call or subscription, unique per channel client.
pub type RequestId = u64;

/// Request type: invoke a command.
pub const REQUEST_CALL: u64 = 100;
/// Request type: cancel an outstanding call.
pub const REQUEST_CANCEL: u64 = 101;
/// Request type: subscribe to an event.
pub const REQUEST_LISTEN: u64 = 102;
/// Request type: drop an event subscription.
pub const REQUEST_UNLISTEN: u64 = 103;

/// Response type: server handshake.
pub const RESPONSE_INITIALIZE: u64 = 200;
/// Response type: call succeeded.
pub const RESPONSE_SUCCESS: u64 = 201;
/// Response type: call failed with a structured error.
pub const RESPONSE_ERROR: u64 = 202;
/// Response type: call failed with an arbitrary value.
pub const RESPONSE_ERROR_OBJ: u64 = 203;
/// Response type: event emission.
pub const RESPONSE_EVENT_FIRE: u64 = 204;

/// Structured error carried by a [`Response::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub message: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
}

impl RemoteError {
    /// Name used for errors that carry no more specific kind.
    pub const GENERIC_NAME: &'static str = "Error";
    /// Name (and message) of a cancellation error.
    pub const CANCELED_NAME: &'static str = "Canceled";

    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn canceled() -> Self {
        Self::new(Self::CANCELED_NAME, Self::CANCELED_NAME)
    }

    pub fn is_canceled(&self) -> bool {
        self.name == Self::CANCELED_NAME && self.message == Self::CANCELED_NAME
    }
}

/// A message sent from a channel client to a channel server.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Call {
        id: RequestId,
        channel: String,
        command: String,
        arg: Value,
    },
    Cancel {
        id: RequestId,
    },
    Listen {
        id: RequestId,
        channel: String,
        event: String,
        arg: Value,
    },
    Unlisten {
        id: RequestId,
    },
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Request::Call { id, .. }
            | Request::Cancel { id }
            | Request::Listen { id, .. }
            | Request::Unlisten { id } => *id,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Request::Call {
                id,
                channel,
                command: name,
                arg,
            }
            | Request::Listen {
                id,
                channel,
                event: name,
                arg,
            } => {
                let kind = if matches!(self, Request::Call { .. }) {
                    REQUEST_CALL
                } else {
                    REQUEST_LISTEN
                };
                let header = vec![
                    Value::from(kind),
                    Value::from(*id),
                    Value::from(channel.as_str()),
                    Value::from(name.as_str()),
                ];
                encode_message(header, arg)
            }
            Request::Cancel { id } => {
                encode_message(vec![Value::from(REQUEST_CANCEL), Value::from(*id)], &Value::Absent)
            }
            Request::Unlisten { id } => encode_message(
                vec![Value::from(REQUEST_UNLISTEN), Value::from(*id)],
                &Value::Absent,
            ),
        }
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        match Message::decode(src)? {
            Message::Request(request) => Ok(request),
            Message::Response(response) => Err(WireError::MalformedHeader(format!(
                "expected a request, found response type {}",
                response.kind()
            ))),
        }
    }
}

/// A message sent from a channel server to a channel client.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Initialize,
    Success { id: RequestId, data: Value },
    Error { id: RequestId, error: RemoteError },
    ErrorObj { id: RequestId, data: Value },
    EventFire { id: RequestId, data: Value },
}

impl Response {
    /// The numeric message type of this response.
    pub fn kind(&self) -> u64 {
        match self {
            Response::Initialize => RESPONSE_INITIALIZE,
            Response::Success { .. } => RESPONSE_SUCCESS,
            Response::Error { .. } => RESPONSE_ERROR,
            Response::ErrorObj { .. } => RESPONSE_ERROR_OBJ,
            Response::EventFire { .. } => RESPONSE_EVENT_FIRE,
        }
    }

    /// Request id this response answers; `None` for the handshake.
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Response::Initialize => None,
            Response::Success { id, .. }
            | Response::Error { id, .. }
            | Response::ErrorObj { id, .. }
            | Response::EventFire { id, .. } => Some(*id),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let kind = Value::from(self.kind());
        match self {
            Response::Initialize => encode_message(vec![kind], &Value::Absent),
            Response::Success { id, data }
            | Response::ErrorObj { id, data }
            | Response::EventFire { id, data } => {
                encode_message(vec![kind, Value::from(*id)], data)
            }
            Response::Error { id, error } => {
                encode_message(vec![kind, Value::from(*id)], &Value::from_serde(error)?)
            }
        }
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        match Message::decode(src)? {
            Message::Response(response) => Ok(response),
            Message::Request(request) => Err(WireError::MalformedHeader(format!(
                "expected a response, found request for id {}",
                request.id()
            ))),
        }
    }
}

/// Any protocol message, classified by its header type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut cursor = src;
        let header = decode_from(&mut cursor)?;
        let body = decode_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(WireError::TrailingBytes(cursor.len()));
        }

        let fields = match header {
            Value::List(fields) => fields,
            other => {
                return Err(WireError::MalformedHeader(format!(
                    "header must be a list, found {}",
                    other.kind()
                )))
            }
        };
        let kind = header_u64(&fields, 0, "message type")?;

        let message = match kind {
            REQUEST_CALL => Message::Request(Request::Call {
                id: header_u64(&fields, 1, "request id")?,
                channel: header_str(&fields, 2, "channel name")?,
                command: header_str(&fields, 3, "command name")?,
                arg: body,
            }),
            REQUEST_CANCEL => Message::Request(Request::Cancel {
                id: header_u64(&fields, 1, "request id")?,
            }),
            REQUEST_LISTEN => Message::Request(Request::Listen {
                id: header_u64(&fields, 1, "request id")?,
                channel: header_str(&fields, 2, "channel name")?,
                event: header_str(&fields, 3, "event name")?,
                arg: body,
            }),
            REQUEST_UNLISTEN => Message::Request(Request::Unlisten {
                id: header_u64(&fields, 1, "request id")?,
            }),
            RESPONSE_INITIALIZE => Message::Response(Response::Initialize),
            RESPONSE_SUCCESS => Message::Response(Response::Success {
                id: header_u64(&fields, 1, "request id")?,
                data: body,
            }),
            RESPONSE_ERROR => {
                let id = header_u64(&fields, 1, "request id")?;
                // A body that is not a structured error is still a rejection.
                match body.to_serde::<RemoteError>() {
                    Ok(error) => Message::Response(Response::Error { id, error }),
                    Err(_) => Message::Response(Response::ErrorObj { id, data: body }),
                }
            }
            RESPONSE_ERROR_OBJ => Message::Response(Response::ErrorObj {
                id: header_u64(&fields, 1, "request id")?,
                data: body,
            }),
            RESPONSE_EVENT_FIRE => Message::Response(Response::EventFire {
                id: header_u64(&fields, 1, "request id")?,
                data: body,
            }),
            other => return Err(WireError::UnknownMessageType(other)),
        };

        Ok(message)
    }
}

fn encode_message(header: Vec<Value>, body: &Value) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_into(&Value::List(header), &mut dst)?;
    encode_into(body, &mut dst)?;
    Ok(dst.freeze())
}

fn header_u64(fields: &[Value], index: usize, what: &str) -> Result<u64> {
    fields
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| WireError::MalformedHeader(format!("missing or non-numeric {what}")))
}

fn header_str(fields: &[Value], index: usize, what: &str) -> Result<String> {
    fields
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| WireError::MalformedHeader(format!("missing or non-string {what}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec::{encode, TAG_ABSENT, TAG_LIST};

    #[test]
    fn call_request_header_shape() {
        let request = Request::Call {
            id: 7,
            channel: "math".to_string(),
            command: "double".to_string(),
            arg: Value::from(21u32),
        };
        let wire = request.encode().unwrap();

        let mut cursor: &[u8] = &wire;
        let header = decode_from(&mut cursor).unwrap();
        let body = decode_from(&mut cursor).unwrap();
        assert_eq!(
            header,
            Value::List(vec![
                Value::from(100u32),
                Value::from(7u32),
                Value::from("math"),
                Value::from("double"),
            ])
        );
        assert_eq!(body, Value::from(21u32));
        assert_eq!(Request::decode(&wire).unwrap(), request);
    }

    #[test]
    fn cancel_and_unlisten_have_absent_body() {
        for request in [Request::Cancel { id: 3 }, Request::Unlisten { id: 4 }] {
            let wire = request.encode().unwrap();
            assert_eq!(*wire.last().unwrap(), TAG_ABSENT);
            assert_eq!(Request::decode(&wire).unwrap(), request);
        }
    }

    #[test]
    fn initialize_is_single_element_header() {
        let wire = Response::Initialize.encode().unwrap();
        let mut expected = encode(&Value::List(vec![Value::from(200u32)]))
            .unwrap()
            .to_vec();
        expected.push(TAG_ABSENT);
        assert_eq!(wire.as_ref(), expected.as_slice());
        assert_eq!(wire[0], TAG_LIST);
    }

    #[test]
    fn structured_error_body() {
        let response = Response::Error {
            id: 9,
            error: RemoteError::new("TypeError", "boom").with_stack(vec!["at x".to_string()]),
        };
        let wire = response.encode().unwrap();

        let mut cursor: &[u8] = &wire;
        let _header = decode_from(&mut cursor).unwrap();
        let body = decode_from(&mut cursor).unwrap();
        assert_eq!(
            body,
            Value::Other(json!({"message": "boom", "name": "TypeError", "stack": ["at x"]}))
        );
        assert_eq!(Response::decode(&wire).unwrap(), response);
    }

    #[test]
    fn structured_error_without_stack_omits_field() {
        let body = Value::from_serde(&RemoteError::new("Error", "nope")).unwrap();
        assert_eq!(body, Value::Other(json!({"message": "nope", "name": "Error"})));
    }

    #[test]
    fn malformed_structured_error_degrades_to_error_obj() {
        let wire = encode_message(
            vec![Value::from(RESPONSE_ERROR), Value::from(1u32)],
            &Value::from("plain"),
        )
        .unwrap();
        assert_eq!(
            Response::decode(&wire).unwrap(),
            Response::ErrorObj {
                id: 1,
                data: Value::from("plain")
            }
        );
    }

    #[test]
    fn classify_by_discriminator() {
        let request = Request::Listen {
            id: 1,
            channel: "c".to_string(),
            event: "e".to_string(),
            arg: Value::Absent,
        };
        let fire = Response::EventFire {
            id: 1,
            data: Value::from("tick"),
        };
        assert!(matches!(
            Message::decode(&request.encode().unwrap()).unwrap(),
            Message::Request(_)
        ));
        assert!(matches!(
            Message::decode(&fire.encode().unwrap()).unwrap(),
            Message::Response(_)
        ));
    }

    #[test]
    fn unknown_message_type() {
        let wire = encode_message(vec![Value::from(999u32)], &Value::Absent).unwrap();
        assert!(matches!(
            Message::decode(&wire),
            Err(WireError::UnknownMessageType(999))
        ));
    }

    #[test]
    fn header_must_be_list() {
        let wire = encode_message(vec![], &Value::Absent).unwrap();
        assert!(matches!(
            Message::decode(&wire),
            Err(WireError::MalformedHeader(_))
        ));

        let mut buf = BytesMut::new();
        encode_into(&Value::from("nope"), &mut buf).unwrap();
        encode_into(&Value::Absent, &mut buf).unwrap();
        assert!(matches!(
            Message::decode(&buf),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn call_header_requires_names() {
        let wire = encode_message(
            vec![Value::from(REQUEST_CALL), Value::from(1u32), Value::from(5u32)],
            &Value::Absent,
        )
        .unwrap();
        assert!(matches!(
            Request::decode(&wire),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn canceled_error_roundtrip() {
        assert!(RemoteError::canceled().is_canceled());
        assert!(!RemoteError::new("Error", "Canceled").is_canceled());
    }
}
