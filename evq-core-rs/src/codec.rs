//! OCPP-J RPC framing
//!
//! OCPP carries JSON arrays over the wire, tagged by the first element:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! Action names are plain strings here; mapping them to a protocol's
//! message kinds is the job of [`crate::ActionTable`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frame type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeId {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP RPC framework error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    FormatViolation,
    GenericError,
    InternalError,
    MessageTypeNotSupported,
    NotImplemented,
    NotSupported,
    OccurrenceConstraintViolation,
    PropertyConstraintViolation,
    ProtocolError,
    RpcFrameworkError,
    SecurityError,
    TypeConstraintViolation,
}

/// Errors while decoding a frame
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid frame format")]
    InvalidFormat,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),
}

/// CALL frame (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    pub payload: Value,
}

impl Call {
    pub fn new(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Serialize to wire format: [2, messageId, action, payload]
    pub fn encode(&self) -> String {
        Value::Array(vec![
            Value::from(MessageTypeId::Call as i32),
            Value::String(self.message_id.clone()),
            Value::String(self.action.clone()),
            self.payload.clone(),
        ])
        .to_string()
    }
}

/// CALLRESULT frame (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    pub fn new(message_id: impl Into<String>, payload: impl Serialize) -> Result<Self, CodecError> {
        Ok(Self {
            message_id: message_id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to wire format: [3, messageId, payload]
    pub fn encode(&self) -> String {
        Value::Array(vec![
            Value::from(MessageTypeId::CallResult as i32),
            Value::String(self.message_id.clone()),
            self.payload.clone(),
        ])
        .to_string()
    }

    /// Parse the payload as a specific response type
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, CodecError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// CALLERROR frame (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Value,
}

impl CallError {
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Serialize to wire format: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn encode(&self) -> String {
        Value::Array(vec![
            Value::from(MessageTypeId::CallError as i32),
            Value::String(self.message_id.clone()),
            Value::String(format!("{:?}", self.error_code)),
            Value::String(self.error_description.clone()),
            self.error_details.clone(),
        ])
        .to_string()
    }
}

/// Any decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl Frame {
    /// Parse a frame from its JSON text
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let array: Vec<Value> = serde_json::from_str(text)?;

        let msg_type = array
            .first()
            .and_then(Value::as_i64)
            .ok_or(CodecError::InvalidFormat)?;

        match msg_type {
            2 => {
                if array.len() != 4 {
                    return Err(CodecError::InvalidFormat);
                }
                let action = array[2].as_str().ok_or(CodecError::InvalidFormat)?;
                Ok(Frame::Call(Call {
                    message_id: message_id(&array)?,
                    action: action.to_string(),
                    payload: array[3].clone(),
                }))
            }
            3 => {
                if array.len() != 3 {
                    return Err(CodecError::InvalidFormat);
                }
                Ok(Frame::CallResult(CallResult {
                    message_id: message_id(&array)?,
                    payload: array[2].clone(),
                }))
            }
            4 => {
                if array.len() != 5 {
                    return Err(CodecError::InvalidFormat);
                }
                let error_code = array[2]
                    .as_str()
                    .and_then(|code| serde_json::from_value(Value::String(code.to_string())).ok())
                    .unwrap_or(ErrorCode::GenericError);

                Ok(Frame::CallError(CallError {
                    message_id: message_id(&array)?,
                    error_code,
                    error_description: array[3].as_str().unwrap_or("").to_string(),
                    error_details: array[4].clone(),
                }))
            }
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Frame::Call(c) => &c.message_id,
            Frame::CallResult(r) => &r.message_id,
            Frame::CallError(e) => &e.message_id,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Call(c) => c.encode(),
            Frame::CallResult(r) => r.encode(),
            Frame::CallError(e) => e.encode(),
        }
    }
}

fn message_id(array: &[Value]) -> Result<String, CodecError> {
    array[1]
        .as_str()
        .map(str::to_string)
        .ok_or(CodecError::InvalidFormat)
}
