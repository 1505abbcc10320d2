//! Semantic frame validation applied after decoding

use crate::frame::{Frame, MessageType};
use crate::messages::{AppMessage, AuthRequest, HeartbeatPayload, RpcErrorPayload, RpcRequest};

/// Validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed {message_type} body: {reason}")]
    MalformedBody {
        message_type: MessageType,
        reason: String,
    },

    #[error("Message kind must not be empty")]
    EmptyKind,

    #[error("RPC method must not be empty")]
    EmptyMethod,

    #[error("{field} too long: {len} bytes exceeds limit of {limit} bytes")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("Too many metadata entries: {count} exceeds limit of {limit}")]
    TooManyMetadataEntries { count: usize, limit: usize },

    #[error("{message_type} requires a non-zero correlation id")]
    MissingCorrelationId { message_type: MessageType },
}

/// Validation limits
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    pub max_kind_len: usize,
    pub max_method_len: usize,
    pub max_secret_hash_len: usize,
    pub max_metadata_entries: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_kind_len: 256,
            max_method_len: 256,
            max_secret_hash_len: 128,
            max_metadata_entries: 32,
        }
    }
}

fn check_len(field: &'static str, value: &str, limit: usize) -> Result<(), ValidationError> {
    if value.len() > limit {
        return Err(ValidationError::FieldTooLong {
            field,
            len: value.len(),
            limit,
        });
    }
    Ok(())
}

fn malformed(frame: &Frame, e: &crate::ProtocolError) -> ValidationError {
    ValidationError::MalformedBody {
        message_type: frame.message_type,
        reason: e.to_string(),
    }
}

/// Validate a decoded frame against limits
///
/// Frames whose body does not match their message type are rejected here so
/// that handlers only ever see well-formed payloads.
pub fn validate_frame(frame: &Frame, limits: &ValidationLimits) -> Result<(), ValidationError> {
    match frame.message_type {
        MessageType::AuthRequest => {
            let req: AuthRequest = frame.body().map_err(|e| malformed(frame, &e))?;
            check_len("secret_hash", &req.secret_hash, limits.max_secret_hash_len)?;
            if req.metadata.len() > limits.max_metadata_entries {
                return Err(ValidationError::TooManyMetadataEntries {
                    count: req.metadata.len(),
                    limit: limits.max_metadata_entries,
                });
            }
        }
        MessageType::Message => {
            let msg: AppMessage = frame.body().map_err(|e| malformed(frame, &e))?;
            if msg.kind.is_empty() {
                return Err(ValidationError::EmptyKind);
            }
            check_len("kind", &msg.kind, limits.max_kind_len)?;
        }
        MessageType::RpcRequest => {
            let req: RpcRequest = frame.body().map_err(|e| malformed(frame, &e))?;
            if req.method.is_empty() {
                return Err(ValidationError::EmptyMethod);
            }
            check_len("method", &req.method, limits.max_method_len)?;
            if frame.correlation_id == 0 {
                return Err(ValidationError::MissingCorrelationId {
                    message_type: frame.message_type,
                });
            }
        }
        MessageType::RpcError => {
            let _: RpcErrorPayload = frame.body().map_err(|e| malformed(frame, &e))?;
        }
        MessageType::HeartbeatPing | MessageType::HeartbeatPong => {
            let _: HeartbeatPayload = frame.body().map_err(|e| malformed(frame, &e))?;
        }
        MessageType::AuthSuccess | MessageType::AuthFailure | MessageType::RpcResponse => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Payload;
    use serde_json::json;

    #[test]
    fn test_valid_frames_pass() {
        let limits = ValidationLimits::default();
        let frames = [
            Frame::message("chat", json!({"message": "hi"})).unwrap(),
            Frame::rpc_request(1, "echo", json!({})).unwrap(),
            Frame::ping(1, 0).unwrap(),
            Frame::rpc_response(1, json!(null)).unwrap(),
        ];
        for frame in &frames {
            validate_frame(frame, &limits).unwrap();
        }
    }

    #[test]
    fn test_empty_kind_rejected() {
        let frame = Frame::message("", json!(null)).unwrap();
        assert!(matches!(
            validate_frame(&frame, &ValidationLimits::default()),
            Err(ValidationError::EmptyKind)
        ));
    }

    #[test]
    fn test_long_method_rejected() {
        let limits = ValidationLimits {
            max_method_len: 4,
            ..Default::default()
        };
        let frame = Frame::rpc_request(1, "too_long", json!(null)).unwrap();
        assert!(matches!(
            validate_frame(&frame, &limits),
            Err(ValidationError::FieldTooLong { field: "method", .. })
        ));
    }

    #[test]
    fn test_rpc_request_needs_correlation_id() {
        let frame = Frame::rpc_request(0, "echo", json!(null)).unwrap();
        assert!(matches!(
            validate_frame(&frame, &ValidationLimits::default()),
            Err(ValidationError::MissingCorrelationId { .. })
        ));
    }

    #[test]
    fn test_mismatched_body_rejected() {
        let frame = Frame::new(MessageType::RpcRequest, 1, Payload::new());
        assert!(matches!(
            validate_frame(&frame, &ValidationLimits::default()),
            Err(ValidationError::MalformedBody { .. })
        ));
    }
}
