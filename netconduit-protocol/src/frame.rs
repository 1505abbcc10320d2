//! Protocol frame definitions

use crate::error::ProtocolError;
use crate::messages::{
    AppMessage, AuthFailure, AuthRequest, AuthSuccess, HeartbeatPayload, RpcErrorCode,
    RpcErrorPayload, RpcRequest, RpcResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Message type tag carried in every frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    AuthRequest = 1,
    AuthSuccess = 2,
    AuthFailure = 3,
    Message = 4,
    RpcRequest = 5,
    RpcResponse = 6,
    RpcError = 7,
    HeartbeatPing = 8,
    HeartbeatPong = 9,
}

impl MessageType {
    /// Every tag the protocol knows about
    pub const ALL: [MessageType; 9] = [
        MessageType::AuthRequest,
        MessageType::AuthSuccess,
        MessageType::AuthFailure,
        MessageType::Message,
        MessageType::RpcRequest,
        MessageType::RpcResponse,
        MessageType::RpcError,
        MessageType::HeartbeatPing,
        MessageType::HeartbeatPong,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_auth(self) -> bool {
        matches!(
            self,
            MessageType::AuthRequest | MessageType::AuthSuccess | MessageType::AuthFailure
        )
    }

    pub const fn is_heartbeat(self) -> bool {
        matches!(self, MessageType::HeartbeatPing | MessageType::HeartbeatPong)
    }

    /// Inbound application traffic that consumes rate-limit tokens
    pub const fn is_rate_limited(self) -> bool {
        matches!(self, MessageType::Message | MessageType::RpcRequest)
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageType::AuthRequest => "AUTH_REQUEST",
            MessageType::AuthSuccess => "AUTH_SUCCESS",
            MessageType::AuthFailure => "AUTH_FAILURE",
            MessageType::Message => "MESSAGE",
            MessageType::RpcRequest => "RPC_REQUEST",
            MessageType::RpcResponse => "RPC_RESPONSE",
            MessageType::RpcError => "RPC_ERROR",
            MessageType::HeartbeatPing => "HEARTBEAT_PING",
            MessageType::HeartbeatPong => "HEARTBEAT_PONG",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_u8() == tag)
            .ok_or(ProtocolError::UnknownMessageType(tag))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured key/value frame payload.
///
/// Serialized on the wire as a MessagePack map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a payload from any serializable struct or map
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(Value::Null) => Ok(Self::default()),
            Ok(other) => Err(ProtocolError::InvalidPayload(format!(
                "payload must be a map, got {}",
                value_kind(&other)
            ))),
            Err(e) => Err(ProtocolError::InvalidPayload(e.to_string())),
        }
    }

    /// Interpret the payload as a typed message body
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Wire protocol frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_type: MessageType,
    pub correlation_id: u64,
    pub payload: Payload,
}

impl Frame {
    pub fn new(message_type: MessageType, correlation_id: u64, payload: Payload) -> Self {
        Self {
            message_type,
            correlation_id,
            payload,
        }
    }

    /// Build a frame whose payload is a serialized message body
    pub fn typed<T: Serialize>(
        message_type: MessageType,
        correlation_id: u64,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(
            message_type,
            correlation_id,
            Payload::from_typed(body)?,
        ))
    }

    /// Decode the payload into a typed message body
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.payload.to_typed()
    }

    pub fn auth_request(request: &AuthRequest) -> Result<Self, ProtocolError> {
        Self::typed(MessageType::AuthRequest, 0, request)
    }

    pub fn auth_success(success: &AuthSuccess) -> Result<Self, ProtocolError> {
        Self::typed(MessageType::AuthSuccess, 0, success)
    }

    pub fn auth_failure(reason: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::AuthFailure,
            0,
            &AuthFailure {
                reason: reason.into(),
            },
        )
    }

    pub fn message(kind: impl Into<String>, data: Value) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::Message,
            0,
            &AppMessage {
                kind: kind.into(),
                data,
            },
        )
    }

    pub fn rpc_request(
        correlation_id: u64,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::RpcRequest,
            correlation_id,
            &RpcRequest {
                method: method.into(),
                params,
            },
        )
    }

    pub fn rpc_response(correlation_id: u64, result: Value) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::RpcResponse,
            correlation_id,
            &RpcResponse { result },
        )
    }

    pub fn rpc_error(
        correlation_id: u64,
        code: RpcErrorCode,
        message: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::RpcError,
            correlation_id,
            &RpcErrorPayload {
                code,
                message: message.into(),
            },
        )
    }

    pub fn ping(sequence: u64, timestamp_ms: u64) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::HeartbeatPing,
            sequence,
            &HeartbeatPayload { timestamp_ms },
        )
    }

    /// Answer a ping, echoing its correlation id
    pub fn pong(sequence: u64, timestamp_ms: u64) -> Result<Self, ProtocolError> {
        Self::typed(
            MessageType::HeartbeatPong,
            sequence,
            &HeartbeatPayload { timestamp_ms },
        )
    }
}
