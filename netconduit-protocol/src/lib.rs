//! NetConduit wire protocol
//!
//! This crate defines the framed binary protocol shared by NetConduit
//! servers and clients: the fixed header, the message type tags, the
//! MessagePack payload model and a stream reassembly buffer.

pub mod codec;
pub mod constants;
pub mod error;
pub mod frame;
pub mod messages;
pub mod validation;

pub use codec::{ConduitCodec, FrameBuffer, FrameHeader};
pub use error::ProtocolError;
pub use frame::{Frame, MessageType, Payload};
pub use messages::{
    AppMessage, AuthFailure, AuthRequest, AuthSuccess, HeartbeatPayload, RpcErrorCode,
    RpcErrorPayload, RpcRequest, RpcResponse,
};
pub use validation::{validate_frame, ValidationError, ValidationLimits};
