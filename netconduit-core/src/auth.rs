//! Shared-secret authentication for the connection handshake

use netconduit_protocol::messages::AuthRequest;
use netconduit_protocol::MessageType;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Constant-time comparison of two byte slices
/// Returns true if slices are equal, false otherwise
///
/// This prevents timing attacks where an attacker could determine
/// how many bytes match based on comparison time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// One-way hash of the shared secret as sent in AUTH_REQUEST: lowercase hex SHA-256
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    format!("{digest:x}")
}

/// Issue an opaque session token for an authenticated connection
#[must_use]
pub fn generate_session_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Handshake progress of a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingVerify,
    Authenticated,
    Failed,
}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid secret")]
    InvalidSecret,
    #[error("authentication required, got {0}")]
    NotAuthenticated(MessageType),
    #[error("malformed auth request: {0}")]
    Malformed(String),
    #[error("rejected by server: {0}")]
    Rejected(String),
}

impl AuthError {
    /// Reason string carried in AUTH_FAILURE and used as a metric label
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidSecret => "invalid_secret",
            AuthError::NotAuthenticated(_) => "not_authenticated",
            AuthError::Malformed(_) => "malformed_request",
            AuthError::Rejected(_) => "rejected",
        }
    }
}

/// Server-side verifier holding the expected secret hash.
///
/// Walks the handshake state machine: the first frame moves it to
/// `AwaitingVerify`, the verdict to `Authenticated` or `Failed`. A failed
/// verifier stays failed.
#[derive(Debug)]
pub struct Authenticator {
    expected_hash: String,
    state: AuthState,
}

impl Authenticator {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            expected_hash: hash_secret(secret),
            state: AuthState::Unauthenticated,
        }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Check the first frame of a connection
    pub fn verify_first_frame(
        &mut self,
        message_type: MessageType,
        request: impl FnOnce() -> Result<AuthRequest, String>,
    ) -> Result<AuthRequest, AuthError> {
        if self.state != AuthState::Unauthenticated {
            self.state = AuthState::Failed;
            return Err(AuthError::Rejected("handshake already attempted".into()));
        }
        if message_type != MessageType::AuthRequest {
            self.state = AuthState::Failed;
            return Err(AuthError::NotAuthenticated(message_type));
        }

        self.state = AuthState::AwaitingVerify;
        let request = match request() {
            Ok(request) => request,
            Err(e) => {
                self.state = AuthState::Failed;
                return Err(AuthError::Malformed(e));
            }
        };

        if constant_time_eq(
            request.secret_hash.as_bytes(),
            self.expected_hash.as_bytes(),
        ) {
            self.state = AuthState::Authenticated;
            Ok(request)
        } else {
            self.state = AuthState::Failed;
            Err(AuthError::InvalidSecret)
        }
    }
}
