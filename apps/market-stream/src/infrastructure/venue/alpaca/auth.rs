//! Alpaca WebSocket Authentication
//!
//! Alpaca requires authentication within 10 seconds of connection
//! establishment.
//!
//! # Authentication Flow
//!
//! 1. Connect to WebSocket endpoint
//! 2. Receive `{"T":"success","msg":"connected"}` from server
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Receive `{"T":"success","msg":"authenticated"}` or error
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 403: Already authenticated
//! - 404: Authentication timeout (>10 seconds)
//! - 406: Connection limit exceeded

use thiserror::Error;

use super::messages::{AuthRequest, ErrorMessage, SuccessKind, SuccessMessage};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not authenticated (must authenticate before subscribing).
    #[error("not authenticated: must authenticate before making requests")]
    NotAuthenticated,

    /// Authentication failed (invalid credentials).
    #[error("authentication failed: invalid API key or secret")]
    InvalidCredentials,

    /// Already authenticated (connection was already authenticated).
    #[error("already authenticated: connection is already authenticated")]
    AlreadyAuthenticated,

    /// Authentication timeout (took longer than 10 seconds).
    #[error("authentication timeout: must authenticate within 10 seconds")]
    Timeout,

    /// Connection limit exceeded.
    #[error("connection limit exceeded: too many concurrent connections")]
    ConnectionLimitExceeded,

    /// Credentials were rejected before sending.
    #[error("invalid credentials: {0}")]
    InvalidInput(&'static str),

    /// Unexpected error from server.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// Error code from server
        code: i32,
        /// Error message from server
        message: String,
    },
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Authentication State
// =============================================================================

/// Current state of authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Waiting for the server's connected message.
    #[default]
    Disconnected,

    /// Connected but not authenticated.
    Connected,

    /// Authentication request sent, awaiting response.
    Authenticating,

    /// Successfully authenticated.
    Authenticated,

    /// Authentication failed.
    Failed,
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials.
///
/// The `Debug` implementation redacts the secret for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        if key.is_empty() {
            return Err(AuthError::InvalidInput("API key cannot be empty"));
        }
        if secret.is_empty() {
            return Err(AuthError::InvalidInput("API secret cannot be empty"));
        }

        Ok(Self { key, secret })
    }

    /// Get the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Create an authentication request for market data streams.
    #[must_use]
    pub fn to_auth_request(&self) -> AuthRequest {
        AuthRequest::new(self.key.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// What the connection should do after a success message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send this request.
    Send(AuthRequest),
    /// Handshake complete.
    Done,
    /// Nothing to do yet.
    Wait,
}

/// Authentication state machine for one connection attempt.
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Credentials,
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler in the `Disconnected` state.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: AuthState::Disconnected,
        }
    }

    /// Get the current authentication state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    /// Process a success message from the server.
    pub fn on_success(&mut self, msg: &SuccessMessage) -> AuthStep {
        match (msg.msg, self.state) {
            (SuccessKind::Connected, AuthState::Disconnected) => {
                self.state = AuthState::Authenticating;
                AuthStep::Send(self.credentials.to_auth_request())
            }
            (SuccessKind::Authenticated, _) => {
                self.state = AuthState::Authenticated;
                AuthStep::Done
            }
            (SuccessKind::Connected, _) => AuthStep::Wait,
        }
    }

    /// Process an error message from the server.
    pub fn on_error(&mut self, msg: &ErrorMessage) -> AuthError {
        self.state = AuthState::Failed;
        AuthError::from(msg)
    }
}
