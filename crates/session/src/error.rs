//! Error types for the session layer.

use std::time::Duration;

use {folio_protocol::ErrorBody, thiserror::Error};

use crate::transport::{ApiResponse, TransportError};

/// Errors surfaced by the request gateway to the caller of a request.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never got a response (DNS, connection refused, timeout...).
    #[error("no response from server: {0}")]
    NoResponse(#[from] TransportError),

    /// The access token expired and could not be refreshed. Tokens and user
    /// have already been cleared by the time the caller sees this.
    #[error("session ended: {0}")]
    SessionEnded(#[from] RefreshError),

    /// The server answered with a non-success status.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// The server answered successfully but the body did not decode.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request body could not be serialized; nothing was sent.
    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),
}

impl GatewayError {
    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => Some(err.status),
            _ => None,
        }
    }

    pub fn is_session_ended(&self) -> bool {
        matches!(self, Self::SessionEnded(_))
    }

    /// Message suitable for showing inline next to the failed action.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoResponse(_) => {
                "The server did not respond. Please check your internet connection.".into()
            },
            Self::SessionEnded(_) => "Your session has expired. Please log in again.".into(),
            Self::Api(err) => err.user_message(),
            Self::Decode(_) | Self::Encode(_) => GENERIC_MESSAGE.into(),
        }
    }
}

const GENERIC_MESSAGE: &str = "An unexpected error occurred.";

/// A non-success HTTP response, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API error {status}")]
pub struct ApiError {
    pub status: u16,
    pub body: String,
}

impl ApiError {
    pub fn error_body(&self) -> Option<ErrorBody> {
        ErrorBody::parse(&self.body)
    }

    pub fn user_message(&self) -> String {
        if let Some(message) = self.error_body().as_ref().and_then(ErrorBody::message) {
            return message.to_string();
        }
        match self.status {
            403 => "You do not have permission to access this resource.".into(),
            _ => GENERIC_MESSAGE.into(),
        }
    }
}

impl From<ApiResponse> for ApiError {
    fn from(response: ApiResponse) -> Self {
        Self {
            status: response.status,
            body: response.body,
        }
    }
}

/// Why a token refresh failed. Every caller waiting on the same refresh gets
/// a clone of the same value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected with status {0}")]
    Rejected(u16),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("refresh task ended without a result")]
    Aborted,

    /// Tokens were cleared or replaced while the refresh was in flight.
    #[error("session changed during refresh")]
    Superseded,
}

/// Errors from the real-time connection manager.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// `connect()` needs an access token; this is not retried automatically.
    #[error("no access token available")]
    NoAccessToken,

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    /// `send()` on a channel that is not open. Messages are never queued.
    #[error("real-time channel is not connected")]
    NotConnected,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
