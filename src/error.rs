// Error handling module
// Defines the session, gateway and API error taxonomies

use thiserror::Error;

/// Fatal session lifecycle errors.
///
/// Every variant except `Store` funnels through the coordinator's
/// clear-and-notify path exactly once before it is surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A refresh was requested with nothing to refresh with
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The gateway explicitly invalidated the refresh token
    #[error("refresh token rejected by the auth gateway: {0}")]
    RefreshRejected(String),

    /// Network or server failure while refreshing. Treated as fatal
    /// rather than retried, so an unreachable backend surfaces as a
    /// logout instead of a silent retry loop
    #[error("transport failure while refreshing the session: {0}")]
    RefreshTransport(String),

    /// A protected endpoint returned 401 without the expiry signal
    #[error("credentials rejected by the server")]
    CredentialsRejected,

    /// The session was cleared (explicit logout or a fresh sign-in)
    /// while a refresh call was still in flight
    #[error("session was cleared while the refresh was in flight")]
    SessionCleared,

    /// Credential store access failed
    #[error("credential store error: {0}")]
    Store(String),
}

/// Errors from the auth gateway boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with a non-success status
    #[error("auth gateway rejected the request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The request never produced a usable response
    #[error("auth gateway transport failure: {0}")]
    Transport(String),

    /// The gateway answered 2xx but the body was not a usable bundle
    #[error("malformed auth gateway response: {0}")]
    Malformed(String),
}

/// Errors surfaced by the session-creating flows (login, register, OTP),
/// which cross both the gateway and the store.
#[derive(Error, Debug)]
pub enum AuthFlowError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors surfaced by the authenticated API client.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The session could not produce a valid token for this request
    #[error("authentication failed: {0}")]
    Auth(#[from] SessionError),

    /// The request failed at the transport level
    #[error("request transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request body cannot be cloned for the post-refresh retry
    #[error("request body is not cloneable, cannot retry")]
    BodyNotCloneable,

    /// The stored access token is not a valid header value
    #[error("access token is not a valid header value")]
    MalformedToken,
}
