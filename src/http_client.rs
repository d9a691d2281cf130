use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ClearedReason, SessionCoordinator};
use crate::error::{ApiError, SessionError};

/// Response header set by the backend on 401s caused by token expiry,
/// as opposed to outright credential rejection.
const TOKEN_EXPIRED_HEADER: &str = "x-token-expired";

/// Authenticated HTTP client for the ClockWork API.
///
/// Wraps every outbound business call: attaches the bearer token,
/// detects expiry 401s, funnels them through the session coordinator's
/// single-flight refresh, and retries the original request exactly once
/// with the new token.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session coordinator owning the refresh protocol
    coordinator: Arc<SessionCoordinator>,
}

impl ApiClient {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            coordinator,
        })
    }

    /// Build a request against the API with the shared client.
    pub fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client.request(method, url)
    }

    /// Convenience GET through the interceptor.
    pub async fn get(&self, url: &str) -> Result<Response, ApiError> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(ApiError::Transport)?;
        self.execute(request).await
    }

    /// Execute a request through the interceptor.
    ///
    /// - expiry 401 (header signal or local expiry check): refresh via
    ///   the coordinator, retry once with the new token
    /// - non-expiry 401: clear the session, surface the rejection
    /// - everything else, including other error statuses, passes
    ///   through unchanged
    pub async fn execute(&self, mut request: Request) -> Result<Response, ApiError> {
        let intercepted = !is_auth_endpoint(request.url().path());
        let attached_token = if intercepted {
            self.coordinator.access_token()
        } else {
            None
        };

        if let Some(token) = attached_token.as_deref() {
            set_bearer(&mut request, token)?;
        }

        // Clone up front; execute consumes the request
        let retry_source = request.try_clone();

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "sending API request");

        let response = self.client.execute(request).await?;

        if response.status() != StatusCode::UNAUTHORIZED || !intercepted {
            return Ok(response);
        }

        if !self.is_expiry_401(&response) {
            tracing::warn!(url = %url, "401 without expiry signal, clearing session");
            self.coordinator
                .clear_session(ClearedReason::CredentialsRejected);
            return Err(ApiError::Auth(SessionError::CredentialsRejected));
        }

        tracing::debug!(url = %url, "access token expired, refreshing and retrying");
        let token = self
            .coordinator
            .fresh_access_token(attached_token.as_deref())
            .await?;

        let mut retry = retry_source.ok_or(ApiError::BodyNotCloneable)?;
        set_bearer(&mut retry, &token)?;

        // One retry only; a second failure is surfaced as-is
        Ok(self.client.execute(retry).await?)
    }

    fn is_expiry_401(&self, response: &Response) -> bool {
        let header_signal = response
            .headers()
            .get(TOKEN_EXPIRED_HEADER)
            .map(|v| v.as_bytes() == b"true")
            .unwrap_or(false);

        header_signal
            || self
                .coordinator
                .session()
                .map(|s| s.is_access_expired(Utc::now()))
                .unwrap_or(false)
    }
}

fn set_bearer(request: &mut Request, token: &str) -> Result<(), ApiError> {
    let value =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ApiError::MalformedToken)?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Auth endpoints carry their own credentials in the body; the bearer
/// token is only attached to the refresh endpoint and business calls.
fn is_auth_endpoint(path: &str) -> bool {
    path.contains("/api/auth/") && !path.contains("/refresh-token")
}
