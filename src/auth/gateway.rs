// Auth gateway boundary
// Network calls to the backend's /api/auth endpoints

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

use super::types::{
    AuthOutcome, AuthRequest, AuthResponse, LogoutRequest, RefreshRequest, RegisterRequest,
    TokenBundle,
};
use crate::error::GatewayError;

/// Network boundary for the token-issuing backend.
///
/// The core treats the gateway as an opaque authority: it never inspects
/// token contents, only stores and presents them.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str)
        -> Result<AuthOutcome, GatewayError>;

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<TokenBundle, GatewayError>;

    async fn send_otp(&self, email: &str) -> Result<(), GatewayError>;

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<TokenBundle, GatewayError>;

    async fn verify_signup_email(
        &self,
        email: &str,
        otp: &str,
    ) -> Result<TokenBundle, GatewayError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, GatewayError>;

    async fn logout(&self, refresh_token: &str) -> Result<(), GatewayError>;
}

/// Get machine fingerprint for User-Agent
fn get_machine_fingerprint() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut hasher = DefaultHasher::new();
    hostname.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// HTTP implementation of the gateway over reqwest.
pub struct HttpAuthGateway {
    client: Client,
    base_url: String,
}

impl HttpAuthGateway {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let fingerprint = get_machine_fingerprint();
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(format!(
                "ClockWork-Session/{}-{fingerprint}",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/auth{path}", self.base_url)
    }

    async fn check(&self, response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), %message, "auth gateway rejected request");
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_bundle(&self, response: Response) -> Result<TokenBundle, GatewayError> {
        let response = self.check(response).await?;
        let body: AuthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        body.into_bundle()
    }
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthOutcome, GatewayError> {
        tracing::debug!("authenticating against the gateway");
        let response = self
            .client
            .post(self.url("/authenticate"))
            .json(&AuthRequest { email, password })
            .send()
            .await
            .map_err(transport)?;

        let response = self.check(response).await?;
        let body: AuthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        body.into_outcome()
    }

    async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<TokenBundle, GatewayError> {
        tracing::debug!("registering a new account");
        let response = self
            .client
            .post(self.url("/register"))
            .json(&RegisterRequest {
                name,
                email,
                password,
            })
            .send()
            .await
            .map_err(transport)?;
        self.read_bundle(response).await
    }

    async fn send_otp(&self, email: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("/otp/send"))
            .query(&[("email", email)])
            .send()
            .await
            .map_err(transport)?;
        self.check(response).await.map(|_| ())
    }

    async fn verify_otp(&self, email: &str, otp: &str) -> Result<TokenBundle, GatewayError> {
        let response = self
            .client
            .post(self.url("/otp/verify"))
            .query(&[("email", email), ("otp", otp)])
            .send()
            .await
            .map_err(transport)?;
        self.read_bundle(response).await
    }

    async fn verify_signup_email(
        &self,
        email: &str,
        otp: &str,
    ) -> Result<TokenBundle, GatewayError> {
        let response = self
            .client
            .post(self.url("/verify-email"))
            .query(&[("email", email), ("otp", otp)])
            .send()
            .await
            .map_err(transport)?;
        self.read_bundle(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, GatewayError> {
        tracing::debug!("refreshing access token");
        let response = self
            .client
            .post(self.url("/refresh-token"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(transport)?;
        self.read_bundle(response).await
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url("/logout"))
            .json(&LogoutRequest { refresh_token })
            .send()
            .await
            .map_err(transport)?;
        self.check(response).await.map(|_| ())
    }
}

fn transport(e: reqwest::Error) -> GatewayError {
    GatewayError::Transport(e.to_string())
}
