// Session and wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Fallback access-token lifetime when the gateway omits `expiresInMs`.
/// The backend issues one-hour JWTs.
pub const DEFAULT_EXPIRES_IN_MS: i64 = 3_600_000;

/// The persisted session state.
///
/// All three fields are written and cleared together; a populated
/// `access_token` is never observed with a stale `expires_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A session counts as authenticated while an access token is
    /// present and either no expiry is recorded, the expiry is still in
    /// the future, or a refresh token exists to renew it.
    pub fn is_authenticated(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_none() {
            return false;
        }
        match self.expires_at {
            None => true,
            Some(exp) => now < exp || self.refresh_token.is_some(),
        }
    }

    /// Whether the access token itself is past its expiry.
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => false,
            Some(exp) => now >= exp,
        }
    }
}

/// Token bundle issued by the gateway.
///
/// `refresh_token` is optional: a refresh response that omits it keeps
/// the previously stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_ms: i64,
}

/// Outcome of an `authenticate` call.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Granted(TokenBundle),
    VerificationRequired,
}

/// Outcome of a login attempt, surfaced to the UI.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Session),
    VerificationRequired,
}

/// Auth endpoint response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in_ms: Option<i64>,
    #[serde(default)]
    pub requires_verification: bool,
}

impl AuthResponse {
    /// Interpret the body: either a verification challenge or a bundle.
    pub fn into_outcome(self) -> Result<AuthOutcome, GatewayError> {
        if self.requires_verification {
            return Ok(AuthOutcome::VerificationRequired);
        }
        Ok(AuthOutcome::Granted(self.into_bundle()?))
    }

    /// Interpret the body as a bundle; fails if the access token is
    /// missing or empty.
    pub fn into_bundle(self) -> Result<TokenBundle, GatewayError> {
        match self.access_token {
            Some(token) if !token.is_empty() => Ok(TokenBundle {
                access_token: token,
                refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
                expires_in_ms: self.expires_in_ms.unwrap_or(DEFAULT_EXPIRES_IN_MS),
            }),
            _ => Err(GatewayError::Malformed(
                "response does not contain an accessToken".to_string(),
            )),
        }
    }
}

/// Login request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Registration request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Refresh request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Logout request body (best-effort refresh token revocation)
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest<'a> {
    pub refresh_token: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_authenticated_derivation() {
        let now = Utc::now();

        // No access token: never authenticated
        assert!(!Session::empty().is_authenticated(now));

        // Token without expiry info
        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expires_at: None,
        };
        assert!(session.is_authenticated(now));

        // Live token
        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expires_at: Some(now + Duration::minutes(10)),
        };
        assert!(session.is_authenticated(now));

        // Expired token with a refresh token still counts
        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(now - Duration::minutes(1)),
        };
        assert!(session.is_authenticated(now));

        // Expired token without a refresh token does not
        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expires_at: Some(now - Duration::minutes(1)),
        };
        assert!(!session.is_authenticated(now));
    }

    #[test]
    fn test_is_access_expired() {
        let now = Utc::now();

        assert!(!Session::empty().is_access_expired(now));

        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expires_at: Some(now - Duration::seconds(1)),
        };
        assert!(session.is_access_expired(now));

        let session = Session {
            access_token: Some("token".to_string()),
            refresh_token: None,
            expires_at: Some(now + Duration::seconds(60)),
        };
        assert!(!session.is_access_expired(now));
    }

    #[test]
    fn test_auth_response_camel_case() {
        let body = r#"{
            "accessToken": "acc-1",
            "refreshToken": "ref-1",
            "expiresInMs": 600000
        }"#;
        let resp: AuthResponse = serde_json::from_str(body).unwrap();
        let bundle = resp.into_bundle().unwrap();
        assert_eq!(bundle.access_token, "acc-1");
        assert_eq!(bundle.refresh_token.as_deref(), Some("ref-1"));
        assert_eq!(bundle.expires_in_ms, 600_000);
    }

    #[test]
    fn test_auth_response_defaults_expiry() {
        let resp: AuthResponse =
            serde_json::from_str(r#"{"accessToken": "acc", "refreshToken": "ref"}"#).unwrap();
        let bundle = resp.into_bundle().unwrap();
        assert_eq!(bundle.expires_in_ms, DEFAULT_EXPIRES_IN_MS);
    }

    #[test]
    fn test_auth_response_verification_challenge() {
        let resp: AuthResponse =
            serde_json::from_str(r#"{"requiresVerification": true}"#).unwrap();
        assert!(matches!(
            resp.into_outcome(),
            Ok(AuthOutcome::VerificationRequired)
        ));
    }

    #[test]
    fn test_auth_response_rejects_empty_token() {
        let resp: AuthResponse = serde_json::from_str(r#"{"accessToken": ""}"#).unwrap();
        assert!(matches!(
            resp.into_bundle(),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_refresh_request_wire_shape() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "ref-9",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"refreshToken": "ref-9"}));
    }
}
