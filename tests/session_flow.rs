// Integration tests for the session lifecycle
//
// These tests drive the real HTTP gateway and the request interceptor
// against a mock backend, covering login, OTP, refresh single-flight
// and forced-logout behavior.

use futures::future::join_all;
use tokio_test::assert_ok;
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use clockwork_session::auth::{
    ClearedReason, CredentialStore, HttpAuthGateway, LoginOutcome, SessionCoordinator,
};
use clockwork_session::error::{ApiError, AuthFlowError, GatewayError, SessionError};
use clockwork_session::http_client::ApiClient;

// ==================================================================================================
// Test Helpers
// ==================================================================================================

const MARGIN: Duration = Duration::from_secs(300);

fn build_coordinator(server_url: &str) -> Arc<SessionCoordinator> {
    let store = CredentialStore::open_in_memory().expect("in-memory store");
    let gateway = Arc::new(
        HttpAuthGateway::new(server_url, Duration::from_secs(5)).expect("gateway"),
    );
    SessionCoordinator::new(store, gateway, MARGIN)
}

fn bundle_body(access: &str, refresh: &str) -> String {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresInMs": 600_000
    })
    .to_string()
}

// ==================================================================================================
// Sign-in Flows
// ==================================================================================================

#[tokio::test]
async fn test_login_installs_session() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/auth/authenticate")
        .match_body(Matcher::Json(json!({
            "email": "ada@example.com",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_body(bundle_body("acc-1", "ref-1"))
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    let outcome = coordinator
        .login("ada@example.com", "hunter2")
        .await
        .unwrap();

    assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
    assert!(coordinator.is_authenticated());
    assert_eq!(coordinator.access_token().as_deref(), Some("acc-1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_login_surfaces_verification_challenge() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/auth/authenticate")
        .with_status(200)
        .with_body(json!({"requiresVerification": true}).to_string())
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    let outcome = coordinator
        .login("ada@example.com", "hunter2")
        .await
        .unwrap();

    assert!(matches!(outcome, LoginOutcome::VerificationRequired));
    assert!(!coordinator.is_authenticated());
}

#[tokio::test]
async fn test_login_rejection_creates_no_session() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/auth/authenticate")
        .with_status(401)
        .with_body("bad credentials")
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    let result = coordinator.login("ada@example.com", "wrong").await;

    match result {
        Err(AuthFlowError::Gateway(GatewayError::Rejected { status, .. })) => {
            assert_eq!(status, 401)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!coordinator.is_authenticated());
}

#[tokio::test]
async fn test_register_flow() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::Json(json!({
            "name": "Ada",
            "email": "ada@example.com",
            "password": "hunter2"
        })))
        .with_status(200)
        .with_body(bundle_body("acc-r", "ref-r"))
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .register("Ada", "ada@example.com", "hunter2")
        .await
        .unwrap();

    assert!(coordinator.is_authenticated());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_otp_flow() {
    let mut server = mockito::Server::new_async().await;
    let send_mock = server
        .mock("POST", "/api/auth/otp/send")
        .match_query(Matcher::UrlEncoded(
            "email".into(),
            "ada@example.com".into(),
        ))
        .with_status(200)
        .create_async()
        .await;
    let verify_mock = server
        .mock("POST", "/api/auth/otp/verify")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("email".into(), "ada@example.com".into()),
            Matcher::UrlEncoded("otp".into(), "123456".into()),
        ]))
        .with_status(200)
        .with_body(bundle_body("acc-otp", "ref-otp"))
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator.send_otp("ada@example.com").await.unwrap();
    coordinator
        .verify_otp("ada@example.com", "123456")
        .await
        .unwrap();

    assert!(coordinator.is_authenticated());
    assert_eq!(coordinator.access_token().as_deref(), Some("acc-otp"));
    send_mock.assert_async().await;
    verify_mock.assert_async().await;
}

// ==================================================================================================
// Refresh Wire Contract
// ==================================================================================================

#[tokio::test]
async fn test_refresh_sends_camel_case_refresh_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/auth/refresh-token")
        .match_body(Matcher::Json(json!({"refreshToken": "ref-0"})))
        .with_status(200)
        .with_body(bundle_body("acc-2", "ref-2"))
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("acc-1".to_string(), Some("ref-0".to_string()))
        .unwrap();

    let token = coordinator.fresh_access_token(None).await.unwrap();

    assert_eq!(token, "acc-2");
    let session = coordinator.session().unwrap();
    assert_eq!(session.refresh_token.as_deref(), Some("ref-2"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_rejected_refresh_logs_out() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(401)
        .with_body("refresh token revoked")
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("acc-1".to_string(), Some("ref-0".to_string()))
        .unwrap();
    let mut cleared = coordinator.subscribe_cleared();

    let result = coordinator.fresh_access_token(None).await;

    assert!(matches!(result, Err(SessionError::RefreshRejected(_))));
    assert!(!coordinator.is_authenticated());
    let session = coordinator.session().unwrap();
    assert!(session.access_token.is_none());
    assert!(session.refresh_token.is_none());
    assert!(session.expires_at.is_none());
    assert_eq!(cleared.try_recv(), Ok(ClearedReason::RefreshFailed));
}

// ==================================================================================================
// Request Interceptor
// ==================================================================================================

#[tokio::test]
async fn test_interceptor_refreshes_and_retries_once() {
    let mut server = mockito::Server::new_async().await;
    let expired_mock = server
        .mock("GET", "/api/tasks")
        .match_header("authorization", "Bearer stale-token")
        .with_status(401)
        .with_header("X-Token-Expired", "true")
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(200)
        .with_body(bundle_body("fresh-token", "ref-2"))
        .create_async()
        .await;
    let retry_mock = server
        .mock("GET", "/api/tasks")
        .match_header("authorization", "Bearer fresh-token")
        .with_status(200)
        .with_body(r#"[{"id": 1, "title": "water the plants"}]"#)
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("stale-token".to_string(), Some("ref-0".to_string()))
        .unwrap();
    let client = ApiClient::new(coordinator.clone(), 5, 5).unwrap();

    let response = client.get(&format!("{}/api/tasks", server.url())).await.unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("water the plants"));
    assert_eq!(coordinator.access_token().as_deref(), Some("fresh-token"));

    expired_mock.assert_async().await;
    refresh_mock.assert_async().await;
    retry_mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_401s_collapse_into_one_refresh() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks")
        .match_header("authorization", "Bearer stale-token")
        .with_status(401)
        .with_header("X-Token-Expired", "true")
        .expect(3)
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/api/auth/refresh-token")
        .with_status(200)
        .with_body(bundle_body("fresh-token", "ref-2"))
        .expect(1)
        .create_async()
        .await;
    let retry_mock = server
        .mock("GET", "/api/tasks")
        .match_header("authorization", "Bearer fresh-token")
        .with_status(200)
        .with_body("[]")
        .expect(3)
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("stale-token".to_string(), Some("ref-0".to_string()))
        .unwrap();
    let client = Arc::new(ApiClient::new(coordinator.clone(), 5, 5).unwrap());

    let url = format!("{}/api/tasks", server.url());
    let requests = (0..3).map(|_| {
        let client = client.clone();
        let url = url.clone();
        async move { client.get(&url).await }
    });
    let responses = join_all(requests).await;

    for response in responses {
        assert_eq!(response.unwrap().status(), 200);
    }
    refresh_mock.assert_async().await;
    retry_mock.assert_async().await;
}

#[tokio::test]
async fn test_non_expiry_401_clears_session_without_refresh() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks")
        .with_status(401)
        .with_body("account disabled")
        .create_async()
        .await;
    let refresh_mock = server
        .mock("POST", "/api/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("acc-1".to_string(), Some("ref-0".to_string()))
        .unwrap();
    let mut cleared = coordinator.subscribe_cleared();
    let client = ApiClient::new(coordinator.clone(), 5, 5).unwrap();

    let result = client.get(&format!("{}/api/tasks", server.url())).await;

    match result {
        Err(ApiError::Auth(SessionError::CredentialsRejected)) => {}
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!coordinator.is_authenticated());
    assert_eq!(cleared.try_recv(), Ok(ClearedReason::CredentialsRejected));
    refresh_mock.assert_async().await;
}

#[tokio::test]
async fn test_non_401_errors_pass_through_unchanged() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    coordinator
        .install_external_bundle("acc-1".to_string(), Some("ref-0".to_string()))
        .unwrap();
    let client = ApiClient::new(coordinator.clone(), 5, 5).unwrap();

    let response = assert_ok!(client.get(&format!("{}/api/tasks", server.url())).await);

    // Business errors are not the session core's concern
    assert_eq!(response.status(), 500);
    assert!(coordinator.is_authenticated());
}

#[tokio::test]
async fn test_requests_without_session_carry_no_bearer() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/tasks")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let coordinator = build_coordinator(&server.url());
    let client = ApiClient::new(coordinator, 5, 5).unwrap();

    let response = assert_ok!(client.get(&format!("{}/api/tasks", server.url())).await);

    assert_eq!(response.status(), 200);
    mock.assert_async().await;
}
