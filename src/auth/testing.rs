// Scripted gateway for coordinator tests

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::gateway::AuthGateway;
use super::types::{AuthOutcome, TokenBundle};
use crate::error::GatewayError;

/// In-process gateway double with call counting, injectable delay and
/// scripted responses. Unscripted refresh calls succeed with a bundle
/// derived from the call number (`token-1`, `token-2`, ...).
pub(crate) struct MockGateway {
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_script: Mutex<VecDeque<Result<TokenBundle, GatewayError>>>,
    authenticate_script: Mutex<VecDeque<Result<AuthOutcome, GatewayError>>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_script: Mutex::new(VecDeque::new()),
            authenticate_script: Mutex::new(VecDeque::new()),
        })
    }

    pub fn with_refresh_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut this = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("mock already shared"));
        this.refresh_delay = delay;
        Arc::new(this)
    }

    pub fn with_refresh_result(
        self: Arc<Self>,
        result: Result<TokenBundle, GatewayError>,
    ) -> Arc<Self> {
        self.refresh_script.lock().unwrap().push_back(result);
        self
    }

    pub fn with_authenticate_result(
        self: Arc<Self>,
        result: Result<AuthOutcome, GatewayError>,
    ) -> Arc<Self> {
        self.authenticate_script.lock().unwrap().push_back(result);
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    fn numbered_bundle(n: usize) -> TokenBundle {
        TokenBundle {
            access_token: format!("token-{n}"),
            refresh_token: Some(format!("refresh-{n}")),
            expires_in_ms: 600_000,
        }
    }
}

#[async_trait]
impl AuthGateway for MockGateway {
    async fn authenticate(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<AuthOutcome, GatewayError> {
        self.authenticate_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(AuthOutcome::Granted(Self::numbered_bundle(0))))
    }

    async fn register(
        &self,
        _name: &str,
        _email: &str,
        _password: &str,
    ) -> Result<TokenBundle, GatewayError> {
        Ok(Self::numbered_bundle(0))
    }

    async fn send_otp(&self, _email: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn verify_otp(&self, _email: &str, _otp: &str) -> Result<TokenBundle, GatewayError> {
        Ok(Self::numbered_bundle(0))
    }

    async fn verify_signup_email(
        &self,
        _email: &str,
        _otp: &str,
    ) -> Result<TokenBundle, GatewayError> {
        Ok(Self::numbered_bundle(0))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenBundle, GatewayError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        self.refresh_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Self::numbered_bundle(n)))
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), GatewayError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
