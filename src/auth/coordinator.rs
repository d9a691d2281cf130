// Session coordinator
// Owns the single-flight refresh protocol and the waiter queue

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use super::gateway::AuthGateway;
use super::scheduler::RefreshScheduler;
use super::store::CredentialStore;
use super::types::{AuthOutcome, LoginOutcome, Session, TokenBundle, DEFAULT_EXPIRES_IN_MS};
use crate::error::{AuthFlowError, GatewayError, SessionError};

/// Why the session was cleared, delivered on the cleared-notification
/// stream so guards can route the user back to a login surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearedReason {
    Logout,
    RefreshFailed,
    CredentialsRejected,
}

/// One caller blocked on the in-flight refresh. Resolved or rejected
/// exactly once, in arrival order.
type Waiter = oneshot::Sender<Result<String, SessionError>>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

struct Inner {
    state: RefreshState,
    /// Session generation counter. Bumped on every clear and every
    /// sign-in, so a refresh result dispatched under an older epoch is
    /// discarded instead of resurrecting a dead session.
    epoch: u64,
}

/// The concurrency core of the session lifecycle.
///
/// All state transitions happen under a synchronous lock that is never
/// held across an await point; the only suspension points are the
/// gateway calls themselves, which run in detached driver tasks. The
/// coordinator is the sole writer of the credential store.
pub struct SessionCoordinator {
    store: CredentialStore,
    gateway: Arc<dyn AuthGateway>,
    scheduler: RefreshScheduler,
    inner: Mutex<Inner>,
    cleared_tx: broadcast::Sender<ClearedReason>,
}

impl SessionCoordinator {
    pub fn new(
        store: CredentialStore,
        gateway: Arc<dyn AuthGateway>,
        safety_margin: Duration,
    ) -> Arc<Self> {
        let (cleared_tx, _) = broadcast::channel(16);
        Arc::new_cyclic(|weak| Self {
            store,
            gateway,
            scheduler: RefreshScheduler::new(weak.clone(), safety_margin),
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                epoch: 0,
            }),
            cleared_tx,
        })
    }

    /// Re-arm the proactive refresh for a session restored from disk.
    pub fn resume(&self) {
        match self.store.read() {
            Ok(session) => {
                if session.access_token.is_some() {
                    if let Some(expires_at) = session.expires_at {
                        self.scheduler
                            .arm(expires_at, session.refresh_token.is_some());
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not read persisted session"),
        }
    }

    // ---- consumer surface -------------------------------------------------

    pub fn session(&self) -> Result<Session, SessionError> {
        self.store.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store
            .read()
            .map(|s| s.is_authenticated(Utc::now()))
            .unwrap_or(false)
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.read().ok().and_then(|s| s.access_token)
    }

    /// Notification stream fired once per forced logout or clear.
    pub fn subscribe_cleared(&self) -> broadcast::Receiver<ClearedReason> {
        self.cleared_tx.subscribe()
    }

    // ---- session-creating flows -------------------------------------------

    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome, AuthFlowError> {
        match self.gateway.authenticate(email, password).await? {
            AuthOutcome::VerificationRequired => {
                tracing::info!("login requires email verification");
                Ok(LoginOutcome::VerificationRequired)
            }
            AuthOutcome::Granted(bundle) => {
                let session = self.install_bundle(bundle)?;
                tracing::info!("login successful");
                Ok(LoginOutcome::Authenticated(session))
            }
        }
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthFlowError> {
        let bundle = self.gateway.register(name, email, password).await?;
        let session = self.install_bundle(bundle)?;
        tracing::info!("registration successful");
        Ok(session)
    }

    pub async fn send_otp(&self, email: &str) -> Result<(), GatewayError> {
        self.gateway.send_otp(email).await
    }

    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<Session, AuthFlowError> {
        let bundle = self.gateway.verify_otp(email, otp).await?;
        Ok(self.install_bundle(bundle)?)
    }

    pub async fn verify_signup_email(
        &self,
        email: &str,
        otp: &str,
    ) -> Result<Session, AuthFlowError> {
        let bundle = self.gateway.verify_signup_email(email, otp).await?;
        Ok(self.install_bundle(bundle)?)
    }

    /// Install tokens handed over out-of-band (the OAuth redirect page
    /// receives them as query parameters). No expiry arrives with them,
    /// so the default access-token lifetime applies.
    pub fn install_external_bundle(
        &self,
        access_token: String,
        refresh_token: Option<String>,
    ) -> Result<Session, SessionError> {
        self.install_bundle(TokenBundle {
            access_token,
            refresh_token,
            expires_in_ms: DEFAULT_EXPIRES_IN_MS,
        })
    }

    // ---- the single-flight refresh protocol -------------------------------

    /// Obtain an access token that is fresh right now.
    ///
    /// If a refresh is already in flight the caller joins its waiter
    /// queue; otherwise the caller starts one. `stale` is the token the
    /// caller just saw fail: when the stored token already differs, the
    /// refresh has happened in the meantime and the stored token is
    /// returned without another gateway call. Passing `None` forces a
    /// refresh (the proactive scheduler does this).
    pub async fn fresh_access_token(
        self: &Arc<Self>,
        stale: Option<&str>,
    ) -> Result<String, SessionError> {
        let rx = {
            let mut inner = self.lock_inner();
            match &mut inner.state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tracing::debug!(queue_len = waiters.len(), "refresh in flight, queueing");
                    rx
                }
                RefreshState::Idle => {
                    let session = self.store.read()?;

                    if let (Some(stale), Some(current)) =
                        (stale, session.access_token.as_deref())
                    {
                        if current != stale {
                            // Someone refreshed between the caller's 401
                            // and this call.
                            return Ok(current.to_string());
                        }
                    }

                    let Some(refresh_token) = session.refresh_token else {
                        tracing::warn!("refresh requested with no refresh token");
                        self.clear_locked(&mut inner, ClearedReason::RefreshFailed);
                        return Err(SessionError::NoRefreshToken);
                    };

                    let (tx, rx) = oneshot::channel();
                    inner.state = RefreshState::Refreshing { waiters: vec![tx] };
                    let epoch = inner.epoch;
                    let coordinator = Arc::clone(self);
                    // The driver runs detached: a caller dropping its
                    // future must not strand the queue, and logout must
                    // not cancel an in-flight gateway call.
                    tokio::spawn(async move {
                        let result = coordinator.gateway.refresh(&refresh_token).await;
                        coordinator.settle_refresh(epoch, refresh_token, result);
                    });
                    tracing::info!("starting token refresh");
                    rx
                }
            }
        };

        rx.await.map_err(|_| {
            SessionError::RefreshTransport("refresh task ended without a result".to_string())
        })?
    }

    /// Apply the driver's outcome and resolve every waiter exactly once,
    /// in arrival order.
    fn settle_refresh(
        &self,
        dispatched_epoch: u64,
        used_refresh_token: String,
        result: Result<TokenBundle, GatewayError>,
    ) {
        let (waiters, verdict) = {
            let mut inner = self.lock_inner();
            let waiters = match std::mem::replace(&mut inner.state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            };

            let verdict = if inner.epoch != dispatched_epoch {
                // The session was cleared or replaced while the call was
                // in flight; the late result must not resurrect it.
                tracing::info!("discarding refresh result for a superseded session");
                Err(SessionError::SessionCleared)
            } else {
                match result {
                    Ok(bundle) => {
                        match self.apply_refreshed_bundle(bundle, used_refresh_token) {
                            Ok(token) => Ok(token),
                            Err(e) => {
                                self.clear_locked(&mut inner, ClearedReason::RefreshFailed);
                                Err(e)
                            }
                        }
                    }
                    Err(e) => {
                        let e = map_refresh_failure(e);
                        tracing::error!(error = %e, "token refresh failed");
                        self.clear_locked(&mut inner, ClearedReason::RefreshFailed);
                        Err(e)
                    }
                }
            };
            (waiters, verdict)
        };

        for waiter in waiters {
            let _ = waiter.send(verdict.clone());
        }
    }

    fn apply_refreshed_bundle(
        &self,
        bundle: TokenBundle,
        previous_refresh_token: String,
    ) -> Result<String, SessionError> {
        let session = Session {
            access_token: Some(bundle.access_token.clone()),
            // A refresh response without a rotated token keeps the old one
            refresh_token: bundle.refresh_token.or(Some(previous_refresh_token)),
            expires_at: Some(Utc::now() + ChronoDuration::milliseconds(bundle.expires_in_ms)),
        };
        self.store.write(&session)?;
        if let Some(expires_at) = session.expires_at {
            self.scheduler
                .arm(expires_at, session.refresh_token.is_some());
        }
        tracing::info!(expires_at = ?session.expires_at, "access token refreshed");
        Ok(bundle.access_token)
    }

    // ---- clearing ---------------------------------------------------------

    /// Explicit logout: clear local state, cancel the proactive timer,
    /// and revoke the refresh token server-side on a best-effort basis.
    pub fn logout(&self) {
        let refresh_token = self.store.read().ok().and_then(|s| s.refresh_token);
        self.clear_session(ClearedReason::Logout);
        if let Some(token) = refresh_token {
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move {
                if let Err(e) = gateway.logout(&token).await {
                    tracing::debug!(error = %e, "refresh token revocation failed");
                }
            });
        }
    }

    /// Clear the session and emit one cleared notification. Used by the
    /// request interceptor when credentials are rejected outright.
    pub fn clear_session(&self, reason: ClearedReason) {
        let mut inner = self.lock_inner();
        self.clear_locked(&mut inner, reason);
    }

    fn clear_locked(&self, inner: &mut Inner, reason: ClearedReason) {
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "failed to clear credential store");
        }
        self.scheduler.cancel();
        inner.epoch += 1;
        let _ = self.cleared_tx.send(reason);
        tracing::info!(?reason, "session cleared");
    }

    fn install_bundle(&self, bundle: TokenBundle) -> Result<Session, SessionError> {
        let session = Session {
            access_token: Some(bundle.access_token),
            refresh_token: bundle.refresh_token,
            expires_at: Some(Utc::now() + ChronoDuration::milliseconds(bundle.expires_in_ms)),
        };
        let mut inner = self.lock_inner();
        self.store.write(&session)?;
        // A fresh sign-in supersedes any refresh still in flight.
        inner.epoch += 1;
        if let Some(expires_at) = session.expires_at {
            self.scheduler
                .arm(expires_at, session.refresh_token.is_some());
        }
        Ok(session)
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("session state lock poisoned")
    }
}

fn map_refresh_failure(error: GatewayError) -> SessionError {
    match error {
        GatewayError::Rejected { status, message } if status >= 500 => {
            SessionError::RefreshTransport(format!("{status} - {message}"))
        }
        GatewayError::Rejected { status, message } => {
            SessionError::RefreshRejected(format!("{status} - {message}"))
        }
        GatewayError::Transport(msg) | GatewayError::Malformed(msg) => {
            SessionError::RefreshTransport(msg)
        }
    }
}
