// Proactive refresh scheduling
// One-shot timer that renews the access token ahead of expiry

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::coordinator::SessionCoordinator;

/// Arms a single deferred task that triggers a refresh `safety_margin`
/// before the access token expires.
///
/// The armed handle only ever covers the delay timer; the refresh itself
/// runs as a detached task, so cancelling an armed timer can never abort
/// an in-flight gateway call.
pub(crate) struct RefreshScheduler {
    coordinator: Weak<SessionCoordinator>,
    safety_margin: ChronoDuration,
    armed: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(coordinator: Weak<SessionCoordinator>, safety_margin: Duration) -> Self {
        Self {
            coordinator,
            safety_margin: ChronoDuration::from_std(safety_margin)
                .unwrap_or_else(|_| ChronoDuration::seconds(300)),
            armed: Mutex::new(None),
        }
    }

    /// Arm the proactive refresh for a token expiring at `expires_at`.
    /// Any previously armed timer is cancelled first, so repeated calls
    /// leave exactly one armed task.
    pub fn arm(&self, expires_at: DateTime<Utc>, has_refresh_token: bool) {
        let mut armed = self.lock();
        if let Some(handle) = armed.take() {
            handle.abort();
        }

        let delay = expires_at - Utc::now() - self.safety_margin;
        if delay > ChronoDuration::zero() {
            let sleep_for = delay.to_std().unwrap_or_default();
            let coordinator = self.coordinator.clone();
            tracing::debug!(delay_secs = sleep_for.as_secs(), "armed proactive refresh");
            *armed = Some(tokio::spawn(async move {
                tokio::time::sleep(sleep_for).await;
                fire(coordinator);
            }));
        } else if has_refresh_token {
            tracing::debug!("access token already inside safety margin, refreshing now");
            fire(self.coordinator.clone());
        }
    }

    /// Cancel any armed timer. Called on logout and terminal clearing.
    pub fn cancel(&self) {
        if let Some(handle) = self.lock().take() {
            handle.abort();
            tracing::debug!("cancelled armed proactive refresh");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.armed.lock().expect("scheduler lock poisoned")
    }
}

/// Run the refresh detached from the armed handle.
fn fire(coordinator: Weak<SessionCoordinator>) {
    let Some(coordinator) = coordinator.upgrade() else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = coordinator.fresh_access_token(None).await {
            tracing::warn!(error = %e, "proactive refresh failed");
        }
    });
}
