use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use backend_core::{ErrorKind, RefreshDecision, RefreshPhase, RefreshPolicy};
use backend_platform::SessionStore;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::identity::IdentityProvider;

/// Wraps remote calls with transparent credential refresh.
///
/// The guard is the only writer of the stored credential. Refreshes are
/// single-flight: concurrent callers holding the same stale credential share
/// one exchange with the identity provider.
pub struct TokenRefreshGuard {
    session: Arc<dyn SessionStore>,
    identity: Arc<dyn IdentityProvider>,
    policy: RefreshPolicy,
    phase: Mutex<RefreshPhase>,
    in_flight: tokio::sync::Mutex<()>,
    /// Bumped whenever the local session is cleared.
    cleared: watch::Sender<u64>,
}

impl TokenRefreshGuard {
    pub fn new(session: Arc<dyn SessionStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_policy(session, identity, RefreshPolicy::default())
    }

    pub fn with_policy(
        session: Arc<dyn SessionStore>,
        identity: Arc<dyn IdentityProvider>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            session,
            identity,
            policy,
            phase: Mutex::new(RefreshPhase::Idle),
            in_flight: tokio::sync::Mutex::new(()),
            cleared: watch::Sender::new(0),
        }
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    /// Notified after every logout, forced or requested.
    pub fn subscribe_cleared(&self) -> watch::Receiver<u64> {
        self.cleared.subscribe()
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` with the current credential, refreshing and replaying it on
    /// `InvalidToken` within the policy budget.
    pub async fn call<T, F, Fut>(&self, action: &'static str, mut op: F) -> Result<T, ErrorKind>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ErrorKind>>,
    {
        let mut refreshes_done = 0;
        loop {
            let token = self.session.credential().unwrap_or_default();
            let error = match op(token.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.policy.decide(error, refreshes_done) {
                RefreshDecision::Surface(surfaced) => {
                    if surfaced != error {
                        warn!(action, "credential rejected again after refresh");
                    }
                    return Err(surfaced);
                }
                RefreshDecision::Refresh => {
                    refreshes_done += 1;
                    debug!(action, "credential rejected; refreshing");
                    self.refresh(&token).await?;
                }
            }
        }
    }

    /// Forget the local session after the identity provider gave up.
    pub fn logout(&self) {
        match self.session.clear_session() {
            Ok(()) => info!("session cleared"),
            Err(err) => warn!(error = %err, "session could not be cleared"),
        }
        self.cleared.send_modify(|generation| *generation += 1);
    }

    async fn refresh(&self, stale: &str) -> Result<(), ErrorKind> {
        let _flight = self.in_flight.lock().await;
        if self
            .session
            .credential()
            .is_some_and(|current| current != stale)
        {
            debug!("credential already replaced by a concurrent refresh");
            return Ok(());
        }

        self.set_phase(RefreshPhase::Refreshing);
        let outcome = self.identity.refresh_token().await;
        self.set_phase(RefreshPhase::Idle);

        match outcome {
            Ok(token) => self.session.save_credential(&token).map_err(|err| {
                warn!(error = %err, "refreshed credential could not be stored");
                ErrorKind::Unknown
            }),
            Err(error) => {
                warn!(error = %error, "credential refresh failed; logging out");
                self.logout();
                Err(self.policy.refresh_failed())
            }
        }
    }

    fn set_phase(&self, phase: RefreshPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }
}
