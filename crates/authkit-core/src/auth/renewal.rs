use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::token::{self, default_renewal_horizon};
use super::{AuthError, AuthTransport, CredentialPair, CredentialStore, SingleFlight};

const EVENT_CAPACITY: usize = 16;

/// Outcome of a renewal round trip, published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalEvent {
    Renewed,
    /// The backend refused the refresh token (401/403). The session cannot be recovered.
    Rejected { status: u16 },
    /// Network failure or any other error; the stored refresh token may still be good.
    Failed,
}

/// Called with the HTTP status when the backend refuses the refresh token.
pub type RejectionHook = Arc<dyn Fn(u16) + Send + Sync>;

// State a pending renewal shares with the coordinator after the caller that started it is gone.
struct Shared {
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn AuthTransport>,
    events: broadcast::Sender<RenewalEvent>,
    // Bumped by `invalidate`. Held while a renewed pair is written so the two cannot interleave.
    epoch: Mutex<u64>,
    on_rejected: Mutex<Option<RejectionHook>>,
}

/// Hands out valid access tokens and renews them at most once at a time.
pub struct RenewalCoordinator {
    shared: Arc<Shared>,
    horizon: Duration,
    flight: SingleFlight<Option<CredentialPair>>,
}

impl RenewalCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, transport: Arc<dyn AuthTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                store,
                transport,
                events,
                epoch: Mutex::new(0),
                on_rejected: Mutex::new(None),
            }),
            horizon: default_renewal_horizon(),
            flight: SingleFlight::new(),
        }
    }

    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RenewalEvent> {
        self.shared.events.subscribe()
    }

    /// Install the callback run when the refresh token is rejected, replacing any previous one.
    ///
    /// It runs inside the renewal, before any caller waiting on it resumes.
    pub fn on_rejected(&self, hook: RejectionHook) {
        *self
            .shared
            .on_rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    /// Discard the outcome of any renewal that is still pending.
    ///
    /// Used on logout: a pair that arrives afterwards is neither stored nor returned.
    pub fn invalidate(&self) {
        *self.shared.lock_epoch() += 1;
    }

    /// Whether a renewal round trip is currently pending.
    pub fn is_renewing(&self) -> bool {
        self.flight.is_in_flight()
    }

    /// Return the stored access token if it is not expiring soon, otherwise renew it.
    ///
    /// `Ok(None)` means there is no way to obtain a token: no refresh token is stored or the
    /// renewal failed. Errors come only from the credential store.
    pub async fn get_valid_access_token(&self) -> Result<Option<String>, AuthError> {
        let store = &self.shared.store;
        if let Some(access) = store.access_token()? {
            if !token::is_expiring_soon(&access, self.horizon) {
                return Ok(Some(access));
            }
        }

        if store.refresh_token()?.is_none() {
            return Ok(None);
        }

        Ok(self.refresh().await.map(|pair| pair.access))
    }

    /// Exchange the stored refresh token for a new pair and store it.
    ///
    /// Callers arriving while a renewal is pending share its result. Failures return `None`
    /// and leave the store untouched; clearing it is the session's decision.
    pub async fn refresh(&self) -> Option<CredentialPair> {
        let shared = Arc::clone(&self.shared);
        if self.flight.is_in_flight() {
            debug!("joining pending token renewal");
        }
        self.flight.run(move || renew(shared)).await
    }
}

impl Shared {
    fn lock_epoch(&self) -> std::sync::MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rejected(&self, status: u16) {
        let hook = self
            .on_rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(status);
        }
    }

    /// Store the pair unless the coordinator was invalidated since `started`.
    fn commit(&self, started: u64, pair: &CredentialPair) -> Result<bool, AuthError> {
        let epoch = self.lock_epoch();
        if *epoch != started {
            return Ok(false);
        }
        self.store.store_pair(pair)?;
        Ok(true)
    }
}

async fn renew(shared: Arc<Shared>) -> Option<CredentialPair> {
    let started = *shared.lock_epoch();
    let refresh_token = match shared.store.refresh_token() {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("no refresh token stored, skipping renewal");
            return None;
        }
        Err(err) => {
            warn!(error = %err, "failed to read refresh token");
            return None;
        }
    };

    debug!("renewing access token");
    let outcome = match shared.transport.refresh(&refresh_token).await {
        Ok(pair) => match shared.commit(started, &pair) {
            Ok(true) => {
                info!("access token renewed");
                let _ = shared.events.send(RenewalEvent::Renewed);
                return Some(pair);
            }
            Ok(false) => {
                debug!("session ended during renewal, discarding new tokens");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "failed to store renewed tokens");
                RenewalEvent::Failed
            }
        },
        Err(err) if err.is_auth_error() => {
            warn!(status = err.status(), error = %err, "refresh token rejected");
            let current = *shared.lock_epoch() == started;
            if current {
                shared.rejected(err.status());
            }
            RenewalEvent::Rejected {
                status: err.status(),
            }
        }
        Err(err) => {
            warn!(status = err.status(), error = %err, "token renewal failed");
            RenewalEvent::Failed
        }
    };
    let _ = shared.events.send(outcome);
    None
}
