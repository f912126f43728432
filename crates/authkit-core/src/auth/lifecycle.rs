use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration as StdDuration;

use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::ApiError;

use super::token;
use super::{
    AuthError, AuthTransport, CredentialPair, CredentialStore, LoginCredentials, OAuthBridge,
    OAuthProvider, RegisterCredentials, RenewalCoordinator, ResetPasswordCredentials,
    SingleFlight, User,
};

const DEFAULT_RENEWAL_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);

/// Failures of explicit session actions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl SessionError {
    /// The normalized HTTP error behind this failure, if the backend answered.
    pub fn as_http(&self) -> Option<&crate::http::HttpError> {
        match self {
            SessionError::Api(err) => err.as_http(),
            SessionError::Auth(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Restoring,
    Authenticated,
    Anonymous,
}

/// Snapshot of what the application may render.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_initialized: bool,
}

#[derive(Default)]
struct SessionData {
    phase: Option<SessionPhase>,
    user: Option<User>,
    initialized: bool,
    timer: Option<CancellationToken>,
}

struct SessionInner {
    renewal: Arc<RenewalCoordinator>,
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn CredentialStore>,
    oauth: Option<Arc<dyn OAuthBridge>>,
    renewal_interval: StdDuration,
    data: Mutex<SessionData>,
    restore: SingleFlight<()>,
}

/// Configures a [`SessionLifecycle`] before it is shared.
pub struct SessionBuilder {
    renewal: Arc<RenewalCoordinator>,
    transport: Arc<dyn AuthTransport>,
    store: Arc<dyn CredentialStore>,
    oauth: Option<Arc<dyn OAuthBridge>>,
    renewal_interval: StdDuration,
}

impl SessionBuilder {
    pub fn oauth_bridge(mut self, bridge: Arc<dyn OAuthBridge>) -> Self {
        self.oauth = Some(bridge);
        self
    }

    pub fn renewal_interval(mut self, interval: StdDuration) -> Self {
        self.renewal_interval = interval;
        self
    }

    /// Finish the session and make it sign out whenever the coordinator's refresh is rejected.
    pub fn build(self) -> SessionLifecycle {
        let inner = Arc::new(SessionInner {
            renewal: self.renewal,
            transport: self.transport,
            store: self.store,
            oauth: self.oauth,
            renewal_interval: self.renewal_interval,
            data: Mutex::new(SessionData::default()),
            restore: SingleFlight::new(),
        });

        let session = Arc::downgrade(&inner);
        inner.renewal.on_rejected(Arc::new(move |status| {
            let Some(inner) = Weak::upgrade(&session) else {
                return;
            };
            warn!(status, "refresh token rejected, signing out");
            if let Err(err) = inner.logout() {
                warn!(error = %err, "failed to clear stored credentials");
            }
        }));

        SessionLifecycle { inner }
    }
}

/// Owns the signed-in state: restores it at startup, establishes it on login and tears it down
/// on logout or when the backend rejects the refresh token.
///
/// Cloning is cheap and every clone observes the same session.
#[derive(Clone)]
pub struct SessionLifecycle {
    inner: Arc<SessionInner>,
}

impl SessionLifecycle {
    pub fn new(
        renewal: Arc<RenewalCoordinator>,
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::builder(renewal, transport, store).build()
    }

    pub fn builder(
        renewal: Arc<RenewalCoordinator>,
        transport: Arc<dyn AuthTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> SessionBuilder {
        SessionBuilder {
            renewal,
            transport,
            store,
            oauth: None,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
        }
    }

    pub fn state(&self) -> SessionState {
        let data = self.inner.lock();
        SessionState {
            user: data.user.clone(),
            is_authenticated: data.user.is_some(),
            is_initialized: data.initialized,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner
            .lock()
            .phase
            .unwrap_or(SessionPhase::Uninitialized)
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().user.is_some()
    }

    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        &self.inner.renewal
    }

    /// Rebuild the session from stored credentials.
    ///
    /// Never fails: any problem leaves the session anonymous with the store cleared. Calls made
    /// while a restore is running wait for that restore instead of starting another.
    pub async fn initialize(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner
            .restore
            .run(move || async move { inner.restore_session().await })
            .await
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, SessionError> {
        let pair = self.inner.transport.login(credentials).await?;
        self.inner.store.store_pair(&pair)?;
        let user = self.inner.transport.current_user().await?;
        self.inner.enter_authenticated(user.clone());
        info!("signed in with email and password");
        Ok(user)
    }

    /// Create an account and sign into it.
    ///
    /// Backends that answer registration with tokens are trusted directly; otherwise the new
    /// account is signed in with the same email and password.
    pub async fn register(
        &self,
        credentials: &RegisterCredentials,
        inviter_id: Option<&str>,
    ) -> Result<User, SessionError> {
        let response = self.inner.transport.register(credentials, inviter_id).await?;
        match response.tokens {
            Some(pair) => {
                self.inner.store.store_pair(&pair)?;
                self.inner.enter_authenticated(response.user.clone());
                info!("registered and signed in");
                Ok(response.user)
            }
            None => {
                debug!("registration returned no tokens, signing in");
                self.login(&credentials.login_credentials()).await
            }
        }
    }

    pub async fn login_with_provider(&self, provider: OAuthProvider) -> Result<User, SessionError> {
        let bridge = self
            .inner
            .oauth
            .as_ref()
            .ok_or(AuthError::OAuthUnavailable)?;
        let token = bridge.sign_in(provider).await?;
        let login = self
            .inner
            .transport
            .login_with_provider(provider, &token)
            .await?;
        self.inner
            .store
            .store_pair(&CredentialPair::new(login.access, login.refresh))?;
        self.inner.enter_authenticated(login.user.clone());
        info!(%provider, "signed in with identity provider");
        Ok(login.user)
    }

    /// Forget the user and both tokens. Calling it again has no further effect.
    ///
    /// In-memory state is cleared before the store, so the session is anonymous even when the
    /// store write fails.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.inner.logout()
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), SessionError> {
        self.inner.transport.forgot_password(email).await?;
        Ok(())
    }

    pub async fn reset_password(
        &self,
        credentials: &ResetPasswordCredentials,
        user_id: &str,
        token: &str,
    ) -> Result<(), SessionError> {
        self.inner
            .transport
            .reset_password(credentials, user_id, token)
            .await?;
        Ok(())
    }

    /// Reload the current user and hold on to it.
    pub async fn fetch_user(&self) -> Result<User, SessionError> {
        let user = self.inner.transport.current_user().await?;
        self.inner.enter_authenticated(user.clone());
        Ok(user)
    }

    pub async fn ensure_valid_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self.inner.renewal.get_valid_access_token().await?)
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn restore_session(self: Arc<Self>) {
        self.lock().phase = Some(SessionPhase::Restoring);

        match self.restore_user().await {
            Ok(Some(user)) => {
                info!("session restored");
                self.enter_authenticated(user);
            }
            Ok(None) => {
                debug!("no session to restore");
                self.enter_anonymous();
            }
            Err(err) => {
                warn!(error = %err, "session restore failed");
                self.enter_anonymous();
            }
        }

        self.lock().initialized = true;
    }

    async fn restore_user(&self) -> Result<Option<User>, SessionError> {
        let access = self.store.access_token()?;
        let refresh = self.store.refresh_token()?;

        let usable = access
            .as_deref()
            .is_some_and(|access| !token::is_expiring_soon(access, self.renewal.horizon()));
        if usable {
            match self.transport.current_user().await {
                Ok(user) => return Ok(Some(user)),
                Err(err) => {
                    debug!(status = err.status(), "stored access token not accepted");
                }
            }
        }

        if refresh.is_none() {
            return Ok(None);
        }
        if self.renewal.refresh().await.is_none() {
            return Ok(None);
        }
        Ok(Some(self.transport.current_user().await?))
    }

    fn enter_authenticated(self: &Arc<Self>, user: User) {
        let mut data = self.lock();
        data.user = Some(user);
        data.phase = Some(SessionPhase::Authenticated);
        if data.timer.is_none() {
            data.timer = Some(spawn_renewal_timer(self));
        }
    }

    fn enter_anonymous(&self) {
        self.reset_state();
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear stored credentials");
        }
    }

    fn reset_state(&self) {
        self.renewal.invalidate();
        let mut data = self.lock();
        data.user = None;
        data.phase = Some(SessionPhase::Anonymous);
        if let Some(timer) = data.timer.take() {
            timer.cancel();
        }
    }

    fn logout(&self) -> Result<(), AuthError> {
        self.reset_state();
        self.store.clear()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.cancel();
        }
    }
}

/// Periodically keeps the access token fresh. A rejected renewal signs out through the
/// coordinator's hook, which also cancels this task.
fn spawn_renewal_timer(inner: &Arc<SessionInner>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let stopped = cancel.clone();
    let session = Arc::downgrade(inner);
    let period = inner.renewal_interval;

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = Weak::upgrade(&session) else { break };
                    match inner.renewal.get_valid_access_token().await {
                        Ok(Some(_)) => debug!("renewal check passed"),
                        Ok(None) => warn!("renewal check found no usable access token"),
                        Err(err) => warn!(error = %err, "renewal check failed"),
                    }
                }
            }
        }
        debug!("renewal timer stopped");
    });

    cancel
}
