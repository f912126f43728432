//! Scripted collaborators and token builders shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use crate::auth::{
    AuthError, AuthTransport, CredentialPair, LoginCredentials, OAuthBridge, OAuthProvider,
    ProviderLogin, ProviderToken, RegisterCredentials, RegisterResponse,
    ResetPasswordCredentials, User, UserId,
};
use crate::http::{ApiError, HttpError};

/// Unsigned JWT-shaped token carrying only an `exp` claim.
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp, "sub": "1" }).to_string());
    format!("{header}.{payload}.signature")
}

/// Token valid for another hour.
pub(crate) fn fresh_jwt() -> String {
    jwt_with_exp((Utc::now() + ChronoDuration::hours(1)).timestamp())
}

/// Token inside the five minute renewal window.
pub(crate) fn expiring_jwt() -> String {
    jwt_with_exp((Utc::now() + ChronoDuration::minutes(2)).timestamp())
}

pub(crate) fn sample_user(email: &str) -> User {
    User {
        id: UserId::Number(1),
        email: email.to_owned(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        created_at: None,
        is_staff: false,
        extra: Default::default(),
    }
}

fn http_error(status: u16) -> ApiError {
    ApiError::Http(HttpError::from_response(status, "", None))
}

enum RefreshScript {
    Renew(CredentialPair),
    Reject(u16),
    ServerError,
}

struct Script {
    refresh: RefreshScript,
    last_refresh_token: Option<String>,
    login: Option<CredentialPair>,
    user: Option<User>,
    user_failures: VecDeque<u16>,
    register: Option<RegisterResponse>,
    provider: Option<ProviderLogin>,
    forgot_password: Vec<String>,
}

/// In-memory [`AuthTransport`] whose answers are set by each test.
pub(crate) struct ScriptedTransport {
    refresh_delay: Duration,
    user_delay: Duration,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
    user_calls: AtomicUsize,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            refresh_delay: Duration::ZERO,
            user_delay: Duration::ZERO,
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
            user_calls: AtomicUsize::new(0),
            script: Mutex::new(Script {
                refresh: RefreshScript::Reject(401),
                last_refresh_token: None,
                login: None,
                user: None,
                user_failures: VecDeque::new(),
                register: None,
                provider: None,
                forgot_password: Vec::new(),
            }),
        }
    }

    pub(crate) fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    pub(crate) fn with_user_delay(mut self, delay: Duration) -> Self {
        self.user_delay = delay;
        self
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub(crate) fn renew_with(&self, pair: CredentialPair) {
        self.script().refresh = RefreshScript::Renew(pair);
    }

    pub(crate) fn reject_refresh(&self, status: u16) {
        self.script().refresh = RefreshScript::Reject(status);
    }

    pub(crate) fn fail_refresh_with_server_error(&self) {
        self.script().refresh = RefreshScript::ServerError;
    }

    pub(crate) fn login_with(&self, pair: CredentialPair) {
        self.script().login = Some(pair);
    }

    pub(crate) fn serve_user(&self, user: User) {
        self.script().user = Some(user);
    }

    pub(crate) fn fail_next_user_fetch(&self, status: u16) {
        self.script().user_failures.push_back(status);
    }

    pub(crate) fn register_with(&self, response: RegisterResponse) {
        self.script().register = Some(response);
    }

    pub(crate) fn provider_login_with(&self, login: ProviderLogin) {
        self.script().provider = Some(login);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_refresh_token(&self) -> Option<String> {
        self.script().last_refresh_token.clone()
    }

    pub(crate) fn forgot_password_requests(&self) -> Vec<String> {
        self.script().forgot_password.clone()
    }
}

#[async_trait]
impl AuthTransport for ScriptedTransport {
    async fn login(&self, credentials: &LoginCredentials) -> Result<CredentialPair, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password.is_empty() {
            return Err(http_error(400));
        }
        self.script().login.clone().ok_or_else(|| http_error(401))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.script().last_refresh_token = Some(refresh_token.to_owned());
        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        match &self.script().refresh {
            RefreshScript::Renew(pair) => Ok(pair.clone()),
            RefreshScript::Reject(status) => Err(http_error(*status)),
            RefreshScript::ServerError => Err(http_error(500)),
        }
    }

    async fn register(
        &self,
        _credentials: &RegisterCredentials,
        _inviter_id: Option<&str>,
    ) -> Result<RegisterResponse, ApiError> {
        self.script().register.clone().ok_or_else(|| http_error(400))
    }

    async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        self.script().forgot_password.push(email.to_owned());
        Ok(())
    }

    async fn reset_password(
        &self,
        credentials: &ResetPasswordCredentials,
        _user_id: &str,
        _token: &str,
    ) -> Result<(), ApiError> {
        if credentials.password1 != credentials.password2 {
            return Err(ApiError::Http(HttpError::from_response(
                400,
                "Bad Request",
                Some(&json!({ "non_field_errors": ["Passwords do not match."] })),
            )));
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        if !self.user_delay.is_zero() {
            tokio::time::sleep(self.user_delay).await;
        }
        let mut script = self.script();
        if let Some(status) = script.user_failures.pop_front() {
            return Err(http_error(status));
        }
        script.user.clone().ok_or_else(|| http_error(401))
    }

    async fn login_with_provider(
        &self,
        _provider: OAuthProvider,
        _token: &ProviderToken,
    ) -> Result<ProviderLogin, ApiError> {
        self.script().provider.clone().ok_or_else(|| http_error(401))
    }
}

/// [`OAuthBridge`] that always returns the same provider token.
pub(crate) struct StaticBridge(pub(crate) ProviderToken);

#[async_trait]
impl OAuthBridge for StaticBridge {
    async fn sign_in(&self, _provider: OAuthProvider) -> Result<ProviderToken, AuthError> {
        Ok(self.0.clone())
    }
}
