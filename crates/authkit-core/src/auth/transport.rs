use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::http::{ApiClient, ApiError, EndpointRegistry, RequestOptions};

use super::{
    CredentialPair, LoginCredentials, OAuthProvider, ProviderLogin, ProviderToken,
    RegisterCredentials, RegisterResponse, ResetPasswordCredentials, User,
};

/// Remote identity operations the session depends on.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn login(&self, credentials: &LoginCredentials) -> Result<CredentialPair, ApiError>;

    /// Exchange a refresh token for a new pair.
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, ApiError>;

    async fn register(
        &self,
        credentials: &RegisterCredentials,
        inviter_id: Option<&str>,
    ) -> Result<RegisterResponse, ApiError>;

    async fn forgot_password(&self, email: &str) -> Result<(), ApiError>;

    async fn reset_password(
        &self,
        credentials: &ResetPasswordCredentials,
        user_id: &str,
        token: &str,
    ) -> Result<(), ApiError>;

    async fn current_user(&self) -> Result<User, ApiError>;

    async fn login_with_provider(
        &self,
        provider: OAuthProvider,
        token: &ProviderToken,
    ) -> Result<ProviderLogin, ApiError>;
}

/// [`AuthTransport`] over the backend's REST endpoints.
///
/// Login, refresh, registration and password endpoints are called without an `Authorization`
/// header; only `current_user` relies on the client's token supply.
#[derive(Clone)]
pub struct HttpAuthTransport {
    api: ApiClient,
    endpoints: EndpointRegistry,
}

impl HttpAuthTransport {
    pub fn new(api: ApiClient, endpoints: EndpointRegistry) -> Self {
        Self { api, endpoints }
    }

    async fn post_anonymous<T, B>(
        &self,
        name: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let path = self.endpoints.resolve(name)?;
        self.api.post(path, body, options.skip_auth()).await
    }
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    #[serde(flatten)]
    credentials: &'a RegisterCredentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    inviter_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ForgotPasswordBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct ResetPasswordBody<'a> {
    user_id: &'a str,
    token: &'a str,
    #[serde(flatten)]
    credentials: &'a ResetPasswordCredentials,
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn login(&self, credentials: &LoginCredentials) -> Result<CredentialPair, ApiError> {
        self.post_anonymous("auth.login", credentials, RequestOptions::new())
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        let body = RefreshBody {
            refresh: refresh_token,
        };
        self.post_anonymous("auth.refreshToken", &body, RequestOptions::new())
            .await
    }

    async fn register(
        &self,
        credentials: &RegisterCredentials,
        inviter_id: Option<&str>,
    ) -> Result<RegisterResponse, ApiError> {
        let body = RegisterBody {
            credentials,
            inviter_id,
        };
        self.post_anonymous("auth.register", &body, RequestOptions::new())
            .await
    }

    async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let _: Value = self
            .post_anonymous(
                "auth.forgotPassword",
                &ForgotPasswordBody { email },
                RequestOptions::new(),
            )
            .await?;
        Ok(())
    }

    async fn reset_password(
        &self,
        credentials: &ResetPasswordCredentials,
        user_id: &str,
        token: &str,
    ) -> Result<(), ApiError> {
        let body = ResetPasswordBody {
            user_id,
            token,
            credentials,
        };
        let options = RequestOptions::new()
            .param("user_id", user_id)
            .param("token", token);
        let _: Value = self
            .post_anonymous("auth.resetPassword", &body, options)
            .await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<User, ApiError> {
        let path = self.endpoints.resolve("auth.getUser")?;
        self.api.get(path, RequestOptions::new()).await
    }

    async fn login_with_provider(
        &self,
        provider: OAuthProvider,
        token: &ProviderToken,
    ) -> Result<ProviderLogin, ApiError> {
        self.post_anonymous(provider.endpoint_name(), token, RequestOptions::new())
            .await
    }
}
