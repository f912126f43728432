use std::sync::Arc;

use crate::auth::{
    CredentialStore, HttpAuthTransport, OAuthBridge, RenewalCoordinator, SessionLifecycle,
};
use crate::config::ClientConfig;
use crate::http::{ApiClient, ApiResult};

/// Session lifecycle and authenticated request surface wired from one configuration.
///
/// Renewal calls travel over an unauthenticated client so the token supply never depends on
/// itself; every other request goes through the client that asks the coordinator for a token.
#[derive(Clone)]
pub struct AuthKit {
    api: ApiClient,
    session: SessionLifecycle,
}

impl AuthKit {
    pub fn connect(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> ApiResult<Self> {
        Self::connect_with(config, store, None)
    }

    /// Like [`connect`](Self::connect), with a bridge for identity provider sign-in.
    pub fn connect_with(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        oauth: Option<Arc<dyn OAuthBridge>>,
    ) -> ApiResult<Self> {
        let anonymous = ApiClient::new(config)?;
        let renewal_transport = HttpAuthTransport::new(anonymous.clone(), config.endpoints.clone());
        let renewal = Arc::new(
            RenewalCoordinator::new(store.clone(), Arc::new(renewal_transport))
                .with_horizon(config.renewal_horizon),
        );

        let api = anonymous.with_renewal(renewal.clone());
        let session_transport = HttpAuthTransport::new(api.clone(), config.endpoints.clone());
        let mut builder = SessionLifecycle::builder(renewal, Arc::new(session_transport), store)
            .renewal_interval(config.renewal_interval);
        if let Some(oauth) = oauth {
            builder = builder.oauth_bridge(oauth);
        }

        Ok(Self {
            api,
            session: builder.build(),
        })
    }

    pub fn session(&self) -> &SessionLifecycle {
        &self.session
    }

    /// Request surface that attaches the session's access token.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LoginCredentials, MemoryCredentialStore};
    use crate::http::RequestOptions;
    use crate::test_support::{expiring_jwt, fresh_jwt};
    use httpmock::prelude::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn login_then_authenticated_request() {
        let server = MockServer::start_async().await;
        let access = fresh_jwt();
        let login = server
            .mock_async(|when, then| {
                when.method(POST).path("/users/token/");
                then.status(200)
                    .header("content-type", "application/json").json_body(json!({ "access": access, "refresh": "R1" }));
            })
            .await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/me/")
                    .header("authorization", format!("Bearer {access}"));
                then.status(200)
                    .header("content-type", "application/json").json_body(json!({ "id": 1, "email": "ada@example.com" }));
            })
            .await;
        let projects = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/projects/")
                    .header("authorization", format!("Bearer {access}"));
                then.status(200).header("content-type", "application/json").json_body(json!([]));
            })
            .await;

        let store = MemoryCredentialStore::new();
        let config = ClientConfig::new(&server.base_url()).unwrap();
        let kit = AuthKit::connect(&config, Arc::new(store.clone())).unwrap();

        let user = kit
            .session()
            .login(&LoginCredentials::new("ada@example.com", "pw"))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");

        let body: Value = kit
            .api()
            .get("projects/", RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(body, json!([]));
        login.assert_async().await;
        me.assert_async().await;
        projects.assert_async().await;
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn expiring_token_is_renewed_once_before_request() {
        let server = MockServer::start_async().await;
        let renewed = fresh_jwt();
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/users/token/refresh/")
                    .header_missing("authorization")
                    .json_body(json!({ "refresh": "R1" }));
                then.status(200)
                    .header("content-type", "application/json").json_body(json!({ "access": renewed, "refresh": "R2" }));
            })
            .await;
        let projects = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/projects/")
                    .header("authorization", format!("Bearer {renewed}"));
                then.status(200).header("content-type", "application/json").json_body(json!({ "results": [] }));
            })
            .await;

        let store = MemoryCredentialStore::with_tokens(Some(&expiring_jwt()), Some("R1"));
        let config = ClientConfig::new(&server.base_url()).unwrap();
        let kit = AuthKit::connect(&config, Arc::new(store.clone())).unwrap();

        let requests = (0..5).map(|_| kit.api().get::<Value>("projects/", RequestOptions::new()));
        for result in futures::future::join_all(requests).await {
            result.unwrap();
        }
        refresh.assert_hits_async(1).await;
        projects.assert_hits_async(5).await;
        assert_eq!(store.access_token().unwrap(), Some(renewed));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn initialize_with_revoked_refresh_ends_anonymous() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/users/token/refresh/");
                then.status(401)
                    .header("content-type", "application/json").json_body(json!({ "detail": "Token is blacklisted" }));
            })
            .await;

        let store = MemoryCredentialStore::with_tokens(None, Some("revoked"));
        let config = ClientConfig::new(&server.base_url()).unwrap();
        let kit = AuthKit::connect(&config, Arc::new(store.clone())).unwrap();

        kit.session().initialize().await;
        let state = kit.session().state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);
        assert!(store.refresh_token().unwrap().is_none());
    }
}
