use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::RenewalCoordinator;
use crate::config::ClientConfig;

use super::endpoints::expand_path;
use super::{ApiError, ByteStream, HttpError, RequestOptions};

pub type ApiResult<T> = Result<T, ApiError>;

/// JSON HTTP client that attaches a currently valid access token to every request.
///
/// The client never renews tokens on its own: it asks the [`RenewalCoordinator`] for a token
/// before building each request and reports 401/403 responses to the caller unchanged.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    renewal: Option<Arc<RenewalCoordinator>>,
}

impl ApiClient {
    /// Build an unauthenticated client from the configuration.
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(ApiError::network)?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            renewal: None,
        })
    }

    /// Clone the client, sharing the connection pool, with tokens supplied by `renewal`.
    pub fn with_renewal(&self, renewal: Arc<RenewalCoordinator>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            renewal: Some(renewal),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.request(Method::GET, endpoint, None, options).await
    }

    pub async fn post<T, B>(&self, endpoint: &str, body: &B, options: RequestOptions) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.request(Method::POST, endpoint, Some(body), options).await
    }

    pub async fn put<T, B>(&self, endpoint: &str, body: &B, options: RequestOptions) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.request(Method::PUT, endpoint, Some(body), options).await
    }

    pub async fn patch<T, B>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> ApiResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = encode(body)?;
        self.request(Method::PATCH, endpoint, Some(body), options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.request(Method::DELETE, endpoint, None, options).await
    }

    /// Issue a JSON request and deserialize the response body.
    ///
    /// Empty and non-JSON success bodies deserialize from `null`, so `()` and `Option<_>` are
    /// valid targets for them.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> ApiResult<T> {
        let builder = self.prepare(method.clone(), endpoint, body, &options).await?;
        debug!(%method, endpoint, "sending request");
        let response = builder.send().await.map_err(ApiError::network)?;

        let status = response.status();
        let body = match read_json_body(response).await {
            Ok(body) => body,
            Err(err) if status.is_success() => return Err(err),
            Err(_) => None,
        };

        if !status.is_success() {
            debug!(%method, endpoint, status = status.as_u16(), "request failed");
            return Err(http_error(status, body.as_ref()).into());
        }

        serde_json::from_value(body.unwrap_or(Value::Null)).map_err(ApiError::Decode)
    }

    /// POST to a long-lived endpoint and hand back the raw body stream.
    ///
    /// `options.signal` cancels the request while it is being sent and while the body is read;
    /// either way the caller sees [`ApiError::Cancelled`].
    pub async fn stream<B>(
        &self,
        endpoint: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> ApiResult<ByteStream>
    where
        B: Serialize + ?Sized,
    {
        if options.server_side {
            return Err(ApiError::NotSupported(
                "Streaming is not supported with server-side requests",
            ));
        }
        let body = body.map(encode).transpose()?;
        let builder = self.prepare(Method::POST, endpoint, body, &options).await?;
        debug!(endpoint, "opening stream");

        let response = match &options.signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(ApiError::Cancelled),
                sent = builder.send() => sent,
            },
            None => builder.send().await,
        }
        .map_err(ApiError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = read_json_body(response).await.ok().flatten();
            return Err(http_error(status, body.as_ref()).into());
        }

        Ok(ByteStream::new(response, options.signal))
    }

    /// Resolve the URL, attach headers and the bearer token.
    async fn prepare(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        options: &RequestOptions,
    ) -> ApiResult<RequestBuilder> {
        let url = self.build_url(endpoint, options)?;

        let mut builder = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !options.skip_auth {
            if let Some(renewal) = &self.renewal {
                if let Some(token) = renewal.get_valid_access_token().await? {
                    builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
                }
            }
        }

        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }
        Ok(builder)
    }

    pub(crate) fn build_url(&self, endpoint: &str, options: &RequestOptions) -> ApiResult<Url> {
        let path = expand_path(endpoint, &options.params)?;
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !options.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &options.query_params {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> ApiResult<Value> {
    serde_json::to_value(body).map_err(ApiError::Encode)
}

fn http_error(status: StatusCode, body: Option<&Value>) -> HttpError {
    let status_text = status.canonical_reason().unwrap_or_default();
    HttpError::from_response(status.as_u16(), status_text, body)
}

/// Parse the body when it is declared as JSON and the status allows one.
async fn read_json_body(response: Response) -> ApiResult<Option<Value>> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Ok(None);
    }
    let bytes = response.bytes().await.map_err(ApiError::network)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(ApiError::Decode)
}
