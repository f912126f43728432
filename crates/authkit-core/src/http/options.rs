use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

/// Per-request configuration for [`ApiClient`](super::ApiClient).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers, sent after the defaults so they can override them.
    pub headers: BTreeMap<String, String>,
    /// Values for `<name>` placeholders in the endpoint path.
    pub params: BTreeMap<String, String>,
    /// Query string pairs, appended in insertion order.
    pub query_params: Vec<(String, String)>,
    /// Send the request without an `Authorization` header and without touching the tokens.
    pub skip_auth: bool,
    /// The caller renders on a server that cannot hold a streaming body open.
    pub server_side: bool,
    /// Cancellation signal. Only honored by streaming requests.
    pub signal: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    pub fn server_side(mut self) -> Self {
        self.server_side = true;
        self
    }

    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }
}
