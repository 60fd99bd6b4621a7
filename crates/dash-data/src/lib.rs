//! HTTP fetch adapters for the dashboard backend proxy.
//!
//! Turns a `GET <base>/<path>` JSON endpoint into a fetch procedure the
//! cache coordinator can drive. The session layer's bearer token is attached
//! to every outgoing request and can be swapped at runtime when credentials
//! refresh.
//!
//! # Example
//!
//! ```rust,ignore
//! use dash_data::ApiClient;
//!
//! let client = ApiClient::new("http://localhost:8000")?
//!     .with_bearer_token(token);
//!
//! let attempts = client
//!     .json_fetcher::<Vec<Attempt>>("/attempts")
//!     .with_query("role", "frontend")
//!     .with_query("limit", "50");
//! ```

use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use dash_sync::{FetchError, Fetcher};

/// Total-request timeout applied to every fetch. Timeout policy belongs to
/// the fetch procedure; the cache coordinator only reacts to settlement.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the dashboard's backend proxy.
///
/// Holds the base URL, the shared HTTP connection pool, and the session
/// credentials. Cloning is cheap; all clones share the pool and see token
/// updates.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create a client for a base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Set the bearer token attached to all requests.
    pub fn with_bearer_token(self, token: impl Into<String>) -> Self {
        self.set_bearer_token(Some(token.into()));
        self
    }

    /// Replace (or clear) the bearer token, e.g. after a session refresh.
    /// Fetchers already built from this client pick up the new token on
    /// their next call.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.token.write().unwrap() = token;
    }

    /// Build a fetch procedure for a JSON resource under the base URL.
    pub fn json_fetcher<T: DeserializeOwned>(&self, path: &str) -> JsonFetcher<T> {
        JsonFetcher {
            http: self.http.clone(),
            url: join_url(&self.base_url, path),
            query: Vec::new(),
            token: self.token.clone(),
            _resource: PhantomData,
        }
    }
}

/// A fetch procedure for one JSON resource: GET the URL, attach the bearer
/// token, decode the body.
pub struct JsonFetcher<T> {
    http: reqwest::Client,
    url: String,
    query: Vec<(String, String)>,
    token: Arc<RwLock<Option<String>>>,
    _resource: PhantomData<fn() -> T>,
}

impl<T> JsonFetcher<T> {
    /// Append a query parameter (e.g. role scoping).
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// The resolved request URL (without query parameters).
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<T> Fetcher<T> for JsonFetcher<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(&self) -> Result<T, FetchError> {
        let mut request = self.http.get(&self.url);
        if !self.query.is_empty() {
            request = request.query(&self.query);
        }
        let token = self.token.read().unwrap().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        debug!(url = %self.url, "fetching");
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(&self.url, &e))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(FetchError::Http {
                status,
                url: self.url.clone(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&self.url, &e))?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Deserialization(e.to_string()))
    }
}

fn transport_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(format!("{url}: {error}"))
    } else if error.is_connect() {
        FetchError::Connection(format!("{url}: {error}"))
    } else {
        FetchError::Request(error.to_string())
    }
}

/// Join a path onto the base URL; absolute URLs pass through unchanged.
fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
