use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{BotError, BotResult};

const USER_AGENT: &str = concat!("ephemera/", env!("CARGO_PKG_VERSION"));

/// A REST call relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, without a leading slash.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Value of the first query parameter named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    /// Returns [`BotError::Malformed`] if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> BotResult<T> {
        serde_json::from_slice(&self.body).map_err(BotError::from)
    }
}

/// Executes one HTTP exchange. Implementations never retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and buffer the response.
    ///
    /// # Errors
    /// Returns [`BotError::Transport`] when no HTTP response was received.
    async fn execute(&self, request: &ApiRequest) -> BotResult<ApiResponse>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: Url,
    authorization: HeaderValue,
}

impl ReqwestTransport {
    /// Builds a transport that authenticates every call as a bot.
    ///
    /// # Errors
    /// Returns an error if the token is not a valid header value or the
    /// underlying client cannot be built.
    pub fn new(base_url: Url, token: &str) -> BotResult<Self> {
        let mut authorization = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| BotError::malformed("bot token contains invalid header characters"))?;
        authorization.set_sensitive(true);

        let client = Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            client,
            base_url,
            authorization,
        })
    }

    fn url_for(&self, request: &ApiRequest) -> BotResult<Url> {
        let mut url = self.base_url.join(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> BotResult<ApiResponse> {
        let url = self.url_for(request)?;
        let response = self
            .client
            .request(request.method.clone(), url)
            .header(header::AUTHORIZATION, self.authorization.clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        tracing::trace!(
            method = %request.method,
            path = %request.path,
            status = status.as_u16(),
            "rest call completed"
        );

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
