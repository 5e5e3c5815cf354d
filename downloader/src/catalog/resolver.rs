use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Url lookup request failed: '{0}'")]
    Request(#[from] reqwest::Error),
    #[error("Url lookup did not yield 200, instead: '{0}'")]
    Status(StatusCode),
    #[error("Url lookup answered without a source")]
    NoSource,
    #[error("Invalid URL: '{0}'")]
    InvalidUrl(String),
}

/// Resolves the opaque fetch token of an item into the url of the remote resource.
/// Called once per item, right before the item is downloaded, with the client that will also
/// perform the download so cookies set by the lookup are presented on the GET.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, client: &Client, token: &str) -> Result<Url, ResolveError>;
}

/**
 * Validates a source url, protocol relative urls (`//host/path`) get `https:`.
 * Only http and https are accepted.
 */
pub fn parse_source_url(src: &str) -> Result<Url, ResolveError> {
    let src = src.trim();
    let url = if src.starts_with("//") {
        Url::parse(&format!("https:{}", src))
    } else {
        Url::parse(src)
    }
    .map_err(|_| ResolveError::InvalidUrl(src.to_owned()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ResolveError::InvalidUrl(src.to_owned())),
    }
}

/// Treats the token itself as the url.
#[derive(Debug, Clone, Default)]
pub struct DirectUrlResolver;

#[async_trait]
impl UrlResolver for DirectUrlResolver {
    async fn resolve(&self, _client: &Client, token: &str) -> Result<Url, ResolveError> {
        parse_source_url(token)
    }
}

#[derive(Debug, Deserialize)]
struct ApiAnswer {
    #[serde(default)]
    s: Vec<ApiSource>,
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    src: String,
}

/// Looks the url up through a video api: `POST <endpoint>` with the form body `d=<token>`,
/// answered with `{"s": [{"src": "//host/file.mp4"}]}`.
#[derive(Debug, Clone)]
pub struct ApiUrlResolver {
    endpoint: Url,
    headers: HeaderMap,
    timeout: Duration,
}

impl ApiUrlResolver {
    pub fn new(endpoint: Url, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            endpoint,
            headers,
            timeout,
        }
    }
}

#[async_trait]
impl UrlResolver for ApiUrlResolver {
    async fn resolve(&self, client: &Client, token: &str) -> Result<Url, ResolveError> {
        // tokens come percent-encoded already, they go into the body untouched
        let resp = client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .headers(self.headers.clone())
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(format!("d={}", token))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ResolveError::Status(status));
        }
        let answer: ApiAnswer = resp.json().await?;
        log::debug!("Url lookup answered with {} sources", answer.s.len());
        let source = answer.s.first().ok_or(ResolveError::NoSource)?;
        parse_source_url(&source.src)
    }
}
