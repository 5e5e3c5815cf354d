use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "batch-downloader";
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_FINAL_EXTENSION: &str = "mp4";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid header name: '{0}'")]
    HeaderName(String),
    #[error("Invalid value for header '{0}'")]
    HeaderValue(String),
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Applies to the url lookup and the size probe, never to the body stream
    pub timeout: Duration,
    /// Sent with every request
    pub headers: HeaderMap,
    pub chunk_size: usize,
    pub final_extension: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let mut config = DownloadConfig {
            timeout: Duration::from_secs(30),
            headers: HeaderMap::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            final_extension: DEFAULT_FINAL_EXTENSION.to_owned(),
        };
        config.headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        config
    }
}

impl DownloadConfig {
    /// Adds static headers on top of the defaults, later pairs override earlier ones.
    pub fn with_headers<'a>(
        mut self,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, Error> {
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::HeaderName(name.to_owned()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| Error::HeaderValue(name.to_owned()))?;
            self.headers.insert(header_name, header_value);
        }
        Ok(self)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::ZeroChunkSize);
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Builds a client with its own cookie jar.
    pub fn session(&self) -> reqwest::Result<Client> {
        Client::builder()
            .cookie_store(true)
            .connect_timeout(self.timeout)
            .build()
    }
}
