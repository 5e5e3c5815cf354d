pub mod config;
pub mod partial;
pub mod stop;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::catalog::{Item, ResolveError, UrlResolver};
use crate::ledger::{ItemOutcome, ProgressLedger};
use crate::util::{content_length, content_range_total, mb};

use self::config::DownloadConfig;
use self::partial::PartialFile;
use self::stop::StopSignal;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Couldn't resolve the url, error: '{0}'")]
    Resolution(#[from] ResolveError),
    #[error("Access to the resource is forbidden (403): '{0}'")]
    Forbidden(Url),
    #[error("Download req did not yield 200/206, instead: '{0}' for url: '{1}'")]
    HttpStatus(StatusCode, Url),
    #[error("Request error: '{0}'")]
    Transport(#[from] reqwest::Error),
    #[error("File IO operation failed, error: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Partial file holds {found} bytes, remote size is {expected:?}")]
    CorruptPartial { found: u64, expected: Option<u64> },
    #[error("Server rejected the range starting at byte {0}")]
    RangeNotSatisfiable(u64),
    #[error("Download ended before completion, downloaded bytes: '{0}', content length: '{1}'")]
    StreamEndedBeforeCompletion(u64, u64),
    #[error("Server sent more than the announced {0} bytes")]
    LengthMismatch(u64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why an item failed, as shown to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("url resolution failed: {0}")]
    Resolution(String),
    #[error("forbidden")]
    Forbidden,
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("file error: {0}")]
    Io(String),
    #[error("incomplete, {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },
    #[error("server sent more than {0} bytes")]
    LengthMismatch(u64),
}

impl From<&Error> for FailureReason {
    fn from(value: &Error) -> Self {
        match value {
            Error::Resolution(e) => FailureReason::Resolution(e.to_string()),
            Error::Forbidden(_) => FailureReason::Forbidden,
            Error::HttpStatus(status, _) => FailureReason::HttpStatus(status.as_u16()),
            Error::RangeNotSatisfiable(_) => {
                FailureReason::HttpStatus(StatusCode::RANGE_NOT_SATISFIABLE.as_u16())
            }
            Error::Transport(e) => FailureReason::Transport(e.to_string()),
            Error::Io(e) => FailureReason::Io(e.to_string()),
            Error::CorruptPartial { found, .. } => FailureReason::LengthMismatch(*found),
            Error::StreamEndedBeforeCompletion(received, expected) => FailureReason::Incomplete {
                received: *received,
                expected: *expected,
            },
            Error::LengthMismatch(total) => FailureReason::LengthMismatch(*total),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Succeeded,
    /// The file was already complete on disk, nothing was transferred
    Skipped,
    Failed(FailureReason),
    /// Returned early on a stop request, the partial file is kept for a later resume
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Partial file has the remote size and only needs the rename
    CompletePartial(u64),
    /// Final file already has the remote size
    CompleteFinal(u64),
    Resume { offset: u64, expected: u64 },
    Fresh,
}

enum Transfer {
    Complete(u64),
    Stopped(u64),
}

/// Decides what to do with a partial file of `found` bytes given the probed remote size.
fn resume_plan(found: u64, expected: Option<u64>) -> Result<Plan> {
    match expected {
        Some(expected) if found == expected => Ok(Plan::CompletePartial(found)),
        Some(expected) if found > 0 && found < expected => Ok(Plan::Resume {
            offset: found,
            expected,
        }),
        _ => Err(Error::CorruptPartial { found, expected }),
    }
}

/// Downloads single items into their partial file and commits them,
/// reporting progress into the ledger as it goes.
#[derive(Clone)]
pub struct RangeFetcher {
    resolver: Arc<dyn UrlResolver>,
    ledger: ProgressLedger,
    stop: StopSignal,
    config: DownloadConfig,
}

impl RangeFetcher {
    pub fn new(
        resolver: Arc<dyn UrlResolver>,
        ledger: ProgressLedger,
        stop: StopSignal,
        config: DownloadConfig,
    ) -> Self {
        Self {
            resolver,
            ledger,
            stop,
            config,
        }
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    /// Runs one item to a terminal outcome or to an early return on stop.
    /// Item errors never escape, they are logged and recorded in the ledger.
    pub async fn fetch_item(&self, item: &Item) -> DownloadOutcome {
        if self.stop.is_stopped() {
            log::debug!("{} | Download stopped before it started", item.key());
            return DownloadOutcome::Stopped;
        }
        match self.try_fetch(item).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!(
                    "Error encountered while downloading {}, Error: {}",
                    item.key(),
                    e
                );
                let reason = FailureReason::from(&e);
                self.ledger
                    .set_outcome(item.key(), ItemOutcome::Failed(reason.clone()))
                    .await;
                DownloadOutcome::Failed(reason)
            }
        }
    }

    async fn try_fetch(&self, item: &Item) -> Result<DownloadOutcome> {
        let key = item.key();
        // cookies handed out by the url lookup belong to this item only
        let client = self.config.session()?;
        let url = self.resolver.resolve(&client, item.fetch_token()).await?;
        log::info!("{} | Downloading video from {}", key, url);
        let file = PartialFile::for_item(item, &self.config.final_extension);

        if self.stop.is_stopped() {
            return Ok(DownloadOutcome::Stopped);
        }
        let (offset, expected) = match self.plan(&client, &url, key, &file).await? {
            Plan::CompletePartial(size) => {
                log::debug!("{} | File already fully downloaded", key);
                file.commit().await?;
                self.record_complete(key, size).await;
                return Ok(DownloadOutcome::Skipped);
            }
            Plan::CompleteFinal(size) => {
                log::debug!("{} | Final file already present", key);
                self.record_complete(key, size).await;
                return Ok(DownloadOutcome::Skipped);
            }
            Plan::Resume { offset, expected } => {
                log::debug!(
                    "{} | Resuming download from {:.2}MB ({:.2}%)",
                    key,
                    mb(offset),
                    offset as f64 / expected as f64 * 100.0
                );
                (offset, Some(expected))
            }
            Plan::Fresh => {
                log::debug!("{} | Starting download", key);
                (0, None)
            }
        };

        let Some((resp, offset)) = self.request(&client, &url, offset).await? else {
            log::info!("{} | Download stopped before the transfer started", key);
            return Ok(DownloadOutcome::Stopped);
        };
        let total = if resp.status() == StatusCode::PARTIAL_CONTENT {
            content_range_total(resp.headers())
                .or_else(|| resp.content_length().map(|len| offset + len))
                .or(expected)
        } else {
            resp.content_length()
        };

        let mut file_handler = if offset > 0 {
            file.open_append().await?
        } else {
            file.create().await?
        };
        self.ledger.set_downloading(key, total).await;
        if offset > 0 {
            self.ledger.add_downloaded(key, offset).await;
        }

        let transfer = self
            .progress(key, resp, &mut file_handler, offset, total)
            .await;
        let flushed = file_handler.flush().await;
        let transfer = transfer?;
        flushed?;
        drop(file_handler);

        match transfer {
            Transfer::Stopped(downloaded_bytes) => {
                log::info!(
                    "{} | Download stopped at {} bytes, partial file kept",
                    key,
                    downloaded_bytes
                );
                Ok(DownloadOutcome::Stopped)
            }
            Transfer::Complete(downloaded_bytes) => {
                if let Some(total) = total {
                    if downloaded_bytes < total {
                        return Err(Error::StreamEndedBeforeCompletion(downloaded_bytes, total));
                    }
                }
                file.commit().await?;
                self.ledger.set_outcome(key, ItemOutcome::Succeeded).await;
                log::info!(
                    "{} | Download completed successfully: {}, {:.2}MB",
                    key,
                    file.final_path().display(),
                    mb(downloaded_bytes)
                );
                Ok(DownloadOutcome::Succeeded)
            }
        }
    }

    async fn record_complete(&self, key: &str, size: u64) {
        self.ledger.set_downloading(key, Some(size)).await;
        self.ledger.add_downloaded(key, size).await;
        self.ledger.set_outcome(key, ItemOutcome::Succeeded).await;
    }

    async fn plan(
        &self,
        client: &Client,
        url: &Url,
        key: &str,
        file: &PartialFile,
    ) -> Result<Plan> {
        if let Some(found) = file.size().await {
            self.ledger.set_probing(key).await;
            let expected = self.probe(client, url).await?;
            return match resume_plan(found, expected) {
                Ok(plan) => Ok(plan),
                Err(e) => {
                    log::warn!("{} | {}, re-downloading", key, e);
                    file.discard().await?;
                    Ok(Plan::Fresh)
                }
            };
        }
        if let Some(existing) = file.final_size().await {
            self.ledger.set_probing(key).await;
            if self.probe(client, url).await? == Some(existing) {
                return Ok(Plan::CompleteFinal(existing));
            }
            log::debug!(
                "{} | Existing {} differs from the remote, replacing it",
                key,
                file.final_path().display()
            );
        }
        Ok(Plan::Fresh)
    }

    /// Expected size of the remote resource, None if the server doesn't tell
    async fn probe(&self, client: &Client, url: &Url) -> Result<Option<u64>> {
        let resp = client
            .head(url.clone())
            .timeout(self.config.timeout)
            .headers(self.config.headers.clone())
            .send()
            .await?;
        match resp.status() {
            status if status.is_success() => Ok(content_length(resp.headers())),
            StatusCode::FORBIDDEN => Err(Error::Forbidden(url.clone())),
            status => Err(Error::HttpStatus(status, url.clone())),
        }
    }

    /// Issues the GET, falling back to a full download when the range can't be served.
    /// Returns the response and the offset its body starts at, None if a stop came first.
    async fn request(
        &self,
        client: &Client,
        url: &Url,
        offset: u64,
    ) -> Result<Option<(Response, u64)>> {
        let resp = match self.get(client, url, offset).await {
            Err(Error::RangeNotSatisfiable(from)) => {
                log::warn!(
                    "Range from byte {} not satisfiable for {}, starting from scratch",
                    from,
                    url
                );
                return Ok(self.get(client, url, 0).await?.map(|resp| (resp, 0)));
            }
            other => other?,
        };
        Ok(resp.map(|resp| {
            if offset > 0 && resp.status() == StatusCode::OK {
                log::warn!("Server ignored the range for {}, starting from scratch", url);
                (resp, 0)
            } else {
                (resp, offset)
            }
        }))
    }

    /// Sends the GET unless a stop was requested, a stop while waiting for the response
    /// headers abandons the request.
    async fn get(&self, client: &Client, url: &Url, offset: u64) -> Result<Option<Response>> {
        if self.stop.is_stopped() {
            return Ok(None);
        }
        let mut req = client.get(url.clone()).headers(self.config.headers.clone());
        if offset > 0 {
            req = req.header(RANGE, format!("bytes={}-", offset));
        }
        let resp = tokio::select! {
            biased;
            _ = self.stop.stopped() => return Ok(None),
            resp = req.send() => resp?,
        };
        match resp.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(Some(resp)),
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                Err(Error::RangeNotSatisfiable(offset))
            }
            StatusCode::FORBIDDEN => Err(Error::Forbidden(url.clone())),
            status => Err(Error::HttpStatus(status, url.clone())),
        }
    }

    /// Streams the body into the file chunk by chunk. The stop flag is checked before every chunk
    /// is written, a stop while waiting for bytes ends the transfer as well.
    async fn progress(
        &self,
        key: &str,
        resp: Response,
        file_handler: &mut File,
        mut downloaded_bytes: u64,
        total: Option<u64>,
    ) -> Result<Transfer> {
        let mut stream = resp.bytes_stream();
        loop {
            let bytes = tokio::select! {
                biased;
                _ = self.stop.stopped() => return Ok(Transfer::Stopped(downloaded_bytes)),
                next = stream.next() => match next {
                    Some(bytes) => bytes?,
                    None => break,
                },
            };
            for chunk in bytes.chunks(self.config.chunk_size) {
                if self.stop.is_stopped() {
                    return Ok(Transfer::Stopped(downloaded_bytes));
                }
                let len = chunk.len() as u64;
                if let Some(total) = total {
                    if downloaded_bytes + len > total {
                        return Err(Error::LengthMismatch(total));
                    }
                }
                file_handler.write_all(chunk).await?;
                downloaded_bytes += len;
                self.ledger.add_downloaded(key, len).await;
            }
        }
        Ok(Transfer::Complete(downloaded_bytes))
    }
}
