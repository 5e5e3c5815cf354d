mod worker;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::{Item, UrlResolver};
use crate::fetch::config::DownloadConfig;
use crate::fetch::partial::PartialFile;
use crate::fetch::stop::StopSignal;
use crate::fetch::{DownloadOutcome, FailureReason, RangeFetcher};
use crate::ledger::{BatchTotals, ProgressLedger};

use self::worker::Queue;

pub const DEFAULT_MAX_WORKERS: usize = 4;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("A batch needs at least one worker")]
    NoWorkers,
    #[error("Item key '{0}' appears more than once in the batch")]
    DuplicateKey(String),
    #[error("Items '{0}' and '{1}' would be downloaded to the same file")]
    PathCollision(String, String),
    #[error("Couldn't create destination directory {0:?}, error: '{1}'")]
    Destination(PathBuf, std::io::Error),
    #[error("JoinError for batch: {0}")]
    TokioJoinError(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Idle,
    Running,
    Completed,
    Stopped,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Stopped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: Uuid,
    pub status: BatchStatus,
    /// Outcome of every dispatched item, in completion order
    pub outcomes: Vec<(String, DownloadOutcome)>,
    /// Items still queued when the batch ended
    pub not_started: Vec<String>,
    pub totals: BatchTotals,
}

impl BatchReport {
    pub fn failed(&self) -> impl Iterator<Item = (&str, &FailureReason)> {
        self.outcomes.iter().filter_map(|(key, outcome)| match outcome {
            DownloadOutcome::Failed(reason) => Some((key.as_str(), reason)),
            _ => None,
        })
    }
}

/// Handle of a running batch, dropping it does not stop the batch.
#[derive(Debug)]
pub struct BatchHandle {
    id: Uuid,
    stop: StopSignal,
    ledger: ProgressLedger,
    status: watch::Receiver<BatchStatus>,
    task: JoinHandle<BatchReport>,
}

impl BatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn status(&self) -> BatchStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<BatchStatus> {
        self.status.clone()
    }

    /// Cooperative: running items return at their next checkpoint, queued items never start.
    pub fn stop(&self) {
        log::info!("Stop action requested for batch: {}", self.id);
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<BatchReport> {
        Ok(self.task.await?)
    }
}

/// Dispatches the items of a batch onto a bounded pool of workers.
/// This struct is supposed to be cloned, batches started from it are independent of each other.
#[derive(Clone)]
pub struct BatchCoordinator {
    resolver: Arc<dyn UrlResolver>,
    config: DownloadConfig,
}

impl BatchCoordinator {
    pub fn new(resolver: Arc<dyn UrlResolver>, config: DownloadConfig) -> Self {
        Self { resolver, config }
    }

    /// Starts a batch in the background. Only problems outside the scope of a single item fail
    /// here, item failures end up in the ledger and the report.
    pub async fn start(&self, items: Vec<Item>, max_workers: usize) -> Result<BatchHandle> {
        if max_workers == 0 {
            return Err(Error::NoWorkers);
        }
        self.validate(&items)?;
        let destinations: HashSet<PathBuf> = items
            .iter()
            .map(|item| item.destination().to_path_buf())
            .collect();
        for dir in destinations {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::Destination(dir.clone(), e))?;
        }

        let id = Uuid::new_v4();
        let ledger = ProgressLedger::new();
        ledger.init(&items).await;
        let stop = StopSignal::new();
        let (status_tx, status) = watch::channel(BatchStatus::Idle);
        let fetcher = RangeFetcher::new(
            self.resolver.clone(),
            ledger.clone(),
            stop.clone(),
            self.config.clone(),
        );
        let workers = max_workers.min(items.len());
        log::info!(
            "Starting batch {} with {} items on {} workers",
            id,
            items.len(),
            workers
        );
        let queue = Arc::new(Queue::new(items));
        status_tx.send_replace(BatchStatus::Running);
        let task = tokio::spawn(run(id, fetcher, queue, workers, stop.clone(), status_tx));

        Ok(BatchHandle {
            id,
            stop,
            ledger,
            status,
            task,
        })
    }

    pub fn stop(&self, handle: &BatchHandle) {
        handle.stop();
    }

    fn validate(&self, items: &[Item]) -> Result<()> {
        let mut keys = HashSet::new();
        let mut paths: HashMap<PathBuf, &str> = HashMap::new();
        for item in items {
            if !keys.insert(item.key()) {
                return Err(Error::DuplicateKey(item.key().to_owned()));
            }
            let file = PartialFile::for_item(item, &self.config.final_extension);
            if let Some(other) = paths.insert(file.path().to_path_buf(), item.key()) {
                return Err(Error::PathCollision(
                    other.to_owned(),
                    item.key().to_owned(),
                ));
            }
        }
        Ok(())
    }
}

async fn run(
    id: Uuid,
    fetcher: RangeFetcher,
    queue: Arc<Queue>,
    workers: usize,
    stop: StopSignal,
    status_tx: watch::Sender<BatchStatus>,
) -> BatchReport {
    let handles: Vec<_> = (0..workers)
        .map(|n| {
            tokio::spawn(worker::run(
                n,
                fetcher.clone(),
                queue.clone(),
                stop.clone(),
            ))
        })
        .collect();

    let mut outcomes = Vec::new();
    let mut not_started = Vec::new();
    for result in join_all(handles).await {
        match result {
            Ok(dispatch) => {
                outcomes.extend(dispatch.outcomes);
                not_started.extend(dispatch.not_started);
            }
            Err(e) => log::error!("Worker of batch {} failed: {}", id, e),
        }
    }
    not_started.extend(queue.drain().await);
    let status = if stop.is_stopped() {
        BatchStatus::Stopped
    } else {
        BatchStatus::Completed
    };
    let totals = fetcher.ledger().totals().await;
    log::info!(
        "Batch {} {:?}: {}/{} finished, {} failed, {} never started",
        id,
        status,
        totals.finished_count,
        totals.total_count,
        totals.failed_count,
        not_started.len()
    );
    status_tx.send_replace(status);
    BatchReport {
        id,
        status,
        outcomes,
        not_started,
        totals,
    }
}
