use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::catalog::Item;
use crate::fetch::stop::StopSignal;
use crate::fetch::{DownloadOutcome, RangeFetcher};
use crate::ledger::Phase;

/// Items of a batch that no worker has taken yet
#[derive(Debug)]
pub(crate) struct Queue {
    items: Mutex<VecDeque<Item>>,
}

impl Queue {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items.into()),
        }
    }

    /// Next item to dispatch, None once the queue is empty or a stop was requested.
    /// The stop flag is read under the queue lock so no item leaves the queue after a stop.
    pub async fn next(&self, stop: &StopSignal) -> Option<Item> {
        let mut items = self.items.lock().await;
        if stop.is_stopped() {
            return None;
        }
        items.pop_front()
    }

    /// Empties the queue, returning the keys that were never dispatched
    pub async fn drain(&self) -> Vec<String> {
        self.items
            .lock()
            .await
            .drain(..)
            .map(|item| item.key().to_owned())
            .collect()
    }
}

/// What one worker did with the items it took
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    pub outcomes: Vec<(String, DownloadOutcome)>,
    /// Taken from the queue but stopped before anything was requested or written
    pub not_started: Vec<String>,
}

/// Takes one item at a time until the queue is empty or a stop is observed.
pub(crate) async fn run(
    worker: usize,
    fetcher: RangeFetcher,
    queue: Arc<Queue>,
    stop: StopSignal,
) -> Dispatch {
    let mut dispatch = Dispatch::default();
    while let Some(item) = queue.next(&stop).await {
        log::debug!("Worker {} took item '{}'", worker, item.key());
        let outcome = fetcher.fetch_item(&item).await;
        log::debug!(
            "Worker {} finished item '{}': {:?}",
            worker,
            item.key(),
            outcome
        );
        let untouched = outcome == DownloadOutcome::Stopped
            && fetcher
                .ledger()
                .item(item.key())
                .await
                .is_some_and(|progress| progress.phase == Phase::Pending);
        if untouched {
            dispatch.not_started.push(item.key().to_owned());
        } else {
            dispatch.outcomes.push((item.key().to_owned(), outcome));
        }
    }
    if stop.is_stopped() {
        log::debug!("Worker {} observed stop, no more items taken", worker);
    }
    dispatch
}
