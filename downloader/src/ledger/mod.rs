use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::catalog::Item;
use crate::fetch::FailureReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Probing,
    Downloading,
    Succeeded,
    Failed(FailureReason),
}

impl Phase {
    fn rank(&self) -> u8 {
        match self {
            Phase::Pending => 0,
            Phase::Probing => 1,
            Phase::Downloading => 2,
            Phase::Succeeded | Phase::Failed(_) => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

/// Terminal result of an item as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(FailureReason),
}

impl From<ItemOutcome> for Phase {
    fn from(value: ItemOutcome) -> Self {
        match value {
            ItemOutcome::Succeeded => Phase::Succeeded,
            ItemOutcome::Failed(reason) => Phase::Failed(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    /// None until the size is known
    pub total_size: Option<u64>,
    pub downloaded_size: u64,
    pub phase: Phase,
}

impl Default for ItemProgress {
    fn default() -> Self {
        Self {
            total_size: None,
            downloaded_size: 0,
            phase: Phase::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTotals {
    /// Sum of all known item sizes
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Items that succeeded
    pub finished_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
}

/// Consistent copy of the ledger, items are in batch order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub items: Vec<(String, ItemProgress)>,
    pub totals: BatchTotals,
}

impl LedgerSnapshot {
    pub fn item(&self, key: &str) -> Option<&ItemProgress> {
        self.items
            .iter()
            .find(|(item_key, _)| item_key == key)
            .map(|(_, progress)| progress)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &FailureReason)> {
        self.items
            .iter()
            .filter_map(|(key, progress)| match &progress.phase {
                Phase::Failed(reason) => Some((key.as_str(), reason)),
                _ => None,
            })
    }
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    items: HashMap<String, ItemProgress>,
    totals: BatchTotals,
}

impl Inner {
    /// Moves an item strictly forward, backward or repeated transitions are ignored.
    fn advance(&mut self, key: &str, next: Phase) -> Option<&mut ItemProgress> {
        let Some(progress) = self.items.get_mut(key) else {
            log::warn!("Ledger has no entry for item '{}'", key);
            return None;
        };
        if next.rank() <= progress.phase.rank() {
            log::debug!(
                "Ignoring transition {:?} -> {:?} for item '{}'",
                progress.phase,
                next,
                key
            );
            return None;
        }
        log::debug!("Item '{}': {:?} -> {:?}", key, progress.phase, next);
        progress.phase = next;
        Some(progress)
    }
}

/// Keeps the progress of every item in a batch plus the batch totals.
/// A single lock guards the items and the totals together so a snapshot never shows a delta
/// applied to one and not the other.
/// This struct is supposed to be cloned, every clone shares the same state.
#[derive(Debug, Clone, Default)]
pub struct ProgressLedger {
    inner: Arc<RwLock<Inner>>,
}

impl ProgressLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the ledger contents with one pending entry per item.
    pub async fn init(&self, items: &[Item]) {
        let mut inner = self.inner.write().await;
        inner.order = items.iter().map(|item| item.key().to_owned()).collect();
        inner.items = items
            .iter()
            .map(|item| (item.key().to_owned(), ItemProgress::default()))
            .collect();
        inner.totals = BatchTotals {
            total_count: items.len(),
            ..BatchTotals::default()
        };
    }

    pub async fn set_probing(&self, key: &str) {
        let mut inner = self.inner.write().await;
        inner.advance(key, Phase::Probing);
    }

    pub async fn set_downloading(&self, key: &str, total_size: Option<u64>) {
        let mut inner = self.inner.write().await;
        if let Some(progress) = inner.advance(key, Phase::Downloading) {
            progress.total_size = total_size;
            if let Some(total_size) = total_size {
                inner.totals.total_bytes += total_size;
            }
        }
    }

    /// Adds to the item and the batch total in one step. Only downloading items count bytes.
    pub async fn add_downloaded(&self, key: &str, delta: u64) {
        let mut inner = self.inner.write().await;
        let Some(progress) = inner.items.get_mut(key) else {
            log::warn!("Ledger has no entry for item '{}'", key);
            return;
        };
        if progress.phase != Phase::Downloading {
            log::debug!(
                "Ignoring {} bytes for item '{}' in phase {:?}",
                delta,
                key,
                progress.phase
            );
            return;
        }
        let delta = match progress.total_size {
            Some(total) if progress.downloaded_size + delta > total => {
                log::warn!(
                    "Item '{}' would exceed its size of {} bytes, clamping",
                    key,
                    total
                );
                total - progress.downloaded_size
            }
            _ => delta,
        };
        progress.downloaded_size += delta;
        inner.totals.downloaded_bytes += delta;
    }

    pub async fn set_outcome(&self, key: &str, outcome: ItemOutcome) {
        let mut inner = self.inner.write().await;
        let succeeded = outcome == ItemOutcome::Succeeded;
        if inner.advance(key, outcome.into()).is_some() {
            if succeeded {
                inner.totals.finished_count += 1;
            } else {
                inner.totals.failed_count += 1;
            }
        }
    }

    pub async fn item(&self, key: &str) -> Option<ItemProgress> {
        let inner = self.inner.read().await;
        inner.items.get(key).cloned()
    }

    pub async fn totals(&self) -> BatchTotals {
        self.inner.read().await.totals
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.read().await;
        let items = inner
            .order
            .iter()
            .filter_map(|key| Some((key.clone(), inner.items.get(key)?.clone())))
            .collect();
        LedgerSnapshot {
            items,
            totals: inner.totals,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    fn items(keys: &[&str]) -> Vec<Item> {
        keys.iter()
            .map(|key| Item::new(*key, format!("token-{}", key), "/tmp/batch"))
            .collect()
    }

    fn assert_consistent(snapshot: &LedgerSnapshot) {
        let downloaded: u64 = snapshot.items.iter().map(|(_, p)| p.downloaded_size).sum();
        let total: u64 = snapshot.items.iter().filter_map(|(_, p)| p.total_size).sum();
        assert_eq!(snapshot.totals.downloaded_bytes, downloaded);
        assert_eq!(snapshot.totals.total_bytes, total);
        for (key, progress) in snapshot.items.iter() {
            if let Some(total) = progress.total_size {
                assert!(progress.downloaded_size <= total, "{} exceeds its size", key);
            }
        }
    }

    #[test(tokio::test)]
    async fn init_creates_pending_entries() {
        let ledger = ProgressLedger::new();
        ledger.init(&items(&["ep1", "ep2", "ep3"])).await;
        let snapshot = ledger.snapshot().await;
        let keys: Vec<_> = snapshot.items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["ep1", "ep2", "ep3"]);
        assert_eq!(snapshot.item("ep2"), Some(&ItemProgress::default()));
        assert_eq!(
            snapshot.totals,
            BatchTotals {
                total_count: 3,
                ..BatchTotals::default()
            }
        );
    }

    #[test(tokio::test)]
    async fn phases_only_move_forward() {
        let ledger = ProgressLedger::new();
        ledger.init(&items(&["ep1"])).await;
        ledger.set_downloading("ep1", Some(100)).await;
        ledger.set_probing("ep1").await;
        ledger.set_downloading("ep1", Some(500)).await;
        let progress = ledger.item("ep1").await.unwrap();
        assert_eq!(progress.phase, Phase::Downloading);
        assert_eq!(progress.total_size, Some(100));
        assert_eq!(ledger.totals().await.total_bytes, 100);
    }

    #[test(tokio::test)]
    async fn terminal_items_ignore_updates() {
        let ledger = ProgressLedger::new();
        ledger.init(&items(&["ep1"])).await;
        ledger.set_probing("ep1").await;
        ledger.set_downloading("ep1", Some(10)).await;
        ledger.add_downloaded("ep1", 10).await;
        ledger.set_outcome("ep1", ItemOutcome::Succeeded).await;
        // a second run over the same item must not count again
        ledger.set_probing("ep1").await;
        ledger.set_downloading("ep1", Some(10)).await;
        ledger.add_downloaded("ep1", 10).await;
        ledger.set_outcome("ep1", ItemOutcome::Succeeded).await;
        ledger
            .set_outcome("ep1", ItemOutcome::Failed(FailureReason::Forbidden))
            .await;
        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.totals.finished_count, 1);
        assert_eq!(snapshot.totals.failed_count, 0);
        assert_eq!(snapshot.totals.downloaded_bytes, 10);
        assert_eq!(snapshot.item("ep1").unwrap().phase, Phase::Succeeded);
        assert_consistent(&snapshot);
    }

    #[test(tokio::test)]
    async fn bytes_only_count_while_downloading() {
        let ledger = ProgressLedger::new();
        ledger.init(&items(&["ep1"])).await;
        ledger.add_downloaded("ep1", 5).await;
        ledger.add_downloaded("unknown", 5).await;
        assert_eq!(ledger.totals().await.downloaded_bytes, 0);
        ledger.set_downloading("ep1", Some(8)).await;
        ledger.add_downloaded("ep1", 5).await;
        ledger.add_downloaded("ep1", 5).await;
        let snapshot = ledger.snapshot().await;
        assert_eq!(snapshot.item("ep1").unwrap().downloaded_size, 8);
        assert_consistent(&snapshot);
    }

    #[test(tokio::test)]
    async fn failed_items_are_listed() {
        let ledger = ProgressLedger::new();
        ledger.init(&items(&["ep1", "ep2"])).await;
        ledger
            .set_outcome("ep2", ItemOutcome::Failed(FailureReason::HttpStatus(500)))
            .await;
        let snapshot = ledger.snapshot().await;
        let failed: Vec<_> = snapshot.failed().collect();
        assert_eq!(failed, vec![("ep2", &FailureReason::HttpStatus(500))]);
        assert_eq!(snapshot.totals.failed_count, 1);
        assert_eq!(snapshot.totals.finished_count, 0);
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_updates_stay_consistent() {
        let keys: Vec<String> = (0..16).map(|i| format!("ep{}", i)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let ledger = ProgressLedger::new();
        ledger.init(&items(&key_refs)).await;

        let mut handles = Vec::new();
        for key in keys.clone() {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.set_downloading(&key, Some(1000)).await;
                for _ in 0..100 {
                    ledger.add_downloaded(&key, 10).await;
                }
                ledger.set_outcome(&key, ItemOutcome::Succeeded).await;
            }));
        }
        let observer = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..200 {
                    let snapshot = ledger.snapshot().await;
                    assert_consistent(&snapshot);
                    assert!(snapshot.totals.downloaded_bytes >= last);
                    last = snapshot.totals.downloaded_bytes;
                    tokio::task::yield_now().await;
                }
            })
        };
        for handle in handles {
            handle.await.unwrap();
        }
        observer.await.unwrap();

        let snapshot = ledger.snapshot().await;
        assert_consistent(&snapshot);
        assert_eq!(snapshot.totals.downloaded_bytes, 16_000);
        assert_eq!(snapshot.totals.total_bytes, 16_000);
        assert_eq!(snapshot.totals.finished_count, 16);
    }
}
