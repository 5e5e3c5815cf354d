//! Concurrent, resumable batch downloads.
//!
//! A batch is a list of [`Item`]s handed to a [`BatchCoordinator`]. Every item is downloaded by a
//! [`RangeFetcher`] into a `<name>.downloading` file which is renamed once complete, so an
//! interrupted batch can be started again and picks up where it left off. Progress of every item
//! and of the whole batch is kept in a [`ProgressLedger`] which observers can poll.

pub mod batch;
pub mod catalog;
pub mod fetch;
pub mod ledger;
pub mod util;

pub use batch::{BatchCoordinator, BatchHandle, BatchReport, BatchStatus};
pub use catalog::{Catalog, CatalogResolver, Item, UrlResolver};
pub use fetch::config::DownloadConfig;
pub use fetch::stop::StopSignal;
pub use fetch::{DownloadOutcome, FailureReason, RangeFetcher};
pub use ledger::{BatchTotals, ItemProgress, LedgerSnapshot, Phase, ProgressLedger};
