mod args;
mod settings;

use anyhow::Context;
use clap::Parser;
use downloader::catalog::{resolve_catalog, ApiUrlResolver, DirectUrlResolver, ManifestCatalog};
use downloader::ledger::LedgerSnapshot;
use downloader::util::{mb, HALF_SECOND};
use downloader::{BatchCoordinator, BatchReport, BatchStatus, Phase, UrlResolver};
use reqwest::Url;
use std::process::ExitCode;
use std::sync::Arc;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();
    let settings = settings::load(args.settings.clone()).await?;
    let config = settings.download_config()?;

    let manifest = args.manifest.to_string_lossy().into_owned();
    let mut catalog = resolve_catalog(&ManifestCatalog, &manifest).await?;
    if !args.select.is_empty() {
        catalog.select(&args.select);
    }
    let base = args.output.unwrap_or_else(|| settings.download_path.clone());
    let items = catalog.items(&base);
    println!(
        "{}: {} items into {}",
        catalog.title,
        items.len(),
        catalog.destination(&base).display()
    );

    let resolver: Arc<dyn UrlResolver> = match settings.api_endpoint.as_deref() {
        Some(endpoint) => {
            let endpoint = Url::parse(endpoint)
                .with_context(|| format!("Invalid api endpoint '{}'", endpoint))?;
            Arc::new(ApiUrlResolver::new(
                endpoint,
                config.headers.clone(),
                config.timeout,
            ))
        }
        None => Arc::new(DirectUrlResolver),
    };
    let workers = args.workers.unwrap_or(settings.max_workers);
    let coordinator = BatchCoordinator::new(resolver, config);
    let handle = coordinator.start(items, workers).await?;

    let mut ticker = tokio::time::interval(HALF_SECOND);
    let mut stop_requested = false;
    while !handle.status().is_terminal() {
        tokio::select! {
            _ = ticker.tick() => print_progress(&handle.ledger().snapshot().await),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if stop_requested {
                    println!("Interrupted again, exiting without waiting for the batch");
                    return Ok(ExitCode::from(130));
                }
                println!("Stopping, running items keep their partial files...");
                println!("Press Ctrl-C again to exit right away");
                coordinator.stop(&handle);
                stop_requested = true;
            }
        }
    }
    let report = handle.wait().await?;
    print_summary(&report);

    if report.failed().next().is_some() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_progress(snapshot: &LedgerSnapshot) {
    let totals = &snapshot.totals;
    println!(
        "[{}/{} done, {} failed] {:.2}/{:.2}MB",
        totals.finished_count,
        totals.total_count,
        totals.failed_count,
        mb(totals.downloaded_bytes),
        mb(totals.total_bytes)
    );
    for (key, progress) in snapshot.items.iter() {
        if progress.phase == Phase::Pending || progress.phase.is_terminal() {
            continue;
        }
        match progress.total_size {
            Some(total) if total > 0 => println!(
                "  {}: {:.2}/{:.2}MB ({:.1}%)",
                key,
                mb(progress.downloaded_size),
                mb(total),
                progress.downloaded_size as f64 / total as f64 * 100.0
            ),
            _ => println!("  {}: {:.2}MB", key, mb(progress.downloaded_size)),
        }
    }
}

fn print_summary(report: &BatchReport) {
    let totals = &report.totals;
    let verb = match report.status {
        BatchStatus::Stopped => "stopped",
        _ => "finished",
    };
    println!(
        "Batch {}: {} of {} items downloaded, {:.2}MB",
        verb,
        totals.finished_count,
        totals.total_count,
        mb(totals.downloaded_bytes)
    );
    if !report.not_started.is_empty() {
        println!("Not started: {}", report.not_started.join(", "));
    }
    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        println!("Failed:");
        for (key, reason) in failed {
            println!("  {}: {}", key, reason);
        }
    }
}
