use clap::Parser;
use std::path::PathBuf;

/// Downloads every item of a catalog manifest, resuming whatever an earlier run left behind.
///
/// Press Ctrl-C to stop: running items keep their partial files, queued items are left untouched.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Catalog manifest (YAML or JSON) listing the items to download.
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Settings file, defaults to ~/.batch-downloader/settings.yaml.
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Number of items downloaded at the same time, overrides the settings.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Only download the items with these keys, may be repeated.
    #[arg(long)]
    pub select: Vec<String>,

    /// Base directory for downloads, overrides the settings.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
