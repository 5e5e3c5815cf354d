use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use crate::catalog::Item;
use crate::util::existing_file_size;

pub const PARTIAL_EXTENSION: &str = "downloading";

/// The `<name>.downloading` / `<name>.<ext>` pair of one item.
/// Only the worker processing the item touches these paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
}

impl PartialFile {
    pub fn for_item(item: &Item, final_extension: &str) -> Self {
        let dir = item.destination();
        let name = item.file_name();
        PartialFile {
            partial: dir.join(format!("{}.{}", name, PARTIAL_EXTENSION)),
            target: dir.join(format!("{}.{}", name, final_extension)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.partial
    }

    pub fn final_path(&self) -> &Path {
        &self.target
    }

    pub async fn size(&self) -> Option<u64> {
        existing_file_size(&self.partial).await
    }

    pub async fn final_size(&self) -> Option<u64> {
        existing_file_size(&self.target).await
    }

    /// Truncates or creates the partial file
    pub async fn create(&self) -> io::Result<File> {
        if let Some(parent) = self.partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        File::create(&self.partial).await
    }

    pub async fn open_append(&self) -> io::Result<File> {
        OpenOptions::new()
            .append(true)
            .open(&self.partial)
            .await
    }

    pub async fn discard(&self) -> io::Result<()> {
        remove_if_exists(&self.partial).await
    }

    /// Replaces the final file with the partial one. The rename is the only commit step.
    pub async fn commit(&self) -> io::Result<()> {
        remove_if_exists(&self.target).await?;
        tokio::fs::rename(&self.partial, &self.target).await
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
