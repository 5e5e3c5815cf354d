use anyhow::Context;
use dirs::{download_dir, home_dir};
use downloader::batch::DEFAULT_MAX_WORKERS;
use downloader::fetch::config::{DEFAULT_CHUNK_SIZE, DEFAULT_FINAL_EXTENSION};
use downloader::DownloadConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn user_download_dir() -> PathBuf {
    download_dir()
        .map(|p| p.join("batch-downloader"))
        .unwrap_or_default()
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_final_extension() -> String {
    DEFAULT_FINAL_EXTENSION.to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "user_download_dir")]
    pub download_path: PathBuf,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Video api used to look item urls up, without it tokens are treated as urls
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Extra headers sent with every request, e.g. a referrer
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_final_extension")]
    pub final_extension: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_path: user_download_dir(),
            max_workers: DEFAULT_MAX_WORKERS,
            api_endpoint: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            headers: BTreeMap::new(),
            final_extension: DEFAULT_FINAL_EXTENSION.to_owned(),
        }
    }
}

impl Settings {
    pub fn download_config(&self) -> anyhow::Result<DownloadConfig> {
        let mut config = DownloadConfig::default()
            .with_headers(
                self.headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            )?
            .with_chunk_size(self.chunk_size)?;
        config.final_extension = self.final_extension.clone();
        Ok(config)
    }
}

pub fn default_settings_path() -> PathBuf {
    home_dir()
        .unwrap_or_default()
        .join(".batch-downloader/settings.yaml")
}

/// Reads the settings file, writing one with the defaults first when there is none.
pub async fn load(p: Option<PathBuf>) -> anyhow::Result<Settings> {
    let path = p.unwrap_or_else(default_settings_path);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        log::info!("Found settings file at {}, reading...", path.display());
        let file = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Couldn't read settings file {}", path.display()))?;
        let settings: Settings = serde_yaml::from_str(&file)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        log::info!("Settings loaded: {:?}", settings);
        return Ok(settings);
    }
    log::info!("No settings file found at {}, creating...", path.display());
    let settings = Settings::default();
    write(&path, &settings).await?;
    Ok(settings)
}

async fn write(path: &Path, settings: &Settings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let settings_str = serde_yaml::to_string(settings)?;
    tokio::fs::write(path, settings_str)
        .await
        .with_context(|| format!("Couldn't write settings file {}", path.display()))?;
    log::info!("Settings file written to {}", path.display());
    Ok(())
}
