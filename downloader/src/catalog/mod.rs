pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::util::sanitize_file_name;

pub use self::resolver::{ApiUrlResolver, DirectUrlResolver, ResolveError, UrlResolver};

const FALLBACK_NAME: &str = "untitled";

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Couldn't read catalog source '{0}', error: '{1}'")]
    Io(String, std::io::Error),
    #[error("Couldn't parse catalog source '{0}', error: '{1}'")]
    Parse(String, serde_yaml::Error),
    #[error("Catalog pages loop back to '{0}'")]
    PageLoop(String),
}

/// One downloadable unit of a batch.
/// The key is unique inside a batch, the token is resolved into a real url right before the
/// download starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    key: String,
    fetch_token: String,
    destination: PathBuf,
    file_name: String,
}

impl Item {
    pub fn new(
        key: impl Into<String>,
        fetch_token: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let key = key.into();
        let file_name = sanitize_file_name(&key).unwrap_or_else(|| FALLBACK_NAME.to_owned());
        Item {
            key,
            fetch_token: fetch_token.into(),
            destination: destination.into(),
            file_name,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fetch_token(&self) -> &str {
        &self.fetch_token
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Sanitized file name without extension
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: String,
    pub token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub title: String,
    #[serde(default, rename = "items")]
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Directory the batch is downloaded into: `<base>/<sanitized title>`
    pub fn destination(&self, base: &Path) -> PathBuf {
        let dir = sanitize_file_name(&self.title).unwrap_or_else(|| FALLBACK_NAME.to_owned());
        base.join(dir)
    }

    pub fn items(&self, base: &Path) -> Vec<Item> {
        let destination = self.destination(base);
        self.entries
            .iter()
            .map(|entry| Item::new(&entry.key, &entry.token, &destination))
            .collect()
    }

    /// Keeps only the entries whose key is listed, in catalog order
    pub fn select(&mut self, keys: &[String]) {
        let keys: HashSet<&str> = keys.iter().map(String::as_str).collect();
        self.entries.retain(|entry| keys.contains(entry.key.as_str()));
    }
}

/// One page of a catalog, `next` points at the following page if there is one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPage {
    #[serde(flatten)]
    pub catalog: Catalog,
    #[serde(default)]
    pub next: Option<String>,
}

/// Turns a source location into items. Implementations stay out of the download path, the core
/// only needs the keys and tokens.
#[async_trait]
pub trait CatalogResolver {
    async fn resolve_items(&self, source: &str) -> Result<CatalogPage, CatalogError>;
}

/// Resolves every page starting at `source` and concatenates the entries.
/// The title of the first page wins.
pub async fn resolve_catalog<R>(resolver: &R, source: &str) -> Result<Catalog, CatalogError>
where
    R: CatalogResolver + Sync + ?Sized,
{
    let mut visited = HashSet::new();
    let mut catalog: Option<Catalog> = None;
    let mut next = Some(source.to_owned());
    while let Some(source) = next.take() {
        if !visited.insert(source.clone()) {
            return Err(CatalogError::PageLoop(source));
        }
        log::debug!("Resolving catalog page: {}", source);
        let page = resolver.resolve_items(&source).await?;
        match catalog.as_mut() {
            Some(catalog) => catalog.entries.extend(page.catalog.entries),
            None => catalog = Some(page.catalog),
        }
        next = page.next;
    }
    let catalog = catalog.unwrap_or_default();
    log::info!(
        "Catalog '{}' resolved with {} items",
        catalog.title,
        catalog.entries.len()
    );
    Ok(catalog)
}

/// Reads catalog pages from YAML (or JSON) manifest files on disk.
/// Relative `next` paths are taken relative to the page that names them.
#[derive(Debug, Clone, Default)]
pub struct ManifestCatalog;

#[async_trait]
impl CatalogResolver for ManifestCatalog {
    async fn resolve_items(&self, source: &str) -> Result<CatalogPage, CatalogError> {
        let content = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| CatalogError::Io(source.to_owned(), e))?;
        let mut page: CatalogPage = serde_yaml::from_str(&content)
            .map_err(|e| CatalogError::Parse(source.to_owned(), e))?;
        if let (Some(next), Some(parent)) = (page.next.as_mut(), Path::new(source).parent()) {
            if Path::new(next.as_str()).is_relative() {
                *next = parent.join(&*next).to_string_lossy().into_owned();
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn item_file_name_is_sanitized() {
        let item = Item::new("Episode 01 [HD]", "token", "/tmp/show");
        assert_eq!(item.key(), "Episode 01 [HD]");
        assert_eq!(item.file_name(), "Episode_01_HD");
        let item = Item::new("???", "token", "/tmp/show");
        assert_eq!(item.file_name(), FALLBACK_NAME);
    }

    #[test]
    fn catalog_items_share_destination() {
        let mut catalog = Catalog {
            title: "My Show: Season 2".to_owned(),
            entries: vec![
                CatalogEntry {
                    key: "ep1".to_owned(),
                    token: "a".to_owned(),
                },
                CatalogEntry {
                    key: "ep2".to_owned(),
                    token: "b".to_owned(),
                },
            ],
        };
        catalog.select(&["ep2".to_owned()]);
        let items = catalog.items(Path::new("/downloads"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key(), "ep2");
        assert_eq!(
            items[0].destination(),
            Path::new("/downloads/My_Show_Season_2")
        );
    }

    #[test(tokio::test)]
    async fn manifest_pages_are_concatenated() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let first = tmp_dir.path().join("page1.yaml");
        tokio::fs::write(
            &first,
            "title: Show\nitems:\n  - key: ep1\n    token: t1\nnext: page2.yaml\n",
        )
        .await?;
        tokio::fs::write(
            tmp_dir.path().join("page2.yaml"),
            r#"{"title": "ignored", "items": [{"key": "ep2", "token": "t2"}]}"#,
        )
        .await?;
        let catalog = resolve_catalog(&ManifestCatalog, &first.to_string_lossy()).await?;
        assert_eq!(catalog.title, "Show");
        let keys: Vec<_> = catalog.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["ep1", "ep2"]);
        Ok(())
    }

    #[test(tokio::test)]
    async fn manifest_page_loop_is_an_error() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let page = tmp_dir.path().join("page.yaml");
        tokio::fs::write(&page, "title: Show\nitems: []\nnext: page.yaml\n").await?;
        let result = resolve_catalog(&ManifestCatalog, &page.to_string_lossy()).await;
        assert!(matches!(result, Err(CatalogError::PageLoop(_))));
        Ok(())
    }

    #[test(tokio::test)]
    async fn missing_manifest_is_an_error() {
        let result = ManifestCatalog.resolve_items("/definitely/not/here.yaml").await;
        assert!(matches!(result, Err(CatalogError::Io(_, _))));
    }
}
