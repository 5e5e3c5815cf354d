use reqwest::header::{self, HeaderMap};
use std::path::Path;

/// Extracts filesize from path, None if there is no file or the read fails.
/// A missing file and an empty one are told apart.
pub async fn existing_file_size(fpath: &Path) -> Option<u64> {
    match tokio::fs::metadata(fpath).await {
        Ok(metadata) if metadata.is_file() => Some(metadata.len()),
        _ => None,
    }
}

pub const HALF_SECOND: std::time::Duration = std::time::Duration::from_millis(500);

const REPLACEMENT: char = '_';

/**
 * Turns an item key into something usable as a file name.
 * Every char that isn't alphanumeric or one of `._-` becomes `_`,
 * runs of `_` collapse into one and a trailing `_` is dropped.
 * Returns None if nothing usable is left.
 */
pub fn sanitize_file_name(key: &str) -> Option<String> {
    let mut name = String::with_capacity(key.len());
    for c in key.chars() {
        let c = if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            REPLACEMENT
        };
        if c == REPLACEMENT && name.ends_with(REPLACEMENT) {
            continue;
        }
        name.push(c);
    }
    if name.ends_with(REPLACEMENT) {
        name.pop();
    }
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

pub fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Reads the `Content-Length` header directly.
/// `Response::content_length` reports the body size hint, which is 0 for HEAD responses.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/**
 * Given a HeaderMap extracts the complete length from a `Content-Range: bytes a-b/total` header.
 * Returns None if the header is missing, malformed or the total is `*`.
 */
pub fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.trim().strip_prefix("bytes")?.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[cfg(test)]
pub mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use tempfile::TempDir;
    use tokio::{fs::File, io::AsyncWriteExt};

    #[test]
    fn sanitize_file_name_test() {
        assert_eq!(sanitize_file_name("ep1").as_deref(), Some("ep1"));
        assert_eq!(
            sanitize_file_name("Show [01] (1080p)").as_deref(),
            Some("Show_01_1080p")
        );
        assert_eq!(
            sanitize_file_name("a//b__c  d.mp4").as_deref(),
            Some("a_b_c_d.mp4")
        );
        assert_eq!(sanitize_file_name("第 12 話").as_deref(), Some("第_12_話"));
        assert_eq!(sanitize_file_name("keep-dash.and_dot").as_deref(), Some("keep-dash.and_dot"));
        assert_eq!(sanitize_file_name("trailing!!").as_deref(), Some("trailing"));
        assert_eq!(sanitize_file_name("?!*"), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[test]
    fn content_range_total_test() {
        // Given
        let mut headermap = HeaderMap::new();
        assert_eq!(content_range_total(&headermap), None);
        // When
        headermap.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_static("bytes 50-99/100"),
        );
        // Then
        assert_eq!(content_range_total(&headermap), Some(100));
        // When
        headermap.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 0-9/*"));
        // Then
        assert_eq!(content_range_total(&headermap), None);
    }

    #[test]
    fn content_length_test() {
        let mut headermap = HeaderMap::new();
        assert_eq!(content_length(&headermap), None);
        headermap.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4096"));
        assert_eq!(content_length(&headermap), Some(4096));
        headermap.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(content_length(&headermap), None);
    }

    #[tokio::test]
    async fn file_size_retrieval_test() -> anyhow::Result<()> {
        // Setup
        let tmp_dir = TempDir::new()?;
        let fpath = tmp_dir.path().join("ep1.downloading");
        assert_eq!(existing_file_size(&fpath).await, None, "Missing file has no size!");
        // Create file and check that it's empty (size == 0)
        let mut file_handler = File::create(&fpath).await?;
        assert_eq!(
            existing_file_size(&fpath).await,
            Some(0),
            "Newly created file should have 0 Bytes!"
        );
        // Write some bytes to the buffer
        let bytes: u64 = file_handler.write(b"b").await? as u64;
        // Flush the buffer to the file
        file_handler.flush().await?;
        // Assert that the exact number of bytes written is retrieved
        assert_eq!(
            existing_file_size(&fpath).await,
            Some(bytes),
            "File should have as many bytes as written in the buffer!"
        );
        Ok(())
    }
}
