use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

use super::{kind_from_hint, PageFetcher, RawContent};
use crate::models::SourceConfig;
use crate::utils::error::FetchError;

/// Reads a listing saved on disk. `url` is a path or a `file://` URL.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher;

fn resolve_path(location: &str) -> PathBuf {
    if let Ok(url) = Url::parse(location) {
        if url.scheme() == "file" {
            if let Ok(path) = url.to_file_path() {
                return path;
            }
        }
    }
    PathBuf::from(location)
}

fn base_url(path: &Path, fallback: &str) -> String {
    std::path::absolute(path)
        .ok()
        .and_then(|absolute| Url::from_file_path(absolute).ok())
        .map(|url| url.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[async_trait]
impl PageFetcher for FileFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<RawContent, FetchError> {
        let path = resolve_path(&source.url);
        let body = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchError::Unreachable(format!("{}: {}", path.display(), e)))?;

        let kind = kind_from_hint(path.extension().and_then(|e| e.to_str()).unwrap_or_default());
        Ok(RawContent::single(source, base_url(&path, &source.url), kind, body))
    }
}
