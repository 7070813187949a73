//! Page image downloader.

use std::path::Path;

use tracing::debug;

use super::{PageFetcher, ScrapeError};

/// Download `url` to `dest`, creating parent directories. Returns bytes written.
pub async fn download(
    fetcher: &dyn PageFetcher,
    url: &str,
    dest: &Path,
) -> Result<u64, ScrapeError> {
    let bytes = fetcher.fetch_bytes(url).await?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes).await?;

    debug!(url, path = %dest.display(), size = bytes.len(), "Downloaded page image");
    Ok(bytes.len() as u64)
}
