//! Progress-tracked download of update payloads.
//!
//! The whole payload is buffered in memory. A numeric `content-length` header
//! is required up front: it sizes the progress bar and is the reference for
//! detecting truncated transfers.

use crate::core::ServiceError;
use crate::utils::progress::ProgressBar;
use anyhow::Result;
use reqwest::header::CONTENT_LENGTH;
use tracing::{debug, info};

/// Cap on the initial buffer reservation; larger payloads grow as they stream.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

pub struct Downloader {
    client: reqwest::Client,
    show_progress: bool,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl Downloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            show_progress: true,
        }
    }

    pub const fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// GET `url` and return the complete body.
    ///
    /// Errors: [`ServiceError::DownloadFailed`] for transport failures and
    /// non-success statuses, [`ServiceError::MissingContentLength`] when the
    /// header is absent or not a number, [`ServiceError::IncompleteDownload`]
    /// when fewer bytes arrive than announced.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(target: "update", "Requesting {url}");
        let transport_error = |e: reqwest::Error| ServiceError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut response = self.client.get(url).send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            }
            .into());
        }

        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| ServiceError::MissingContentLength {
                url: url.to_string(),
            })?;

        let progress =
            if self.show_progress { ProgressBar::new_download(total) } else { ProgressBar::hidden() };
        progress.set_prefix("Downloading");

        let capacity = usize::try_from(total.min(MAX_PREALLOCATION)).unwrap_or(0);
        let mut payload = Vec::with_capacity(capacity);
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            payload.extend_from_slice(&chunk);
            progress.inc(chunk.len() as u64);
        }
        progress.finish_and_clear();

        let received = payload.len() as u64;
        if received != total {
            return Err(ServiceError::IncompleteDownload {
                expected: total,
                received,
            }
            .into());
        }

        info!(target: "update", "Downloaded {received} bytes from {url}");
        Ok(payload)
    }
}
