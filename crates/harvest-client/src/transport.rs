use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use harvest_core::error::AppError;
use harvest_core::traits::{ArchiveDownload, ArchiveTransport};
use reqwest::{Client, Response};
use tokio_util::io::StreamReader;

/// HTTP transport using reqwest.
///
/// Archive bodies are streamed, so only the connect and per-read timeouts
/// apply to them; a complete file can take far longer to arrive.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeouts(Duration::from_secs(30), Duration::from_secs(120))
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("news-harvest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect)
            .read_timeout(read)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<Response, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }
        Ok(response)
    }
}

impl ArchiveTransport for ReqwestTransport {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;
        Ok(body.to_vec())
    }

    async fn open(&self, url: &str) -> Result<ArchiveDownload, AppError> {
        let response = self.get(url).await?;
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(ArchiveDownload {
            content_length,
            body: Box::pin(StreamReader::new(body)),
        })
    }
}
