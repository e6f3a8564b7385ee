//! Presigned-URL uploads to object storage

use hdm_core::{HdmError, HdmResult};
use reqwest::header::CONTENT_LENGTH;
use std::future::Future;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

const SERVICE: &str = "object storage";

/// Puts a local file at a presigned URL.
pub trait Uploader: Send + Sync {
    /// Returns the number of bytes sent.
    fn upload(&self, url: &str, file: &Path) -> impl Future<Output = HdmResult<u64>> + Send;
}

/// Streams the file body with an explicit `Content-Length`, which presigned
/// S3 PUTs require.
pub struct HttpUploader {
    http: reqwest::Client,
}

impl HttpUploader {
    pub fn new() -> HdmResult<Self> {
        Ok(Self {
            http: hdm_broker::http_client()?,
        })
    }
}

impl Uploader for HttpUploader {
    async fn upload(&self, url: &str, file: &Path) -> HdmResult<u64> {
        let handle = tokio::fs::File::open(file)
            .await
            .map_err(HdmError::io(format!("opening {} for upload", file.display())))?;
        let len = handle
            .metadata()
            .await
            .map_err(HdmError::io(format!("stat {}", file.display())))?
            .len();

        debug!(file = %file.display(), bytes = len, "uploading");

        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));
        let response = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
            .map_err(|e| HdmError::Network(format!("uploading {}: {e}", file.display())))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = hdm_broker::error_body(response).await;
            return Err(HdmError::Protocol {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        Ok(len)
    }
}
