//! Discord webhook upload.
//!
//! Clips are posted as `multipart/form-data` with the file in a `file` part
//! and an optional message in a `payload_json` field.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

/// Errors that can occur while uploading a clip.
#[derive(Debug, Error)]
pub enum UploadError {
    /// No webhook URL is configured
    #[error("Discord webhook URL is not configured")]
    NotConfigured,

    /// The file to upload could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request could not be built or sent
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Discord answered with a status other than 200 or 204
    #[error("Discord API error: {status} - {body}")]
    Status { status: u16, body: String },
}

/// Posts files to one Discord webhook
#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: String,
    client: Client,
}

impl WebhookClient {
    /// Create a client for `url` with a per-request `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, UploadError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(UploadError::NotConfigured);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Upload `path`, optionally with a message.
    ///
    /// # Returns
    /// * `Ok(())` - Discord answered 200 or 204
    /// * `Err(UploadError::Status)` - any other status, with the response body
    pub async fn upload(&self, path: &Path, message: Option<&str>) -> Result<(), UploadError> {
        let data = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let size = data.len();

        let form = build_form(path, data, message);
        let response = self.client.post(&self.url).multipart(form).send().await?;

        let status = response.status();
        if is_success(status) {
            info!(file = %path.display(), size, "Uploaded to Discord");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "Discord API error");
        Err(UploadError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Multipart body for one upload
fn build_form(path: &Path, data: Vec<u8>, message: Option<&str>) -> Form {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());

    let mut form = Form::new().part("file", Part::bytes(data).file_name(file_name));

    if let Some(message) = message.filter(|m| !m.is_empty()) {
        let payload = serde_json::json!({ "content": message });
        form = form.text("payload_json", payload.to_string());
    }

    form
}

/// Discord answers 200 with `?wait=true` and 204 otherwise
pub fn is_success(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::NO_CONTENT
}
