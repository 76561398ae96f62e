use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info};

use crate::error::SyncError;

/// A file picked, pasted or dropped by the user.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "fileUrl", alias = "url")]
    file_url: String,
}

/// Client of the blob-upload service.
///
/// Failures surface as [`SyncError::UploadFailure`] and are never retried;
/// the caller re-invokes the triggering action.
#[derive(Debug, Clone)]
pub struct UploadClient {
    client: Client,
    upload_url: String,
    file_origin: String,
}

impl UploadClient {
    pub fn new(upload_url: &str, file_origin: &str) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SyncError::UploadFailure(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            upload_url: upload_url.to_string(),
            file_origin: file_origin.trim_end_matches('/').to_string(),
        })
    }

    /// POST `file` as multipart field `file` and return its public URL.
    pub async fn upload(&self, file: UploadFile) -> Result<UploadedFile, SyncError> {
        let file_name = file.file_name.clone();
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.mime_type)
            .map_err(|e| SyncError::UploadFailure(format!("invalid mime type '{}': {}", file.mime_type, e)))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Upload of '{}' failed: {}", file_name, e);
                SyncError::UploadFailure(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Upload of '{}' rejected with status {}", file_name, status);
            return Err(SyncError::UploadFailure(format!("upload rejected with status {}", status)));
        }

        let body: UploadResponse = response.json().await.map_err(|e| {
            error!("Upload of '{}' returned an unreadable response: {}", file_name, e);
            SyncError::UploadFailure(format!("unreadable upload response: {}", e))
        })?;

        let url = self.resolve(&body.file_url);
        info!("Uploaded '{}' to {}", file_name, url);
        Ok(UploadedFile { url })
    }

    fn resolve(&self, file_url: &str) -> String {
        if file_url.starts_with("http://") || file_url.starts_with("https://") {
            file_url.to_string()
        } else {
            format!("{}/{}", self.file_origin, file_url.trim_start_matches('/'))
        }
    }
}
