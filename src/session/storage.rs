use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::config::StorageConfig;

/// Everything the finalize backend receives for one lecture.
#[derive(Debug, Clone)]
pub struct RecordingUpload {
    pub audio: Vec<u8>,
    pub file_name: String,
    pub title: String,
    pub transcription: String,
    pub course_id: Option<String>,
}

/// What the backend stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRecording {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub text: String,
}

/// Persists a finished lecture.
#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn save(&self, upload: RecordingUpload) -> Result<SavedRecording>;
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
    recording: Option<SavedRecording>,
    error: Option<String>,
    details: Option<String>,
}

/// `POST <endpoint>/upload` with fields `data`, `title`, `transcription`
/// and `courseId`.
pub struct HttpRecordingStore {
    client: reqwest::Client,
    upload_url: Url,
}

impl HttpRecordingStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let upload_url = Url::parse(endpoint)
            .and_then(|u| u.join("upload"))
            .with_context(|| format!("Invalid upload endpoint: {}", endpoint))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, upload_url })
    }

    pub fn from_config(config: &StorageConfig, timeout: Duration) -> Result<Self> {
        Self::new(&config.upload_endpoint, timeout)
    }
}

#[async_trait]
impl RecordingStore for HttpRecordingStore {
    async fn save(&self, upload: RecordingUpload) -> Result<SavedRecording> {
        let audio = reqwest::multipart::Part::bytes(upload.audio)
            .file_name(upload.file_name)
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .part("data", audio)
            .text("title", upload.title)
            .text("transcription", upload.transcription);
        if let Some(course_id) = upload.course_id {
            form = form.text("courseId", course_id);
        }

        let response = self
            .client
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await
            .context("Upload request failed")?;

        let status = response.status();
        let body: SaveResponse = response
            .json()
            .await
            .with_context(|| format!("Unreadable upload response ({})", status))?;

        if !status.is_success() || !body.success {
            let reason = body
                .error
                .into_iter()
                .chain(body.details)
                .collect::<Vec<_>>()
                .join(": ");
            bail!("Upload rejected ({}): {}", status, reason);
        }

        let recording = body.recording.unwrap_or_default();
        info!("Recording stored: {:?}", recording.id);
        Ok(recording)
    }
}
