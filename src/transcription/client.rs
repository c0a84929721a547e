//! Chunk upload and transcript accumulation.
//!
//! [`Transcriber`] is the seam to the speech-to-text backend;
//! [`HttpTranscriber`] talks to the lecture server's preview endpoint.
//! [`TranscriptionClient`] submits chunks through a transcriber and keeps
//! the ordered transcript for one session.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use super::parts::{TranscriptPart, TranscriptParts};
use crate::audio::AudioChunk;
use crate::config::{StorageConfig, TranscriptionConfig};
use crate::error::TranscribeError;

/// Backend upload limit; larger payloads are refused before upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Turns one encoded chunk into text.
///
/// No retries happen behind this trait: a failure is reported once and the
/// caller decides what to do.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String, TranscribeError>;
}

#[derive(Debug, Deserialize)]
struct PreviewResponse {
    text: Option<String>,
    error: Option<String>,
}

/// `POST <endpoint>/upload?preview=true` with the chunk in form field `data`.
pub struct HttpTranscriber {
    client: reqwest::Client,
    upload_url: Url,
    max_upload_bytes: usize,
}

impl HttpTranscriber {
    pub fn new(endpoint: &str, timeout: Duration, max_upload_bytes: usize) -> anyhow::Result<Self> {
        let mut upload_url = Url::parse(endpoint)?.join("upload")?;
        upload_url.set_query(Some("preview=true"));

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            upload_url,
            max_upload_bytes,
        })
    }

    pub fn from_config(
        transcription: &TranscriptionConfig,
        storage: &StorageConfig,
    ) -> anyhow::Result<Self> {
        Self::new(
            &transcription.endpoint,
            Duration::from_secs(transcription.timeout_secs),
            storage.max_upload_bytes,
        )
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }
}

/// 408, 429 and 5xx are worth retrying by hand; any other rejection is final.
pub(crate) fn classify_status(status: reqwest::StatusCode, detail: String) -> TranscribeError {
    if status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        TranscribeError::Network(format!("{}: {}", status, detail))
    } else {
        TranscribeError::Service(format!("{}: {}", status, detail))
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String, TranscribeError> {
        if chunk.payload.len() > self.max_upload_bytes {
            return Err(TranscribeError::Service(format!(
                "chunk {} is {} bytes, limit is {}",
                chunk.chunk_number,
                chunk.payload.len(),
                self.max_upload_bytes
            )));
        }

        let part = reqwest::multipart::Part::bytes(chunk.payload.clone())
            .file_name(chunk.file_name())
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("data", part);

        let response = self
            .client
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: PreviewResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Service(format!("unreadable response: {}", e)))?;

        match (body.text, body.error) {
            (Some(text), _) => Ok(text),
            (None, Some(error)) => Err(TranscribeError::Service(error)),
            (None, None) => Err(TranscribeError::Service(
                "response carried no text".to_string(),
            )),
        }
    }
}

/// Submits chunks and keeps one session's transcript in chunk order.
#[derive(Clone)]
pub struct TranscriptionClient {
    transcriber: Arc<dyn Transcriber>,
    parts: Arc<Mutex<TranscriptParts>>,
}

impl TranscriptionClient {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            parts: Arc::new(Mutex::new(TranscriptParts::new())),
        }
    }

    /// Upload one chunk. The chunk is consumed; its payload is gone once
    /// this returns.
    pub async fn submit(&self, chunk: AudioChunk) -> Result<TranscriptPart, TranscribeError> {
        let chunk_number = chunk.chunk_number;
        info!(
            "Submitting chunk {} ({} bytes, {:.1}s)",
            chunk_number,
            chunk.payload.len(),
            chunk.duration().as_secs_f64()
        );

        match self.transcriber.transcribe(&chunk).await {
            Ok(text) => {
                info!("Chunk {} transcribed ({} chars)", chunk_number, text.len());
                Ok(TranscriptPart::new(chunk_number, text))
            }
            Err(e) => {
                warn!(
                    "Chunk {} transcription failed (retryable={}): {}",
                    chunk_number,
                    e.is_retryable(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Store a part at its chunk position. Returns false if the chunk
    /// number is out of range.
    pub async fn append_ordered(&self, part: TranscriptPart) -> bool {
        self.parts.lock().await.insert(part)
    }

    /// Current transcript, parts joined with single spaces in chunk order.
    pub async fn combine(&self) -> String {
        self.parts.lock().await.combine()
    }

    pub async fn parts(&self) -> Vec<TranscriptPart> {
        self.parts.lock().await.iter().cloned().collect()
    }

    pub async fn gaps(&self) -> Vec<u32> {
        self.parts.lock().await.gaps()
    }
}
