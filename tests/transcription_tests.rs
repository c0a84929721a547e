// Integration tests for chunk transcription
//
// The HTTP tests run a small axum server in-process standing in for the
// lecture server's upload endpoint.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::RawQuery,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use scribe_capture::audio::{encode_wav, AudioChunk, ChunkStatus};
use scribe_capture::transcription::{
    HttpTranscriber, Transcriber, TranscriptPart, TranscriptionClient,
};
use scribe_capture::TranscribeError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn chunk(chunk_number: u32) -> Result<AudioChunk> {
    let samples = vec![0i16; 1600];
    Ok(AudioChunk {
        chunk_number,
        duration_target: Duration::from_secs(120),
        start_ms: (chunk_number as u64 - 1) * 120_000,
        sample_rate: 16000,
        channels: 1,
        sample_count: samples.len(),
        payload: encode_wav(&samples, 16000, 1)?,
        status: ChunkStatus::Encoding,
    })
}

/// Answers with the chunk number spelled out, after a per-chunk delay.
struct DelayedTranscriber {
    delays_ms: Vec<u64>,
}

#[async_trait]
impl Transcriber for DelayedTranscriber {
    async fn transcribe(&self, chunk: &AudioChunk) -> Result<String, TranscribeError> {
        let index = chunk.chunk_number as usize - 1;
        tokio::time::sleep(Duration::from_millis(self.delays_ms[index])).await;
        let words = ["one", "two", "three", "four"];
        Ok(format!("  {} ", words[index]))
    }
}

/// Spawn `app` on an ephemeral port and return its base URL.
async fn serve(app: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{}/", addr))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn test_transcript_follows_chunk_order() -> Result<()> {
    // Later chunks answer first
    let client = TranscriptionClient::new(Arc::new(DelayedTranscriber {
        delays_ms: vec![90, 60, 30, 0],
    }));
    let arrivals = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for n in 1..=4 {
        let client = client.clone();
        let arrivals = Arc::clone(&arrivals);
        let audio = chunk(n)?;
        tasks.push(tokio::spawn(async move {
            let part = client.submit(audio).await?;
            arrivals.lock().await.push(part.chunk_number);
            client.append_ordered(part).await;
            Ok::<_, TranscribeError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }

    assert_eq!(*arrivals.lock().await, vec![4, 3, 2, 1]);
    assert_eq!(client.combine().await, "one two three four");
    let order: Vec<u32> = client.parts().await.iter().map(|p| p.chunk_number).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
    assert!(client.gaps().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_missing_part_leaves_gap() -> Result<()> {
    let client = TranscriptionClient::new(Arc::new(DelayedTranscriber {
        delays_ms: vec![0; 4],
    }));

    for n in [3, 1, 4] {
        let part = client.submit(chunk(n)?).await?;
        assert!(client.append_ordered(part).await);
    }

    assert_eq!(client.combine().await, "one three four");
    assert_eq!(client.gaps().await, vec![2]);

    Ok(())
}

#[tokio::test]
async fn test_out_of_range_part_is_ignored() -> Result<()> {
    let client = TranscriptionClient::new(Arc::new(DelayedTranscriber {
        delays_ms: vec![0; 4],
    }));

    assert!(!client.append_ordered(TranscriptPart::new(u32::MAX, "bogus")).await);
    assert!(client.append_ordered(TranscriptPart::new(2, "two")).await);

    assert_eq!(client.combine().await, "two");
    assert_eq!(client.gaps().await, vec![1]);

    Ok(())
}

#[tokio::test]
async fn test_http_transcriber_posts_preview_upload() -> Result<()> {
    let app = Router::new().route(
        "/upload",
        post(|RawQuery(query): RawQuery, body: Bytes| async move {
            if query.as_deref() != Some("preview=true") {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "not a preview" })));
            }
            if !contains(&body, b"name=\"data\"") || !contains(&body, b"audio/wav") {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": "no audio" })));
            }
            (StatusCode::OK, Json(json!({ "text": "the mitochondria" })))
        }),
    );
    let base = serve(app).await?;

    let transcriber = HttpTranscriber::new(&base, Duration::from_secs(5), 10 * 1024 * 1024)?;
    assert_eq!(
        transcriber.upload_url().as_str(),
        format!("{}upload?preview=true", base)
    );

    let text = transcriber.transcribe(&chunk(1)?).await?;
    assert_eq!(text, "the mitochondria");

    Ok(())
}

#[tokio::test]
async fn test_http_transcriber_classifies_failures() -> Result<()> {
    let app = Router::new()
        .route(
            "/busy/upload",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response() }),
        )
        .route(
            "/reject/upload",
            post(|| async {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad audio" }))).into_response()
            }),
        )
        .route(
            "/garbled/upload",
            post(|| async { (StatusCode::OK, "not json").into_response() }),
        );
    let base = serve(app).await?;
    let limit = 10 * 1024 * 1024;

    let busy = HttpTranscriber::new(&format!("{}busy/", base), Duration::from_secs(5), limit)?;
    let err = busy.transcribe(&chunk(1)?).await.unwrap_err();
    assert!(matches!(err, TranscribeError::Network(_)), "got {:?}", err);
    assert!(err.is_retryable());

    let reject = HttpTranscriber::new(&format!("{}reject/", base), Duration::from_secs(5), limit)?;
    let err = reject.transcribe(&chunk(1)?).await.unwrap_err();
    assert!(matches!(err, TranscribeError::Service(_)), "got {:?}", err);
    assert!(!err.is_retryable());

    let garbled = HttpTranscriber::new(&format!("{}garbled/", base), Duration::from_secs(5), limit)?;
    let err = garbled.transcribe(&chunk(1)?).await.unwrap_err();
    assert!(matches!(err, TranscribeError::Service(_)), "got {:?}", err);

    Ok(())
}

#[tokio::test]
async fn test_oversized_chunk_rejected_before_upload() -> Result<()> {
    // Nothing listens here; an attempted upload would be a network error.
    let transcriber = HttpTranscriber::new("http://127.0.0.1:9/", Duration::from_secs(1), 64)?;

    let err = transcriber.transcribe(&chunk(1)?).await.unwrap_err();
    assert!(matches!(err, TranscribeError::Service(_)), "got {:?}", err);

    Ok(())
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() -> Result<()> {
    let transcriber =
        HttpTranscriber::new("http://127.0.0.1:9/", Duration::from_secs(1), 10 * 1024 * 1024)?;

    let err = transcriber.transcribe(&chunk(1)?).await.unwrap_err();
    assert!(matches!(err, TranscribeError::Network(_)), "got {:?}", err);

    Ok(())
}
