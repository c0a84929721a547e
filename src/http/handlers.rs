use super::state::AppState;
use crate::audio::{AudioBackendFactory, AudioInput, SessionArtifact};
use crate::cache::{AudioLocation, ResolvedAudio};
use crate::error::SessionError;
use crate::session::{RecordingSession, SessionStats};
use crate::transcription::TranscriptPart;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    /// Optional session ID (if not provided, generate one)
    pub session_id: Option<String>,

    /// Audio file replayed as the session input
    pub input: PathBuf,

    /// Chunk duration in seconds (default from config)
    pub chunk_duration_secs: Option<u64>,

    /// Pace frames at their natural rate (default: true)
    pub realtime: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub session_id: String,
    pub status: String,
    pub artifact: SessionArtifact,
    pub transcript: String,
    pub failed_chunks: Vec<u32>,
    pub stats: SessionStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveRecordingRequest {
    pub title: Option<String>,
    pub course_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub session_id: String,
    pub transcript: String,
    pub parts: Vec<TranscriptPart>,
}

#[derive(Debug, Deserialize)]
pub struct AudioQuery {
    /// Stored audio reference: URL, `/uploads/<file>` or bare file name
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct OfflineResponse {
    pub lecture_id: String,
    pub saved: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn session_error_status(e: &SessionError) -> StatusCode {
    match e {
        SessionError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        SessionError::InvalidState { .. } => StatusCode::CONFLICT,
        SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Artifact(_) | SessionError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn find_session(state: &AppState, session_id: &str) -> Option<Arc<RecordingSession>> {
    state.sessions.read().await.get(session_id).cloned()
}

/// Turn a stored audio reference into the URL the network tier would use.
fn network_url(state: &AppState, raw: &str) -> Result<String, Response> {
    let location = AudioLocation::parse(raw)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
    location
        .network_url(&state.media_base)
        .map(|u| u.to_string())
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions/record/start
/// Start a new recording session
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> Response {
    let mut config = state.session_defaults.clone();
    if let Some(session_id) = req.session_id {
        config = config.with_session_id(session_id);
    } else {
        config = config.with_session_id(format!("lecture-{}", uuid::Uuid::new_v4()));
    }
    if let Some(secs) = req.chunk_duration_secs {
        if secs == 0 {
            return error_response(
                StatusCode::BAD_REQUEST,
                "chunk_duration_secs must be positive",
            );
        }
        config.chunk_duration = std::time::Duration::from_secs(secs);
    }
    let session_id = config.session_id.clone();
    if let Err(e) = config.validate() {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }

    info!("Starting recording for session: {}", session_id);

    // Reserve the id under a short write lock; the session sits in the map
    // as `idle` while its input is opened.
    let session = {
        let mut sessions = state.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} already exists", session_id),
            );
        }
        let session = Arc::new(RecordingSession::new(config, Arc::clone(&state.transcriber)));
        sessions.insert(session_id.clone(), Arc::clone(&session));
        session
    };

    let backend = AudioBackendFactory::create(
        AudioInput::File {
            path: req.input,
            realtime: req.realtime.unwrap_or(true),
        },
        state.backend_config.clone(),
    );

    if let Err(e) = session.start(backend).await {
        error!("Failed to start recording: {}", e);
        state.sessions.write().await.remove(&session_id);
        return error_response(
            session_error_status(&e),
            format!("Failed to start recording: {}", e),
        );
    }

    info!("Recording started successfully for session: {}", session_id);

    (
        StatusCode::OK,
        Json(StartRecordingResponse {
            session_id: session_id.clone(),
            status: "recording".to_string(),
            message: format!("Recording started for session {}", session_id),
        }),
    )
        .into_response()
}

/// POST /sessions/record/stop/:session_id
/// Stop recording and finalize the session
pub async fn stop_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    info!("Stopping recording for session: {}", session_id);

    let Some(session) = find_session(&state, &session_id).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        );
    };

    match session.stop().await {
        Ok(recording) => {
            let response = StopRecordingResponse {
                session_id: session_id.clone(),
                status: session.state().await.to_string(),
                artifact: recording.artifact().clone(),
                transcript: recording.transcript().to_string(),
                failed_chunks: recording.failed_chunks().to_vec(),
                stats: session.stats().await,
            };
            state
                .finalized
                .lock()
                .await
                .insert(session_id.clone(), recording);

            info!("Recording stopped successfully for session: {}", session_id);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            error_response(
                session_error_status(&e),
                format!("Failed to stop recording: {}", e),
            )
        }
    }
}

/// POST /sessions/:session_id/save
/// Upload a finalized recording and its transcript
pub async fn save_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Option<Json<SaveRecordingRequest>>,
) -> Response {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let Some(recording) = state.finalized.lock().await.remove(&session_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("No finalized recording for session {}", session_id),
        );
    };

    match recording
        .save(
            state.store.as_ref(),
            req.title.as_deref(),
            req.course_id.as_deref(),
        )
        .await
    {
        Ok(saved) => (StatusCode::OK, Json(saved)).into_response(),
        Err(e) => {
            warn!("Save failed for session {}; keeping recording for retry", session_id);
            let reason = e.to_string();
            state
                .finalized
                .lock()
                .await
                .insert(session_id, e.into_recording());
            error_response(StatusCode::BAD_GATEWAY, reason)
        }
    }
}

/// GET /sessions/:session_id/status
/// Get status of a recording session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match find_session(&state, &session_id).await {
        Some(session) => (StatusCode::OK, Json(session.stats().await)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /sessions/:session_id/transcript
/// Get transcript for a session (accumulated so far)
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match find_session(&state, &session_id).await {
        Some(session) => (
            StatusCode::OK,
            Json(TranscriptResponse {
                session_id,
                transcript: session.transcript().await,
                parts: session.transcript_parts().await,
            }),
        )
            .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} not found", session_id),
        ),
    }
}

/// GET /lectures/:lecture_id/audio?url=
/// Resolve the fastest playable source for a lecture
pub async fn resolve_audio(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    Query(query): Query<AudioQuery>,
) -> Response {
    let url = match network_url(&state, &query.url) {
        Ok(url) => url,
        Err(response) => return response,
    };

    let resolved: ResolvedAudio = state.cache.resolve(&lecture_id, &url).await;
    (StatusCode::OK, Json(resolved)).into_response()
}

/// POST /lectures/:lecture_id/offline
/// Download a lecture's audio and keep it for offline playback
pub async fn save_for_offline(
    State(state): State<AppState>,
    Path(lecture_id): Path<String>,
    Json(query): Json<AudioQuery>,
) -> Response {
    let url = match network_url(&state, &query.url) {
        Ok(url) => url,
        Err(response) => return response,
    };

    let saved = state.cache.save_for_offline(&lecture_id, &url).await;
    let status = if saved {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    (status, Json(OfflineResponse { lecture_id, saved })).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
