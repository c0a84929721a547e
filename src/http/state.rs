use crate::audio::AudioBackendConfig;
use crate::cache::OfflineAudioCache;
use crate::session::{FinalizedRecording, RecordingSession, RecordingStore, SessionConfig};
use crate::transcription::Transcriber;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use url::Url;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Recording sessions (session_id → session), kept after stop so their
    /// status and transcript stay queryable
    pub sessions: Arc<RwLock<HashMap<String, Arc<RecordingSession>>>>,

    /// Stopped sessions waiting to be saved
    pub finalized: Arc<Mutex<HashMap<String, FinalizedRecording>>>,

    /// Offline audio lookup for playback
    pub cache: Arc<OfflineAudioCache>,

    /// Speech-to-text backend used by new sessions
    pub transcriber: Arc<dyn Transcriber>,

    /// Finalize backend
    pub store: Arc<dyn RecordingStore>,

    /// Template for new sessions; each gets its own id
    pub session_defaults: SessionConfig,

    /// Frame format for replayed inputs
    pub backend_config: AudioBackendConfig,

    /// Base URL serving `/uploads/<file>` for local audio locations
    pub media_base: Url,
}

impl AppState {
    pub fn new(
        cache: Arc<OfflineAudioCache>,
        transcriber: Arc<dyn Transcriber>,
        store: Arc<dyn RecordingStore>,
        session_defaults: SessionConfig,
        media_base: Url,
    ) -> Self {
        let backend_config = AudioBackendConfig {
            target_sample_rate: session_defaults.sample_rate,
            target_channels: session_defaults.channels,
            buffer_duration_ms: session_defaults.frame_duration_ms,
        };

        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            finalized: Arc::new(Mutex::new(HashMap::new())),
            cache,
            transcriber,
            store,
            session_defaults,
            backend_config,
            media_base,
        }
    }
}
