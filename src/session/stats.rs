use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Lifecycle state
    pub state: SessionState,

    /// When the recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Elapsed time in seconds
    pub duration_secs: f64,

    /// Number of chunks started so far
    pub chunks_count: usize,

    /// Chunks whose transcript arrived
    pub chunks_uploaded: usize,

    /// Chunks whose transcription failed
    pub chunks_failed: usize,

    /// Number of transcript parts received
    pub transcript_parts_count: usize,
}
