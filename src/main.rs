use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scribe_capture::audio::{AudioBackendConfig, AudioBackendFactory, AudioInput};
use scribe_capture::cache::{
    AudioLocation, HttpFetcher, LocalFolderAccess, OfflineDatabase, PresetFolderPicker,
    ResponseCache, UserGesture,
};
use scribe_capture::{
    create_router, AppState, Config, HttpRecordingStore, HttpTranscriber, OfflineAudioCache,
    RecordingSession, SessionConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "scribe-capture", version, about = "Chunked lecture recording and transcription")]
struct Cli {
    /// Config file, without extension
    #[arg(long, default_value = "config/scribe")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Record a lecture from an audio file and print the transcript
    Record {
        /// Audio file replayed as the microphone
        #[arg(long)]
        input: PathBuf,

        /// Session ID (generated if omitted)
        #[arg(long)]
        session_id: Option<String>,

        /// Lecture title used when saving
        #[arg(long)]
        title: Option<String>,

        /// Course the lecture belongs to
        #[arg(long)]
        course_id: Option<String>,

        /// Upload the recording and transcript when done
        #[arg(long)]
        save: bool,

        /// Replay at the natural rate instead of as fast as possible
        #[arg(long)]
        realtime: bool,
    },

    /// Resolve the playable source for a lecture
    Resolve {
        lecture_id: String,

        /// Audio URL, `/uploads/<file>` path or bare file name
        location: String,

        /// Grant access to a local audio folder first
        #[arg(long)]
        folder: Option<PathBuf>,
    },

    /// Download a lecture's audio for offline playback
    SaveOffline {
        lecture_id: String,

        /// Audio URL, `/uploads/<file>` path or bare file name
        location: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scribe_capture=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Scribe Capture v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Record {
            input,
            session_id,
            title,
            course_id,
            save,
            realtime,
        } => {
            record(
                cfg,
                input,
                session_id,
                title.as_deref(),
                course_id.as_deref(),
                save,
                realtime,
            )
            .await
        }
        Command::Resolve {
            lecture_id,
            location,
            folder,
        } => resolve(cfg, &lecture_id, &location, folder).await,
        Command::SaveOffline {
            lecture_id,
            location,
        } => save_offline(cfg, &lecture_id, &location).await,
    }
}

fn build_cache(cfg: &Config) -> Result<Arc<OfflineAudioCache>> {
    let db = OfflineDatabase::open(&cfg.cache.store_path)
        .with_context(|| format!("Failed to open offline database {}", cfg.cache.store_path))?;
    let folder = LocalFolderAccess::new(Arc::new(db.handles()?));
    let fetcher = HttpFetcher::new(Duration::from_secs(cfg.transcription.timeout_secs))?;

    Ok(Arc::new(OfflineAudioCache::new(
        Arc::new(db.files()?),
        Arc::new(ResponseCache::new(&cfg.cache.response_cache_path)),
        Arc::new(folder),
        Arc::new(fetcher),
    )
    .with_memory_limit(cfg.cache.memory_limit_bytes)))
}

fn network_url(cfg: &Config, location: &str) -> Result<String> {
    let media_base = Url::parse(&cfg.cache.media_base_url)
        .with_context(|| format!("Invalid media base URL {}", cfg.cache.media_base_url))?;
    let url = AudioLocation::parse(location)?.network_url(&media_base)?;
    Ok(url.to_string())
}

fn backend_config(session: &SessionConfig) -> AudioBackendConfig {
    AudioBackendConfig {
        target_sample_rate: session.sample_rate,
        target_channels: session.channels,
        buffer_duration_ms: session.frame_duration_ms,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let transcriber = Arc::new(HttpTranscriber::from_config(&cfg.transcription, &cfg.storage)?);
    let store = Arc::new(HttpRecordingStore::from_config(
        &cfg.storage,
        Duration::from_secs(cfg.transcription.timeout_secs),
    )?);
    let media_base = Url::parse(&cfg.cache.media_base_url)
        .with_context(|| format!("Invalid media base URL {}", cfg.cache.media_base_url))?;

    let state = AppState::new(
        build_cache(&cfg)?,
        transcriber,
        store,
        SessionConfig::from_config(&cfg),
        media_base,
    );
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn record(
    cfg: Config,
    input: PathBuf,
    session_id: Option<String>,
    title: Option<&str>,
    course_id: Option<&str>,
    save: bool,
    realtime: bool,
) -> Result<()> {
    let mut session_config = SessionConfig::from_config(&cfg);
    if let Some(id) = session_id {
        session_config = session_config.with_session_id(id);
    }

    let backend = AudioBackendFactory::create(
        AudioInput::File {
            path: input,
            realtime,
        },
        backend_config(&session_config),
    );
    let transcriber = Arc::new(HttpTranscriber::from_config(&cfg.transcription, &cfg.storage)?);

    let session = RecordingSession::new(session_config, transcriber);
    session.start(backend).await?;

    tokio::select! {
        _ = session.input_finished() => info!("Input finished"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted; stopping"),
    }

    let recording = session.stop().await?;
    if !recording.failed_chunks().is_empty() {
        warn!(
            "Transcript has gaps for chunks {:?}",
            recording.failed_chunks()
        );
    }

    println!("{}", recording.transcript());
    info!(
        "Recording written to {}",
        recording.artifact().path.display()
    );

    if save {
        let store = HttpRecordingStore::from_config(
            &cfg.storage,
            Duration::from_secs(cfg.transcription.timeout_secs),
        )?;
        let saved = recording.save(&store, title, course_id).await?;
        info!("Saved as {:?}", saved.id);
    }

    Ok(())
}

async fn resolve(
    cfg: Config,
    lecture_id: &str,
    location: &str,
    folder: Option<PathBuf>,
) -> Result<()> {
    let cache = build_cache(&cfg)?;
    let url = network_url(&cfg, location)?;

    if let Some(folder) = folder {
        let picker = PresetFolderPicker(Some(folder));
        if cache
            .request_local_folder_access(UserGesture::from_user_action(), &picker)
            .await
            .is_none()
        {
            warn!("Local folder not available; continuing without it");
        }
    }

    let resolved = cache.resolve(lecture_id, &url).await;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    if let Some(bytes) = cache.blob(&resolved.url) {
        info!("{} bytes available locally", bytes.len());
    }
    Ok(())
}

async fn save_offline(cfg: Config, lecture_id: &str, location: &str) -> Result<()> {
    let cache = build_cache(&cfg)?;
    let url = network_url(&cfg, location)?;

    if !cache.save_for_offline(lecture_id, &url).await {
        anyhow::bail!("Could not save lecture {} for offline use", lecture_id);
    }
    println!("Saved lecture {} for offline use", lecture_id);
    Ok(())
}
