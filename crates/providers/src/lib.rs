use async_trait::async_trait;
use jukebox_core::{ChannelRef, Requester, Track, TrackError, TransportConfig, TransportKind};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod simulated;
pub mod ytdlp;

#[cfg(feature = "local-audio")]
pub mod local;

pub use simulated::SimulatedTransport;
pub use ytdlp::YtDlpResolver;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("nothing found for {0:?}")]
    NotFound(String),
    #[error("failed to run {tool}: {source}")]
    Tool {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error("download finished but {} is missing", .0.display())]
    MissingAsset(PathBuf),
    #[error("asset cache: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cannot join channel {channel}: {reason}")]
    Unreachable { channel: ChannelRef, reason: String },
    #[error("audio output unavailable: {0}")]
    Device(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("nothing is playing")]
    Idle,
    #[error("asset {} does not exist", .0.display())]
    MissingAsset(PathBuf),
    #[error("cannot decode audio: {0}")]
    Decode(String),
    #[error("audio output failed: {0}")]
    Device(String),
}

/// Invoked exactly once for every `play` that returned `Ok`, whether the
/// track ran out, was stopped, or failed mid-stream. May run on any thread.
pub type FinishCallback = Box<dyn FnOnce(Option<TransportError>) + Send + 'static>;

/// Turns a free-form query or URL into a track whose asset is cached locally.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(&self, query: &str, requester: &Requester) -> Result<Track, ResolutionError>;
}

/// The audio sink plus the voice connection it streams into.
#[async_trait]
pub trait VoiceTransport: Send {
    fn name(&self) -> &'static str;

    async fn connect(&mut self, channel: &ChannelRef) -> Result<(), ConnectError>;

    /// Moves an existing connection instead of opening a second one.
    async fn move_to(&mut self, channel: &ChannelRef) -> Result<(), ConnectError>;

    async fn disconnect(&mut self);

    fn play(&mut self, path: &Path, on_finished: FinishCallback) -> Result<(), TransportError>;
    fn pause(&mut self) -> Result<(), TransportError>;
    fn resume(&mut self) -> Result<(), TransportError>;

    /// Ends the current stream; its finish callback still fires.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;
    fn is_connected(&self) -> bool;
    fn current_channel(&self) -> Option<ChannelRef>;
}

pub fn build_transport(cfg: &TransportConfig) -> Box<dyn VoiceTransport> {
    match cfg.kind {
        TransportKind::Simulated => Box::new(SimulatedTransport::new(Duration::from_secs(
            cfg.simulated_track_secs.max(1),
        ))),
        TransportKind::Local => platform::local_transport()
            .unwrap_or_else(|| {
                tracing::warn!(
                    "built without the local-audio feature; falling back to the simulated transport"
                );
                Box::new(SimulatedTransport::new(Duration::from_secs(
                    cfg.simulated_track_secs.max(1),
                )))
            }),
    }
}

mod platform {
    use super::VoiceTransport;

    #[cfg(feature = "local-audio")]
    pub fn local_transport() -> Option<Box<dyn VoiceTransport>> {
        Some(Box::new(crate::local::LocalTransport::new()))
    }

    #[cfg(not(feature = "local-audio"))]
    pub fn local_transport() -> Option<Box<dyn VoiceTransport>> {
        None
    }
}
