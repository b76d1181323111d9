pub mod config;
pub mod model;
pub mod urls;

pub use config::{
    AppConfig, NotifierConfig, PlaybackConfig, ResolverConfig, TransportConfig, TransportKind,
};
pub use model::{ChannelRef, NotifyTarget, Requester, Track, TrackError};
