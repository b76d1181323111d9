use jukebox_providers::{ConnectError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("no previously played track")]
    NoHistory,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("not connected to a voice channel")]
    NotConnected,
    #[error("{0:?} could not be played")]
    Unplayable(String),
}
