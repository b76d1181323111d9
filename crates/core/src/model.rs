use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const UNKNOWN_TITLE: &str = "Unknown track";

/// Opaque identifier of the user who asked for a track. Display only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester(pub String);

/// Voice channel the transport should be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

/// Where now-playing updates are posted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotifyTarget(pub String);

macro_rules! display_newtype {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_newtype!(Requester, ChannelRef, NotifyTarget);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("track id is empty")]
    EmptyId,
    #[error("track id {0:?} is not filesystem-safe")]
    UnsafeId(String),
    #[error("track {0:?} has no local asset path")]
    MissingPath(String),
}

/// A resolved, playable unit. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    id: String,
    title: String,
    duration_secs: u64,
    source_url: String,
    local_path: PathBuf,
    requester: Requester,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        duration_secs: u64,
        source_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
        requester: Requester,
    ) -> Result<Self, TrackError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TrackError::EmptyId);
        }
        if !is_filesystem_safe(&id) {
            return Err(TrackError::UnsafeId(id));
        }

        let local_path = local_path.into();
        if local_path.as_os_str().is_empty() {
            return Err(TrackError::MissingPath(id));
        }

        let mut title = title.into();
        if title.trim().is_empty() {
            title = UNKNOWN_TITLE.to_string();
        }

        Ok(Self {
            id,
            title,
            duration_secs,
            source_url: source_url.into(),
            local_path,
            requester,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// `0` means the duration is unknown.
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn duration_label(&self) -> String {
        if self.duration_secs == 0 {
            return "unknown".to_string();
        }
        let (minutes, seconds) = (self.duration_secs / 60, self.duration_secs % 60);
        format!("{minutes}:{seconds:02}")
    }
}

/// Ids become file names in the asset cache, so only a conservative
/// character set is accepted.
pub fn is_filesystem_safe(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
