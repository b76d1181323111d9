use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub idle_disconnect_ms: u64,
    /// `0` keeps every finished track.
    pub history_limit: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            idle_disconnect_ms: 5_000,
            history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub ytdlp_path: String,
    pub ffmpeg_location: Option<PathBuf>,
    pub audio_format: String,
    pub audio_quality: String,
    pub search_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_location: None,
            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),
            search_prefix: "ytsearch:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Simulated,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub simulated_track_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Simulated,
            simulated_track_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub discord_presence: bool,
    pub discord_app_id: String,
    pub large_image: Option<String>,
    pub large_text: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            discord_presence: false,
            discord_app_id: "YOUR_DISCORD_APP_ID".to_string(),
            large_image: Some("app_icon".to_string()),
            large_text: Some("jukebox".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub log_level: String,
    pub cache_dir: PathBuf,
    pub default_channel: String,
    pub playback: PlaybackConfig,
    pub resolver: ResolverConfig,
    pub transport: TransportConfig,
    pub notifier: NotifierConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            cache_dir: PathBuf::from("downloads"),
            default_channel: "general".to_string(),
            playback: PlaybackConfig::default(),
            resolver: ResolverConfig::default(),
            transport: TransportConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, TransportKind};

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let cfg: AppConfig = toml::from_str(
            r#"
            cache_dir = "/var/cache/jukebox"

            [playback]
            idle_disconnect_ms = 1500

            [transport]
            kind = "local"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.schema_version, 1);
        assert_eq!(cfg.playback.idle_disconnect_ms, 1_500);
        assert_eq!(cfg.playback.history_limit, 50);
        assert_eq!(cfg.transport.kind, TransportKind::Local);
        assert_eq!(cfg.resolver.search_prefix, "ytsearch:");
        assert!(!cfg.notifier.discord_presence);
    }
}
