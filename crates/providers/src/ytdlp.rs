use crate::{AssetResolver, ResolutionError};
use async_trait::async_trait;
use jukebox_core::model::is_filesystem_safe;
use jukebox_core::{urls, Requester, ResolverConfig, Track, TrackError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ExtractorInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    entries: Option<Vec<ExtractorInfo>>,
}

#[derive(Debug, Clone, PartialEq)]
struct Media {
    id: String,
    title: String,
    duration_secs: u64,
    webpage_url: String,
}

/// Resolves queries with the `yt-dlp` executable and keeps one extracted
/// audio file per media id in `cache_dir`.
pub struct YtDlpResolver {
    cfg: ResolverConfig,
    cache_dir: PathBuf,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl YtDlpResolver {
    pub fn new(cfg: ResolverConfig, cache_dir: PathBuf) -> Self {
        Self {
            cfg,
            cache_dir,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn asset_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{id}.{}", self.cfg.audio_format))
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ResolutionError> {
        let output = Command::new(&self.cfg.ytdlp_path)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ResolutionError::Tool {
                tool: self.cfg.ytdlp_path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ResolutionError::ToolFailed {
                tool: self.cfg.ytdlp_path.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn lookup(&self, query: &str) -> Result<Media, ResolutionError> {
        let search = urls::normalize_query(query, &self.cfg.search_prefix);
        debug!(%search, "extracting metadata");
        let output = self
            .run(vec![
                "--dump-single-json".to_string(),
                "--no-playlist".to_string(),
                "--quiet".to_string(),
                "--no-warnings".to_string(),
                search,
            ])
            .await?;
        parse_media(&output.stdout, query)
    }

    async fn download(&self, media: &Media) -> Result<(), ResolutionError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let template = self.cache_dir.join("%(id)s.%(ext)s");
        let mut args = vec![
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            self.cfg.audio_format.clone(),
            "--audio-quality".to_string(),
            self.cfg.audio_quality.clone(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        if let Some(ffmpeg) = &self.cfg.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args.push(media.webpage_url.clone());

        info!(id = %media.id, title = %media.title, "downloading asset");
        self.run(args).await?;
        Ok(())
    }

    async fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_id(&self, id: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.in_flight.lock().await;
        // One reference in the map, one held here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            map.remove(id);
        }
    }
}

#[async_trait]
impl AssetResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, query: &str, requester: &Requester) -> Result<Track, ResolutionError> {
        let media = self.lookup(query).await?;
        let local_path = self.asset_path(&media.id);

        let lock = self.id_lock(&media.id).await;
        let fetched = {
            let _guard = lock.lock().await;
            fetch_if_absent(self, &media, &local_path).await
        };
        self.release_id(&media.id, lock).await;
        fetched?;

        let track = Track::new(
            media.id,
            media.title,
            media.duration_secs,
            media.webpage_url,
            local_path,
            requester.clone(),
        )?;
        Ok(track)
    }
}

async fn fetch_if_absent(
    resolver: &YtDlpResolver,
    media: &Media,
    local_path: &Path,
) -> Result<(), ResolutionError> {
    if tokio::fs::try_exists(local_path).await.unwrap_or(false) {
        debug!(id = %media.id, "asset cache hit");
        return Ok(());
    }
    resolver.download(media).await?;
    if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
        return Err(ResolutionError::MissingAsset(local_path.to_path_buf()));
    }
    Ok(())
}

fn parse_media(raw: &[u8], query: &str) -> Result<Media, ResolutionError> {
    let mut info: ExtractorInfo = serde_json::from_slice(raw)
        .map_err(|err| ResolutionError::InvalidMetadata(err.to_string()))?;

    let info = match info.entries.take() {
        Some(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NotFound(query.to_string()))?,
        None => info,
    };

    let id = info
        .id
        .ok_or_else(|| ResolutionError::InvalidMetadata("missing id".to_string()))?;
    if !is_filesystem_safe(&id) {
        return Err(TrackError::UnsafeId(id).into());
    }
    let webpage_url = info
        .webpage_url
        .ok_or_else(|| ResolutionError::InvalidMetadata(format!("{id} has no webpage_url")))?;

    Ok(Media {
        title: info.title.unwrap_or_default(),
        duration_secs: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u64)
            .unwrap_or(0),
        id,
        webpage_url,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_media, Media, YtDlpResolver};
    use crate::ResolutionError;
    use jukebox_core::{ResolverConfig, TrackError};
    use std::path::PathBuf;

    #[test]
    fn takes_first_search_entry() {
        let raw = br#"{
            "id": "search",
            "entries": [
                {"id": "abc_123", "title": "First", "duration": 212.6, "webpage_url": "https://www.youtube.com/watch?v=abc_123"},
                {"id": "zzz", "title": "Second", "duration": 10, "webpage_url": "https://www.youtube.com/watch?v=zzz"}
            ]
        }"#;

        let media = parse_media(raw, "first").unwrap();
        assert_eq!(
            media,
            Media {
                id: "abc_123".to_string(),
                title: "First".to_string(),
                duration_secs: 213,
                webpage_url: "https://www.youtube.com/watch?v=abc_123".to_string(),
            }
        );
    }

    #[test]
    fn empty_search_is_not_found() {
        let err = parse_media(br#"{"id": "search", "entries": []}"#, "nothing").unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound(q) if q == "nothing"));
    }

    #[test]
    fn single_video_without_duration_is_unknown_length() {
        let raw = br#"{"id": "live-1", "title": "Stream", "webpage_url": "https://example.com/live-1"}"#;
        let media = parse_media(raw, "https://example.com/live-1").unwrap();
        assert_eq!(media.duration_secs, 0);
    }

    #[test]
    fn rejects_ids_that_would_escape_the_cache() {
        let raw = br#"{"id": "../../x", "webpage_url": "https://example.com"}"#;
        let err = parse_media(raw, "q").unwrap_err();
        assert!(matches!(err, ResolutionError::Track(TrackError::UnsafeId(_))));
    }

    #[test]
    fn asset_path_uses_id_and_format() {
        let resolver = YtDlpResolver::new(ResolverConfig::default(), PathBuf::from("/cache"));
        assert_eq!(resolver.asset_path("abc"), PathBuf::from("/cache/abc.mp3"));
    }
}
