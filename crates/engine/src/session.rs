//! The playback state machine.
//!
//! A `Session` is owned by a single task and every mutation goes through
//! `&mut self`, so commands never interleave. Transports report finished
//! streams from their own threads; those reports, and the idle-teardown
//! timer, are posted as [`SessionEvent`]s onto a channel that the owning
//! task drains and feeds back through [`Session::handle_event`].

use crate::error::SessionError;
use crate::history::History;
use crate::notify::{NowPlayingCard, NowPlayingNotifier};
use jukebox_core::{AppConfig, ChannelRef, NotifyTarget, Track};
use jukebox_providers::{AssetResolver, ConnectError, TransportError, VoiceTransport};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_disconnect: Duration,
    pub history_limit: usize,
}

impl SessionConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            idle_disconnect: Duration::from_millis(cfg.playback.idle_disconnect_ms),
            history_limit: cfg.playback.history_limit,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A stream handed to the transport has ended. `ticket` identifies the
    /// `play` call it belongs to.
    TrackFinished {
        ticket: u64,
        error: Option<TransportError>,
    },
    IdleTimeout {
        generation: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// 1-based position in the queue.
    Queued { position: usize, track: Track },
    StartedPlaying(Track),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    NowPlaying(Track),
    Drained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Advanced(AdvanceOutcome),
    /// The idle timer fired and the voice connection was closed.
    Disconnected,
    Ignored,
}

/// Read-only view for display commands.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub history_len: usize,
    pub loop_enabled: bool,
    pub connection: ConnectionState,
    pub last_error: Option<String>,
}

pub struct Session {
    cfg: SessionConfig,
    transport: Box<dyn VoiceTransport>,
    resolver: Arc<dyn AssetResolver>,
    notifier: Box<dyn NowPlayingNotifier>,
    events: mpsc::UnboundedSender<SessionEvent>,

    queue: VecDeque<Track>,
    current: Option<Track>,
    history: History,
    loop_enabled: bool,
    last_notify_target: Option<NotifyTarget>,
    last_channel: Option<ChannelRef>,
    connection: ConnectionState,

    // Ticket of the stream the transport currently owns. Set between a
    // successful `play` and the matching finish signal (or a teardown).
    in_flight: Option<u64>,
    next_ticket: u64,
    teardown_generation: u64,
    stops: u64,
    card_live: bool,
    last_error: Option<String>,
}

impl Session {
    pub fn new(
        cfg: SessionConfig,
        transport: Box<dyn VoiceTransport>,
        resolver: Arc<dyn AssetResolver>,
        notifier: Box<dyn NowPlayingNotifier>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let history = History::new(cfg.history_limit);
        let session = Self {
            cfg,
            transport,
            resolver,
            notifier,
            events,
            queue: VecDeque::new(),
            current: None,
            history,
            loop_enabled: false,
            last_notify_target: None,
            last_channel: None,
            connection: ConnectionState::Disconnected,
            in_flight: None,
            next_ticket: 0,
            teardown_generation: 0,
            stops: 0,
            card_live: false,
            last_error: None,
        };
        (session, rx)
    }

    pub fn update_config(&mut self, cfg: SessionConfig) {
        self.history.set_limit(cfg.history_limit);
        self.cfg = cfg;
    }

    /// Admits a resolved track. Plays it right away when nothing occupies
    /// the transport, otherwise appends it to the queue.
    pub async fn enqueue(
        &mut self,
        track: Track,
        channel: &ChannelRef,
        target: NotifyTarget,
    ) -> Result<EnqueueResult, SessionError> {
        let previous_target = self.last_notify_target.replace(target);

        if self.is_occupied() {
            self.queue.push_back(track.clone());
            let position = self.queue.len();
            info!(title = %track.title(), position, "queued");
            return Ok(EnqueueResult::Queued { position, track });
        }

        if let Err(err) = self.ensure_connected(channel).await {
            self.last_notify_target = previous_target;
            return Err(err.into());
        }

        let title = track.title().to_string();
        self.queue.push_front(track);
        match self.advance().await {
            AdvanceOutcome::NowPlaying(track) => Ok(EnqueueResult::StartedPlaying(track)),
            AdvanceOutcome::Drained => Err(SessionError::Unplayable(title)),
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> SessionUpdate {
        match event {
            SessionEvent::TrackFinished { ticket, error } => {
                self.on_track_finished(ticket, error).await
            }
            SessionEvent::IdleTimeout { generation } => self.on_idle_timeout(generation).await,
        }
    }

    pub fn skip(&mut self) -> Result<Track, SessionError> {
        if !self.is_occupied() {
            return Err(SessionError::NothingPlaying);
        }
        let skipped = self.current.clone().ok_or(SessionError::NothingPlaying)?;
        info!(title = %skipped.title(), "skipping");
        self.transport.stop();
        Ok(skipped)
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        if self.connection != ConnectionState::Playing {
            return Err(SessionError::InvalidState("nothing is playing"));
        }
        self.transport.pause()?;
        self.connection = ConnectionState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.connection != ConnectionState::Paused {
            return Err(SessionError::InvalidState("playback is not paused"));
        }
        self.transport.resume()?;
        self.connection = ConnectionState::Playing;
        Ok(())
    }

    /// Puts the most recently finished track back in front of the queue.
    ///
    /// A playing track is pushed back behind it (not into history) and
    /// stopped; its finish signal then advances into the restored track.
    pub async fn previous(&mut self) -> Result<Track, SessionError> {
        if self.history.is_empty() {
            return Err(SessionError::NoHistory);
        }

        let occupied = self.is_occupied();
        if !occupied {
            let channel = self
                .last_channel
                .clone()
                .or_else(|| self.transport.current_channel())
                .ok_or(SessionError::NotConnected)?;
            self.ensure_connected(&channel).await?;
        }

        let restored = self.history.pop().ok_or(SessionError::NoHistory)?;
        info!(title = %restored.title(), "going back");

        if occupied {
            if let Some(current) = self.current.take() {
                self.queue.push_front(current);
            }
            self.queue.push_front(restored.clone());
            self.transport.stop();
            return Ok(restored);
        }

        let title = restored.title().to_string();
        self.queue.push_front(restored);
        match self.advance().await {
            AdvanceOutcome::NowPlaying(track) => Ok(track),
            AdvanceOutcome::Drained => Err(SessionError::Unplayable(title)),
        }
    }

    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.teardown("stop").await
    }

    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.teardown("disconnect").await
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        info!(enabled, "loop mode changed");
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Empties the queue without touching the current track. Returns how
    /// many tracks were removed.
    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        removed
    }

    /// Bumped by every `stop` and `disconnect`. Work begun before a stop
    /// compares against it to discard its result.
    pub fn stop_count(&self) -> u64 {
        self.stops
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current: self.current.clone(),
            queue: self.queue.iter().cloned().collect(),
            history_len: self.history.len(),
            loop_enabled: self.loop_enabled,
            connection: self.connection,
            last_error: self.last_error.clone(),
        }
    }

    fn is_occupied(&self) -> bool {
        self.in_flight.is_some()
    }

    async fn ensure_connected(&mut self, channel: &ChannelRef) -> Result<(), ConnectError> {
        if !self.transport.is_connected() {
            self.transport.connect(channel).await?;
            info!(%channel, transport = self.transport.name(), "joined voice channel");
        } else if self.transport.current_channel().as_ref() != Some(channel) {
            self.transport.move_to(channel).await?;
            info!(%channel, "moved to voice channel");
        }

        self.last_channel = Some(channel.clone());
        if self.connection == ConnectionState::Disconnected {
            self.connection = ConnectionState::Connected;
        }
        Ok(())
    }

    /// Pops the queue until something starts playing or the queue is empty.
    /// Tracks whose asset can neither be found nor fetched again are dropped.
    async fn advance(&mut self) -> AdvanceOutcome {
        debug_assert!(self.in_flight.is_none(), "advance with a stream in flight");

        while let Some(next) = self.queue.pop_front() {
            self.current = Some(next.clone());

            let Some(track) = self.ensure_asset(next).await else {
                self.current = None;
                continue;
            };
            self.current = Some(track.clone());

            if let Err(err) = self.start(&track) {
                warn!(title = %track.title(), error = %err, "transport refused track; dropping it");
                self.last_error = Some(format!("{}: {err}", track.title()));
                self.current = None;
                continue;
            }

            self.publish_card(&track).await;
            return AdvanceOutcome::NowPlaying(track);
        }

        self.current = None;
        if matches!(
            self.connection,
            ConnectionState::Playing | ConnectionState::Paused
        ) {
            self.connection = ConnectionState::Connected;
        }
        self.retract_card().await;
        self.schedule_teardown();
        debug!("queue drained");
        AdvanceOutcome::Drained
    }

    async fn ensure_asset(&mut self, track: Track) -> Option<Track> {
        if tokio::fs::try_exists(track.local_path())
            .await
            .unwrap_or(false)
        {
            return Some(track);
        }

        warn!(
            id = %track.id(),
            path = %track.local_path().display(),
            "cached asset missing; fetching it again"
        );
        match self
            .resolver
            .resolve(track.source_url(), track.requester())
            .await
        {
            Ok(fresh) => Some(fresh),
            Err(err) => {
                warn!(title = %track.title(), error = %err, "re-fetch failed; dropping track");
                self.last_error = Some(format!("could not fetch {}: {err}", track.title()));
                None
            }
        }
    }

    fn start(&mut self, track: &Track) -> Result<(), TransportError> {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let events = self.events.clone();

        self.transport.play(
            track.local_path(),
            Box::new(move |error| {
                let _ = events.send(SessionEvent::TrackFinished { ticket, error });
            }),
        )?;

        self.in_flight = Some(ticket);
        self.connection = ConnectionState::Playing;
        info!(
            title = %track.title(),
            duration = %track.duration_label(),
            requester = %track.requester(),
            ticket,
            "now playing"
        );
        Ok(())
    }

    async fn on_track_finished(
        &mut self,
        ticket: u64,
        error: Option<TransportError>,
    ) -> SessionUpdate {
        if self.in_flight != Some(ticket) {
            debug!(ticket, "ignoring finish signal of a torn-down stream");
            return SessionUpdate::Ignored;
        }
        self.in_flight = None;

        if let Some(err) = error {
            warn!(error = %err, "playback ended with an error");
            self.last_error = Some(err.to_string());
        }

        if let Some(track) = self.current.take() {
            if self.loop_enabled {
                self.queue.push_front(track);
            } else {
                remove_cached_asset(track.local_path()).await;
                self.history.push(track);
            }
        }

        SessionUpdate::Advanced(self.advance().await)
    }

    fn schedule_teardown(&mut self) {
        self.teardown_generation += 1;
        let generation = self.teardown_generation;
        let delay = self.cfg.idle_disconnect;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(SessionEvent::IdleTimeout { generation });
        });
    }

    async fn on_idle_timeout(&mut self, generation: u64) -> SessionUpdate {
        if generation != self.teardown_generation
            || self.is_occupied()
            || self.transport.is_playing()
            || self.connection == ConnectionState::Disconnected
        {
            return SessionUpdate::Ignored;
        }

        self.transport.disconnect().await;
        self.connection = ConnectionState::Disconnected;
        info!("idle; left voice channel");
        SessionUpdate::Disconnected
    }

    async fn teardown(&mut self, reason: &'static str) -> Result<(), SessionError> {
        if self.connection == ConnectionState::Disconnected && !self.transport.is_connected() {
            return Err(SessionError::NotConnected);
        }

        self.queue.clear();
        self.loop_enabled = false;
        // The stopped stream still reports back; a cleared ticket makes
        // that report stale.
        self.in_flight = None;
        self.transport.stop();
        self.transport.disconnect().await;
        self.current = None;
        self.connection = ConnectionState::Disconnected;
        self.teardown_generation += 1;
        self.stops += 1;
        self.retract_card().await;
        info!(reason, "left voice channel");
        Ok(())
    }

    async fn publish_card(&mut self, track: &Track) {
        let Some(target) = self.last_notify_target.clone() else {
            return;
        };
        let card = NowPlayingCard::new(track, self.queue.len(), self.loop_enabled);
        match self.notifier.publish(&target, &card).await {
            Ok(()) => self.card_live = true,
            Err(err) => warn!(error = %err, "failed to publish now-playing"),
        }
    }

    async fn retract_card(&mut self) {
        if !self.card_live {
            return;
        }
        self.card_live = false;
        if let Err(err) = self.notifier.retract().await {
            warn!(error = %err, "failed to retract now-playing");
        }
    }
}

async fn remove_cached_asset(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed cached asset"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove cached asset"),
    }
}
