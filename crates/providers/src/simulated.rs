//! A transport that pretends to stream audio.
//!
//! Each `play` gets its own worker thread that sleeps through the configured
//! track length, so finish callbacks arrive from outside the async runtime
//! exactly like a real decoder thread would deliver them.

use crate::{ConnectError, FinishCallback, TransportError, VoiceTransport};
use async_trait::async_trait;
use jukebox_core::ChannelRef;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Default)]
struct Status {
    channel: Option<ChannelRef>,
    generation: u64,
    active: bool,
    paused: bool,
}

type StatusHandle = Arc<Mutex<Status>>;

fn lock(status: &StatusHandle) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SimulatedTransport {
    track_length: Duration,
    status: StatusHandle,
    control: Option<Sender<Control>>,
}

impl SimulatedTransport {
    pub fn new(track_length: Duration) -> Self {
        Self {
            track_length,
            status: Arc::new(Mutex::new(Status::default())),
            control: None,
        }
    }

    fn send(&self, cmd: Control) -> bool {
        self.control
            .as_ref()
            .map(|tx| tx.send(cmd).is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl VoiceTransport for SimulatedTransport {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn connect(&mut self, channel: &ChannelRef) -> Result<(), ConnectError> {
        if channel.0.trim().is_empty() {
            return Err(ConnectError::Unreachable {
                channel: channel.clone(),
                reason: "empty channel name".to_string(),
            });
        }
        lock(&self.status).channel = Some(channel.clone());
        debug!(%channel, "simulated transport connected");
        Ok(())
    }

    async fn move_to(&mut self, channel: &ChannelRef) -> Result<(), ConnectError> {
        self.connect(channel).await
    }

    async fn disconnect(&mut self) {
        self.stop();
        lock(&self.status).channel = None;
    }

    fn play(&mut self, path: &Path, on_finished: FinishCallback) -> Result<(), TransportError> {
        if lock(&self.status).channel.is_none() {
            return Err(TransportError::NotConnected);
        }
        if !path.exists() {
            return Err(TransportError::MissingAsset(path.to_path_buf()));
        }

        let (tx, rx) = mpsc::channel::<Control>();
        let generation = {
            let mut status = lock(&self.status);
            status.generation += 1;
            status.active = true;
            status.paused = false;
            status.generation
        };
        self.control = Some(tx);

        let status = self.status.clone();
        let mut remaining = self.track_length;
        thread::spawn(move || {
            let mut started = Instant::now();
            let mut paused = false;
            loop {
                let msg = if paused {
                    rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
                } else {
                    rx.recv_timeout(remaining.saturating_sub(started.elapsed()))
                };
                match msg {
                    Ok(Control::Pause) if !paused => {
                        remaining = remaining.saturating_sub(started.elapsed());
                        paused = true;
                    }
                    Ok(Control::Resume) if paused => {
                        started = Instant::now();
                        paused = false;
                    }
                    Ok(Control::Stop) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            {
                let mut s = lock(&status);
                if s.generation == generation {
                    s.active = false;
                    s.paused = false;
                }
            }
            on_finished(None);
        });

        Ok(())
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        if !self.is_playing() || !self.send(Control::Pause) {
            return Err(TransportError::Idle);
        }
        lock(&self.status).paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TransportError> {
        if !self.is_paused() || !self.send(Control::Resume) {
            return Err(TransportError::Idle);
        }
        lock(&self.status).paused = false;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(tx) = self.control.take() {
            let _ = tx.send(Control::Stop);
        }
        let mut status = lock(&self.status);
        status.active = false;
        status.paused = false;
    }

    fn is_playing(&self) -> bool {
        let status = lock(&self.status);
        status.active && !status.paused
    }

    fn is_paused(&self) -> bool {
        let status = lock(&self.status);
        status.active && status.paused
    }

    fn is_connected(&self) -> bool {
        lock(&self.status).channel.is_some()
    }

    fn current_channel(&self) -> Option<ChannelRef> {
        lock(&self.status).channel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::SimulatedTransport;
    use crate::{TransportError, VoiceTransport};
    use jukebox_core::ChannelRef;
    use std::sync::mpsc;
    use std::time::Duration;

    fn asset() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().unwrap()
    }

    #[tokio::test]
    async fn finishes_on_a_foreign_thread() {
        let file = asset();
        let mut transport = SimulatedTransport::new(Duration::from_millis(20));
        transport
            .connect(&ChannelRef("lobby".to_string()))
            .await
            .unwrap();

        let caller = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        transport
            .play(
                file.path(),
                Box::new(move |err| {
                    let _ = tx.send((std::thread::current().id(), err));
                }),
            )
            .unwrap();
        assert!(transport.is_playing());

        let (thread, err) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(thread, caller);
        assert!(err.is_none());
        assert!(!transport.is_playing());
    }

    #[tokio::test]
    async fn stop_still_fires_the_callback() {
        let file = asset();
        let mut transport = SimulatedTransport::new(Duration::from_secs(60));
        transport
            .connect(&ChannelRef("lobby".to_string()))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel();
        transport
            .play(
                file.path(),
                Box::new(move |err| {
                    let _ = tx.send(err);
                }),
            )
            .unwrap();
        transport.pause().unwrap();
        assert!(transport.is_paused());

        transport.stop();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(!transport.is_paused());
    }

    #[tokio::test]
    async fn refuses_to_play_without_connection_or_asset() {
        let mut transport = SimulatedTransport::new(Duration::from_secs(1));
        let err = transport
            .play(std::path::Path::new("/nope.mp3"), Box::new(|_| {}))
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);

        transport
            .connect(&ChannelRef("lobby".to_string()))
            .await
            .unwrap();
        let err = transport
            .play(std::path::Path::new("/definitely/not/here.mp3"), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingAsset(_)));
    }
}
