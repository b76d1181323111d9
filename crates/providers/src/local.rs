//! Plays cached assets on the default output device through `rodio`.
//!
//! The output stream is not `Send`, so it lives on a dedicated audio thread
//! that is driven by commands. Completion is detected by polling the sink,
//! and finish callbacks are invoked from that thread.

use crate::{ConnectError, FinishCallback, TransportError, VoiceTransport};
use async_trait::async_trait;
use jukebox_core::ChannelRef;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

enum AudioCmd {
    Play {
        path: PathBuf,
        on_finished: FinishCallback,
    },
    Pause,
    Resume,
    Stop,
    Shutdown,
}

#[derive(Debug, Default)]
struct Status {
    active: bool,
    paused: bool,
}

type StatusHandle = Arc<Mutex<Status>>;

fn lock(status: &StatusHandle) -> MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct LocalTransport {
    channel: Option<ChannelRef>,
    tx: Option<Sender<AudioCmd>>,
    status: StatusHandle,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, cmd: AudioCmd) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(cmd)
            .map_err(|_| TransportError::Device("audio thread has exited".to_string()))
    }
}

#[async_trait]
impl VoiceTransport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn connect(&mut self, channel: &ChannelRef) -> Result<(), ConnectError> {
        if self.tx.is_none() {
            let (ready_tx, ready_rx) = oneshot::channel();
            let (tx, rx) = mpsc::channel::<AudioCmd>();
            let status = self.status.clone();
            thread::spawn(move || audio_thread(rx, status, ready_tx));

            match ready_rx.await {
                Ok(Ok(())) => self.tx = Some(tx),
                Ok(Err(reason)) => return Err(ConnectError::Device(reason)),
                Err(_) => {
                    return Err(ConnectError::Device(
                        "audio thread exited during startup".to_string(),
                    ))
                }
            }
        }
        self.channel = Some(channel.clone());
        debug!(%channel, "local audio output ready");
        Ok(())
    }

    async fn move_to(&mut self, channel: &ChannelRef) -> Result<(), ConnectError> {
        self.connect(channel).await
    }

    async fn disconnect(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(AudioCmd::Shutdown);
        }
        self.channel = None;
    }

    fn play(&mut self, path: &Path, on_finished: FinishCallback) -> Result<(), TransportError> {
        if self.channel.is_none() {
            return Err(TransportError::NotConnected);
        }
        if !path.exists() {
            return Err(TransportError::MissingAsset(path.to_path_buf()));
        }
        {
            let mut status = lock(&self.status);
            status.active = true;
            status.paused = false;
        }
        self.send(AudioCmd::Play {
            path: path.to_path_buf(),
            on_finished,
        })
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        if !self.is_playing() {
            return Err(TransportError::Idle);
        }
        self.send(AudioCmd::Pause)?;
        lock(&self.status).paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TransportError> {
        if !self.is_paused() {
            return Err(TransportError::Idle);
        }
        self.send(AudioCmd::Resume)?;
        lock(&self.status).paused = false;
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.send(AudioCmd::Stop);
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
        self.channel.is_some()
    }

    fn current_channel(&self) -> Option<ChannelRef> {
        self.channel.clone()
    }
}

fn audio_thread(
    rx: Receiver<AudioCmd>,
    status: StatusHandle,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut stream = match OutputStreamBuilder::open_default_stream() {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    stream.log_on_drop(false);
    let _ = ready.send(Ok(()));

    let mut current: Option<(Sink, FinishCallback)> = None;

    let finish = |current: &mut Option<(Sink, FinishCallback)>, err: Option<TransportError>| {
        if let Some((sink, on_finished)) = current.take() {
            sink.stop();
            {
                let mut s = lock(&status);
                s.active = false;
                s.paused = false;
            }
            on_finished(err);
        }
    };

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(AudioCmd::Play { path, on_finished }) => {
                finish(&mut current, None);
                match open_source(&path) {
                    Ok(source) => {
                        let sink = Sink::connect_new(stream.mixer());
                        sink.append(source);
                        sink.play();
                        {
                            let mut s = lock(&status);
                            s.active = true;
                            s.paused = false;
                        }
                        current = Some((sink, on_finished));
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "cannot start playback");
                        {
                            let mut s = lock(&status);
                            s.active = false;
                            s.paused = false;
                        }
                        on_finished(Some(err));
                    }
                }
            }
            Ok(AudioCmd::Pause) => {
                if let Some((sink, _)) = current.as_ref() {
                    sink.pause();
                }
            }
            Ok(AudioCmd::Resume) => {
                if let Some((sink, _)) = current.as_ref() {
                    sink.play();
                }
            }
            Ok(AudioCmd::Stop) => finish(&mut current, None),
            Ok(AudioCmd::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                finish(&mut current, None);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let drained = current.as_ref().map(|(sink, _)| sink.empty()).unwrap_or(false);
                if drained {
                    finish(&mut current, None);
                }
            }
        }
    }
}

fn open_source(path: &Path) -> Result<Decoder<BufReader<File>>, TransportError> {
    let file = File::open(path).map_err(|_| TransportError::MissingAsset(path.to_path_buf()))?;
    Decoder::new(BufReader::new(file)).map_err(|err| TransportError::Decode(err.to_string()))
}
