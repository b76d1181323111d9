//! Mirrors the now-playing card into Discord Rich Presence.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jukebox_core::{NotifierConfig, NotifyTarget};
use jukebox_engine::{NowPlayingCard, NowPlayingNotifier};
use serde_json::{json, Value};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub mod ipc;

const IPC_SLOTS: std::ops::RangeInclusive<u8> = 0..=9;
const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

const ACTIVITY_LISTENING: u8 = 2;

/// Upper bound on a single handshake or command round trip. The notifier
/// runs on the playback task, so a silent peer must not stall it.
const IPC_TIMEOUT: Duration = Duration::from_secs(2);

pub struct DiscordRpcClient {
    client_id: String,
    stream: Option<ipc::IpcStream>,
    backoff_idx: usize,
    next_retry_at: Instant,
    nonce: u64,
}

impl DiscordRpcClient {
    pub fn new(client_id: String) -> Self {
        Self {
            client_id,
            stream: None,
            backoff_idx: 0,
            next_retry_at: Instant::now(),
            nonce: 0,
        }
    }

    pub async fn set_activity(&mut self, activity: Value) -> Result<()> {
        self.command("SET_ACTIVITY", activity).await
    }

    pub async fn clear_activity(&mut self) -> Result<()> {
        self.command("SET_ACTIVITY", Value::Null).await
    }

    async fn command(&mut self, cmd: &str, activity: Value) -> Result<()> {
        self.ensure_connected().await?;
        self.nonce += 1;
        let payload = json!({
            "cmd": cmd,
            "args": {
                "pid": std::process::id(),
                "activity": activity,
            },
            "nonce": self.nonce.to_string(),
        });

        let outcome = match tokio::time::timeout(IPC_TIMEOUT, self.exchange(&payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow!("discord ipc did not answer {cmd} within {IPC_TIMEOUT:?}")),
        };
        if let Err(err) = outcome {
            self.stream = None;
            self.schedule_backoff();
            return Err(err);
        }
        Ok(())
    }

    async fn exchange(&mut self, payload: &Value) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("discord ipc not connected"))?;
        ipc::write_frame(stream, ipc::OPCODE_FRAME, payload.to_string().as_bytes()).await?;
        let (_, raw) = ipc::read_frame(stream).await?;
        ipc::check_response(&raw)
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if Instant::now() < self.next_retry_at {
            return Err(anyhow!("discord reconnect backoff active"));
        }

        for slot in IPC_SLOTS {
            let mut stream = match ipc::connect(slot).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(slot, error = %err, "discord ipc slot unavailable");
                    continue;
                }
            };
            let handshake = json!({ "v": 1, "client_id": self.client_id }).to_string();
            match tokio::time::timeout(IPC_TIMEOUT, handshake_on(&mut stream, &handshake)).await {
                Ok(Ok(())) => {
                    debug!(slot, "connected to discord ipc");
                    self.stream = Some(stream);
                    self.backoff_idx = 0;
                    return Ok(());
                }
                Ok(Err(err)) => debug!(slot, error = %err, "discord ipc handshake failed"),
                Err(_) => debug!(slot, "discord ipc handshake timed out"),
            }
        }

        self.schedule_backoff();
        Err(anyhow!("unable to connect to local Discord RPC"))
    }

    fn schedule_backoff(&mut self) {
        let idx = self.backoff_idx.min(BACKOFF_STEPS.len() - 1);
        self.next_retry_at = Instant::now() + BACKOFF_STEPS[idx];
        self.backoff_idx = (self.backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
    }
}

async fn handshake_on(stream: &mut ipc::IpcStream, handshake: &str) -> Result<()> {
    ipc::write_frame(stream, ipc::OPCODE_HANDSHAKE, handshake.as_bytes()).await?;
    ipc::read_frame(stream).await?;
    Ok(())
}

pub struct PresenceNotifier {
    client: DiscordRpcClient,
    large_image: Option<String>,
    large_text: Option<String>,
}

impl PresenceNotifier {
    pub fn new(cfg: &NotifierConfig) -> Self {
        Self {
            client: DiscordRpcClient::new(cfg.discord_app_id.clone()),
            large_image: cfg.large_image.clone(),
            large_text: cfg.large_text.clone(),
        }
    }

    fn activity(&self, card: &NowPlayingCard, now: SystemTime) -> Value {
        let started = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut timestamps = json!({ "start": started });
        if card.duration_secs > 0 {
            timestamps["end"] = json!(started + card.duration_secs as i64);
        }

        let state = if card.looping {
            format!("requested by {} · looping", card.requester)
        } else {
            format!("requested by {}", card.requester)
        };

        let mut activity = json!({
            "type": ACTIVITY_LISTENING,
            "details": card.title,
            "state": state,
            "timestamps": timestamps,
        });

        if card.source_url.starts_with("http") {
            activity["buttons"] = json!([{ "label": "Open source", "url": card.source_url }]);
        }

        let mut assets = serde_json::Map::new();
        if let Some(v) = &self.large_image {
            assets.insert("large_image".to_string(), json!(v));
        }
        if let Some(v) = &self.large_text {
            assets.insert("large_text".to_string(), json!(v));
        }
        if !assets.is_empty() {
            activity["assets"] = Value::Object(assets);
        }
        activity
    }
}

#[async_trait]
impl NowPlayingNotifier for PresenceNotifier {
    fn name(&self) -> &'static str {
        "discord_presence"
    }

    async fn publish(&mut self, _target: &NotifyTarget, card: &NowPlayingCard) -> Result<()> {
        let activity = self.activity(card, SystemTime::now());
        self.client.set_activity(activity).await
    }

    async fn retract(&mut self) -> Result<()> {
        self.client.clear_activity().await
    }
}

#[cfg(test)]
mod tests {
    use super::{ipc, PresenceNotifier, IPC_TIMEOUT};
    use jukebox_core::{NotifierConfig, NotifyTarget};
    use jukebox_engine::{NowPlayingCard, NowPlayingNotifier};
    use std::time::{Duration, Instant, SystemTime};

    fn card(duration_secs: u64, source_url: &str) -> NowPlayingCard {
        NowPlayingCard {
            title: "Around the World".to_string(),
            duration: "7:09".to_string(),
            duration_secs,
            requester: "alice".to_string(),
            source_url: source_url.to_string(),
            up_next: 0,
            looping: true,
        }
    }

    #[test]
    fn activity_carries_track_and_timestamps() {
        let notifier = PresenceNotifier::new(&NotifierConfig::default());
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let activity = notifier.activity(&card(429, "https://youtu.be/x"), now);

        assert_eq!(activity["type"], 2);
        assert_eq!(activity["details"], "Around the World");
        assert_eq!(activity["state"], "requested by alice · looping");
        assert_eq!(activity["timestamps"]["start"], 1_000);
        assert_eq!(activity["timestamps"]["end"], 1_429);
        assert_eq!(activity["buttons"][0]["url"], "https://youtu.be/x");
        assert_eq!(activity["assets"]["large_image"], "app_icon");
    }

    #[test]
    fn unknown_duration_and_non_http_source_are_omitted() {
        let notifier = PresenceNotifier::new(&NotifierConfig {
            large_image: None,
            large_text: None,
            ..NotifierConfig::default()
        });
        let activity = notifier.activity(&card(0, "ytsearch:foo"), SystemTime::UNIX_EPOCH);

        assert!(activity["timestamps"].get("end").is_none());
        assert!(activity.get("buttons").is_none());
        assert!(activity.get("assets").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out_and_backs_off() {
        let (client_end, _peer) = tokio::io::duplex(64 * 1024);
        let mut notifier = PresenceNotifier::new(&NotifierConfig::default());
        notifier.client.stream = Some(Box::new(client_end));

        let started = tokio::time::Instant::now();
        let err = notifier
            .publish(&NotifyTarget("console".to_string()), &card(200, "https://x.y"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not answer"));
        assert!(started.elapsed() >= IPC_TIMEOUT);
        assert!(notifier.client.stream.is_none());
        assert!(notifier.client.next_retry_at > Instant::now());
    }

    #[tokio::test]
    async fn answered_command_keeps_the_connection() {
        let (client_end, mut peer) = tokio::io::duplex(64 * 1024);
        let mut notifier = PresenceNotifier::new(&NotifierConfig::default());
        notifier.client.stream = Some(Box::new(client_end));

        let reply = tokio::spawn(async move {
            let (opcode, raw) = ipc::read_frame(&mut peer).await.unwrap();
            ipc::write_frame(&mut peer, ipc::OPCODE_FRAME, br#"{"cmd":"SET_ACTIVITY","evt":null}"#)
                .await
                .unwrap();
            (opcode, raw, peer)
        });

        notifier.retract().await.unwrap();
        let (opcode, raw, _peer) = reply.await.unwrap();
        assert_eq!(opcode, ipc::OPCODE_FRAME);
        let sent: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(sent["args"]["activity"].is_null());
        assert!(notifier.client.stream.is_some());
    }
}
