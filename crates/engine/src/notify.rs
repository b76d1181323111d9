use anyhow::Result;
use async_trait::async_trait;
use jukebox_core::{NotifyTarget, Track};
use serde::{Deserialize, Serialize};

/// What a now-playing message shows for the current track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlayingCard {
    pub title: String,
    pub duration: String,
    pub duration_secs: u64,
    pub requester: String,
    pub source_url: String,
    pub up_next: usize,
    pub looping: bool,
}

impl NowPlayingCard {
    pub fn new(track: &Track, up_next: usize, looping: bool) -> Self {
        Self {
            title: track.title().to_string(),
            duration: track.duration_label(),
            duration_secs: track.duration_secs(),
            requester: track.requester().to_string(),
            source_url: track.source_url().to_string(),
            up_next,
            looping,
        }
    }
}

/// Owns the single live now-playing message. `publish` replaces whatever
/// was shown before; `retract` removes it.
#[async_trait]
pub trait NowPlayingNotifier: Send {
    fn name(&self) -> &'static str;
    async fn publish(&mut self, target: &NotifyTarget, card: &NowPlayingCard) -> Result<()>;
    async fn retract(&mut self) -> Result<()>;
}

/// Fans a card out to several notifiers. Every notifier is attempted; the
/// first failure is reported.
#[derive(Default)]
pub struct NotifierChain {
    notifiers: Vec<Box<dyn NowPlayingNotifier>>,
}

impl NotifierChain {
    pub fn new(notifiers: Vec<Box<dyn NowPlayingNotifier>>) -> Self {
        Self { notifiers }
    }

    pub fn notifier_names(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }
}

#[async_trait]
impl NowPlayingNotifier for NotifierChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn publish(&mut self, target: &NotifyTarget, card: &NowPlayingCard) -> Result<()> {
        let mut first_err = None;
        for notifier in self.notifiers.iter_mut() {
            if let Err(err) = notifier.publish(target, card).await {
                first_err.get_or_insert(err.context(format!("{} notifier", notifier.name())));
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn retract(&mut self) -> Result<()> {
        let mut first_err = None;
        for notifier in self.notifiers.iter_mut() {
            if let Err(err) = notifier.retract().await {
                first_err.get_or_insert(err.context(format!("{} notifier", notifier.name())));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::{NotifierChain, NowPlayingCard, NowPlayingNotifier};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use jukebox_core::{NotifyTarget, Requester, Track};
    use std::sync::{Arc, Mutex};

    struct Flaky {
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl NowPlayingNotifier for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn publish(&mut self, _target: &NotifyTarget, card: &NowPlayingCard) -> Result<()> {
            self.seen.lock().unwrap().push(card.title.clone());
            if self.fail {
                Err(anyhow!("boom"))
            } else {
                Ok(())
            }
        }

        async fn retract(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn chain_reaches_every_notifier_despite_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = NotifierChain::new(vec![
            Box::new(Flaky {
                fail: true,
                seen: seen.clone(),
            }),
            Box::new(Flaky {
                fail: false,
                seen: seen.clone(),
            }),
        ]);

        let track = Track::new(
            "abc",
            "Song",
            61,
            "https://example.com/abc",
            "/cache/abc.mp3",
            Requester("bob".to_string()),
        )
        .unwrap();
        let card = NowPlayingCard::new(&track, 2, false);
        assert_eq!(card.duration, "1:01");

        let err = chain
            .publish(&NotifyTarget("console".to_string()), &card)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("flaky notifier"));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
