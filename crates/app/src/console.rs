use anyhow::Result;
use async_trait::async_trait;
use jukebox_core::NotifyTarget;
use jukebox_engine::{NowPlayingCard, NowPlayingNotifier};

/// Prints now-playing cards to stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl NowPlayingNotifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn publish(&mut self, _target: &NotifyTarget, card: &NowPlayingCard) -> Result<()> {
        println!("{}", render_card(card));
        Ok(())
    }

    async fn retract(&mut self) -> Result<()> {
        println!("-- nothing playing");
        Ok(())
    }
}

pub fn render_card(card: &NowPlayingCard) -> String {
    let mut line = format!(
        "now playing: {} [{}] (requested by {})",
        card.title, card.duration, card.requester
    );
    if card.looping {
        line.push_str(" [loop]");
    }
    if card.up_next > 0 {
        line.push_str(&format!(", {} up next", card.up_next));
    }
    line
}
