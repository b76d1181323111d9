//! Console command parsing and the replies printed for each command.

use jukebox_engine::{ConnectionState, Session, SessionError, Snapshot};
use thiserror::Error;

pub const HELP: &str = "\
commands:
  play <query|url>    resolve a track and play it or add it to the queue
  skip                stop the current track and move on
  pause | resume
  previous | prev     play the last finished track again
  stop                clear the queue and leave the voice channel
  disconnect | leave  same as stop
  loop [on|off]       repeat the current track (no argument toggles)
  queue | list        show upcoming tracks
  nowplaying | np     show the current track
  clear               empty the queue, keep the current track
  help";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Control(Control),
    Help,
}

/// Commands answered directly by the session, without resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Skip,
    Pause,
    Resume,
    Previous,
    Stop,
    Disconnect,
    Loop(Option<bool>),
    Queue,
    NowPlaying,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command {0:?}; try `help`")]
    Unknown(String),
    #[error("usage: play <query or url>")]
    MissingQuery,
    #[error("usage: loop [on|off]")]
    BadLoopArg,
}

/// Blank lines parse to `None`. A leading `!` is accepted and ignored.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    let line = line.strip_prefix('!').unwrap_or(line).trim_start();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let control = match verb.to_ascii_lowercase().as_str() {
        "play" | "p" => {
            if rest.is_empty() {
                return Err(ParseError::MissingQuery);
            }
            return Ok(Some(Command::Play(rest.to_string())));
        }
        "help" | "h" | "?" => return Ok(Some(Command::Help)),
        "skip" | "next" => Control::Skip,
        "pause" => Control::Pause,
        "resume" => Control::Resume,
        "previous" | "prev" | "back" => Control::Previous,
        "stop" => Control::Stop,
        "disconnect" | "leave" => Control::Disconnect,
        "loop" => match rest.to_ascii_lowercase().as_str() {
            "" => Control::Loop(None),
            "on" | "true" | "1" => Control::Loop(Some(true)),
            "off" | "false" | "0" => Control::Loop(Some(false)),
            _ => return Err(ParseError::BadLoopArg),
        },
        "queue" | "list" | "q" => Control::Queue,
        "nowplaying" | "np" => Control::NowPlaying,
        "clear" => Control::Clear,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(Command::Control(control)))
}

pub async fn execute(session: &mut Session, control: Control) -> String {
    match control {
        Control::Skip => match session.skip() {
            Ok(track) => format!("skipped {}", track.title()),
            Err(err) => reply_error(err),
        },
        Control::Pause => match session.pause() {
            Ok(()) => "paused".to_string(),
            Err(err) => reply_error(err),
        },
        Control::Resume => match session.resume() {
            Ok(()) => "resumed".to_string(),
            Err(err) => reply_error(err),
        },
        Control::Previous => match session.previous().await {
            Ok(track) => format!("going back to {}", track.title()),
            Err(err) => reply_error(err),
        },
        Control::Stop => match session.stop().await {
            Ok(()) => "stopped and cleared the queue".to_string(),
            Err(err) => reply_error(err),
        },
        Control::Disconnect => match session.disconnect().await {
            Ok(()) => "disconnected".to_string(),
            Err(err) => reply_error(err),
        },
        Control::Loop(requested) => {
            let enabled = requested.unwrap_or(!session.loop_enabled());
            session.set_loop(enabled);
            if enabled {
                "loop on".to_string()
            } else {
                "loop off".to_string()
            }
        }
        Control::Queue => render_queue(&session.snapshot()),
        Control::NowPlaying => render_now_playing(&session.snapshot()),
        Control::Clear => match session.clear_queue() {
            0 => "queue is already empty".to_string(),
            n => format!("removed {n} queued track(s)"),
        },
    }
}

fn reply_error(err: SessionError) -> String {
    format!("error: {err}")
}

pub fn render_queue(snapshot: &Snapshot) -> String {
    if snapshot.queue.is_empty() {
        return "queue is empty".to_string();
    }
    let mut out = String::from("queue:");
    for (i, track) in snapshot.queue.iter().enumerate() {
        out.push_str(&format!(
            "\n  {}. {} [{}]",
            i + 1,
            track.title(),
            track.duration_label()
        ));
    }
    out
}

pub fn render_now_playing(snapshot: &Snapshot) -> String {
    let Some(track) = &snapshot.current else {
        let mut out = "nothing is playing".to_string();
        if let Some(err) = &snapshot.last_error {
            out.push_str(&format!(" (last error: {err})"));
        }
        return out;
    };

    let state = match snapshot.connection {
        ConnectionState::Paused => " (paused)",
        _ => "",
    };
    let mut out = format!(
        "{}{} [{}] requested by {}",
        track.title(),
        state,
        track.duration_label(),
        track.requester()
    );
    if snapshot.loop_enabled {
        out.push_str(" [loop]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{execute, parse, render_now_playing, render_queue, Command, Control, ParseError};
    use crate::console::ConsoleNotifier;
    use async_trait::async_trait;
    use jukebox_core::{Requester, Track};
    use jukebox_engine::{ConnectionState, Session, SessionConfig, Snapshot};
    use jukebox_providers::{AssetResolver, ResolutionError, SimulatedTransport};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoResolver;

    #[async_trait]
    impl AssetResolver for NoResolver {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn resolve(
            &self,
            query: &str,
            _requester: &Requester,
        ) -> Result<Track, ResolutionError> {
            Err(ResolutionError::NotFound(query.to_string()))
        }
    }

    fn idle_session() -> Session {
        let (session, _events) = Session::new(
            SessionConfig::default(),
            Box::new(SimulatedTransport::new(Duration::from_secs(1))),
            Arc::new(NoResolver),
            Box::new(ConsoleNotifier),
        );
        session
    }

    fn track(id: &str, secs: u64) -> Track {
        Track::new(
            id,
            format!("Title {id}"),
            secs,
            format!("https://example.com/{id}"),
            format!("/cache/{id}.mp3"),
            Requester("erin".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn parses_verbs_and_aliases() {
        assert_eq!(
            parse("play  daft punk  ").unwrap(),
            Some(Command::Play("daft punk".to_string()))
        );
        assert_eq!(
            parse("!PREV").unwrap(),
            Some(Command::Control(Control::Previous))
        );
        assert_eq!(
            parse("leave").unwrap(),
            Some(Command::Control(Control::Disconnect))
        );
        assert_eq!(parse("list").unwrap(), Some(Command::Control(Control::Queue)));
        assert_eq!(
            parse("loop").unwrap(),
            Some(Command::Control(Control::Loop(None)))
        );
        assert_eq!(
            parse("loop off").unwrap(),
            Some(Command::Control(Control::Loop(Some(false))))
        );
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse("play").unwrap_err(), ParseError::MissingQuery);
        assert_eq!(parse("loop maybe").unwrap_err(), ParseError::BadLoopArg);
        assert_eq!(
            parse("dance now").unwrap_err(),
            ParseError::Unknown("dance".to_string())
        );
    }

    #[tokio::test]
    async fn idle_session_answers_with_errors() {
        let mut session = idle_session();
        assert_eq!(
            execute(&mut session, Control::Skip).await,
            "error: nothing is playing"
        );
        assert_eq!(
            execute(&mut session, Control::Previous).await,
            "error: no previously played track"
        );
        assert_eq!(
            execute(&mut session, Control::Stop).await,
            "error: not connected to a voice channel"
        );
        assert_eq!(
            execute(&mut session, Control::Clear).await,
            "queue is already empty"
        );
    }

    #[tokio::test]
    async fn loop_without_argument_toggles() {
        let mut session = idle_session();
        assert_eq!(execute(&mut session, Control::Loop(None)).await, "loop on");
        assert!(session.loop_enabled());
        assert_eq!(execute(&mut session, Control::Loop(None)).await, "loop off");
        assert_eq!(
            execute(&mut session, Control::Loop(Some(false))).await,
            "loop off"
        );
    }

    #[test]
    fn renders_queue_and_current_track() {
        let snapshot = Snapshot {
            current: Some(track("a", 200)),
            queue: vec![track("b", 0), track("c", 61)],
            history_len: 0,
            loop_enabled: true,
            connection: ConnectionState::Paused,
            last_error: None,
        };

        assert_eq!(
            render_queue(&snapshot),
            "queue:\n  1. Title b [unknown]\n  2. Title c [1:01]"
        );
        assert_eq!(
            render_now_playing(&snapshot),
            "Title a (paused) [3:20] requested by erin [loop]"
        );
    }

    #[test]
    fn idle_now_playing_mentions_last_error() {
        let snapshot = Snapshot {
            current: None,
            queue: Vec::new(),
            history_len: 3,
            loop_enabled: false,
            connection: ConnectionState::Connected,
            last_error: Some("could not fetch x".to_string()),
        };
        assert_eq!(
            render_now_playing(&snapshot),
            "nothing is playing (last error: could not fetch x)"
        );
        assert_eq!(render_queue(&snapshot), "queue is empty");
    }
}
