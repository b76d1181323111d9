use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jukebox_core::{AppConfig, ChannelRef, NotifierConfig, NotifyTarget, Requester};
use jukebox_discord_rpc::{ipc, PresenceNotifier};
use jukebox_engine::{
    AdvanceOutcome, EnqueueResult, NotifierChain, NowPlayingNotifier, Session, SessionConfig,
    SessionError, SessionUpdate,
};
use jukebox_providers::{build_transport, AssetResolver, YtDlpResolver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod console;
mod dispatch;
mod worker;

use console::ConsoleNotifier;
use dispatch::Command;
use worker::{spawn_resolution_worker, ResolveRequest, Resolved};

const CONFIG_POLL: Duration = Duration::from_secs(2);
const CONSOLE_TARGET: &str = "console";

#[derive(Parser, Debug)]
#[command(name = "jukebox", about = "Query -> yt-dlp cache -> queue -> voice channel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Voice channel to join; defaults to `default_channel` from the config.
    #[arg(long)]
    channel: Option<String>,

    /// Name shown as the requester of tracks queued from this console.
    #[arg(long)]
    requester: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            let channel = ChannelRef(cli.channel.unwrap_or_else(|| cfg.default_channel.clone()));
            let requester = Requester(cli.requester.unwrap_or_else(default_requester));
            run(cfg, cfg_path, channel, requester).await
        }
    }
}

async fn run(
    cfg: AppConfig,
    cfg_path: PathBuf,
    channel: ChannelRef,
    requester: Requester,
) -> Result<()> {
    let resolver: Arc<dyn AssetResolver> = Arc::new(YtDlpResolver::new(
        cfg.resolver.clone(),
        cfg.cache_dir.clone(),
    ));
    let transport = build_transport(&cfg.transport);
    let notifier = build_notifier(&cfg.notifier);
    let notifiers = notifier.notifier_names();

    let (mut session, mut events) = Session::new(
        SessionConfig::from_app_config(&cfg),
        transport,
        resolver.clone(),
        Box::new(notifier),
    );
    let (resolve_tx, mut resolved_rx) = spawn_resolution_worker(resolver);
    let mut lines = spawn_console_reader();
    let mut console_open = true;

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(cfg_path.clone(), reload_tx).await?;

    info!(%channel, cache_dir = %cfg.cache_dir.display(), ?notifiers, "jukebox started");
    println!("{}", dispatch::HELP);

    loop {
        tokio::select! {
            line = lines.recv(), if console_open => {
                let Some(line) = line else {
                    info!("console input closed; still serving queued tracks");
                    console_open = false;
                    continue;
                };
                match dispatch::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Help)) => println!("{}", dispatch::HELP),
                    Ok(Some(Command::Play(query))) => {
                        println!("searching for {query:?}");
                        let request = ResolveRequest {
                            query,
                            requester: requester.clone(),
                            channel: channel.clone(),
                            target: NotifyTarget(CONSOLE_TARGET.to_string()),
                            stop_count: session.stop_count(),
                        };
                        if resolve_tx.send(request).is_err() {
                            error!("resolution worker is gone");
                        }
                    }
                    Ok(Some(Command::Control(control))) => {
                        println!("{}", dispatch::execute(&mut session, control).await);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            Some(resolved) = resolved_rx.recv() => {
                admit(&mut session, resolved).await;
            }
            Some(event) = events.recv() => {
                match session.handle_event(event).await {
                    SessionUpdate::Advanced(AdvanceOutcome::Drained) => println!("queue finished"),
                    SessionUpdate::Disconnected => println!("left the voice channel after idling"),
                    SessionUpdate::Advanced(AdvanceOutcome::NowPlaying(_)) | SessionUpdate::Ignored => {}
                }
            }
            msg = reload_rx.recv() => {
                if msg.is_some() {
                    match load_or_default(&cfg_path) {
                        Ok(new_cfg) => {
                            session.update_config(SessionConfig::from_app_config(&new_cfg));
                            info!("configuration reloaded; resolver, transport and notifier changes apply on restart");
                        }
                        Err(err) => {
                            error!(error=%err, "failed to reload config");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                match session.disconnect().await {
                    Ok(()) | Err(SessionError::NotConnected) => {}
                    Err(err) => warn!(error=%err, "disconnect on shutdown failed"),
                }
                break;
            }
        }
    }

    Ok(())
}

async fn admit(session: &mut Session, resolved: Resolved) {
    let Resolved { request, result } = resolved;
    let track = match result {
        Ok(track) => track,
        Err(err) => {
            warn!(query = %request.query, error = %err, "resolution failed");
            println!("could not resolve {:?}: {err}", request.query);
            return;
        }
    };

    if request.stop_count != session.stop_count() {
        info!(title = %track.title(), "discarding track resolved across a stop");
        println!("dropped {}: playback was stopped while it was resolving", track.title());
        return;
    }

    match session
        .enqueue(track, &request.channel, request.target)
        .await
    {
        Ok(EnqueueResult::Queued { position, track }) => {
            println!("queued #{position}: {} [{}]", track.title(), track.duration_label());
        }
        Ok(EnqueueResult::StartedPlaying(_)) => {}
        Err(err) => println!("error: {err}"),
    }
}

fn build_notifier(cfg: &NotifierConfig) -> NotifierChain {
    let mut notifiers: Vec<Box<dyn NowPlayingNotifier>> = vec![Box::new(ConsoleNotifier)];
    if cfg.discord_presence {
        notifiers.push(Box::new(PresenceNotifier::new(cfg)));
    }
    NotifierChain::new(notifiers)
}

fn spawn_console_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error=%err, "failed reading console input");
                    break;
                }
            }
        }
    });
    rx
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== jukebox doctor ==");

    match tool_version(&cfg.resolver.ytdlp_path, "--version").await {
        Some(version) => println!("yt-dlp: {version}"),
        None => println!("yt-dlp: not runnable ({})", cfg.resolver.ytdlp_path),
    }

    let ffmpeg = cfg
        .resolver
        .ffmpeg_location
        .as_ref()
        .map(|p| ffmpeg_binary(p))
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));
    match tool_version(&ffmpeg.to_string_lossy(), "-version").await {
        Some(version) => println!("ffmpeg: {version}"),
        None => println!("ffmpeg: not runnable ({})", ffmpeg.display()),
    }

    match check_cache_dir(&cfg.cache_dir).await {
        Ok(()) => println!("Cache directory: {} (writable)", cfg.cache_dir.display()),
        Err(err) => println!("Cache directory: {} ({err:#})", cfg.cache_dir.display()),
    }

    println!("Transport: {:?}", cfg.transport.kind);

    if cfg.notifier.discord_presence {
        println!(
            "Discord IPC socket: {}",
            if discord_ipc_present() {
                "present"
            } else {
                "not found"
            }
        );
    } else {
        println!("Discord presence: disabled");
    }

    Ok(())
}

async fn tool_version(program: &str, flag: &str) -> Option<String> {
    let output = tokio::process::Command::new(program)
        .arg(flag)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
}

/// `ffmpeg_location` may name the binary or the directory holding it.
fn ffmpeg_binary(location: &Path) -> PathBuf {
    if location.is_dir() {
        location.join("ffmpeg")
    } else {
        location.to_path_buf()
    }
}

async fn check_cache_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let probe = dir.join(".jukebox-doctor");
    tokio::fs::write(&probe, b"ok")
        .await
        .with_context(|| format!("failed to write into {}", dir.display()))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn discord_ipc_present() -> bool {
    (0..=9u8)
        .flat_map(ipc::socket_candidates)
        .any(|path| path.exists())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("jukebox").join("config.toml")
}

fn default_requester() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "console".to_string())
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout belongs to the console dispatcher.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn spawn_reload_watchers(path: PathBuf, tx: mpsc::Sender<()>) -> Result<()> {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        loop {
            tokio::time::sleep(CONFIG_POLL).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                let _ = tx_poll.send(()).await;
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let tx_hup = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    let _ = tx_hup.send(()).await;
                }
            }
        });
    }

    Ok(())
}

fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("JUKEBOX_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = non_empty("JUKEBOX_CACHE_DIR") {
        cfg.cache_dir = PathBuf::from(v);
    }
    if let Some(v) = non_empty("JUKEBOX_DISCORD_APP_ID") {
        cfg.notifier.discord_app_id = v;
    }
    if let Some(v) = non_empty("JUKEBOX_DISCORD_PRESENCE") {
        if let Ok(parsed) = v.parse::<bool>() {
            cfg.notifier.discord_presence = parsed;
        }
    }
}
