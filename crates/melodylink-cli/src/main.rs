//! melodylink CLI - The `melodylink` command.
//!
//! # Architecture
//!
//! The binary wires the pieces of **melodylink-core** together:
//!
//! - `inspect` parses a sequence and optionally renders it offline
//! - `play` runs a playback runtime over a song library
//! - `demo` runs a conductor and a listener in one process, linked by channels
//! - `cache` and `config` manage on-disk state

mod library;
mod sink;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melodylink_core::config::Config;
use melodylink_core::{
    channel_link, Conductor, ConductorCommand, ContentStore, InstrumentCatalog, Listener,
    ListenerCommand, PlaybackCommand, PlaybackController, Runtime, TriggerEvent,
};
use sink::PrintSink;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// melodylink - MIDI playback on a bounded set of timbres, in sync
#[derive(Parser, Debug)]
#[command(name = "melodylink")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Plays MIDI files on a fixed set of timbres and keeps listeners in sync",
    long_about = None
)]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what a MIDI file contains
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Play the file offline and summarize the triggers it produces
        #[arg(long)]
        render: bool,
    },

    /// Play a file or every file in a directory
    Play {
        /// File or directory (defaults to library.songs_dir)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Run a conductor and a listener side by side
    Demo {
        /// File or directory (defaults to library.songs_dir)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Manage the content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List cached digests
    List,
    /// Remove every cached sequence
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a commented default config file
    Init,
    /// Print where the config file lives
    Path,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Inspect { file, render } => inspect(&file, render, &config),
        Commands::Play { path, duration } => play(&song_root(path, &config)?, duration, &config),
        Commands::Demo { path, duration } => demo(&song_root(path, &config)?, duration, &config),
        Commands::Cache { action } => cache(action, &config),
        Commands::Config { action } => match action {
            ConfigAction::Init => {
                let path =
                    Config::create_default_config_file().context("Failed to write config file")?;
                println!("Wrote {}", path.display());
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", Config::config_path()?.display());
                Ok(())
            }
        },
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load_or_default()),
    }
}

fn song_root(path: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    path.or_else(|| config.library.songs_dir.clone())
        .ok_or_else(|| anyhow::anyhow!("No path given and library.songs_dir is not set"))
}

fn inspect(file: &Path, render: bool, config: &Config) -> Result<()> {
    let label = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let song = library::load_song(file, label)?;
    let sequence = song.sequence();

    println!("File:     {}", file.display());
    println!("Title:    {}", song.title().unwrap_or("-"));
    println!("Digest:   {}", song.digest());
    println!("Tracks:   {}", sequence.track_count());
    println!("Events:   {}", sequence.events().len());
    println!("Ticks:    {}", sequence.tick_length());
    println!("Duration: {:.1}s", sequence.micros_length() as f64 / 1_000_000.0);

    if !render {
        return Ok(());
    }

    let mut playback = PlaybackController::new(
        Vec::<TriggerEvent>::new(),
        InstrumentCatalog::general_midi(),
        &config.playback,
    )?;
    playback.load(Arc::clone(&song), 0)?;
    while playback.is_playing() {
        playback.tick();
    }
    // One more tick lets sustains on the final events settle.
    playback.tick();

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for event in playback.synth().sink() {
        *counts.entry(event.sound_id()).or_default() += 1;
    }
    println!();
    println!("Triggers: {}", playback.synth().sink().len());
    for (sound, count) in counts {
        println!("  {:<16} {}", sound, count);
    }
    Ok(())
}

fn play(root: &Path, duration: Option<u64>, config: &Config) -> Result<()> {
    let songs = library::scan(root)?;
    if songs.is_empty() {
        anyhow::bail!("No playable songs in {}", root.display());
    }

    let controller = PlaybackController::new(
        PrintSink::new("play"),
        InstrumentCatalog::general_midi(),
        &config.playback,
    )
    .context("Invalid playback settings")?;
    let runtime = Runtime::spawn("player", controller, config.playback.tick_interval())
        .context("Failed to start runtime")?;
    runtime.handle().send(PlaybackCommand::SetPlaylist(songs))?;

    log::info!("Playing... (Press Ctrl+C to exit)");
    wait_for_exit(duration)?;
    runtime.handle().send(PlaybackCommand::Stop)?;
    runtime.shutdown();
    Ok(())
}

fn demo(root: &Path, duration: Option<u64>, config: &Config) -> Result<()> {
    const LISTENER_PEER: u64 = 1;

    let songs = library::scan(root)?;
    if songs.is_empty() {
        anyhow::bail!("No playable songs in {}", root.display());
    }

    let controller = PlaybackController::new(
        PrintSink::new("conductor"),
        InstrumentCatalog::general_midi(),
        &config.playback,
    )
    .context("Invalid playback settings")?;
    let store = Arc::new(ContentStore::in_memory());
    let conductor = Conductor::new(controller, store, config.sync.session_id);
    let conductor_rt = Runtime::spawn("conductor", conductor, config.playback.tick_interval())
        .context("Failed to start conductor runtime")?;

    let cache_dir = config.cache_dir()?;
    log::info!("Listener cache: {}", cache_dir.display());
    let (to_conductor, from_listener) = channel_link();
    let listener = Listener::new(
        to_conductor,
        Arc::new(ContentStore::with_dir(cache_dir)),
        config.playback.clone(),
        config.sync.drift_tolerance_micros(),
        Box::new(|session| PrintSink::new(format!("session {}", session))),
    )?;
    let listener_rt = Runtime::spawn("listener", listener, config.playback.tick_interval())
        .context("Failed to start listener runtime")?;

    // Frames travel through forwarding threads that end when their link drops.
    let (to_listener, from_conductor) = channel_link();
    let listener_handle = listener_rt.handle().clone();
    let downstream = thread::spawn(move || {
        while let Ok(frame) = from_conductor.recv() {
            if listener_handle.send(ListenerCommand::Inbound(frame)).is_err() {
                break;
            }
        }
    });
    let conductor_handle = conductor_rt.handle().clone();
    let upstream = thread::spawn(move || {
        while let Ok(frame) = from_listener.recv() {
            let inbound = ConductorCommand::Inbound {
                peer: LISTENER_PEER,
                frame,
            };
            if conductor_handle.send(inbound).is_err() {
                break;
            }
        }
    });

    let handle = conductor_rt.handle();
    handle.send(ConductorCommand::SetPlaylist(songs))?;
    handle.send(ConductorCommand::Connect {
        peer: LISTENER_PEER,
        link: to_listener,
    })?;

    log::info!("Demo running... (Press Ctrl+C to exit)");
    wait_for_exit(duration)?;

    handle.send(ConductorCommand::Stop)?;
    thread::sleep(Duration::from_millis(100));
    conductor_rt.shutdown();
    listener_rt.shutdown();
    let _ = downstream.join();
    let _ = upstream.join();
    Ok(())
}

fn cache(action: CacheAction, config: &Config) -> Result<()> {
    let dir = config.cache_dir()?;
    let store = ContentStore::with_dir(&dir);
    let digests = store
        .cached_digests()
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    match action {
        CacheAction::List => {
            println!("{} ({} cached)", dir.display(), digests.len());
            for digest in digests {
                println!("  {}", digest.to_hex());
            }
        }
        CacheAction::Clear => {
            for digest in &digests {
                store.invalidate(digest);
            }
            println!("Removed {} cached sequence(s) from {}", digests.len(), dir.display());
        }
    }
    Ok(())
}

/// Block until Ctrl+C, SIGTERM or the optional deadline.
fn wait_for_exit(duration: Option<u64>) -> Result<()> {
    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    while !term.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    log::info!("Exiting...");
    Ok(())
}
