//! melodylink runtime - owns playback state on a dedicated thread.
//!
//! The runtime manages:
//! - One thread per playback controller, conductor or listener
//! - The FIFO task queue other threads talk to it through
//! - The fixed tick that advances playback

pub mod thread;

pub use thread::{Actor, Runtime, RuntimeHandle};

use crate::conductor::Conductor;
use crate::link::{PeerId, PeerLink};
use crate::listener::Listener;
use crate::playback::PlaybackController;
use crate::song::SongInfo;
use crate::trigger::NoteSink;
use std::sync::Arc;

/// Tasks for a standalone [`PlaybackController`].
#[derive(Debug)]
pub enum PlaybackCommand {
    SetPlaylist(Vec<Arc<SongInfo>>),
    NextSong,
    SetSong(String),
    Seek(u64),
    Stop,
}

impl<S: NoteSink + Send + 'static> Actor for PlaybackController<S> {
    type Message = PlaybackCommand;

    fn handle(&mut self, msg: PlaybackCommand) {
        match msg {
            PlaybackCommand::SetPlaylist(songs) => self.set_playlist(songs),
            PlaybackCommand::NextSong => self.next_song(),
            PlaybackCommand::SetSong(path) => {
                if !self.set_song(&path) {
                    log::warn!("[RUNTIME] No playlist entry for '{}'", path);
                }
            }
            PlaybackCommand::Seek(tick) => self.seek(tick),
            PlaybackCommand::Stop => self.stop(),
        }
    }

    fn tick(&mut self) {
        PlaybackController::tick(self);
    }
}

/// Tasks for a [`Conductor`] runtime.
pub enum ConductorCommand<L> {
    Connect { peer: PeerId, link: L },
    Disconnect(PeerId),
    /// A frame received from `peer`.
    Inbound { peer: PeerId, frame: Vec<u8> },
    Unsubscribe(PeerId),
    SetPlaylist(Vec<Arc<SongInfo>>),
    NextSong,
    SetSong(String),
    Seek(u64),
    Stop,
}

impl<S, L> Actor for Conductor<S, L>
where
    S: NoteSink + Send + 'static,
    L: PeerLink + Send + 'static,
{
    type Message = ConductorCommand<L>;

    fn handle(&mut self, msg: ConductorCommand<L>) {
        match msg {
            ConductorCommand::Connect { peer, link } => self.connect(peer, link),
            ConductorCommand::Disconnect(peer) => self.disconnect(peer),
            ConductorCommand::Inbound { peer, frame } => Conductor::handle(self, peer, &frame),
            ConductorCommand::Unsubscribe(peer) => self.unsubscribe(peer),
            ConductorCommand::SetPlaylist(songs) => self.set_playlist(songs),
            ConductorCommand::NextSong => self.next_song(),
            ConductorCommand::SetSong(path) => {
                if !self.set_song(&path) {
                    log::warn!("[RUNTIME] No playlist entry for '{}'", path);
                }
            }
            ConductorCommand::Seek(tick) => self.seek(tick),
            ConductorCommand::Stop => self.stop(),
        }
    }

    fn tick(&mut self) {
        Conductor::tick(self);
    }
}

/// Tasks for a [`Listener`] runtime.
#[derive(Debug)]
pub enum ListenerCommand {
    /// A frame received from the conductor.
    Inbound(Vec<u8>),
    /// The connection to the conductor dropped.
    Disconnect,
}

impl<S, L> Actor for Listener<S, L>
where
    S: NoteSink + Send + 'static,
    L: PeerLink + Send + Sync + 'static,
{
    type Message = ListenerCommand;

    fn handle(&mut self, msg: ListenerCommand) {
        match msg {
            ListenerCommand::Inbound(frame) => Listener::handle(self, &frame),
            ListenerCommand::Disconnect => self.disconnect(),
        }
    }

    fn tick(&mut self) {
        Listener::tick(self);
    }
}
