//! Authoritative playback source.
//!
//! A [`Conductor`] owns one [`PlaybackController`] and one session. Peers go
//! through two states: *announced* once the conductor said `Hello`, and
//! *subscribed* once they answered. Subscribed peers receive the session's
//! catalog and every material change of song or position; they fetch song
//! bytes they do not have with `ContentRequest`.

use crate::link::{PeerId, PeerLink};
use crate::playback::{PlaybackController, TickOutcome};
use crate::protocol::{ContentReply, SyncMessage};
use crate::song::SongInfo;
use crate::store::{ContentStore, Lookup};
use crate::trigger::NoteSink;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Announced,
    Subscribed,
}

struct Peer<L> {
    link: L,
    state: PeerState,
}

/// Snapshot of the conductor's session.
#[derive(Debug, Clone)]
pub struct SyncSession {
    pub session_id: u32,
    pub song: Option<Arc<SongInfo>>,
    pub tick: u64,
    pub micros: u64,
    pub subscribers: Vec<PeerId>,
}

/// Conductor side of the sync protocol.
pub struct Conductor<S: NoteSink, L: PeerLink> {
    controller: PlaybackController<S>,
    store: Arc<ContentStore>,
    session_id: u32,
    peers: HashMap<PeerId, Peer<L>>,
}

impl<S: NoteSink, L: PeerLink> Conductor<S, L> {
    pub fn new(
        controller: PlaybackController<S>,
        store: Arc<ContentStore>,
        session_id: u32,
    ) -> Self {
        Self {
            controller,
            store,
            session_id,
            peers: HashMap::new(),
        }
    }

    pub fn controller(&self) -> &PlaybackController<S> {
        &self.controller
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn peer_state(&self, peer: PeerId) -> Option<PeerState> {
        self.peers.get(&peer).map(|p| p.state)
    }

    /// Snapshot of session id, song, position and subscribers.
    pub fn session(&self) -> SyncSession {
        let (tick, micros) = self.controller.position();
        let mut subscribers: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.state == PeerState::Subscribed)
            .map(|(id, _)| *id)
            .collect();
        subscribers.sort_unstable();
        SyncSession {
            session_id: self.session_id,
            song: self.controller.current_song().cloned(),
            tick,
            micros,
            subscribers,
        }
    }

    /// Register a new connection and greet it.
    pub fn connect(&mut self, peer: PeerId, link: L) {
        log::info!("[CONDUCTOR] Peer {} connected", peer);
        if let Err(e) = link.send(&SyncMessage::Hello) {
            log::warn!("[CONDUCTOR] Failed to greet peer {}: {}", peer, e);
            return;
        }
        self.peers.insert(
            peer,
            Peer {
                link,
                state: PeerState::Announced,
            },
        );
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_some() {
            log::info!("[CONDUCTOR] Peer {} disconnected", peer);
        }
    }

    /// Stop playback on `peer` and drop it back to announced.
    pub fn unsubscribe(&mut self, peer: PeerId) {
        let session_id = self.session_id;
        let Some(entry) = self.peers.get_mut(&peer) else {
            return;
        };
        if entry.state == PeerState::Subscribed {
            entry.state = PeerState::Announced;
            send(peer, entry, &SyncMessage::Stop { session_id });
        }
    }

    /// Handle one inbound frame from `peer`. Malformed frames are dropped.
    pub fn handle(&mut self, peer: PeerId, frame: &[u8]) {
        let message = match SyncMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[CONDUCTOR] Dropping frame from peer {}: {}", peer, e);
                return;
            }
        };
        if !self.peers.contains_key(&peer) {
            log::debug!("[CONDUCTOR] Frame from unknown peer {}", peer);
            return;
        }

        match message {
            SyncMessage::Hello => self.subscribe(peer),
            SyncMessage::ContentRequest(digest) => {
                let reply = match self.store.get(&digest, false) {
                    Lookup::Ready(song) => ContentReply::Found {
                        digest,
                        bytes: Arc::clone(song.bytes()),
                    },
                    Lookup::Pending => {
                        log::warn!("[CONDUCTOR] Peer {} asked for unknown {}", peer, digest);
                        ContentReply::NotFound
                    }
                };
                self.send_to(peer, &SyncMessage::ContentResponse(reply));
            }
            SyncMessage::SequencePull { session_id } if session_id == self.session_id => {
                if let Some(change) = self.sequence_change() {
                    self.send_to(peer, &change);
                }
            }
            other => log::debug!("[CONDUCTOR] Ignoring {:?} from peer {}", other, peer),
        }
    }

    /// Advance playback one tick; a playlist change is broadcast.
    pub fn tick(&mut self) {
        if let TickOutcome::SongChanged(song) = self.controller.tick() {
            log::info!("[CONDUCTOR] Broadcasting '{}'", song.display_name());
            self.broadcast_position();
        }
    }

    /// Replace the playlist; its songs become fetchable by digest.
    pub fn set_playlist(&mut self, songs: Vec<Arc<SongInfo>>) {
        for song in &songs {
            self.store.insert(Arc::clone(song));
        }
        self.controller.set_playlist(songs);
    }

    /// Skip to the next playlist entry at the next tick.
    pub fn next_song(&mut self) {
        self.controller.next_song();
    }

    /// Switch to the playlist entry at `path` at the next tick.
    pub fn set_song(&mut self, path: &str) -> bool {
        self.controller.set_song(path)
    }

    /// Jump within the current song and tell every subscriber.
    pub fn seek(&mut self, tick: u64) {
        self.controller.seek(tick);
        self.broadcast_position();
    }

    /// Stop playback everywhere.
    pub fn stop(&mut self) {
        self.controller.stop();
        self.broadcast(&SyncMessage::Stop {
            session_id: self.session_id,
        });
    }

    fn subscribe(&mut self, peer: PeerId) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            entry.state = PeerState::Subscribed;
        }
        log::info!("[CONDUCTOR] Peer {} subscribed to session {}", peer, self.session_id);

        let init = SyncMessage::SessionInit {
            session_id: self.session_id,
            catalog: Arc::clone(self.controller.synth().catalog()),
        };
        self.send_to(peer, &init);
        if let Some(change) = self.sequence_change() {
            self.send_to(peer, &change);
        }
    }

    fn sequence_change(&self) -> Option<SyncMessage> {
        let song = self.controller.current_song()?;
        let (tick, micros) = self.controller.position();
        Some(SyncMessage::SequenceChange {
            session_id: self.session_id,
            digest: song.digest(),
            tick: tick as i64,
            micros: micros as i64,
        })
    }

    fn broadcast_position(&self) {
        if let Some(change) = self.sequence_change() {
            self.broadcast(&change);
        }
    }

    fn broadcast(&self, message: &SyncMessage) {
        for (id, peer) in &self.peers {
            if peer.state == PeerState::Subscribed {
                send(*id, peer, message);
            }
        }
    }

    fn send_to(&self, peer: PeerId, message: &SyncMessage) {
        if let Some(entry) = self.peers.get(&peer) {
            send(peer, entry, message);
        }
    }
}

fn send<L: PeerLink>(id: PeerId, peer: &Peer<L>, message: &SyncMessage) {
    if let Err(e) = peer.link.send(message) {
        log::warn!("[CONDUCTOR] Send to peer {} failed: {}", id, e);
    }
}
