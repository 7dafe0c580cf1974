//! Mirroring playback endpoint.
//!
//! A [`Listener`] replays whatever its conductor announces. Each session
//! gets its own [`PlaybackController`]. Songs are resolved through the
//! [`ContentStore`]; a digest that is not cached yet stays *pending* until
//! its bytes arrive, then plays at the position carried by the announcement
//! and a `SequencePull` fetches a fresh position to make up for the download
//! time.

use crate::catalog::InstrumentCatalog;
use crate::config::PlaybackSettings;
use crate::error::Result;
use crate::link::PeerLink;
use crate::playback::PlaybackController;
use crate::protocol::{ContentReply, SyncMessage};
use crate::song::{Digest, SongInfo};
use crate::store::{ContentStore, LinkPuller, Lookup};
use crate::trigger::NoteSink;
use std::collections::HashMap;
use std::sync::Arc;

/// True when two positions are further apart than `tolerance` microseconds.
pub fn needs_drift_correction(local_micros: u64, remote_micros: u64, tolerance: u64) -> bool {
    local_micros.abs_diff(remote_micros) > tolerance
}

/// Announced song that is still being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChange {
    pub digest: Digest,
    pub tick: u64,
    pub micros: u64,
}

/// One mirrored session.
pub struct ListenerSession<S: NoteSink> {
    controller: PlaybackController<S>,
    pending: Option<PendingChange>,
}

impl<S: NoteSink> ListenerSession<S> {
    pub fn controller(&self) -> &PlaybackController<S> {
        &self.controller
    }

    pub fn pending(&self) -> Option<&PendingChange> {
        self.pending.as_ref()
    }
}

/// Creates the note sink for a new session.
pub type SinkFactory<S> = Box<dyn FnMut(u32) -> S + Send>;

/// Listener side of the sync protocol.
pub struct Listener<S: NoteSink, L: PeerLink> {
    link: Arc<L>,
    store: Arc<ContentStore>,
    sessions: HashMap<u32, ListenerSession<S>>,
    make_sink: SinkFactory<S>,
    settings: PlaybackSettings,
    drift_tolerance_micros: u64,
}

impl<S: NoteSink, L: PeerLink + Send + Sync + 'static> Listener<S, L> {
    /// Create a listener talking to its conductor over `link`.
    ///
    /// The store requests missing content over the same link.
    pub fn new(
        link: L,
        store: Arc<ContentStore>,
        settings: PlaybackSettings,
        drift_tolerance_micros: u64,
        make_sink: SinkFactory<S>,
    ) -> Result<Self> {
        settings.validate()?;
        let link = Arc::new(link);
        store.set_puller(Arc::new(LinkPuller(Arc::clone(&link))));
        Ok(Self {
            link,
            store,
            sessions: HashMap::new(),
            make_sink,
            settings,
            drift_tolerance_micros,
        })
    }

    pub fn session(&self, session_id: u32) -> Option<&ListenerSession<S>> {
        self.sessions.get(&session_id)
    }

    pub fn session_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Handle one inbound frame. Malformed frames are dropped.
    pub fn handle(&mut self, frame: &[u8]) {
        let message = match SyncMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[LISTENER] Dropping frame: {}", e);
                return;
            }
        };

        match message {
            SyncMessage::Hello => self.send(&SyncMessage::Hello),
            SyncMessage::SessionInit { session_id, catalog } => {
                log::info!("[LISTENER] Joined session {}", session_id);
                if let Some(session) = self.session_mut(session_id) {
                    session.controller.set_catalog(catalog);
                }
            }
            SyncMessage::SequenceChange {
                session_id,
                digest,
                tick,
                micros,
            } => {
                let change = PendingChange {
                    digest,
                    tick: tick.max(0) as u64,
                    micros: micros.max(0) as u64,
                };
                self.apply_change(session_id, change);
            }
            SyncMessage::ContentResponse(ContentReply::Found { digest, bytes }) => {
                match self.store.put(digest, bytes) {
                    Ok(song) => self.resolve_pending(&song),
                    Err(e) => log::warn!("[LISTENER] Rejected content for {}: {}", digest, e),
                }
            }
            SyncMessage::ContentResponse(ContentReply::NotFound) => {
                log::warn!("[LISTENER] Conductor does not have the requested content");
                // The reply names no digest; let every outstanding one be asked for again.
                for pending in self.sessions.values().filter_map(|s| s.pending) {
                    self.store.forget_request(&pending.digest);
                }
            }
            SyncMessage::Stop { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    log::info!("[LISTENER] Session {} stopped", session_id);
                }
            }
            other => log::debug!("[LISTENER] Ignoring {:?}", other),
        }
    }

    /// Resolve pending songs that arrived by any path, then advance every
    /// session one tick.
    pub fn tick(&mut self) {
        let ready: Vec<Arc<SongInfo>> = self
            .sessions
            .values()
            .filter_map(|s| s.pending)
            .filter_map(|p| match self.store.get(&p.digest, false) {
                Lookup::Ready(song) => Some(song),
                Lookup::Pending => None,
            })
            .collect();
        for song in ready {
            self.resolve_pending(&song);
        }

        for session in self.sessions.values_mut() {
            session.controller.tick();
        }
    }

    /// The conductor went away: end every session.
    pub fn disconnect(&mut self) {
        log::info!("[LISTENER] Disconnected, closing {} session(s)", self.sessions.len());
        self.sessions.clear();
    }

    fn apply_change(&mut self, session_id: u32, change: PendingChange) {
        let tolerance = self.drift_tolerance_micros;
        let store = Arc::clone(&self.store);
        let Some(session) = self.session_mut(session_id) else {
            return;
        };

        let playing_same = session.controller.is_playing()
            && session.controller.current_song().map(|s| s.digest()) == Some(change.digest);
        if playing_same {
            session.pending = None;
            let (_, local) = session.controller.position();
            if needs_drift_correction(local, change.micros, tolerance) {
                log::info!(
                    "[LISTENER] Session {} drifted {} us, seeking to tick {}",
                    session_id,
                    local.abs_diff(change.micros),
                    change.tick
                );
                session.controller.seek(change.tick);
            }
            return;
        }

        match store.get(&change.digest, true) {
            Lookup::Ready(song) => {
                session.pending = None;
                play(session_id, session, song, change.tick);
            }
            Lookup::Pending => {
                log::debug!("[LISTENER] Session {} waiting for {}", session_id, change.digest);
                session.pending = Some(change);
            }
        }
    }

    fn resolve_pending(&mut self, song: &Arc<SongInfo>) {
        let mut pulls = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            let Some(pending) = session.pending else {
                continue;
            };
            if pending.digest != song.digest() {
                continue;
            }
            session.pending = None;
            if play(*id, session, Arc::clone(song), pending.tick) {
                pulls.push(*id);
            }
        }
        for session_id in pulls {
            self.send(&SyncMessage::SequencePull { session_id });
        }
    }

    fn session_mut(&mut self, session_id: u32) -> Option<&mut ListenerSession<S>> {
        if !self.sessions.contains_key(&session_id) {
            let sink = (self.make_sink)(session_id);
            let catalog = InstrumentCatalog::general_midi();
            let controller = match PlaybackController::new(sink, catalog, &self.settings) {
                Ok(controller) => controller,
                Err(e) => {
                    log::warn!("[LISTENER] Cannot create session {}: {}", session_id, e);
                    return None;
                }
            };
            self.sessions.insert(
                session_id,
                ListenerSession {
                    controller,
                    pending: None,
                },
            );
        }
        self.sessions.get_mut(&session_id)
    }

    fn send(&self, message: &SyncMessage) {
        if let Err(e) = self.link.send(message) {
            log::warn!("[LISTENER] Send failed: {}", e);
        }
    }
}

fn play<S: NoteSink>(
    session_id: u32,
    session: &mut ListenerSession<S>,
    song: Arc<SongInfo>,
    tick: u64,
) -> bool {
    let name = song.display_name().to_string();
    match session.controller.load(song, tick) {
        Ok(()) => {
            log::info!("[LISTENER] Session {} playing '{}' from tick {}", session_id, name, tick);
            true
        }
        Err(e) => {
            log::warn!("[LISTENER] Session {} cannot play '{}': {}", session_id, name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::Conductor;
    use crate::link::testing::RecordingLink;
    use crate::sequence::testing::single_note;
    use crate::trigger::{NullSink, TriggerEvent};

    const SESSION: u32 = 1;
    const TOLERANCE: u64 = 10_000_000;

    fn listener(link: RecordingLink) -> Listener<NullSink, RecordingLink> {
        Listener::new(
            link,
            Arc::new(ContentStore::in_memory()),
            PlaybackSettings::default(),
            TOLERANCE,
            Box::new(|_| NullSink),
        )
        .unwrap()
    }

    fn change(digest: Digest, tick: i64) -> Vec<u8> {
        SyncMessage::SequenceChange {
            session_id: SESSION,
            digest,
            tick,
            micros: tick * 1000,
        }
        .encode()
        .unwrap()
    }

    fn found(bytes: &[u8]) -> Vec<u8> {
        SyncMessage::ContentResponse(ContentReply::Found {
            digest: Digest::of(bytes),
            bytes: bytes.into(),
        })
        .encode()
        .unwrap()
    }

    fn position(listener: &Listener<NullSink, RecordingLink>) -> (u64, u64) {
        listener.session(SESSION).unwrap().controller().position()
    }

    #[test]
    fn test_drift_threshold() {
        assert!(!needs_drift_correction(100_000_000, 105_000_000, TOLERANCE));
        assert!(needs_drift_correction(100_000_000, 111_000_000, TOLERANCE));
        assert!(!needs_drift_correction(100_000_000, 100_005_000, TOLERANCE));
        assert!(!needs_drift_correction(100_000_000, 90_000_000, TOLERANCE));
        assert!(needs_drift_correction(100_000_000, 89_999_999, TOLERANCE));
    }

    #[test]
    fn test_missing_content_is_requested_once_then_played() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(10_000);
        let digest = Digest::of(&bytes);

        listener.handle(&change(digest, 2000));
        listener.handle(&change(digest, 2020));
        assert_eq!(link.take(), vec![SyncMessage::ContentRequest(digest)]);
        assert_eq!(listener.session(SESSION).unwrap().pending().map(|p| p.tick), Some(2020));

        listener.handle(&found(&bytes));
        let session = listener.session(SESSION).unwrap();
        assert!(session.pending().is_none());
        assert!(session.controller().is_playing());
        assert_eq!(session.controller().current_song().unwrap().digest(), digest);
        assert_eq!(position(&listener), (2020, 2_020_000));
        assert_eq!(link.take(), vec![SyncMessage::SequencePull { session_id: SESSION }]);
    }

    #[test]
    fn test_cached_content_plays_immediately() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(10_000);
        let digest = Digest::of(&bytes);
        listener.store.put(digest, bytes).unwrap();

        listener.handle(&change(digest, 500));
        assert!(link.take().is_empty());
        assert_eq!(position(&listener), (500, 500_000));
    }

    #[test]
    fn test_drift_correction_on_same_song() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(200_000);
        let digest = Digest::of(&bytes);
        listener.store.put(digest, bytes).unwrap();

        listener.handle(&change(digest, 100_000));
        assert_eq!(position(&listener).1, 100_000_000);

        // Five seconds ahead is tolerated.
        listener.handle(&change(digest, 105_000));
        assert_eq!(position(&listener).1, 100_000_000);

        // Eleven seconds is not.
        listener.handle(&change(digest, 111_000));
        assert_eq!(position(&listener), (111_000, 111_000_000));
    }

    #[test]
    fn test_stop_and_disconnect_close_sessions() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(10_000);
        let digest = Digest::of(&bytes);
        listener.store.put(digest, bytes).unwrap();

        listener.handle(&change(digest, 0));
        listener.handle(&SyncMessage::Stop { session_id: SESSION }.encode().unwrap());
        assert!(listener.session(SESSION).is_none());

        listener.handle(&change(digest, 0));
        listener.disconnect();
        assert!(listener.session_ids().is_empty());
    }

    #[test]
    fn test_hello_is_answered_and_garbage_dropped() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        listener.handle(&[0x00]);
        listener.handle(&[0x04, 0x01]);
        assert_eq!(link.take(), vec![SyncMessage::Hello]);
        assert!(listener.session_ids().is_empty());
    }

    #[test]
    fn test_rejected_content_keeps_pending_and_retries() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(10_000);
        let digest = Digest::of(&bytes);
        listener.handle(&change(digest, 0));
        assert_eq!(link.take(), vec![SyncMessage::ContentRequest(digest)]);

        let forged = SyncMessage::ContentResponse(ContentReply::Found {
            digest,
            bytes: single_note(20_000).into(),
        });
        listener.handle(&forged.encode().unwrap());
        assert!(listener.session(SESSION).unwrap().pending().is_some());

        // The next announcement asks again, once.
        listener.handle(&change(digest, 100));
        listener.tick();
        listener.handle(&change(digest, 120));
        assert_eq!(link.take(), vec![SyncMessage::ContentRequest(digest)]);

        listener.handle(&found(&bytes));
        assert_eq!(position(&listener), (120, 120_000));
    }

    #[test]
    fn test_not_found_allows_a_new_request() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let digest = Digest::of(&single_note(10_000));
        listener.handle(&change(digest, 0));
        link.take();

        let not_found = SyncMessage::ContentResponse(ContentReply::NotFound);
        listener.handle(&not_found.encode().unwrap());
        listener.handle(&change(digest, 50));
        assert_eq!(link.take(), vec![SyncMessage::ContentRequest(digest)]);
    }

    #[test]
    fn test_out_of_range_tick_is_clamped() {
        let link = RecordingLink::default();
        let mut listener = listener(link.clone());
        let bytes = single_note(10_000);
        let digest = Digest::of(&bytes);
        listener.store.put(digest, bytes).unwrap();

        let change = SyncMessage::SequenceChange {
            session_id: SESSION,
            digest,
            tick: i64::MAX,
            micros: i64::MAX,
        };
        listener.handle(&change.encode().unwrap());
        assert_eq!(position(&listener), (10_000, 10_000_000));

        // Same song, so only a drift seek, which clamps too.
        listener.handle(&change.encode().unwrap());
        assert_eq!(position(&listener), (10_000, 10_000_000));
        listener.tick();
        assert!(!listener.session(SESSION).unwrap().controller().is_playing());
    }

    /// Conductor and listener wired back to back.
    #[test]
    fn test_conductor_to_listener_end_to_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let to_listener = RecordingLink::default();
        let to_conductor = RecordingLink::default();

        let settings = PlaybackSettings::default();
        let catalog = InstrumentCatalog::general_midi();
        let controller = PlaybackController::new(NullSink, catalog, &settings).unwrap();
        let mut conductor: Conductor<NullSink, RecordingLink> =
            Conductor::new(controller, Arc::new(ContentStore::in_memory()), SESSION);
        let mut listener: Listener<Vec<TriggerEvent>, RecordingLink> = Listener::new(
            to_conductor.clone(),
            Arc::new(ContentStore::in_memory()),
            PlaybackSettings::default(),
            TOLERANCE,
            Box::new(|_| Vec::new()),
        )
        .unwrap();

        let song = Arc::new(SongInfo::from_bytes(single_note(2000), "duet.mid").unwrap());
        conductor.set_playlist(vec![Arc::clone(&song)]);
        conductor.tick();
        conductor.connect(7, to_listener.clone());

        // Pump both directions until quiet.
        for _ in 0..10 {
            let downstream = to_listener.take();
            let upstream = to_conductor.take();
            if downstream.is_empty() && upstream.is_empty() {
                break;
            }
            for message in downstream {
                listener.handle(&message.encode().unwrap());
            }
            for message in upstream {
                conductor.handle(7, &message.encode().unwrap());
            }
        }

        let session = listener.session(SESSION).unwrap();
        assert_eq!(session.controller().current_song().unwrap().digest(), song.digest());
        assert!(session.controller().is_playing());

        for _ in 0..5 {
            listener.tick();
        }
        // The General MIDI piano attack from the note-on at tick 0.
        let events = listener.session(SESSION).unwrap().controller().synth().sink();
        assert_eq!(events.len(), 1);
    }
}
