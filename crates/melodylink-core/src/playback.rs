//! Playback controller: one sequencer clock driving one synthesizer.

use crate::catalog::InstrumentCatalog;
use crate::config::PlaybackSettings;
use crate::error::Result;
use crate::event::{MetaEvent, SequenceEvent};
use crate::sequencer::Sequencer;
use crate::song::{sanitize_path, SongInfo};
use crate::synth::Synthesizer;
use crate::trigger::NoteSink;
use std::sync::Arc;

/// What a [`PlaybackController::tick`] did.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// Nothing is playing.
    Idle,
    /// The current song advanced.
    Playing,
    /// The playlist moved on to a new song, which now plays from the start.
    SongChanged(Arc<SongInfo>),
}

/// Drives a [`Synthesizer`] from a [`Sequencer`] at a fixed tick period.
pub struct PlaybackController<S: NoteSink> {
    synth: Synthesizer<S>,
    sequencer: Sequencer,
    playlist: Vec<Arc<SongInfo>>,
    /// Playlist index loaded when the current song ends.
    next_index: usize,
    tick_micros: u64,
}

impl<S: NoteSink> PlaybackController<S> {
    /// Create a controller ticking at `settings.tick_interval()`.
    pub fn new(
        sink: S,
        catalog: Arc<InstrumentCatalog>,
        settings: &PlaybackSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            synth: Synthesizer::new(sink, catalog)
                .with_sustain_volume_scale(settings.sustain_volume_scale),
            sequencer: Sequencer::new(),
            playlist: Vec::new(),
            next_index: 0,
            tick_micros: settings.tick_interval().as_micros() as u64,
        })
    }

    pub fn synth(&self) -> &Synthesizer<S> {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut Synthesizer<S> {
        &mut self.synth
    }

    pub fn set_catalog(&mut self, catalog: Arc<InstrumentCatalog>) {
        self.synth.set_catalog(catalog);
    }

    /// Song loaded in the sequencer, playing or not.
    pub fn current_song(&self) -> Option<&Arc<SongInfo>> {
        self.sequencer.song()
    }

    pub fn is_playing(&self) -> bool {
        self.sequencer.is_running()
    }

    /// Current `(tick, micros)` position.
    pub fn position(&self) -> (u64, u64) {
        (self.sequencer.tick_position(), self.sequencer.micros_position())
    }

    pub fn playlist(&self) -> &[Arc<SongInfo>] {
        &self.playlist
    }

    /// Replace the playlist. The current song keeps playing; the first entry
    /// follows it.
    pub fn set_playlist(&mut self, songs: Vec<Arc<SongInfo>>) {
        log::info!("[PLAYBACK] Playlist set with {} song(s)", songs.len());
        self.playlist = songs;
        self.next_index = 0;
    }

    /// Advance one tick.
    pub fn tick(&mut self) -> TickOutcome {
        let was_running = self.sequencer.is_running();
        if was_running {
            for timed in self.sequencer.advance(self.tick_micros) {
                self.dispatch(&timed.event);
            }
        }
        self.synth.tick();

        if self.sequencer.is_running() {
            return TickOutcome::Playing;
        }
        if self.playlist.is_empty() {
            return if was_running {
                TickOutcome::Playing
            } else {
                TickOutcome::Idle
            };
        }

        let index = self.next_index % self.playlist.len();
        self.next_index = (index + 1) % self.playlist.len();
        let song = Arc::clone(&self.playlist[index]);
        match self.load(Arc::clone(&song), 0) {
            Ok(()) => {
                log::info!("[PLAYBACK] Now playing '{}'", song.display_name());
                TickOutcome::SongChanged(song)
            }
            Err(e) => {
                log::warn!("[PLAYBACK] Skipping '{}': {}", song.display_name(), e);
                TickOutcome::Idle
            }
        }
    }

    /// Play `song` from `tick`, replaying the controller state before it.
    ///
    /// On failure the previous song and position stay in place.
    pub fn load(&mut self, song: Arc<SongInfo>, tick: u64) -> Result<()> {
        self.sequencer.open(song)?;
        self.synth.reset(true);
        for event in self.sequencer.seek_tick(tick) {
            self.dispatch(&event);
        }
        self.sequencer.start();
        Ok(())
    }

    /// Jump within the current song.
    pub fn seek(&mut self, tick: u64) {
        if self.sequencer.song().is_none() {
            return;
        }
        self.synth.reset(false);
        for event in self.sequencer.seek_tick(tick) {
            self.dispatch(&event);
        }
        self.sequencer.start();
    }

    /// End the current song early; the playlist moves on at the next tick.
    pub fn next_song(&mut self) {
        self.sequencer.truncate();
    }

    /// Queue the playlist entry whose sanitized path matches `path` and end
    /// the current song. Returns false when no entry matches.
    pub fn set_song(&mut self, path: &str) -> bool {
        let wanted = sanitize_path(path);
        let position = self.playlist.iter().position(|song| song.sanitized_path() == wanted);
        let Some(index) = position else {
            return false;
        };
        self.next_index = index;
        self.sequencer.truncate();
        true
    }

    /// Stop playback, forget the playlist and silence every channel.
    pub fn stop(&mut self) {
        self.sequencer.close();
        self.playlist.clear();
        self.next_index = 0;
        self.synth.reset(true);
    }

    fn dispatch(&mut self, event: &SequenceEvent) {
        match event {
            SequenceEvent::Channel { channel, event } => self.synth.handle_event(*channel, *event),
            SequenceEvent::Meta(MetaEvent::Lyric(text)) => log::info!("[PLAYBACK] {}", text.trim()),
            SequenceEvent::Meta(MetaEvent::Marker(text)) => {
                log::debug!("[PLAYBACK] Marker: {}", text)
            }
            SequenceEvent::Meta(meta) => self.synth.handle_meta(meta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Instrument, Timbre};
    use crate::error::Error;
    use crate::sequence::testing::single_note;
    use crate::trigger::TriggerEvent;

    fn sustain_catalog() -> Arc<InstrumentCatalog> {
        let mut catalog = InstrumentCatalog::new();
        catalog.insert_instrument(
            0,
            Instrument {
                timbre: Timbre::Harp,
                octave_shift: 0,
                sustain: true,
            },
        );
        Arc::new(catalog)
    }

    fn controller() -> PlaybackController<Vec<TriggerEvent>> {
        let settings = PlaybackSettings::default();
        PlaybackController::new(Vec::new(), sustain_catalog(), &settings).unwrap()
    }

    fn song(end_tick: u32, path: &str) -> Arc<SongInfo> {
        Arc::new(SongInfo::from_bytes(single_note(end_tick), path).unwrap())
    }

    #[test]
    fn test_zero_tick_interval_is_rejected() {
        let settings = PlaybackSettings {
            tick_interval_ms: 0,
            ..Default::default()
        };
        let result =
            PlaybackController::new(Vec::<TriggerEvent>::new(), sustain_catalog(), &settings);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_sustained_note_end_to_end() {
        let mut playback = controller();
        playback.load(song(1000, "one.mid"), 0).unwrap();

        // Note-off lands at 500 ms, on the 25th tick.
        for _ in 0..25 {
            assert!(matches!(playback.tick(), TickOutcome::Playing));
        }
        let events = playback.synth().sink().clone();
        // Key 60 folds to ratio ~0.59 and re-fires every second tick during
        // the 24 ticks before the note-off.
        assert_eq!(events.len(), 1 + 12);
        let attack = events[0];
        assert_eq!(attack.register, 1);
        assert!(events[1..].iter().all(|e| e.volume < attack.volume && e.pitch == attack.pitch));

        for _ in 0..35 {
            playback.tick();
        }
        assert_eq!(playback.synth().sink().len(), 13);
        assert!(!playback.is_playing());
        assert!(matches!(playback.tick(), TickOutcome::Idle));
    }

    #[test]
    fn test_playlist_round_robin() {
        let mut playback = controller();
        let a = song(600, "a.mid");
        let b = song(700, "b.mid");
        playback.set_playlist(vec![a.clone(), b.clone()]);

        let TickOutcome::SongChanged(first) = playback.tick() else {
            panic!("expected a song change");
        };
        assert_eq!(first.digest(), a.digest());

        playback.next_song();
        let TickOutcome::SongChanged(second) = playback.tick() else {
            panic!("expected a song change");
        };
        assert_eq!(second.digest(), b.digest());

        playback.next_song();
        let TickOutcome::SongChanged(third) = playback.tick() else {
            panic!("expected a song change");
        };
        assert_eq!(third.digest(), a.digest());
    }

    #[test]
    fn test_set_song_by_sanitized_path() {
        let mut playback = controller();
        playback.set_playlist(vec![song(600, "dir/a.mid"), song(700, "dir/b.mid")]);
        playback.tick();

        assert!(!playback.set_song("missing.mid"));
        assert!(playback.set_song("./dir\\b.mid"));
        let TickOutcome::SongChanged(song) = playback.tick() else {
            panic!("expected a song change");
        };
        assert_eq!(song.path(), "dir/b.mid");
    }

    #[test]
    fn test_load_mid_song_chases_program() {
        let mut playback = controller();
        playback.load(song(1000, "one.mid"), 300).unwrap();
        assert_eq!(playback.position(), (300, 300_000));
        // The note-on before the seek point is not replayed.
        assert!(playback.synth().channel(0).running.is_empty());
        assert_eq!(playback.synth().channel(0).program, 0);
    }

    #[test]
    fn test_stop_clears_playlist() {
        let mut playback = controller();
        playback.set_playlist(vec![song(600, "a.mid")]);
        playback.tick();
        playback.stop();
        assert!(playback.current_song().is_none());
        assert!(matches!(playback.tick(), TickOutcome::Idle));
    }
}
