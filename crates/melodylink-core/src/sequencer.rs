//! Position-tracking sequencer over a [`Sequence`].
//!
//! The sequencer walks a song's merged timeline in microseconds and hands
//! out the events that became due since the last advance. Seeking "chases"
//! controller state: it returns the events needed to put the synthesizer in
//! the state it would have been in had playback run from the start.

use crate::error::{Error, Result};
use crate::event::{ChannelEvent, MetaEvent, SequenceEvent};
use crate::sequence::TimedEvent;
use crate::song::SongInfo;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Data-entry and parameter-select controllers, which are not chased.
const PARAMETER_CONTROLLERS: [u8; 8] = [6, 38, 96, 97, 98, 99, 100, 101];

/// Cursor over one song's timeline.
#[derive(Debug, Default)]
pub struct Sequencer {
    song: Option<Arc<SongInfo>>,
    /// Index of the next event to dispatch.
    cursor: usize,
    position_micros: u64,
    running: bool,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `song` at position 0, stopped.
    ///
    /// Fails without touching the current song when `song` has no events.
    pub fn open(&mut self, song: Arc<SongInfo>) -> Result<()> {
        if song.sequence().is_empty() {
            return Err(Error::EmptySequence);
        }
        self.song = Some(song);
        self.cursor = 0;
        self.position_micros = 0;
        self.running = false;
        Ok(())
    }

    /// Unload the current song.
    pub fn close(&mut self) {
        self.song = None;
        self.cursor = 0;
        self.position_micros = 0;
        self.running = false;
    }

    pub fn song(&self) -> Option<&Arc<SongInfo>> {
        self.song.as_ref()
    }

    pub fn start(&mut self) {
        self.running = self.song.is_some();
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current position in microseconds.
    pub fn micros_position(&self) -> u64 {
        self.position_micros
    }

    /// Current position in ticks.
    pub fn tick_position(&self) -> u64 {
        self.song
            .as_ref()
            .map(|song| song.sequence().tempo().tick_at_micros(self.position_micros))
            .unwrap_or(0)
    }

    /// Move forward by `delta_micros` and return the events that became due.
    ///
    /// Playback stops once the last event has been dispatched.
    pub fn advance(&mut self, delta_micros: u64) -> Vec<TimedEvent> {
        let Some(song) = self.song.as_ref().filter(|_| self.running) else {
            return Vec::new();
        };
        let events = song.sequence().events();
        self.position_micros = self.position_micros.saturating_add(delta_micros);

        let start = self.cursor;
        while self.cursor < events.len() && events[self.cursor].micros <= self.position_micros {
            self.cursor += 1;
        }
        let due = events[start..self.cursor].to_vec();

        if self.cursor >= events.len() {
            log::debug!("[SEQ] Reached end of '{}'", song.display_name());
            self.running = false;
        }
        due
    }

    /// Jump to `tick` and return the chase events for that position.
    ///
    /// The chase holds every earlier system exclusive message in order, then
    /// per channel the last bank select, program, plain controller values
    /// and pitch bend. Events at exactly `tick` are left for the next
    /// [`advance`](Self::advance).
    pub fn seek_tick(&mut self, tick: u64) -> Vec<SequenceEvent> {
        let Some(song) = self.song.as_ref() else {
            return Vec::new();
        };
        let sequence = song.sequence();
        let events = sequence.events();
        let tick = tick.min(sequence.tick_length());

        let cursor = events.partition_point(|e| e.tick < tick);
        let mut sysex = Vec::new();
        let mut channels: BTreeMap<u8, ChaseState> = BTreeMap::new();
        for timed in &events[..cursor] {
            match &timed.event {
                SequenceEvent::Meta(event @ (MetaEvent::SysEx(_) | MetaEvent::SystemReset)) => {
                    sysex.push(SequenceEvent::Meta(event.clone()));
                }
                SequenceEvent::Channel { channel, event } => {
                    channels.entry(*channel).or_default().record(*event);
                }
                SequenceEvent::Meta(_) => {}
            }
        }

        self.cursor = cursor;
        self.position_micros = sequence.tempo().micros_at_tick(tick);
        log::debug!(
            "[SEQ] Seek to tick {} ({} us), chasing {} channel(s)",
            tick,
            self.position_micros,
            channels.len()
        );

        let mut chase = sysex;
        for (channel, state) in channels {
            chase.extend(
                state
                    .into_events()
                    .map(|event| SequenceEvent::Channel { channel, event }),
            );
        }
        chase
    }

    /// Jump to the end so the song finishes, and stop.
    pub fn truncate(&mut self) {
        let Some(song) = self.song.as_ref() else {
            return;
        };
        let sequence = song.sequence();
        self.cursor = sequence.events().len();
        self.position_micros = sequence.micros_length();
        self.running = false;
    }
}

/// Last chase-relevant values seen on one channel.
#[derive(Debug, Default)]
struct ChaseState {
    bank: Option<u8>,
    program: Option<u8>,
    controllers: BTreeMap<u8, u8>,
    pitch_bend: Option<i16>,
}

impl ChaseState {
    fn record(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::ControlChange { controller: 0, value } => self.bank = Some(value),
            ChannelEvent::ControlChange { controller, value } => {
                if !PARAMETER_CONTROLLERS.contains(&controller) {
                    self.controllers.insert(controller, value);
                }
            }
            ChannelEvent::ProgramChange { program } => self.program = Some(program),
            ChannelEvent::PitchBend { value } => self.pitch_bend = Some(value),
            _ => {}
        }
    }

    fn into_events(self) -> impl Iterator<Item = ChannelEvent> {
        let bank = self
            .bank
            .map(|value| ChannelEvent::ControlChange { controller: 0, value });
        let program = self.program.map(|program| ChannelEvent::ProgramChange { program });
        let controllers = self
            .controllers
            .into_iter()
            .map(|(controller, value)| ChannelEvent::ControlChange { controller, value });
        let bend = self.pitch_bend.map(|value| ChannelEvent::PitchBend { value });
        bank.into_iter().chain(program).chain(controllers).chain(bend)
    }
}
