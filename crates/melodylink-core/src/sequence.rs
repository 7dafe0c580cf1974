//! Parsed, merged and tempo-mapped MIDI sequences.
//!
//! All tracks of a standard MIDI file are merged into a single timeline of
//! [`TimedEvent`]s sorted by tick. The [`TempoMap`] converts between ticks
//! and microseconds, so positions can travel over the wire in either unit.

use crate::error::{Error, Result};
use crate::event::{MetaEvent, SequenceEvent};
use midly::{MetaMessage, Smf, Timing, TrackEventKind};

/// Default tempo when a file carries none (120 BPM).
pub const DEFAULT_TEMPO_US_PER_QUARTER: u32 = 500_000;

/// An event at its absolute position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: u64,
    pub micros: u64,
    pub event: SequenceEvent,
}

/// A span of constant tempo starting at `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoSegment {
    tick: u64,
    micros: u64,
    us_per_quarter: u32,
}

/// Tick/microsecond conversion for one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TempoMap {
    /// Ticks per quarter note with tempo changes.
    Metrical {
        ticks_per_quarter: u16,
        segments: Vec<TempoSegment>,
    },
    /// Fixed SMPTE ticks per second.
    Timecode { ticks_per_second: u32 },
}

impl TempoMap {
    /// Build a metrical map from `(tick, us_per_quarter)` changes.
    fn metrical(ticks_per_quarter: u16, mut changes: Vec<(u64, u32)>) -> Self {
        let ticks_per_quarter = ticks_per_quarter.max(1);
        changes.sort_by_key(|(tick, _)| *tick);

        let mut segments = vec![TempoSegment {
            tick: 0,
            micros: 0,
            us_per_quarter: DEFAULT_TEMPO_US_PER_QUARTER,
        }];
        for (tick, us_per_quarter) in changes {
            let last = segments[segments.len() - 1];
            let elapsed = ticks_to_micros(tick - last.tick, last.us_per_quarter, ticks_per_quarter);
            let micros = last.micros.saturating_add(elapsed);
            if last.tick == tick {
                segments.pop();
            }
            segments.push(TempoSegment {
                tick,
                micros,
                us_per_quarter,
            });
        }

        TempoMap::Metrical {
            ticks_per_quarter,
            segments,
        }
    }

    /// Microsecond position of `tick`.
    pub fn micros_at_tick(&self, tick: u64) -> u64 {
        match self {
            TempoMap::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let segment = segments
                    .iter()
                    .rev()
                    .find(|s| s.tick <= tick)
                    .unwrap_or(&segments[0]);
                let (offset, tempo) = (tick - segment.tick, segment.us_per_quarter);
                let elapsed = ticks_to_micros(offset, tempo, *ticks_per_quarter);
                segment.micros.saturating_add(elapsed)
            }
            TempoMap::Timecode { ticks_per_second } => {
                saturate(tick as u128 * 1_000_000 / (*ticks_per_second).max(1) as u128)
            }
        }
    }

    /// Tick position at `micros`, rounded down.
    pub fn tick_at_micros(&self, micros: u64) -> u64 {
        match self {
            TempoMap::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let segment = segments
                    .iter()
                    .rev()
                    .find(|s| s.micros <= micros)
                    .unwrap_or(&segments[0]);
                let elapsed = (micros - segment.micros) as u128;
                let ticks =
                    elapsed * *ticks_per_quarter as u128 / segment.us_per_quarter.max(1) as u128;
                segment.tick.saturating_add(saturate(ticks))
            }
            TempoMap::Timecode { ticks_per_second } => {
                saturate(micros as u128 * *ticks_per_second as u128 / 1_000_000)
            }
        }
    }
}

fn ticks_to_micros(ticks: u64, us_per_quarter: u32, ticks_per_quarter: u16) -> u64 {
    saturate(ticks as u128 * us_per_quarter as u128 / ticks_per_quarter.max(1) as u128)
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// A merged, time-stamped event timeline.
#[derive(Debug, Clone)]
pub struct Sequence {
    events: Vec<TimedEvent>,
    tempo: TempoMap,
    tick_length: u64,
    title: Option<String>,
    track_count: usize,
}

impl Sequence {
    /// Parse a standard MIDI file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes).map_err(|e| Error::Midi(e.to_string()))?;

        // Collect tempo changes from all tracks first
        let mut tempo_changes = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    tempo_changes.push((tick, tempo.as_int()));
                }
            }
        }

        let tempo = match smf.header.timing {
            Timing::Metrical(tpq) => TempoMap::metrical(tpq.as_int(), tempo_changes),
            Timing::Timecode(fps, ticks_per_frame) => TempoMap::Timecode {
                ticks_per_second: (fps.as_f32() * ticks_per_frame as f32).round() as u32,
            },
        };

        let mut events = Vec::new();
        let mut tick_length = 0u64;
        let mut title = None;
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                let Some(kind) = SequenceEvent::from_track_event(&event.kind) else {
                    continue;
                };
                if let SequenceEvent::Meta(MetaEvent::TrackName(name)) = &kind {
                    if title.is_none() && !name.trim().is_empty() {
                        title = Some(name.trim().to_string());
                    }
                }
                events.push(TimedEvent {
                    tick,
                    micros: tempo.micros_at_tick(tick),
                    event: kind,
                });
            }
            tick_length = tick_length.max(tick);
        }

        // Stable sort keeps track order for simultaneous events.
        events.sort_by_key(|e| e.tick);

        Ok(Self {
            events,
            tempo,
            tick_length,
            title,
            track_count: smf.tracks.len(),
        })
    }

    /// All events in playback order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// True when the sequence holds nothing playable.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Tick/microsecond conversion.
    pub fn tempo(&self) -> &TempoMap {
        &self.tempo
    }

    /// Length in ticks (position of the last event).
    pub fn tick_length(&self) -> u64 {
        self.tick_length
    }

    /// Length in microseconds.
    pub fn micros_length(&self) -> u64 {
        self.tempo.micros_at_tick(self.tick_length)
    }

    /// First non-empty track name.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Number of tracks in the source file.
    pub fn track_count(&self) -> usize {
        self.track_count
    }
}
