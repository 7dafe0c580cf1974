//! MIDI event model consumed by the synthesizer.
//!
//! This module provides:
//! - Channel-voice events ([`ChannelEvent`]) and raw byte parsing
//! - Meta and system events ([`MetaEvent`]) such as SysEx and lyrics
//! - Conversion from `midly` track events

use midly::{MetaMessage, MidiMessage, TrackEventKind};

/// Release velocity used when a note-on with velocity 0 ends a note.
pub const DEFAULT_RELEASE_VELOCITY: u8 = 64;

/// Channel-voice events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Note on (note 0-127, velocity 1-127)
    NoteOn { key: u8, velocity: u8 },
    /// Note off
    NoteOff { key: u8, velocity: u8 },
    /// Per-key pressure
    PolyPressure { key: u8, pressure: u8 },
    /// Control change (controller number, value)
    ControlChange { controller: u8, value: u8 },
    /// Program change
    ProgramChange { program: u8 },
    /// Channel pressure
    ChannelPressure { pressure: u8 },
    /// Pitch bend, 14-bit value centered at 0 (-8192 to +8191)
    PitchBend { value: i16 },
}

impl ChannelEvent {
    /// Parse raw MIDI bytes into a channel number and event.
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<(u8, Self)> {
        let status = *bytes.first()?;
        let msg_type = status & 0xF0;
        let channel = status & 0x0F;
        let data = |i: usize| bytes.get(i).map(|b| b & 0x7F);

        let event = match msg_type {
            0x90 => {
                let key = data(1)?;
                let velocity = data(2)?;
                if velocity == 0 {
                    // Note on with velocity 0 is treated as note off
                    ChannelEvent::NoteOff {
                        key,
                        velocity: DEFAULT_RELEASE_VELOCITY,
                    }
                } else {
                    ChannelEvent::NoteOn { key, velocity }
                }
            }
            0x80 => ChannelEvent::NoteOff {
                key: data(1)?,
                velocity: data(2)?,
            },
            0xA0 => ChannelEvent::PolyPressure {
                key: data(1)?,
                pressure: data(2)?,
            },
            0xB0 => ChannelEvent::ControlChange {
                controller: data(1)?,
                value: data(2)?,
            },
            0xC0 => ChannelEvent::ProgramChange { program: data(1)? },
            0xD0 => ChannelEvent::ChannelPressure { pressure: data(1)? },
            0xE0 => {
                // Pitch bend is 14-bit: LSB + MSB
                let lsb = data(1)? as i16;
                let msb = data(2)? as i16;
                ChannelEvent::PitchBend {
                    value: ((msb << 7) | lsb) - 8192,
                }
            }
            _ => return None,
        };
        Some((channel, event))
    }

    /// Convert a `midly` channel message.
    pub fn from_midly(message: MidiMessage) -> Self {
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => ChannelEvent::NoteOff {
                key: key.as_int(),
                velocity: DEFAULT_RELEASE_VELOCITY,
            },
            MidiMessage::NoteOn { key, vel } => ChannelEvent::NoteOn {
                key: key.as_int(),
                velocity: vel.as_int(),
            },
            MidiMessage::NoteOff { key, vel } => ChannelEvent::NoteOff {
                key: key.as_int(),
                velocity: vel.as_int(),
            },
            MidiMessage::Aftertouch { key, vel } => ChannelEvent::PolyPressure {
                key: key.as_int(),
                pressure: vel.as_int(),
            },
            MidiMessage::Controller { controller, value } => ChannelEvent::ControlChange {
                controller: controller.as_int(),
                value: value.as_int(),
            },
            MidiMessage::ProgramChange { program } => ChannelEvent::ProgramChange {
                program: program.as_int(),
            },
            MidiMessage::ChannelAftertouch { vel } => ChannelEvent::ChannelPressure {
                pressure: vel.as_int(),
            },
            MidiMessage::PitchBend { bend } => ChannelEvent::PitchBend {
                value: bend.0.as_int() as i16 - 8192,
            },
        }
    }
}

/// Meta and system events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEvent {
    /// System exclusive body, without the leading `F0` and trailing `F7`
    SysEx(Vec<u8>),
    /// System reset (`FF` on the wire)
    SystemReset,
    /// Tempo change in microseconds per quarter note
    Tempo(u32),
    /// Free text
    Text(String),
    /// Lyric syllable
    Lyric(String),
    /// Rehearsal marker
    Marker(String),
    /// Track or sequence name
    TrackName(String),
}

impl MetaEvent {
    /// Build a SysEx event, dropping a trailing `F7` terminator.
    pub fn sysex(data: &[u8]) -> Self {
        let body = match data.split_last() {
            Some((0xF7, rest)) => rest,
            _ => data,
        };
        MetaEvent::SysEx(body.to_vec())
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Anything that can appear in a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEvent {
    Channel { channel: u8, event: ChannelEvent },
    Meta(MetaEvent),
}

impl SequenceEvent {
    /// Convert a `midly` track event, skipping kinds the synthesizer has no use for
    /// (including end-of-track markers).
    pub fn from_track_event(kind: &TrackEventKind<'_>) -> Option<Self> {
        match kind {
            TrackEventKind::Midi { channel, message } => Some(SequenceEvent::Channel {
                channel: channel.as_int(),
                event: ChannelEvent::from_midly(*message),
            }),
            TrackEventKind::SysEx(data) => Some(SequenceEvent::Meta(MetaEvent::sysex(data))),
            TrackEventKind::Escape(_) => None,
            TrackEventKind::Meta(meta) => {
                let event = match meta {
                    MetaMessage::Tempo(tempo) => MetaEvent::Tempo(tempo.as_int()),
                    MetaMessage::Text(bytes) => MetaEvent::Text(text(bytes)),
                    MetaMessage::Lyric(bytes) => MetaEvent::Lyric(text(bytes)),
                    MetaMessage::Marker(bytes) => MetaEvent::Marker(text(bytes)),
                    MetaMessage::TrackName(bytes) => MetaEvent::TrackName(text(bytes)),
                    _ => return None,
                };
                Some(SequenceEvent::Meta(event))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_zero_velocity_is_note_off() {
        let (channel, event) = ChannelEvent::from_bytes(&[0x93, 60, 0]).unwrap();
        assert_eq!(channel, 3);
        assert_eq!(
            event,
            ChannelEvent::NoteOff {
                key: 60,
                velocity: DEFAULT_RELEASE_VELOCITY
            }
        );
    }

    #[test]
    fn test_pitch_bend_is_centered() {
        let (_, center) = ChannelEvent::from_bytes(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(center, ChannelEvent::PitchBend { value: 0 });

        let (_, low) = ChannelEvent::from_bytes(&[0xE0, 0x00, 0x00]).unwrap();
        assert_eq!(low, ChannelEvent::PitchBend { value: -8192 });

        let (_, high) = ChannelEvent::from_bytes(&[0xE0, 0x7F, 0x7F]).unwrap();
        assert_eq!(high, ChannelEvent::PitchBend { value: 8191 });
    }

    #[test]
    fn test_truncated_and_system_bytes() {
        assert!(ChannelEvent::from_bytes(&[]).is_none());
        assert!(ChannelEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(ChannelEvent::from_bytes(&[0xF8]).is_none());
        assert_eq!(
            ChannelEvent::from_bytes(&[0xC5, 40]),
            Some((5, ChannelEvent::ProgramChange { program: 40 }))
        );
    }

    #[test]
    fn test_sysex_terminator_is_stripped() {
        assert_eq!(
            MetaEvent::sysex(&[0x7E, 0x7F, 0x09, 0x01, 0xF7]),
            MetaEvent::SysEx(vec![0x7E, 0x7F, 0x09, 0x01])
        );
        assert_eq!(MetaEvent::sysex(&[0x7E]), MetaEvent::SysEx(vec![0x7E]));
    }
}
