//! Bounded-timbre MIDI synthesizer.
//!
//! The [`Synthesizer`] interprets General MIDI channel-voice and system
//! exclusive messages and turns them into [`TriggerEvent`]s for a
//! [`NoteSink`]. Sustaining instruments keep their notes in a per-channel
//! running set and are re-triggered from [`Synthesizer::tick`], which
//! approximates a continuous tone with discrete events.

mod channel;
mod sysex;

pub use channel::{rpn, ChannelState, Parameter, RunningNote, PARAMETER_NULL};

use crate::catalog::InstrumentCatalog;
use crate::event::{ChannelEvent, MetaEvent};
use crate::trigger::{NoteSink, TriggerEvent};
use crate::tuning::{TuningId, TuningRegistry};
use std::sync::Arc;

/// Number of MIDI channels.
pub const CHANNELS: usize = 16;

/// Channel that is always percussion (GM channel 10).
const PERCUSSION_CHANNEL: u8 = 9;
/// Extra percussion channel while General MIDI level 2 is on.
const GM2_PERCUSSION_CHANNEL: u8 = 10;

/// Volume scale for sustain re-triggers.
pub const DEFAULT_SUSTAIN_VOLUME_SCALE: f32 = 0.08;

/// General MIDI mode selected by system exclusive messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GeneralMidiMode {
    #[default]
    Off,
    Level1,
    Level2,
}

/// Channel-voice state machine driving a [`NoteSink`].
pub struct Synthesizer<S: NoteSink> {
    sink: S,
    catalog: Arc<InstrumentCatalog>,
    tunings: TuningRegistry,
    channels: [ChannelState; CHANNELS],
    gm_mode: GeneralMidiMode,
    tick_count: u64,
    sustain_volume_scale: f32,
}

impl<S: NoteSink> Synthesizer<S> {
    /// Create a synthesizer using `catalog` for instrument lookups.
    pub fn new(sink: S, catalog: Arc<InstrumentCatalog>) -> Self {
        Self {
            sink,
            catalog,
            tunings: TuningRegistry::new(),
            channels: std::array::from_fn(|_| ChannelState::default()),
            gm_mode: GeneralMidiMode::Off,
            tick_count: 0,
            sustain_volume_scale: DEFAULT_SUSTAIN_VOLUME_SCALE,
        }
    }

    /// Override the volume scale for sustain re-triggers.
    pub fn with_sustain_volume_scale(mut self, scale: f32) -> Self {
        self.sustain_volume_scale = scale;
        self
    }

    /// Swap the instrument catalog, e.g. after a session announces its own.
    pub fn set_catalog(&mut self, catalog: Arc<InstrumentCatalog>) {
        self.catalog = catalog;
    }

    pub fn catalog(&self) -> &Arc<InstrumentCatalog> {
        &self.catalog
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// State of one channel (0-15).
    pub fn channel(&self, channel: u8) -> &ChannelState {
        &self.channels[channel as usize % CHANNELS]
    }

    pub fn tunings(&self) -> &TuningRegistry {
        &self.tunings
    }

    pub fn general_midi_mode(&self) -> GeneralMidiMode {
        self.gm_mode
    }

    /// Number of completed [`tick`](Self::tick) calls.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Reinitialize every channel and drop tuning and parameter state.
    ///
    /// A full reset also turns General MIDI mode off; a soft reset keeps it.
    pub fn reset(&mut self, full: bool) {
        if full {
            self.gm_mode = GeneralMidiMode::Off;
        }
        log::debug!("[SYNTH] Reset (full: {}, GM mode: {:?})", full, self.gm_mode);
        self.tunings.clear();
        for channel in self.channels.iter_mut() {
            *channel = ChannelState::default();
        }
    }

    /// Handle a channel-voice event on `channel` (0-15).
    pub fn handle_event(&mut self, channel: u8, event: ChannelEvent) {
        let channel = channel % CHANNELS as u8;
        match event {
            ChannelEvent::NoteOn { velocity: 0, key } => self.note_off(channel, key),
            ChannelEvent::NoteOn { key, velocity } => self.note_on(channel, key, velocity),
            ChannelEvent::NoteOff { key, .. } => self.note_off(channel, key),
            ChannelEvent::ProgramChange { program } => self.program_change(channel, program),
            ChannelEvent::PitchBend { value } => {
                self.channels[channel as usize].pitch_bend = value.clamp(-8192, 8191);
            }
            ChannelEvent::PolyPressure { key, pressure } => {
                let slot = (key & 0x7F) as usize;
                self.channels[channel as usize].poly_pressure[slot] = pressure.min(127);
            }
            ChannelEvent::ChannelPressure { pressure } => {
                // A zero pressure would mute the channel outright.
                if pressure != 0 {
                    self.channels[channel as usize].pressure = pressure.min(127);
                }
            }
            ChannelEvent::ControlChange { controller, value } => {
                self.control_change(channel, controller, value.min(127))
            }
        }
    }

    /// Handle a meta or system event.
    ///
    /// Malformed system exclusive messages are logged and ignored.
    pub fn handle_meta(&mut self, event: &MetaEvent) {
        match event {
            MetaEvent::SysEx(data) => {
                if let Err(e) = self.handle_sysex(data) {
                    log::warn!("[SYNTH] Ignoring system exclusive message: {}", e);
                }
            }
            MetaEvent::SystemReset => self.reset(false),
            other => log::trace!("[SYNTH] Ignoring meta event {:?}", other),
        }
    }

    /// Re-trigger every sustained note.
    ///
    /// A note fires on ticks divisible by `round(1 / pitch)`, so higher
    /// pitches re-fire more often.
    pub fn tick(&mut self) {
        let current = self.tick_count;
        self.tick_count += 1;

        for channel in &self.channels {
            if channel.running.is_empty() {
                continue;
            }
            let Some(instrument) = self.catalog.instrument(channel.program) else {
                continue;
            };
            for note in channel.running.values() {
                let key = note.key as i32 + instrument.octave_shift as i32 * 12;
                let volume =
                    channel.volume_for(note.velocity, note.key) * self.sustain_volume_scale;
                let trigger = TriggerEvent::new(
                    instrument.timbre,
                    key,
                    channel.cents_for(note),
                    volume,
                    channel.pan_offset(),
                );
                let period = (1.0 / trigger.pitch).round().max(1.0) as u64;
                if current % period == 0 {
                    self.sink.emit(trigger);
                }
            }
        }
    }

    fn is_percussion(&self, channel: u8) -> bool {
        channel == PERCUSSION_CHANNEL
            || (self.gm_mode == GeneralMidiMode::Level2 && channel == GM2_PERCUSSION_CHANNEL)
    }

    fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        let key = key & 0x7F;
        let state = &self.channels[channel as usize];

        if self.is_percussion(channel) {
            let Some(percussion) = self.catalog.percussion(key) else {
                log::trace!("[SYNTH] [{:2}] No percussion mapping for key {}", channel, key);
                return;
            };
            let trigger = TriggerEvent::new(
                percussion.timbre,
                percussion.key as i32,
                0,
                state.volume_for(velocity, key),
                state.pan_offset(),
            );
            self.sink.emit(trigger);
            return;
        }

        let Some(instrument) = self.catalog.instrument(state.program).copied() else {
            log::trace!("[SYNTH] [{:2}] No instrument for program {}", channel, state.program);
            return;
        };
        let note = RunningNote::new(key, velocity, state.tuning, &self.tunings);
        let trigger = TriggerEvent::new(
            instrument.timbre,
            key as i32 + instrument.octave_shift as i32 * 12,
            state.cents_for(&note),
            state.volume_for(velocity, key),
            state.pan_offset(),
        );
        self.sink.emit(trigger);

        if instrument.sustain {
            let state = &mut self.channels[channel as usize];
            state.pending_off.remove(&key);
            state.running.insert(key, note);
        }
    }

    fn note_off(&mut self, channel: u8, key: u8) {
        let state = &mut self.channels[channel as usize];
        if !state.running.contains_key(&key) {
            return;
        }
        if state.hold_pedal {
            state.pending_off.insert(key);
        } else {
            state.running.remove(&key);
        }
    }

    fn program_change(&mut self, channel: u8, program: u8) {
        log::trace!("[SYNTH] [{:2}] Program change: {}", channel, program);
        let state = &mut self.channels[channel as usize];
        state.program = program & 0x7F;
        state.poly_pressure = [127; 128];
        state.running.clear();
        state.pending_off.clear();
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let state = &mut self.channels[channel as usize];
        match controller {
            0 => state.bank = value,
            7 => state.volume = value,
            10 => state.pan = value,
            11 => state.expression = value,
            6 | 38 | 96 | 97 => self.data_entry(channel, controller, value),
            64 => {
                state.hold_pedal = value >= 64;
                state.flush_pending_off();
            }
            98 => state.select_nrpn(false, value),
            99 => state.select_nrpn(true, value),
            100 => state.select_rpn(false, value),
            101 => state.select_rpn(true, value),
            // All sound off
            120 => {
                state.running.clear();
                state.pending_off.clear();
            }
            121 => {
                state.hold_pedal = false;
                state.flush_pending_off();
            }
            // All notes off and mode messages
            123..=127 => {
                if state.hold_pedal {
                    let keys: Vec<u8> = state.running.keys().copied().collect();
                    state.pending_off.extend(keys);
                } else {
                    state.running.clear();
                }
            }
            _ => log::trace!(
                "[SYNTH] [{:2}] Unhandled control change: control {} data {}",
                channel,
                controller,
                value
            ),
        }
    }

    fn data_entry(&mut self, channel: u8, controller: u8, value: u8) {
        let state = &mut self.channels[channel as usize];
        let Some(parameter) = state.selected_parameter() else {
            return;
        };

        let current = state.parameter_value(parameter) as i32;
        let value = value as i32;
        let updated = match controller {
            6 => (current & 0x7F) | (value << 7),
            38 => (current & (0x7F << 7)) | value,
            96 | 97 => {
                let step = match parameter {
                    Parameter::Registered(
                        rpn::COARSE_TUNING | rpn::TUNING_PROGRAM | rpn::TUNING_BANK,
                    ) => 128,
                    _ => 1,
                };
                if controller == 96 {
                    current + step
                } else {
                    current - step
                }
            }
            _ => return,
        };
        let updated = updated.clamp(0, PARAMETER_NULL as i32) as u16;
        state.store_parameter(parameter, updated);

        match parameter {
            Parameter::Registered(number) => self.rpn_change(channel, number, updated),
            Parameter::NonRegistered(number) => {
                log::trace!("[SYNTH] [{:2}] NRPN {} = {}", channel, number, updated);
            }
        }
    }

    fn rpn_change(&mut self, channel: u8, number: u16, value: u16) {
        let msb = ((value >> 7) & 0x7F) as u8;
        let lsb = (value & 0x7F) as u8;
        match number {
            rpn::PITCH_BEND_RANGE => {
                self.channels[channel as usize].bend_range_cents = msb as u16 * 100 + lsb as u16;
            }
            rpn::FINE_TUNING => {
                let cents = (value as f64 - 8192.0) / 8192.0 * 100.0;
                self.channels[channel as usize].fine_tuning_cents = cents;
            }
            rpn::COARSE_TUNING => {
                self.channels[channel as usize].coarse_tuning = msb as i8 - 64;
            }
            rpn::TUNING_PROGRAM => {
                let state = &mut self.channels[channel as usize];
                state.tuning_program = msb;
                let bank = state.tuning_bank;
                let id = self.tunings.patch(bank, msb);
                self.channels[channel as usize].tuning = id;
            }
            rpn::TUNING_BANK => {
                self.channels[channel as usize].tuning_bank = msb;
            }
            other => log::trace!("[SYNTH] [{:2}] Unhandled RPN {} = {}", channel, other, value),
        }
    }

    /// Recompute pitch offsets of running notes that reference `id`.
    fn refresh_running_notes(&mut self, id: TuningId) {
        for channel in self.channels.iter_mut() {
            for note in channel.running.values_mut() {
                if note.tuning == id {
                    note.refresh(&self.tunings);
                }
            }
        }
    }
}
