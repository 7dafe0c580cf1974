//! Per-channel controller state.

use crate::tuning::{TuningId, TuningRegistry};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Sentinel meaning "no parameter selected".
pub const PARAMETER_NULL: u16 = 16383;

/// Registered parameters the synthesizer acts on.
pub mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0;
    pub const FINE_TUNING: u16 = 1;
    pub const COARSE_TUNING: u16 = 2;
    pub const TUNING_PROGRAM: u16 = 3;
    pub const TUNING_BANK: u16 = 4;
}

const DEFAULT_VOLUME: u8 = 100;
const DEFAULT_BEND_RANGE_CENTS: u16 = 200;

/// A sustained note; identity is its key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunningNote {
    pub key: u8,
    pub velocity: u8,
    pub tuning: TuningId,
    /// Offset from equal temperament in semitones, derived from `tuning`.
    pub pitch_offset: f64,
}

impl RunningNote {
    pub fn new(key: u8, velocity: u8, tuning: TuningId, registry: &TuningRegistry) -> Self {
        Self {
            key,
            velocity,
            tuning,
            pitch_offset: registry.get(tuning).offset_semitones(key),
        }
    }

    /// Recompute the pitch offset after the referenced table changed.
    pub fn refresh(&mut self, registry: &TuningRegistry) {
        self.pitch_offset = registry.get(self.tuning).offset_semitones(self.key);
    }
}

/// Which parameter type data entry currently addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parameter {
    Registered(u16),
    NonRegistered(u16),
}

/// State of one MIDI channel.
#[derive(Clone, Debug)]
pub struct ChannelState {
    pub program: u8,
    pub bank: u8,
    /// Signed 14-bit bend, `-8192..=8191`.
    pub pitch_bend: i16,
    pub pressure: u8,
    pub poly_pressure: [u8; 128],
    pub volume: u8,
    pub expression: u8,
    pub pan: u8,
    pub hold_pedal: bool,
    pub rpn: u16,
    pub nrpn: u16,
    rpn_values: HashMap<u16, u16>,
    nrpn_values: HashMap<u16, u16>,
    pub tuning_bank: u8,
    pub tuning_program: u8,
    pub tuning: TuningId,
    pub bend_range_cents: u16,
    pub fine_tuning_cents: f64,
    pub coarse_tuning: i8,
    pub running: BTreeMap<u8, RunningNote>,
    pub pending_off: BTreeSet<u8>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            program: 0,
            bank: 0,
            pitch_bend: 0,
            pressure: 127,
            poly_pressure: [127; 128],
            volume: DEFAULT_VOLUME,
            expression: 127,
            pan: 64,
            hold_pedal: false,
            rpn: PARAMETER_NULL,
            nrpn: PARAMETER_NULL,
            rpn_values: HashMap::new(),
            nrpn_values: HashMap::new(),
            tuning_bank: 0,
            tuning_program: 0,
            tuning: TuningId::DEFAULT,
            bend_range_cents: DEFAULT_BEND_RANGE_CENTS,
            fine_tuning_cents: 0.0,
            coarse_tuning: 0,
            running: BTreeMap::new(),
            pending_off: BTreeSet::new(),
        }
    }
}

impl ChannelState {
    /// Attack volume for `velocity` on `key`, in `[0, 1]`.
    pub fn volume_for(&self, velocity: u8, key: u8) -> f32 {
        let poly = self.poly_pressure[(key & 0x7F) as usize];
        [velocity, poly, self.pressure, self.volume, self.expression]
            .iter()
            .map(|v| *v as f32 / 127.0)
            .product()
    }

    /// Pan offset from center.
    pub fn pan_offset(&self) -> i8 {
        self.pan as i8 - 64
    }

    /// Extra pitch for a note in cents: bend plus tuning-table offset plus
    /// channel fine and coarse tuning.
    pub fn cents_for(&self, note: &RunningNote) -> i32 {
        let bend = self.pitch_bend as f64 / 8192.0 * self.bend_range_cents as f64;
        let tuning = note.pitch_offset * 100.0
            + self.fine_tuning_cents
            + self.coarse_tuning as f64 * 100.0;
        (bend + tuning).round() as i32
    }

    /// Currently addressed parameter; RPN and NRPN are mutually exclusive.
    pub fn selected_parameter(&self) -> Option<Parameter> {
        if self.rpn != PARAMETER_NULL {
            Some(Parameter::Registered(self.rpn))
        } else if self.nrpn != PARAMETER_NULL {
            Some(Parameter::NonRegistered(self.nrpn))
        } else {
            None
        }
    }

    /// Accumulated 14-bit value of a parameter.
    pub fn parameter_value(&self, parameter: Parameter) -> u16 {
        let value = match parameter {
            Parameter::Registered(n) => self.rpn_values.get(&n),
            Parameter::NonRegistered(n) => self.nrpn_values.get(&n),
        };
        value.copied().unwrap_or(0)
    }

    pub(crate) fn store_parameter(&mut self, parameter: Parameter, value: u16) {
        match parameter {
            Parameter::Registered(n) => self.rpn_values.insert(n, value),
            Parameter::NonRegistered(n) => self.nrpn_values.insert(n, value),
        };
    }

    /// Select an RPN half; clears the NRPN selection.
    pub(crate) fn select_rpn(&mut self, msb: bool, value: u8) {
        self.rpn = set_half(self.rpn, msb, value);
        self.nrpn = PARAMETER_NULL;
    }

    /// Select an NRPN half; clears the RPN selection.
    pub(crate) fn select_nrpn(&mut self, msb: bool, value: u8) {
        self.nrpn = set_half(self.nrpn, msb, value);
        self.rpn = PARAMETER_NULL;
    }

    /// Release pending notes once the pedal is up.
    pub(crate) fn flush_pending_off(&mut self) {
        if self.hold_pedal {
            return;
        }
        for key in std::mem::take(&mut self.pending_off) {
            self.running.remove(&key);
        }
    }
}

fn set_half(current: u16, msb: bool, value: u8) -> u16 {
    let value = (value & 0x7F) as u16;
    if msb {
        (current & 0x7F) | (value << 7)
    } else {
        (current & (0x7F << 7)) | value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_halves() {
        let mut ch = ChannelState::default();
        ch.select_rpn(true, 0);
        assert_eq!(ch.rpn, 0x7F);
        ch.select_rpn(false, 3);
        assert_eq!(ch.rpn, 3);
        assert_eq!(ch.selected_parameter(), Some(Parameter::Registered(3)));

        ch.select_nrpn(true, 1);
        assert_eq!(ch.rpn, PARAMETER_NULL);
        assert_eq!(ch.nrpn, (1 << 7) | 0x7F);
    }

    #[test]
    fn test_default_volume() {
        let ch = ChannelState::default();
        let expected = (100.0 / 127.0) * (100.0 / 127.0);
        assert!((ch.volume_for(100, 60) - expected).abs() < 1e-6);
        assert_eq!(ch.pan_offset(), 0);
    }

    #[test]
    fn test_cents_include_bend_and_tuning() {
        let registry = TuningRegistry::new();
        let mut ch = ChannelState::default();
        let note = RunningNote::new(60, 100, TuningId::DEFAULT, &registry);
        assert_eq!(ch.cents_for(&note), 0);

        ch.pitch_bend = 4096;
        assert_eq!(ch.cents_for(&note), 100);

        ch.coarse_tuning = -1;
        ch.fine_tuning_cents = 25.0;
        assert_eq!(ch.cents_for(&note), 25);
    }
}
