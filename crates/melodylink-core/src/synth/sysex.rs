//! Universal system exclusive dispatch: tuning dumps and GM mode messages.

use super::{GeneralMidiMode, Synthesizer};
use crate::error::{Error, Result};
use crate::trigger::NoteSink;
use crate::tuning::{TuningId, TuningTable};
use std::collections::HashSet;

const NON_REALTIME: u8 = 0x7E;
const REALTIME: u8 = 0x7F;
const ALL_DEVICES: u8 = 0x7F;

const SUB_TUNING: u8 = 0x08;
const SUB_GENERAL_MIDI: u8 = 0x09;

impl<S: NoteSink> Synthesizer<S> {
    /// Handle a system exclusive body (no `F0` status, no `F7` terminator).
    ///
    /// Messages for other manufacturers or devices are ignored.
    pub fn handle_sysex(&mut self, data: &[u8]) -> Result<()> {
        let (Some(&kind), Some(&device)) = (data.first(), data.get(1)) else {
            return Err(Error::SysEx("system exclusive message too short".to_string()));
        };
        if !matches!(kind, NON_REALTIME | REALTIME) || !matches!(device, ALL_DEVICES | 0x00) {
            log::trace!("[SYNTH] Ignoring system exclusive for {:#04x}/{:#04x}", kind, device);
            return Ok(());
        }
        let (Some(&sub1), Some(&sub2)) = (data.get(2), data.get(3)) else {
            return Err(Error::SysEx("system exclusive message missing sub-ids".to_string()));
        };
        let realtime = kind == REALTIME;

        match (realtime, sub1, sub2) {
            (false, SUB_GENERAL_MIDI, mode @ 0x01..=0x03) => {
                self.gm_mode = match mode {
                    0x01 => GeneralMidiMode::Level1,
                    0x02 => GeneralMidiMode::Off,
                    _ => GeneralMidiMode::Level2,
                };
                log::debug!("[SYNTH] General MIDI mode: {:?}", self.gm_mode);
                self.reset(false);
                Ok(())
            }
            // Bulk dump (program only) and single note change (program only)
            (false, SUB_TUNING, 0x01) | (true, SUB_TUNING, 0x02) => {
                let id = self.tunings.patch(0, byte(data, 4)?);
                self.load_tuning(id, data, realtime)
            }
            // Formats addressed by bank and program
            (false, SUB_TUNING, 0x04..=0x07) | (true, SUB_TUNING, 0x07) => {
                let id = self.tunings.patch(byte(data, 4)?, byte(data, 5)?);
                self.load_tuning(id, data, realtime)
            }
            // Scale/octave tuning sent to a channel mask
            (_, SUB_TUNING, 0x08 | 0x09) => {
                let mask = ((byte(data, 4)? as u32) << 14)
                    | ((byte(data, 5)? as u32) << 7)
                    | byte(data, 6)? as u32;
                let table = TuningTable::from_sysex(data)?;
                let id = self.tunings.insert(table);
                self.assign_masked(id, mask, realtime);
                self.release_unused_tunings();
                Ok(())
            }
            _ => {
                log::trace!(
                    "[SYNTH] Unhandled universal system exclusive {:#04x} {:#04x} {:#04x}",
                    kind,
                    sub1,
                    sub2
                );
                Ok(())
            }
        }
    }

    /// Apply a tuning message to the table behind `id`, all or nothing.
    fn load_tuning(&mut self, id: TuningId, data: &[u8], refresh: bool) -> Result<()> {
        let mut table = self.tunings.get(id).clone();
        table.load(data)?;
        log::debug!("[SYNTH] Loaded tuning {:?} '{}'", id, table.name());
        if let Some(slot) = self.tunings.get_mut(id) {
            *slot = table;
        }
        if refresh {
            self.refresh_running_notes(id);
        }
        Ok(())
    }

    /// Point every channel selected by `mask` at `id`. Real-time messages
    /// also retarget the channels' running notes.
    fn assign_masked(&mut self, id: TuningId, mask: u32, realtime: bool) {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            if mask & (1 << index) == 0 {
                continue;
            }
            channel.tuning = id;
            if realtime {
                for note in channel.running.values_mut() {
                    note.tuning = id;
                    note.refresh(&self.tunings);
                }
            }
        }
    }

    /// Free unaddressed tables no channel or running note refers to.
    fn release_unused_tunings(&mut self) {
        let referenced: HashSet<TuningId> = self
            .channels
            .iter()
            .flat_map(|c| {
                std::iter::once(c.tuning).chain(c.running.values().map(|n| n.tuning))
            })
            .collect();
        for id in self.tunings.unaddressed() {
            if !referenced.contains(&id) {
                self.tunings.release(id);
            }
        }
    }
}

fn byte(data: &[u8], index: usize) -> Result<u8> {
    data.get(index)
        .copied()
        .ok_or_else(|| Error::SysEx(format!("truncated system exclusive ({} bytes)", data.len())))
}

#[cfg(test)]
mod tests {
    use super::super::tests::sustaining_synth;
    use super::*;
    use crate::event::{ChannelEvent, MetaEvent};
    use crate::tuning::tests::single_note_change;

    fn on(key: u8) -> ChannelEvent {
        ChannelEvent::NoteOn { key, velocity: 100 }
    }

    fn octave_2byte(realtime: bool, mask: [u8; 3], first_offset: u16) -> Vec<u8> {
        let kind = if realtime { REALTIME } else { NON_REALTIME };
        let mut data = vec![kind, ALL_DEVICES, SUB_TUNING, 0x09, mask[0], mask[1], mask[2]];
        for i in 0..12 {
            let value = if i == 0 { first_offset } else { 8192 };
            data.extend_from_slice(&[(value >> 7) as u8, (value & 0x7F) as u8]);
        }
        data
    }

    #[test]
    fn test_gm_mode_messages() {
        let mut synth = sustaining_synth();
        synth.handle_sysex(&[0x7E, 0x7F, 0x09, 0x01]).unwrap();
        assert_eq!(synth.general_midi_mode(), GeneralMidiMode::Level1);
        synth.handle_sysex(&[0x7E, 0x00, 0x09, 0x03]).unwrap();
        assert_eq!(synth.general_midi_mode(), GeneralMidiMode::Level2);
        synth.handle_sysex(&[0x7E, 0x7F, 0x09, 0x02]).unwrap();
        assert_eq!(synth.general_midi_mode(), GeneralMidiMode::Off);
    }

    #[test]
    fn test_other_devices_are_ignored() {
        let mut synth = sustaining_synth();
        synth.handle_sysex(&[0x7E, 0x10, 0x09, 0x01]).unwrap();
        synth.handle_sysex(&[0x43, 0x10, 0x4C, 0x00]).unwrap();
        assert_eq!(synth.general_midi_mode(), GeneralMidiMode::Off);
        assert!(synth.handle_sysex(&[0x7E]).is_err());
    }

    #[test]
    fn test_realtime_single_note_refreshes_running_notes() {
        let mut synth = sustaining_synth();
        // Channel 0 selects tuning program 0 in bank 0.
        for (controller, value) in [(101, 0), (100, 3), (6, 0)] {
            synth.handle_event(0, ChannelEvent::ControlChange { controller, value });
        }
        synth.handle_event(0, on(45));
        synth.handle_event(1, on(45));
        assert_eq!(synth.channel(0).running[&45].pitch_offset, 0.0);

        // Retune key 45 up half a semitone.
        synth.handle_sysex(&single_note_change(0, &[(45, 45, 8192)])).unwrap();
        assert!((synth.channel(0).running[&45].pitch_offset - 0.5).abs() < 1e-9);
        // Channel 1 still uses the default table.
        assert_eq!(synth.channel(1).running[&45].pitch_offset, 0.0);

        synth.handle_event(0, on(45));
        assert!((synth.sink()[2].pitch - 2f32.powf(0.5 / 12.0)).abs() < 1e-4);
    }

    #[test]
    fn test_masked_realtime_tuning_retargets_channels() {
        let mut synth = sustaining_synth();
        synth.handle_event(0, on(45));
        synth.handle_event(1, on(45));
        synth.handle_event(2, on(45));

        // Channels 0 and 2; +50 cents on A (key 45 is an A).
        let mut data = octave_2byte(true, [0x00, 0x00, 0b101], 8192);
        let a = 9 * 2;
        let value: u16 = 8192 + 4096;
        data[7 + a] = (value >> 7) as u8;
        data[8 + a] = (value & 0x7F) as u8;
        synth.handle_sysex(&data).unwrap();

        assert_ne!(synth.channel(0).tuning, synth.channel(1).tuning);
        assert_eq!(synth.channel(0).tuning, synth.channel(2).tuning);
        assert!((synth.channel(0).running[&45].pitch_offset - 0.5).abs() < 1e-9);
        assert!((synth.channel(2).running[&45].pitch_offset - 0.5).abs() < 1e-9);
        assert_eq!(synth.channel(1).running[&45].pitch_offset, 0.0);
    }

    #[test]
    fn test_repeated_masked_tuning_reuses_tables() {
        let mut synth = sustaining_synth();
        synth.handle_event(0, on(45));
        synth.handle_sysex(&octave_2byte(true, [0x00, 0x00, 0x01], 8192)).unwrap();
        let slots = synth.tunings().len();

        for offset in 8000..8100 {
            synth.handle_sysex(&octave_2byte(true, [0x00, 0x00, 0x01], offset)).unwrap();
        }
        assert!(synth.tunings().len() <= slots + 1);
        assert_eq!(synth.tunings().unaddressed(), vec![synth.channel(0).tuning]);

        // A non-realtime change keeps the running note on its old table.
        synth.handle_sysex(&octave_2byte(false, [0x00, 0x00, 0x01], 8192)).unwrap();
        assert_eq!(synth.tunings().unaddressed().len(), 2);
    }

    #[test]
    fn test_non_realtime_mask_leaves_running_notes() {
        let mut synth = sustaining_synth();
        synth.handle_event(0, on(45));
        synth.handle_sysex(&octave_2byte(false, [0x00, 0x00, 0x01], 8192)).unwrap();
        assert_ne!(synth.channel(0).tuning, TuningId::DEFAULT);
        assert_eq!(synth.channel(0).running[&45].tuning, TuningId::DEFAULT);
    }

    #[test]
    fn test_malformed_tuning_is_logged_and_ignored() {
        let mut synth = sustaining_synth();
        let before = synth.tunings().len();
        // Single note change claiming two entries but carrying one.
        let mut data = single_note_change(0, &[(60, 61, 0)]);
        data[5] = 2;
        synth.handle_meta(&MetaEvent::SysEx(data.clone()));
        assert!(synth.handle_sysex(&data).is_err());
        // Only the patch slot was created; its table is untouched.
        assert!(synth.tunings().len() <= before + 1);
        assert_eq!(synth.tunings().get(TuningId::DEFAULT).cents(60), 6000.0);
    }
}
