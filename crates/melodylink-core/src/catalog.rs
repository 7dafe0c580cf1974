//! Instrument catalog.
//!
//! Maps General MIDI program numbers and percussion keys onto the small,
//! fixed palette of [`Timbre`]s an output device can render. The catalog is
//! built once and shared read-only behind an [`Arc`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// One of the sixteen output voices a sink can render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timbre {
    Harp,
    Bass,
    BassDrum,
    Snare,
    Hat,
    Guitar,
    Flute,
    Bell,
    Chime,
    Xylophone,
    IronXylophone,
    CowBell,
    Didgeridoo,
    Bit,
    Banjo,
    Pling,
}

impl Timbre {
    /// All timbres in wire order.
    pub const ALL: [Timbre; 16] = [
        Timbre::Harp,
        Timbre::Bass,
        Timbre::BassDrum,
        Timbre::Snare,
        Timbre::Hat,
        Timbre::Guitar,
        Timbre::Flute,
        Timbre::Bell,
        Timbre::Chime,
        Timbre::Xylophone,
        Timbre::IronXylophone,
        Timbre::CowBell,
        Timbre::Didgeridoo,
        Timbre::Bit,
        Timbre::Banjo,
        Timbre::Pling,
    ];

    /// Look up a timbre by its wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Wire index of this timbre.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Base sound name understood by sinks.
    pub fn name(self) -> &'static str {
        match self {
            Timbre::Harp => "harp",
            Timbre::Bass => "bass",
            Timbre::BassDrum => "basedrum",
            Timbre::Snare => "snare",
            Timbre::Hat => "hat",
            Timbre::Guitar => "guitar",
            Timbre::Flute => "flute",
            Timbre::Bell => "bell",
            Timbre::Chime => "chime",
            Timbre::Xylophone => "xylophone",
            Timbre::IronXylophone => "iron_xylophone",
            Timbre::CowBell => "cow_bell",
            Timbre::Didgeridoo => "didgeridoo",
            Timbre::Bit => "bit",
            Timbre::Banjo => "banjo",
            Timbre::Pling => "pling",
        }
    }
}

impl fmt::Display for Timbre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mapping for a melodic program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub timbre: Timbre,
    /// Octaves added to the incoming key before quantization.
    pub octave_shift: i8,
    /// Continuous-tone instruments are kept alive and re-triggered every tick.
    pub sustain: bool,
}

/// Mapping for a percussion key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Percussion {
    pub timbre: Timbre,
    /// Absolute key the trigger is played at.
    pub key: u8,
}

impl Percussion {
    /// Build a percussion entry from an offset into the playable window.
    fn at(timbre: Timbre, offset: u8) -> Self {
        Self {
            timbre,
            key: offset + crate::pitch::WINDOW_LOW as u8,
        }
    }
}

/// Program and percussion lookup tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrumentCatalog {
    instruments: BTreeMap<u8, Instrument>,
    percussion: BTreeMap<u8, Percussion>,
}

static GENERAL_MIDI: LazyLock<Arc<InstrumentCatalog>> =
    LazyLock::new(|| Arc::new(InstrumentCatalog::build_general_midi()));

impl InstrumentCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared General MIDI catalog.
    pub fn general_midi() -> Arc<Self> {
        Arc::clone(&GENERAL_MIDI)
    }

    /// Add or replace a program mapping.
    pub fn insert_instrument(&mut self, program: u8, instrument: Instrument) {
        self.instruments.insert(program, instrument);
    }

    /// Add or replace a percussion mapping.
    pub fn insert_percussion(&mut self, key: u8, percussion: Percussion) {
        self.percussion.insert(key, percussion);
    }

    /// Mapping for a program, if the palette can express it.
    pub fn instrument(&self, program: u8) -> Option<&Instrument> {
        self.instruments.get(&program)
    }

    /// Mapping for a percussion key, if the palette can express it.
    pub fn percussion(&self, key: u8) -> Option<&Percussion> {
        self.percussion.get(&key)
    }

    /// Program mappings in program order.
    pub fn instruments(&self) -> impl Iterator<Item = (u8, &Instrument)> {
        self.instruments.iter().map(|(program, inst)| (*program, inst))
    }

    /// Percussion mappings in key order.
    pub fn percussion_keys(&self) -> impl Iterator<Item = (u8, &Percussion)> {
        self.percussion.iter().map(|(key, perc)| (*key, perc))
    }

    fn build_general_midi() -> Self {
        use Timbre::*;

        let mut catalog = Self::new();

        // (program, timbre, octave shift, sustain)
        #[rustfmt::skip]
        let programs: &[(u8, Timbre, i8, bool)] = &[
            // Piano
            (0, Harp, -1, false), (1, Harp, 0, false), (2, Bit, 0, false), (3, Harp, 0, false),
            (4, Bit, 0, false), (5, Bit, 0, false), (6, Harp, 1, false), (7, Harp, 0, false),
            // Chromatic percussion
            (8, CowBell, -1, false), (9, CowBell, -1, false), (10, CowBell, -1, false), (11, CowBell, -1, false),
            (12, CowBell, 0, false), (13, Xylophone, 0, false), (14, Bell, -1, false), (15, Bell, 0, false),
            // Organ
            (16, Bass, 1, true), (17, Bass, 1, true), (18, Harp, 0, true), (19, Harp, 0, true),
            (20, Harp, 0, true), (21, Harp, 0, true), (22, Harp, 0, true), (23, Harp, 0, true),
            // Guitar (28 has no counterpart)
            (24, Guitar, 0, false), (25, Guitar, 0, false), (26, Guitar, 1, false), (27, Guitar, 0, false),
            (29, Guitar, -1, false), (30, Guitar, -1, false), (31, Guitar, 0, false),
            // Bass
            (32, Bass, 0, false), (33, Bass, 1, false), (34, Bass, 1, false), (35, Bass, 1, false),
            (36, Bass, 1, false), (37, Bass, 1, false), (38, Bass, 1, false), (39, Bass, 1, false),
            // Strings
            (40, Flute, -2, true), (41, Flute, -2, true), (42, Flute, -2, true), (43, Flute, -2, true),
            (44, Harp, 0, true), (45, Harp, 0, false), (46, Chime, 0, false), (47, Snare, 1, false),
            // Ensemble
            (48, Flute, -2, true), (49, Flute, -2, true), (50, Flute, -2, true), (51, Flute, -2, true),
            (52, Flute, -2, true), (53, Flute, -4, true), (54, Flute, -4, true), (55, Flute, 0, false),
            // Brass
            (56, Flute, -2, true), (57, Flute, -2, true), (58, Flute, -2, true), (59, Flute, -2, true),
            (60, Flute, -2, true), (61, Flute, -2, true), (62, Flute, -2, true), (63, Bass, 1, true),
            // Reed
            (64, Flute, -2, true), (65, Flute, -2, true), (66, Flute, -2, true), (67, Flute, -2, true),
            (68, Flute, -2, true), (69, Flute, -2, true), (70, Flute, -3, true), (71, Flute, -2, true),
            // Pipe
            (72, Flute, -3, true), (73, Flute, -3, true), (74, Flute, -3, true), (75, Flute, -3, true),
            (76, Flute, -3, true), (77, Flute, -3, true), (78, Flute, -3, true), (79, Flute, -3, true),
            // Synth lead
            (80, Flute, -2, true), (81, Flute, -2, true), (82, Flute, -2, true), (83, Flute, -2, true),
            (84, Flute, -2, true), (85, Flute, -2, true), (86, Flute, -2, true), (87, Flute, -1, true),
            // Synth pad
            (88, Harp, 0, true), (89, Harp, 0, true), (90, Harp, 0, true), (91, Harp, 0, true),
            (92, Harp, 0, true), (93, Harp, 0, true), (94, Harp, 0, true), (95, Harp, 0, true),
            // Synth effects (96, 97, 101-103 have no counterpart)
            (98, Bit, 0, false), (99, Harp, 0, true), (100, Harp, 0, false),
            // Ethnic
            (104, Banjo, 0, false), (105, Banjo, 0, false), (106, Banjo, 0, false), (107, Banjo, 0, false),
            (108, Bass, 1, false), (109, Harp, 0, true), (110, Harp, 0, true), (111, Harp, 0, true),
            // Percussive (119-126 have no counterpart)
            (112, Bell, 0, false), (113, Harp, 0, false), (114, IronXylophone, 0, false), (115, Hat, 0, false),
            (116, Snare, 0, false), (117, Snare, 0, false), (118, Snare, 0, false),
            (127, Harp, 0, false),
        ];

        for &(program, timbre, octave_shift, sustain) in programs {
            catalog.insert_instrument(
                program,
                Instrument {
                    timbre,
                    octave_shift,
                    sustain,
                },
            );
        }

        // (GM key, timbre, offset into the playable window)
        #[rustfmt::skip]
        let percussion: &[(u8, Timbre, u8)] = &[
            (35, BassDrum, 10), (36, BassDrum, 6), (37, Hat, 6), (38, Snare, 8),
            (39, Hat, 6), (40, Snare, 4), (41, BassDrum, 6), (42, Snare, 22),
            (43, BassDrum, 13), (44, Snare, 22), (45, BassDrum, 15), (46, Snare, 18),
            (47, BassDrum, 20), (48, BassDrum, 23), (49, Snare, 17), (50, BassDrum, 23),
            (51, Snare, 24), (52, Snare, 8), (53, Snare, 13), (54, Hat, 18),
            (55, Snare, 18), (56, Hat, 1), (57, Snare, 13), (58, Hat, 2),
            (59, Snare, 13), (60, Hat, 9), (61, Hat, 2), (62, Hat, 8),
            (63, BassDrum, 22), (64, BassDrum, 15), (65, Snare, 13), (66, Snare, 8),
            (67, Hat, 8), (68, Hat, 3), (69, Hat, 20), (70, Hat, 23),
            (73, Hat, 17), (74, Hat, 11), (75, Hat, 18), (76, Hat, 9),
            (77, Hat, 5), (80, Hat, 17), (81, Hat, 22), (82, Snare, 22),
            (85, Hat, 21), (86, BassDrum, 14), (87, BassDrum, 7),
        ];

        for &(key, timbre, offset) in percussion {
            catalog.insert_percussion(key, Percussion::at(timbre, offset));
        }

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timbre_index_roundtrip() {
        for timbre in Timbre::ALL {
            assert_eq!(Timbre::from_index(timbre.index()), Some(timbre));
        }
        assert_eq!(Timbre::from_index(16), None);
        assert_eq!(Timbre::IronXylophone.to_string(), "iron_xylophone");
    }

    #[test]
    fn test_general_midi_programs() {
        let catalog = InstrumentCatalog::general_midi();

        let piano = catalog.instrument(0).unwrap();
        assert_eq!(piano.timbre, Timbre::Harp);
        assert_eq!(piano.octave_shift, -1);
        assert!(!piano.sustain);

        let strings = catalog.instrument(40).unwrap();
        assert_eq!(strings.timbre, Timbre::Flute);
        assert_eq!(strings.octave_shift, -2);
        assert!(strings.sustain);

        // Unmapped programs are simply absent.
        assert!(catalog.instrument(28).is_none());
        assert!(catalog.instrument(120).is_none());
        assert_eq!(catalog.instruments().count(), 114);
        assert_eq!(catalog.percussion_keys().count(), 47);
    }

    #[test]
    fn test_general_midi_percussion() {
        let catalog = InstrumentCatalog::general_midi();

        let kick = catalog.percussion(35).unwrap();
        assert_eq!(kick.timbre, Timbre::BassDrum);
        assert_eq!(kick.key, 43);

        assert!(catalog.percussion(71).is_none());
        assert!(catalog.percussion(34).is_none());
    }

    #[test]
    fn test_shared_instance() {
        let a = InstrumentCatalog::general_midi();
        let b = InstrumentCatalog::general_midi();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
