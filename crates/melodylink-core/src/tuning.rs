//! MIDI Tuning Standard tables.
//!
//! A [`TuningTable`] maps each of the 128 keys to an absolute pitch in cents.
//! Tables addressed by `(bank, program)` live in a [`TuningRegistry`] and are
//! referenced by [`TuningId`] handles, so running notes see in-place updates.
//!
//! System exclusive payloads handed to [`TuningTable::load`] start after the
//! `F0` status byte and exclude the trailing `F7`:
//! `[7E|7F, device, 08, format, ...]`.

use crate::error::{Error, Result};
use std::collections::HashMap;

const KEYS: usize = 128;
const NAME_LEN: usize = 16;

/// Absolute cents for every key.
#[derive(Clone, Debug, PartialEq)]
pub struct TuningTable {
    name: String,
    cents: [f64; KEYS],
}

impl Default for TuningTable {
    fn default() -> Self {
        let mut cents = [0.0; KEYS];
        for (key, value) in cents.iter_mut().enumerate() {
            *value = key as f64 * 100.0;
        }
        Self {
            name: String::new(),
            cents,
        }
    }
}

impl TuningTable {
    /// Equal-tempered identity table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a fresh table from a tuning dump.
    pub fn from_sysex(data: &[u8]) -> Result<Self> {
        let mut table = Self::new();
        table.load(data)?;
        Ok(table)
    }

    /// Table name, if the dump carried one.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute pitch of `key` in cents.
    pub fn cents(&self, key: u8) -> f64 {
        self.cents[(key as usize) & (KEYS - 1)]
    }

    /// Offset of `key` from equal temperament, in semitones.
    pub fn offset_semitones(&self, key: u8) -> f64 {
        self.cents(key) / 100.0 - key as f64
    }

    /// Apply a tuning message to this table.
    pub fn load(&mut self, data: &[u8]) -> Result<()> {
        let format = byte(data, 3)?;
        match format {
            // Bulk dump: program, 16-byte name, 128 key entries.
            0x01 => {
                self.name = read_name(data, 5)?;
                self.load_key_entries(data, 21, KEYS, false)
            }
            // Single note change: program, count, (key, entry)*.
            0x02 => {
                let count = byte(data, 5)? as usize;
                self.load_key_entries(data, 6, count, true)
            }
            // Key-based dump with bank.
            0x04 => {
                verify_checksum(data)?;
                self.name = read_name(data, 6)?;
                self.load_key_entries(data, 22, KEYS, false)
            }
            // Scale/octave dumps with bank.
            0x05 => {
                verify_checksum(data)?;
                self.name = read_name(data, 6)?;
                self.load_octave_1byte(data, 22)
            }
            0x06 => {
                verify_checksum(data)?;
                self.name = read_name(data, 6)?;
                self.load_octave_2byte(data, 22)
            }
            // Single note change with bank.
            0x07 => {
                let count = byte(data, 6)? as usize;
                self.load_key_entries(data, 7, count, true)
            }
            // Scale/octave with a channel mask.
            0x08 => self.load_octave_1byte(data, 7),
            0x09 => self.load_octave_2byte(data, 7),
            other => Err(Error::SysEx(format!("unsupported tuning format {:#04x}", other))),
        }
    }

    /// Key entries are `xx yy zz`: semitone plus a 14-bit fraction. `7F 7F 7F`
    /// leaves the key unchanged. Addressed entries carry a leading key byte.
    fn load_key_entries(
        &mut self,
        data: &[u8],
        start: usize,
        count: usize,
        addressed: bool,
    ) -> Result<()> {
        let stride = if addressed { 4 } else { 3 };
        for i in 0..count {
            let at = start + i * stride;
            let (key, at) = if addressed {
                (byte(data, at)? as usize, at + 1)
            } else {
                (i, at)
            };
            let (xx, yy, zz) = (byte(data, at)?, byte(data, at + 1)?, byte(data, at + 2)?);
            if xx == 0x7F && yy == 0x7F && zz == 0x7F {
                continue;
            }
            let value = xx as f64 * 16384.0 + yy as f64 * 128.0 + zz as f64;
            self.cents[key & (KEYS - 1)] = 100.0 * (value / 16384.0);
        }
        Ok(())
    }

    /// Twelve signed cent offsets, centered at 64.
    fn load_octave_1byte(&mut self, data: &[u8], start: usize) -> Result<()> {
        let mut octave = [0.0; 12];
        for (i, offset) in octave.iter_mut().enumerate() {
            *offset = byte(data, start + i)? as f64 - 64.0;
        }
        self.apply_octave(&octave);
        Ok(())
    }

    /// Twelve 14-bit offsets, centered at 8192, spanning ±100 cents.
    fn load_octave_2byte(&mut self, data: &[u8], start: usize) -> Result<()> {
        let mut octave = [0.0; 12];
        for (i, offset) in octave.iter_mut().enumerate() {
            let msb = byte(data, start + i * 2)? as f64;
            let lsb = byte(data, start + i * 2 + 1)? as f64;
            *offset = ((msb * 128.0 + lsb) / 8192.0 - 1.0) * 100.0;
        }
        self.apply_octave(&octave);
        Ok(())
    }

    fn apply_octave(&mut self, octave: &[f64; 12]) {
        for (key, value) in self.cents.iter_mut().enumerate() {
            *value = key as f64 * 100.0 + octave[key % 12];
        }
    }
}

fn byte(data: &[u8], index: usize) -> Result<u8> {
    data.get(index)
        .copied()
        .ok_or_else(|| Error::SysEx(format!("truncated tuning message ({} bytes)", data.len())))
}

fn read_name(data: &[u8], start: usize) -> Result<String> {
    let raw = data
        .get(start..start + NAME_LEN)
        .ok_or_else(|| Error::SysEx("truncated tuning name".to_string()))?;
    Ok(String::from_utf8_lossy(raw).trim_end().to_string())
}

/// XOR of every byte before the checksum, masked to 7 bits.
fn verify_checksum(data: &[u8]) -> Result<()> {
    let (checksum, body) = data
        .split_last()
        .ok_or_else(|| Error::SysEx("empty tuning message".to_string()))?;
    let computed = body.iter().fold(0u8, |acc, b| acc ^ b) & 0x7F;
    if computed == checksum & 0x7F {
        Ok(())
    } else {
        Err(Error::SysEx(format!(
            "tuning checksum mismatch: expected {:#04x}, got {:#04x}",
            checksum & 0x7F,
            computed
        )))
    }
}

/// Handle to a table in a [`TuningRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TuningId(usize);

impl TuningId {
    /// The shared equal-tempered table.
    pub const DEFAULT: TuningId = TuningId(0);
}

/// Arena of tuning tables plus the `(bank, program)` index.
///
/// Unaddressed tables can be released; their slots are reused by later
/// inserts.
#[derive(Debug)]
pub struct TuningRegistry {
    tables: Vec<TuningTable>,
    patches: HashMap<u16, TuningId>,
    free: Vec<usize>,
}

impl Default for TuningRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TuningRegistry {
    /// Create a registry holding only the default table.
    pub fn new() -> Self {
        Self {
            tables: vec![TuningTable::default()],
            patches: HashMap::new(),
            free: Vec::new(),
        }
    }

    /// Table behind a handle; stale handles fall back to the default table.
    pub fn get(&self, id: TuningId) -> &TuningTable {
        self.tables.get(id.0).unwrap_or(&self.tables[0])
    }

    /// Mutable access to the table behind a handle.
    pub fn get_mut(&mut self, id: TuningId) -> Option<&mut TuningTable> {
        self.tables.get_mut(id.0)
    }

    /// Handle for `(bank, program)`, creating an identity table on first use.
    ///
    /// Repeated calls return the same handle until [`clear`](Self::clear).
    pub fn patch(&mut self, bank: u8, program: u8) -> TuningId {
        let index = ((bank as u16) << 8) | program as u16;
        if let Some(id) = self.patches.get(&index) {
            return *id;
        }
        let id = self.insert(TuningTable::default());
        self.patches.insert(index, id);
        id
    }

    /// Store an unaddressed table and return its handle.
    pub fn insert(&mut self, table: TuningTable) -> TuningId {
        if let Some(index) = self.free.pop() {
            self.tables[index] = table;
            return TuningId(index);
        }
        self.tables.push(table);
        TuningId(self.tables.len() - 1)
    }

    /// Handles of live unaddressed tables.
    pub fn unaddressed(&self) -> Vec<TuningId> {
        (1..self.tables.len())
            .map(TuningId)
            .filter(|id| !self.free.contains(&id.0))
            .filter(|id| !self.patches.values().any(|p| p == id))
            .collect()
    }

    /// Give an unaddressed table's slot back. The default table and tables
    /// addressed by `(bank, program)` are kept.
    pub fn release(&mut self, id: TuningId) {
        if id == TuningId::DEFAULT
            || id.0 >= self.tables.len()
            || self.free.contains(&id.0)
            || self.patches.values().any(|p| *p == id)
        {
            return;
        }
        self.tables[id.0] = TuningTable::default();
        self.free.push(id.0);
    }

    /// Drop every table except the default one.
    pub fn clear(&mut self) {
        self.tables.truncate(1);
        self.patches.clear();
        self.free.clear();
    }

    /// Number of table slots, including the default and released ones.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Always false; the default table cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
