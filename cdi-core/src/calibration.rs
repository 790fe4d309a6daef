//! Calibration table of (speed, timing) breakpoints plus the global shift.
//!
//! The store is a plain RAM image. Setters validate bounds and mark the image
//! dirty; nothing reaches non-volatile memory until [`CalibrationStore::commit`]
//! writes it through [`NonVolatile::update`], which only touches bytes that
//! changed.

use core::fmt;

use crate::ignition::{VALUE_MAX, delay_value};

/// Number of breakpoints in the table.
pub const TIMING_SLOTS: usize = 11;

/// Timing reported below the first breakpoint.
pub const UNDER_RANGE_TIMING: u8 = 5;

/// Timing reported at or above the last breakpoint.
pub const OVER_RANGE_TIMING: u8 = 32;

pub const DEFAULT_SHIFT: u8 = 5;

/// Bytes per persisted record: speed (u16, little endian) then timing.
pub const RECORD_BYTES: usize = 3;

/// Offset of the shift byte, directly after the table.
pub const SHIFT_OFFSET: usize = TIMING_SLOTS * RECORD_BYTES;

/// Size of the persisted block.
pub const IMAGE_BYTES: usize = SHIFT_OFFSET + 1;

const RPM_MIN: u16 = 60;
const RPM_LOW: u16 = 1_620;
const RPM_INCR: u16 = 240;
const RPM_HIGH: u16 = 3_540;
const RPM_MAX: u16 = 5_100;

/// One breakpoint: timing applies from `speed` (rpm) up to the next breakpoint.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TimingRecord {
    pub speed: u16,
    pub timing: u8,
}

impl TimingRecord {
    #[must_use]
    pub const fn new(speed: u16, timing: u8) -> Self {
        Self { speed, timing }
    }
}

/// Factory table shipped in a blank EEPROM image.
pub const DEFAULT_TABLE: [TimingRecord; TIMING_SLOTS] = [
    TimingRecord::new(RPM_MIN, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 2 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 3 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 4 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 5 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 6 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_LOW + 7 * RPM_INCR, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_HIGH, UNDER_RANGE_TIMING),
    TimingRecord::new(RPM_MAX, UNDER_RANGE_TIMING),
];

/// Rejected calibration access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeError {
    Slot(usize),
    Value(u8),
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeError::Slot(slot) => write!(f, "slot {slot} outside 0..{TIMING_SLOTS}"),
            RangeError::Value(value) => write!(f, "value {value} above {VALUE_MAX}"),
        }
    }
}

/// Rejected commit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommitError {
    /// Breakpoint `slot` is slower than the one before it.
    Unordered { slot: usize },
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Unordered { slot } => {
                write!(f, "breakpoint {slot} is below its predecessor")
            }
        }
    }
}

/// Byte-addressable non-volatile memory.
pub trait NonVolatile {
    fn read(&self, offset: usize, buffer: &mut [u8]);
    /// Writes `data` at `offset`, skipping bytes that already match.
    fn update(&mut self, offset: usize, data: &[u8]);
}

/// Where the table in RAM came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TableSource {
    Stored,
    /// Stored image was blank or corrupt.
    Defaults,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationStore {
    table: [TimingRecord; TIMING_SLOTS],
    shift: u8,
    dirty: bool,
    source: TableSource,
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self::factory()
    }
}

impl CalibrationStore {
    /// Factory defaults, not yet persisted.
    #[must_use]
    pub const fn factory() -> Self {
        Self {
            table: DEFAULT_TABLE,
            shift: DEFAULT_SHIFT,
            dirty: true,
            source: TableSource::Defaults,
        }
    }

    /// Reads the persisted image, falling back to defaults when invalid.
    pub fn load<M: NonVolatile>(memory: &M) -> Self {
        let mut image = [0u8; IMAGE_BYTES];
        memory.read(0, &mut image);
        Self::decode(&image).unwrap_or_else(Self::factory)
    }

    pub fn source(&self) -> TableSource {
        self.source
    }

    /// `true` when RAM differs from what was last committed or loaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn table(&self) -> &[TimingRecord; TIMING_SLOTS] {
        &self.table
    }

    /// # Errors
    ///
    /// [`RangeError::Slot`] for slots past the table.
    pub fn get(&self, slot: usize) -> Result<TimingRecord, RangeError> {
        self.table.get(slot).copied().ok_or(RangeError::Slot(slot))
    }

    /// # Errors
    ///
    /// [`RangeError::Slot`] for slots past the table and
    /// [`RangeError::Value`] for timings above [`VALUE_MAX`].
    pub fn set(&mut self, slot: usize, record: TimingRecord) -> Result<(), RangeError> {
        if record.timing > VALUE_MAX {
            return Err(RangeError::Value(record.timing));
        }
        let entry = self.table.get_mut(slot).ok_or(RangeError::Slot(slot))?;
        if *entry != record {
            *entry = record;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// # Errors
    ///
    /// [`RangeError::Value`] above [`VALUE_MAX`].
    pub fn set_shift(&mut self, shift: u8) -> Result<(), RangeError> {
        if shift > VALUE_MAX {
            return Err(RangeError::Value(shift));
        }
        if self.shift != shift {
            self.shift = shift;
            self.dirty = true;
        }
        Ok(())
    }

    /// Timing for `rpm`.
    ///
    /// The first breakpoint strictly above `rpm` closes the bracket and the
    /// slot before it applies, so a speed equal to a breakpoint uses that
    /// breakpoint's own timing.
    pub fn lookup(&self, rpm: u32) -> u8 {
        let Some(first) = self.table.first() else {
            return UNDER_RANGE_TIMING;
        };
        if rpm < u32::from(first.speed) {
            return UNDER_RANGE_TIMING;
        }
        self.table
            .windows(2)
            .find(|pair| rpm < u32::from(pair[1].speed))
            .map_or(OVER_RANGE_TIMING, |pair| pair[0].timing)
    }

    /// Scheduler delay value for `rpm` (`shift - timing`, clamped).
    pub fn delay_value(&self, rpm: u32) -> u8 {
        delay_value(self.shift, self.lookup(rpm))
    }

    /// Writes the image to `memory` and clears the dirty flag.
    ///
    /// # Errors
    ///
    /// [`CommitError::Unordered`] when speeds are not non-decreasing; nothing
    /// is written in that case.
    pub fn commit<M: NonVolatile>(&mut self, memory: &mut M) -> Result<(), CommitError> {
        if let Some(slot) = first_unordered(&self.table) {
            return Err(CommitError::Unordered { slot });
        }
        memory.update(0, &self.encode());
        self.dirty = false;
        self.source = TableSource::Stored;
        Ok(())
    }

    /// Clears the dirty flag if `committed` still matches RAM.
    pub fn mark_committed(&mut self, committed: &CalibrationStore) {
        if self.table == committed.table && self.shift == committed.shift {
            self.dirty = committed.dirty;
            self.source = committed.source;
        }
    }

    /// Serializes the persisted block.
    #[must_use]
    pub fn encode(&self) -> [u8; IMAGE_BYTES] {
        let mut image = [0u8; IMAGE_BYTES];
        for (chunk, record) in image.chunks_exact_mut(RECORD_BYTES).zip(&self.table) {
            let [low, high] = record.speed.to_le_bytes();
            chunk.copy_from_slice(&[low, high, record.timing]);
        }
        image[SHIFT_OFFSET] = self.shift;
        image
    }

    /// Parses a persisted block; `None` when any field is out of range.
    #[must_use]
    pub fn decode(image: &[u8; IMAGE_BYTES]) -> Option<Self> {
        let mut table = [TimingRecord::default(); TIMING_SLOTS];
        for (record, chunk) in table.iter_mut().zip(image.chunks_exact(RECORD_BYTES)) {
            *record = TimingRecord::new(u16::from_le_bytes([chunk[0], chunk[1]]), chunk[2]);
        }
        let shift = image[SHIFT_OFFSET];

        let timings_valid = table.iter().all(|record| record.timing <= VALUE_MAX);
        if !timings_valid || shift > VALUE_MAX || first_unordered(&table).is_some() {
            return None;
        }

        Some(Self {
            table,
            shift,
            dirty: false,
            source: TableSource::Stored,
        })
    }
}

fn first_unordered(table: &[TimingRecord]) -> Option<usize> {
    table
        .windows(2)
        .position(|pair| pair[1].speed < pair[0].speed)
        .map(|index| index + 1)
}
