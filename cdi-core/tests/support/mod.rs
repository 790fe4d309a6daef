#![allow(dead_code)]

use cdi_core::calibration::{CalibrationStore, NonVolatile};
use cdi_core::config::EngineConfig;
use cdi_core::engine::Ignition;
use cdi_core::ignition::{SparkChannel, SparkOutput};
use cdi_core::timer::{RawEvent, TIMER_UNITS, TimerPeripheral, TimerUnit, UnitSetup};

/// Timer peripheral that remembers what was programmed.
#[derive(Default)]
pub struct MockTimers {
    pub counters: [u16; TIMER_UNITS],
    pub applied: [Option<UnitSetup>; TIMER_UNITS],
    pub started: [bool; TIMER_UNITS],
    pub last_load: [Option<u16>; TIMER_UNITS],
}

impl TimerPeripheral for MockTimers {
    fn apply(&mut self, unit: TimerUnit, setup: &UnitSetup) {
        self.applied[unit.as_index()] = Some(*setup);
    }

    fn start(&mut self, unit: TimerUnit, _setup: &UnitSetup) {
        self.started[unit.as_index()] = true;
    }

    fn halt(&mut self, unit: TimerUnit) {
        self.started[unit.as_index()] = false;
    }

    fn load_counter(&mut self, unit: TimerUnit, value: u16) {
        self.counters[unit.as_index()] = value;
        self.last_load[unit.as_index()] = Some(value);
    }

    fn counter(&self, unit: TimerUnit) -> u16 {
        self.counters[unit.as_index()]
    }
}

/// Spark lines plus a count of rising edges per channel.
#[derive(Default)]
pub struct RecordingSpark {
    pub levels: [bool; 2],
    pub rising: [usize; 2],
}

impl SparkOutput for RecordingSpark {
    fn set(&mut self, channel: SparkChannel, high: bool) {
        let index = channel.as_index();
        if high && !self.levels[index] {
            self.rising[index] += 1;
        }
        self.levels[index] = high;
    }
}

/// EEPROM stand-in, erased to `0xFF`, counting physical byte writes.
pub struct MemoryNvm {
    pub bytes: [u8; 1024],
    pub writes: usize,
}

impl Default for MemoryNvm {
    fn default() -> Self {
        Self {
            bytes: [0xFF; 1024],
            writes: 0,
        }
    }
}

impl NonVolatile for MemoryNvm {
    fn read(&self, offset: usize, buffer: &mut [u8]) {
        buffer.copy_from_slice(&self.bytes[offset..offset + buffer.len()]);
    }

    fn update(&mut self, offset: usize, data: &[u8]) {
        for (stored, &byte) in self.bytes[offset..].iter_mut().zip(data) {
            if *stored != byte {
                *stored = byte;
                self.writes += 1;
            }
        }
    }
}

pub type Engine = Ignition<MockTimers, RecordingSpark>;

/// Engine on the reference configuration with its meter armed.
pub fn started_engine(calibration: CalibrationStore) -> Engine {
    let mut engine = Ignition::new(
        MockTimers::default(),
        RecordingSpark::default(),
        calibration,
        EngineConfig::DEFAULT,
    );
    engine.start().expect("meter fits timer1");
    engine
}

/// Feeds tooth periods (in meter ticks) through the capture vector.
pub fn feed(engine: &mut Engine, periods: &[u16]) {
    for &ticks in periods {
        engine.on_interrupt(TimerUnit::Timer1, RawEvent::Capture(ticks));
    }
}
