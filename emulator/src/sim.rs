//! Cycle-counting stand-ins for the ATmega328P peripherals.
//!
//! Time is measured in CPU cycles at the system clock. Each timer unit keeps
//! its counter and the cycles left over from its last prescaled tick, so
//! advancing the whole bench by any number of cycles stays exact.

use cdi_core::calibration::NonVolatile;
use cdi_core::config::SYSTEM_CLOCK_HZ;
use cdi_core::ignition::{SparkChannel, SparkOutput};
use cdi_core::timer::{
    OutputMode, RawEvent, TIMER_UNITS, TimerMode, TimerPeripheral, TimerUnit, UnitSetup,
};

/// Size of the on-chip EEPROM.
pub const EEPROM_BYTES: usize = 1024;

const CAPTURE_SPAN: u32 = 0x1_0000;

#[derive(Clone, Copy, Debug, Default)]
struct SimUnit {
    setup: Option<UnitSetup>,
    running: bool,
    counter: u32,
    residue: u64,
    pin: bool,
}

impl SimUnit {
    /// Next interrupt this unit raises and the ticks until it does.
    fn next_event(&self) -> Option<(u64, RawEvent)> {
        let setup = self.setup.filter(|_| self.running)?;
        let top = u32::from(setup.top);
        let compare_b = u32::from(setup.compare_b);
        let (ticks, event) = match setup.mode {
            TimerMode::Capture => (
                CAPTURE_SPAN - self.counter.min(CAPTURE_SPAN - 1),
                RawEvent::Overflow,
            ),
            TimerMode::Periodic => (top + 1 - self.counter.min(top), RawEvent::CompareA),
            TimerMode::Pwm if compare_b < top && self.counter <= compare_b => {
                (compare_b + 1 - self.counter, RawEvent::CompareB)
            }
            TimerMode::Pwm => (top + 1 - self.counter.min(top), RawEvent::CompareA),
        };
        Some((u64::from(ticks), event))
    }

    fn cycles_until(&self, ticks: u64) -> u64 {
        let prescale = self.setup.map_or(1, |setup| u64::from(setup.prescale));
        (ticks * prescale).saturating_sub(self.residue)
    }

    fn advance(&mut self, cycles: u64) {
        let Some(setup) = self.setup.filter(|_| self.running) else {
            return;
        };
        let total = self.residue + cycles;
        let prescale = u64::from(setup.prescale);
        let ticks = u32::try_from(total / prescale).unwrap_or(u32::MAX);
        self.residue = total % prescale;
        self.counter = self.counter.saturating_add(ticks);
    }

    fn complete(&mut self, event: RawEvent) {
        match event {
            RawEvent::CompareA | RawEvent::Overflow => {
                self.counter = 0;
                if self
                    .setup
                    .is_some_and(|setup| setup.output == OutputMode::Toggle)
                {
                    self.pin = !self.pin;
                }
            }
            RawEvent::CompareB | RawEvent::Capture(_) => {}
        }
    }
}

/// Timer peripheral whose counters advance with simulated time.
#[derive(Clone, Debug, Default)]
pub struct SimTimers {
    units: [SimUnit; TIMER_UNITS],
    toggles: [u32; TIMER_UNITS],
}

impl SimTimers {
    /// Earliest pending interrupt across all units, in cycles from now.
    pub fn next_event(&self) -> Option<(u64, TimerUnit, RawEvent)> {
        TimerUnit::ALL
            .iter()
            .filter_map(|&unit| {
                let state = &self.units[unit.as_index()];
                state
                    .next_event()
                    .map(|(ticks, event)| (state.cycles_until(ticks), unit, event))
            })
            .min_by_key(|&(cycles, unit, _)| (cycles, unit.as_index()))
    }

    pub fn advance(&mut self, cycles: u64) {
        for unit in &mut self.units {
            unit.advance(cycles);
        }
    }

    /// Applies the hardware side effects of `event` before it is dispatched.
    pub fn complete(&mut self, unit: TimerUnit, event: RawEvent) {
        let state = &mut self.units[unit.as_index()];
        let before = state.pin;
        state.complete(event);
        if state.pin != before {
            self.toggles[unit.as_index()] += 1;
        }
    }

    /// Output pin toggles produced by `unit` so far.
    pub fn toggles(&self, unit: TimerUnit) -> u32 {
        self.toggles[unit.as_index()]
    }

    pub fn is_running(&self, unit: TimerUnit) -> bool {
        self.units[unit.as_index()].running
    }
}

impl TimerPeripheral for SimTimers {
    fn apply(&mut self, unit: TimerUnit, setup: &UnitSetup) {
        let state = &mut self.units[unit.as_index()];
        state.setup = Some(*setup);
        state.residue = 0;
    }

    fn start(&mut self, unit: TimerUnit, setup: &UnitSetup) {
        let state = &mut self.units[unit.as_index()];
        state.setup = Some(*setup);
        state.running = true;
    }

    fn halt(&mut self, unit: TimerUnit) {
        let state = &mut self.units[unit.as_index()];
        state.running = false;
        state.residue = 0;
    }

    fn load_counter(&mut self, unit: TimerUnit, value: u16) {
        self.units[unit.as_index()].counter = u32::from(value);
    }

    fn counter(&self, unit: TimerUnit) -> u16 {
        u16::try_from(self.units[unit.as_index()].counter).unwrap_or(u16::MAX)
    }
}

/// Spark lines counting rising edges.
#[derive(Clone, Debug, Default)]
pub struct SimSpark {
    levels: [bool; 2],
    fired: [u32; 2],
}

impl SimSpark {
    pub fn level(&self, channel: SparkChannel) -> bool {
        self.levels[channel.as_index()]
    }

    pub fn fired(&self, channel: SparkChannel) -> u32 {
        self.fired[channel.as_index()]
    }

    pub fn fired_counts(&self) -> [u32; 2] {
        self.fired
    }
}

impl SparkOutput for SimSpark {
    fn set(&mut self, channel: SparkChannel, high: bool) {
        let index = channel.as_index();
        if high && !self.levels[index] {
            self.fired[index] += 1;
        }
        self.levels[index] = high;
    }
}

/// Four-tooth sensor wheel with one short gap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ToothWheel {
    rpm: u32,
    /// Relative gap before each tooth.
    gaps: [u32; 4],
    next_tooth: usize,
}

impl Default for ToothWheel {
    fn default() -> Self {
        Self::new([26, 26, 22, 26])
    }
}

impl ToothWheel {
    #[must_use]
    pub fn new(gaps: [u32; 4]) -> Self {
        Self {
            rpm: 0,
            gaps,
            next_tooth: 0,
        }
    }

    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    pub fn set_rpm(&mut self, rpm: u32) {
        self.rpm = rpm;
    }

    pub fn gaps(&self) -> [u32; 4] {
        self.gaps
    }

    /// Cycles per crank revolution, `None` while stopped.
    pub fn revolution_cycles(&self) -> Option<u64> {
        (self.rpm > 0).then(|| u64::from(SYSTEM_CLOCK_HZ) * 60 / u64::from(self.rpm))
    }

    /// Cycles from the previous tooth to the next one.
    pub fn next_gap(&self) -> Option<u64> {
        let revolution = self.revolution_cycles()?;
        let total: u32 = self.gaps.iter().sum();
        let gap = self.gaps[self.next_tooth];
        Some(revolution * u64::from(gap) / u64::from(total.max(1)))
    }

    pub fn pass_tooth(&mut self) {
        self.next_tooth = (self.next_tooth + 1) % self.gaps.len();
    }
}

/// EEPROM image, erased to `0xFF`, counting physical byte writes.
#[derive(Clone, Debug)]
pub struct Eeprom {
    bytes: [u8; EEPROM_BYTES],
    writes: usize,
}

impl Default for Eeprom {
    fn default() -> Self {
        Self {
            bytes: [0xFF; EEPROM_BYTES],
            writes: 0,
        }
    }
}

impl Eeprom {
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl NonVolatile for Eeprom {
    fn read(&self, offset: usize, buffer: &mut [u8]) {
        let start = offset.min(EEPROM_BYTES);
        let end = (start + buffer.len()).min(EEPROM_BYTES);
        let available = end - start;
        buffer[..available].copy_from_slice(&self.bytes[start..end]);
        buffer[available..].fill(0xFF);
    }

    fn update(&mut self, offset: usize, data: &[u8]) {
        for (stored, &byte) in self.bytes.iter_mut().skip(offset).zip(data) {
            if *stored != byte {
                *stored = byte;
                self.writes += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn periodic(prescale: u16, top: u16) -> UnitSetup {
        UnitSetup {
            mode: TimerMode::Periodic,
            prescale,
            top,
            compare_b: top,
            output: OutputMode::Toggle,
        }
    }

    #[test]
    fn periodic_unit_fires_after_preloaded_remainder() {
        let mut timers = SimTimers::default();
        let setup = periodic(1024, 156);
        timers.apply(TimerUnit::Timer0, &setup);
        timers.load_counter(TimerUnit::Timer0, 131);
        timers.start(TimerUnit::Timer0, &setup);

        assert_eq!(
            timers.next_event(),
            Some((26 * 1024, TimerUnit::Timer0, RawEvent::CompareA))
        );

        timers.advance(1_000);
        assert_eq!(
            timers.next_event(),
            Some((26 * 1024 - 1_000, TimerUnit::Timer0, RawEvent::CompareA))
        );
    }

    #[test]
    fn toggle_output_flips_on_compare() {
        let mut timers = SimTimers::default();
        let setup = periodic(8, 199);
        timers.apply(TimerUnit::Timer2, &setup);
        timers.start(TimerUnit::Timer2, &setup);

        for _ in 0..3 {
            let (cycles, unit, event) = timers.next_event().expect("running");
            assert_eq!(cycles, 1_600);
            timers.advance(cycles);
            timers.complete(unit, event);
        }
        assert_eq!(timers.toggles(TimerUnit::Timer2), 3);
    }

    #[test]
    fn pwm_raises_compare_b_before_period_end() {
        let mut timers = SimTimers::default();
        let setup = UnitSetup {
            mode: TimerMode::Pwm,
            prescale: 64,
            top: 249,
            compare_b: 124,
            output: OutputMode::None,
        };
        timers.apply(TimerUnit::Timer0, &setup);
        timers.start(TimerUnit::Timer0, &setup);

        let (cycles, unit, event) = timers.next_event().expect("running");
        assert_eq!((cycles, event), (125 * 64, RawEvent::CompareB));
        timers.advance(cycles);
        timers.complete(unit, event);

        let (cycles, _, event) = timers.next_event().expect("running");
        assert_eq!((cycles, event), (125 * 64, RawEvent::CompareA));
    }

    #[test]
    fn wheel_splits_revolution_by_gaps() {
        let mut wheel = ToothWheel::default();
        assert_eq!(wheel.next_gap(), None);

        wheel.set_rpm(3_000);
        assert_eq!(wheel.revolution_cycles(), Some(320_000));
        assert_eq!(wheel.next_gap(), Some(83_200));
        wheel.pass_tooth();
        wheel.pass_tooth();
        assert_eq!(wheel.next_gap(), Some(70_400));
    }

    #[test]
    fn eeprom_counts_only_changed_bytes() {
        let mut eeprom = Eeprom::default();
        eeprom.update(4, &[1, 2, 0xFF]);
        assert_eq!(eeprom.writes(), 2);

        let mut buffer = [0u8; 4];
        eeprom.read(3, &mut buffer);
        assert_eq!(buffer, [0xFF, 1, 2, 0xFF]);
    }
}
