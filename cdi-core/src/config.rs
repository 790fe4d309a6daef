//! Board constants and tunable engine parameters.
//!
//! Everything here is compile-time data: the ATmega328P clock tree and the
//! defaults the firmware and emulator build their [`EngineConfig`] from.

use crate::timer::{ClockTree, CounterWidth, TimerUnit, UnitProfile};

/// CPU clock of the reference board.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Prescale ratios shared by timer0 and timer1.
pub const PRESCALE_SYNC: [u16; 5] = [1, 8, 64, 256, 1024];

/// Prescale ratios of the asynchronous timer2.
pub const PRESCALE_ASYNC: [u16; 7] = [1, 8, 32, 64, 128, 256, 1024];

/// Clock tree of the ATmega328P at 16 MHz.
pub const ATMEGA328P: ClockTree = ClockTree::new(
    SYSTEM_CLOCK_HZ,
    [
        UnitProfile::new(CounterWidth::Bits8, &PRESCALE_SYNC),
        UnitProfile::new(CounterWidth::Bits16, &PRESCALE_SYNC),
        UnitProfile::new(CounterWidth::Bits8, &PRESCALE_ASYNC),
    ],
);

/// Sensor teeth per crank revolution.
pub const TEETH_PER_REV: usize = 4;

/// Spark events per crank revolution (front + back).
pub const SPARKS_PER_REV: u32 = 2;

/// Full sensor revolutions observed before choosing a reference tooth.
pub const SENSE_CYCLES: u8 = 2;

/// Tick rate of the period meter (system clock / 64).
pub const MEASUREMENT_HZ: u32 = SYSTEM_CLOCK_HZ / 64;

/// Meter overflows without a capture that count as a stalled engine.
pub const STALL_OVERFLOWS: u32 = 2;

/// Tooth periods at or above this many ticks are treated as a stall.
pub const SENSIBLE_MAX_TICKS: u32 = STALL_OVERFLOWS * 65_536;

/// Tick rate of the software-extended low speed delay.
pub const DELAY_TICK_HZ: u32 = 10_000;

/// Dwell pulse repetition rate; the pulse runs exactly one period.
pub const DWELL_HZ: u32 = 1_000;

/// Share of the dwell period the spark output stays high.
pub const DWELL_DUTY_PERCENT: u8 = 50;

/// Compare rate of the external watchdog feed (the pin toggles at half this).
pub const WATCHDOG_FEED_HZ: u32 = 100;

/// Tunable parameters of the ignition engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub clock: ClockTree,
    pub meter_unit: TimerUnit,
    pub scheduler_unit: TimerUnit,
    pub measurement_hz: u32,
    pub sense_cycles: u8,
    pub stall_overflows: u32,
    pub sensible_max_ticks: u32,
    pub sparks_per_rev: u32,
    pub delay_tick_hz: u32,
    pub dwell_hz: u32,
    pub dwell_duty_percent: u8,
}

impl EngineConfig {
    /// Reference board configuration.
    pub const DEFAULT: Self = Self {
        clock: ATMEGA328P,
        meter_unit: TimerUnit::Timer1,
        scheduler_unit: TimerUnit::Timer0,
        measurement_hz: MEASUREMENT_HZ,
        sense_cycles: SENSE_CYCLES,
        stall_overflows: STALL_OVERFLOWS,
        sensible_max_ticks: SENSIBLE_MAX_TICKS,
        sparks_per_rev: SPARKS_PER_REV,
        delay_tick_hz: DELAY_TICK_HZ,
        dwell_hz: DWELL_HZ,
        dwell_duty_percent: DWELL_DUTY_PERCENT,
    };
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
