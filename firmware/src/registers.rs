#![cfg_attr(not(target_arch = "avr"), allow(dead_code))]

//! Control register images for the ATmega328P timer units.
//!
//! Timer0 and Timer2 share one register layout; Timer1 keeps its waveform
//! bits split across both control registers and adds the input capture unit.
//! Nothing here touches hardware, so the images are checked on the host.

use cdi_core::timer::{OutputMode, TimerMode, TimerUnit, UnitSetup};

const WGM0: u8 = 1 << 0;
const WGM1: u8 = 1 << 1;
/// `WGMn2` on the 8-bit units, `WGM12` on Timer1.
const WGM_B2: u8 = 1 << 3;
const WGM13: u8 = 1 << 4;
const COMB_TOGGLE: u8 = 1 << 4;
const ICES1: u8 = 1 << 6;
const ICNC1: u8 = 1 << 7;

const TOIE: u8 = 1 << 0;
const OCIEA: u8 = 1 << 1;
const OCIEB: u8 = 1 << 2;
const ICIE1: u8 = 1 << 5;

/// Register values for one configured unit, clock select excluded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlBits {
    pub tccra: u8,
    pub tccrb: u8,
    pub timsk: u8,
}

pub fn control_bits(unit: TimerUnit, setup: &UnitSetup) -> ControlBits {
    let output = match setup.output {
        OutputMode::None => 0,
        OutputMode::Toggle => COMB_TOGGLE,
    };
    let (tccra, tccrb, timsk) = match (unit, setup.mode) {
        (TimerUnit::Timer1, TimerMode::Capture) => (0, ICNC1 | ICES1, ICIE1 | TOIE),
        (TimerUnit::Timer1, TimerMode::Periodic) => (output, WGM_B2, OCIEA),
        (TimerUnit::Timer1, TimerMode::Pwm) => (output | WGM1 | WGM0, WGM13 | WGM_B2, OCIEA | OCIEB),
        // The 8-bit units have no capture pin; count freely with overflow only.
        (_, TimerMode::Capture) => (0, 0, TOIE),
        (_, TimerMode::Periodic) => (output | WGM1, 0, OCIEA),
        (_, TimerMode::Pwm) => (output | WGM1 | WGM0, WGM_B2, OCIEA | OCIEB),
    };
    ControlBits {
        tccra,
        tccrb,
        timsk,
    }
}

/// `CSn2:0` for `prescale`, `None` when the unit cannot divide by it.
pub fn clock_select(unit: TimerUnit, prescale: u16) -> Option<u8> {
    let select = match unit {
        TimerUnit::Timer2 => match prescale {
            1 => 1,
            8 => 2,
            32 => 3,
            64 => 4,
            128 => 5,
            256 => 6,
            1024 => 7,
            _ => return None,
        },
        TimerUnit::Timer0 | TimerUnit::Timer1 => match prescale {
            1 => 1,
            8 => 2,
            64 => 3,
            256 => 4,
            1024 => 5,
            _ => return None,
        },
    };
    Some(select)
}

/// Bits to write into `TIFRn` to discard stale interrupt flags.
pub const fn flag_mask(unit: TimerUnit) -> u8 {
    match unit {
        TimerUnit::Timer1 => ICIE1 | OCIEB | OCIEA | TOIE,
        TimerUnit::Timer0 | TimerUnit::Timer2 => OCIEB | OCIEA | TOIE,
    }
}

/// USART baud divisor for normal-speed asynchronous mode, rounded to nearest.
pub fn baud_divisor(system_hz: u32, baud: u32) -> u16 {
    let divisor = (system_hz + 8 * baud) / (16 * baud) - 1;
    u16::try_from(divisor).unwrap_or(u16::MAX)
}
