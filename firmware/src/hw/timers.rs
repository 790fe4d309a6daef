//! TC0, TC1 and TC2 behind the timer service's register seam.

use avr_device::atmega328p::{TC0, TC1, TC2};
use cdi_core::timer::{TimerPeripheral, TimerUnit, UnitSetup};

use crate::registers::{self, ControlBits};

pub struct AvrTimers {
    tc0: TC0,
    tc1: TC1,
    tc2: TC2,
    /// `TCCRnB` waveform bits of the last applied setup, clock stopped.
    waveform: [u8; 3],
    timsk: [u8; 3],
}

fn narrow(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

impl AvrTimers {
    pub fn new(tc0: TC0, tc1: TC1, tc2: TC2) -> Self {
        let mut timers = Self {
            tc0,
            tc1,
            tc2,
            waveform: [0; 3],
            timsk: [0; 3],
        };
        for unit in TimerUnit::ALL {
            timers.halt(unit);
        }
        timers
    }

    /// Counter value latched by the last input capture on Timer1.
    pub fn captured(&self) -> u16 {
        self.tc1.icr1().read().bits()
    }

    fn write_tccrb(&mut self, unit: TimerUnit, bits: u8) {
        // SAFETY: waveform and clock-select images come from `registers`.
        match unit {
            TimerUnit::Timer0 => self.tc0.tccr0b().write(|w| unsafe { w.bits(bits) }),
            TimerUnit::Timer1 => self.tc1.tccr1b().write(|w| unsafe { w.bits(bits) }),
            TimerUnit::Timer2 => self.tc2.tccr2b().write(|w| unsafe { w.bits(bits) }),
        }
    }

    fn write_timsk(&mut self, unit: TimerUnit, bits: u8) {
        // SAFETY: masks only name interrupts with installed vectors.
        match unit {
            TimerUnit::Timer0 => self.tc0.timsk0().write(|w| unsafe { w.bits(bits) }),
            TimerUnit::Timer1 => self.tc1.timsk1().write(|w| unsafe { w.bits(bits) }),
            TimerUnit::Timer2 => self.tc2.timsk2().write(|w| unsafe { w.bits(bits) }),
        }
    }

    fn clear_flags(&mut self, unit: TimerUnit) {
        let mask = registers::flag_mask(unit);
        // SAFETY: writing ones clears the pending flags.
        match unit {
            TimerUnit::Timer0 => self.tc0.tifr0().write(|w| unsafe { w.bits(mask) }),
            TimerUnit::Timer1 => self.tc1.tifr1().write(|w| unsafe { w.bits(mask) }),
            TimerUnit::Timer2 => self.tc2.tifr2().write(|w| unsafe { w.bits(mask) }),
        }
    }
}

impl TimerPeripheral for AvrTimers {
    fn apply(&mut self, unit: TimerUnit, setup: &UnitSetup) {
        let ControlBits {
            tccra,
            tccrb,
            timsk,
        } = registers::control_bits(unit, setup);
        self.write_tccrb(unit, tccrb);
        self.write_timsk(unit, 0);

        // SAFETY: compare values are bounded by the unit's counter width.
        match unit {
            TimerUnit::Timer0 => {
                self.tc0.tccr0a().write(|w| unsafe { w.bits(tccra) });
                self.tc0.ocr0a().write(|w| unsafe { w.bits(narrow(setup.top)) });
                self.tc0.ocr0b().write(|w| unsafe { w.bits(narrow(setup.compare_b)) });
            }
            TimerUnit::Timer1 => {
                self.tc1.tccr1a().write(|w| unsafe { w.bits(tccra) });
                self.tc1.ocr1a().write(|w| unsafe { w.bits(setup.top) });
                self.tc1.ocr1b().write(|w| unsafe { w.bits(setup.compare_b) });
            }
            TimerUnit::Timer2 => {
                self.tc2.tccr2a().write(|w| unsafe { w.bits(tccra) });
                self.tc2.ocr2a().write(|w| unsafe { w.bits(narrow(setup.top)) });
                self.tc2.ocr2b().write(|w| unsafe { w.bits(narrow(setup.compare_b)) });
            }
        }

        self.waveform[unit.as_index()] = tccrb;
        self.timsk[unit.as_index()] = timsk;
    }

    fn start(&mut self, unit: TimerUnit, setup: &UnitSetup) {
        let Some(select) = registers::clock_select(unit, setup.prescale) else {
            return;
        };
        let index = unit.as_index();
        self.clear_flags(unit);
        self.write_timsk(unit, self.timsk[index]);
        self.write_tccrb(unit, self.waveform[index] | select);
    }

    fn halt(&mut self, unit: TimerUnit) {
        self.write_tccrb(unit, self.waveform[unit.as_index()]);
        self.write_timsk(unit, 0);
        self.clear_flags(unit);
    }

    fn load_counter(&mut self, unit: TimerUnit, value: u16) {
        // SAFETY: any count is a valid counter state.
        match unit {
            TimerUnit::Timer0 => self.tc0.tcnt0().write(|w| unsafe { w.bits(narrow(value)) }),
            TimerUnit::Timer1 => self.tc1.tcnt1().write(|w| unsafe { w.bits(value) }),
            TimerUnit::Timer2 => self.tc2.tcnt2().write(|w| unsafe { w.bits(narrow(value)) }),
        }
    }

    fn counter(&self, unit: TimerUnit) -> u16 {
        match unit {
            TimerUnit::Timer0 => u16::from(self.tc0.tcnt0().read().bits()),
            TimerUnit::Timer1 => self.tc1.tcnt1().read().bits(),
            TimerUnit::Timer2 => u16::from(self.tc2.tcnt2().read().bits()),
        }
    }
}
