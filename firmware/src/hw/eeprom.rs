//! On-chip EEPROM behind the calibration store's `NonVolatile` seam.

use avr_device::atmega328p::EEPROM;
use cdi_core::calibration::NonVolatile;

const EEPROM_BYTES: usize = 1024;

const EERE: u8 = 1 << 0;
const EEPE: u8 = 1 << 1;
const EEMPE: u8 = 1 << 2;

pub struct Eeprom {
    regs: EEPROM,
}

impl Eeprom {
    pub fn new(regs: EEPROM) -> Self {
        Self { regs }
    }

    fn wait_ready(&self) {
        while self.regs.eecr().read().bits() & EEPE != 0 {}
    }

    fn read_byte(&self, address: u16) -> u8 {
        self.wait_ready();
        // SAFETY: callers keep `address` inside the 1 KiB array.
        self.regs.eear().write(|w| unsafe { w.bits(address) });
        self.regs.eecr().write(|w| unsafe { w.bits(EERE) });
        self.regs.eedr().read().bits()
    }

    /// Programs one byte; blocks for the previous write (about 3.4 ms).
    fn write_byte(&mut self, address: u16, value: u8) {
        self.wait_ready();
        critical_section::with(|_| {
            // SAFETY: EEMPE then EEPE within four cycles is the documented
            // write sequence; interrupts are masked around it.
            self.regs.eear().write(|w| unsafe { w.bits(address) });
            self.regs.eedr().write(|w| unsafe { w.bits(value) });
            self.regs.eecr().write(|w| unsafe { w.bits(EEMPE) });
            self.regs.eecr().write(|w| unsafe { w.bits(EEMPE | EEPE) });
        });
    }
}

fn address(offset: usize) -> Option<u16> {
    (offset < EEPROM_BYTES)
        .then(|| u16::try_from(offset).ok())
        .flatten()
}

impl NonVolatile for Eeprom {
    fn read(&self, offset: usize, buffer: &mut [u8]) {
        for (index, byte) in buffer.iter_mut().enumerate() {
            *byte = address(offset + index).map_or(0xFF, |address| self.read_byte(address));
        }
    }

    fn update(&mut self, offset: usize, data: &[u8]) {
        for (index, &value) in data.iter().enumerate() {
            let Some(address) = address(offset + index) else {
                break;
            };
            if self.read_byte(address) != value {
                self.write_byte(address, value);
            }
        }
    }
}
