//! Board adapters implementing the `cdi-core` hardware seams.

use avr_device::atmega328p::{PORTB, PORTC, PORTD};

pub mod eeprom;
pub mod spark;
pub mod timers;
#[cfg(feature = "remote")]
pub mod usart;

/// PD3 (OC2B), toggled by Timer2 to feed the external watchdog.
const WATCHDOG_FEED: u8 = 1 << 3;
/// PD4, active-low link LED.
const LINK_LED: u8 = 1 << 4;
/// PC2 and PC3, the front and back spark outputs.
const SPARK_LINES: u8 = (1 << 2) | (1 << 3);
/// PB0 (ICP1), the tooth sensor input.
const TOOTH_SENSOR: u8 = 1 << 0;

/// Sets pin directions and idle levels.
///
/// Spark lines start low and the LED dark; the sensor input keeps its
/// pull-up off since the conditioner drives the line.
pub fn ports_init(portb: &PORTB, portc: &PORTC, portd: &PORTD) {
    portb.ddrb().modify(|r, w| {
        // SAFETY: every bit pattern is a valid direction mask.
        unsafe { w.bits(r.bits() & !TOOTH_SENSOR) }
    });
    portc.portc().modify(|r, w| {
        // SAFETY: every bit pattern is a valid output level.
        unsafe { w.bits(r.bits() & !SPARK_LINES) }
    });
    portc.ddrc().modify(|r, w| {
        // SAFETY: every bit pattern is a valid direction mask.
        unsafe { w.bits(r.bits() | SPARK_LINES) }
    });
    portd.portd().modify(|r, w| {
        // SAFETY: every bit pattern is a valid output level.
        unsafe { w.bits((r.bits() | LINK_LED) & !WATCHDOG_FEED) }
    });
    portd.ddrd().modify(|r, w| {
        // SAFETY: every bit pattern is a valid direction mask.
        unsafe { w.bits(r.bits() | LINK_LED | WATCHDOG_FEED) }
    });
}

/// Active-low indicator on PD4.
pub struct LinkLed {
    port: PORTD,
}

impl LinkLed {
    pub fn new(port: PORTD) -> Self {
        Self { port }
    }

    pub fn set(&mut self, on: bool) {
        self.port.portd().modify(|r, w| {
            let bits = if on {
                r.bits() & !LINK_LED
            } else {
                r.bits() | LINK_LED
            };
            // SAFETY: only the LED bit changes.
            unsafe { w.bits(bits) }
        });
    }
}
