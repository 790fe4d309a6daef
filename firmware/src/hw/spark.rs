//! Spark output lines on PORTC.

use avr_device::atmega328p::PORTC;
use cdi_core::ignition::{SparkChannel, SparkOutput};

pub struct SparkPins {
    port: PORTC,
}

impl SparkPins {
    pub fn new(port: PORTC) -> Self {
        Self { port }
    }
}

const fn line(channel: SparkChannel) -> u8 {
    match channel {
        SparkChannel::Front => 1 << 2,
        SparkChannel::Back => 1 << 3,
    }
}

impl SparkOutput for SparkPins {
    fn set(&mut self, channel: SparkChannel, high: bool) {
        let mask = line(channel);
        self.port.portc().modify(|r, w| {
            let bits = if high {
                r.bits() | mask
            } else {
                r.bits() & !mask
            };
            // SAFETY: only the channel's own bit changes.
            unsafe { w.bits(bits) }
        });
    }
}
