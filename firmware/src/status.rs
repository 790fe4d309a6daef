#![cfg_attr(not(target_arch = "avr"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Interrupt handlers publish the measured speed and receive overruns here
//! so the main loop can answer speed requests and drive the link LED
//! without taking the engine lock.

use cdi_core::sync::Speed;
#[cfg(feature = "remote")]
use portable_atomic::AtomicU8;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Measured speed in rpm (0 while unsynchronized).
static SPEED_RPM: AtomicU32 = AtomicU32::new(0);
static SYNCHRONIZED: AtomicBool = AtomicBool::new(false);
/// Bytes lost because the receive queue was full or the USART overran.
#[cfg(feature = "remote")]
static RX_OVERRUNS: AtomicU8 = AtomicU8::new(0);

/// Publishes the synchronizer's current estimate.
pub fn record_speed(speed: Option<Speed>) {
    SPEED_RPM.store(speed.map_or(0, |speed| speed.rpm), Ordering::Relaxed);
    SYNCHRONIZED.store(speed.is_some(), Ordering::Relaxed);
}

/// Last published speed in rpm, zero while unsynchronized.
pub fn speed_rpm() -> u32 {
    SPEED_RPM.load(Ordering::Relaxed)
}

pub fn is_synchronized() -> bool {
    SYNCHRONIZED.load(Ordering::Relaxed)
}

#[cfg(feature = "remote")]
pub fn record_rx_overrun() {
    RX_OVERRUNS.fetch_add(1, Ordering::Relaxed);
}

/// Returns and clears the overrun count.
#[cfg(feature = "remote")]
pub fn take_rx_overruns() -> u8 {
    RX_OVERRUNS.swap(0, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_follows_the_synchronizer() {
        record_speed(Some(Speed::from_ticks(250_000, 5_000)));
        assert!(is_synchronized());
        assert_eq!(speed_rpm(), 3_000);

        record_speed(None);
        assert!(!is_synchronized());
        assert_eq!(speed_rpm(), 0);
    }

    #[cfg(feature = "remote")]
    #[test]
    fn overruns_are_taken_once() {
        record_rx_overrun();
        record_rx_overrun();
        assert_eq!(take_rx_overruns(), 2);
        assert_eq!(take_rx_overruns(), 0);
    }
}
