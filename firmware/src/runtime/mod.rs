//! Start-up, interrupt vectors, and the foreground loop.
//!
//! The engine lives in a critical-section mutex. Every vector borrows it for
//! the length of one dispatch; the foreground loop only takes it for short
//! calibration accesses, so EEPROM writes never hold interrupts off.

use core::cell::RefCell;

use avr_device::atmega328p::Peripherals;
use cdi_core::calibration::CalibrationStore;
use cdi_core::config::{EngineConfig, WATCHDOG_FEED_HZ};
use cdi_core::engine::Ignition;
use cdi_core::timer::{RawEvent, TimerUnit};
use critical_section::Mutex;

use crate::hw::{self, LinkLed, eeprom::Eeprom, spark::SparkPins, timers::AvrTimers};
use crate::status;

#[cfg(feature = "remote")]
mod remote;

/// Telemetry kept on target; the ring only feeds diagnostics.
const FIRMWARE_TELEMETRY: usize = 8;

pub(crate) type Engine = Ignition<AvrTimers, SparkPins, FIRMWARE_TELEMETRY>;

static ENGINE: Mutex<RefCell<Option<Engine>>> = Mutex::new(RefCell::new(None));

/// Runs `f` on the engine inside a critical section.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Option<R> {
    critical_section::with(|cs| ENGINE.borrow_ref_mut(cs).as_mut().map(f))
}

fn dispatch(unit: TimerUnit, event: RawEvent) {
    with_engine(|engine| {
        engine.on_interrupt(unit, event);
        status::record_speed(engine.speed());
    });
}

/// Parks the core with outputs low when start-up cannot complete.
fn halt() -> ! {
    avr_device::interrupt::disable();
    loop {
        avr_device::asm::sleep();
    }
}

#[avr_device::entry]
fn main() -> ! {
    let Some(dp) = Peripherals::take() else {
        halt();
    };

    hw::ports_init(&dp.PORTB, &dp.PORTC, &dp.PORTD);
    let mut led = LinkLed::new(dp.PORTD);
    #[cfg_attr(not(feature = "remote"), allow(unused_mut))]
    let mut eeprom = Eeprom::new(dp.EEPROM);

    let mut engine = Ignition::new(
        AvrTimers::new(dp.TC0, dp.TC1, dp.TC2),
        SparkPins::new(dp.PORTC),
        CalibrationStore::load(&eeprom),
        EngineConfig::DEFAULT,
    );
    if engine
        .start_heartbeat(TimerUnit::Timer2, WATCHDOG_FEED_HZ)
        .is_err()
        || engine.start().is_err()
    {
        halt();
    }
    critical_section::with(|cs| *ENGINE.borrow_ref_mut(cs) = Some(engine));

    #[cfg(feature = "remote")]
    let mut link = remote::Link::new(hw::usart::Serial::new(dp.USART0));

    // SAFETY: the engine is installed before any vector can fire.
    unsafe { avr_device::interrupt::enable() };

    loop {
        #[cfg(feature = "remote")]
        link.poll(&mut eeprom);
        led.set(status::is_synchronized());
    }
}

#[avr_device::interrupt(atmega328p)]
fn TIMER0_COMPA() {
    dispatch(TimerUnit::Timer0, RawEvent::CompareA);
}

#[avr_device::interrupt(atmega328p)]
fn TIMER0_COMPB() {
    dispatch(TimerUnit::Timer0, RawEvent::CompareB);
}

#[avr_device::interrupt(atmega328p)]
fn TIMER1_CAPT() {
    with_engine(|engine| {
        let captured = engine.timers().peripheral().captured();
        engine.on_interrupt(TimerUnit::Timer1, RawEvent::Capture(captured));
        status::record_speed(engine.speed());
    });
}

#[avr_device::interrupt(atmega328p)]
fn TIMER1_OVF() {
    dispatch(TimerUnit::Timer1, RawEvent::Overflow);
}

#[avr_device::interrupt(atmega328p)]
fn TIMER2_COMPA() {
    dispatch(TimerUnit::Timer2, RawEvent::CompareA);
}

#[cfg(feature = "remote")]
#[avr_device::interrupt(atmega328p)]
fn USART_RX() {
    // SAFETY: the vector only reads the receive status and data registers,
    // which the foreground never touches.
    let usart = unsafe { avr_device::atmega328p::USART0::steal() };
    hw::usart::on_receive(&usart);
}
