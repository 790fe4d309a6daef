//! USART0 at the calibration link's baud rate.
//!
//! The receive vector queues bytes for the main loop; replies are written
//! with busy-waiting since a frame is only seven bytes.

use core::cell::RefCell;

use avr_device::atmega328p::USART0;
use cdi_core::config::SYSTEM_CLOCK_HZ;
use cdi_core::remote::BAUD_RATE;
use critical_section::Mutex;
use heapless::Deque;

use crate::registers;
use crate::status;

const RX_QUEUE_DEPTH: usize = 16;

const RXC0: u8 = 1 << 7;
const UDRE0: u8 = 1 << 5;
const DOR0: u8 = 1 << 3;
const RXCIE0: u8 = 1 << 7;
const RXEN0: u8 = 1 << 4;
const TXEN0: u8 = 1 << 3;
/// Asynchronous, 8 data bits, no parity, one stop bit.
const FRAME_8N1: u8 = (1 << 2) | (1 << 1);

static RX_QUEUE: Mutex<RefCell<Deque<u8, RX_QUEUE_DEPTH>>> =
    Mutex::new(RefCell::new(Deque::new()));

pub struct Serial {
    regs: USART0,
}

impl Serial {
    pub fn new(regs: USART0) -> Self {
        let divisor = registers::baud_divisor(SYSTEM_CLOCK_HZ, BAUD_RATE);
        // SAFETY: divisor and frame format come from the datasheet tables.
        regs.ubrr0().write(|w| unsafe { w.bits(divisor) });
        regs.ucsr0c().write(|w| unsafe { w.bits(FRAME_8N1) });
        regs.ucsr0b()
            .write(|w| unsafe { w.bits(RXCIE0 | RXEN0 | TXEN0) });
        Self { regs }
    }

    pub fn write_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            while self.regs.ucsr0a().read().bits() & UDRE0 == 0 {}
            // SAFETY: any byte may be transmitted.
            self.regs.udr0().write(|w| unsafe { w.bits(byte) });
        }
    }
}

/// Next byte received, oldest first.
pub fn pop_byte() -> Option<u8> {
    critical_section::with(|cs| RX_QUEUE.borrow_ref_mut(cs).pop_front())
}

/// Drains the data register from the receive vector.
pub fn on_receive(regs: &USART0) {
    let status = regs.ucsr0a().read().bits();
    if status & RXC0 == 0 {
        return;
    }
    let byte = regs.udr0().read().bits();
    if status & DOR0 != 0 {
        status::record_rx_overrun();
    }
    let queued = critical_section::with(|cs| RX_QUEUE.borrow_ref_mut(cs).push_back(byte));
    if queued.is_err() {
        status::record_rx_overrun();
    }
}
