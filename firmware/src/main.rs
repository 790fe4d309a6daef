#![cfg_attr(target_arch = "avr", no_std)]
#![cfg_attr(target_arch = "avr", no_main)]
#![cfg_attr(target_arch = "avr", feature(abi_avr_interrupt))]

#[cfg(target_arch = "avr")]
extern crate panic_halt;

mod registers;
mod status;

#[cfg(target_arch = "avr")]
mod hw;
#[cfg(target_arch = "avr")]
mod runtime;

#[cfg(not(target_arch = "avr"))]
fn main() {}
