#![no_std]

// Shared logic for the CDI ignition controller.
//
// This crate stays portable across the AVR firmware and host tooling by
// avoiding the Rust standard library and keeping register access behind
// traits the other crates implement.

pub mod calibration;
pub mod config;
pub mod engine;
pub mod guard;
pub mod ignition;
pub mod remote;
pub mod sync;
pub mod telemetry;
pub mod timer;

pub use engine::{EngineControl, Ignition};
