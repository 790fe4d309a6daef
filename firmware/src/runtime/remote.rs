//! Serial calibration link serviced from the foreground loop.

use cdi_core::calibration::{CommitError, RangeError, TimingRecord};
use cdi_core::remote::{ControlSurface, RemoteSession};

use super::with_engine;
use crate::hw::eeprom::Eeprom;
use crate::hw::usart::{self, Serial};
use crate::status;

pub struct Link {
    serial: Serial,
    session: RemoteSession,
}

impl Link {
    pub fn new(serial: Serial) -> Self {
        Self {
            serial,
            session: RemoteSession::new(),
        }
    }

    /// Handles every queued byte and transmits any replies.
    pub fn poll(&mut self, eeprom: &mut Eeprom) {
        if status::take_rx_overruns() > 0 {
            // A lost byte leaves any partial frame misaligned.
            self.session = RemoteSession::new();
        }
        let mut control = FirmwareControl { eeprom };
        while let Some(byte) = usart::pop_byte() {
            if let Some(reply) = self.session.receive(byte, &mut control) {
                self.serial.write_all(&reply);
            }
        }
    }
}

/// Protocol view of the shared engine.
///
/// Each call takes the engine lock on its own. Saving copies the calibration
/// out, programs the EEPROM with interrupts enabled, then clears the dirty
/// flag only if RAM still matches what was written.
struct FirmwareControl<'a> {
    eeprom: &'a mut Eeprom,
}

impl ControlSurface for FirmwareControl<'_> {
    fn speed_rpm(&self) -> u32 {
        status::speed_rpm()
    }

    fn timing_record(&self, slot: usize) -> Result<TimingRecord, RangeError> {
        with_engine(|engine| engine.timing_record(slot)).unwrap_or(Err(RangeError::Slot(slot)))
    }

    fn set_timing_record(&mut self, slot: usize, record: TimingRecord) -> Result<(), RangeError> {
        with_engine(|engine| engine.set_timing_record(slot, record.speed, record.timing))
            .unwrap_or(Err(RangeError::Slot(slot)))
    }

    fn shift(&self) -> u8 {
        with_engine(|engine| engine.shift()).unwrap_or_default()
    }

    fn set_shift(&mut self, shift: u8) -> Result<(), RangeError> {
        with_engine(|engine| engine.set_shift(shift)).unwrap_or(Err(RangeError::Value(shift)))
    }

    fn save(&mut self) -> Result<(), CommitError> {
        let Some(mut snapshot) = with_engine(|engine| *engine.calibration()) else {
            return Ok(());
        };
        snapshot.commit(self.eeprom)?;
        with_engine(|engine| engine.calibration_mut().mark_committed(&snapshot));
        Ok(())
    }
}
