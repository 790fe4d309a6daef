//! Serial configuration protocol.
//!
//! Requests and replies are [`Frame`]s. Bit 7 of the command byte marks a
//! SET. Replies echo the command; rejected requests answer with
//! [`REJECTED`] in the value field, unknown commands get no answer, and
//! frames failing their checksum are dropped so the host retries.

pub mod frame;

pub use frame::{FRAME_HEADER, FRAME_LEN, Frame, FrameAssembler, FrameError, checksum};

use core::fmt;

use crate::calibration::{CommitError, RangeError, TimingRecord};

/// Line rate of the configuration link.
pub const BAUD_RATE: u32 = 19_200;

/// Command bit distinguishing SET from GET.
pub const SET_FLAG: u8 = 0x80;

/// Value returned when a request is refused.
pub const REJECTED: u32 = 0xFFFF_FFFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    GetSpeed,
    GetRecord,
    GetShift,
    SetRecord,
    SetShift,
    Save,
}

impl Command {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Command::GetSpeed => 0x01,
            Command::GetRecord => 0x21,
            Command::GetShift => 0x22,
            Command::SetRecord => 0xA1,
            Command::SetShift => 0xA2,
            Command::Save => 0xAF,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Command::GetSpeed),
            0x21 => Some(Command::GetRecord),
            0x22 => Some(Command::GetShift),
            0xA1 => Some(Command::SetRecord),
            0xA2 => Some(Command::SetShift),
            0xAF => Some(Command::Save),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_set(self) -> bool {
        self.code() & SET_FLAG != 0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GetSpeed => f.write_str("get-speed"),
            Command::GetRecord => f.write_str("get-record"),
            Command::GetShift => f.write_str("get-shift"),
            Command::SetRecord => f.write_str("set-record"),
            Command::SetShift => f.write_str("set-shift"),
            Command::Save => f.write_str("save"),
        }
    }
}

/// Decoded request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request {
    GetSpeed,
    GetRecord { slot: u8 },
    GetShift,
    SetRecord { slot: u8, record: TimingRecord },
    SetShift(u8),
    Save,
}

impl Request {
    #[must_use]
    pub const fn command(&self) -> Command {
        match self {
            Request::GetSpeed => Command::GetSpeed,
            Request::GetRecord { .. } => Command::GetRecord,
            Request::GetShift => Command::GetShift,
            Request::SetRecord { .. } => Command::SetRecord,
            Request::SetShift(_) => Command::SetShift,
            Request::Save => Command::Save,
        }
    }

    /// Interprets a frame; `None` for unknown commands.
    #[must_use]
    pub const fn from_frame(frame: &Frame) -> Option<Self> {
        let [v0, v1, ..] = frame.value;
        let request = match Command::from_code(frame.command) {
            Some(Command::GetSpeed) => Request::GetSpeed,
            Some(Command::GetRecord) => Request::GetRecord { slot: v0 },
            Some(Command::GetShift) => Request::GetShift,
            Some(Command::SetRecord) => Request::SetRecord {
                slot: v0,
                record: TimingRecord::new(frame.high_u16(), v1),
            },
            Some(Command::SetShift) => Request::SetShift(v0),
            Some(Command::Save) => Request::Save,
            None => return None,
        };
        Some(request)
    }

    #[must_use]
    pub const fn to_frame(&self) -> Frame {
        let value = match *self {
            Request::GetRecord { slot } => [slot, 0, 0, 0],
            Request::SetRecord { slot, record } => record_value(slot, record),
            Request::SetShift(shift) => [shift, 0, 0, 0],
            Request::GetSpeed | Request::GetShift | Request::Save => [0; 4],
        };
        Frame::new(self.command().code(), value)
    }
}

const fn record_value(slot: u8, record: TimingRecord) -> [u8; 4] {
    let [low, high] = record.speed.to_le_bytes();
    [slot, record.timing, low, high]
}

/// Operations the protocol needs from the engine.
pub trait ControlSurface {
    /// Current speed in rpm, zero while unsynchronized.
    fn speed_rpm(&self) -> u32;
    /// # Errors
    /// [`RangeError::Slot`] past the table.
    fn timing_record(&self, slot: usize) -> Result<TimingRecord, RangeError>;
    /// # Errors
    /// [`RangeError`] when the slot or timing is out of bounds.
    fn set_timing_record(&mut self, slot: usize, record: TimingRecord) -> Result<(), RangeError>;
    fn shift(&self) -> u8;
    /// # Errors
    /// [`RangeError::Value`] above the maximum.
    fn set_shift(&mut self, shift: u8) -> Result<(), RangeError>;
    /// # Errors
    /// [`CommitError`] when the table cannot be persisted.
    fn save(&mut self) -> Result<(), CommitError>;
}

/// Executes `frame` against `surface` and builds the reply.
///
/// Returns `None` for commands this firmware does not know.
pub fn respond<C: ControlSurface>(surface: &mut C, frame: &Frame) -> Option<Frame> {
    let request = Request::from_frame(frame)?;
    let code = request.command().code();
    let rejected = Frame::with_u32(code, REJECTED);

    let reply = match request {
        Request::GetSpeed => {
            let rpm = u16::try_from(surface.speed_rpm()).unwrap_or(u16::MAX);
            let [low, high] = rpm.to_le_bytes();
            Frame::new(code, [low, high, 0, 0])
        }
        Request::GetRecord { slot } => surface
            .timing_record(usize::from(slot))
            .map_or(rejected, |record| {
                Frame::new(code, record_value(slot, record))
            }),
        Request::GetShift => Frame::new(code, [surface.shift(), 0, 0, 0]),
        Request::SetRecord { slot, record } => surface
            .set_timing_record(usize::from(slot), record)
            .map_or(rejected, |()| Frame::new(code, record_value(slot, record))),
        Request::SetShift(shift) => surface
            .set_shift(shift)
            .map_or(rejected, |()| Frame::new(code, [shift, 0, 0, 0])),
        Request::Save => surface
            .save()
            .map_or(rejected, |()| Frame::new(code, [0; 4])),
    };
    Some(reply)
}

/// Byte-level protocol session: assemble, execute, encode.
#[derive(Debug, Default)]
pub struct RemoteSession {
    assembler: FrameAssembler,
    dropped: u32,
}

impl RemoteSession {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assembler: FrameAssembler::new(),
            dropped: 0,
        }
    }

    /// Feeds one received byte; returns the encoded reply when one is due.
    pub fn receive<C: ControlSurface>(
        &mut self,
        byte: u8,
        surface: &mut C,
    ) -> Option<[u8; FRAME_LEN]> {
        match self.assembler.push(byte)? {
            Ok(frame) => respond(surface, &frame).map(|reply| reply.encode()),
            Err(_) => {
                self.dropped = self.dropped.wrapping_add(1);
                None
            }
        }
    }

    /// Frames discarded for header or checksum errors.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
