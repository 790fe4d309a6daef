//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! Engine events are stamped with the number of tooth captures seen so far
//! (the only monotonic clock every target has) and kept in a fixed-capacity
//! history.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::ignition::{FireDelay, SkipReason, SparkChannel};
use crate::sync::Speed;

/// Monotonic identifier assigned to every record.
pub type EventId = u32;

/// Tooth captures since start-up.
pub type ToothCount = u32;

/// Default number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    Synchronized,
    Stalled,
    Scheduled(SparkChannel),
    Ignited(SparkChannel),
    Skipped(SparkChannel),
    Overlap(SparkChannel),
    CalibrationSaved,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::Synchronized => f.write_str("synchronized"),
            TelemetryEventKind::Stalled => f.write_str("stalled"),
            TelemetryEventKind::Scheduled(channel) => write!(f, "scheduled {channel}"),
            TelemetryEventKind::Ignited(channel) => write!(f, "ignited {channel}"),
            TelemetryEventKind::Skipped(channel) => write!(f, "skipped {channel}"),
            TelemetryEventKind::Overlap(channel) => write!(f, "overlap {channel}"),
            TelemetryEventKind::CalibrationSaved => f.write_str("calibration-saved"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryPayload {
    None,
    /// Reference tooth chosen when synchronization locked.
    Lock { reference: u8, speed: Speed },
    /// Delay programmed for a fire event.
    Fire { rpm: u32, value: u8, delay: FireDelay },
    Skip(SkipReason),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Lock { reference, speed } => {
                write!(f, "reference={reference} rpm={}", speed.rpm)
            }
            TelemetryPayload::Fire { rpm, value, delay } => {
                write!(f, "rpm={rpm} value={value} ")?;
                match delay {
                    FireDelay::Immediate => f.write_str("immediate"),
                    FireDelay::Direct {
                        preload,
                        delay_ticks,
                    } => write!(f, "direct preload={preload} ticks={delay_ticks}"),
                    FireDelay::Extended { wait_cycles } => {
                        write!(f, "extended cycles={wait_cycles}")
                    }
                }
            }
            TelemetryPayload::Skip(reason) => write!(f, "{reason}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub tooth: ToothCount,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    pub fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records retained with an id at or after `id`, oldest first.
    pub fn since(&self, id: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring
            .oldest_ordered()
            .filter(move |record| record.id.wrapping_sub(id) < u32::MAX / 2)
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        tooth: ToothCount,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            tooth,
            event,
            details: payload,
        });

        id
    }
}
