//! Cycle synchronizer turning tooth periods into a revolution reference.
//!
//! Period samples land in a fixed window of `N` slots (one per tooth) at a
//! rotating index. After `sense_cycles` full passes the shortest slot becomes
//! the reference tooth; from then on every sample refreshes the speed
//! estimate and the reference and `+2` positions raise fire events for the
//! front and back spark. Overflow timeouts and implausibly long periods drop
//! the synchronizer back to its initial state.

use core::fmt;

use crate::config::EngineConfig;
use crate::guard::BusyFlag;
use crate::ignition::SparkChannel;

/// Synchronization progress.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncState {
    Unsynchronized,
    /// Number of full sensor passes observed so far.
    Synchronizing(u8),
    Synchronized,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Unsynchronized => f.write_str("unsynchronized"),
            SyncState::Synchronizing(passes) => write!(f, "synchronizing ({passes})"),
            SyncState::Synchronized => f.write_str("synchronized"),
        }
    }
}

/// Window positions derived from the reference tooth.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhaseIndices {
    pub reference: usize,
    pub plus1: usize,
    pub plus2: usize,
    pub plus3: usize,
}

impl PhaseIndices {
    #[must_use]
    pub const fn from_reference(reference: usize, teeth: usize) -> Self {
        Self {
            reference,
            plus1: (reference + 1) % teeth,
            plus2: (reference + 2) % teeth,
            plus3: (reference + 3) % teeth,
        }
    }

    /// Spark channel fired when the sample at `index` completes.
    #[must_use]
    pub const fn channel_at(&self, index: usize) -> Option<SparkChannel> {
        if index == self.reference {
            Some(SparkChannel::Front)
        } else if index == self.plus2 {
            Some(SparkChannel::Back)
        } else {
            None
        }
    }
}

/// Engine speed derived from one revolution of samples.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Speed {
    pub rps: u32,
    pub rpm: u32,
}

impl Speed {
    /// Truncating conversion from ticks per revolution.
    #[must_use]
    pub const fn from_ticks(measurement_hz: u32, ticks_per_rev: u32) -> Self {
        let rps = if ticks_per_rev == 0 {
            0
        } else {
            measurement_hz / ticks_per_rev
        };
        Self {
            rps,
            rpm: rps.saturating_mul(60),
        }
    }
}

/// Result of feeding one sample or timeout into the synchronizer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleOutcome {
    /// Nothing for the scheduler to do.
    Pending,
    /// A reference tooth was chosen.
    Locked(PhaseIndices),
    /// The busy guard was acquired on behalf of `channel`.
    Fire { channel: SparkChannel, speed: Speed },
    /// A fire position arrived while the previous spark was still in flight.
    Busy { channel: SparkChannel },
    /// The engine stopped; outputs must be extinguished.
    Stalled,
}

/// Thresholds driving synchronization and stall detection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyncParams {
    pub sense_cycles: u8,
    pub measurement_hz: u32,
    pub stall_overflows: u32,
    pub sensible_max_ticks: u32,
}

impl SyncParams {
    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            sense_cycles: config.sense_cycles,
            measurement_hz: config.measurement_hz,
            stall_overflows: config.stall_overflows,
            sensible_max_ticks: config.sensible_max_ticks,
        }
    }
}

pub struct CycleSynchronizer<const N: usize> {
    params: SyncParams,
    window: [u32; N],
    tick_index: usize,
    state: SyncState,
    phase: Option<PhaseIndices>,
    speed: Option<Speed>,
    stalled: bool,
}

impl<const N: usize> CycleSynchronizer<N> {
    #[must_use]
    pub const fn new(params: SyncParams) -> Self {
        Self {
            params,
            window: [0; N],
            tick_index: 0,
            state: SyncState::Unsynchronized,
            phase: None,
            speed: None,
            stalled: true,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn phase(&self) -> Option<PhaseIndices> {
        self.phase
    }

    /// Speed estimate, only while synchronized.
    pub fn speed(&self) -> Option<Speed> {
        self.speed
    }

    pub fn window(&self) -> &[u32; N] {
        &self.window
    }

    /// Slot the next sample will be written to.
    pub fn tick_index(&self) -> usize {
        self.tick_index
    }

    /// Consumes one captured tooth period.
    pub fn on_sample(&mut self, ticks: u32, busy: &BusyFlag) -> SampleOutcome {
        if ticks >= self.params.sensible_max_ticks {
            return self.stall();
        }
        self.stalled = false;

        let index = self.tick_index;
        self.window[index] = ticks;
        self.tick_index = (index + 1) % N;

        match (self.state, self.phase) {
            (SyncState::Synchronized, Some(phase)) => {
                let speed = Speed::from_ticks(self.params.measurement_hz, self.window_sum());
                self.speed = Some(speed);
                match phase.channel_at(index) {
                    Some(channel) if busy.try_acquire() => SampleOutcome::Fire { channel, speed },
                    Some(channel) => SampleOutcome::Busy { channel },
                    None => SampleOutcome::Pending,
                }
            }
            _ if self.tick_index == 0 => self.complete_pass(),
            _ => SampleOutcome::Pending,
        }
    }

    /// Consumes a meter overflow carrying the count since the last capture.
    pub fn on_overflow(&mut self, count: u32) -> SampleOutcome {
        if count >= self.params.stall_overflows {
            self.stall()
        } else {
            SampleOutcome::Pending
        }
    }

    /// Discards the window and derived indices and starts a fresh sense pass.
    pub fn reset(&mut self) {
        self.window = [0; N];
        self.tick_index = 0;
        self.state = SyncState::Unsynchronized;
        self.phase = None;
        self.speed = None;
    }

    fn stall(&mut self) -> SampleOutcome {
        self.reset();
        if self.stalled {
            SampleOutcome::Pending
        } else {
            self.stalled = true;
            SampleOutcome::Stalled
        }
    }

    fn complete_pass(&mut self) -> SampleOutcome {
        let passes = match self.state {
            SyncState::Synchronizing(passes) => passes.saturating_add(1),
            _ => 1,
        };
        if passes < self.params.sense_cycles {
            self.state = SyncState::Synchronizing(passes);
            return SampleOutcome::Pending;
        }

        let phase = PhaseIndices::from_reference(self.shortest_slot(), N);
        self.phase = Some(phase);
        self.state = SyncState::Synchronized;
        self.speed = Some(Speed::from_ticks(
            self.params.measurement_hz,
            self.window_sum(),
        ));
        SampleOutcome::Locked(phase)
    }

    /// First slot holding the minimum duration.
    fn shortest_slot(&self) -> usize {
        let mut best = 0;
        for (index, &ticks) in self.window.iter().enumerate() {
            if ticks < self.window[best] {
                best = index;
            }
        }
        best
    }

    fn window_sum(&self) -> u32 {
        self.window
            .iter()
            .fold(0u32, |sum, &ticks| sum.saturating_add(ticks))
    }
}
