//! Ignition scheduler: turns fire events into delayed spark pulses.
//!
//! The delay is expressed as `value / 180` of the spark-to-spark interval.
//! At normal speeds one scheduler period spans exactly that interval, so the
//! counter is preloaded and a single compare match ends the delay. Below the
//! slowest frequency the scheduler unit can produce, a fixed-rate tick is
//! counted down in software instead. Expiry raises the spark output and
//! starts a one-period PWM pulse whose compare B edge ends the dwell.

use core::fmt;

use crate::config::EngineConfig;
use crate::guard::BusyFlag;
use crate::sync::Speed;
use crate::timer::{
    ConfigError, OutputMode, RawEvent, TimerPeripheral, TimerRole, TimerService, TimerUnit,
};

/// Full-scale delay value (half a revolution with two sparks per revolution).
pub const VALUE_MAX: u8 = 180;

/// The two ignition outputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SparkChannel {
    Front,
    Back,
}

impl SparkChannel {
    pub const ALL: [SparkChannel; 2] = [SparkChannel::Front, SparkChannel::Back];

    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            SparkChannel::Front => 0,
            SparkChannel::Back => 1,
        }
    }
}

impl fmt::Display for SparkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparkChannel::Front => f.write_str("front"),
            SparkChannel::Back => f.write_str("back"),
        }
    }
}

/// Drives the physical spark lines.
pub trait SparkOutput {
    fn set(&mut self, channel: SparkChannel, high: bool);
}

/// How a fire event was scheduled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FireDelay {
    /// No advance requested; the spark fired inside the capture interrupt.
    Immediate,
    /// One compare period, counter preloaded so `delay_ticks` remain.
    Direct { preload: u16, delay_ticks: u32 },
    /// Software-counted ticks of the low speed delay clock.
    Extended { wait_cycles: u32 },
}

/// Why a fire event produced no spark.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SkipReason {
    /// Speed estimate truncated to zero revolutions per second.
    BelowResolution,
    /// The scheduler unit could not be programmed for this speed.
    Timer(ConfigError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BelowResolution => f.write_str("speed below resolution"),
            SkipReason::Timer(err) => write!(f, "timer: {err}"),
        }
    }
}

/// Requested delay for `shift - timing`, clamped to `0..=VALUE_MAX`.
#[must_use]
pub fn delay_value(shift: u8, timing: u8) -> u8 {
    let value = i16::from(shift) - i16::from(timing);
    u8::try_from(value.clamp(0, i16::from(VALUE_MAX))).unwrap_or(0)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    Armed(SparkChannel),
    Counting { channel: SparkChannel, remaining: u32 },
    Dwell(SparkChannel),
}

pub struct IgnitionScheduler {
    unit: TimerUnit,
    sparks_per_rev: u32,
    min_direct_rps: u32,
    delay_tick_hz: u32,
    dwell_hz: u32,
    dwell_duty_percent: u8,
    phase: Phase,
}

impl IgnitionScheduler {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let sparks_per_rev = config.sparks_per_rev.max(1);
        Self {
            unit: config.scheduler_unit,
            sparks_per_rev,
            min_direct_rps: config
                .clock
                .min_frequency(config.scheduler_unit)
                .div_ceil(sparks_per_rev),
            delay_tick_hz: config.delay_tick_hz,
            dwell_hz: config.dwell_hz,
            dwell_duty_percent: config.dwell_duty_percent,
            phase: Phase::Idle,
        }
    }

    /// Slowest speed scheduled with a single compare period.
    pub fn min_direct_rps(&self) -> u32 {
        self.min_direct_rps
    }

    /// `true` while a delay or dwell is in flight.
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Schedules `channel` to fire `value / 180` of a spark interval from now.
    ///
    /// The caller holds `busy`; it is released here when nothing gets
    /// scheduled and by [`Self::on_timer_event`] once the dwell ends.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when this cycle must not fire.
    pub fn fire<P, S>(
        &mut self,
        channel: SparkChannel,
        speed: Speed,
        value: u8,
        timers: &mut TimerService<P>,
        spark: &mut S,
        busy: &BusyFlag,
    ) -> Result<FireDelay, SkipReason>
    where
        P: TimerPeripheral,
        S: SparkOutput,
    {
        if value == 0 {
            self.ignite(channel, timers, spark, busy);
            return Ok(FireDelay::Immediate);
        }
        if speed.rps == 0 {
            busy.release();
            return Err(SkipReason::BelowResolution);
        }

        let scheduled = if speed.rps >= self.min_direct_rps {
            self.schedule_direct(channel, speed.rps, value, timers)
        } else {
            self.schedule_extended(channel, speed.rps, value, timers)
        };

        match scheduled {
            Ok(Some(delay)) => Ok(delay),
            Ok(None) => {
                self.ignite(channel, timers, spark, busy);
                Ok(FireDelay::Immediate)
            }
            Err(err) => {
                self.phase = Phase::Idle;
                busy.release();
                Err(SkipReason::Timer(err))
            }
        }
    }

    /// Advances the delay or dwell on a scheduler interrupt.
    ///
    /// Returns the channel when this event raised its spark output.
    pub fn on_timer_event<P, S>(
        &mut self,
        event: RawEvent,
        timers: &mut TimerService<P>,
        spark: &mut S,
        busy: &BusyFlag,
    ) -> Option<SparkChannel>
    where
        P: TimerPeripheral,
        S: SparkOutput,
    {
        match (self.phase, event) {
            (Phase::Armed(channel), RawEvent::CompareA) => {
                self.ignite(channel, timers, spark, busy);
                Some(channel)
            }
            (Phase::Counting { channel, remaining }, RawEvent::CompareA) => {
                if remaining <= 1 {
                    self.ignite(channel, timers, spark, busy);
                    Some(channel)
                } else {
                    self.phase = Phase::Counting {
                        channel,
                        remaining: remaining - 1,
                    };
                    None
                }
            }
            (Phase::Dwell(channel), RawEvent::CompareB) => {
                spark.set(channel, false);
                None
            }
            (Phase::Dwell(channel), RawEvent::CompareA) => {
                spark.set(channel, false);
                timers.stop(self.unit);
                self.phase = Phase::Idle;
                busy.release();
                None
            }
            _ => None,
        }
    }

    /// Fail-safe: both outputs low, scheduler stopped, guard released.
    pub fn extinguish<P, S>(&mut self, timers: &mut TimerService<P>, spark: &mut S, busy: &BusyFlag)
    where
        P: TimerPeripheral,
        S: SparkOutput,
    {
        timers.stop(self.unit);
        for channel in SparkChannel::ALL {
            spark.set(channel, false);
        }
        self.phase = Phase::Idle;
        busy.release();
    }

    fn schedule_direct<P: TimerPeripheral>(
        &mut self,
        channel: SparkChannel,
        rps: u32,
        value: u8,
        timers: &mut TimerService<P>,
    ) -> Result<Option<FireDelay>, ConfigError> {
        let hz = rps.saturating_mul(self.sparks_per_rev);
        let achieved =
            timers.configure_periodic(self.unit, TimerRole::Scheduler, hz, OutputMode::None)?;
        let delay_ticks = achieved.period_ticks * u32::from(value) / u32::from(VALUE_MAX);
        if delay_ticks == 0 {
            return Ok(None);
        }

        let preload = u16::try_from(achieved.period_ticks - delay_ticks).unwrap_or(0);
        timers.run(self.unit, preload)?;
        self.phase = Phase::Armed(channel);
        Ok(Some(FireDelay::Direct {
            preload,
            delay_ticks,
        }))
    }

    fn schedule_extended<P: TimerPeripheral>(
        &mut self,
        channel: SparkChannel,
        rps: u32,
        value: u8,
        timers: &mut TimerService<P>,
    ) -> Result<Option<FireDelay>, ConfigError> {
        let achieved = timers.configure_periodic(
            self.unit,
            TimerRole::Scheduler,
            self.delay_tick_hz,
            OutputMode::None,
        )?;
        let interval = u64::from(VALUE_MAX) * u64::from(rps) * u64::from(self.sparks_per_rev);
        let wait = u64::from(achieved.hz) * u64::from(value) / interval;
        let wait_cycles = u32::try_from(wait).unwrap_or(u32::MAX);
        if wait_cycles == 0 {
            return Ok(None);
        }

        timers.run(self.unit, 0)?;
        self.phase = Phase::Counting {
            channel,
            remaining: wait_cycles,
        };
        Ok(Some(FireDelay::Extended { wait_cycles }))
    }

    fn ignite<P, S>(
        &mut self,
        channel: SparkChannel,
        timers: &mut TimerService<P>,
        spark: &mut S,
        busy: &BusyFlag,
    ) where
        P: TimerPeripheral,
        S: SparkOutput,
    {
        timers.stop(self.unit);
        spark.set(channel, true);

        let dwell = timers
            .configure_pwm(
                self.unit,
                TimerRole::Scheduler,
                self.dwell_hz,
                self.dwell_duty_percent,
            )
            .and_then(|_| timers.run(self.unit, 0));
        if dwell.is_ok() {
            self.phase = Phase::Dwell(channel);
        } else {
            spark.set(channel, false);
            self.phase = Phase::Idle;
            busy.release();
        }
    }
}
