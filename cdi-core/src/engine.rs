//! Ignition engine: one owner for the timers, synchronizer, scheduler, and
//! calibration, plus the entry points interrupt vectors and the
//! configuration link call into.

use crate::calibration::{CalibrationStore, CommitError, NonVolatile, RangeError, TimingRecord};
use crate::config::{EngineConfig, TEETH_PER_REV};
use crate::guard::BusyFlag;
use crate::ignition::{IgnitionScheduler, SparkChannel, SparkOutput};
use crate::remote::ControlSurface;
use crate::sync::{CycleSynchronizer, SampleOutcome, Speed, SyncParams, SyncState};
use crate::telemetry::{
    TELEMETRY_RING_CAPACITY, TelemetryEventKind, TelemetryPayload, TelemetryRecorder,
};
use crate::timer::{
    Achieved, ConfigError, Dispatch, MeterEvent, OutputMode, RawEvent, TimerClient,
    TimerPeripheral, TimerRole, TimerService, TimerUnit,
};

pub struct Ignition<P, S, const TELEMETRY: usize = TELEMETRY_RING_CAPACITY>
where
    P: TimerPeripheral,
    S: SparkOutput,
{
    config: EngineConfig,
    timers: TimerService<P>,
    spark: S,
    sync: CycleSynchronizer<TEETH_PER_REV>,
    scheduler: IgnitionScheduler,
    calibration: CalibrationStore,
    busy: BusyFlag,
    telemetry: TelemetryRecorder<TELEMETRY>,
    teeth: u32,
    heartbeats: u32,
}

impl<P, S, const TELEMETRY: usize> Ignition<P, S, TELEMETRY>
where
    P: TimerPeripheral,
    S: SparkOutput,
{
    /// Wires the timer peripheral and spark outputs to a fresh engine.
    pub fn new(timers: P, spark: S, calibration: CalibrationStore, config: EngineConfig) -> Self {
        Self {
            timers: TimerService::new(timers, config.clock),
            spark,
            sync: CycleSynchronizer::new(SyncParams::from_config(&config)),
            scheduler: IgnitionScheduler::new(&config),
            calibration,
            busy: BusyFlag::new(),
            telemetry: TelemetryRecorder::new(),
            teeth: 0,
            heartbeats: 0,
            config,
        }
    }

    /// Drives both outputs low and arms the period meter.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the meter unit cannot capture at the configured rate.
    pub fn start(&mut self) -> Result<Achieved, ConfigError> {
        self.scheduler
            .extinguish(&mut self.timers, &mut self.spark, &self.busy);

        let meter = self.config.meter_unit;
        let achieved = self
            .timers
            .configure_capture(meter, self.config.measurement_hz)?;
        self.sync = CycleSynchronizer::new(SyncParams {
            measurement_hz: achieved.hz,
            ..SyncParams::from_config(&self.config)
        });
        self.timers.run(meter, 0)?;
        Ok(achieved)
    }

    /// Starts a free-running periodic unit toggling its output pin.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when `hz` is unreachable or the unit is taken.
    pub fn start_heartbeat(&mut self, unit: TimerUnit, hz: u32) -> Result<Achieved, ConfigError> {
        let achieved =
            self.timers
                .configure_periodic(unit, TimerRole::Simple, hz, OutputMode::Toggle)?;
        self.timers.run(unit, 0)?;
        Ok(achieved)
    }

    /// Routes a raw interrupt from `unit` through the timer service.
    pub fn on_interrupt(&mut self, unit: TimerUnit, event: RawEvent) {
        if let Some(dispatch) = self.timers.route(unit, event) {
            self.dispatch(dispatch);
        }
    }

    /// Speed estimate, only while synchronized.
    pub fn speed(&self) -> Option<Speed> {
        self.sync.speed()
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    pub fn synchronizer(&self) -> &CycleSynchronizer<TEETH_PER_REV> {
        &self.sync
    }

    /// Discards the sample window and starts a fresh sense pass with both
    /// outputs low.
    pub fn resynchronize(&mut self) {
        self.sync.reset();
        self.scheduler
            .extinguish(&mut self.timers, &mut self.spark, &self.busy);
    }

    /// # Errors
    ///
    /// [`RangeError::Slot`] past the table.
    pub fn timing_record(&self, slot: usize) -> Result<TimingRecord, RangeError> {
        self.calibration.get(slot)
    }

    /// # Errors
    ///
    /// [`RangeError`] when the slot or timing is out of bounds.
    pub fn set_timing_record(
        &mut self,
        slot: usize,
        speed: u16,
        timing: u8,
    ) -> Result<(), RangeError> {
        self.calibration.set(slot, TimingRecord::new(speed, timing))
    }

    pub fn shift(&self) -> u8 {
        self.calibration.shift()
    }

    /// # Errors
    ///
    /// [`RangeError::Value`] above the maximum delay value.
    pub fn set_shift(&mut self, shift: u8) -> Result<(), RangeError> {
        self.calibration.set_shift(shift)
    }

    /// Persists the calibration image to `memory`.
    ///
    /// # Errors
    ///
    /// [`CommitError`] when the table is not ordered by speed.
    pub fn save_calibration<M: NonVolatile>(&mut self, memory: &mut M) -> Result<(), CommitError> {
        self.calibration.commit(memory)?;
        self.telemetry.record(
            TelemetryEventKind::CalibrationSaved,
            TelemetryPayload::none(),
            self.teeth,
        );
        Ok(())
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationStore {
        &mut self.calibration
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<TELEMETRY> {
        &self.telemetry
    }

    pub fn timers(&self) -> &TimerService<P> {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerService<P> {
        &mut self.timers
    }

    pub fn spark(&self) -> &S {
        &self.spark
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tooth periods captured since start-up.
    pub fn teeth(&self) -> u32 {
        self.teeth
    }

    /// Periodic interrupts seen on simple units.
    pub fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    /// `true` while a spark is scheduled or dwelling.
    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    fn on_sample(&mut self, outcome: SampleOutcome) {
        match outcome {
            SampleOutcome::Pending => {}
            SampleOutcome::Locked(phase) => {
                let speed = self.sync.speed().unwrap_or_default();
                self.record(
                    TelemetryEventKind::Synchronized,
                    TelemetryPayload::Lock {
                        reference: u8::try_from(phase.reference).unwrap_or(u8::MAX),
                        speed,
                    },
                );
            }
            SampleOutcome::Fire { channel, speed } => self.fire(channel, speed),
            SampleOutcome::Busy { channel } => {
                self.record(TelemetryEventKind::Overlap(channel), TelemetryPayload::none());
            }
            SampleOutcome::Stalled => {
                self.scheduler
                    .extinguish(&mut self.timers, &mut self.spark, &self.busy);
                self.record(TelemetryEventKind::Stalled, TelemetryPayload::none());
            }
        }
    }

    fn fire(&mut self, channel: SparkChannel, speed: Speed) {
        let value = self.calibration.delay_value(speed.rpm);
        let scheduled = self.scheduler.fire(
            channel,
            speed,
            value,
            &mut self.timers,
            &mut self.spark,
            &self.busy,
        );
        match scheduled {
            Ok(delay) => self.record(
                TelemetryEventKind::Scheduled(channel),
                TelemetryPayload::Fire {
                    rpm: speed.rpm,
                    value,
                    delay,
                },
            ),
            Err(reason) => self.record(
                TelemetryEventKind::Skipped(channel),
                TelemetryPayload::Skip(reason),
            ),
        }
    }

    fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) {
        self.telemetry.record(event, payload, self.teeth);
    }
}

impl<P, S, const TELEMETRY: usize> TimerClient for Ignition<P, S, TELEMETRY>
where
    P: TimerPeripheral,
    S: SparkOutput,
{
    fn dispatch(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Meter {
                event: MeterEvent::Period(ticks),
                ..
            } => {
                self.teeth = self.teeth.wrapping_add(1);
                let outcome = self.sync.on_sample(ticks, &self.busy);
                self.on_sample(outcome);
            }
            Dispatch::Meter {
                event: MeterEvent::Overflow { count },
                ..
            } => {
                let outcome = self.sync.on_overflow(count);
                self.on_sample(outcome);
            }
            Dispatch::Scheduler { event, .. } => {
                let ignited = self.scheduler.on_timer_event(
                    event,
                    &mut self.timers,
                    &mut self.spark,
                    &self.busy,
                );
                if let Some(channel) = ignited {
                    self.record(TelemetryEventKind::Ignited(channel), TelemetryPayload::none());
                }
            }
            Dispatch::Simple { .. } => {
                self.heartbeats = self.heartbeats.wrapping_add(1);
            }
        }
    }
}

/// Pairs an engine with the memory its calibration is saved to.
pub struct EngineControl<'a, P, S, M, const TELEMETRY: usize = TELEMETRY_RING_CAPACITY>
where
    P: TimerPeripheral,
    S: SparkOutput,
    M: NonVolatile,
{
    engine: &'a mut Ignition<P, S, TELEMETRY>,
    memory: &'a mut M,
}

impl<'a, P, S, M, const TELEMETRY: usize> EngineControl<'a, P, S, M, TELEMETRY>
where
    P: TimerPeripheral,
    S: SparkOutput,
    M: NonVolatile,
{
    pub fn new(engine: &'a mut Ignition<P, S, TELEMETRY>, memory: &'a mut M) -> Self {
        Self { engine, memory }
    }
}

impl<P, S, M, const TELEMETRY: usize> ControlSurface for EngineControl<'_, P, S, M, TELEMETRY>
where
    P: TimerPeripheral,
    S: SparkOutput,
    M: NonVolatile,
{
    fn speed_rpm(&self) -> u32 {
        self.engine.speed().map_or(0, |speed| speed.rpm)
    }

    fn timing_record(&self, slot: usize) -> Result<TimingRecord, RangeError> {
        self.engine.timing_record(slot)
    }

    fn set_timing_record(&mut self, slot: usize, record: TimingRecord) -> Result<(), RangeError> {
        self.engine
            .set_timing_record(slot, record.speed, record.timing)
    }

    fn shift(&self) -> u8 {
        self.engine.shift()
    }

    fn set_shift(&mut self, shift: u8) -> Result<(), RangeError> {
        self.engine.set_shift(shift)
    }

    fn save(&mut self) -> Result<(), CommitError> {
        self.engine.save_calibration(self.memory)
    }
}
