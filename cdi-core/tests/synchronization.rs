mod support;

use cdi_core::calibration::{CalibrationStore, TimingRecord};
use cdi_core::sync::{PhaseIndices, Speed, SyncState};
use cdi_core::telemetry::{TelemetryEventKind, TelemetryPayload};
use cdi_core::timer::{RawEvent, TimerUnit};

use support::{feed, started_engine};

const SHORT_TOOTH_REVOLUTION: [u16; 4] = [100, 100, 100, 50];

#[test]
fn identical_periods_lock_on_first_tooth() {
    let mut engine = started_engine(CalibrationStore::factory());
    feed(&mut engine, &[500; 7]);
    assert_eq!(engine.sync_state(), SyncState::Synchronizing(1));

    feed(&mut engine, &[500]);
    assert_eq!(engine.sync_state(), SyncState::Synchronized);
    assert_eq!(
        engine.synchronizer().phase(),
        Some(PhaseIndices {
            reference: 0,
            plus1: 1,
            plus2: 2,
            plus3: 3,
        })
    );
}

#[test]
fn short_tooth_anchors_the_revolution() {
    let mut engine = started_engine(CalibrationStore::factory());
    feed(&mut engine, &SHORT_TOOTH_REVOLUTION);
    feed(&mut engine, &SHORT_TOOTH_REVOLUTION);

    let phase = engine.synchronizer().phase().expect("locked");
    assert_eq!(phase.reference, 3);
    assert_eq!(phase.plus2, 1);

    let speed = engine.speed().expect("synchronized");
    assert_eq!(speed, Speed::from_ticks(250_000, 350));
    assert_eq!(speed.rps, 714);
    assert_eq!(speed.rpm, 42_840);

    let lock = engine.telemetry().latest().expect("lock recorded");
    assert_eq!(lock.event, TelemetryEventKind::Synchronized);
    assert_eq!(lock.tooth, 8);
    assert!(matches!(
        lock.details,
        TelemetryPayload::Lock { reference: 3, .. }
    ));
}

#[test]
fn resynchronizing_the_same_stream_is_idempotent() {
    let stream = [1_300, 1_300, 1_100, 1_300, 1_300, 1_300, 1_100, 1_300];
    let mut engine = started_engine(CalibrationStore::factory());

    feed(&mut engine, &stream);
    let first = engine.synchronizer().phase();
    assert!(first.is_some());

    engine.resynchronize();
    assert_eq!(engine.speed(), None);
    feed(&mut engine, &stream);
    assert_eq!(engine.synchronizer().phase(), first);
}

#[test]
fn resynchronizing_mid_dwell_drops_the_spark() {
    let mut calibration = CalibrationStore::factory();
    calibration
        .set(6, TimingRecord::new(2_820, 40))
        .expect("valid record");
    calibration.set_shift(40).expect("valid shift");
    let mut engine = started_engine(calibration);

    let revolution = [1_300, 1_300, 1_100, 1_300];
    feed(&mut engine, &revolution);
    feed(&mut engine, &revolution);
    // Zero delay: the back spark fires on the +2 tooth itself.
    feed(&mut engine, &revolution[..1]);
    assert_eq!(engine.spark().levels, [false, true]);
    assert!(engine.is_busy());

    engine.resynchronize();
    assert_eq!(engine.sync_state(), SyncState::Unsynchronized);
    assert_eq!(engine.spark().levels, [false, false]);
    assert!(!engine.is_busy());
    assert_eq!(
        engine.timers().handle(TimerUnit::Timer0).map(|h| h.running),
        Some(false)
    );
}

#[test]
fn overflows_extend_the_captured_period() {
    let mut engine = started_engine(CalibrationStore::factory());
    engine.timers_mut().peripheral_mut().counters[1] = 4_321;

    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    feed(&mut engine, &[1_000]);

    assert_eq!(engine.synchronizer().window()[0], 65_536 + 1_000);
    assert_eq!(
        engine.timers().handle(TimerUnit::Timer1).map(|h| h.overflows),
        Some(0)
    );
    assert_eq!(engine.timers().peripheral().counters[1], 0);

    feed(&mut engine, &[1_000]);
    assert_eq!(engine.synchronizer().window()[1], 1_000);
}

#[test]
fn stall_drops_speed_and_recovers_on_next_revolutions() {
    let mut engine = started_engine(CalibrationStore::factory());
    feed(&mut engine, &[2_000; 8]);
    assert!(engine.speed().is_some());

    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    assert_eq!(engine.speed(), None);
    assert_eq!(engine.sync_state(), SyncState::Unsynchronized);
    assert_eq!(engine.synchronizer().tick_index(), 0);
    assert_eq!(engine.spark().levels, [false, false]);

    let stalls = engine
        .telemetry()
        .oldest_first()
        .filter(|record| record.event == TelemetryEventKind::Stalled)
        .count();
    assert_eq!(stalls, 1);

    feed(&mut engine, &[2_000; 8]);
    assert_eq!(engine.speed().map(|speed| speed.rpm), Some(1_860));
}

#[test]
fn single_overflow_between_teeth_is_tolerated() {
    let mut engine = started_engine(CalibrationStore::factory());
    feed(&mut engine, &[2_000; 8]);

    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Capture(0));
    assert_eq!(engine.sync_state(), SyncState::Synchronized);
    assert_eq!(engine.synchronizer().window()[0], 65_536);

    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    assert_eq!(engine.sync_state(), SyncState::Synchronized);
    engine.on_interrupt(TimerUnit::Timer1, RawEvent::Overflow);
    assert_eq!(engine.sync_state(), SyncState::Unsynchronized);
}
