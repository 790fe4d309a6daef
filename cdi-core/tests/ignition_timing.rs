mod support;

use cdi_core::calibration::{CalibrationStore, TimingRecord};
use cdi_core::ignition::{FireDelay, SparkChannel};
use cdi_core::telemetry::{TelemetryEventKind, TelemetryPayload};
use cdi_core::timer::{RawEvent, TimerMode, TimerUnit};

use support::{Engine, feed, started_engine};

/// 3000 rpm with the short tooth third in the revolution.
const REVOLUTION_3000_RPM: [u16; 4] = [1_300, 1_300, 1_100, 1_300];

/// 600 rpm, below the slowest direct scheduler period.
const REVOLUTION_600_RPM: [u16; 4] = [6_250, 6_250, 6_000, 6_500];

fn calibrated(slot: usize, speed: u16, timing: u8, shift: u8) -> CalibrationStore {
    let mut store = CalibrationStore::factory();
    store
        .set(slot, TimingRecord::new(speed, timing))
        .expect("valid record");
    store.set_shift(shift).expect("valid shift");
    store
}

fn scheduler_event(engine: &mut Engine, event: RawEvent) {
    engine.on_interrupt(TimerUnit::Timer0, event);
}

/// Locks on [`REVOLUTION_3000_RPM`] and feeds the +2 tooth, scheduling the back spark.
fn scheduled_back_spark(calibration: CalibrationStore) -> Engine {
    let mut engine = started_engine(calibration);
    feed(&mut engine, &REVOLUTION_3000_RPM);
    feed(&mut engine, &REVOLUTION_3000_RPM);
    let phase = engine.synchronizer().phase().expect("locked");
    assert_eq!((phase.reference, phase.plus2), (2, 0));
    feed(&mut engine, &REVOLUTION_3000_RPM[..1]);
    engine
}

#[test]
fn direct_delay_matches_fraction_of_spark_interval() {
    // Slot 6 opens the 2820..3060 rpm bracket.
    let engine = scheduled_back_spark(calibrated(6, 2_820, 10, 40));
    assert_eq!(engine.speed().map(|s| s.rpm), Some(3_000));

    let setup = engine.timers().peripheral().applied[0].expect("scheduler programmed");
    assert_eq!(setup.mode, TimerMode::Periodic);
    let period = u32::from(setup.top) + 1;
    let preload = engine.timers().peripheral().last_load[0].expect("counter preloaded");
    let delay_ticks = period - u32::from(preload);

    // 30/180 of the period, truncated, within one LSB.
    let exact = period * 30;
    assert!(delay_ticks * 180 <= exact);
    assert!((delay_ticks + 1) * 180 > exact);
    assert!(engine.timers().peripheral().started[0]);
    assert!(engine.is_busy());
    assert_eq!(engine.spark().levels, [false, false]);

    let scheduled = engine.telemetry().latest().expect("scheduled");
    assert_eq!(scheduled.event, TelemetryEventKind::Scheduled(SparkChannel::Back));
    assert_eq!(
        scheduled.details,
        TelemetryPayload::Fire {
            rpm: 3_000,
            value: 30,
            delay: FireDelay::Direct {
                preload: 131,
                delay_ticks: 26,
            },
        }
    );
}

#[test]
fn spark_pulse_runs_one_dwell_period() {
    let mut engine = scheduled_back_spark(calibrated(6, 2_820, 10, 40));

    scheduler_event(&mut engine, RawEvent::CompareA);
    assert_eq!(engine.spark().levels, [false, true]);
    let dwell = engine.timers().peripheral().applied[0].expect("dwell programmed");
    assert_eq!(dwell.mode, TimerMode::Pwm);
    assert_eq!(dwell.compare_b, dwell.top / 2);
    assert_eq!(
        engine.telemetry().latest().map(|r| r.event),
        Some(TelemetryEventKind::Ignited(SparkChannel::Back))
    );

    scheduler_event(&mut engine, RawEvent::CompareB);
    assert_eq!(engine.spark().levels, [false, false]);
    assert!(engine.is_busy());

    scheduler_event(&mut engine, RawEvent::CompareA);
    assert!(!engine.is_busy());
    assert!(!engine.timers().peripheral().started[0]);
    assert_eq!(engine.spark().rising, [0, 1]);

    // Stray compare events after the pulse change nothing.
    scheduler_event(&mut engine, RawEvent::CompareA);
    assert_eq!(engine.spark().rising, [0, 1]);
}

#[test]
fn front_channel_fires_on_reference_tooth() {
    let mut engine = scheduled_back_spark(calibrated(6, 2_820, 10, 40));
    for event in [RawEvent::CompareA, RawEvent::CompareB, RawEvent::CompareA] {
        scheduler_event(&mut engine, event);
    }

    feed(&mut engine, &REVOLUTION_3000_RPM[1..3]);
    assert_eq!(
        engine.telemetry().latest().map(|r| r.event),
        Some(TelemetryEventKind::Scheduled(SparkChannel::Front))
    );
    scheduler_event(&mut engine, RawEvent::CompareA);
    assert_eq!(engine.spark().levels, [true, false]);
    assert_eq!(engine.spark().rising, [1, 1]);
}

#[test]
fn fire_position_during_pulse_is_skipped() {
    let mut engine = scheduled_back_spark(calibrated(6, 2_820, 10, 40));
    assert!(engine.is_busy());

    feed(&mut engine, &REVOLUTION_3000_RPM[1..3]);
    assert_eq!(
        engine.telemetry().latest().map(|r| r.event),
        Some(TelemetryEventKind::Overlap(SparkChannel::Front))
    );
    assert_eq!(engine.spark().rising, [0, 0]);
}

#[test]
fn slow_engine_counts_delay_ticks() {
    // Slot 0 covers 60..1620 rpm.
    let mut engine = started_engine(calibrated(0, 60, 10, 40));
    feed(&mut engine, &REVOLUTION_600_RPM);
    feed(&mut engine, &REVOLUTION_600_RPM);
    let speed = engine.speed().expect("synchronized");
    assert_eq!(speed.rps, 10);

    feed(&mut engine, &REVOLUTION_600_RPM[..1]);
    let scheduled = engine.telemetry().latest().expect("scheduled");
    // 10 kHz * 30 / (180 * 10 rps * 2 sparks)
    assert!(matches!(
        scheduled.details,
        TelemetryPayload::Fire {
            delay: FireDelay::Extended { wait_cycles: 83 },
            ..
        }
    ));

    for _ in 0..82 {
        scheduler_event(&mut engine, RawEvent::CompareA);
    }
    assert_eq!(engine.spark().levels, [false, false]);
    scheduler_event(&mut engine, RawEvent::CompareA);
    assert_eq!(engine.spark().levels, [false, true]);
}

#[test]
fn zero_advance_fires_inside_the_capture() {
    let engine = scheduled_back_spark(calibrated(6, 2_820, 40, 40));

    assert_eq!(engine.spark().levels, [false, true]);
    assert!(matches!(
        engine.telemetry().latest().map(|r| r.details),
        Some(TelemetryPayload::Fire {
            delay: FireDelay::Immediate,
            ..
        })
    ));
}
