//! Hardware timer service shared by the firmware and the host emulator.
//!
//! Physical counter units are owned through a small arena indexed by
//! [`TimerUnit`]. Each configured unit carries exactly one [`TimerRole`], and
//! interrupt vectors hand their raw events to [`TimerService::route`], which
//! turns them into a closed [`Dispatch`] value for a single [`TimerClient`].
//! Register access stays behind the [`TimerPeripheral`] trait so the same
//! divider math and soft overflow extension run unchanged on the host.

use core::fmt;

pub mod clock;

pub use clock::{ClockTree, CounterWidth, Divider, UnitProfile};

/// Number of physical timer units on the target.
pub const TIMER_UNITS: usize = 3;

/// Identifier for a physical counter/compare/capture unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerUnit {
    Timer0,
    Timer1,
    Timer2,
}

impl TimerUnit {
    /// Every unit in index order.
    pub const ALL: [TimerUnit; TIMER_UNITS] =
        [TimerUnit::Timer0, TimerUnit::Timer1, TimerUnit::Timer2];

    /// Deterministic index into the handle arena.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            TimerUnit::Timer0 => 0,
            TimerUnit::Timer1 => 1,
            TimerUnit::Timer2 => 2,
        }
    }
}

impl fmt::Display for TimerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer{}", self.as_index())
    }
}

/// Capability a configured unit provides to its owner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerRole {
    /// Free-running periodic interrupt, optionally toggling its output pin.
    Simple,
    /// Input-capture period measurement with soft overflow extension.
    Meter,
    /// Compare-match scheduling of delayed ignition and dwell pulses.
    Scheduler,
}

impl fmt::Display for TimerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerRole::Simple => f.write_str("simple"),
            TimerRole::Meter => f.write_str("meter"),
            TimerRole::Scheduler => f.write_str("scheduler"),
        }
    }
}

/// Counting mode programmed into a unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerMode {
    /// Clear-on-compare with `top` in compare A.
    Periodic,
    /// Full-width free running counter latching on the capture pin.
    Capture,
    /// Fast PWM with `top` in compare A and the duty edge in compare B.
    Pwm,
}

/// Pin behaviour on compare match.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    None,
    /// Toggle the unit's B output on every compare match.
    Toggle,
}

/// Register-level description of a configured unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnitSetup {
    pub mode: TimerMode,
    pub prescale: u16,
    pub top: u16,
    pub compare_b: u16,
    pub output: OutputMode,
}

/// Frequency actually produced by a configured unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Achieved {
    /// Event rate in Hz (tick rate for capture units), truncated.
    pub hz: u32,
    /// Counter ticks per period (`top + 1`).
    pub period_ticks: u32,
}

/// Raw interrupt sources reported by the vectors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RawEvent {
    CompareA,
    CompareB,
    Overflow,
    /// Input capture with the latched counter value.
    Capture(u16),
}

/// Events produced by a meter unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MeterEvent {
    /// Ticks since the previous capture, including soft overflow extension.
    Period(u32),
    /// Hardware overflow with the number of overflows since the last capture.
    Overflow { count: u32 },
}

/// Routed interrupt, tagged by the role that owns the unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    Simple { unit: TimerUnit, event: RawEvent },
    Meter { unit: TimerUnit, event: MeterEvent },
    Scheduler { unit: TimerUnit, event: RawEvent },
}

/// Receiver of routed timer interrupts.
pub trait TimerClient {
    fn dispatch(&mut self, dispatch: Dispatch);
}

/// Errors surfaced by the configuration calls. No state changes on error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The request exceeds half the system clock.
    FrequencyTooHigh { requested: u32, ceiling: u32 },
    /// Even the largest divider cannot bring the compare value within range.
    FrequencyTooLow { requested: u32, floor: u32 },
    /// The unit lacks the capability (e.g. capture on an 8-bit unit).
    UnsupportedUnit(TimerUnit),
    /// Duty cycle above 100 percent.
    InvalidDuty(u8),
    /// Another role already owns the unit.
    Claimed { unit: TimerUnit, owner: TimerRole },
    /// `run` on a unit that was never configured.
    Unconfigured(TimerUnit),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FrequencyTooHigh { requested, ceiling } => {
                write!(f, "{requested} Hz exceeds the {ceiling} Hz ceiling")
            }
            ConfigError::FrequencyTooLow { requested, floor } => {
                write!(f, "{requested} Hz is below the {floor} Hz floor")
            }
            ConfigError::UnsupportedUnit(unit) => write!(f, "{unit} cannot serve this role"),
            ConfigError::InvalidDuty(duty) => write!(f, "duty {duty}% out of range"),
            ConfigError::Claimed { unit, owner } => write!(f, "{unit} is owned by the {owner}"),
            ConfigError::Unconfigured(unit) => write!(f, "{unit} is not configured"),
        }
    }
}

/// Register seam implemented by the MCU adapter and host simulators.
pub trait TimerPeripheral {
    /// Programs mode, compare registers, and interrupt enables with the clock stopped.
    fn apply(&mut self, unit: TimerUnit, setup: &UnitSetup);
    /// Connects the prescaled clock source.
    fn start(&mut self, unit: TimerUnit, setup: &UnitSetup);
    /// Disconnects the clock source and masks the unit's interrupts.
    fn halt(&mut self, unit: TimerUnit);
    fn load_counter(&mut self, unit: TimerUnit, value: u16);
    fn counter(&self, unit: TimerUnit) -> u16;
}

/// Peripheral that accepts every call and never counts.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTimers;

impl TimerPeripheral for NoopTimers {
    fn apply(&mut self, _unit: TimerUnit, _setup: &UnitSetup) {}

    fn start(&mut self, _unit: TimerUnit, _setup: &UnitSetup) {}

    fn halt(&mut self, _unit: TimerUnit) {}

    fn load_counter(&mut self, _unit: TimerUnit, _value: u16) {}

    fn counter(&self, _unit: TimerUnit) -> u16 {
        0
    }
}

/// Ownership record for one configured unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimerHandle {
    pub role: TimerRole,
    pub setup: UnitSetup,
    pub achieved: Achieved,
    pub overflows: u32,
    pub running: bool,
}

/// Arena of timer handles plus the peripheral they program.
pub struct TimerService<P: TimerPeripheral> {
    peripheral: P,
    clock: ClockTree,
    handles: [Option<TimerHandle>; TIMER_UNITS],
}

impl<P: TimerPeripheral> TimerService<P> {
    #[must_use]
    pub const fn new(peripheral: P, clock: ClockTree) -> Self {
        Self {
            peripheral,
            clock,
            handles: [None; TIMER_UNITS],
        }
    }

    pub fn clock(&self) -> &ClockTree {
        &self.clock
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    /// Returns the handle for `unit` when it is owned.
    pub fn handle(&self, unit: TimerUnit) -> Option<&TimerHandle> {
        self.handles[unit.as_index()].as_ref()
    }

    /// Programs `unit` to raise compare interrupts at `hz`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no divider reaches `hz` or the unit is
    /// owned by a different role; the unit is left untouched.
    pub fn configure_periodic(
        &mut self,
        unit: TimerUnit,
        role: TimerRole,
        hz: u32,
        output: OutputMode,
    ) -> Result<Achieved, ConfigError> {
        self.claim(unit, role)?;
        let divider = self.clock.divider(unit, hz)?;
        let setup = UnitSetup {
            mode: TimerMode::Periodic,
            prescale: divider.prescale,
            top: divider.top,
            compare_b: divider.top,
            output,
        };
        Ok(self.install(unit, role, setup, divider.achieved()))
    }

    /// Arms input capture plus overflow on `unit` at the fastest tick rate
    /// not exceeding `max_tick_hz`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedUnit`] for units narrower than 16
    /// bits and divider errors when `max_tick_hz` is unreachable.
    pub fn configure_capture(
        &mut self,
        unit: TimerUnit,
        max_tick_hz: u32,
    ) -> Result<Achieved, ConfigError> {
        self.claim(unit, TimerRole::Meter)?;
        if self.clock.profile(unit).width != CounterWidth::Bits16 {
            return Err(ConfigError::UnsupportedUnit(unit));
        }
        let divider = self.clock.tick_divider(unit, max_tick_hz)?;
        let setup = UnitSetup {
            mode: TimerMode::Capture,
            prescale: divider.prescale,
            top: divider.top,
            compare_b: divider.top,
            output: OutputMode::None,
        };
        Ok(self.install(unit, TimerRole::Meter, setup, divider.achieved()))
    }

    /// Programs a single-slope pulse: compare B at `duty_percent` of the
    /// period, compare A at the period end.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDuty`] above 100 percent and divider
    /// errors when `hz` is unreachable.
    pub fn configure_pwm(
        &mut self,
        unit: TimerUnit,
        role: TimerRole,
        hz: u32,
        duty_percent: u8,
    ) -> Result<Achieved, ConfigError> {
        self.claim(unit, role)?;
        if duty_percent > 100 {
            return Err(ConfigError::InvalidDuty(duty_percent));
        }
        let divider = self.clock.divider(unit, hz)?;
        let compare_b = u32::from(divider.top) * u32::from(duty_percent) / 100;
        let setup = UnitSetup {
            mode: TimerMode::Pwm,
            prescale: divider.prescale,
            top: divider.top,
            compare_b: u16::try_from(compare_b).unwrap_or(divider.top),
            output: OutputMode::None,
        };
        Ok(self.install(unit, role, setup, divider.achieved()))
    }

    /// Loads `initial` into the counter and starts the clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unconfigured`] if nothing owns the unit.
    pub fn run(&mut self, unit: TimerUnit, initial: u16) -> Result<(), ConfigError> {
        let handle = self.handles[unit.as_index()]
            .as_mut()
            .ok_or(ConfigError::Unconfigured(unit))?;
        handle.overflows = 0;
        handle.running = true;
        self.peripheral.load_counter(unit, initial);
        self.peripheral.start(unit, &handle.setup);
        Ok(())
    }

    /// Stops the clock; the unit stays owned by its role.
    pub fn stop(&mut self, unit: TimerUnit) {
        if let Some(handle) = self.handles[unit.as_index()].as_mut() {
            handle.running = false;
        }
        self.peripheral.halt(unit);
    }

    /// Counter value extended by the soft overflow count.
    pub fn read_counter(&self, unit: TimerUnit) -> u32 {
        let raw = u32::from(self.peripheral.counter(unit));
        let overflows = self.handles[unit.as_index()].map_or(0, |handle| handle.overflows);
        raw.saturating_add(
            overflows.saturating_mul(self.clock.profile(unit).width.span()),
        )
    }

    /// Converts a raw interrupt into a [`Dispatch`] for the owning role.
    ///
    /// Events for unowned or stopped units are swallowed. Captures yield the
    /// absolute period and reset both the extension and the hardware counter.
    pub fn route(&mut self, unit: TimerUnit, event: RawEvent) -> Option<Dispatch> {
        let span = self.clock.profile(unit).width.span();
        let handle = self.handles[unit.as_index()].as_mut()?;
        if !handle.running {
            return None;
        }

        match handle.role {
            TimerRole::Simple => Some(Dispatch::Simple { unit, event }),
            TimerRole::Scheduler => Some(Dispatch::Scheduler { unit, event }),
            TimerRole::Meter => match event {
                RawEvent::Overflow => {
                    handle.overflows = handle.overflows.saturating_add(1);
                    Some(Dispatch::Meter {
                        unit,
                        event: MeterEvent::Overflow {
                            count: handle.overflows,
                        },
                    })
                }
                RawEvent::Capture(raw) => {
                    let period =
                        u32::from(raw).saturating_add(handle.overflows.saturating_mul(span));
                    handle.overflows = 0;
                    self.peripheral.load_counter(unit, 0);
                    Some(Dispatch::Meter {
                        unit,
                        event: MeterEvent::Period(period),
                    })
                }
                RawEvent::CompareA | RawEvent::CompareB => None,
            },
        }
    }

    fn claim(&self, unit: TimerUnit, role: TimerRole) -> Result<(), ConfigError> {
        match self.handles[unit.as_index()] {
            Some(handle) if handle.role != role => Err(ConfigError::Claimed {
                unit,
                owner: handle.role,
            }),
            _ => Ok(()),
        }
    }

    fn install(
        &mut self,
        unit: TimerUnit,
        role: TimerRole,
        setup: UnitSetup,
        achieved: Achieved,
    ) -> Achieved {
        self.peripheral.halt(unit);
        self.peripheral.apply(unit, &setup);
        self.handles[unit.as_index()] = Some(TimerHandle {
            role,
            setup,
            achieved,
            overflows: 0,
            running: false,
        });
        achieved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ATMEGA328P;

    #[derive(Default)]
    struct MockTimers {
        counters: [u16; TIMER_UNITS],
        applied: [Option<UnitSetup>; TIMER_UNITS],
        started: [bool; TIMER_UNITS],
    }

    impl TimerPeripheral for MockTimers {
        fn apply(&mut self, unit: TimerUnit, setup: &UnitSetup) {
            self.applied[unit.as_index()] = Some(*setup);
        }

        fn start(&mut self, unit: TimerUnit, _setup: &UnitSetup) {
            self.started[unit.as_index()] = true;
        }

        fn halt(&mut self, unit: TimerUnit) {
            self.started[unit.as_index()] = false;
        }

        fn load_counter(&mut self, unit: TimerUnit, value: u16) {
            self.counters[unit.as_index()] = value;
        }

        fn counter(&self, unit: TimerUnit) -> u16 {
            self.counters[unit.as_index()]
        }
    }

    fn service() -> TimerService<MockTimers> {
        TimerService::new(MockTimers::default(), ATMEGA328P)
    }

    #[test]
    fn periodic_configuration_programs_peripheral() {
        let mut timers = service();
        let achieved = timers
            .configure_periodic(TimerUnit::Timer0, TimerRole::Scheduler, 100, OutputMode::None)
            .expect("100 Hz fits timer0");

        assert_eq!(achieved.period_ticks, 157);
        assert!(achieved.hz <= 100);
        let setup = timers.peripheral().applied[0].expect("setup applied");
        assert_eq!(setup.prescale, 1024);
        assert_eq!(setup.top, 156);
        assert_eq!(setup.mode, TimerMode::Periodic);
        assert!(!timers.peripheral().started[0]);
    }

    #[test]
    fn failed_configuration_leaves_unit_untouched() {
        let mut timers = service();
        timers
            .configure_periodic(TimerUnit::Timer0, TimerRole::Simple, 1_000, OutputMode::None)
            .expect("1 kHz fits timer0");
        let before = *timers.handle(TimerUnit::Timer0).expect("owned");

        let err = timers
            .configure_periodic(TimerUnit::Timer0, TimerRole::Simple, 10, OutputMode::None)
            .expect_err("10 Hz is below the 8-bit floor");
        assert!(matches!(err, ConfigError::FrequencyTooLow { .. }));
        assert_eq!(timers.handle(TimerUnit::Timer0), Some(&before));

        let err = timers
            .configure_periodic(
                TimerUnit::Timer0,
                TimerRole::Simple,
                9_000_000,
                OutputMode::None,
            )
            .expect_err("above half the clock");
        assert_eq!(
            err,
            ConfigError::FrequencyTooHigh {
                requested: 9_000_000,
                ceiling: 8_000_000
            }
        );
        assert_eq!(timers.handle(TimerUnit::Timer0), Some(&before));
    }

    #[test]
    fn roles_are_exclusive_per_unit() {
        let mut timers = service();
        timers
            .configure_capture(TimerUnit::Timer1, 250_000)
            .expect("meter fits timer1");
        let err = timers
            .configure_periodic(TimerUnit::Timer1, TimerRole::Simple, 100, OutputMode::None)
            .expect_err("meter owns timer1");
        assert_eq!(
            err,
            ConfigError::Claimed {
                unit: TimerUnit::Timer1,
                owner: TimerRole::Meter
            }
        );
    }

    #[test]
    fn capture_requires_sixteen_bit_unit() {
        let mut timers = service();
        assert_eq!(
            timers.configure_capture(TimerUnit::Timer0, 250_000),
            Err(ConfigError::UnsupportedUnit(TimerUnit::Timer0))
        );
    }

    #[test]
    fn capture_extends_period_with_overflows() {
        let mut timers = service();
        let achieved = timers
            .configure_capture(TimerUnit::Timer1, 250_000)
            .expect("meter fits timer1");
        assert_eq!(achieved.hz, 250_000);
        timers.run(TimerUnit::Timer1, 0).expect("configured");

        assert_eq!(
            timers.route(TimerUnit::Timer1, RawEvent::Overflow),
            Some(Dispatch::Meter {
                unit: TimerUnit::Timer1,
                event: MeterEvent::Overflow { count: 1 }
            })
        );
        timers.route(TimerUnit::Timer1, RawEvent::Overflow);
        timers.peripheral_mut().counters[1] = 999;

        assert_eq!(
            timers.route(TimerUnit::Timer1, RawEvent::Capture(1_234)),
            Some(Dispatch::Meter {
                unit: TimerUnit::Timer1,
                event: MeterEvent::Period(1_234 + 2 * 65_536)
            })
        );
        assert_eq!(timers.handle(TimerUnit::Timer1).map(|h| h.overflows), Some(0));
        assert_eq!(timers.peripheral().counters[1], 0);

        assert_eq!(
            timers.route(TimerUnit::Timer1, RawEvent::Capture(40)),
            Some(Dispatch::Meter {
                unit: TimerUnit::Timer1,
                event: MeterEvent::Period(40)
            })
        );
    }

    #[test]
    fn read_counter_includes_extension() {
        let mut timers = service();
        timers
            .configure_capture(TimerUnit::Timer1, 250_000)
            .expect("meter fits timer1");
        timers.run(TimerUnit::Timer1, 0).expect("configured");
        timers.route(TimerUnit::Timer1, RawEvent::Overflow);
        timers.peripheral_mut().counters[1] = 10;
        assert_eq!(timers.read_counter(TimerUnit::Timer1), 65_546);
    }

    #[test]
    fn events_for_idle_units_are_dropped() {
        let mut timers = service();
        assert_eq!(timers.route(TimerUnit::Timer2, RawEvent::CompareA), None);

        timers
            .configure_periodic(TimerUnit::Timer2, TimerRole::Simple, 100, OutputMode::Toggle)
            .expect("100 Hz fits timer2");
        assert_eq!(timers.route(TimerUnit::Timer2, RawEvent::CompareA), None);

        timers.run(TimerUnit::Timer2, 0).expect("configured");
        assert_eq!(
            timers.route(TimerUnit::Timer2, RawEvent::CompareA),
            Some(Dispatch::Simple {
                unit: TimerUnit::Timer2,
                event: RawEvent::CompareA
            })
        );

        timers.stop(TimerUnit::Timer2);
        assert_eq!(timers.route(TimerUnit::Timer2, RawEvent::CompareA), None);
    }

    #[test]
    fn pwm_places_duty_edge_in_compare_b() {
        let mut timers = service();
        let achieved = timers
            .configure_pwm(TimerUnit::Timer0, TimerRole::Scheduler, 1_000, 50)
            .expect("1 kHz fits timer0");
        assert_eq!(achieved.hz, 1_000);
        let setup = timers.peripheral().applied[0].expect("setup applied");
        assert_eq!(setup.mode, TimerMode::Pwm);
        assert_eq!(setup.prescale, 64);
        assert_eq!(setup.top, 249);
        assert_eq!(setup.compare_b, 124);

        assert_eq!(
            timers.configure_pwm(TimerUnit::Timer0, TimerRole::Scheduler, 1_000, 101),
            Err(ConfigError::InvalidDuty(101))
        );
    }

    #[test]
    fn run_requires_configuration() {
        let mut timers = service();
        assert_eq!(
            timers.run(TimerUnit::Timer0, 0),
            Err(ConfigError::Unconfigured(TimerUnit::Timer0))
        );
    }
}
