//! Clock tree description and prescale divider selection.
//!
//! All arithmetic is integer and truncating so the achieved frequencies match
//! what the silicon produces for the same register values.

use super::{Achieved, ConfigError, TIMER_UNITS, TimerUnit};

/// Hardware counter width of a timer unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CounterWidth {
    Bits8,
    Bits16,
}

impl CounterWidth {
    /// Largest value the counter holds.
    #[must_use]
    pub const fn max(self) -> u32 {
        match self {
            CounterWidth::Bits8 => 0xFF,
            CounterWidth::Bits16 => 0xFFFF,
        }
    }

    /// Number of distinct counter values (one full wrap).
    #[must_use]
    pub const fn span(self) -> u32 {
        self.max() + 1
    }
}

/// Counter width and available prescale ratios of one unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnitProfile {
    pub width: CounterWidth,
    /// Prescale ratios in ascending order.
    pub prescalers: &'static [u16],
}

impl UnitProfile {
    #[must_use]
    pub const fn new(width: CounterWidth, prescalers: &'static [u16]) -> Self {
        Self { width, prescalers }
    }
}

/// Selected divider for a requested frequency.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Divider {
    pub prescale: u16,
    /// Compare value at which the period ends.
    pub top: u16,
    pub achieved_hz: u32,
}

impl Divider {
    #[must_use]
    pub fn achieved(&self) -> Achieved {
        Achieved {
            hz: self.achieved_hz,
            period_ticks: u32::from(self.top) + 1,
        }
    }
}

/// Fixed system clock plus the profile of every timer unit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockTree {
    pub system_hz: u32,
    pub units: [UnitProfile; TIMER_UNITS],
}

impl ClockTree {
    #[must_use]
    pub const fn new(system_hz: u32, units: [UnitProfile; TIMER_UNITS]) -> Self {
        Self { system_hz, units }
    }

    #[must_use]
    pub const fn profile(&self, unit: TimerUnit) -> &UnitProfile {
        &self.units[unit.as_index()]
    }

    /// Highest frequency any unit accepts.
    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.system_hz / 2
    }

    /// Lowest frequency `unit` reaches with its largest prescaler.
    #[must_use]
    pub fn min_frequency(&self, unit: TimerUnit) -> u32 {
        let profile = self.profile(unit);
        profile.prescalers.last().map_or(u32::MAX, |&prescale| {
            let slowest = u64::from(prescale) * u64::from(profile.width.span());
            narrow(u64::from(self.system_hz).div_ceil(slowest))
        })
    }

    /// Picks the smallest prescaler whose compare value fits the counter.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FrequencyTooHigh`] above half the system clock and
    /// [`ConfigError::FrequencyTooLow`] when no prescaler fits.
    pub fn divider(&self, unit: TimerUnit, hz: u32) -> Result<Divider, ConfigError> {
        let ceiling = self.ceiling();
        if hz > ceiling {
            return Err(ConfigError::FrequencyTooHigh {
                requested: hz,
                ceiling,
            });
        }

        let profile = self.profile(unit);
        let span = u64::from(profile.width.span());
        let clock = u64::from(self.system_hz);
        if hz > 0 {
            for &prescale in profile.prescalers {
                let scaled = u64::from(prescale) * u64::from(hz);
                let ticks = clock.div_ceil(scaled);
                if ticks <= span {
                    return Ok(Divider {
                        prescale,
                        top: u16::try_from(ticks - 1).unwrap_or(u16::MAX),
                        achieved_hz: narrow(clock / (u64::from(prescale) * ticks)),
                    });
                }
            }
        }

        Err(ConfigError::FrequencyTooLow {
            requested: hz,
            floor: self.min_frequency(unit),
        })
    }

    /// Picks the smallest prescaler whose tick rate does not exceed `max_tick_hz`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::FrequencyTooLow`] when even the largest prescaler ticks
    /// faster than requested.
    pub fn tick_divider(&self, unit: TimerUnit, max_tick_hz: u32) -> Result<Divider, ConfigError> {
        let profile = self.profile(unit);
        let top = u16::try_from(profile.width.max()).unwrap_or(u16::MAX);
        let mut slowest = self.system_hz;
        for &prescale in profile.prescalers {
            let tick_hz = self.system_hz / u32::from(prescale);
            slowest = tick_hz;
            if tick_hz <= max_tick_hz {
                return Ok(Divider {
                    prescale,
                    top,
                    achieved_hz: tick_hz,
                });
            }
        }

        Err(ConfigError::FrequencyTooLow {
            requested: max_tick_hz,
            floor: slowest,
        })
    }
}

fn narrow(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
