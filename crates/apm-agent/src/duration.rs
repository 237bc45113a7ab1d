// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Measured time intervals.
//!
//! A [`Duration`] remembers nothing about the unit it was built from: the value
//! is normalized to microseconds on construction so that arithmetic and
//! comparisons between durations never need a unit conversion.

use derive_more::Display;
use std::cmp::Ordering;
use std::ops::{Add, Sub};

const MICROS_PER_MILLI: f64 = 1_000.0;
const MICROS_PER_SEC: f64 = 1_000_000.0;

/// Unit a [`Duration`] value is expressed in.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    #[display("microseconds")]
    Microseconds,
    #[display("milliseconds")]
    Milliseconds,
    #[display("seconds")]
    Seconds,
}

impl TimeUnit {
    fn micros_per_unit(self) -> f64 {
        match self {
            TimeUnit::Microseconds => 1.0,
            TimeUnit::Milliseconds => MICROS_PER_MILLI,
            TimeUnit::Seconds => MICROS_PER_SEC,
        }
    }
}

/// An immutable, non-negative time interval.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Duration {
    micros: f64,
}

impl Duration {
    pub const ZERO: Duration = Duration { micros: 0.0 };

    /// Builds a duration from a value in the given unit. Negative and non-finite
    /// values are clamped to zero.
    #[must_use]
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        let micros = value * unit.micros_per_unit();
        if micros.is_finite() && micros > 0.0 {
            Duration { micros }
        } else {
            Duration::ZERO
        }
    }

    #[must_use]
    pub fn from_micros(value: f64) -> Self {
        Self::new(value, TimeUnit::Microseconds)
    }

    #[must_use]
    pub fn from_millis(value: f64) -> Self {
        Self::new(value, TimeUnit::Milliseconds)
    }

    #[must_use]
    pub fn from_secs(value: f64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    #[must_use]
    pub fn as_micros(&self) -> f64 {
        self.micros
    }

    #[must_use]
    pub fn as_millis(&self) -> f64 {
        self.micros / MICROS_PER_MILLI
    }

    #[must_use]
    pub fn as_secs(&self) -> f64 {
        self.micros / MICROS_PER_SEC
    }

    /// Value expressed in `unit`.
    #[must_use]
    pub fn as_unit(&self, unit: TimeUnit) -> f64 {
        self.micros / unit.micros_per_unit()
    }

    /// Subtraction that stops at zero instead of producing a negative interval.
    #[must_use]
    pub fn saturating_sub(self, other: Duration) -> Duration {
        Duration::from_micros(self.micros - other.micros)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(value: std::time::Duration) -> Self {
        Duration::from_micros(value.as_nanos() as f64 / 1_000.0)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(value: Duration) -> Self {
        std::time::Duration::from_nanos((value.micros * 1_000.0) as u64)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_micros(self.micros + rhs.micros)
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        self.saturating_sub(rhs)
    }
}

impl std::iter::Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Duration {
        iter.fold(Duration::ZERO, Add::add)
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.micros.partial_cmp(&other.micros)
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}ms", self.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_units_on_construction() {
        assert_eq!(Duration::new(1.5, TimeUnit::Seconds).as_micros(), 1_500_000.0);
        assert_eq!(Duration::new(2.0, TimeUnit::Milliseconds).as_micros(), 2_000.0);
        assert_eq!(Duration::new(7.0, TimeUnit::Microseconds).as_micros(), 7.0);
        assert_eq!(
            Duration::from_secs(1.0),
            Duration::new(1_000.0, TimeUnit::Milliseconds)
        );
    }

    #[test]
    fn test_arithmetic_between_units() {
        let total = Duration::from_millis(1.0) + Duration::from_micros(500.0);
        assert_eq!(total.as_micros(), 1_500.0);
        assert_eq!(total.as_unit(TimeUnit::Milliseconds), 1.5);

        let diff = Duration::from_secs(1.0) - Duration::from_millis(250.0);
        assert_eq!(diff.as_millis(), 750.0);
    }

    #[test]
    fn test_never_negative() {
        assert_eq!(Duration::from_millis(-3.0), Duration::ZERO);
        assert_eq!(Duration::from_micros(f64::NAN), Duration::ZERO);
        assert_eq!(
            Duration::from_millis(1.0).saturating_sub(Duration::from_secs(1.0)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_from_std_duration() {
        let duration = Duration::from(std::time::Duration::from_millis(1_192));
        assert_eq!(duration.as_micros(), 1_192_000.0);
    }

    #[test]
    fn test_into_std_duration() {
        let std_duration = std::time::Duration::from(Duration::from_millis(15.0));
        assert_eq!(std_duration, std::time::Duration::from_millis(15));
        assert_eq!(
            std::time::Duration::from(Duration::ZERO),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn test_sum_and_ordering() {
        let durations = [
            Duration::from_millis(1.0),
            Duration::from_millis(2.0),
            Duration::from_millis(3.0),
        ];
        let total: Duration = durations.iter().copied().sum();
        assert_eq!(total.as_millis(), 6.0);
        assert!(durations[0] < durations[2]);
    }
}
