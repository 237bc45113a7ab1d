// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Response-time distributions.
//!
//! Every histogram is a [`DDSketch`]: relative-error quantiles in bounded
//! memory, the same sketch dogstatsd ships for distribution metrics.

use ddsketch_agent::DDSketch;
use ustr::Ustr;

/// One value destined for the histogram called `name`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HistogramSample {
    pub name: Ustr,
    pub value: f64,
}

impl HistogramSample {
    #[must_use]
    pub fn new(name: &str, value: f64) -> Self {
        HistogramSample {
            name: Ustr::from(name),
            value,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Histogram {
    sketch: DDSketch,
}

impl Histogram {
    /// Non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_finite() {
            self.sketch.insert(value);
        }
    }

    /// Approximate value below which a fraction `q` of samples fall, zero
    /// while empty.
    #[must_use]
    pub fn quantile(&self, q: f64) -> f64 {
        self.sketch.quantile(q.clamp(0.0, 1.0)).unwrap_or(0.0)
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        u64::from(self.sketch.count())
    }

    #[must_use]
    pub fn sum(&self) -> f64 {
        self.sketch.sum().unwrap_or(0.0)
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            count => self.sum() / count as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // DDSketch guarantees about 1% relative error.
    fn assert_close(actual: f64, expected: f64) {
        let error = (actual - expected).abs() / expected;
        assert!(error < 0.02, "expected about {expected}, got {actual}");
    }

    #[test]
    fn test_count_and_mean() {
        let mut histogram = Histogram::default();
        for value in [3_000.0, 1_000.0, 2_000.0, 2_000.0] {
            histogram.add(value);
        }
        assert_eq!(histogram.count(), 4);
        assert_close(histogram.sum(), 8_000.0);
        assert_close(histogram.mean(), 2_000.0);
    }

    #[test]
    fn test_quantiles_within_relative_error() {
        let mut histogram = Histogram::default();
        for value in 1..=1_000 {
            histogram.add(f64::from(value));
        }
        assert_eq!(histogram.count(), 1_000);
        assert_close(histogram.quantile(0.5), 500.0);
        assert_close(histogram.quantile(0.95), 950.0);
        assert_close(histogram.quantile(0.99), 990.0);
        assert!(histogram.quantile(0.5) <= histogram.quantile(0.95));
    }

    #[test]
    fn test_ignores_non_finite_values() {
        let mut histogram = Histogram::default();
        histogram.add(f64::NAN);
        histogram.add(f64::INFINITY);
        histogram.add(4_000.0);
        assert_eq!(histogram.count(), 1);
        assert_close(histogram.mean(), 4_000.0);
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::default();
        assert_eq!(histogram.quantile(0.99), 0.0);
        assert_eq!(histogram.mean(), 0.0);
        assert_eq!(histogram.count(), 0);
    }
}
