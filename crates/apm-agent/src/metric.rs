// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named numeric observations and the running statistics they merge into.

use crate::duration::Duration;
use crate::errors;
use fnv::FnvBuildHasher;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use ustr::Ustr;

/// Default bound on distinct metric keys held by one reporting period.
pub const DEFAULT_MAX_METRIC_KEYS: usize = 10_000;

/// Identity of the layer a metric was measured under, usually the root layer of
/// the execution (e.g. `Controller/users#index`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    pub layer_type: Ustr,
    pub name: Ustr,
}

impl Scope {
    #[must_use]
    pub fn new(layer_type: &str, name: &str) -> Self {
        Scope {
            layer_type: Ustr::from(layer_type),
            name: Ustr::from(name),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.layer_type, self.name)
    }
}

/// Grouping key of a metric: `(type, name)` plus the optional scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub metric_type: Ustr,
    pub name: Ustr,
    pub scope: Option<Scope>,
}

impl MetricKey {
    #[must_use]
    pub fn new(metric_type: &str, name: &str) -> Self {
        MetricKey {
            metric_type: Ustr::from(metric_type),
            name: Ustr::from(name),
            scope: None,
        }
    }

    #[must_use]
    pub fn scoped(metric_type: &str, name: &str, scope: Scope) -> Self {
        MetricKey {
            scope: Some(scope),
            ..Self::new(metric_type, name)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// A timing; merged in microseconds.
    Duration(Duration),
    /// A plain number such as a gauge reading or a count.
    Number(f64),
}

impl MetricValue {
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Duration(duration) => duration.as_micros(),
            MetricValue::Number(value) => *value,
        }
    }
}

impl From<Duration> for MetricValue {
    fn from(value: Duration) -> Self {
        MetricValue::Duration(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metric {
    pub key: MetricKey,
    pub value: MetricValue,
}

impl Metric {
    pub fn new(metric_type: &str, name: &str, value: impl Into<MetricValue>) -> Self {
        Metric {
            key: MetricKey::new(metric_type, name),
            value: value.into(),
        }
    }

    pub fn scoped(
        metric_type: &str,
        name: &str,
        value: impl Into<MetricValue>,
        scope: Scope,
    ) -> Self {
        Metric {
            key: MetricKey::scoped(metric_type, name, scope),
            value: value.into(),
        }
    }
}

/// Running statistic of every value observed for one key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub sum_of_squares: f64,
}

impl MetricStats {
    #[must_use]
    pub fn new(value: f64) -> Self {
        MetricStats {
            count: 1,
            sum: value,
            min: value,
            max: value,
            sum_of_squares: value * value,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.merge(&MetricStats::new(value));
    }

    /// Folds `other` into `self`. Associative and commutative.
    pub fn merge(&mut self, other: &MetricStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum_of_squares += other.sum_of_squares;
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Statistics keyed by [`MetricKey`], bounded to `max_keys` distinct keys.
#[derive(Clone, Debug)]
pub struct MetricSet {
    stats: HashMap<MetricKey, MetricStats, FnvBuildHasher>,
    max_keys: usize,
}

impl Default for MetricSet {
    fn default() -> Self {
        MetricSet::new(DEFAULT_MAX_METRIC_KEYS)
    }
}

impl MetricSet {
    #[must_use]
    pub fn new(max_keys: usize) -> Self {
        MetricSet {
            stats: HashMap::with_hasher(FnvBuildHasher::default()),
            max_keys,
        }
    }

    /// Merges `metric` into the statistic for its key. A new key beyond the
    /// bound is refused; existing keys always accept values. Non-finite
    /// values are refused before they touch any statistic.
    pub fn record(&mut self, metric: &Metric) -> Result<(), errors::Insert> {
        let value = metric.value.as_f64();
        if !value.is_finite() {
            return Err(errors::Insert::NonFinite(value));
        }
        let len = self.stats.len();
        match self.stats.entry(metric.key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().observe(value);
                Ok(())
            }
            Entry::Vacant(entry) => {
                if len >= self.max_keys {
                    return Err(errors::Insert::Overflow);
                }
                entry.insert(MetricStats::new(value));
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &MetricKey) -> Option<&MetricStats> {
        self.stats.get(key)
    }

    /// Unscoped statistic for `(type, name)`.
    #[must_use]
    pub fn find(&self, metric_type: &str, name: &str) -> Option<&MetricStats> {
        self.stats.get(&MetricKey::new(metric_type, name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &MetricStats)> {
        self.stats.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
