// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Completed executions: full trace trees, job completion records, and the
//! bounded buffer that keeps the slowest traces of a period.

use crate::duration::Duration;
use crate::layer::Layer;
use crate::metric::{MetricStats, Scope};
use derive_more::Display;
use std::collections::BTreeMap;
use std::time::SystemTime;
use ustr::Ustr;

/// Default number of traces of each kind kept per reporting period.
pub const DEFAULT_MAX_TRACES: usize = 10;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum TraceKind {
    #[display("web")]
    Web,
    #[display("job")]
    Job,
}

/// Immutable snapshot of one fully closed execution.
#[derive(Clone, Debug)]
pub struct Trace {
    pub kind: TraceKind,
    pub root: Layer,
    pub total_duration: Duration,
    pub context: BTreeMap<String, String>,
    pub recorded_at: SystemTime,
}

impl Trace {
    #[must_use]
    pub fn new(kind: TraceKind, root: Layer, context: BTreeMap<String, String>) -> Self {
        Trace {
            kind,
            total_duration: root.total_time(),
            root,
            context,
            recorded_at: SystemTime::now(),
        }
    }

    /// Scope of every metric derived from a layer below the root.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope {
            layer_type: self.root.layer_type,
            name: self.root.name,
        }
    }
}

/// Completion record of a background job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub queue: Ustr,
    pub name: Ustr,
    pub duration: Duration,
    pub failed: bool,
}

impl JobRecord {
    #[must_use]
    pub fn new(queue: &str, name: &str, duration: Duration, failed: bool) -> Self {
        JobRecord {
            queue: Ustr::from(queue),
            name: Ustr::from(name),
            duration,
            failed,
        }
    }
}

/// Per `(queue, name)` counters of completed jobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JobStats {
    pub count: u64,
    pub failures: u64,
    /// Run time in microseconds.
    pub total_time: MetricStats,
}

impl JobStats {
    #[must_use]
    pub fn new(record: &JobRecord) -> Self {
        JobStats {
            count: 1,
            failures: u64::from(record.failed),
            total_time: MetricStats::new(record.duration.as_micros()),
        }
    }

    pub fn observe(&mut self, record: &JobRecord) {
        self.count += 1;
        self.failures += u64::from(record.failed);
        self.total_time.observe(record.duration.as_micros());
    }
}

/// Fixed-capacity set of traces biased towards the slowest.
///
/// When full, a newcomer replaces the fastest retained trace only if it is
/// slower than it; otherwise the newcomer is dropped.
#[derive(Clone, Debug)]
pub struct TraceSet {
    traces: Vec<Trace>,
    capacity: usize,
}

impl Default for TraceSet {
    fn default() -> Self {
        TraceSet::new(DEFAULT_MAX_TRACES)
    }
}

impl TraceSet {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        TraceSet {
            traces: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns whether `trace` was retained.
    pub fn insert(&mut self, trace: Trace) -> bool {
        if self.traces.len() < self.capacity {
            self.traces.push(trace);
            return true;
        }
        let fastest = self
            .traces
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.total_duration
                    .as_micros()
                    .total_cmp(&b.total_duration.as_micros())
            })
            .map(|(idx, t)| (idx, t.total_duration));
        match fastest {
            Some((idx, duration)) if trace.total_duration > duration => {
                self.traces[idx] = trace;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter()
    }

    /// Retained traces, slowest first.
    #[must_use]
    pub fn sorted(&self) -> Vec<&Trace> {
        let mut traces: Vec<&Trace> = self.traces.iter().collect();
        traces.sort_by(|a, b| {
            b.total_duration
                .as_micros()
                .total_cmp(&a.total_duration.as_micros())
        });
        traces
    }
}
