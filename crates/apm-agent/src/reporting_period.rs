// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-minute aggregation bucket.
//!
//! A [`ReportingPeriod`] collects everything recorded while wall-clock time is
//! inside its [`TimeRange`]: metric statistics, histograms, job counters and a
//! bounded sample of the slowest traces. Periods are only ever mutated by their
//! owner, first the store service and then the report task it hands the period
//! to, so no locking happens here.

use crate::config::Config;
use crate::errors;
use crate::histogram::{Histogram, HistogramSample};
use crate::metric::{Metric, MetricSet, DEFAULT_MAX_METRIC_KEYS};
use crate::payload::Payload;
use crate::reporter::{ReportOutcome, Reporter};
use crate::trace::{JobRecord, JobStats, Trace, TraceSet, DEFAULT_MAX_TRACES};
use derive_more::Display;
use fnv::FnvBuildHasher;
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use ustr::Ustr;

/// Width of every reporting period, in seconds.
pub const PERIOD_SECS: u64 = 60;

/// Half-open interval `[start, end)` in seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("[{start}, {end})")]
pub struct TimeRange {
    start: u64,
    end: u64,
}

impl TimeRange {
    /// The minute-aligned range containing `timestamp`.
    #[must_use]
    pub fn containing(timestamp: SystemTime) -> Self {
        let secs = epoch_secs(timestamp);
        let start = secs - secs % PERIOD_SECS;
        TimeRange {
            start,
            end: start + PERIOD_SECS,
        }
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[must_use]
    pub fn start_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.start)
    }

    #[must_use]
    pub fn end_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.end)
    }

    #[must_use]
    pub fn covers(&self, timestamp: SystemTime) -> bool {
        self.start_time() <= timestamp && timestamp < self.end_time()
    }
}

/// Seconds since the Unix epoch; timestamps before the epoch clamp to zero.
#[must_use]
pub fn epoch_secs(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PeriodState {
    #[display("collecting")]
    Collecting,
    #[display("reporting")]
    Reporting,
    #[display("done")]
    Done,
}

/// What became of a period handed to [`ReportingPeriod::report`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reported {
    pub time_range: TimeRange,
    pub state: PeriodState,
    pub outcome: ReportOutcome,
}

/// Memory bounds applied to every period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeriodLimits {
    /// Traces kept per kind.
    pub max_traces: usize,
    /// Distinct keys per metric, histogram and job map.
    pub max_keys: usize,
}

impl Default for PeriodLimits {
    fn default() -> Self {
        PeriodLimits {
            max_traces: DEFAULT_MAX_TRACES,
            max_keys: DEFAULT_MAX_METRIC_KEYS,
        }
    }
}

impl From<&Config> for PeriodLimits {
    fn from(config: &Config) -> Self {
        PeriodLimits {
            max_traces: config.max_traces,
            max_keys: config.max_metric_keys,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReportingPeriod {
    time_range: TimeRange,
    metrics: MetricSet,
    histograms: HashMap<Ustr, Histogram, FnvBuildHasher>,
    web_traces: TraceSet,
    job_traces: TraceSet,
    jobs: HashMap<(Ustr, Ustr), JobStats, FnvBuildHasher>,
    state: PeriodState,
    limits: PeriodLimits,
    dropped: u64,
}

impl ReportingPeriod {
    #[must_use]
    pub fn new(time_range: TimeRange, limits: PeriodLimits) -> Self {
        ReportingPeriod {
            time_range,
            metrics: MetricSet::new(limits.max_keys),
            histograms: HashMap::with_hasher(FnvBuildHasher::default()),
            web_traces: TraceSet::new(limits.max_traces),
            job_traces: TraceSet::new(limits.max_traces),
            jobs: HashMap::with_hasher(FnvBuildHasher::default()),
            state: PeriodState::Collecting,
            limits,
            dropped: 0,
        }
    }

    /// The period whose range contains `now`.
    #[must_use]
    pub fn containing(now: SystemTime, limits: PeriodLimits) -> Self {
        Self::new(TimeRange::containing(now), limits)
    }

    pub fn record_metric(&mut self, metric: &Metric) {
        match self.metrics.record(metric) {
            Ok(()) => {}
            Err(errors::Insert::Overflow) => self.dropped += 1,
            Err(err @ errors::Insert::NonFinite(_)) => {
                debug!("Metric {}/{} ignored: {err}", metric.key.metric_type, metric.key.name);
            }
        }
    }

    /// Offers `trace` to the web buffer; see [`TraceSet::insert`].
    pub fn record_web_trace(&mut self, trace: Trace) {
        if !self.web_traces.insert(trace) {
            debug!("Web trace faster than every retained trace, dropped");
        }
    }

    /// Offers `trace` to the job buffer; see [`TraceSet::insert`].
    pub fn record_job_trace(&mut self, trace: Trace) {
        if !self.job_traces.insert(trace) {
            debug!("Job trace faster than every retained trace, dropped");
        }
    }

    pub fn record_job_record(&mut self, record: &JobRecord) {
        let len = self.jobs.len();
        match self.jobs.entry((record.queue, record.name)) {
            Entry::Occupied(mut entry) => entry.get_mut().observe(record),
            Entry::Vacant(entry) => {
                if len >= self.limits.max_keys {
                    self.dropped += 1;
                } else {
                    entry.insert(JobStats::new(record));
                }
            }
        }
    }

    pub fn record_histogram_sample(&mut self, sample: &HistogramSample) {
        let len = self.histograms.len();
        match self.histograms.entry(sample.name) {
            Entry::Occupied(mut entry) => entry.get_mut().add(sample.value),
            Entry::Vacant(entry) => {
                if len >= self.limits.max_keys {
                    self.dropped += 1;
                } else {
                    entry.insert(Histogram::default()).add(sample.value);
                }
            }
        }
    }

    /// True once `now` has reached the end of the range. Depends on nothing but
    /// the clock and this period's boundaries.
    #[must_use]
    pub fn is_ready_to_report(&self, now: SystemTime) -> bool {
        now >= self.time_range.end_time()
    }

    #[must_use]
    pub fn covers(&self, timestamp: SystemTime) -> bool {
        self.time_range.covers(timestamp)
    }

    /// Marks the period as claimed by a tick.
    pub fn mark_reporting(&mut self) {
        self.state = PeriodState::Reporting;
    }

    /// Serializes the period and forwards it through `reporter`.
    ///
    /// Consumes the period, so it can be reported at most once. The period is
    /// done once the reporter has taken the payload, whatever the outcome.
    pub async fn report(mut self, reporter: &Reporter) -> Reported {
        self.state = PeriodState::Reporting;
        if self.dropped > 0 {
            warn!(
                "{} values dropped in period {} after reaching {} distinct keys",
                self.dropped, self.time_range, self.limits.max_keys
            );
        }
        let payload = Payload::new(reporter.metadata(), &self);
        debug!("Period {} is {}, forwarding payload", self.time_range, self.state);
        let outcome = reporter.report(&payload).await;

        self.state = PeriodState::Done;
        debug!("Period {} is {}", self.time_range, self.state);
        Reported {
            time_range: self.time_range,
            state: self.state,
            outcome,
        }
    }

    #[must_use]
    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    #[must_use]
    pub fn state(&self) -> PeriodState {
        self.state
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    #[must_use]
    pub fn web_traces(&self) -> &TraceSet {
        &self.web_traces
    }

    #[must_use]
    pub fn job_traces(&self) -> &TraceSet {
        &self.job_traces
    }

    pub fn jobs(&self) -> impl Iterator<Item = (&(Ustr, Ustr), &JobStats)> {
        self.jobs.iter()
    }

    #[must_use]
    pub fn job_stats(&self, queue: &str, name: &str) -> Option<&JobStats> {
        self.jobs.get(&(Ustr::from(queue), Ustr::from(name)))
    }

    pub fn histograms(&self) -> impl Iterator<Item = (&Ustr, &Histogram)> {
        self.histograms.iter()
    }

    #[must_use]
    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(&Ustr::from(name))
    }

    /// Values refused because a map was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
