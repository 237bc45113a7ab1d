// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owner of the active reporting periods.
//!
//! [`StoreService`] runs on its own task and applies [`StoreCommand`]s one at a
//! time, so periods are never shared between threads. [`StoreHandle`]s are
//! cheap to clone and never block: ingestion goes through an unbounded channel.
//!
//! Every recorded [`Event`] is stamped with the store clock when the handle
//! sends it, and lands in the period covering that stamp. On every tick the
//! store moves the periods whose range has ended into their own report task.
//! A dispatched period is owned by that task from then on, so late writes for
//! its range go to the current period instead and it is reported exactly once.

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::histogram::HistogramSample;
use crate::metric::Metric;
use crate::reporter::{ReportOutcome, Reporter};
use crate::reporting_period::{epoch_secs, PeriodLimits, Reported, ReportingPeriod, TimeRange};
use crate::sampler::{self, Sampler};
use crate::trace::{JobRecord, Trace};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Everything instrumentation can record.
#[derive(Debug)]
pub enum Event {
    WebMetric(Metric),
    WebTrace(Box<Trace>),
    JobRecord(JobRecord),
    JobTrace(Box<Trace>),
    HistogramSample(HistogramSample),
}

#[derive(Debug)]
pub enum StoreCommand {
    Record {
        /// Store time at which the handle sent the event.
        at: SystemTime,
        event: Event,
    },
    Tick(oneshot::Sender<TickSummary>),
    FindOrCreate {
        now: SystemTime,
        response_tx: oneshot::Sender<TimeRange>,
    },
    Snapshot {
        now: SystemTime,
        response_tx: oneshot::Sender<Option<ReportingPeriod>>,
    },
    ActivePeriods(oneshot::Sender<Vec<TimeRange>>),
    Shutdown,
}

/// Periods handed to report tasks and periods kept, as of one tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub dispatched: Vec<TimeRange>,
    pub retained: Vec<TimeRange>,
}

#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
    clock: Arc<dyn Clock>,
}

impl StoreHandle {
    pub fn record_web_metric(&self, metric: Metric) -> Result<(), StoreError> {
        self.record(Event::WebMetric(metric))
    }

    pub fn record_web_trace(&self, trace: Trace) -> Result<(), StoreError> {
        self.record(Event::WebTrace(Box::new(trace)))
    }

    pub fn record_job_record(&self, record: JobRecord) -> Result<(), StoreError> {
        self.record(Event::JobRecord(record))
    }

    pub fn record_job_trace(&self, trace: Trace) -> Result<(), StoreError> {
        self.record(Event::JobTrace(Box::new(trace)))
    }

    pub fn record_histogram_sample(&self, sample: HistogramSample) -> Result<(), StoreError> {
        self.record(Event::HistogramSample(sample))
    }

    fn record(&self, event: Event) -> Result<(), StoreError> {
        let at = self.clock.now();
        self.tx.send(StoreCommand::Record { at, event })?;
        Ok(())
    }

    /// Dispatches every period that is ready at the store's current time.
    pub async fn tick(&self) -> Result<TickSummary, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(StoreCommand::Tick(response_tx))?;
        Ok(response_rx.await?)
    }

    /// Range of the period covering `now`, creating the period if needed.
    pub async fn find_or_create_reporting_period(
        &self,
        now: SystemTime,
    ) -> Result<TimeRange, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(StoreCommand::FindOrCreate { now, response_tx })?;
        Ok(response_rx.await?)
    }

    /// Copy of the active period covering `now`, if any.
    pub async fn snapshot(&self, now: SystemTime) -> Result<Option<ReportingPeriod>, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(StoreCommand::Snapshot { now, response_tx })?;
        Ok(response_rx.await?)
    }

    pub async fn active_periods(&self) -> Result<Vec<TimeRange>, StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(StoreCommand::ActivePeriods(response_tx))?;
        Ok(response_rx.await?)
    }

    pub fn shutdown(&self) -> Result<(), StoreError> {
        self.tx.send(StoreCommand::Shutdown)?;
        Ok(())
    }

    /// A handle with no service behind it; commands are left on the receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<StoreCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
        (StoreHandle { tx, clock }, rx)
    }
}

pub struct StoreService {
    periods: Vec<ReportingPeriod>,
    limits: PeriodLimits,
    reporter: Arc<Reporter>,
    samplers: Arc<[Arc<dyn Sampler>]>,
    clock: Arc<dyn Clock>,
    // End of the latest dispatched period; nothing before it is collected.
    reported_until: SystemTime,
    rx: mpsc::UnboundedReceiver<StoreCommand>,
}

impl StoreService {
    /// Builds the service and its first handle. Both read time from `clock`.
    pub fn new(
        limits: PeriodLimits,
        reporter: Arc<Reporter>,
        samplers: Vec<Arc<dyn Sampler>>,
        clock: Arc<dyn Clock>,
    ) -> (Self, StoreHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StoreHandle {
            tx,
            clock: Arc::clone(&clock),
        };
        let service = StoreService {
            periods: Vec::new(),
            limits,
            reporter,
            samplers: samplers.into(),
            clock,
            reported_until: UNIX_EPOCH,
            rx,
        };
        (service, handle)
    }

    pub async fn run(mut self) {
        debug!("Store service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                StoreCommand::Record { at, event } => self.record(at, event),
                StoreCommand::Tick(response_tx) => {
                    let summary = self.tick();
                    if response_tx.send(summary).is_err() {
                        debug!("Tick response dropped - receiver gone");
                    }
                }
                StoreCommand::FindOrCreate { now, response_tx } => {
                    let range = self.find_or_create_reporting_period(now).time_range();
                    if response_tx.send(range).is_err() {
                        error!("Failed to send find_or_create response - receiver dropped");
                    }
                }
                StoreCommand::Snapshot { now, response_tx } => {
                    let period = self.periods.iter().find(|p| p.covers(now)).cloned();
                    if response_tx.send(period).is_err() {
                        error!("Failed to send snapshot response - receiver dropped");
                    }
                }
                StoreCommand::ActivePeriods(response_tx) => {
                    if response_tx.send(self.active_ranges()).is_err() {
                        error!("Failed to send active periods response - receiver dropped");
                    }
                }
                StoreCommand::Shutdown => {
                    debug!("Store service shutting down");
                    break;
                }
            }
        }

        if !self.periods.is_empty() {
            warn!(
                "Store stopped with {} unreported periods, dropping them",
                self.periods.len()
            );
        }
        debug!("Store service stopped");
    }

    fn record(&mut self, at: SystemTime, event: Event) {
        let period = self.period_for(at);
        match event {
            Event::WebMetric(metric) => period.record_metric(&metric),
            Event::WebTrace(trace) => period.record_web_trace(*trace),
            Event::JobRecord(record) => period.record_job_record(&record),
            Event::JobTrace(trace) => period.record_job_trace(*trace),
            Event::HistogramSample(sample) => period.record_histogram_sample(&sample),
        }
    }

    /// Period covering `at`, unless that range was already dispatched, in
    /// which case the write goes to the period covering the store's now.
    fn period_for(&mut self, at: SystemTime) -> &mut ReportingPeriod {
        if at >= self.reported_until {
            return self.find_or_create_reporting_period(at);
        }
        let now = self.clock.now().max(self.reported_until);
        debug!(
            "Write stamped {}s arrived after its period was dispatched, recording it now",
            epoch_secs(at)
        );
        self.find_or_create_reporting_period(now)
    }

    /// The single place where periods are created.
    fn find_or_create_reporting_period(&mut self, now: SystemTime) -> &mut ReportingPeriod {
        let idx = match self.periods.iter().position(|p| p.covers(now)) {
            Some(idx) => idx,
            None => {
                let period = ReportingPeriod::containing(now, self.limits);
                debug!("Created reporting period {}", period.time_range());
                self.periods.push(period);
                self.periods.len() - 1
            }
        };
        &mut self.periods[idx]
    }

    fn active_ranges(&self) -> Vec<TimeRange> {
        let mut ranges: Vec<TimeRange> =
            self.periods.iter().map(ReportingPeriod::time_range).collect();
        ranges.sort();
        ranges
    }

    fn tick(&mut self) -> TickSummary {
        let now = self.clock.now();
        self.find_or_create_reporting_period(now);

        let (ready, not_ready): (Vec<ReportingPeriod>, Vec<ReportingPeriod>) =
            std::mem::take(&mut self.periods)
                .into_iter()
                .partition(|period| period.is_ready_to_report(now));
        self.periods = not_ready;

        let mut dispatched: Vec<TimeRange> =
            ready.iter().map(ReportingPeriod::time_range).collect();
        dispatched.sort();
        for mut period in ready {
            self.reported_until = self.reported_until.max(period.time_range().end_time());
            period.mark_reporting();
            self.dispatch(period);
        }

        let summary = TickSummary {
            dispatched,
            retained: self.active_ranges(),
        };
        debug!(
            "Tick dispatched {} periods, retained {}",
            summary.dispatched.len(),
            summary.retained.len()
        );
        summary
    }

    /// Reports `period` on its own task. A watcher task logs how it ended so a
    /// failing report never reaches the service loop.
    fn dispatch(&self, mut period: ReportingPeriod) {
        let range = period.time_range();
        let reporter = Arc::clone(&self.reporter);
        let samplers = Arc::clone(&self.samplers);
        let report = tokio::spawn(async move {
            sampler::capture(&samplers, &mut period);
            period.report(&reporter).await
        });
        tokio::spawn(async move {
            match report.await {
                Ok(Reported {
                    outcome: ReportOutcome::Sent(outcome),
                    state,
                    ..
                }) => {
                    debug!("Period {range} {state}, sent: {outcome:?}");
                }
                Ok(Reported { outcome, state, .. }) => {
                    debug!("Period {range} {state}, not sent: {outcome:?}");
                }
                Err(err) if err.is_panic() => error!("Report task for period {range} panicked"),
                Err(err) => warn!("Report task for period {range} did not finish: {err}"),
            }
        });
    }
}
