// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-execution trace builder.
//!
//! A [`RequestTracker`] is owned by the code handling one web request or job.
//! Instrumentation opens and closes layers on a stack; closing the outermost
//! layer packages the tree into a [`Trace`] and hands it, together with the
//! metrics derived from it, to the store. Misuse is logged and ignored, it
//! never reaches the instrumented application.

use crate::duration::Duration;
use crate::errors::{RequestTrackerError, StoreError};
use crate::histogram::HistogramSample;
use crate::layer::Layer;
use crate::metric::{Metric, MetricValue};
use crate::store::StoreHandle;
use crate::trace::{JobRecord, Trace, TraceKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use ustr::Ustr;

pub struct RequestTracker {
    kind: TraceKind,
    store: StoreHandle,
    stack: Vec<Layer>,
    context: BTreeMap<String, String>,
    // Only set for jobs.
    queue: Option<Ustr>,
    ignored: bool,
    failed: bool,
    finished: bool,
}

impl RequestTracker {
    #[must_use]
    pub fn web(store: StoreHandle) -> Self {
        RequestTracker::new(TraceKind::Web, store, None)
    }

    #[must_use]
    pub fn job(store: StoreHandle, queue: &str) -> Self {
        RequestTracker::new(TraceKind::Job, store, Some(Ustr::from(queue)))
    }

    fn new(kind: TraceKind, store: StoreHandle, queue: Option<Ustr>) -> Self {
        RequestTracker {
            kind,
            store,
            stack: Vec::new(),
            context: BTreeMap::new(),
            queue,
            ignored: false,
            failed: false,
            finished: false,
        }
    }

    pub fn start_layer(&mut self, layer_type: &str, name: &str) {
        self.push(Layer::start(layer_type, name));
    }

    pub fn start_layer_with_desc(&mut self, layer_type: &str, name: &str, desc: &str) {
        self.push(Layer::start(layer_type, name).with_desc(desc));
    }

    fn push(&mut self, layer: Layer) {
        if self.finished {
            warn!(
                "Layer {}/{} started after the {} finished, ignoring it",
                layer.layer_type, layer.name, self.kind
            );
            return;
        }
        self.stack.push(layer);
    }

    /// Closes the innermost open layer. Closing the outermost one finishes the
    /// execution.
    pub fn stop_layer(&mut self) -> Result<(), RequestTrackerError> {
        let Some(mut layer) = self.stack.pop() else {
            let err = self.misuse();
            warn!("stop_layer ignored: {err}");
            return Err(err);
        };
        layer.stop();
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(layer),
            None => self.finish(layer),
        }
        Ok(())
    }

    /// Attaches an already measured leaf under the innermost open layer.
    pub fn track_layer(
        &mut self,
        layer_type: &str,
        name: &str,
        duration: Duration,
    ) -> Result<(), RequestTrackerError> {
        let err = self.misuse();
        let Some(parent) = self.stack.last_mut() else {
            warn!("track_layer {layer_type}/{name} dropped: {err}");
            return Err(err);
        };
        parent
            .children
            .push(Layer::closed(layer_type, name, duration));
        Ok(())
    }

    fn misuse(&self) -> RequestTrackerError {
        if self.finished {
            RequestTrackerError::AlreadyFinished
        } else {
            RequestTrackerError::NoOpenLayer
        }
    }

    pub fn set_current_desc(&mut self, desc: &str) {
        if let Some(layer) = self.stack.last_mut() {
            layer.desc = Some(desc.to_string());
        }
    }

    /// Renames the outermost layer; routers often learn the endpoint name late.
    pub fn rename_root(&mut self, name: &str) {
        if let Some(root) = self.stack.first_mut() {
            root.name = Ustr::from(name);
        }
    }

    pub fn add_context(&mut self, key: &str, value: &str) {
        self.context.insert(key.to_string(), value.to_string());
    }

    /// Nothing is recorded for an ignored execution.
    pub fn ignore(&mut self) {
        self.ignored = true;
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Records an explicitly instrumented metric right away.
    pub fn record_metric(&self, metric_type: &str, name: &str, value: impl Into<MetricValue>) {
        emit(
            self.store
                .record_web_metric(Metric::new(metric_type, name, value)),
            "metric",
        );
    }

    #[must_use]
    pub fn open_layers(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    fn finish(&mut self, root: Layer) {
        self.finished = true;
        if self.ignored {
            debug!("Ignored {} {}/{}", self.kind, root.layer_type, root.name);
            return;
        }
        if self.failed && self.kind == TraceKind::Web {
            self.context.insert("error".to_string(), "true".to_string());
        }

        let trace = Trace::new(self.kind, root, std::mem::take(&mut self.context));
        let metrics = derived_metrics(&trace);
        let root_key = trace.scope().to_string();
        let duration = trace.total_duration;
        let job = self
            .queue
            .map(|queue| JobRecord::new(&queue, &trace.root.name, duration, self.failed));

        match self.kind {
            TraceKind::Web => emit(self.store.record_web_trace(trace), "trace"),
            TraceKind::Job => emit(self.store.record_job_trace(trace), "trace"),
        }
        for metric in metrics {
            emit(self.store.record_web_metric(metric), "metric");
        }
        match job {
            Some(record) => emit(self.store.record_job_record(record), "job"),
            None => emit(
                self.store.record_histogram_sample(HistogramSample::new(
                    &root_key,
                    duration.as_micros(),
                )),
                "histogram sample",
            ),
        }
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        if !self.finished && !self.stack.is_empty() {
            debug!(
                "{} dropped with {} open layers, discarding it",
                self.kind,
                self.stack.len()
            );
        }
    }
}

/// One metric per layer of the tree holding the layer's exclusive time, so
/// the metrics of one execution add up to its total duration. The root is
/// unscoped, every other layer is scoped to the root.
fn derived_metrics(trace: &Trace) -> Vec<Metric> {
    let root = &trace.root;
    let scope = trace.scope();
    let mut metrics = vec![Metric::new(&root.layer_type, &root.name, root.exclusive_time())];
    metrics.extend(root.walk().skip(1).map(|layer| {
        Metric::scoped(&layer.layer_type, &layer.name, layer.exclusive_time(), scope)
    }));
    metrics
}

fn emit(result: Result<(), StoreError>, what: &str) {
    if let Err(err) = result {
        warn!("Failed to record {what}: {err}");
    }
}
