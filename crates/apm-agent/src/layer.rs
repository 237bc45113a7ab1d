// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One timed node of an execution's call tree.

use crate::duration::Duration;
use std::time::{Instant, SystemTime};
use ustr::Ustr;

#[derive(Clone, Debug)]
pub struct Layer {
    pub layer_type: Ustr,
    pub name: Ustr,
    /// Wall-clock start, reported to the collector.
    pub started_at: SystemTime,
    /// `None` while the layer is open.
    pub duration: Option<Duration>,
    pub children: Vec<Layer>,
    /// Free-form description, e.g. the query text.
    pub desc: Option<String>,
    // Monotonic start used to measure the duration.
    started: Instant,
}

impl Layer {
    /// Opens a layer starting now.
    #[must_use]
    pub fn start(layer_type: &str, name: &str) -> Self {
        Layer {
            layer_type: Ustr::from(layer_type),
            name: Ustr::from(name),
            started_at: SystemTime::now(),
            duration: None,
            children: Vec::new(),
            desc: None,
            started: Instant::now(),
        }
    }

    /// A closed leaf whose duration was measured elsewhere and has just
    /// ended, so it started `duration` ago.
    #[must_use]
    pub fn closed(layer_type: &str, name: &str, duration: Duration) -> Self {
        let layer = Layer::start(layer_type, name);
        let started_at = layer
            .started_at
            .checked_sub(duration.into())
            .unwrap_or(layer.started_at);
        Layer {
            started_at,
            duration: Some(duration),
            ..layer
        }
    }

    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Closes the layer using the elapsed monotonic time. Closing twice keeps the
    /// first duration.
    pub fn stop(&mut self) {
        if self.duration.is_none() {
            self.duration = Some(Duration::from(self.started.elapsed()));
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.duration.is_none()
    }

    /// Duration of a closed layer, zero while open.
    #[must_use]
    pub fn total_time(&self) -> Duration {
        self.duration.unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn total_child_time(&self) -> Duration {
        self.children.iter().map(Layer::total_time).sum()
    }

    /// Time spent in this layer itself, excluding its children.
    #[must_use]
    pub fn exclusive_time(&self) -> Duration {
        self.total_time().saturating_sub(self.total_child_time())
    }

    /// Depth of the tree rooted here; a leaf has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Layer::depth).max().unwrap_or(0)
    }

    /// Pre-order walk over this layer and every descendant.
    pub fn walk(&self) -> impl Iterator<Item = &Layer> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let layer = stack.pop()?;
            stack.extend(layer.children.iter().rev());
            Some(layer)
        })
    }
}
