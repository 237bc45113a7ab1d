// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-level samplers captured once per reported period.
//!
//! Resident memory is read from `/proc/self/status` (`VmRSS`, in kB) and
//! reported as `Memory/Physical` in megabytes.

use crate::errors::SamplerError;
use crate::metric::Metric;
use crate::reporting_period::ReportingPeriod;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

const PROC_SELF_STATUS_PATH: &str = "/proc/self/status";

pub trait Sampler: Send + Sync {
    fn name(&self) -> &str;
    fn metrics(&self) -> Result<Vec<Metric>, SamplerError>;
}

pub struct MemorySampler;

impl Sampler for MemorySampler {
    fn name(&self) -> &str {
        "memory"
    }

    #[cfg(target_os = "linux")]
    fn metrics(&self) -> Result<Vec<Metric>, SamplerError> {
        let status = std::fs::read_to_string(PROC_SELF_STATUS_PATH)?;
        let kilobytes = parse_vm_rss(&status)?;
        Ok(vec![Metric::new("Memory", "Physical", kilobytes / 1024.0)])
    }

    #[cfg(not(target_os = "linux"))]
    fn metrics(&self) -> Result<Vec<Metric>, SamplerError> {
        debug!("Cannot read {PROC_SELF_STATUS_PATH} on this platform");
        Err(SamplerError::Unsupported)
    }
}

/// Extracts the `VmRSS` value, in kB, from the contents of a proc status file.
pub fn parse_vm_rss(status: &str) -> Result<f64, SamplerError> {
    let line = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .ok_or_else(|| SamplerError::Parse("VmRSS not found".to_string()))?;
    let value = line
        .split_whitespace()
        .next()
        .ok_or_else(|| SamplerError::Parse(format!("empty VmRSS line: {line:?}")))?;
    value
        .parse::<f64>()
        .map_err(|err| SamplerError::Parse(format!("{value:?}: {err}")))
}

/// Runs every sampler and records what they return into `period`.
///
/// A sampler that fails or panics is skipped; the others still run.
pub fn capture(samplers: &[Arc<dyn Sampler>], period: &mut ReportingPeriod) {
    for sampler in samplers {
        match panic::catch_unwind(AssertUnwindSafe(|| sampler.metrics())) {
            Ok(Ok(metrics)) => {
                debug!("Sampler {} captured {} metrics", sampler.name(), metrics.len());
                for metric in &metrics {
                    period.record_metric(metric);
                }
            }
            Ok(Err(err)) => warn!("Sampler {} failed: {err}", sampler.name()),
            Err(_) => warn!("Sampler {} panicked, skipping it", sampler.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting_period::PeriodLimits;
    use std::time::SystemTime;
    use tracing_test::traced_test;

    struct FixedSampler;

    impl Sampler for FixedSampler {
        fn name(&self) -> &str {
            "fixed"
        }

        fn metrics(&self) -> Result<Vec<Metric>, SamplerError> {
            Ok(vec![Metric::new("CPU", "Utilization", 12.5)])
        }
    }

    struct FailingSampler;

    impl Sampler for FailingSampler {
        fn name(&self) -> &str {
            "failing"
        }

        fn metrics(&self) -> Result<Vec<Metric>, SamplerError> {
            Err(SamplerError::Parse("garbage".to_string()))
        }
    }

    struct PanickingSampler;

    impl Sampler for PanickingSampler {
        fn name(&self) -> &str {
            "panicking"
        }

        #[allow(clippy::panic)]
        fn metrics(&self) -> Result<Vec<Metric>, SamplerError> {
            panic!("sampler exploded")
        }
    }

    #[test]
    fn test_parse_vm_rss() {
        let status = "Name:\tapp\nVmPeak:\t  300000 kB\nVmRSS:\t   20480 kB\nThreads:\t4\n";
        assert_eq!(
            parse_vm_rss(status).expect("Failed to parse VmRSS"),
            20_480.0
        );
    }

    #[test]
    fn test_parse_vm_rss_missing() {
        assert!(matches!(
            parse_vm_rss("Name:\tapp\n"),
            Err(SamplerError::Parse(_))
        ));
        assert!(matches!(
            parse_vm_rss("VmRSS:\tlots kB\n"),
            Err(SamplerError::Parse(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_sampler_reads_own_process() {
        let metrics = MemorySampler
            .metrics()
            .expect("Failed to sample memory");
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].key.metric_type.as_str(), "Memory");
        assert!(metrics[0].value.as_f64() > 0.0);
    }

    #[test]
    #[traced_test]
    fn test_capture_isolates_failing_samplers() {
        let samplers: Vec<Arc<dyn Sampler>> = vec![
            Arc::new(FailingSampler),
            Arc::new(PanickingSampler),
            Arc::new(FixedSampler),
        ];
        let mut period = ReportingPeriod::containing(SystemTime::now(), PeriodLimits::default());
        capture(&samplers, &mut period);

        let stats = period
            .metrics()
            .find("CPU", "Utilization")
            .expect("Failed to find sampled metric");
        assert_eq!(stats.sum, 12.5);
        assert_eq!(period.metrics().len(), 1);
        assert!(logs_contain("Sampler failing failed"));
        assert!(logs_contain("Sampler panicking panicked"));
    }
}
