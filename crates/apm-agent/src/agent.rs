// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the store, the reporter and the tick loop together.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::errors::ConfigError;
use crate::logger;
use crate::reporter::{HttpTransport, Reporter, Transport};
use crate::reporting_period::PeriodLimits;
use crate::request_tracker::RequestTracker;
use crate::sampler::{MemorySampler, Sampler};
use crate::store::{StoreHandle, StoreService};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Agent {
    config: Arc<Config>,
    handle: StoreHandle,
    cancel_token: CancellationToken,
    service_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
}

impl Agent {
    /// Reads the configuration from the environment, installs logging and
    /// starts an agent reporting over HTTP. Must be called inside a tokio
    /// runtime.
    pub fn from_env() -> Result<Agent, ConfigError> {
        let config = Config::from_env()?;
        if !logger::init(&config.log_level) {
            debug!("Global subscriber already installed, keeping it");
        }

        let transport: Option<Arc<dyn Transport>> = if config.monitor_enabled() {
            match HttpTransport::new(&config) {
                Ok(transport) => Some(Arc::new(transport)),
                Err(err) => {
                    error!("Failed to build transport, reporting disabled: {err}");
                    None
                }
            }
        } else {
            info!("No reporting key configured, collecting without reporting");
            None
        };

        let samplers: Vec<Arc<dyn Sampler>> = vec![Arc::new(MemorySampler)];
        Ok(Agent::start(config, samplers, transport))
    }

    pub fn start(
        config: Config,
        samplers: Vec<Arc<dyn Sampler>>,
        transport: Option<Arc<dyn Transport>>,
    ) -> Agent {
        Agent::start_with_clock(config, samplers, transport, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: Config,
        samplers: Vec<Arc<dyn Sampler>>,
        transport: Option<Arc<dyn Transport>>,
        clock: Arc<dyn Clock>,
    ) -> Agent {
        let config = Arc::new(config);
        let reporter = Arc::new(Reporter::new(Arc::clone(&config), transport));
        let (service, handle) = StoreService::new(
            PeriodLimits::from(config.as_ref()),
            reporter,
            samplers,
            clock,
        );
        let service_task = tokio::spawn(service.run());

        let cancel_token = CancellationToken::new();
        let tick_task = tokio::spawn(tick_loop(
            handle.clone(),
            Duration::from_secs(config.tick_interval_secs.max(1)),
            cancel_token.clone(),
        ));
        debug!(
            "Agent started, ticking every {}s",
            config.tick_interval_secs.max(1)
        );

        Agent {
            config,
            handle,
            cancel_token,
            service_task,
            tick_task,
        }
    }

    #[must_use]
    pub fn handle(&self) -> StoreHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn web_request(&self) -> RequestTracker {
        RequestTracker::web(self.handle())
    }

    #[must_use]
    pub fn job(&self, queue: &str) -> RequestTracker {
        RequestTracker::job(self.handle(), queue)
    }

    /// Stops ticking and stops the store. Periods not yet dispatched are lost.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.shutdown() {
            debug!("Store already stopped: {err}");
        }
        if let Err(err) = self.tick_task.await {
            error!("Tick loop ended abnormally: {err}");
        }
        if let Err(err) = self.service_task.await {
            error!("Store service ended abnormally: {err}");
        }
        debug!("Agent stopped");
    }
}

async fn tick_loop(handle: StoreHandle, period: Duration, cancel_token: CancellationToken) {
    let mut tick_interval = interval(period);
    tick_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("Tick loop cancelled");
                break;
            }
            _ = tick_interval.tick() => {
                if let Err(err) = handle.tick().await {
                    error!("Tick failed, stopping tick loop: {err}");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[tokio::test]
    async fn test_agent_records_and_shuts_down() {
        let now = UNIX_EPOCH + std::time::Duration::from_secs(1_699_999_980);
        let clock = ManualClock::new(now);
        let agent = Agent::start_with_clock(
            Config::default(),
            Vec::new(),
            None,
            Arc::new(clock.clone()),
        );

        let mut request = agent.web_request();
        request.start_layer("Controller", "users#index");
        request.stop_layer().expect("Failed to stop request layer");

        let mut job = agent.job("mailers");
        job.start_layer("Job", "SendEmail");
        job.stop_layer().expect("Failed to stop job layer");

        let period = agent
            .handle()
            .snapshot(now)
            .await
            .expect("Failed to snapshot store")
            .expect("No period covers the executions");
        assert_eq!(period.web_traces().len(), 1);
        assert_eq!(period.job_traces().len(), 1);
        assert!(period.job_stats("mailers", "SendEmail").is_some());
        assert!(period.histogram("Controller/users#index").is_some());

        let handle = agent.handle();
        agent.shutdown().await;
        assert!(handle.snapshot(SystemTime::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_agent_limits_follow_config() {
        let config = Config {
            max_traces: 1,
            ..Config::default()
        };
        let now = UNIX_EPOCH + std::time::Duration::from_secs(1_699_999_980);
        let agent = Agent::start_with_clock(config, Vec::new(), None, Arc::new(ManualClock::new(now)));
        for _ in 0..3 {
            let mut request = agent.web_request();
            request.start_layer("Controller", "test");
            request.stop_layer().expect("Failed to stop request layer");
        }
        let period = agent
            .handle()
            .snapshot(now)
            .await
            .expect("Failed to snapshot store")
            .expect("No period covers the requests");
        assert_eq!(period.web_traces().len(), 1);
        assert_eq!(agent.config().max_traces, 1);
        agent.shutdown().await;
    }
}
