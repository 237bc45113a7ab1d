// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of finished periods to the collector.
//!
//! The [`Reporter`] turns a [`Payload`] into compressed bytes and hands them to
//! a [`Transport`]. Delivery is best effort: every failure is logged and the
//! payload is dropped, nothing is retried or persisted.

use crate::config::Config;
use crate::errors::TransportBuildError;
use crate::payload::{Metadata, Payload, PAYLOAD_VERSION};
use crate::reporting_period::epoch_secs;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

/// Result of handing bytes to the collector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The collector answered with a non-success status.
    Rejected(u16),
    TransportError(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> SendOutcome;
}

/// Transport posting to `{host}/apps/checkin.scout`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    hostname: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, TransportBuildError> {
        let client = build_client(
            config.proxy_url.as_deref(),
            Duration::from_secs(config.report_timeout_secs),
        )?;
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(key) = config.key.as_deref() {
            params.push(("key", key));
        }
        if let Some(name) = config.name.as_deref() {
            params.push(("name", name));
        }
        let url = Url::parse_with_params(&format!("{}/apps/checkin.scout", config.host), &params)
            .map_err(|err| TransportBuildError::InvalidUrl(format!("{}: {err}", config.host)))?;
        Ok(HttpTransport {
            client,
            url,
            hostname: config.hostname.clone(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        if let Ok(hostname) = HeaderValue::from_str(&self.hostname) {
            headers.insert("Agent-Hostname", hostname);
        }
        headers
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: Vec<u8>) -> SendOutcome {
        let response = self
            .client
            .post(self.url.clone())
            .headers(self.headers())
            .body(payload)
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => SendOutcome::Delivered,
            Ok(response) => SendOutcome::Rejected(response.status().as_u16()),
            Err(err) => SendOutcome::TransportError(err.to_string()),
        }
    }
}

pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

/// What happened to one period's payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent(SendOutcome),
    /// Reporting is disabled; the payload was dropped.
    Skipped,
    /// The payload could not be encoded.
    PayloadFailed,
}

pub struct Reporter {
    config: Arc<Config>,
    transport: Option<Arc<dyn Transport>>,
}

impl Reporter {
    #[must_use]
    pub fn new(config: Arc<Config>, transport: Option<Arc<dyn Transport>>) -> Self {
        Reporter { config, transport }
    }

    /// Identity of this process, stamped on every payload.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        Metadata {
            unique_id: uuid::Uuid::new_v4().to_string(),
            payload_version: PAYLOAD_VERSION,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            agent_time: epoch_secs(SystemTime::now()),
            agent_pid: std::process::id(),
            platform: std::env::consts::OS.to_string(),
            app_name: self.config.name.clone(),
            hostname: self.config.hostname.clone(),
        }
    }

    pub async fn report(&self, payload: &Payload) -> ReportOutcome {
        let transport = match &self.transport {
            Some(transport) if self.config.monitor_enabled() => transport,
            _ => {
                debug!(
                    "Reporting disabled, dropping period starting at {}",
                    payload.time_range.start
                );
                return ReportOutcome::Skipped;
            }
        };

        let body = match payload.compress(self.config.compression_level) {
            Ok(body) => body,
            Err(err) => {
                error!("Failed to encode payload: {err}");
                return ReportOutcome::PayloadFailed;
            }
        };

        debug!(
            "Reporting {} metrics, {} web traces and {} job traces ({} bytes)",
            payload.metrics.len(),
            payload.web_traces.len(),
            payload.job_traces.len(),
            body.len()
        );
        let outcome = transport.send(body).await;
        match &outcome {
            SendOutcome::Delivered => debug!("Payload delivered"),
            SendOutcome::Rejected(status) => {
                error!("{status}: Collector rejected payload, dropping it");
            }
            SendOutcome::TransportError(err) => {
                error!("Failed to send payload: {err}");
            }
        }
        ReportOutcome::Sent(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting_period::{PeriodLimits, ReportingPeriod};
    use mockito::{Matcher, Server};
    use std::sync::Mutex;
    use std::time::UNIX_EPOCH;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, payload: Vec<u8>) -> SendOutcome {
            self.sent
                .lock()
                .expect("Failed to lock sent payloads")
                .push(payload);
            SendOutcome::Delivered
        }
    }

    fn enabled_config(host: &str) -> Config {
        Config {
            key: Some("_not_a_real_key_".to_string()),
            name: Some("shop".to_string()),
            monitor: true,
            host: host.to_string(),
            hostname: "web-1".to_string(),
            ..Config::default()
        }
    }

    fn payload(reporter: &Reporter) -> Payload {
        let period = ReportingPeriod::containing(UNIX_EPOCH, PeriodLimits::default());
        Payload::new(reporter.metadata(), &period)
    }

    #[tokio::test]
    async fn test_disabled_reporter_skips_send() {
        let transport = Arc::new(RecordingTransport::default());
        let reporter = Reporter::new(Arc::new(Config::default()), Some(transport.clone()));
        let outcome = reporter.report(&payload(&reporter)).await;
        assert_eq!(outcome, ReportOutcome::Skipped);
        assert!(transport
            .sent
            .lock()
            .expect("Failed to lock sent payloads")
            .is_empty());
    }

    #[tokio::test]
    async fn test_enabled_reporter_sends_compressed_json() {
        let transport = Arc::new(RecordingTransport::default());
        let config = Arc::new(enabled_config("http://localhost"));
        let reporter = Reporter::new(config, Some(transport.clone()));
        let outcome = reporter.report(&payload(&reporter)).await;
        assert_eq!(outcome, ReportOutcome::Sent(SendOutcome::Delivered));

        let sent = transport.sent.lock().expect("Failed to lock sent payloads");
        let json = zstd::decode_all(sent[0].as_slice()).expect("Failed to decompress payload");
        let value: serde_json::Value =
            serde_json::from_slice(&json).expect("Failed to parse payload");
        assert_eq!(value["metadata"]["app_name"], "shop");
        assert_eq!(value["metadata"]["payload_version"], PAYLOAD_VERSION);
    }

    #[tokio::test]
    async fn test_http_transport_posts_to_collector() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/apps/checkin.scout")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("key".into(), "_not_a_real_key_".into()),
                Matcher::UrlEncoded("name".into(), "shop".into()),
            ]))
            .match_header("Agent-Hostname", "web-1")
            .match_header("Content-Type", "application/json")
            .match_header("Content-Encoding", "zstd")
            .with_status(200)
            .create_async()
            .await;

        let transport = HttpTransport::new(&enabled_config(&server.url()))
            .expect("Failed to build transport");
        let outcome = transport.send(b"payload".to_vec()).await;
        assert_eq!(outcome, SendOutcome::Delivered);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_transport_reports_rejection() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/apps/checkin.scout")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("Internal Server Error")
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(&enabled_config(&server.url()))
            .expect("Failed to build transport");
        let outcome = transport.send(b"payload".to_vec()).await;
        assert_eq!(outcome, SendOutcome::Rejected(500));
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let err = HttpTransport::new(&enabled_config("not a url"))
            .expect_err("Invalid host should be refused");
        assert!(matches!(err, TransportBuildError::InvalidUrl(_)));
    }
}
