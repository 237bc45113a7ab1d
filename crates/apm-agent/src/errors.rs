// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the agent.
//!
//! None of these ever reach the host application: every call site that can
//! produce one logs it and carries on.

use tokio::sync::{mpsc, oneshot};

/// Failure to merge a value into an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum Insert {
    /// The aggregate already holds its maximum number of distinct keys.
    #[error("too many distinct keys, value dropped")]
    Overflow,
    /// NaN or infinite values would poison the running sums.
    #[error("value {0} is not finite")]
    NonFinite(f64),
}

/// Misuse of a [`crate::request_tracker::RequestTracker`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestTrackerError {
    #[error("no open layer to stop")]
    NoOpenLayer,
    #[error("request already finished")]
    AlreadyFinished,
}

/// Failure talking to the store service.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to send command to store: {0}")]
    Send(String),
    #[error("failed to receive response from store: {0}")]
    Recv(#[from] oneshot::error::RecvError),
}

impl<T> From<mpsc::error::SendError<T>> for StoreError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        StoreError::Send("store service stopped".to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("sampler not supported on this platform")]
    Unsupported,
    #[error("failed to read sample: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse sample: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to compress payload: {0}")]
    Compress(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportBuildError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid collector URL {0}")]
    InvalidUrl(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
