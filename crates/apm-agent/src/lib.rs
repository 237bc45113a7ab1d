// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process performance monitoring agent.
//!
//! Instrumentation builds one [`request_tracker::RequestTracker`] per web
//! request or background job. Finished executions become immutable traces and
//! derived metrics, which the [`store`] buckets into one-minute
//! [`reporting_period::ReportingPeriod`]s. A periodic tick hands every ended
//! period to its own task, which captures process samplers and sends the
//! compressed payload through a [`reporter::Transport`].
//!
//! [`agent::Agent`] wires everything together:
//!
//! ```rust,ignore
//! let agent = apm_agent::agent::Agent::from_env()?;
//! let mut request = agent.web_request();
//! request.start_layer("Controller", "users#index");
//! request.track_layer("Ecto", "select#users", Duration::from_millis(3.0))?;
//! request.stop_layer()?;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod clock;
pub mod config;
pub mod duration;
pub mod errors;
pub mod histogram;
pub mod layer;
pub mod logger;
pub mod metric;
pub mod payload;
pub mod reporter;
pub mod reporting_period;
pub mod request_tracker;
pub mod sampler;
pub mod store;
pub mod trace;
