// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log formatting for the agent.
//!
//! Every line is prefixed so agent output can be told apart from the host
//! application's own logs:
//!
//! ```text
//! APM_AGENT | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```

use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// First field of every line the agent writes.
pub const PREFIX: &str = "APM_AGENT";

/// Formats events as `APM_AGENT | LEVEL | spans: message fields`.
///
/// The agent installs itself as the process-wide subscriber, so it also sees
/// events from the host application and its libraries. Those keep their
/// target in brackets so they are not mistaken for agent output.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(writer, "{PREFIX} | {} | ", metadata.level())?;
        if !metadata.target().starts_with(env!("CARGO_CRATE_NAME")) {
            write!(writer, "[{}] ", metadata.target())?;
        }
        write_spans(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Writes `name{fields}: ` for every span from the root to the current one.
fn write_spans<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut format::Writer<'_>) -> fmt::Result
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let Some(scope) = ctx.event_scope() else {
        return Ok(());
    };
    for span in scope.from_root() {
        let ext = span.extensions();
        match ext.get::<FormattedFields<N>>() {
            Some(fields) if !fields.is_empty() => write!(writer, "{}{{{fields}}}: ", span.name())?,
            _ => write!(writer, "{}: ", span.name())?,
        }
    }
    Ok(())
}

/// Filter directive for `level`; HTTP client internals are always silenced.
#[must_use]
pub fn filter_directive(level: &str) -> String {
    format!("hyper=off,reqwest=off,rustls=off,{level}")
}

/// Installs the agent's subscriber as the global default.
///
/// Returns `false` when the level cannot be parsed or a global subscriber is
/// already installed, e.g. by the host application.
pub fn init(level: &str) -> bool {
    let filter = match EnvFilter::try_new(filter_directive(level)) {
        Ok(filter) => filter,
        Err(_) => return false,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(Formatter)
        .try_init()
        .is_ok()
}
