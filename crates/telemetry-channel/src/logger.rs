// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter for telemetry pipeline logs.
//!
//! Lines are prefixed with `TELEMETRY` so they stand apart from the logs of
//! the application embedding the crate:
//!
//! ```text
//! TELEMETRY | LEVEL | [span_name{span_fields}:] message {event_fields}
//! ```
//!
//! ```text
//! TELEMETRY | DEBUG | CHANNEL | analytics | Dispatching batch 5e1f... of 50 logs
//! TELEMETRY | WARN | CHANNEL | crashes | Storage full, evicted 1 oldest logs
//! ```

use std::error::Error;
use std::fmt;

use tracing::debug;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

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
        write!(&mut writer, "TELEMETRY | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;

                // Filled in by the fmt layer when the span is created.
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs a global fmt subscriber using [`Formatter`].
///
/// `level` is any `EnvFilter` directive (`"debug"`, `"telemetry_channel=trace"`).
/// HTTP client internals are silenced.
pub fn init(level: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = env_filter(level)?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    debug!("Logging subsystem enabled");
    Ok(())
}

/// Same as [`init`] with the level of `config` (`TELEMETRY_LOG_LEVEL`).
pub fn init_from_config(config: &Config) -> Result<(), Box<dyn Error + Send + Sync>> {
    init(&config.log_level)
}

fn env_filter(level: &str) -> Result<EnvFilter, Box<dyn Error + Send + Sync>> {
    Ok(EnvFilter::try_new(format!(
        "h2=off,hyper=off,rustls=off,{level}"
    ))?)
}
