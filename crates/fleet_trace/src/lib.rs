#![warn(missing_docs)]
//! # Structured logging for gossip agents
//!
//! Every agent process (and every test) initialises its subscriber through
//! this crate so filtering and output formats stay uniform across the fleet.
//!
//! ## Filtering
//! The filter is read from `RUST_LOG`:
//! ```bash
//! RUST_LOG='fleet_gossip[gossip_round{agent="agent-0"}]=debug' my_bin
//! ```
//! This shows events from the `fleet_gossip` crate, at debug level or above,
//! emitted inside a `gossip_round` span whose `agent` field is `agent-0`.
//!
//! Without `RUST_LOG` the gossip crates log at `info`. If `CUSTOM_FILTER` is
//! set and parses, it replaces the filter entirely.
//!
//! ## Json
//! `Output::Json` writes one object per line including the span stack, which
//! is convenient for piping a simulated fleet run into `jq`:
//! ```bash
//! RUST_LOG=debug fleet-gossip-sim --structured json 2> log.json
//! jq 'select(.fields.reason != null)' log.json
//! ```

use std::str::FromStr;

use derive_more::Display;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

mod fmt;

pub use errors::TracingError;
pub use tracing;

const DEFAULT_DIRECTIVES: &[&str] = &["fleet_gossip=info", "fleet_gossip_sim=info"];

/// Console output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum Output {
    /// One line per event, no span context.
    Compact,
    /// One json object per event.
    Json,
    /// Human readable with file and line.
    #[default]
    Log,
    /// `Log` plus a line with busy/idle time when each span closes.
    LogTimed,
    /// Install nothing.
    None,
}

impl FromStr for Output {
    type Err = String;

    /// Case-insensitive, so both `Json` and `json` work on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "compact" => Output::Compact,
            "json" => Output::Json,
            "log" => Output::Log,
            "logtimed" | "log_timed" => Output::LogTimed,
            "none" => Output::None,
            _ => return Err(format!("unknown log output {:?}", s)),
        })
    }
}

/// Install a `Log` subscriber for a test when `RUST_LOG` is set.
///
/// Safe to call from every test; only the first call in a process installs
/// anything, the rest return [`TracingError::SetGlobal`].
pub fn test_run() -> Result<(), TracingError> {
    if std::env::var_os("RUST_LOG").is_none() {
        return Ok(());
    }
    init_fmt(Output::Log)
}

/// `RUST_LOG`, or the gossip defaults when it is unset, overridden by
/// `CUSTOM_FILTER` when that is set and valid.
pub fn standard_filter() -> Result<EnvFilter, TracingError> {
    if std::env::var_os("CUSTOM_FILTER").is_some() {
        match EnvFilter::try_from_env("CUSTOM_FILTER") {
            Ok(filter) => return Ok(filter),
            Err(e) => eprintln!("ignoring CUSTOM_FILTER: {}", e),
        }
    }
    let mut filter = EnvFilter::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        for d in DEFAULT_DIRECTIVES {
            filter = filter.add_directive(d.parse()?);
        }
    }
    Ok(filter)
}

/// Install a global subscriber writing to stderr.
pub fn init_fmt(output: Output) -> Result<(), TracingError> {
    init_fmt_with_writer(output, std::io::stderr)
}

fn init_fmt_with_writer<W>(output: Output, writer: W) -> Result<(), TracingError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let Some(layer) = console_layer::<Registry, W>(output, writer) else {
        return Ok(());
    };
    Registry::default()
        .with(layer.with_filter(standard_filter()?))
        .try_init()?;
    Ok(())
}

fn console_layer<S, W>(output: Output, writer: W) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true)
        .with_target(true);
    Some(match output {
        Output::None => return None,
        Output::Log => base.boxed(),
        Output::LogTimed => base.with_span_events(FmtSpan::CLOSE).boxed(),
        Output::Compact => base.compact().boxed(),
        Output::Json => base.event_format(fmt::JsonEvent).boxed(),
    })
}

pub mod errors {
    //! Failures while installing a subscriber.

    /// Failures while installing a subscriber.
    #[derive(thiserror::Error, Debug)]
    pub enum TracingError {
        /// A global subscriber was already installed.
        #[error(transparent)]
        SetGlobal(#[from] tracing_subscriber::util::TryInitError),
        /// A default directive failed to parse.
        #[error(transparent)]
        BadDirective(#[from] tracing_subscriber::filter::ParseError),
    }
}
