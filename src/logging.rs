//! Tracing initialisation.
//!
//! `RUST_LOG` takes precedence over the configured level, so
//! `RUST_LOG=rust_daq_stream::writer=trace` narrows output to the writer.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::WriterConfig;

/// Install a global subscriber built from `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_from_config(config: &WriterConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }

    tracing::debug!(level = %config.log_level, json = config.json_logs, "tracing initialised");
    Ok(())
}
