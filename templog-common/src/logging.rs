//! Tracing subscriber initialisation
//!
//! `RUST_LOG` wins when set; otherwise `[logging].level` from the config file.
//! Output goes to stderr, or appends to `[logging].file` when configured.
//!
//! Config loading runs before the config's own level is known, so it logs
//! through a scoped [`bootstrap_subscriber`] instead.

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Level used before the config file has been read
const BOOTSTRAP_LEVEL: &str = "info";

/// Stderr subscriber for use with `tracing::subscriber::with_default` while
/// the config is loaded
pub fn bootstrap_subscriber() -> impl Subscriber + Send + Sync {
    bootstrap_subscriber_with_writer(std::io::stderr)
}

/// [`bootstrap_subscriber`] writing to `writer`
pub fn bootstrap_subscriber_with_writer<W>(writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_LEVEL));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_from_level(&config.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
        }
        None => registry.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Logging(e.to_string()))
}

/// Build a filter from a configured level or directive string
pub fn filter_from_level(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::Logging(format!("Invalid log level '{}': {}", level, e)))
}
