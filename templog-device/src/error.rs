//! Error types for templog-device
//!
//! Anything raised while starting up is fatal. Inside a cycle only sensor
//! errors are; see [`Error::is_fatal`].

use thiserror::Error;

use crate::sources::weather::WeatherError;

/// Main error type for the device
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sensor could not be opened
    #[error("Sensor initialisation failed: {0}")]
    SensorInit(String),

    /// Sensor opened but a read failed
    #[error("Sensor read failed: {0}")]
    SensorRead(String),

    /// Weather feed fetch or parse failure
    #[error("Weather feed error: {0}")]
    Weather(#[from] WeatherError),

    /// Reading store connection or query errors
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Broker connection errors
    #[error("MQTT broker error: {0}")]
    Broker(String),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] templog_common::Error),
}

impl Error {
    /// Whether this error must terminate the process when raised mid-cycle
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_)
            | Error::SensorInit(_)
            | Error::SensorRead(_)
            | Error::Common(_) => true,
            Error::Weather(_) | Error::Storage(_) | Error::Broker(_) => false,
        }
    }
}

/// Convenience Result type using the device Error
pub type Result<T> = std::result::Result<T, Error>;
