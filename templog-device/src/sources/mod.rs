//! Reading sources
//!
//! Two producers feed the orchestrator: the physical sensor (mandatory) and
//! the hourly weather feed (optional). Both return raw [`Measurement`]s; the
//! orchestrator attaches the device id and capture timestamp.

use async_trait::async_trait;
use templog_common::Measurement;

use crate::error::Result;

pub mod sensor;
pub mod weather;

pub use sensor::open_configured_sensor;
pub use weather::{MetOfficeClient, WeatherError};

/// Physical environmental sensor
///
/// Opening is done by the concrete type's constructor; a value of this trait
/// is always an open handle.
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Take one measurement. Errors are fatal to the device.
    async fn read(&mut self) -> Result<Measurement>;

    /// Release the underlying device. Called once, after the last cycle.
    async fn close(&mut self);
}

/// External weather observation feed
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch the most recent hourly observation for a location
    async fn fetch(
        &self,
        location_id: &str,
        api_key: &str,
    ) -> std::result::Result<Measurement, WeatherError>;
}
